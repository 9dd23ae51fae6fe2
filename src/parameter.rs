//! Parameters and the State Dict
//!
//! Every learnable tensor lives in a [`Parameter`]: a shared, lock-protected
//! handle. The forward pass only takes read locks, so concurrent forwards over
//! one model are safe; an external optimizer takes write locks between steps.
//!
//! ## Weight Tying
//!
//! The token embedding table is read by two consumers: the input lookup and
//! the output decoder. The model owns exactly one [`Parameter`] for it and the
//! decoder holds a [`ParameterView`], a read-only handle onto the same storage.
//! A write through the parameter is visible to the decoder immediately, and
//! the table is counted, listed and serialized once.
//!
//! ## State Dict
//!
//! [`StateDict`] is a serializable snapshot of every named parameter, used by
//! whatever persists or restores weights:
//!
//! ```rust
//! use coregpt::{Config, GPT, StateDict};
//!
//! let config = Config::tiny(128);
//! let model = GPT::with_seed(&config, 0).unwrap();
//! let snapshot: StateDict = model.state_dict();
//!
//! let restored = GPT::with_seed(&config, 1).unwrap();
//! restored.load_state_dict(&snapshot).unwrap();
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tensor::Tensor;

/// A learnable tensor with a single owner
///
/// Not `Clone`: the model holds the one canonical handle. Consumers that only
/// read (the tied decoder) take a [`ParameterView`].
pub struct Parameter {
    value: Arc<RwLock<Tensor>>,
}

impl Parameter {
    pub fn new(value: Tensor) -> Self {
        Self {
            value: Arc::new(RwLock::new(value)),
        }
    }

    /// Shared read access for the forward pass
    pub fn read(&self) -> RwLockReadGuard<'_, Tensor> {
        self.value.read()
    }

    /// Exclusive write access for an optimizer or a state-dict load
    pub fn write(&self) -> RwLockWriteGuard<'_, Tensor> {
        self.value.write()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.read().shape.clone()
    }

    pub fn numel(&self) -> usize {
        self.read().data.len()
    }

    /// Read-only handle onto the same storage
    pub fn view(&self) -> ParameterView {
        ParameterView {
            value: Arc::clone(&self.value),
        }
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("shape", &self.shape())
            .finish()
    }
}

/// Read-only handle onto a [`Parameter`]'s storage
#[derive(Clone)]
pub struct ParameterView {
    value: Arc<RwLock<Tensor>>,
}

impl ParameterView {
    pub fn read(&self) -> RwLockReadGuard<'_, Tensor> {
        self.value.read()
    }

    /// True when this view reads the given parameter's storage
    pub fn is_view_of(&self, parameter: &Parameter) -> bool {
        Arc::ptr_eq(&self.value, &parameter.value)
    }
}

impl fmt::Debug for ParameterView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterView")
            .field("shape", &self.read().shape)
            .finish()
    }
}

/// Named collection of parameter handles, in model order
pub type NamedParameters<'a> = Vec<(String, &'a Parameter)>;

/// Join a dotted parameter path
pub(crate) fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// Serializable snapshot of every named parameter
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDict {
    pub tensors: BTreeMap<String, Tensor>,
}

impl StateDict {
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_sees_writes() {
        let param = Parameter::new(Tensor::zeros(vec![2, 2]));
        let view = param.view();
        param.write().data[3] = 7.0;
        assert_eq!(view.read().data[3], 7.0);
        assert!(view.is_view_of(&param));
    }

    #[test]
    fn test_view_of_other_parameter() {
        let a = Parameter::new(Tensor::zeros(vec![1]));
        let b = Parameter::new(Tensor::zeros(vec![1]));
        assert!(!a.view().is_view_of(&b));
    }

    #[test]
    fn test_join() {
        assert_eq!(join("", "wte"), "wte");
        assert_eq!(join("blocks.0", "ln_1"), "blocks.0.ln_1");
    }

    #[test]
    fn test_state_dict_json() {
        let mut dict = StateDict::default();
        dict.tensors
            .insert("w".to_string(), Tensor::new(vec![1.0, -2.5], vec![2]));
        let back = StateDict::from_json(&dict.to_json().unwrap()).unwrap();
        assert_eq!(back, dict);
    }
}
