//! Linear Layer (Fully Connected)
//!
//! Affine transformation over the last axis: `y = x @ W + b`
//!
//! ```text
//! Input:  x [*, in_features]
//! Weight: W [in_features, out_features]
//! Bias:   b [out_features]            (optional)
//! Output: y [*, out_features]
//! ```
//!
//! Leading dimensions are flattened into rows for a single 2D matmul and
//! restored afterwards.
//!
//! ## Initialization
//!
//! Weights are drawn from N(0, std²) with the standard deviation chosen by the
//! caller: 0.02 for most projections, scaled down for projections that write
//! into the residual stream. Biases start at zero.

use rand::Rng;
use rand_distr::StandardNormal;

use super::{Layer, Mode};
use crate::error::{Result, ShapeError};
use crate::parameter::{join, NamedParameters, Parameter};
use crate::tensor::Tensor;

/// Draw `size` samples from N(0, std²)
pub fn normal_init<R: Rng + ?Sized>(size: usize, std: f32, rng: &mut R) -> Vec<f32> {
    (0..size)
        .map(|_| rng.sample::<f32, _>(StandardNormal) * std)
        .collect()
}

/// Linear layer (fully connected)
pub struct Linear {
    pub weight: Parameter,
    pub bias: Option<Parameter>,
    pub in_features: usize,
    pub out_features: usize,
}

impl Linear {
    /// Create a linear layer with N(0, std²) weights and zero bias
    ///
    /// # Arguments
    ///
    /// * `in_features` - Input dimension
    /// * `out_features` - Output dimension
    /// * `bias` - Whether to allocate a bias vector
    /// * `std` - Standard deviation of the weight initialization
    /// * `rng` - Source of the initial draws
    pub fn new<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        bias: bool,
        std: f32,
        rng: &mut R,
    ) -> Self {
        let weight = Tensor::new(
            normal_init(in_features * out_features, std, rng),
            vec![in_features, out_features],
        );
        Self {
            weight: Parameter::new(weight),
            bias: bias.then(|| Parameter::new(Tensor::zeros(vec![out_features]))),
            in_features,
            out_features,
        }
    }
}

impl Layer for Linear {
    fn forward(&self, x: &Tensor, _mode: &mut Mode<'_>) -> Result<Tensor> {
        if x.shape.is_empty() {
            return Err(ShapeError::Rank {
                layer: "linear",
                expected: 2,
                found: x.shape.clone(),
            }
            .into());
        }
        if x.last_dim() != self.in_features {
            return Err(ShapeError::FeatureMismatch {
                layer: "linear",
                expected: self.in_features,
                found: x.last_dim(),
            }
            .into());
        }

        let rows = x.numel() / self.in_features;
        let y = x
            .reshape(&[rows, self.in_features])
            .matmul(&self.weight.read());

        let mut out_shape = x.shape.clone();
        if let Some(last) = out_shape.last_mut() {
            *last = self.out_features;
        }
        let y = y.reshape(&out_shape);

        Ok(match &self.bias {
            Some(bias) => y.add(&bias.read()),
            None => y,
        })
    }

    fn collect_parameters<'a>(&'a self, prefix: &str, out: &mut NamedParameters<'a>) {
        out.push((join(prefix, "weight"), &self.weight));
        if let Some(bias) = &self.bias {
            out.push((join(prefix, "bias"), bias));
        }
    }
}
