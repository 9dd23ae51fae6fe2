//! Model Configuration
//!
//! Architecture hyperparameters for a GPT-style decoder. A [`Config`] is a
//! plain value: build one from a preset, from JSON, or by struct literal, then
//! hand it to [`GPT::new`](crate::GPT::new), which validates it before any
//! parameter is allocated.
//!
//! ## Parameter Count
//!
//! ```text
//! embeddings = (vocab_size + block_size) × hidden_size
//! per_layer  = 12 × hidden² + 13 × hidden   (with bias)
//!            = 12 × hidden² +  4 × hidden   (without bias)
//! head       = 2 × hidden (+ vocab_size decoder bias)
//! ```
//!
//! The output head adds no weight matrix of its own: it reuses the token
//! embedding table.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// How the attention layer removes future positions from the score matrix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskPolicy {
    /// Add `-inf` to every score where the key position is after the query
    /// position. Legitimate scores are never touched.
    #[default]
    Causal,
    /// Multiply scores by the lower-triangular mask, then rewrite every score
    /// exactly equal to zero to `-inf`. A legitimate score of exactly zero is
    /// masked as well. Kept for output compatibility with checkpoints trained
    /// under that behaviour.
    ZeroScoreCompat,
}

/// Model configuration
///
/// # Fields
///
/// - `vocab_size`: number of token ids
/// - `block_size`: maximum sequence length (context window)
/// - `hidden_size`: embedding width, the residual stream width
/// - `n_head`: attention heads per layer; must divide `hidden_size`
/// - `n_layer`: number of transformer blocks
/// - `dropout`: drop probability in `[0, 1)`, used only in training mode
/// - `bias`: whether dense projections and the decoder carry a bias
/// - `layer_norm_epsilon`: added to the variance before the inverse sqrt
/// - `batch_size`: nominal batch size for shape introspection; forward accepts
///   any batch size
/// - `attention_mask`: see [`MaskPolicy`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub vocab_size: usize,
    pub block_size: usize,
    pub hidden_size: usize,
    pub n_head: usize,
    pub n_layer: usize,
    pub dropout: f32,
    pub bias: bool,
    pub layer_norm_epsilon: f32,
    pub batch_size: usize,
    pub attention_mask: MaskPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vocab_size: 50257, // GPT-2 vocab size
            block_size: 1024,
            hidden_size: 768,
            n_head: 12,
            n_layer: 12,
            dropout: 0.1,
            bias: true,
            layer_norm_epsilon: 1e-5,
            batch_size: 8,
            attention_mask: MaskPolicy::Causal,
        }
    }
}

impl Config {
    /// Tiny config for tests and quick experiments.
    pub fn tiny(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            block_size: 64,
            hidden_size: 64,
            n_head: 4,
            n_layer: 2,
            ..Self::default()
        }
    }

    /// Small config, a few million parameters with a small vocab.
    pub fn small(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            block_size: 256,
            hidden_size: 256,
            n_head: 8,
            n_layer: 4,
            ..Self::default()
        }
    }

    /// GPT-2 Small geometry (768 wide, 12 layers, 12 heads, 1024 context).
    pub fn gpt2_small(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            ..Self::default()
        }
    }

    /// Check every invariant the model relies on.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let sizes = [
            ("vocab_size", self.vocab_size),
            ("block_size", self.block_size),
            ("hidden_size", self.hidden_size),
            ("n_head", self.n_head),
            ("n_layer", self.n_layer),
            ("batch_size", self.batch_size),
        ];
        if let Some((name, _)) = sizes.into_iter().find(|&(_, v)| v == 0) {
            return Err(ConfigError::ZeroSized(name));
        }
        if self.hidden_size % self.n_head != 0 {
            return Err(ConfigError::HeadsDoNotDivide {
                hidden_size: self.hidden_size,
                n_head: self.n_head,
            });
        }
        // Negated comparison so NaN is rejected too.
        if !(self.dropout >= 0.0 && self.dropout < 1.0) {
            return Err(ConfigError::DropoutOutOfRange(self.dropout));
        }
        if !(self.layer_norm_epsilon > 0.0 && self.layer_norm_epsilon.is_finite()) {
            return Err(ConfigError::InvalidEpsilon(self.layer_norm_epsilon));
        }
        Ok(())
    }

    /// Width of a single attention head.
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.n_head
    }

    /// Parse a config from JSON. Fields left out take their [`Default`] value.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a JSON config file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> Config {
        Config {
            vocab_size: 65,
            block_size: 8,
            hidden_size: 32,
            n_head: 4,
            n_layer: 2,
            dropout: 0.0,
            bias: true,
            ..Config::default()
        }
    }

    #[test]
    fn test_presets_are_valid() {
        for config in [
            Config::default(),
            Config::tiny(512),
            Config::small(512),
            Config::gpt2_small(50257),
        ] {
            assert!(config.validate().is_ok(), "{:?}", config);
        }
    }

    #[test]
    fn test_heads_must_divide_hidden() {
        let config = Config {
            hidden_size: 10,
            n_head: 3,
            ..scenario()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::HeadsDoNotDivide {
                hidden_size: 10,
                n_head: 3
            })
        );
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let config = Config {
            n_layer: 0,
            ..scenario()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroSized("n_layer")));

        let config = Config {
            vocab_size: 0,
            ..scenario()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroSized("vocab_size")));
    }

    #[test]
    fn test_dropout_range() {
        for rate in [1.0, 1.5, -0.1, f32::NAN] {
            let config = Config {
                dropout: rate,
                ..scenario()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::DropoutOutOfRange(_))
            ));
        }
        let config = Config {
            dropout: 0.999,
            ..scenario()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_epsilon_must_be_positive() {
        for eps in [0.0, -1e-5, f32::INFINITY] {
            let config = Config {
                layer_norm_epsilon: eps,
                ..scenario()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidEpsilon(_))
            ));
        }
    }

    #[test]
    fn test_head_dim() {
        assert_eq!(scenario().head_dim(), 8);
        assert_eq!(Config::default().head_dim(), 64);
    }

    #[test]
    fn test_json_partial_fields_use_defaults() {
        let config = Config::from_json_str(
            r#"{"vocab_size": 65, "block_size": 8, "hidden_size": 32, "n_head": 4,
                "attention_mask": "zero_score_compat"}"#,
        )
        .unwrap();
        assert_eq!(config.vocab_size, 65);
        assert_eq!(config.n_layer, Config::default().n_layer);
        assert_eq!(config.attention_mask, MaskPolicy::ZeroScoreCompat);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = scenario();
        let json = config.to_json().unwrap();
        assert_eq!(Config::from_json_str(&json).unwrap(), config);
    }
}
