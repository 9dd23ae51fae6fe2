//! GPT Model
//!
//! A decoder-only transformer with learned absolute positions and an output
//! head tied to the token embedding.
//!
//! ## Architecture Overview
//!
//! ```text
//! Input tokens [batch, seq_len]
//!     ↓
//! Token Embedding (wte) [batch, seq_len, hidden]
//!     + Position Embedding (wpe, first seq_len rows) [seq_len, hidden]
//!     ↓
//! Dropout
//!     ↓
//! Block 0 → Block 1 → … → Block n_layer-1   (construction order)
//!     ↓
//! Layer Norm (ln_f)
//!     ↓
//! EmbeddingDecoder: @ wteᵀ (+ bias) → [batch, seq_len, vocab_size]
//! ```
//!
//! ## Initialization
//!
//! | Parameter                         | Init                         |
//! |-----------------------------------|------------------------------|
//! | wte, wpe                          | N(0, 0.02²)                  |
//! | c_attn, c_fc weights              | N(0, 0.02²)                  |
//! | attn.c_proj, mlp.c_proj weights   | N(0, (0.02/√(2·n_layer))²)   |
//! | all biases                        | 0                            |
//! | layer norm gamma / beta           | 1 / 0                        |
//!
//! All draws come from the generator passed to [`GPT::new`].
//!
//! ## Example
//!
//! ```rust
//! use coregpt::{Config, Mode, GPT};
//!
//! let config = Config {
//!     vocab_size: 65,
//!     block_size: 8,
//!     hidden_size: 32,
//!     n_head: 4,
//!     n_layer: 2,
//!     dropout: 0.0,
//!     ..Config::default()
//! };
//! let model = GPT::with_seed(&config, 1337).unwrap();
//!
//! let logits = model
//!     .forward(&[vec![1, 2, 3, 4, 5, 6, 7, 8]], Mode::Inference)
//!     .unwrap();
//! assert_eq!(logits.shape, vec![1, 8, 65]);
//! ```

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace, warn};

use crate::config::{Config, MaskPolicy};
use crate::error::{ModelError, Result, ShapeError};
use crate::layers::attention::INIT_STD;
use crate::layers::linear::normal_init;
use crate::layers::{Block, Dropout, EmbeddingDecoder, Layer, LayerNorm, Mode};
use crate::parameter::{NamedParameters, Parameter, StateDict};
use crate::tensor::Tensor;

/// Complete GPT model
pub struct GPT {
    pub config: Config,
    /// Token embedding table [vocab_size, hidden]; also the decoder weight
    pub wte: Parameter,
    /// Position embedding table [block_size, hidden]
    pub wpe: Parameter,
    pub drop: Dropout,
    pub blocks: Vec<Block>,
    pub ln_f: LayerNorm,
    pub head: EmbeddingDecoder,
}

impl GPT {
    /// Build a model, drawing initial weights from `rng`
    ///
    /// # Errors
    ///
    /// [`ModelError::Config`] if the config fails [`Config::validate`]; no
    /// parameter is allocated in that case.
    pub fn new<R: Rng + ?Sized>(config: &Config, rng: &mut R) -> Result<Self> {
        config.validate()?;
        if config.attention_mask == MaskPolicy::ZeroScoreCompat {
            warn!("zero_score_compat masking also masks attention scores that are exactly zero");
        }

        let c = config.hidden_size;
        let wte = Parameter::new(Tensor::new(
            normal_init(config.vocab_size * c, INIT_STD, rng),
            vec![config.vocab_size, c],
        ));
        let wpe = Parameter::new(Tensor::new(
            normal_init(config.block_size * c, INIT_STD, rng),
            vec![config.block_size, c],
        ));

        let blocks = (0..config.n_layer)
            .map(|_| Block::new(config, rng))
            .collect::<Result<Vec<_>>>()?;

        let head = EmbeddingDecoder::tied_to(&wte, config.bias);

        let model = Self {
            config: config.clone(),
            wte,
            wpe,
            drop: Dropout::new(config.dropout),
            blocks,
            ln_f: LayerNorm::new(c, config.layer_norm_epsilon),
            head,
        };

        debug!(
            vocab_size = config.vocab_size,
            block_size = config.block_size,
            hidden_size = config.hidden_size,
            n_head = config.n_head,
            n_layer = config.n_layer,
            parameters = model.num_parameters(),
            "built GPT model"
        );

        Ok(model)
    }

    /// Build a model from a seeded ChaCha8 generator
    pub fn with_seed(config: &Config, seed: u64) -> Result<Self> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Self::new(config, &mut rng)
    }

    /// Forward pass: tokens → logits
    ///
    /// # Arguments
    ///
    /// * `tokens` - `[batch][seq_len]` token ids, every row the same length
    /// * `mode` - [`Mode::Inference`], or [`Mode::Train`] with the generator
    ///   dropout draws from during this call
    ///
    /// # Returns
    ///
    /// Raw logits of shape `[batch, seq_len, vocab_size]`
    ///
    /// # Errors
    ///
    /// [`ShapeError`] for an empty or ragged batch, `seq_len > block_size`,
    /// or a token id `>= vocab_size`. Validation happens before any compute.
    pub fn forward(&self, tokens: &[Vec<usize>], mut mode: Mode<'_>) -> Result<Tensor> {
        let (batch, seq_len) = self.check_tokens(tokens)?;
        trace!(batch, seq_len, training = mode.is_training(), "forward");

        let mut x = self.embed(tokens, batch, seq_len);
        x = self.drop.forward(&x, &mut mode)?;

        for block in &self.blocks {
            x = block.forward(&x, &mut mode)?;
        }

        let x = self.ln_f.forward(&x, &mut mode)?;
        self.head.forward(&x, &mut mode)
    }

    /// Validate a token batch and return `(batch, seq_len)`
    fn check_tokens(&self, tokens: &[Vec<usize>]) -> std::result::Result<(usize, usize), ShapeError> {
        let seq_len = tokens.first().map_or(0, Vec::len);
        if seq_len == 0 {
            return Err(ShapeError::EmptyBatch);
        }
        if seq_len > self.config.block_size {
            return Err(ShapeError::SequenceTooLong {
                seq_len,
                block_size: self.config.block_size,
            });
        }

        for (row, ids) in tokens.iter().enumerate() {
            if ids.len() != seq_len {
                return Err(ShapeError::RaggedBatch {
                    row,
                    expected: seq_len,
                    found: ids.len(),
                });
            }
            if let Some((position, &token)) = ids
                .iter()
                .enumerate()
                .find(|&(_, &t)| t >= self.config.vocab_size)
            {
                return Err(ShapeError::TokenOutOfRange {
                    token,
                    row,
                    position,
                    vocab_size: self.config.vocab_size,
                });
            }
        }

        Ok((tokens.len(), seq_len))
    }

    /// Token lookup plus the first `seq_len` positional rows
    fn embed(&self, tokens: &[Vec<usize>], batch: usize, seq_len: usize) -> Tensor {
        let ids: Vec<usize> = tokens.iter().flatten().copied().collect();
        let tok = self
            .wte
            .read()
            .gather_rows(&ids)
            .reshape(&[batch, seq_len, self.config.hidden_size]);
        let pos = self.wpe.read().narrow_rows(seq_len);
        tok.add(&pos)
    }

    /// The token embedding table, shared with the output head
    pub fn token_embedding(&self) -> &Parameter {
        &self.wte
    }

    /// Every parameter with its dotted name, in model order
    ///
    /// The token embedding appears once, as `wte.weight`; the output head
    /// contributes only its bias.
    pub fn named_parameters(&self) -> NamedParameters<'_> {
        let mut out: NamedParameters<'_> = vec![
            ("wte.weight".to_string(), &self.wte),
            ("wpe.weight".to_string(), &self.wpe),
        ];
        for (i, block) in self.blocks.iter().enumerate() {
            block.collect_parameters(&format!("blocks.{i}"), &mut out);
        }
        self.ln_f.collect_parameters("ln_f", &mut out);
        self.head.collect_parameters("head", &mut out);
        out
    }

    /// Total number of learnable scalars
    pub fn num_parameters(&self) -> usize {
        self.named_parameters().iter().map(|(_, p)| p.numel()).sum()
    }

    /// Snapshot of every parameter
    pub fn state_dict(&self) -> StateDict {
        let tensors = self
            .named_parameters()
            .into_iter()
            .map(|(name, p)| (name, p.read().clone()))
            .collect();
        StateDict { tensors }
    }

    /// Overwrite parameters from a snapshot
    ///
    /// Every entry is checked before anything is written, so a failed load
    /// leaves the model unchanged. Values are copied into the existing
    /// parameters, which keeps the decoder tied to the embedding table.
    ///
    /// # Errors
    ///
    /// [`ModelError::MissingParameter`], [`ModelError::UnknownParameter`] or
    /// [`ModelError::ParameterShape`]
    pub fn load_state_dict(&self, dict: &StateDict) -> Result<()> {
        let params = self.named_parameters();

        for (name, param) in &params {
            let tensor = dict
                .get(name)
                .ok_or_else(|| ModelError::MissingParameter(name.clone()))?;
            let expected = param.shape();
            if tensor.shape != expected {
                return Err(ModelError::ParameterShape {
                    name: name.clone(),
                    expected,
                    found: tensor.shape.clone(),
                });
            }
        }
        if let Some(extra) = dict
            .tensors
            .keys()
            .find(|k| !params.iter().any(|(name, _)| name == *k))
        {
            return Err(ModelError::UnknownParameter(extra.clone()));
        }

        for (name, param) in &params {
            if let Some(tensor) = dict.get(name) {
                param.write().data.copy_from_slice(&tensor.data);
            }
        }
        debug!(parameters = params.len(), "loaded state dict");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;

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
    fn test_scenario_shape_and_finite() {
        let model = GPT::with_seed(&scenario(), 0).unwrap();
        let logits = model
            .forward(&[vec![1, 2, 3, 4, 5, 6, 7, 8]], Mode::Inference)
            .unwrap();
        assert_eq!(logits.shape, vec![1, 8, 65]);
        assert!(logits.data.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = Config {
            hidden_size: 10,
            n_head: 3,
            ..scenario()
        };
        let err = GPT::with_seed(&config, 0).err().unwrap();
        assert!(matches!(
            err,
            ModelError::Config(ConfigError::HeadsDoNotDivide {
                hidden_size: 10,
                n_head: 3
            })
        ));
    }

    #[test]
    fn test_token_validation() {
        let model = GPT::with_seed(&scenario(), 0).unwrap();

        let err = model.forward(&[], Mode::Inference).unwrap_err();
        assert!(matches!(err, ModelError::Shape(ShapeError::EmptyBatch)));

        let err = model
            .forward(&[vec![1, 2, 3], vec![1, 2]], Mode::Inference)
            .unwrap_err();
        assert!(matches!(
            err,
            ModelError::Shape(ShapeError::RaggedBatch {
                row: 1,
                expected: 3,
                found: 2
            })
        ));

        let err = model
            .forward(&[vec![1, 65, 3]], Mode::Inference)
            .unwrap_err();
        assert!(matches!(
            err,
            ModelError::Shape(ShapeError::TokenOutOfRange {
                token: 65,
                row: 0,
                position: 1,
                vocab_size: 65
            })
        ));
    }

    #[test]
    fn test_block_size_boundary() {
        let model = GPT::with_seed(&scenario(), 0).unwrap();
        assert!(model.forward(&[vec![0; 8]], Mode::Inference).is_ok());
        let err = model.forward(&[vec![0; 9]], Mode::Inference).unwrap_err();
        assert!(matches!(
            err,
            ModelError::Shape(ShapeError::SequenceTooLong {
                seq_len: 9,
                block_size: 8
            })
        ));
    }

    #[test]
    fn test_parameter_count_formula() {
        let config = scenario();
        let model = GPT::with_seed(&config, 0).unwrap();
        let c = config.hidden_size;
        let expected = (config.vocab_size + config.block_size) * c
            + config.n_layer * (12 * c * c + 13 * c)
            + 2 * c
            + config.vocab_size;
        assert_eq!(model.num_parameters(), expected);
    }

    #[test]
    fn test_parameter_names_unique_and_ordered() {
        let model = GPT::with_seed(&scenario(), 0).unwrap();
        let names: Vec<String> = model
            .named_parameters()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names[0], "wte.weight");
        assert_eq!(names[1], "wpe.weight");
        assert_eq!(names[2], "blocks.0.ln_1.gamma");
        assert_eq!(names.last().unwrap(), "head.bias");

        let mut deduped = names.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), names.len());
    }

    #[test]
    fn test_head_is_tied() {
        let model = GPT::with_seed(&scenario(), 0).unwrap();
        assert!(model.head.weight.is_view_of(model.token_embedding()));
    }

    #[test]
    fn test_same_seed_same_weights() {
        let a = GPT::with_seed(&scenario(), 9).unwrap();
        let b = GPT::with_seed(&scenario(), 9).unwrap();
        assert_eq!(a.state_dict(), b.state_dict());

        let c = GPT::with_seed(&scenario(), 10).unwrap();
        assert_ne!(a.state_dict(), c.state_dict());
    }

    #[test]
    fn test_load_state_dict_rejects_bad_input() {
        let model = GPT::with_seed(&scenario(), 0).unwrap();

        let mut dict = model.state_dict();
        dict.tensors.remove("ln_f.beta");
        assert!(matches!(
            model.load_state_dict(&dict),
            Err(ModelError::MissingParameter(name)) if name == "ln_f.beta"
        ));

        let mut dict = model.state_dict();
        dict.tensors
            .insert("lm_head.weight".to_string(), Tensor::zeros(vec![1]));
        assert!(matches!(
            model.load_state_dict(&dict),
            Err(ModelError::UnknownParameter(name)) if name == "lm_head.weight"
        ));

        let mut dict = model.state_dict();
        dict.tensors
            .insert("wpe.weight".to_string(), Tensor::zeros(vec![4, 32]));
        assert!(matches!(
            model.load_state_dict(&dict),
            Err(ModelError::ParameterShape { .. })
        ));
    }
}
