//! CoreGPT: the forward core of a GPT-style decoder
//!
//! A decoder-only transformer language model in plain Rust: token and
//! position embeddings, a stack of pre-norm transformer blocks with causal
//! multi-head self-attention, and an output head tied to the token embedding.
//! Given a batch of token ids it produces next-token logits for every
//! position.
//!
//! # Modules
//!
//! - [`config`] - Model geometry, regularization and masking options
//! - [`error`] - Configuration and shape errors
//! - [`tensor`] - Dense f32 tensors with the operations the model needs
//! - [`parameter`] - Shared learnable parameters and the state dict
//! - [`layers`] - Attention, MLP, block, layer norm, dropout and the tied decoder
//! - [`model`] - The complete [`GPT`] model
//!
//! # Example
//!
//! ```rust
//! use coregpt::{Config, Mode, GPT};
//!
//! let config = Config::tiny(100);
//! let model = GPT::with_seed(&config, 42).unwrap();
//!
//! let tokens = vec![vec![1, 2, 3], vec![4, 5, 6]];
//! let logits = model.forward(&tokens, Mode::Inference).unwrap();
//! assert_eq!(logits.shape, vec![2, 3, 100]);
//! ```
//!
//! Training-mode forwards borrow a generator for dropout:
//!
//! ```rust
//! use coregpt::{Config, Mode, GPT};
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//!
//! let model = GPT::with_seed(&Config::tiny(100), 42).unwrap();
//! let mut rng = ChaCha8Rng::seed_from_u64(7);
//! let logits = model.forward(&[vec![1, 2, 3]], Mode::Train(&mut rng)).unwrap();
//! assert_eq!(logits.shape, vec![1, 3, 100]);
//! ```

pub mod config;
pub mod error;
pub mod layers;
pub mod model;
pub mod parameter;
pub mod tensor;

// Re-export main types for convenience
pub use config::{Config, MaskPolicy};
pub use error::{ConfigError, ModelError, Result, ShapeError};
pub use layers::{Layer, Mode};
pub use model::GPT;
pub use parameter::{NamedParameters, Parameter, ParameterView, StateDict};
pub use tensor::Tensor;
