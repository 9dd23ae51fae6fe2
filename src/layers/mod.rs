//! Neural Network Layers
//!
//! Every layer of the decoder implements [`Layer`]: one `forward` operation
//! that takes the activation and an explicit [`Mode`]. Layers are composed by
//! concrete type, so every call is statically dispatched.
//!
//! ## Layers
//!
//! - **activation**: GELU
//! - **linear**: Fully connected layer
//! - **layer_norm**: Layer normalization
//! - **dropout**: Dropout regularization (training mode only)
//! - **attention**: Causal multi-head self-attention
//! - **mlp**: Position-wise feedforward network
//! - **block**: Complete pre-norm transformer block
//! - **decoder**: Weight-tied output head
//!
//! ## Modes
//!
//! Only dropout reacts to the mode. In [`Mode::Train`] it draws its masks
//! from the generator the caller lent to this forward call; in
//! [`Mode::Inference`] it is the identity, which makes inference forwards
//! deterministic.

use std::fmt;

use rand::RngCore;

use crate::error::Result;
use crate::parameter::NamedParameters;
use crate::tensor::Tensor;

pub mod activation;
pub mod attention;
pub mod block;
pub mod decoder;
pub mod dropout;
pub mod layer_norm;
pub mod linear;
pub mod mlp;

pub use activation::gelu;
pub use attention::CausalSelfAttention;
pub use block::Block;
pub use decoder::EmbeddingDecoder;
pub use dropout::Dropout;
pub use layer_norm::LayerNorm;
pub use linear::Linear;
pub use mlp::Mlp;

/// Execution mode of one forward call
pub enum Mode<'r> {
    /// Dropout disabled; output is a deterministic function of the input
    Inference,
    /// Dropout enabled, drawing from the borrowed generator
    Train(&'r mut dyn RngCore),
}

impl Mode<'_> {
    pub fn is_training(&self) -> bool {
        matches!(self, Mode::Train(_))
    }
}

impl fmt::Debug for Mode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Inference => f.write_str("Inference"),
            Mode::Train(_) => f.write_str("Train"),
        }
    }
}

/// A component of the forward pass
pub trait Layer {
    /// Apply the layer to `x`
    fn forward(&self, x: &Tensor, mode: &mut Mode<'_>) -> Result<Tensor>;

    /// Append this layer's parameters to `out`, names prefixed with `prefix`
    fn collect_parameters<'a>(&'a self, prefix: &str, out: &mut NamedParameters<'a>);
}
