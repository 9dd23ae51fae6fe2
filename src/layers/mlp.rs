//! Multi-Layer Perceptron (MLP)
//!
//! Position-wise feedforward network applied after attention in each block:
//!
//! ```text
//! x → c_fc [C → 4C] → GELU → c_proj [4C → C] → dropout → y
//! ```
//!
//! No information moves between positions here; all mixing across the
//! sequence happens in attention.

use rand::Rng;

use super::attention::{residual_init_std, INIT_STD};
use super::{gelu, Dropout, Layer, Linear, Mode};
use crate::config::Config;
use crate::error::Result;
use crate::parameter::{join, NamedParameters};
use crate::tensor::Tensor;

/// MLP (feedforward network) with GELU activation
pub struct Mlp {
    /// Expansion: [hidden, 4 * hidden]
    pub c_fc: Linear,
    /// Contraction back into the residual stream: [4 * hidden, hidden]
    pub c_proj: Linear,
    pub dropout: Dropout,
}

impl Mlp {
    pub fn new<R: Rng + ?Sized>(config: &Config, rng: &mut R) -> Self {
        let c = config.hidden_size;
        Self {
            c_fc: Linear::new(c, 4 * c, config.bias, INIT_STD, rng),
            c_proj: Linear::new(4 * c, c, config.bias, residual_init_std(config.n_layer), rng),
            dropout: Dropout::new(config.dropout),
        }
    }
}

impl Layer for Mlp {
    fn forward(&self, x: &Tensor, mode: &mut Mode<'_>) -> Result<Tensor> {
        let h = self.c_fc.forward(x, mode)?;
        let h = gelu(&h);
        let y = self.c_proj.forward(&h, mode)?;
        self.dropout.forward(&y, mode)
    }

    fn collect_parameters<'a>(&'a self, prefix: &str, out: &mut NamedParameters<'a>) {
        self.c_fc.collect_parameters(&join(prefix, "c_fc"), out);
        self.c_proj.collect_parameters(&join(prefix, "c_proj"), out);
    }
}
