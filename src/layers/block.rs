//! Transformer Block
//!
//! ```text
//! x → LayerNorm → Attention → (+) → LayerNorm → MLP → (+) → output
//! │                            ↑ │                        ↑
//! └────────────────────────────┘ └────────────────────────┘
//! ```
//!
//! Pre-norm: each sublayer sees a normalized copy of the residual stream and
//! adds its output back onto the unnormalized stream.

use rand::Rng;

use super::{CausalSelfAttention, Layer, LayerNorm, Mlp, Mode};
use crate::config::Config;
use crate::error::Result;
use crate::parameter::{join, NamedParameters};
use crate::tensor::Tensor;

/// Transformer block combining attention and MLP with residuals
pub struct Block {
    pub ln_1: LayerNorm,
    pub attn: CausalSelfAttention,
    pub ln_2: LayerNorm,
    pub mlp: Mlp,
}

impl Block {
    pub fn new<R: Rng + ?Sized>(config: &Config, rng: &mut R) -> Result<Self> {
        Ok(Self {
            ln_1: LayerNorm::new(config.hidden_size, config.layer_norm_epsilon),
            attn: CausalSelfAttention::new(config, rng)?,
            ln_2: LayerNorm::new(config.hidden_size, config.layer_norm_epsilon),
            mlp: Mlp::new(config, rng),
        })
    }
}

impl Layer for Block {
    fn forward(&self, x: &Tensor, mode: &mut Mode<'_>) -> Result<Tensor> {
        let attn_out = self.attn.forward(&self.ln_1.forward(x, mode)?, mode)?;
        let x = x.add(&attn_out);

        let mlp_out = self.mlp.forward(&self.ln_2.forward(&x, mode)?, mode)?;
        Ok(x.add(&mlp_out))
    }

    fn collect_parameters<'a>(&'a self, prefix: &str, out: &mut NamedParameters<'a>) {
        self.ln_1.collect_parameters(&join(prefix, "ln_1"), out);
        self.attn.collect_parameters(&join(prefix, "attn"), out);
        self.ln_2.collect_parameters(&join(prefix, "ln_2"), out);
        self.mlp.collect_parameters(&join(prefix, "mlp"), out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn config() -> Config {
        Config {
            vocab_size: 10,
            block_size: 4,
            hidden_size: 8,
            n_head: 2,
            n_layer: 1,
            dropout: 0.0,
            ..Config::default()
        }
    }

    fn zero_out(block: &Block) {
        let mut params = Vec::new();
        block.attn.collect_parameters("", &mut params);
        block.mlp.collect_parameters("", &mut params);
        for (_, p) in params {
            p.write().data.iter_mut().for_each(|v| *v = 0.0);
        }
    }

    #[test]
    fn test_zero_sublayers_are_identity() {
        // With every projection zeroed both sublayers output zero, leaving
        // only the residual path.
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let block = Block::new(&config(), &mut rng).unwrap();
        zero_out(&block);

        let x = Tensor::new((0..24).map(|i| i as f32 * 0.1).collect(), vec![1, 3, 8]);
        let y = block.forward(&x, &mut Mode::Inference).unwrap();
        assert_eq!(y, x);
    }

    #[test]
    fn test_shape_preserved() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let block = Block::new(&config(), &mut rng).unwrap();
        let x = Tensor::full(vec![2, 4, 8], 0.25);
        let y = block.forward(&x, &mut Mode::Inference).unwrap();
        assert_eq!(y.shape, vec![2, 4, 8]);
        assert!(y.data.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_parameter_count() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let block = Block::new(&config(), &mut rng).unwrap();
        let mut params = Vec::new();
        block.collect_parameters("blocks.0", &mut params);
        let total: usize = params.iter().map(|(_, p)| p.numel()).sum();
        // 12C² + 13C with bias
        assert_eq!(total, 12 * 64 + 13 * 8);
        assert_eq!(params[0].0, "blocks.0.ln_1.gamma");
    }
}
