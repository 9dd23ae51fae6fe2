//! Layer Normalization
//!
//! Normalizes each feature vector to zero mean and unit variance, then applies
//! a learnable scale (gamma) and shift (beta):
//!
//! ```text
//! 1. mean = sum(x) / N
//! 2. var  = sum((x - mean)²) / N
//! 3. x̂    = (x - mean) / √(var + ε)
//! 4. y    = γ * x̂ + β
//! ```
//!
//! The variance is computed in a second pass over the centered values rather
//! than as `E[x²] - E[x]²`, which loses precision when the mean is large
//! relative to the spread. ε keeps near-constant rows finite.

use rayon::prelude::*;

use super::{Layer, Mode};
use crate::error::{Result, ShapeError};
use crate::parameter::{join, NamedParameters, Parameter};
use crate::tensor::Tensor;

/// Layer normalization over the last axis
pub struct LayerNorm {
    pub gamma: Parameter, // Scale parameter [dim]
    pub beta: Parameter,  // Shift parameter [dim]
    pub eps: f32,
    pub dim: usize,
}

impl LayerNorm {
    /// Gamma starts at 1 and beta at 0, so a fresh layer only standardizes.
    pub fn new(dim: usize, eps: f32) -> Self {
        Self {
            gamma: Parameter::new(Tensor::full(vec![dim], 1.0)),
            beta: Parameter::new(Tensor::zeros(vec![dim])),
            eps,
            dim,
        }
    }
}

impl Layer for LayerNorm {
    fn forward(&self, x: &Tensor, _mode: &mut Mode<'_>) -> Result<Tensor> {
        if x.shape.is_empty() || x.last_dim() != self.dim {
            return Err(ShapeError::FeatureMismatch {
                layer: "layer_norm",
                expected: self.dim,
                found: x.last_dim(),
            }
            .into());
        }

        let gamma_guard = self.gamma.read();
        let beta_guard = self.beta.read();
        let (gamma, beta) = (gamma_guard.data.as_slice(), beta_guard.data.as_slice());
        let eps = self.eps;
        let n = self.dim as f32;
        let mut out = x.data.clone();

        out.par_chunks_mut(self.dim).for_each(|row| {
            let mean = row.iter().sum::<f32>() / n;
            let var = row
                .iter()
                .map(|&v| {
                    let d = v - mean;
                    d * d
                })
                .sum::<f32>()
                / n;
            let inv_std = 1.0 / (var + eps).sqrt();

            for ((v, &g), &b) in row.iter_mut().zip(gamma).zip(beta) {
                *v = (*v - mean) * inv_std * g + b;
            }
        });

        Ok(Tensor::new(out, x.shape.clone()))
    }

    fn collect_parameters<'a>(&'a self, prefix: &str, out: &mut NamedParameters<'a>) {
        out.push((join(prefix, "gamma"), &self.gamma));
        out.push((join(prefix, "beta"), &self.beta));
    }
}
