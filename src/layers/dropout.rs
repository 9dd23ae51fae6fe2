//! Dropout Layer
//!
//! During training each activation is zeroed with probability `rate` and the
//! survivors are scaled by `1 / (1 - rate)`, so the expected value is
//! unchanged. During inference the layer passes values through untouched.

use rand::Rng;

use super::{Layer, Mode};
use crate::error::Result;
use crate::parameter::NamedParameters;
use crate::tensor::Tensor;

/// Dropout regularization
#[derive(Clone, Copy, Debug)]
pub struct Dropout {
    pub rate: f32,
}

impl Dropout {
    /// # Panics
    ///
    /// Panics unless `rate` is in `[0, 1)`; [`Config::validate`](crate::Config::validate)
    /// rejects such rates before any layer is built.
    pub fn new(rate: f32) -> Self {
        assert!(
            (0.0..1.0).contains(&rate),
            "Dropout rate must be in [0.0, 1.0)"
        );
        Self { rate }
    }
}

impl Layer for Dropout {
    fn forward(&self, x: &Tensor, mode: &mut Mode<'_>) -> Result<Tensor> {
        let rng = match mode {
            Mode::Train(rng) if self.rate > 0.0 => rng,
            _ => return Ok(x.clone()),
        };

        let scale = 1.0 / (1.0 - self.rate);
        let data = x
            .data
            .iter()
            .map(|&v| {
                if rng.random::<f32>() < self.rate {
                    0.0
                } else {
                    v * scale
                }
            })
            .collect();

        Ok(Tensor::new(data, x.shape.clone()))
    }

    fn collect_parameters<'a>(&'a self, _prefix: &str, _out: &mut NamedParameters<'a>) {}
}
