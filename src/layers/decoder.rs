//! Weight-Tied Output Head
//!
//! Maps the final hidden states back to vocabulary logits with the transpose
//! of the token embedding table:
//!
//! ```text
//! logits = h @ Eᵀ + b        h [B, T, C], E [vocab, C], b [vocab]
//! ```
//!
//! The decoder does not own `E`. It holds a [`ParameterView`] onto the
//! model's embedding parameter, so there is a single tensor behind both the
//! input lookup and the output projection, and any update to the embedding
//! table is an update to the decoder.
//!
//! The optional bias has shape `[vocab]` and broadcasts over every position,
//! so it does not depend on the sequence length.

use super::{Layer, Mode};
use crate::error::{Result, ShapeError};
use crate::parameter::{join, NamedParameters, Parameter, ParameterView};
use crate::tensor::Tensor;

/// Output projection sharing its weight with the token embedding
pub struct EmbeddingDecoder {
    /// Read-only view of the `[vocab, hidden]` token embedding table
    pub weight: ParameterView,
    pub bias: Option<Parameter>,
    pub vocab_size: usize,
    pub hidden_size: usize,
}

impl EmbeddingDecoder {
    /// Tie a decoder to `embedding`, a `[vocab, hidden]` table
    pub fn tied_to(embedding: &Parameter, bias: bool) -> Self {
        let shape = embedding.shape();
        let (vocab_size, hidden_size) = (shape[0], shape[1]);
        Self {
            weight: embedding.view(),
            bias: bias.then(|| Parameter::new(Tensor::zeros(vec![vocab_size]))),
            vocab_size,
            hidden_size,
        }
    }

    /// The effective `[hidden, vocab]` projection matrix, materialized
    pub fn effective_weight(&self) -> Tensor {
        self.weight.read().transpose(0, 1)
    }
}

impl Layer for EmbeddingDecoder {
    fn forward(&self, x: &Tensor, _mode: &mut Mode<'_>) -> Result<Tensor> {
        if x.shape.is_empty() || x.last_dim() != self.hidden_size {
            return Err(ShapeError::FeatureMismatch {
                layer: "decoder",
                expected: self.hidden_size,
                found: x.last_dim(),
            }
            .into());
        }

        let rows = x.numel() / self.hidden_size;
        let logits = x
            .reshape(&[rows, self.hidden_size])
            .matmul_transposed(&self.weight.read());

        let mut out_shape = x.shape.clone();
        if let Some(last) = out_shape.last_mut() {
            *last = self.vocab_size;
        }
        let logits = logits.reshape(&out_shape);

        Ok(match &self.bias {
            Some(bias) => logits.add(&bias.read()),
            None => logits,
        })
    }

    /// Lists the bias only; the weight belongs to the embedding.
    fn collect_parameters<'a>(&'a self, prefix: &str, out: &mut NamedParameters<'a>) {
        if let Some(bias) = &self.bias {
            out.push((join(prefix, "bias"), bias));
        }
    }
}
