//! Causal Multi-Head Self-Attention
//!
//! ```text
//! Q, K, V = split(x @ W_qkv + b_qkv)          [B, T, C] each
//! per head h:  scores = Q_h @ K_hᵀ / √d       [B, H, T, T]
//!              weights = softmax(mask(scores))
//!              out_h = dropout(weights) @ V_h  [B, H, T, d]
//! y = dropout(merge(out) @ W_proj + b_proj)   [B, T, C]
//! ```
//!
//! with `d = C / H`. Heads are moved next to the batch axis so every
//! (batch, head) pair is an independent matrix product.
//!
//! ## Causal Masking
//!
//! Position `i` may attend to positions `j ≤ i` only. The lower-triangular
//! mask is built once at `block_size × block_size` and its top-left `T × T`
//! window is used for a sequence of length `T`. How the window is applied is
//! set by [`MaskPolicy`]:
//!
//! - `Causal`: scores at `j > i` become `-inf`; nothing else changes.
//! - `ZeroScoreCompat`: scores are multiplied by the window, then every score
//!   equal to zero becomes `-inf`. This also removes legitimate scores that
//!   happen to be exactly zero.
//!
//! Either way a masked entry gets exactly zero weight after the softmax, so
//! the output at position `t` is independent of every input after `t`.

use rand::Rng;
use rayon::prelude::*;

use super::{Dropout, Layer, Linear, Mode};
use crate::config::{Config, MaskPolicy};
use crate::error::{ConfigError, Result, ShapeError};
use crate::parameter::{join, NamedParameters};
use crate::tensor::Tensor;

/// Standard deviation for projections that read from the residual stream
pub const INIT_STD: f32 = 0.02;

/// Standard deviation for projections that write into the residual stream
///
/// Each layer adds two such outputs to the stream, so the variance of the
/// stream grows with `2 × n_layer`; scaling by `1/√(2 × n_layer)` keeps it
/// bounded at initialization.
pub fn residual_init_std(n_layer: usize) -> f32 {
    INIT_STD / ((2 * n_layer) as f32).sqrt()
}

/// Causal multi-head self-attention
pub struct CausalSelfAttention {
    /// Fused Q, K, V projection: [hidden, 3 * hidden]
    pub c_attn: Linear,
    /// Output projection: [hidden, hidden]
    pub c_proj: Linear,
    pub attn_dropout: Dropout,
    pub resid_dropout: Dropout,
    pub n_head: usize,
    pub head_dim: usize,
    pub block_size: usize,
    pub mask_policy: MaskPolicy,
    /// Lower-triangular ones, [block_size, block_size]
    mask: Tensor,
}

impl CausalSelfAttention {
    /// Build the layer from `config`
    ///
    /// # Errors
    ///
    /// [`ConfigError::HeadsDoNotDivide`] if `hidden_size % n_head != 0`
    pub fn new<R: Rng + ?Sized>(config: &Config, rng: &mut R) -> Result<Self> {
        if config.n_head == 0 || config.hidden_size % config.n_head != 0 {
            return Err(ConfigError::HeadsDoNotDivide {
                hidden_size: config.hidden_size,
                n_head: config.n_head,
            }
            .into());
        }

        let c = config.hidden_size;
        let c_attn = Linear::new(c, 3 * c, config.bias, INIT_STD, rng);
        let c_proj = Linear::new(c, c, config.bias, residual_init_std(config.n_layer), rng);

        let n = config.block_size;
        let mut tril = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..=i {
                tril[i * n + j] = 1.0;
            }
        }

        Ok(Self {
            c_attn,
            c_proj,
            attn_dropout: Dropout::new(config.dropout),
            resid_dropout: Dropout::new(config.dropout),
            n_head: config.n_head,
            head_dim: c / config.n_head,
            block_size: config.block_size,
            mask_policy: config.attention_mask,
            mask: Tensor::new(tril, vec![n, n]),
        })
    }

    fn hidden_size(&self) -> usize {
        self.n_head * self.head_dim
    }

    /// Top-left `seq_len × seq_len` window of the causal mask
    fn mask_window(&self, seq_len: usize) -> Tensor {
        let n = self.block_size;
        let mut window = Vec::with_capacity(seq_len * seq_len);
        for i in 0..seq_len {
            window.extend_from_slice(&self.mask.data[i * n..i * n + seq_len]);
        }
        Tensor::new(window, vec![seq_len, seq_len])
    }

    /// Remove future positions from `[B, H, T, T]` scores
    fn apply_mask(&self, scores: Tensor, seq_len: usize) -> Tensor {
        let window = self.mask_window(seq_len);
        match self.mask_policy {
            MaskPolicy::Causal => {
                let future = window.map(|keep| if keep == 0.0 { 1.0 } else { 0.0 });
                scores.masked_fill(&future, f32::NEG_INFINITY)
            }
            MaskPolicy::ZeroScoreCompat => {
                let plane = seq_len * seq_len;
                let mut data = scores.data;
                data.par_iter_mut().enumerate().for_each(|(i, s)| {
                    let v = *s * window.data[i % plane];
                    *s = if v == 0.0 { f32::NEG_INFINITY } else { v };
                });
                Tensor::new(data, scores.shape)
            }
        }
    }

    /// Split fused `[B, T, 3C]` projections into Q, K, V, each laid out as
    /// `[B, H, T, d]`
    fn split_qkv_heads(&self, qkv: &Tensor, batch: usize, seq_len: usize) -> [Tensor; 3] {
        let (h, d) = (self.n_head, self.head_dim);
        let c = h * d;
        let shape = vec![batch, h, seq_len, d];
        let mut parts = [
            vec![0.0; batch * seq_len * c],
            vec![0.0; batch * seq_len * c],
            vec![0.0; batch * seq_len * c],
        ];

        for b in 0..batch {
            for t in 0..seq_len {
                let src_row = (b * seq_len + t) * 3 * c;
                for (which, part) in parts.iter_mut().enumerate() {
                    for head in 0..h {
                        let src = src_row + which * c + head * d;
                        let dst = ((b * h + head) * seq_len + t) * d;
                        part[dst..dst + d].copy_from_slice(&qkv.data[src..src + d]);
                    }
                }
            }
        }

        let [q, k, v] = parts;
        [
            Tensor::new(q, shape.clone()),
            Tensor::new(k, shape.clone()),
            Tensor::new(v, shape),
        ]
    }

    /// `[B, H, T, d]` -> `[B, T, C]`, heads side by side
    fn merge_heads(&self, x: &Tensor, batch: usize, seq_len: usize) -> Tensor {
        let (h, d) = (self.n_head, self.head_dim);
        let c = h * d;
        let mut result = vec![0.0; batch * seq_len * c];

        for b in 0..batch {
            for head in 0..h {
                for t in 0..seq_len {
                    let src = ((b * h + head) * seq_len + t) * d;
                    let dst = (b * seq_len + t) * c + head * d;
                    result[dst..dst + d].copy_from_slice(&x.data[src..src + d]);
                }
            }
        }

        Tensor::new(result, vec![batch, seq_len, c])
    }
}

impl Layer for CausalSelfAttention {
    fn forward(&self, x: &Tensor, mode: &mut Mode<'_>) -> Result<Tensor> {
        if x.shape.len() != 3 {
            return Err(ShapeError::Rank {
                layer: "attention",
                expected: 3,
                found: x.shape.clone(),
            }
            .into());
        }
        let (batch, seq_len, c) = (x.shape[0], x.shape[1], x.shape[2]);
        if c != self.hidden_size() {
            return Err(ShapeError::FeatureMismatch {
                layer: "attention",
                expected: self.hidden_size(),
                found: c,
            }
            .into());
        }
        if seq_len > self.block_size {
            return Err(ShapeError::SequenceTooLong {
                seq_len,
                block_size: self.block_size,
            }
            .into());
        }

        let qkv = self.c_attn.forward(x, mode)?;
        let [q, k, v] = self.split_qkv_heads(&qkv, batch, seq_len);

        let scale = 1.0 / (self.head_dim as f32).sqrt();
        let scores = q.matmul(&k.transpose(2, 3)).mul_scalar(scale);
        let scores = self.apply_mask(scores, seq_len);

        let weights = scores.softmax_last();
        let weights = self.attn_dropout.forward(&weights, mode)?;

        let out = weights.matmul(&v);
        let out = self.merge_heads(&out, batch, seq_len);

        let y = self.c_proj.forward(&out, mode)?;
        self.resid_dropout.forward(&y, mode)
    }

    fn collect_parameters<'a>(&'a self, prefix: &str, out: &mut NamedParameters<'a>) {
        self.c_attn.collect_parameters(&join(prefix, "c_attn"), out);
        self.c_proj.collect_parameters(&join(prefix, "c_proj"), out);
    }
}
