//! Tensor Operations for the Forward Pass
//!
//! A minimal dense tensor sized for transformer inference: a flat row-major
//! `Vec<f32>` plus shape and strides. Only the operations the model needs are
//! provided, and each one documents the shapes it accepts.
//!
//! ## Core Concepts
//!
//! - **Data**: Flat `Vec<f32>` storing all elements in row-major order
//! - **Shape**: Dimensions of the tensor (e.g., `[batch, seq, dim]`)
//! - **Strides**: Step sizes for each dimension to compute flat indices
//!
//! ## Example
//!
//! ```rust
//! use coregpt::Tensor;
//!
//! let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
//! let b = Tensor::new(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], vec![3, 2]);
//! let c = a.matmul(&b);
//! assert_eq!(c.shape, vec![2, 2]);
//! assert_eq!(c.data, vec![4.0, 5.0, 10.0, 11.0]);
//! ```
//!
//! ## Errors
//!
//! Tensor primitives assert their shape preconditions and panic on violation.
//! Layers validate activations at their boundary and return
//! [`ShapeError`](crate::ShapeError) before reaching these asserts.
//!
//! ## Parallelism
//!
//! Matrix multiplication, softmax and element-wise operations run over Rayon's
//! thread pool. Every output element is computed by exactly one task with a
//! fixed reduction order, so results do not depend on the thread count.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// A multi-dimensional array of `f32`
///
/// For shape `[2, 3]`, data is stored as
/// `[r0c0, r0c1, r0c2, r1c0, r1c1, r1c2]` and strides are `[3, 1]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTensor", into = "RawTensor")]
pub struct Tensor {
    /// Flat storage of all tensor elements
    pub data: Vec<f32>,
    /// Shape of the tensor (dimensions)
    pub shape: Vec<usize>,
    /// Strides for each dimension (computed from shape)
    pub strides: Vec<usize>,
}

/// Serialized form: strides are derived, so only data and shape are stored.
#[derive(Serialize, Deserialize)]
struct RawTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl TryFrom<RawTensor> for Tensor {
    type Error = String;

    fn try_from(raw: RawTensor) -> Result<Self, Self::Error> {
        let expected: usize = raw.shape.iter().product();
        if raw.data.len() != expected {
            return Err(format!(
                "tensor data length {} does not match shape {:?}",
                raw.data.len(),
                raw.shape
            ));
        }
        Ok(Tensor::new(raw.data, raw.shape))
    }
}

impl From<Tensor> for RawTensor {
    fn from(t: Tensor) -> Self {
        RawTensor {
            shape: t.shape,
            data: t.data,
        }
    }
}

impl Tensor {
    /// Create a new tensor with given data and shape
    ///
    /// # Panics
    ///
    /// Panics if the product of shape dimensions doesn't equal data length
    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Self {
        let expected_size: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected_size,
            "Data length ({}) doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected_size
        );

        let strides = Self::compute_strides(&shape);
        Self {
            data,
            shape,
            strides,
        }
    }

    /// Create a tensor filled with zeros
    pub fn zeros(shape: Vec<usize>) -> Self {
        let size: usize = shape.iter().product();
        Self::new(vec![0.0; size], shape)
    }

    /// Create a tensor filled with `value`
    pub fn full(shape: Vec<usize>, value: f32) -> Self {
        let size: usize = shape.iter().product();
        Self::new(vec![value; size], shape)
    }

    /// For shape `[d0, d1, d2]`, strides are `[d1*d2, d2, 1]`
    fn compute_strides(shape: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }

    /// Number of elements
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Size of the last dimension (1 for a scalar-shaped tensor)
    pub fn last_dim(&self) -> usize {
        self.shape.last().copied().unwrap_or(1)
    }

    /// Computes `result[j] += a_val * b[j]`, shaped for auto-vectorization
    #[inline(always)]
    fn matmul_inner_simd(a_val: f32, b: &[f32], result: &mut [f32]) {
        for (r, &b_val) in result.iter_mut().zip(b.iter()) {
            *r += a_val * b_val;
        }
    }

    /// Matrix multiplication
    ///
    /// Supports:
    /// - 2D × 2D: `[m, k] @ [k, n] -> [m, n]`
    /// - 4D × 4D: `[b, h, m, k] @ [b, h, k, n] -> [b, h, m, n]`, one
    ///   independent product per (batch, head) pair
    ///
    /// # Panics
    ///
    /// Panics if dimensions are incompatible or the rank is unsupported
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        if self.shape.len() == 2 && other.shape.len() == 2 {
            assert_eq!(
                self.shape[1], other.shape[0],
                "Matrix dimensions incompatible: [{}, {}] @ [{}, {}]",
                self.shape[0], self.shape[1], other.shape[0], other.shape[1]
            );

            let m = self.shape[0];
            let n = other.shape[1];
            let k = self.shape[1];

            // Below this much work the thread pool costs more than it saves
            if m * n * k >= 1_000 {
                return self.matmul_parallel_blocked(other, m, n, k);
            }

            let mut result = vec![0.0; m * n];
            for i in 0..m {
                for j in 0..n {
                    let mut sum = 0.0;
                    for l in 0..k {
                        sum += self.data[i * k + l] * other.data[l * n + j];
                    }
                    result[i * n + j] = sum;
                }
            }

            return Tensor::new(result, vec![m, n]);
        }

        if self.shape.len() == 4 && other.shape.len() == 4 {
            let batch = self.shape[0];
            let n_heads = self.shape[1];
            let seq1 = self.shape[2];
            let inner_dim = self.shape[3];
            let seq2 = other.shape[3];

            assert_eq!(
                (other.shape[0], other.shape[1]),
                (batch, n_heads),
                "Batch and head dimensions must match for batched matmul"
            );
            assert_eq!(
                other.shape[2], inner_dim,
                "Inner dimensions must match for batched matmul"
            );

            let mut result = vec![0.0; batch * n_heads * seq1 * seq2];

            result
                .par_chunks_mut(seq1 * seq2)
                .enumerate()
                .for_each(|(bh_idx, chunk)| {
                    let lhs = &self.data[bh_idx * seq1 * inner_dim..(bh_idx + 1) * seq1 * inner_dim];
                    let rhs =
                        &other.data[bh_idx * inner_dim * seq2..(bh_idx + 1) * inner_dim * seq2];

                    for i in 0..seq1 {
                        let out_row = &mut chunk[i * seq2..(i + 1) * seq2];
                        for l in 0..inner_dim {
                            Self::matmul_inner_simd(
                                lhs[i * inner_dim + l],
                                &rhs[l * seq2..(l + 1) * seq2],
                                out_row,
                            );
                        }
                    }
                });

            return Tensor::new(result, vec![batch, n_heads, seq1, seq2]);
        }

        panic!(
            "Unsupported matmul shapes: {:?} @ {:?}",
            self.shape, other.shape
        );
    }

    /// Parallel cache-blocked matrix multiplication
    ///
    /// Processes 8×8 blocks so the working set stays in L1, and distributes
    /// row blocks across Rayon workers. The inner dimension is always visited
    /// in ascending order, so the summation order matches the sequential path.
    fn matmul_parallel_blocked(&self, other: &Tensor, m: usize, n: usize, k: usize) -> Tensor {
        const BLOCK_SIZE: usize = 8;

        let mut result = vec![0.0; m * n];

        result
            .par_chunks_mut(BLOCK_SIZE * n)
            .enumerate()
            .for_each(|(block_i, result_block)| {
                let i_start = block_i * BLOCK_SIZE;
                let i_end = (i_start + BLOCK_SIZE).min(m);

                for j_start in (0..n).step_by(BLOCK_SIZE) {
                    let j_end = (j_start + BLOCK_SIZE).min(n);

                    for k_start in (0..k).step_by(BLOCK_SIZE) {
                        let k_end = (k_start + BLOCK_SIZE).min(k);

                        for i in i_start..i_end {
                            let row_offset = (i - i_start) * n;
                            for k_idx in k_start..k_end {
                                let a_val = self.data[i * k + k_idx];

                                Self::matmul_inner_simd(
                                    a_val,
                                    &other.data[k_idx * n + j_start..k_idx * n + j_end],
                                    &mut result_block[row_offset + j_start..row_offset + j_end],
                                );
                            }
                        }
                    }
                }
            });

        Tensor::new(result, vec![m, n])
    }

    /// Multiply by the transpose of `other` without materializing it
    ///
    /// `[m, k] @ [n, k]ᵀ -> [m, n]`. Each output element is the dot product of
    /// a row of `self` with a row of `other`, which reads both operands
    /// sequentially. Used by the weight-tied decoder, whose weight is the
    /// `[vocab, hidden]` embedding table read as `[hidden, vocab]`.
    ///
    /// # Panics
    ///
    /// Panics unless both operands are 2D with equal column counts
    pub fn matmul_transposed(&self, other: &Tensor) -> Tensor {
        assert!(
            self.shape.len() == 2 && other.shape.len() == 2,
            "matmul_transposed expects 2D operands, got {:?} and {:?}",
            self.shape,
            other.shape
        );
        assert_eq!(
            self.shape[1], other.shape[1],
            "Matrix dimensions incompatible: [{}, {}] @ [{}, {}]^T",
            self.shape[0], self.shape[1], other.shape[0], other.shape[1]
        );

        let m = self.shape[0];
        let k = self.shape[1];
        let n = other.shape[0];
        let mut result = vec![0.0; m * n];

        result
            .par_chunks_mut(n.max(1))
            .enumerate()
            .for_each(|(i, out_row)| {
                let a = &self.data[i * k..(i + 1) * k];
                for (j, out) in out_row.iter_mut().enumerate() {
                    let b = &other.data[j * k..(j + 1) * k];
                    *out = a.iter().zip(b).map(|(x, y)| x * y).sum();
                }
            });

        Tensor::new(result, vec![m, n])
    }

    /// Softmax along the last axis, for any rank
    ///
    /// Uses the numerically stable form:
    ///
    /// ```text
    /// softmax(x)[i] = exp(x[i] - max(x)) / sum(exp(x[j] - max(x)))
    /// ```
    ///
    /// A row whose entries are all `-inf` has no admissible position; it
    /// yields zeros instead of the `0/0` NaN the formula would produce.
    pub fn softmax_last(&self) -> Tensor {
        let cols = self.last_dim();
        let mut result = self.data.clone();

        if cols > 0 {
            result.par_chunks_mut(cols).for_each(|row| {
                let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                if max == f32::NEG_INFINITY {
                    row.iter_mut().for_each(|v| *v = 0.0);
                    return;
                }

                let mut sum = 0.0;
                for v in row.iter_mut() {
                    *v = (*v - max).exp();
                    sum += *v;
                }
                for v in row.iter_mut() {
                    *v /= sum;
                }
            });
        }

        Tensor::new(result, self.shape.clone())
    }

    /// Element-wise addition with broadcasting support
    ///
    /// Supported patterns:
    ///
    /// 1. **Exact match**: same shape
    /// 2. **Broadcast batch**: `[batch, seq, dim] + [seq, dim]`
    /// 3. **Broadcast last dim**: `[*, n] + [n]` (bias addition)
    ///
    /// # Panics
    ///
    /// Panics on any other shape combination
    pub fn add(&self, other: &Tensor) -> Tensor {
        if self.shape == other.shape {
            let result = self
                .data
                .par_iter()
                .zip(&other.data)
                .map(|(a, b)| a + b)
                .collect();
            return Tensor::new(result, self.shape.clone());
        }

        if self.shape.len() == 3 && other.shape.len() == 2 && self.shape[1..] == other.shape[..] {
            let plane = other.data.len();
            let result = self
                .data
                .par_iter()
                .enumerate()
                .map(|(i, a)| a + other.data[i % plane])
                .collect();
            return Tensor::new(result, self.shape.clone());
        }

        if other.shape.len() == 1 && other.data.len() == self.last_dim() {
            let last_dim = self.last_dim();
            let result = self
                .data
                .par_iter()
                .enumerate()
                .map(|(i, a)| a + other.data[i % last_dim])
                .collect();
            return Tensor::new(result, self.shape.clone());
        }

        panic!(
            "Unsupported broadcast for add: {:?} + {:?}",
            self.shape, other.shape
        );
    }

    /// Multiply all elements by scalar
    pub fn mul_scalar(&self, scalar: f32) -> Tensor {
        let result = self.data.par_iter().map(|&x| x * scalar).collect();
        Tensor::new(result, self.shape.clone())
    }

    /// Apply `f` to every element
    pub fn map<F>(&self, f: F) -> Tensor
    where
        F: Fn(f32) -> f32 + Sync + Send,
    {
        let result = self.data.par_iter().map(|&x| f(x)).collect();
        Tensor::new(result, self.shape.clone())
    }

    /// Reshape tensor to new shape
    ///
    /// # Panics
    ///
    /// Panics if the element count changes
    pub fn reshape(&self, new_shape: &[usize]) -> Tensor {
        let new_size: usize = new_shape.iter().product();
        assert_eq!(
            self.data.len(),
            new_size,
            "Cannot reshape {:?} to {:?}: element count mismatch",
            self.shape,
            new_shape
        );
        Tensor::new(self.data.clone(), new_shape.to_vec())
    }

    /// Swap two dimensions (negative indices count from the end)
    pub fn transpose(&self, dim1: isize, dim2: isize) -> Tensor {
        let ndim = self.shape.len() as isize;

        let d1 = if dim1 < 0 { ndim + dim1 } else { dim1 } as usize;
        let d2 = if dim2 < 0 { ndim + dim2 } else { dim2 } as usize;

        let mut new_shape = self.shape.clone();
        new_shape.swap(d1, d2);

        if self.shape.len() == 2 {
            let rows = self.shape[0];
            let cols = self.shape[1];
            let mut result = vec![0.0; rows * cols];

            for i in 0..rows {
                for j in 0..cols {
                    result[j * rows + i] = self.data[i * cols + j];
                }
            }

            return Tensor::new(result, new_shape);
        }

        // Walk the output in order; map each coordinate back through the
        // swapped source strides.
        let new_strides = Self::compute_strides(&new_shape);
        let mut src_strides = self.strides.clone();
        src_strides.swap(d1, d2);

        let result = (0..self.data.len())
            .into_par_iter()
            .map(|i| {
                let mut remaining = i;
                let mut src_idx = 0;
                for (&stride, &src_stride) in new_strides.iter().zip(&src_strides) {
                    let coord = remaining / stride;
                    remaining %= stride;
                    src_idx += coord * src_stride;
                }
                self.data[src_idx]
            })
            .collect();

        Tensor::new(result, new_shape)
    }

    /// Replace values where mask is non-zero with `value`
    ///
    /// The mask's shape must equal the trailing dimensions of `self`; it is
    /// broadcast over the leading ones (a `[T, T]` mask over `[B, H, T, T]`
    /// scores).
    pub fn masked_fill(&self, mask: &Tensor, value: f32) -> Tensor {
        assert!(
            mask.shape.len() <= self.shape.len()
                && self.shape[self.shape.len() - mask.shape.len()..] == mask.shape[..],
            "Mask shape {:?} must match trailing dims of {:?}",
            mask.shape,
            self.shape
        );
        let plane = mask.data.len();
        let result = self
            .data
            .par_iter()
            .enumerate()
            .map(|(i, &x)| if mask.data[i % plane] != 0.0 { value } else { x })
            .collect();
        Tensor::new(result, self.shape.clone())
    }

    /// First `len` entries along dimension 0
    pub fn narrow_rows(&self, len: usize) -> Tensor {
        assert!(
            !self.shape.is_empty() && len <= self.shape[0],
            "Cannot take {} rows of {:?}",
            len,
            self.shape
        );
        let row = self.strides[0];
        let mut shape = self.shape.clone();
        shape[0] = len;
        Tensor::new(self.data[..len * row].to_vec(), shape)
    }

    /// Gather rows of a 2D table: `[rows, width]` indexed by `ids` gives
    /// `[ids.len(), width]`
    pub fn gather_rows(&self, ids: &[usize]) -> Tensor {
        assert_eq!(self.shape.len(), 2, "gather_rows expects a 2D table");
        let width = self.shape[1];
        let mut out = Vec::with_capacity(ids.len() * width);
        for &id in ids {
            assert!(id < self.shape[0], "Row {} out of range {:?}", id, self.shape);
            out.extend_from_slice(&self.data[id * width..(id + 1) * width]);
        }
        Tensor::new(out, vec![ids.len(), width])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_strides() {
        let t = Tensor::zeros(vec![2, 3, 4]);
        assert_eq!(t.strides, vec![12, 4, 1]);
    }

    #[test]
    #[should_panic(expected = "doesn't match shape")]
    fn test_new_rejects_bad_length() {
        Tensor::new(vec![1.0, 2.0, 3.0], vec![2, 2]);
    }

    #[test]
    fn test_matmul_small() {
        let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        let b = Tensor::new(vec![5.0, 6.0, 7.0, 8.0], vec![2, 2]);
        let c = a.matmul(&b);
        assert_eq!(c.data, vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matmul_blocked_matches_naive() {
        let (m, k, n) = (13, 17, 11);
        let a = Tensor::new((0..m * k).map(|i| (i % 7) as f32 - 3.0).collect(), vec![m, k]);
        let b = Tensor::new((0..k * n).map(|i| (i % 5) as f32 * 0.5).collect(), vec![k, n]);
        let c = a.matmul(&b);

        for i in 0..m {
            for j in 0..n {
                let expected: f32 = (0..k).map(|l| a.data[i * k + l] * b.data[l * n + j]).sum();
                assert_abs_diff_eq!(c.data[i * n + j], expected, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn test_matmul_batched() {
        // Two (batch, head) pairs: identity and a doubling matrix
        let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 1.0, 2.0, 3.0, 4.0], vec![1, 2, 2, 2]);
        let b = Tensor::new(vec![1.0, 0.0, 0.0, 1.0, 2.0, 0.0, 0.0, 2.0], vec![1, 2, 2, 2]);
        let c = a.matmul(&b);
        assert_eq!(c.shape, vec![1, 2, 2, 2]);
        assert_eq!(c.data, vec![1.0, 2.0, 3.0, 4.0, 2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_matmul_transposed_matches_explicit_transpose() {
        let a = Tensor::new((0..12).map(|i| i as f32 * 0.1).collect(), vec![3, 4]);
        let w = Tensor::new((0..20).map(|i| (i as f32 - 10.0) * 0.05).collect(), vec![5, 4]);
        let fast = a.matmul_transposed(&w);
        let slow = a.matmul(&w.transpose(0, 1));
        assert_eq!(fast.shape, vec![3, 5]);
        for (x, y) in fast.data.iter().zip(&slow.data) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let t = Tensor::new(vec![1.0, 2.0, 3.0, -1.0, 0.0, 1.0, 5.0, 5.0], vec![2, 1, 4]);
        let s = t.softmax_last();
        for row in s.data.chunks(4) {
            assert_abs_diff_eq!(row.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
        }
        assert_abs_diff_eq!(s.data[6], s.data[7], epsilon = 1e-7);
    }

    #[test]
    fn test_softmax_ignores_neg_inf() {
        let t = Tensor::new(vec![0.0, f32::NEG_INFINITY, 0.0, f32::NEG_INFINITY], vec![1, 4]);
        let s = t.softmax_last();
        assert_eq!(s.data, vec![0.5, 0.0, 0.5, 0.0]);
    }

    #[test]
    fn test_softmax_fully_masked_row_is_zero() {
        let t = Tensor::new(vec![f32::NEG_INFINITY; 3], vec![1, 3]);
        let s = t.softmax_last();
        assert_eq!(s.data, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_add_broadcasts() {
        let x = Tensor::new(vec![1.0; 12], vec![2, 3, 2]);

        let plane = Tensor::new(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0], vec![3, 2]);
        let y = x.add(&plane);
        assert_eq!(&y.data[..6], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(&y.data[6..], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let bias = Tensor::new(vec![10.0, 20.0], vec![2]);
        let z = x.add(&bias);
        assert_eq!(&z.data[..4], &[11.0, 21.0, 11.0, 21.0]);
    }

    #[test]
    #[should_panic(expected = "Unsupported broadcast")]
    fn test_add_rejects_mismatch() {
        let x = Tensor::zeros(vec![2, 3]);
        let y = Tensor::zeros(vec![4]);
        x.add(&y);
    }

    #[test]
    fn test_transpose_4d() {
        // [1, 2, 3, 1] -> swap dims 1 and 2 -> [1, 3, 2, 1]
        let t = Tensor::new(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0], vec![1, 2, 3, 1]);
        let u = t.transpose(1, 2);
        assert_eq!(u.shape, vec![1, 3, 2, 1]);
        assert_eq!(u.data, vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn test_masked_fill_broadcasts_over_leading_dims() {
        let scores = Tensor::zeros(vec![2, 2, 2]);
        let mask = Tensor::new(vec![0.0, 1.0, 0.0, 0.0], vec![2, 2]);
        let out = scores.masked_fill(&mask, -1.0);
        assert_eq!(out.data, vec![0.0, -1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_narrow_and_gather() {
        let table = Tensor::new((0..8).map(|i| i as f32).collect(), vec![4, 2]);
        assert_eq!(table.narrow_rows(2).data, vec![0.0, 1.0, 2.0, 3.0]);

        let rows = table.gather_rows(&[3, 0, 3]);
        assert_eq!(rows.shape, vec![3, 2]);
        assert_eq!(rows.data, vec![6.0, 7.0, 0.0, 1.0, 6.0, 7.0]);
    }

    #[test]
    fn test_serde_roundtrip_recomputes_strides() {
        let t = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![3, 2]);
        let json = serde_json::to_string(&t).unwrap();
        assert!(!json.contains("strides"));
        let back: Tensor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_serde_rejects_inconsistent_shape() {
        let bad = r#"{"shape":[2,2],"data":[1.0,2.0,3.0]}"#;
        assert!(serde_json::from_str::<Tensor>(bad).is_err());
    }
}
