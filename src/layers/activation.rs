//! Activation Functions
//!
//! ## GELU (Gaussian Error Linear Unit)
//!
//! ```text
//! GELU(x) = x × Φ(x) = 0.5 × x × (1 + erf(x / √2))
//! ```
//!
//! where Φ is the standard normal CDF. This is the exact form, not the tanh
//! approximation; `erf` comes from `libm`.

use rayon::prelude::*;

use crate::tensor::Tensor;

/// GELU on a single value
#[inline]
pub fn gelu_scalar(x: f32) -> f32 {
    0.5 * x * (1.0 + libm::erff(x * std::f32::consts::FRAC_1_SQRT_2))
}

/// GELU applied element-wise
pub fn gelu(x: &Tensor) -> Tensor {
    let result = x.data.par_iter().map(|&v| gelu_scalar(v)).collect();
    Tensor::new(result, x.shape.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_gelu_known_values() {
        assert_eq!(gelu_scalar(0.0), 0.0);
        // Φ(1) = 0.841344746
        assert_abs_diff_eq!(gelu_scalar(1.0), 0.841_344_7, epsilon = 1e-5);
        assert_abs_diff_eq!(gelu_scalar(-1.0), -0.158_655_3, epsilon = 1e-5);
    }

    #[test]
    fn test_gelu_tails() {
        assert_abs_diff_eq!(gelu_scalar(10.0), 10.0, epsilon = 1e-5);
        assert_abs_diff_eq!(gelu_scalar(-10.0), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_gelu_tensor_preserves_shape() {
        let x = Tensor::new(vec![-2.0, -0.5, 0.5, 2.0, 0.0, 1.0], vec![1, 2, 3]);
        let y = gelu(&x);
        assert_eq!(y.shape, vec![1, 2, 3]);
        for (a, b) in y.data.iter().zip(&x.data) {
            assert_eq!(*a, gelu_scalar(*b));
        }
    }
}
