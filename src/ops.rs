use std::ops::{Add, Mul};

use crate::Shape;
use crate::scalar::{ Inner, Real };


/// Differentiable mid-level operations that are also implemented
/// for non-differentiable [Inner] types.

pub trait BaseOps<I: Inner>: Clone {
  fn shape(&self) -> &Shape;
  fn broadcast(&self, shape: &Shape) -> Self;
  fn reshape(&self, dims: &[usize]) -> Self;
}


/// Differentiable mid-level operations.
///
/// Images are laid out as `[batch, height, width, channels]`.

pub trait RealOps<I: Real>: BaseOps<I> {
  /// Sum of all elements as a scalar.
  fn sum(&self) -> Self;

  /// Product of two matrices.
  fn mm(&self, rhs: &Self) -> Self;

  fn tanh(&self) -> Self;
  fn sigmoid(&self) -> Self;

  /// `ln(1 + e^x)`, evaluated without overflow for large `|x|`.
  fn softplus(&self) -> Self;

  fn leaky_relu(&self, slope: I) -> Self;

  /// Convolution with a `[k, k, in, out]` kernel and "same" padding.
  fn conv2d(&self, kernel: &Self, stride: usize) -> Self;

  /// Transposed convolution with a `[k, k, out, in]` kernel,
  /// upsampling spatial dimensions by `stride`.
  fn conv_transpose2d(&self, kernel: &Self, stride: usize) -> Self;
}


/// High-level operations, implemented exclusively on top of
/// Mops and other Hops. As a result, these are all
/// differentiable when called on a [Variable](crate::Variable).

pub trait Hops<I: Real>: RealOps<I> + Add<Output = Self> + Mul<I, Output = Self> + Sized {
  fn mean(&self) -> Self {
    let n = self.shape().size();
    self.sum() * I::lit(1.0 / n as f64)
  }

  fn negate(&self) -> Self {
    self.clone() * -I::one()
  }

  /// Collapse all but the first dimension.
  fn flatten(&self) -> Self {
    let dims = &self.shape().dims;
    let rest = dims[1..].iter().product();
    self.reshape(&[dims[0], rest])
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::Tensor;

  #[test]
  fn mean() {
    let a = Tensor::new(&[3,2], vec![1., 2., 3., 4., 5., 6.]).trained();
    approx::assert_abs_diff_eq!(a.mean().item(), 3.5, epsilon = 1e-12);
    assert_eq!(Hops::mean(&Tensor::vec(&[1.0, 2.0])).item(), 1.5);
  }

  #[test]
  fn flatten() {
    let a = Tensor::<f32>::zeros(&[4, 2, 3, 5]).flatten();
    assert_eq!(a.dims(), &[4, 30]);
  }

  #[test]
  fn softplus_is_stable() {
    let a = Tensor::vec(&[-1000.0f32, 0.0, 1000.0]).softplus();
    for (x, y) in a.param_iter().zip([0.0, 2.0f32.ln(), 1000.0]) {
      approx::assert_abs_diff_eq!(x, y, epsilon = 1e-6);
    }
  }
}
