use rand::distributions::uniform::SampleUniform;
use num_traits::{Float, Num, NumAssignOps, NumCast};
use serde::{Serialize, de::DeserializeOwned};


/// All types that may be used in a [Tensor](crate::Tensor).
///
/// This trait gets implemented automatically for all types
/// that satisfy its dependent traits.

pub trait Inner: PartialEq + Clone + Copy + Send + Sync + std::fmt::Debug + 'static {}
impl<T: PartialEq + Clone + Copy + Send + Sync + std::fmt::Debug + 'static> Inner for T {}


/// All numeric types.
///
/// This trait gets implemented automatically for all types
/// that satisfy its dependent traits.

pub trait Numeric: Inner + PartialOrd + Num + NumCast + NumAssignOps + std::iter::Sum {}
impl<T: Inner + PartialOrd + Num + NumCast + NumAssignOps + std::iter::Sum> Numeric for T {}


/// All continuous numeric types that can be differentiated and serialized.
///
/// Implemented for `f32` and `f64`.

pub trait Real: Numeric + Float + SampleUniform + Serialize + DeserializeOwned {
  /// Convert a literal constant.
  fn lit(value: f64) -> Self;

  /// `c = a * b` for row-major `c` of shape `[m, n]`.
  ///
  /// `a` is read as an `[m, k]` matrix and `b` as a `[k, n]` matrix,
  /// using the given (row, column) strides.
  fn gemm(
    m: usize, k: usize, n: usize,
    a: &[Self], a_strides: (isize, isize),
    b: &[Self], b_strides: (isize, isize),
    c: &mut [Self],
  );
}

fn check_extent(len: usize, rows: usize, cols: usize, (rs, cs): (isize, isize)) {
  if rows == 0 || cols == 0 { return }
  let last = (rows as isize - 1) * rs + (cols as isize - 1) * cs;
  assert!(rs >= 0 && cs >= 0 && (last as usize) < len,
    "Matrix of {rows}x{cols} with strides ({rs}, {cs}) exceeds buffer of {len}");
}

#[cfg(not(feature = "unsafe"))]
fn naive_gemm<T: Numeric>(
  m: usize, k: usize, n: usize,
  a: &[T], (rsa, csa): (isize, isize),
  b: &[T], (rsb, csb): (isize, isize),
  c: &mut [T],
) {
  for i in 0..m {
    for j in 0..n {
      let mut acc = T::zero();
      for l in 0..k {
        acc += a[i * rsa as usize + l * csa as usize] * b[l * rsb as usize + j * csb as usize];
      }
      c[i * n + j] = acc;
    }
  }
}

macro_rules! impl_real {
  ($type:ty, $gemm:ident) => {
    impl Real for $type {
      fn lit(value: f64) -> Self {
        value as $type
      }

      fn gemm(
        m: usize, k: usize, n: usize,
        a: &[Self], a_strides: (isize, isize),
        b: &[Self], b_strides: (isize, isize),
        c: &mut [Self],
      ) {
        check_extent(a.len(), m, k, a_strides);
        check_extent(b.len(), k, n, b_strides);
        assert!(c.len() >= m * n);

        #[cfg(feature = "unsafe")]
        fn product(
          m: usize, k: usize, n: usize,
          a: &[$type], a_strides: (isize, isize),
          b: &[$type], b_strides: (isize, isize),
          c: &mut [$type],
        ) {
          unsafe {
            matrixmultiply::$gemm(
              m, k, n,
              1.0,
              a.as_ptr(), a_strides.0, a_strides.1,
              b.as_ptr(), b_strides.0, b_strides.1,
              0.0,
              c.as_mut_ptr(), n as isize, 1,
            );
          }
        }

        #[cfg(not(feature = "unsafe"))]
        fn product(
          m: usize, k: usize, n: usize,
          a: &[$type], a_strides: (isize, isize),
          b: &[$type], b_strides: (isize, isize),
          c: &mut [$type],
        ) {
          naive_gemm(m, k, n, a, a_strides, b, b_strides, c)
        }

        product(m, k, n, a, a_strides, b, b_strides, c)
      }
    }
  };
}

impl_real!(f32, sgemm);
impl_real!(f64, dgemm);


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn gemm() {
    let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let b = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let mut c = [0.0f32; 4];
    f32::gemm(2, 3, 2, &a, (3, 1), &b, (2, 1), &mut c);
    assert_eq!(c, [22.0, 28.0, 49.0, 64.0]);
  }

  #[test]
  fn gemm_transposed() {
    // a read as its own transpose: [[1, 3, 5], [2, 4, 6]]
    let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let b = [1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
    let mut c = [0.0f64; 4];
    f64::gemm(2, 3, 2, &a, (1, 2), &b, (2, 1), &mut c);
    assert_eq!(c, [6.0, 8.0, 8.0, 10.0]);
  }
}
