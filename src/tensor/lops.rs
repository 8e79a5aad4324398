use crate::{
  shape::Shape,
  tensor::Tensor,
  scalar::{ Inner, Numeric, Real },
  ops::{ BaseOps, RealOps, Hops },
};

use super::cops::{self, gemm};


impl<T: Inner> BaseOps<T> for Tensor<T> {
  fn shape(&self) -> &Shape {
    Tensor::shape(self)
  }

  fn broadcast(&self, shape: &Shape) -> Self {
    Tensor::broadcast(self, shape)
  }

  fn reshape(&self, dims: &[usize]) -> Self {
    Tensor::reshape(self, dims)
  }
}

impl<T: Real> RealOps<T> for Tensor<T> {
  fn sum(&self) -> Self {
    Tensor::scalar(self.total())
  }

  fn mm(&self, rhs: &Self) -> Self {
    assert!(self.rank() == 2 && rhs.rank() == 2 && self.dims()[1] == rhs.dims()[0],
      "Cannot multiply {} by {}", self.shape(), rhs.shape());
    let (m, k, n) = (self.dims()[0], self.dims()[1], rhs.dims()[1]);
    // Strided operands are read in place
    let lhs_shape = Tensor::shape(self);
    let rhs_shape = Tensor::shape(rhs);
    let lhs_data = self.raw();
    let rhs_data = rhs.raw();
    let mut out = vec![T::zero(); m * n];
    T::gemm(m, k, n,
      &lhs_data[lhs_shape.offset..], (lhs_shape.strides[0], lhs_shape.strides[1]),
      &rhs_data[rhs_shape.offset..], (rhs_shape.strides[0], rhs_shape.strides[1]),
      &mut out);
    Tensor::new(&[m, n], out)
  }

  fn tanh(&self) -> Self {
    self.vectorize(|a| a.tanh() )
  }

  fn sigmoid(&self) -> Self {
    self.vectorize(|a| T::one() / (T::one() + (-a).exp()) )
  }

  fn softplus(&self) -> Self {
    self.vectorize(|a| a.max(T::zero()) + (-a.abs()).exp().ln_1p() )
  }

  fn leaky_relu(&self, slope: T) -> Self {
    self.vectorize(|a| if a > T::zero() { a } else { a * slope })
  }

  fn conv2d(&self, kernel: &Self, stride: usize) -> Self {
    cops::conv2d(self, kernel, stride)
  }

  fn conv_transpose2d(&self, kernel: &Self, stride: usize) -> Self {
    cops::conv_transpose2d(self, kernel, stride)
  }
}

impl<T: Real> Hops<T> for Tensor<T> {}

impl<T: Real> Tensor<T> {
  /// Product of two packed matrices, optionally reading either one transposed.

  pub(crate) fn matmul(&self, ta: bool, rhs: &Self, tb: bool) -> Self {
    let (m, k) = if ta { (self.dims()[1], self.dims()[0]) } else { (self.dims()[0], self.dims()[1]) };
    let n = if tb { rhs.dims()[0] } else { rhs.dims()[1] };
    let lhs = self.contiguous();
    let rhs = rhs.contiguous();
    let data = gemm(m, k, n, &lhs.raw(), ta, &rhs.raw(), tb);
    Tensor::new(&[m, n], data)
  }
}

macro_rules! add_operator {
  ($trait:ident, $meth:ident, $symbol:tt) => {
    impl<T: Numeric> std::ops::$trait for &Tensor<T> { // &tensor * &other
      type Output = Tensor<T>;

      fn $meth(self, rhs: Self) -> Tensor<T> {
        Tensor::$meth(self, rhs)
      }
    }

    impl<T: Numeric> std::ops::$trait for Tensor<T> { // tensor * other
      type Output = Tensor<T>;

      fn $meth(self, rhs: Self) -> Tensor<T> {
        &self $symbol &rhs
      }
    }

    impl<T: Numeric> std::ops::$trait<Tensor<T>> for &Tensor<T> { // &tensor * other
      type Output = Tensor<T>;

      fn $meth(self, rhs: Tensor<T>) -> Tensor<T> {
        self $symbol &rhs
      }
    }

    impl<T: Numeric> std::ops::$trait<&Tensor<T>> for Tensor<T> { // tensor * &other
      type Output = Tensor<T>;

      fn $meth(self, rhs: &Tensor<T>) -> Tensor<T> {
        &self $symbol rhs
      }
    }

    impl<T: Numeric> std::ops::$trait<T> for &Tensor<T> { // &tensor * T
      type Output = Tensor<T>;

      fn $meth(self, rhs: T) -> Tensor<T> {
        self $symbol &Tensor::scalar(rhs)
      }
    }

    impl<T: Numeric> std::ops::$trait<T> for Tensor<T> { // tensor * T
      type Output = Tensor<T>;

      fn $meth(self, rhs: T) -> Tensor<T> {
        &self $symbol &Tensor::scalar(rhs)
      }
    }
  };
}

add_operator!(Add, add, +);
add_operator!(Sub, sub, -);
add_operator!(Mul, mul, *);
add_operator!(Div, div, /);


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sum() {
    let a = Tensor::new(&[3,2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    assert_eq!(a.sum(), Tensor::scalar(21.0));
  }

  #[test]
  fn mm() {
    let a = Tensor::arrange(&[2,3], 1.0f32, 1.0);
    let b = Tensor::arrange(&[3,2], 1.0f32, 1.0);
    assert_eq!(a.mm(&b), Tensor::new(&[2,2], vec![22.0, 28.0, 49.0, 64.0]));
  }

  #[test]
  fn mm_transposed_view() {
    let a = Tensor::arrange(&[3,2], 1.0f64, 1.0);
    let b = Tensor::arrange(&[3,2], 1.0f64, 1.0);
    let expected = a.transpose(0, 1).contiguous().mm(&b);
    assert_eq!(a.transpose(0, 1).mm(&b), expected);
    assert_eq!(a.matmul(true, &b, false), expected);
    assert_eq!(expected, Tensor::new(&[2,2], vec![35.0, 44.0, 44.0, 56.0]));
  }

  #[test]
  fn activations() {
    let a = Tensor::vec(&[-2.0f64, 0.0, 3.0]);
    assert_eq!(a.leaky_relu(0.5).to_vec(), vec![-1.0, 0.0, 3.0]);
    assert_eq!(a.sigmoid().at(1).item(), 0.5);
    assert_eq!(a.tanh().at(1).item(), 0.0);
  }

  #[test]
  fn operators() {
    let a = Tensor::vec(&[1.0f32, 2.0]);
    let b = Tensor::vec(&[3.0f32, 4.0]);
    assert_eq!(&a + &b, Tensor::vec(&[4.0, 6.0]));
    assert_eq!(a.clone() * 2.0, Tensor::vec(&[2.0, 4.0]));
    assert_eq!(&b - a, Tensor::vec(&[2.0, 2.0]));
  }
}
