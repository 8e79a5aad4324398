use crate::{
  shape::Shape,
  tensor::{ self, Tensor },
  variable::{ Variable, UnaryOp, BinaryOp, MultiOp, Moments },
  scalar::Real,
  ops::{ BaseOps, RealOps, Hops },
};


impl<T: Real> BaseOps<T> for Variable<T> {
  fn shape(&self) -> &Shape {
    self.tensor().shape()
  }

  fn broadcast(&self, shape: &Shape) -> Self {
    if self.tensor().shape().broadcast(shape).dims == self.dims() { return self.clone() }
    self.unary_op(Broadcast { shape: shape.clone() })
  }

  fn reshape(&self, dims: &[usize]) -> Self {
    self.unary_op(Reshape { dims: dims.to_vec() })
  }
}

impl<T: Real> RealOps<T> for Variable<T> {
  fn sum(&self) -> Self {
    self.unary_op(Sum)
  }

  fn mm(&self, rhs: &Self) -> Self {
    self.binary_op(MatMul, rhs)
  }

  fn tanh(&self) -> Self {
    self.unary_op(Tanh)
  }

  fn sigmoid(&self) -> Self {
    self.unary_op(Sigmoid)
  }

  fn softplus(&self) -> Self {
    self.unary_op(Softplus)
  }

  fn leaky_relu(&self, slope: T) -> Self {
    self.unary_op(LeakyReLU { slope })
  }

  fn conv2d(&self, kernel: &Self, stride: usize) -> Self {
    self.binary_op(Convolve { stride }, kernel)
  }

  fn conv_transpose2d(&self, kernel: &Self, stride: usize) -> Self {
    self.binary_op(ConvolveTransposed { stride }, kernel)
  }
}

impl<T: Real> Hops<T> for Variable<T> {}

impl<T: Real> Variable<T> {
  /// Batch normalization over the last axis, using the given statistics.
  ///
  /// With `batch` set, gradients also flow through the statistics,
  /// which must then have been computed from this very input.

  pub fn normalize(&self, gamma: &Self, beta: &Self, moments: &Moments<T>, epsilon: T, batch: bool) -> Self {
    let inv_std = moments.variance.iter()
      .map(|&var| T::one() / (var + epsilon).sqrt() )
      .collect();
    let op = Normalize { mean: moments.mean.clone(), inv_std, batch };
    Self::multi_op(op, &[self, gamma, beta])
  }
}

macro_rules! add_operator {
  ($op:ident, $meth:ident, $symbol:tt) => {
    impl<T: Real> std::ops::$op for &Variable<T> { // &var * &other
      type Output = Variable<T>;

      fn $meth(self, rhs: Self) -> Variable<T> {
        let (lhs, rhs) = if self.dims() != rhs.dims() {
          (self.broadcast(rhs.shape()), rhs.broadcast(self.shape()))
        } else {
          (self.clone(), rhs.clone())
        };
        lhs.binary_op($op, &rhs)
      }
    }

    impl<T: Real> std::ops::$op for Variable<T> { // var * other
      type Output = Variable<T>;

      fn $meth(self, rhs: Self) -> Variable<T> {
        &self $symbol &rhs
      }
    }

    impl<T: Real> std::ops::$op<Variable<T>> for &Variable<T> { // &var * other
      type Output = Variable<T>;

      fn $meth(self, rhs: Variable<T>) -> Variable<T> {
        self $symbol &rhs
      }
    }

    impl<T: Real> std::ops::$op<&Variable<T>> for Variable<T> { // var * &other
      type Output = Variable<T>;

      fn $meth(self, rhs: &Variable<T>) -> Variable<T> {
        &self $symbol rhs
      }
    }

    impl<T: Real> std::ops::$op<T> for &Variable<T> { // &var * T
      type Output = Variable<T>;

      fn $meth(self, rhs: T) -> Variable<T> {
        self $symbol &Tensor::scalar(rhs).tracked()
      }
    }

    impl<T: Real> std::ops::$op<T> for Variable<T> { // var * T
      type Output = Variable<T>;

      fn $meth(self, rhs: T) -> Variable<T> {
        &self $symbol rhs
      }
    }
  };
}

add_operator!(Add, add, +);
add_operator!(Sub, sub, -);
add_operator!(Mul, mul, *);
add_operator!(Div, div, /);


#[derive(Debug, Clone)]
struct Add;

impl<T: Real> BinaryOp<T> for Add {
  fn run(&self, lhs: &Tensor<T>, rhs: &Tensor<T>) -> Tensor<T> {
    lhs + rhs
  }

  fn derive(&self, _lhs: &Tensor<T>, _rhs: &Tensor<T>, grad: &Tensor<T>) -> (Tensor<T>, Tensor<T>) {
    (grad.clone(), grad.clone())
  }
}


#[derive(Debug, Clone)]
struct Sub;

impl<T: Real> BinaryOp<T> for Sub {
  fn run(&self, lhs: &Tensor<T>, rhs: &Tensor<T>) -> Tensor<T> {
    lhs - rhs
  }

  fn derive(&self, _lhs: &Tensor<T>, _rhs: &Tensor<T>, grad: &Tensor<T>) -> (Tensor<T>, Tensor<T>) {
    (grad.clone(), grad * -T::one())
  }
}


#[derive(Debug, Clone)]
struct Mul;

impl<T: Real> BinaryOp<T> for Mul {
  fn run(&self, lhs: &Tensor<T>, rhs: &Tensor<T>) -> Tensor<T> {
    lhs * rhs
  }

  fn derive(&self, lhs: &Tensor<T>, rhs: &Tensor<T>, grad: &Tensor<T>) -> (Tensor<T>, Tensor<T>) {
    (grad * rhs, grad * lhs)
  }
}


#[derive(Debug, Clone)]
struct Div;

impl<T: Real> BinaryOp<T> for Div {
  fn run(&self, lhs: &Tensor<T>, rhs: &Tensor<T>) -> Tensor<T> {
    lhs / rhs
  }

  fn derive(&self, lhs: &Tensor<T>, rhs: &Tensor<T>, grad: &Tensor<T>) -> (Tensor<T>, Tensor<T>) {
    let rgrad = grad * lhs / (rhs * rhs) * -T::one();
    (grad / rhs, rgrad)
  }
}


#[derive(Debug, Clone)]
struct MatMul;

impl<T: Real> BinaryOp<T> for MatMul {
  fn run(&self, lhs: &Tensor<T>, rhs: &Tensor<T>) -> Tensor<T> {
    lhs.mm(rhs)
  }

  fn derive(&self, lhs: &Tensor<T>, rhs: &Tensor<T>, grad: &Tensor<T>) -> (Tensor<T>, Tensor<T>) {
    (grad.matmul(false, rhs, true), lhs.matmul(true, grad, false))
  }
}


#[derive(Debug, Clone)]
struct Broadcast {
  shape: Shape,
}

impl<T: Real> UnaryOp<T> for Broadcast {
  fn run(&self, lhs: &Tensor<T>) -> Tensor<T> {
    lhs.broadcast(&self.shape)
  }

  fn derive(&self, lhs: &Tensor<T>, grad: &Tensor<T>) -> Tensor<T> {
    grad.sum_to(lhs.dims())
  }
}


#[derive(Debug, Clone)]
struct Reshape {
  dims: Vec<usize>,
}

impl<T: Real> UnaryOp<T> for Reshape {
  fn run(&self, lhs: &Tensor<T>) -> Tensor<T> {
    lhs.reshape(&self.dims)
  }

  fn derive(&self, lhs: &Tensor<T>, grad: &Tensor<T>) -> Tensor<T> {
    grad.reshape(lhs.dims())
  }
}


#[derive(Debug, Clone)]
struct Sum;

impl<T: Real> UnaryOp<T> for Sum {
  fn run(&self, lhs: &Tensor<T>) -> Tensor<T> {
    lhs.sum()
  }

  fn derive(&self, lhs: &Tensor<T>, grad: &Tensor<T>) -> Tensor<T> {
    Tensor::fill(lhs.dims(), grad.item())
  }
}


#[derive(Debug, Clone)]
struct LeakyReLU<T> {
  slope: T,
}

impl<T: Real> UnaryOp<T> for LeakyReLU<T> {
  fn run(&self, lhs: &Tensor<T>) -> Tensor<T> {
    lhs.leaky_relu(self.slope)
  }

  fn derive(&self, lhs: &Tensor<T>, grad: &Tensor<T>) -> Tensor<T> {
    grad.zip(lhs, |(g, a)| if a > T::zero() { g } else { g * self.slope })
  }
}


#[derive(Debug, Clone)]
struct Tanh;

impl<T: Real> UnaryOp<T> for Tanh {
  fn run(&self, lhs: &Tensor<T>) -> Tensor<T> {
    lhs.tanh()
  }

  fn derive(&self, lhs: &Tensor<T>, grad: &Tensor<T>) -> Tensor<T> {
    grad.zip(&lhs.tanh(), |(g, t)| g * (T::one() - t * t) )
  }
}


#[derive(Debug, Clone)]
struct Sigmoid;

impl<T: Real> UnaryOp<T> for Sigmoid {
  fn run(&self, lhs: &Tensor<T>) -> Tensor<T> {
    lhs.sigmoid()
  }

  fn derive(&self, lhs: &Tensor<T>, grad: &Tensor<T>) -> Tensor<T> {
    grad.zip(&lhs.sigmoid(), |(g, s)| g * s * (T::one() - s) )
  }
}


#[derive(Debug, Clone)]
struct Softplus;

impl<T: Real> UnaryOp<T> for Softplus {
  fn run(&self, lhs: &Tensor<T>) -> Tensor<T> {
    lhs.softplus()
  }

  fn derive(&self, lhs: &Tensor<T>, grad: &Tensor<T>) -> Tensor<T> {
    grad * lhs.sigmoid()
  }
}


#[derive(Debug, Clone)]
struct Convolve {
  stride: usize,
}

impl<T: Real> BinaryOp<T> for Convolve {
  fn run(&self, lhs: &Tensor<T>, rhs: &Tensor<T>) -> Tensor<T> {
    lhs.conv2d(rhs, self.stride)
  }

  fn derive(&self, lhs: &Tensor<T>, rhs: &Tensor<T>, grad: &Tensor<T>) -> (Tensor<T>, Tensor<T>) {
    tensor::conv2d_backward(lhs, rhs, self.stride, grad)
  }
}


#[derive(Debug, Clone)]
struct ConvolveTransposed {
  stride: usize,
}

impl<T: Real> BinaryOp<T> for ConvolveTransposed {
  fn run(&self, lhs: &Tensor<T>, rhs: &Tensor<T>) -> Tensor<T> {
    lhs.conv_transpose2d(rhs, self.stride)
  }

  fn derive(&self, lhs: &Tensor<T>, rhs: &Tensor<T>, grad: &Tensor<T>) -> (Tensor<T>, Tensor<T>) {
    tensor::conv_transpose2d_backward(lhs, rhs, self.stride, grad)
  }
}


#[derive(Debug, Clone)]
struct Normalize<T> {
  mean: Vec<T>,
  inv_std: Vec<T>,
  batch: bool,
}

impl<T: Real> MultiOp<T> for Normalize<T> {
  fn run(&self, inputs: &[&Tensor<T>]) -> Tensor<T> {
    let (gamma, beta) = (inputs[1].to_vec(), inputs[2].to_vec());
    let channels = gamma.len();
    let data = inputs[0].param_iter()
      .enumerate()
      .map(|(i, x)| {
        let c = i % channels;
        gamma[c] * (x - self.mean[c]) * self.inv_std[c] + beta[c]
      })
      .collect();
    Tensor::new(inputs[0].dims(), data)
  }

  fn derive(&self, inputs: &[&Tensor<T>], grad: &Tensor<T>) -> Vec<Tensor<T>> {
    let gamma = inputs[1].to_vec();
    let channels = gamma.len();
    let x = inputs[0].to_vec();
    let dy = grad.to_vec();
    let x_hat: Vec<T> = x.iter()
      .enumerate()
      .map(|(i, &x)| (x - self.mean[i % channels]) * self.inv_std[i % channels] )
      .collect();
    let mut dbeta = vec![T::zero(); channels];
    let mut dgamma = vec![T::zero(); channels];
    for (i, (&g, &xh)) in dy.iter().zip(&x_hat).enumerate() {
      dbeta[i % channels] += g;
      dgamma[i % channels] += g * xh;
    }
    let m = T::lit((x.len() / channels) as f64);
    let dx = dy.iter()
      .zip(&x_hat)
      .enumerate()
      .map(|(i, (&g, &xh))| {
        let c = i % channels;
        let scale = gamma[c] * self.inv_std[c];
        if self.batch {
          scale / m * (m * g - dbeta[c] - xh * dgamma[c])
        } else {
          scale * g
        }
      })
      .collect();
    vec![
      Tensor::new(inputs[0].dims(), dx),
      Tensor::new(inputs[1].dims(), dgamma),
      Tensor::new(inputs[2].dims(), dbeta),
    ]
  }
}
