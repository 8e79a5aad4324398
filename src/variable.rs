use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::fmt::Debug;

use rand::Rng;

mod mops;
mod layer;

pub use layer::{ Mode, Moments, Dense, Conv2d, ConvTranspose2d, BatchNorm, dropout };

use crate::{
  internal::*,
  tensor::Tensor,
  scalar::Real,
  ops::RealOps,
};


fn make_id() -> usize {
  static LAST_ID: AtomicUsize = AtomicUsize::new(0);
  LAST_ID.fetch_add(1, Ordering::Relaxed)
}


/// Unary computational operation that can also compute its derivative.

pub trait UnaryOp<T: Real>: Debug + Send + Sync {
  fn run(&self, lhs: &Tensor<T>) -> Tensor<T>;
  fn derive(&self, lhs: &Tensor<T>, grad: &Tensor<T>) -> Tensor<T>;
}


/// Binary computational operation that can also compute its derivative.

pub trait BinaryOp<T: Real>: Debug + Send + Sync {
  fn run(&self, lhs: &Tensor<T>, rhs: &Tensor<T>) -> Tensor<T>;
  fn derive(&self, lhs: &Tensor<T>, rhs: &Tensor<T>, grad: &Tensor<T>) -> (Tensor<T>, Tensor<T>);
}


/// Computational operation that can also compute its derivative.

pub trait MultiOp<T: Real>: Debug + Send + Sync {
  fn run(&self, inputs: &[&Tensor<T>]) -> Tensor<T>;
  fn derive(&self, inputs: &[&Tensor<T>], grad: &Tensor<T>) -> Vec<Tensor<T>>;
}


#[derive(Debug)]
enum Op<T: Real> {
  Unary(Box<dyn UnaryOp<T>>),
  Binary(Box<dyn BinaryOp<T>>),
  Multi(Box<dyn MultiOp<T>>),
}


/// Node in a computation graph, containing a [Variable]'s data and gradient,
/// as well as the operation used to create it.

#[derive(Debug)]
struct Node<T: Real> {
  id: usize,
  data: Tensor<T>,
  grad: Option<Tensor<T>>,
  op: Option<Op<T>>,
  previous: Vec<RcT<Self>>,
  trainable: bool,
}

impl<T: Real> Node<T> {
  fn reset_gradient(&self, filler: T) {
    if let Some(grad) = &self.grad {
      grad.refill(filler);
    }
  }

  fn backward(&self) {
    if let (Some(op), Some(grad)) = (&self.op, &self.grad) {
      let inputs: Vec<&Tensor<T>> = self.previous.iter().map(|prev| &prev.data ).collect();
      let changes = match op {
        Op::Unary(op) => vec![op.derive(inputs[0], grad)],
        Op::Binary(op) => {
          let (lhs, rhs) = op.derive(inputs[0], inputs[1], grad);
          vec![lhs, rhs]
        },
        Op::Multi(op) => op.derive(&inputs, grad),
      };
      for (change, prev) in changes.iter().zip(&self.previous) {
        if let Some(grad) = &prev.grad {
          grad.accumulate(change);
        }
      }
    }
  }
}


/// Variables track the computational operations used to create them and allow
/// for computing their gradient with respect to all input variables involved.
///
/// They get created by calling [tracked](Tensor::tracked) or
/// [trained](Tensor::trained) on any differentiable [Tensor] type.
///
/// Variables dereference to their underlying [Tensor] automatically for
/// non-differentiable operations. Differentiable operations, on the other hand,
/// will always return another Variable.

#[derive(Debug, Clone)]
pub struct Variable<T: Real> {
  node: RcT<Node<T>>,
}

impl<T: Real> std::ops::Deref for Variable<T> {
  type Target = Tensor<T>;

  fn deref(&self) -> &Self::Target {
    &self.node.data
  }
}

impl<T: Real> PartialEq for Variable<T> {
  fn eq(&self, rhs: &Self) -> bool {
    self.node.data == rhs.node.data
  }
}

impl<T: Real> Variable<T> {
  pub(crate) fn from_tensor(tensor: Tensor<T>, trainable: bool) -> Self {
    Self {
      node: RcT::new(Node {
        id: make_id(),
        grad: trainable.then(|| Tensor::zeros(tensor.dims()) ),
        data: tensor,
        op: None,
        previous: vec![],
        trainable,
      }),
    }
  }

  fn operation(op: Op<T>, data: Tensor<T>, grad: bool, previous: Vec<RcT<Node<T>>>) -> Self {
    Self {
      node: RcT::new(Node {
        id: make_id(),
        grad: grad.then(|| Tensor::zeros(data.dims()) ),
        data,
        op: Some(op),
        previous,
        trainable: false,
      }),
    }
  }

  pub fn id(&self) -> usize {
    self.node.id
  }

  pub fn tensor(&self) -> &Tensor<T> {
    &self.node.data
  }

  pub fn grad(&self) -> Option<&Tensor<T>> {
    self.node.grad.as_ref()
  }

  #[cfg(test)]
  pub fn is_trainable(&self) -> bool {
    self.node.trainable
  }

  pub fn unary_op(&self, op: impl UnaryOp<T> + 'static) -> Self {
    let data = op.run(&self.node.data);
    Self::operation(
      Op::Unary(Box::new(op)),
      data,
      self.grad().is_some(),
      vec![self.node.clone()],
    )
  }

  pub fn binary_op(&self, op: impl BinaryOp<T> + 'static, rhs: &Self) -> Self {
    let data = op.run(&self.node.data, &rhs.node.data);
    Self::operation(
      Op::Binary(Box::new(op)),
      data,
      self.grad().is_some() || rhs.grad().is_some(),
      vec![self.node.clone(), rhs.node.clone()],
    )
  }

  pub fn multi_op(op: impl MultiOp<T> + 'static, inputs: &[&Self]) -> Self {
    let tensors: Vec<&Tensor<T>> = inputs.iter().map(|input| &input.node.data ).collect();
    let data = op.run(&tensors);
    Self::operation(
      Op::Multi(Box::new(op)),
      data,
      inputs.iter().any(|input| input.grad().is_some() ),
      inputs.iter().map(|input| input.node.clone() ).collect(),
    )
  }

  /// Compute gradients across this Variable's entire graph.
  ///
  /// Gradients accumulate into all trainable parameters involved
  /// until [reset](Self::reset) is called.

  pub fn backward(&self) {
    if self.grad().is_none() { panic!("Cannot compute gradients for constant {self}") }
    self.node.reset_gradient(T::one());
    for node in self.history().iter().rev() {
      node.backward();
    }
  }

  /// List all trainable parameters in this Variable's graph.

  pub fn parameters(&self) -> Vec<Self> {
    self.history()
      .into_iter()
      .filter(|node| node.trainable )
      .map(|node| Self { node } )
      .collect()
  }

  /// Set gradients to zero for this Variable's entire graph.

  pub fn reset(&self) {
    for node in self.history() {
      node.reset_gradient(T::zero());
    }
  }

  fn history(&self) -> Vec<RcT<Node<T>>> {
    let mut history = vec![];
    Self::history_recurse(&self.node, &mut history, &mut HashSet::new());
    history
  }

  fn history_recurse(node: &RcT<Node<T>>, history: &mut Vec<RcT<Node<T>>>, visited: &mut HashSet<usize>) {
    if !visited.insert(node.id) { return }
    for prev in &node.previous {
      Self::history_recurse(prev, history, visited);
    }
    history.push(node.clone());
  }

  /// Compute a function's gradient with respect to a generated
  /// input numerically and compare it to the automatically derived
  /// solution. Returns the mean absolute difference.
  ///
  /// Supply any function to check that it gets differentiated correctly.
  /// Central differences are taken with a small step, so this is
  /// meant for `f64`.

  pub fn check_gradients<F>(dims: &[usize], rng: &mut impl Rng, generator: F) -> T
  where
    F: Fn(&Self) -> Self
  {
    let eps = T::lit(1e-5);
    let input = Tensor::randn(dims, rng);
    let var = input.trained();
    // Compute gradient using auto diff
    let output = generator(&var).sum();
    output.backward();
    let grad = var.grad().map(Tensor::detach).unwrap_or_else(|| Tensor::zeros(dims) );
    // Compute gradient numerically for every entry of the input
    let values = input.to_vec();
    let evaluate = |i: usize, delta: T| {
      let mut values = values.clone();
      values[i] += delta;
      generator(&Tensor::new(dims, values).tracked()).sum().item()
    };
    let num_grad: Vec<T> = (0..values.len())
      .map(|i| (evaluate(i, eps) - evaluate(i, -eps)) / (T::lit(2.0) * eps) )
      .collect();
    let num_grad = Tensor::new(dims, num_grad);
    grad.zip(&num_grad, |(a, b)| (a - b).abs() ).total() / T::lit(values.len() as f64)
  }
}

impl<T: Real> std::fmt::Display for Variable<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    let title = if self.node.trainable {
      "Trainable"
    } else if self.node.grad.is_some() {
      "Computed"
    } else {
      "Tracked"
    };
    write!(f, "{title} {}", self.tensor())
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn x_squared() {
    let x = Tensor::vec(&[3.0, 5.0]).trained();
    let z = &x * &x + 2.0;
    z.backward();
    assert_eq!(z, Tensor::vec(&[11.0, 27.0]).tracked());
    assert_eq!(x.grad(), Some(&Tensor::vec(&[6.0, 10.0])));
  }

  #[test]
  fn accumulate_and_reset() {
    let x = Tensor::vec(&[1.0, 2.0]).trained();
    let y1 = (&x * 3.0).sum();
    let y2 = (&x * 2.0).sum();
    y1.backward();
    assert_eq!(x.grad().unwrap().to_vec(), vec![3.0, 3.0]);
    y2.backward();
    assert_eq!(x.grad().unwrap().to_vec(), vec![5.0, 5.0]);
    y1.reset();
    assert_eq!(x.grad().unwrap().to_vec(), vec![0.0, 0.0]);
  }

  #[test]
  fn parameters() {
    let w = Tensor::vec(&[1.0, 2.0]).trained();
    let b = Tensor::vec(&[0.5, 0.5]).trained();
    let c = Tensor::vec(&[1.0, 1.0]).tracked();
    let y = (&w * &c + &b).sum();
    let params = y.parameters();
    assert_eq!(params.len(), 2);
    assert!(params.iter().all(|param| param.is_trainable() ));
    assert!(c.grad().is_none());
  }

  #[test]
  fn constants_are_detached() {
    let x = Tensor::vec(&[1.0f32, 2.0]).trained();
    let y = (&x * &x.tensor().tracked()).sum();
    y.backward();
    assert_eq!(x.grad().unwrap().to_vec(), vec![1.0, 2.0]);
  }
}
