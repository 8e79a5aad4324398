use std::collections::BTreeMap;

use serde::{ Serialize, Deserialize };

use crate::{
  scalar::Real,
  tensor::Tensor,
  variable::Variable,
};


/// An optimization strategy to be used with [Optimizer].
///
/// State is keyed by the parameter's position in the list handed to the
/// optimizer, so it stays valid across serialization.

pub trait Strategy<R: Real> {
  fn update(&mut self, index: usize, grad: &Tensor<R>, rate: R, step: usize) -> Tensor<R>;
}


/// Generic optimizer that allows for several optimization [strategies](Strategy) to be used.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "S: Serialize", deserialize = "S: Deserialize<'de>"))]
pub struct Optimizer<R: Real, S: Strategy<R>> {
  strategy: S,
  pub learning_rate: R,
  step: usize,
}

impl<R: Real, S: Strategy<R>> Optimizer<R, S> {
  pub fn new(learning_rate: R, strategy: S) -> Self {
    Self { strategy, learning_rate, step: 1 }
  }

  /// Number of updates applied so far.

  pub fn steps(&self) -> usize {
    self.step - 1
  }

  pub fn minimize(&mut self, loss: &Variable<R>, params: &[Variable<R>]) {
    // Compute gradients
    loss.backward();
    let grads: Vec<_> = params.iter()
      .map(|param| param.grad().expect("Non-trainable parameters cannot be optimized").detach() )
      .collect();

    // Reset gradients
    loss.reset();

    self.apply(params, &grads);
  }

  /// Apply one update from precomputed gradients, given in the same order as `params`.

  pub fn apply(&mut self, params: &[Variable<R>], grads: &[Tensor<R>]) {
    assert_eq!(params.len(), grads.len(), "Every parameter needs a gradient");
    for (index, (param, grad)) in params.iter().zip(grads).enumerate() {
      // Execute strategy
      let change = self.strategy.update(index, grad, self.learning_rate, self.step);

      // Apply change
      let weights = param.tensor();
      weights.assign(&(weights + change));
    }
    self.step += 1;
  }
}


/// Stochastic Gradient Descent strategy

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SGD;

impl<R: Real> Strategy<R> for SGD {
  fn update(&mut self, _index: usize, grad: &Tensor<R>, rate: R, _step: usize) -> Tensor<R> {
    grad * -rate
  }
}


/// Adaptive Movement Estimation strategy (ADAM)

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Adam<R: Real> {
  pub beta1: R,
  pub beta2: R,
  pub epsilon: R,
  m: BTreeMap<usize, Tensor<R>>,
  v: BTreeMap<usize, Tensor<R>>,
}

impl<R: Real> Adam<R> {
  pub fn new(beta1: R, beta2: R, epsilon: R) -> Self {
    Self {
      beta1,
      beta2,
      epsilon,
      m: BTreeMap::new(),
      v: BTreeMap::new(),
    }
  }
}

impl<R: Real> Default for Adam<R> {
  fn default() -> Self {
    Self::new(R::lit(0.9), R::lit(0.999), R::lit(1e-7))
  }
}

impl<R: Real> Strategy<R> for Adam<R> {
  fn update(&mut self, index: usize, grad: &Tensor<R>, rate: R, step: usize) -> Tensor<R> {
    let m = self.m.entry(index).or_insert_with(|| Tensor::zeros(grad.dims()) );
    m.assign(&(&*m * self.beta1 + grad * (R::one() - self.beta1)));
    let v = self.v.entry(index).or_insert_with(|| Tensor::zeros(grad.dims()) );
    v.assign(&(&*v * self.beta2 + grad * grad * (R::one() - self.beta2)));
    let step = R::lit(step as f64);
    let bias1 = R::one() - self.beta1.powf(step);
    let bias2 = R::one() - self.beta2.powf(step);
    let epsilon = self.epsilon;
    self.m[&index].zip(&self.v[&index], |(m, v)| {
      -rate * (m / bias1) / ((v / bias2).sqrt() + epsilon)
    })
  }
}
