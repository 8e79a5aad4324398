use rand::Rng;
use serde::{ Serialize, Deserialize };

use crate::{ ops::*, scalar::Real, Variable, Tensor };


/// Whether stochastic regularization and batch statistics are active.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  Train,
  Eval,
}


/// Per-channel mean and (biased) variance over all but the last axis.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Moments<T> {
  pub mean: Vec<T>,
  pub variance: Vec<T>,
}

impl<T: Real> Moments<T> {
  /// Zero mean and unit variance.

  pub fn identity(channels: usize) -> Self {
    Self { mean: vec![T::zero(); channels], variance: vec![T::one(); channels] }
  }

  pub fn of(x: &Tensor<T>) -> Self {
    let channels = x.dims()[x.rank() - 1];
    let count = T::lit((x.size() / channels) as f64);
    let values = x.to_vec();
    let mut mean = vec![T::zero(); channels];
    for (i, &value) in values.iter().enumerate() {
      mean[i % channels] += value;
    }
    for m in &mut mean { *m /= count }
    let mut variance = vec![T::zero(); channels];
    for (i, &value) in values.iter().enumerate() {
      let delta = value - mean[i % channels];
      variance[i % channels] += delta * delta;
    }
    for v in &mut variance { *v /= count }
    Self { mean, variance }
  }

  /// Exponential moving average that keeps `momentum` of `self`.

  pub fn blend(&self, other: &Self, momentum: T) -> Self {
    let mix = |a: &[T], b: &[T]| a.iter()
      .zip(b)
      .map(|(&a, &b)| a * momentum + b * (T::one() - momentum) )
      .collect();
    Self {
      mean: mix(&self.mean, &other.mean),
      variance: mix(&self.variance, &other.variance),
    }
  }

  pub fn all_finite(&self) -> bool {
    self.mean.iter().chain(&self.variance).all(|a| a.is_finite() )
  }
}


/// Fully connected layer.

#[derive(Debug, Clone)]
pub struct Dense<T: Real> {
  pub weights: Variable<T>,
  pub bias: Option<Variable<T>>,
}

impl<T: Real> Dense<T> {
  pub fn new(inputs: usize, outputs: usize, bias: bool, rng: &mut impl Rng) -> Self {
    Self {
      weights: Tensor::glorot_uniform(&[inputs, outputs], inputs, outputs, rng).trained(),
      bias: bias.then(|| Tensor::zeros(&[outputs]).trained() ),
    }
  }

  pub fn forward(&self, x: &Variable<T>) -> Variable<T> {
    let y = x.mm(&self.weights);
    match &self.bias {
      Some(bias) => y + bias,
      None => y,
    }
  }

  pub fn parameters(&self) -> Vec<Variable<T>> {
    std::iter::once(self.weights.clone()).chain(self.bias.clone()).collect()
  }
}


/// Strided 2-D convolution with "same" padding.

#[derive(Debug, Clone)]
pub struct Conv2d<T: Real> {
  pub kernel: Variable<T>,
  pub bias: Option<Variable<T>>,
  pub stride: usize,
}

impl<T: Real> Conv2d<T> {
  pub fn new(in_channels: usize, out_channels: usize, kernel: usize, stride: usize, bias: bool, rng: &mut impl Rng) -> Self {
    let field = kernel * kernel;
    let dims = [kernel, kernel, in_channels, out_channels];
    Self {
      kernel: Tensor::glorot_uniform(&dims, field * in_channels, field * out_channels, rng).trained(),
      bias: bias.then(|| Tensor::zeros(&[out_channels]).trained() ),
      stride,
    }
  }

  pub fn forward(&self, x: &Variable<T>) -> Variable<T> {
    let y = x.conv2d(&self.kernel, self.stride);
    match &self.bias {
      Some(bias) => y + bias,
      None => y,
    }
  }

  pub fn parameters(&self) -> Vec<Variable<T>> {
    std::iter::once(self.kernel.clone()).chain(self.bias.clone()).collect()
  }
}


/// Transposed 2-D convolution that upsamples by its stride.

#[derive(Debug, Clone)]
pub struct ConvTranspose2d<T: Real> {
  pub kernel: Variable<T>,
  pub stride: usize,
}

impl<T: Real> ConvTranspose2d<T> {
  pub fn new(in_channels: usize, out_channels: usize, kernel: usize, stride: usize, rng: &mut impl Rng) -> Self {
    let field = kernel * kernel;
    let dims = [kernel, kernel, out_channels, in_channels];
    Self {
      kernel: Tensor::glorot_uniform(&dims, field * out_channels, field * in_channels, rng).trained(),
      stride,
    }
  }

  pub fn forward(&self, x: &Variable<T>) -> Variable<T> {
    x.conv_transpose2d(&self.kernel, self.stride)
  }

  pub fn parameters(&self) -> Vec<Variable<T>> {
    vec![self.kernel.clone()]
  }
}


/// Batch normalization over the channel (last) axis.
///
/// Running statistics are not trainable. A training pass hands back the
/// batch statistics it used, so callers decide when to
/// [commit](Self::update_statistics) them.

#[derive(Debug, Clone)]
pub struct BatchNorm<T: Real> {
  pub gamma: Variable<T>,
  pub beta: Variable<T>,
  running: Moments<T>,
  momentum: T,
  epsilon: T,
}

impl<T: Real> BatchNorm<T> {
  pub fn new(channels: usize) -> Self {
    Self {
      gamma: Tensor::ones(&[channels]).trained(),
      beta: Tensor::zeros(&[channels]).trained(),
      running: Moments::identity(channels),
      momentum: T::lit(0.99),
      epsilon: T::lit(1e-3),
    }
  }

  pub fn forward(&self, x: &Variable<T>, mode: Mode) -> (Variable<T>, Option<Moments<T>>) {
    match mode {
      Mode::Train => {
        let moments = Moments::of(x);
        let y = x.normalize(&self.gamma, &self.beta, &moments, self.epsilon, true);
        (y, Some(moments))
      },
      Mode::Eval => (x.normalize(&self.gamma, &self.beta, &self.running, self.epsilon, false), None),
    }
  }

  pub fn update_statistics(&mut self, batch: &Moments<T>) {
    self.running = self.running.blend(batch, self.momentum);
  }

  pub fn statistics(&self) -> &Moments<T> {
    &self.running
  }

  pub fn set_statistics(&mut self, moments: Moments<T>) {
    self.running = moments;
  }

  pub fn channels(&self) -> usize {
    self.running.mean.len()
  }

  pub fn parameters(&self) -> Vec<Variable<T>> {
    vec![self.gamma.clone(), self.beta.clone()]
  }
}


/// Zero entries with probability `rate` while training, scaling the rest
/// to preserve the expected sum. Identity in evaluation mode.

pub fn dropout<T: Real>(x: &Variable<T>, rate: T, mode: Mode, rng: &mut impl Rng) -> Variable<T> {
  if mode == Mode::Eval || rate <= T::zero() { return x.clone() }
  let keep = T::one() - rate;
  let mask = Tensor::bernoulli(x.dims(), keep, rng) / keep;
  x * &mask.tracked()
}


#[cfg(test)]
mod tests {
  use super::*;
  use rand::{SeedableRng, rngs::StdRng};

  #[test]
  fn moments() {
    let x = Tensor::new(&[2, 2, 2], vec![1.0, 10.0, 3.0, 20.0, 5.0, 30.0, 7.0, 40.0]);
    let moments = Moments::of(&x);
    assert_eq!(moments.mean, vec![4.0, 25.0]);
    assert_eq!(moments.variance, vec![5.0, 125.0]);

    let blended = Moments::identity(2).blend(&moments, 0.5);
    assert_eq!(blended.mean, vec![2.0, 12.5]);
    assert_eq!(blended.variance, vec![3.0, 63.0]);
  }

  #[test]
  fn dense() {
    let mut rng = StdRng::seed_from_u64(1);
    let layer = Dense::<f32>::new(3, 5, true, &mut rng);
    let y = layer.forward(&Tensor::ones(&[4, 3]).tracked());
    assert_eq!(y.dims(), &[4, 5]);
    assert_eq!(layer.parameters().len(), 2);
    assert_eq!(y.parameters().len(), 2);
  }

  #[test]
  fn convolutions() {
    let mut rng = StdRng::seed_from_u64(2);
    let x = Tensor::<f32>::randn(&[2, 8, 8, 3], &mut rng).tracked();
    let down = Conv2d::new(3, 4, 5, 2, true, &mut rng);
    let up = ConvTranspose2d::new(4, 2, 5, 2, &mut rng);
    let y = down.forward(&x);
    assert_eq!(y.dims(), &[2, 4, 4, 4]);
    assert_eq!(up.forward(&y).dims(), &[2, 8, 8, 2]);
  }

  #[test]
  fn batch_norm_modes() {
    let mut norm = BatchNorm::<f64>::new(2);
    let x = Tensor::new(&[2, 2], vec![1.0, 10.0, 3.0, 30.0]).tracked();

    let (y, moments) = norm.forward(&x, Mode::Train);
    let moments = moments.unwrap();
    assert_eq!(moments.mean, vec![2.0, 20.0]);
    // Normalized with the batch's own statistics
    assert!(y.param_iter().all(|a| (a.abs() - 1.0).abs() < 1e-3 ));

    // Evaluation uses running statistics, which have not moved yet
    let (y, none) = norm.forward(&x, Mode::Eval);
    assert!(none.is_none());
    approx::assert_abs_diff_eq!(y.at(0).at(1).item(), 10.0 / 1.001f64.sqrt(), epsilon = 1e-9);

    norm.update_statistics(&moments);
    approx::assert_abs_diff_eq!(norm.statistics().mean[1], 0.2, epsilon = 1e-12);
  }

  #[test]
  fn dropout_modes() {
    let mut rng = StdRng::seed_from_u64(3);
    let x = Tensor::<f32>::ones(&[100, 10]).tracked();
    assert_eq!(dropout(&x, 0.3, Mode::Eval, &mut rng), x);

    let y = dropout(&x, 0.5, Mode::Train, &mut rng);
    let zeros = y.param_iter().filter(|&a| a == 0.0 ).count();
    assert!(zeros > 400 && zeros < 600);
    assert!(y.param_iter().all(|a| a == 0.0 || a == 2.0 ));
  }
}
