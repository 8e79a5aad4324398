use rand::Rng;

use crate::{
  ops::*,
  config::GanConfig,
  error::{ GanError, Result },
  variable::{ Mode, Moments, Dense, ConvTranspose2d, BatchNorm },
  Tensor, Variable,
};
use super::Network;


/// Result of a generator forward pass.

#[derive(Debug, Clone)]
pub struct Pass {
  /// Images of shape `[batch, side, side, 1]` in `[-1, 1]`.
  pub output: Variable<f32>,
  /// Batch statistics of every normalization layer, present in training mode only.
  pub moments: Vec<Moments<f32>>,
}


/// Maps latent vectors to single-channel images.
///
/// A bias-free projection produces a `base_side x base_side` volume, which
/// three transposed convolutions widen to four times its side while
/// narrowing the channels down to one. Every hidden stage is batch
/// normalized and leaky-rectified; the output is squashed by `tanh`.

#[derive(Debug, Clone)]
pub struct Generator {
  latent_dim: usize,
  base_side: usize,
  base_channels: usize,
  slope: f32,
  project: Dense<f32>,
  project_norm: BatchNorm<f32>,
  widen: ConvTranspose2d<f32>,
  widen_norm: BatchNorm<f32>,
  upsample: ConvTranspose2d<f32>,
  upsample_norm: BatchNorm<f32>,
  output: ConvTranspose2d<f32>,
}

impl Generator {
  pub fn new(config: &GanConfig, rng: &mut impl Rng) -> Self {
    let c = config.base_channels;
    let k = config.kernel;
    let volume = config.base_side * config.base_side * c;
    Self {
      latent_dim: config.latent_dim,
      base_side: config.base_side,
      base_channels: c,
      slope: config.leaky_slope,
      project: Dense::new(config.latent_dim, volume, false, rng),
      project_norm: BatchNorm::new(volume),
      widen: ConvTranspose2d::new(c, c / 2, k, 1, rng),
      widen_norm: BatchNorm::new(c / 2),
      upsample: ConvTranspose2d::new(c / 2, c / 4, k, 2, rng),
      upsample_norm: BatchNorm::new(c / 4),
      output: ConvTranspose2d::new(c / 4, 1, k, 2, rng),
    }
  }

  pub fn latent_dim(&self) -> usize {
    self.latent_dim
  }

  pub fn image_side(&self) -> usize {
    self.base_side * 4
  }

  /// Run a batch of latent vectors `[batch, latent_dim]` through the network.

  pub fn forward(&self, latent: &Variable<f32>, mode: Mode) -> Result<Pass> {
    let dims = latent.dims();
    if dims.len() != 2 || dims[0] == 0 || dims[1] != self.latent_dim {
      return Err(GanError::shape(format!("[batch, {}]", self.latent_dim), latent.shape()))
    }
    let batch = dims[0];
    let side = self.base_side;

    let (x, m0) = self.project_norm.forward(&self.project.forward(latent), mode);
    let x = x.leaky_relu(self.slope).reshape(&[batch, side, side, self.base_channels]);

    let (x, m1) = self.widen_norm.forward(&self.widen.forward(&x), mode);
    let x = x.leaky_relu(self.slope);

    let (x, m2) = self.upsample_norm.forward(&self.upsample.forward(&x), mode);
    let x = x.leaky_relu(self.slope);

    let output = self.output.forward(&x).tanh();
    let moments = [m0, m1, m2].into_iter().flatten().collect();
    Ok(Pass { output, moments })
  }

  /// Produce one `[side, side, 1]` image from a latent vector of exactly `latent_dim` values.

  pub fn generate(&self, latent: &Tensor<f32>) -> Result<Tensor<f32>> {
    if latent.dims() != [self.latent_dim] {
      return Err(GanError::shape(format!("[{}]", self.latent_dim), latent.shape()))
    }
    let pass = self.forward(&latent.reshape(&[1, self.latent_dim]).tracked(), Mode::Eval)?;
    Ok(pass.output.at(0).detach())
  }

  /// Fold the batch statistics of a training pass into the running statistics.

  pub fn commit(&mut self, moments: &[Moments<f32>]) {
    for (norm, batch) in self.norms_mut().into_iter().zip(moments) {
      norm.update_statistics(batch);
    }
  }
}

impl Network for Generator {
  fn parameters(&self) -> Vec<Variable<f32>> {
    [
      self.project.parameters(),
      self.project_norm.parameters(),
      self.widen.parameters(),
      self.widen_norm.parameters(),
      self.upsample.parameters(),
      self.upsample_norm.parameters(),
      self.output.parameters(),
    ].concat()
  }

  fn norms(&self) -> Vec<&BatchNorm<f32>> {
    vec![&self.project_norm, &self.widen_norm, &self.upsample_norm]
  }

  fn norms_mut(&mut self) -> Vec<&mut BatchNorm<f32>> {
    vec![&mut self.project_norm, &mut self.widen_norm, &mut self.upsample_norm]
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;
  use rand::{ SeedableRng, rngs::StdRng };

  fn tiny() -> Generator {
    Generator::new(&GanConfig::tiny(), &mut StdRng::seed_from_u64(11))
  }

  #[test]
  fn topology() {
    let generator = tiny();
    let dims: Vec<Vec<usize>> = generator.parameters().iter().map(|p| p.dims().to_vec() ).collect();
    assert_eq!(dims, vec![
      vec![8, 32], vec![32], vec![32],
      vec![3, 3, 4, 8], vec![4], vec![4],
      vec![3, 3, 2, 4], vec![2], vec![2],
      vec![3, 3, 1, 2],
    ]);
  }

  #[test]
  fn batch_forward() {
    let generator = tiny();
    let mut rng = StdRng::seed_from_u64(1);
    let latent = Tensor::randn(&[5, 8], &mut rng).tracked();
    let pass = generator.forward(&latent, Mode::Train).unwrap();
    assert_eq!(pass.output.dims(), &[5, 8, 8, 1]);
    assert_eq!(pass.moments.len(), 3);
    assert_eq!(pass.moments[2].mean.len(), 2);
    // Every weight takes part in the graph
    assert_eq!(pass.output.parameters().len(), generator.parameters().len());

    let pass = generator.forward(&latent, Mode::Eval).unwrap();
    assert!(pass.moments.is_empty());
  }

  #[test]
  fn rejects_bad_latent() {
    let generator = tiny();
    for dims in [vec![7], vec![9], vec![1, 8]] {
      let latent = Tensor::zeros(&dims);
      assert!(matches!(generator.generate(&latent), Err(GanError::Shape { .. })));
    }
    let latent = Tensor::zeros(&[0, 8]).tracked();
    assert!(matches!(generator.forward(&latent, Mode::Eval), Err(GanError::Shape { .. })));
  }

  #[test]
  fn commit_moves_running_statistics() {
    let mut generator = tiny();
    let latent = Tensor::randn(&[4, 8], &mut StdRng::seed_from_u64(2)).tracked();
    let before = generator.generate(&Tensor::zeros(&[8])).unwrap();
    let pass = generator.forward(&latent, Mode::Train).unwrap();
    generator.commit(&pass.moments);
    assert_ne!(generator.norms()[1].statistics(), &Moments::identity(4));
    assert_ne!(generator.generate(&Tensor::zeros(&[8])).unwrap(), before);
  }

  #[test]
  fn reference_generator_is_deterministic() {
    let config = GanConfig::default();
    let a = Generator::new(&config, &mut StdRng::seed_from_u64(5));
    let b = Generator::new(&config, &mut StdRng::seed_from_u64(5));
    let image = a.generate(&Tensor::zeros(&[100])).unwrap();
    assert_eq!(image.dims(), &[28, 28, 1]);
    assert_eq!(image, b.generate(&Tensor::zeros(&[100])).unwrap());
    assert_eq!(image, a.generate(&Tensor::zeros(&[100])).unwrap());
  }

  proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn output_is_bounded(latent in prop::collection::vec(-10.0f32..10.0, 8)) {
      let image = tiny().generate(&Tensor::vec(&latent)).unwrap();
      prop_assert_eq!(image.dims(), &[8, 8, 1]);
      prop_assert!(image.param_iter().all(|a| (-1.0..=1.0).contains(&a) ));
    }
  }
}
