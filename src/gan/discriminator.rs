use rand::{ Rng, SeedableRng, rngs::StdRng };

use crate::{
  ops::*,
  config::GanConfig,
  error::{ GanError, Result },
  variable::{ Mode, Dense, Conv2d, BatchNorm, dropout },
  Tensor, Variable,
};
use super::Network;


/// Scores single-channel images with an unbounded logit, higher meaning "real".
///
/// Two strided convolutions, each followed by a leaky rectifier and dropout,
/// feed a single dense output unit.

#[derive(Debug, Clone)]
pub struct Discriminator {
  image_side: usize,
  slope: f32,
  rate: f32,
  first: Conv2d<f32>,
  second: Conv2d<f32>,
  score: Dense<f32>,
}

impl Discriminator {
  pub fn new(config: &GanConfig, rng: &mut impl Rng) -> Self {
    let c = config.base_channels;
    let k = config.kernel;
    // Two stride-2 "same" convolutions bring the image side back to the base side
    let features = config.base_side * config.base_side * (c / 2);
    Self {
      image_side: config.image_side(),
      slope: config.leaky_slope,
      rate: config.dropout,
      first: Conv2d::new(1, c / 4, k, 2, true, rng),
      second: Conv2d::new(c / 4, c / 2, k, 2, true, rng),
      score: Dense::new(features, 1, true, rng),
    }
  }

  /// Logits `[batch, 1]` for images `[batch, side, side, 1]`.
  ///
  /// `rng` drives dropout and is left untouched in evaluation mode.

  pub fn forward(&self, images: &Variable<f32>, mode: Mode, rng: &mut impl Rng) -> Result<Variable<f32>> {
    let side = self.image_side;
    let dims = images.dims();
    if dims.len() != 4 || dims[0] == 0 || dims[1..] != [side, side, 1] {
      return Err(GanError::shape(format!("[batch, {side}, {side}, 1]"), images.shape()))
    }
    let x = self.first.forward(images).leaky_relu(self.slope);
    let x = dropout(&x, self.rate, mode, rng);
    let x = self.second.forward(&x).leaky_relu(self.slope);
    let x = dropout(&x, self.rate, mode, rng);
    Ok(self.score.forward(&x.flatten()))
  }

  /// Logit for a single `[side, side, 1]` image, without dropout.

  pub fn score(&self, image: &Tensor<f32>) -> Result<f32> {
    let side = self.image_side;
    if image.dims() != [side, side, 1] {
      return Err(GanError::shape(format!("[{side}, {side}, 1]"), image.shape()))
    }
    let batch = image.reshape(&[1, side, side, 1]).tracked();
    // Dropout is inactive in evaluation mode
    let logit = self.forward(&batch, Mode::Eval, &mut StdRng::seed_from_u64(0))?;
    Ok(logit.item())
  }
}

impl Network for Discriminator {
  fn parameters(&self) -> Vec<Variable<f32>> {
    [self.first.parameters(), self.second.parameters(), self.score.parameters()].concat()
  }

  fn norms(&self) -> Vec<&BatchNorm<f32>> {
    vec![]
  }

  fn norms_mut(&mut self) -> Vec<&mut BatchNorm<f32>> {
    vec![]
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  fn tiny() -> Discriminator {
    Discriminator::new(&GanConfig::tiny(), &mut StdRng::seed_from_u64(3))
  }

  #[test]
  fn topology() {
    let dims: Vec<Vec<usize>> = tiny().parameters().iter().map(|p| p.dims().to_vec() ).collect();
    assert_eq!(dims, vec![
      vec![3, 3, 1, 2], vec![2],
      vec![3, 3, 2, 4], vec![4],
      vec![16, 1], vec![1],
    ]);
  }

  #[test]
  fn logits_per_image() {
    let discriminator = tiny();
    let mut rng = StdRng::seed_from_u64(4);
    let images = Tensor::rand(&[6, 8, 8, 1], &mut rng).tracked();
    let logits = discriminator.forward(&images, Mode::Train, &mut rng).unwrap();
    assert_eq!(logits.dims(), &[6, 1]);
    assert_eq!(logits.parameters().len(), 6);

    // Evaluation is deterministic and agrees with single-image scoring
    let a = discriminator.forward(&images, Mode::Eval, &mut rng).unwrap();
    let b = discriminator.forward(&images, Mode::Eval, &mut rng).unwrap();
    assert_eq!(a, b);
    let single = discriminator.score(&images.at(2)).unwrap();
    approx::assert_abs_diff_eq!(single, a.at(2).item(), epsilon = 1e-5);
  }

  #[test]
  fn evaluation_ignores_rng() {
    let discriminator = tiny();
    let images = Tensor::rand(&[2, 8, 8, 1], &mut StdRng::seed_from_u64(5)).tracked();
    let a = discriminator.forward(&images, Mode::Eval, &mut StdRng::seed_from_u64(1)).unwrap();
    let b = discriminator.forward(&images, Mode::Eval, &mut StdRng::seed_from_u64(2)).unwrap();
    assert_eq!(a, b);
    approx::assert_abs_diff_eq!(discriminator.score(&images.at(0)).unwrap(), a.at(0).item(), epsilon = 1e-5);
  }

  #[test]
  fn rejects_bad_images() {
    let discriminator = tiny();
    assert!(matches!(discriminator.score(&Tensor::zeros(&[8, 8, 3])), Err(GanError::Shape { .. })));
    assert!(matches!(discriminator.score(&Tensor::zeros(&[1, 8, 8, 1])), Err(GanError::Shape { .. })));
    let images = Tensor::zeros(&[2, 7, 8, 1]).tracked();
    let result = discriminator.forward(&images, Mode::Eval, &mut StdRng::seed_from_u64(0));
    assert!(matches!(result, Err(GanError::Shape { .. })));
  }

  proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn finite_scores(pixels in prop::collection::vec(-1.0f32..=1.0, 64)) {
      let score = tiny().score(&Tensor::new(&[8, 8, 1], pixels)).unwrap();
      prop_assert!(score.is_finite());
    }
  }
}
