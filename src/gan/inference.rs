use rand::Rng;

use crate::{
  error::{ GanError, Result },
  Tensor,
};
use super::Gan;


/// A standard normal latent vector of length `len` whose leading
/// entries are replaced by `parameters`.

fn latent_vector(parameters: &[f32], len: usize, rng: &mut impl Rng) -> Result<Tensor<f32>> {
  if parameters.len() > len {
    return Err(GanError::shape(
      format!("at most {len} parameters"),
      format!("{} parameters", parameters.len()),
    ))
  }
  if let Some(i) = parameters.iter().position(|p| !p.is_finite() ) {
    return Err(GanError::Numerical(format!("parameter {i} is not finite")))
  }
  let mut values = Tensor::randn(&[len], rng).into_raw();
  values[..parameters.len()].copy_from_slice(parameters);
  Ok(Tensor::new(&[len], values))
}

impl Gan {
  /// Generate a `[side, side, 1]` image in `[-1, 1]` from up to
  /// `latent_dim` caller-chosen parameters.
  ///
  /// Remaining latent entries are drawn from a standard normal
  /// distribution, so results vary between calls unless all
  /// `latent_dim` values are given.

  pub fn generate_image(&mut self, parameters: &[f32]) -> Result<Tensor<f32>> {
    let latent = latent_vector(parameters, self.config.latent_dim, &mut self.rng)?;
    self.generator.generate(&latent)
  }

  /// Like [generate_image](Self::generate_image), drawing the
  /// random latent entries from `rng`.

  pub fn generate_image_with(&self, parameters: &[f32], rng: &mut impl Rng) -> Result<Tensor<f32>> {
    let latent = latent_vector(parameters, self.config.latent_dim, rng)?;
    self.generator.generate(&latent)
  }

  /// Discriminator logit for a single `[side, side, 1]` image.

  pub fn score(&self, image: &Tensor<f32>) -> Result<f32> {
    self.discriminator.score(image)
  }
}
