use std::path::{ Path, PathBuf };

use serde::{ Serialize, Deserialize };

use crate::error::{ GanError, Result };


/// Network widths and optimization settings.
///
/// The layer topology is fixed; these knobs only scale it.
/// Generated images are `image_side() x image_side() x 1`.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GanConfig {
  /// Length of the latent vector.
  pub latent_dim: usize,
  /// Side of the feature volume the generator's projection produces.
  pub base_side: usize,
  /// Channels of that volume, halved by each upsampling stage.
  pub base_channels: usize,
  pub kernel: usize,
  pub leaky_slope: f32,
  pub dropout: f32,
  pub batch_size: usize,
  pub learning_rate: f32,
  /// Save a checkpoint every this many epochs.
  pub checkpoint_every: usize,
  /// Seed for weight initialization, noise and dropout. Drawn from entropy if missing.
  pub seed: Option<u64>,
}

impl Default for GanConfig {
  fn default() -> Self {
    Self {
      latent_dim: 100,
      base_side: 7,
      base_channels: 256,
      kernel: 5,
      leaky_slope: 0.3,
      dropout: 0.3,
      batch_size: 256,
      learning_rate: 1e-4,
      checkpoint_every: 10,
      seed: None,
    }
  }
}

impl GanConfig {
  pub fn image_side(&self) -> usize {
    self.base_side * 4
  }

  pub fn image_dims(&self) -> [usize; 3] {
    [self.image_side(), self.image_side(), 1]
  }

  pub fn from_file(path: &Path) -> Result<Self> {
    let config: Self = load_toml(path)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    let sizes = [
      ("latent_dim", self.latent_dim),
      ("base_side", self.base_side),
      ("batch_size", self.batch_size),
      ("checkpoint_every", self.checkpoint_every),
    ];
    if let Some((name, _)) = sizes.iter().find(|(_, size)| *size == 0 ) {
      return Err(GanError::Config(format!("{name} must be greater than 0")))
    }
    if self.base_channels < 4 || self.base_channels % 4 != 0 {
      return Err(GanError::Config(format!(
        "base_channels must be a positive multiple of 4, got {}", self.base_channels)))
    }
    // Both networks downsample and upsample with stride 2
    if self.kernel < 2 {
      return Err(GanError::Config(format!("kernel must be at least the stride of 2, got {}", self.kernel)))
    }
    if !(0.0..1.0).contains(&self.dropout) {
      return Err(GanError::Config(format!("dropout must lie in [0, 1), got {}", self.dropout)))
    }
    if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
      return Err(GanError::Config(format!("learning_rate must be positive, got {}", self.learning_rate)))
    }
    if !self.leaky_slope.is_finite() {
      return Err(GanError::Config("leaky_slope must be finite".into()))
    }
    Ok(())
  }

  /// Small networks on 8x8 images for fast tests.

  #[cfg(test)]
  pub(crate) fn tiny() -> Self {
    Self {
      latent_dim: 8,
      base_side: 2,
      base_channels: 8,
      kernel: 3,
      batch_size: 4,
      learning_rate: 1e-3,
      checkpoint_every: 2,
      seed: Some(7),
      ..Self::default()
    }
  }
}


/// Locations used by the service and the command line.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
  /// SQLite database holding generated records.
  pub database: PathBuf,
  /// Directory generated gifs are written to.
  pub images: PathBuf,
  /// Directory holding `generator.weights` and `discriminator.weights`.
  pub weights: PathBuf,
  pub checkpoints: PathBuf,
  pub checkpoint_prefix: String,
  pub gan: GanConfig,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self {
      database: "data/gifs.db".into(),
      images: "frontend/img".into(),
      weights: "models".into(),
      checkpoints: "checkpoints".into(),
      checkpoint_prefix: "train".into(),
      gan: GanConfig::default(),
    }
  }
}

impl ServiceConfig {
  pub fn from_file(path: &Path) -> Result<Self> {
    let config: Self = load_toml(path)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    if self.checkpoint_prefix.is_empty() || self.checkpoint_prefix.contains(['/', '\\']) {
      return Err(GanError::Config(format!(
        "checkpoint_prefix must be a plain file name, got {:?}", self.checkpoint_prefix)))
    }
    self.gan.validate()
  }
}

fn load_toml<C: serde::de::DeserializeOwned>(path: &Path) -> Result<C> {
  let content = std::fs::read_to_string(path).map_err(|e| {
    GanError::Config(format!("Failed to read config file {}: {}", path.display(), e))
  })?;
  toml::from_str(&content)
    .map_err(|e| GanError::Config(format!("Failed to parse config file: {}", e)))
}
