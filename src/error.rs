use thiserror::Error;


/// Everything that can go wrong while training, loading or sampling the networks.

#[derive(Debug, Error)]
pub enum GanError {
  #[error("Shape mismatch: expected {expected}, got {actual}")]
  Shape { expected: String, actual: String },

  #[error("Could not load model: {0}")]
  ModelLoad(String),

  #[error("Numerical error: {0}")]
  Numerical(String),

  #[error("Training failed in epoch {epoch}, batch {batch}: {source}")]
  Training {
    epoch: usize,
    batch: usize,
    #[source]
    source: Box<GanError>,
  },

  #[error("Invalid parameters: {0}")]
  InvalidParameters(String),

  #[error("Invalid configuration: {0}")]
  Config(String),

  #[error("Invalid training data: {0}")]
  Data(String),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("Serialization error: {0}")]
  Serialize(#[from] postcard::Error),

  #[error("Storage error: {0}")]
  Store(#[from] rusqlite::Error),

  #[error("Image error: {0}")]
  Image(#[from] image::ImageError),
}

impl GanError {
  pub(crate) fn shape(expected: impl std::fmt::Display, actual: impl std::fmt::Display) -> Self {
    Self::Shape { expected: expected.to_string(), actual: actual.to_string() }
  }

  /// Whether the caller handed in unusable input, as opposed to a failure of the system.

  pub fn is_invalid_input(&self) -> bool {
    matches!(self, Self::Shape { .. } | Self::InvalidParameters(_))
  }
}

pub type Result<T> = std::result::Result<T, GanError>;


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display() {
    let err = GanError::shape("[28, 28, 1]", "[27, 28, 1]");
    assert_eq!(err.to_string(), "Shape mismatch: expected [28, 28, 1], got [27, 28, 1]");
    assert!(err.is_invalid_input());

    let err = GanError::Training { epoch: 3, batch: 7, source: Box::new(GanError::Numerical("loss is NaN".into())) };
    assert!(err.to_string().contains("epoch 3, batch 7"));
    assert!(err.to_string().contains("loss is NaN"));
    assert!(!err.is_invalid_input());
  }

  #[test]
  fn source_chain() {
    use std::error::Error;
    let err = GanError::Training { epoch: 1, batch: 0, source: Box::new(GanError::ModelLoad("gone".into())) };
    assert!(err.source().unwrap().to_string().contains("gone"));
  }
}
