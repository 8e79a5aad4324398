use std::{
  fs,
  path::{ Path, PathBuf },
};

use parking_lot::Mutex;
use tracing::info;

use crate::{
  codec,
  config::ServiceConfig,
  data::generate_random_parameters,
  error::{ GanError, Result },
  gan::Gan,
  store::GifStore,
};


/// Generates images on request and keeps a record of each.
///
/// Callers may share one service across threads. Access to the networks
/// and their random state is serialized, so generation stays race-free.

#[derive(Debug)]
pub struct GifService {
  gan: Mutex<Gan>,
  store: GifStore,
  images: PathBuf,
}

impl GifService {
  pub fn new(gan: Gan, store: GifStore, images: impl Into<PathBuf>) -> Result<Self> {
    let images = images.into();
    fs::create_dir_all(&images)?;
    Ok(Self { gan: Mutex::new(gan), store, images })
  }

  /// Build networks from `config`, load exported weights and open the database.

  pub fn open(config: &ServiceConfig) -> Result<Self> {
    let mut gan = Gan::new(config.gan.clone())?;
    gan.load_models(&config.weights)?;
    let store = GifStore::open(&config.database)?;
    Self::new(gan, store, &config.images)
  }

  pub fn images(&self) -> &Path {
    &self.images
  }

  /// Generate an image from `parameters`, write it as `<id>.gif` and record it.
  ///
  /// Unusable parameters are reported as [GanError::InvalidParameters].

  pub fn generate_gif(&self, parameters: &[f32]) -> Result<i64> {
    let image = self.gan.lock().generate_image(parameters).map_err(|err| match err {
      GanError::Shape { .. } | GanError::Numerical(_) => GanError::InvalidParameters(err.to_string()),
      err => err,
    })?;
    let id = self.store.save_gif_with(parameters, |id| {
      let path = self.images.join(format!("{id}.gif"));
      codec::encode_gif(&image, &path)?;
      Ok(path.to_string_lossy().into_owned())
    })?;
    info!(id, parameters = parameters.len(), "Generated gif");
    Ok(id)
  }

  /// Path of a previously generated image.

  pub fn get_gif(&self, id: i64) -> Result<Option<String>> {
    self.store.get_gif(id)
  }

  /// A full set of uniformly random parameters.

  pub fn random_parameters(&self) -> Vec<f32> {
    let mut gan = self.gan.lock();
    let len = gan.config().latent_dim;
    generate_random_parameters(len, &mut gan.rng)
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use crate::config::GanConfig;

  fn service(dir: &Path) -> GifService {
    let gan = Gan::new(GanConfig::tiny()).unwrap();
    GifService::new(gan, GifStore::in_memory().unwrap(), dir.join("img")).unwrap()
  }

  #[test]
  fn generate_and_get() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    let id = service.generate_gif(&[0.5, -0.5]).unwrap();
    let path = service.get_gif(id).unwrap().unwrap();
    assert!(path.ends_with(&format!("{id}.gif")));
    let image = codec::load_image(Path::new(&path)).unwrap();
    assert_eq!(image.dims(), &[8, 8, 1]);
    assert_eq!(service.get_gif(id + 1).unwrap(), None);
  }

  #[test]
  fn invalid_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    assert!(matches!(service.generate_gif(&[0.0; 9]), Err(GanError::InvalidParameters(_))));
    assert!(matches!(service.generate_gif(&[f32::INFINITY]), Err(GanError::InvalidParameters(_))));
    assert_eq!(service.store.count().unwrap(), 0);
  }

  #[test]
  fn random_parameters_fit() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    let parameters = service.random_parameters();
    assert_eq!(parameters.len(), 8);
    assert!(service.generate_gif(&parameters).is_ok());
  }

  #[test]
  fn concurrent_requests() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(service(dir.path()));
    let handles: Vec<_> = (0..4).map(|i| {
      let service = service.clone();
      std::thread::spawn(move || {
        (0..3).map(|_| service.generate_gif(&[i as f32 * 0.1]).unwrap() ).collect::<Vec<_>>()
      })
    }).collect();
    let mut ids: Vec<i64> = handles.into_iter().flat_map(|handle| handle.join().unwrap() ).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 12);
    assert_eq!(service.store.count().unwrap(), 12);
    for id in ids {
      assert!(dir.path().join("img").join(format!("{id}.gif")).exists());
    }
  }

  #[test]
  fn open_requires_weights() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServiceConfig {
      database: dir.path().join("gifs.db"),
      images: dir.path().join("img"),
      weights: dir.path().join("models"),
      gan: GanConfig::tiny(),
      ..ServiceConfig::default()
    };
    assert!(matches!(GifService::open(&config), Err(GanError::ModelLoad(_))));

    Gan::new(GanConfig::tiny()).unwrap().export_weights(&config.weights).unwrap();
    let service = GifService::open(&config).unwrap();
    assert!(service.generate_gif(&[]).is_ok());
  }
}
