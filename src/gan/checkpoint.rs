use std::{
  fs::{ self, File },
  io::Write,
  path::{ Path, PathBuf },
};

use itertools::Itertools;
use serde::{ Serialize, Deserialize };
use tracing::{ debug, info, warn };

use crate::{
  config::GanConfig,
  error::{ GanError, Result },
  Tensor,
};
use super::{ Gan, Network, AdamOptimizer };


const FORMAT_VERSION: u32 = 1;
const EXTENSION: &str = "ckpt";

pub const GENERATOR_WEIGHTS: &str = "generator.weights";
pub const DISCRIMINATOR_WEIGHTS: &str = "discriminator.weights";


#[derive(Serialize, Deserialize)]
struct Bundle {
  version: u32,
  step: usize,
  config: GanConfig,
  generator: Vec<Tensor<f32>>,
  discriminator: Vec<Tensor<f32>>,
  generator_optimizer: AdamOptimizer,
  discriminator_optimizer: AdamOptimizer,
}

#[derive(Serialize, Deserialize)]
struct Weights {
  version: u32,
  tensors: Vec<Tensor<f32>>,
}


/// Reference to a complete checkpoint on disk.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointHandle {
  pub step: usize,
  pub path: PathBuf,
}


/// Numbered snapshots of the full training state in one directory.
///
/// Files are named `<prefix>-<step>.ckpt`. Each is written to a temporary
/// file first and renamed into place, so readers only ever see
/// complete checkpoints.

#[derive(Debug)]
pub struct CheckpointStore {
  dir: PathBuf,
  prefix: String,
  next_step: usize,
}

impl CheckpointStore {
  pub fn open(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Result<Self> {
    let dir = dir.into();
    fs::create_dir_all(&dir)?;
    let mut store = Self { dir, prefix: prefix.into(), next_step: 1 };
    store.next_step = store.latest()?.map(|handle| handle.step + 1 ).unwrap_or(1);
    Ok(store)
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  /// All complete checkpoints, oldest first.

  pub fn list(&self) -> Result<Vec<CheckpointHandle>> {
    let mut handles = vec![];
    for entry in fs::read_dir(&self.dir)? {
      let path = entry?.path();
      if let Some(step) = self.parse_step(&path) {
        handles.push(CheckpointHandle { step, path });
      }
    }
    Ok(handles.into_iter().sorted_by_key(|handle| handle.step ).collect())
  }

  pub fn latest(&self) -> Result<Option<CheckpointHandle>> {
    Ok(self.list()?.pop())
  }

  fn parse_step(&self, path: &Path) -> Option<usize> {
    if path.extension()? != EXTENSION { return None }
    path.file_stem()?
      .to_str()?
      .strip_prefix(self.prefix.as_str())?
      .strip_prefix('-')?
      .parse()
      .ok()
  }

  /// Snapshot weights, running statistics and optimizer state.

  pub fn save(&mut self, gan: &Gan) -> Result<CheckpointHandle> {
    let step = self.next_step;
    let bundle = Bundle {
      version: FORMAT_VERSION,
      step,
      config: gan.config().clone(),
      generator: gan.generator.state(),
      discriminator: gan.discriminator.state(),
      generator_optimizer: gan.generator_optimizer.clone(),
      discriminator_optimizer: gan.discriminator_optimizer.clone(),
    };
    let path = self.dir.join(format!("{}-{}.{}", self.prefix, step, EXTENSION));
    write_atomic(&path, &postcard::to_allocvec(&bundle)?)?;
    self.next_step += 1;
    debug!(step, path = %path.display(), "Wrote checkpoint");
    Ok(CheckpointHandle { step, path })
  }

  /// Restore the complete training state, so that training resumes
  /// exactly where the checkpoint was taken. The learning rate of the
  /// running configuration takes precedence over the saved one.

  pub fn restore(&self, handle: &CheckpointHandle, gan: &mut Gan) -> Result<()> {
    let bundle: Bundle = read_versioned(&handle.path, |bundle: &Bundle| bundle.version)?;
    gan.generator.check_state(&bundle.generator)?;
    gan.discriminator.check_state(&bundle.discriminator)?;
    gan.generator.load_state(&bundle.generator)?;
    gan.discriminator.load_state(&bundle.discriminator)?;
    let rate = gan.config.learning_rate;
    if bundle.config.learning_rate != rate {
      warn!(saved = bundle.config.learning_rate, configured = rate, "Resuming with a different learning rate");
    }
    gan.generator_optimizer = bundle.generator_optimizer;
    gan.discriminator_optimizer = bundle.discriminator_optimizer;
    gan.generator_optimizer.learning_rate = rate;
    gan.discriminator_optimizer.learning_rate = rate;
    info!(step = bundle.step, "Restored checkpoint");
    Ok(())
  }

  /// Restore weights and running statistics of the newest checkpoint,
  /// leaving optimizer state alone.

  pub fn load_latest(&self, gan: &mut Gan) -> Result<CheckpointHandle> {
    let handle = self.latest()?.ok_or_else(|| {
      GanError::ModelLoad(format!("no checkpoint in {}", self.dir.display()))
    })?;
    let bundle: Bundle = read_versioned(&handle.path, |bundle: &Bundle| bundle.version)?;
    gan.generator.check_state(&bundle.generator)?;
    gan.discriminator.check_state(&bundle.discriminator)?;
    gan.generator.load_state(&bundle.generator)?;
    gan.discriminator.load_state(&bundle.discriminator)?;
    info!(step = handle.step, "Loaded weights from checkpoint");
    Ok(handle)
  }

  /// Delete all but the newest `keep` checkpoints, returning what was removed.

  pub fn prune(&self, keep: usize) -> Result<Vec<CheckpointHandle>> {
    let handles = self.list()?;
    let excess = handles.len().saturating_sub(keep);
    let removed: Vec<_> = handles.into_iter().take(excess).collect();
    for handle in &removed {
      fs::remove_file(&handle.path)?;
    }
    Ok(removed)
  }
}


impl Gan {
  /// Write inference weights of both networks into `dir`.

  pub fn export_weights(&self, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    for (name, tensors) in [
      (GENERATOR_WEIGHTS, self.generator.state()),
      (DISCRIMINATOR_WEIGHTS, self.discriminator.state()),
    ] {
      let weights = Weights { version: FORMAT_VERSION, tensors };
      write_atomic(&dir.join(name), &postcard::to_allocvec(&weights)?)?;
    }
    Ok(())
  }

  /// Replace both networks' weights with those previously exported to `dir`.
  ///
  /// Either both networks are loaded or neither is.

  pub fn load_models(&mut self, dir: &Path) -> Result<()> {
    let version = |weights: &Weights| weights.version;
    let generator: Weights = read_versioned(&dir.join(GENERATOR_WEIGHTS), version)?;
    let discriminator: Weights = read_versioned(&dir.join(DISCRIMINATOR_WEIGHTS), version)?;
    self.generator.check_state(&generator.tensors)?;
    self.discriminator.check_state(&discriminator.tensors)?;
    self.generator.load_state(&generator.tensors)?;
    self.discriminator.load_state(&discriminator.tensors)?;
    info!(dir = %dir.display(), "Loaded model weights");
    Ok(())
  }
}


fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
  let mut tmp = path.as_os_str().to_owned();
  tmp.push(".tmp");
  let tmp = PathBuf::from(tmp);
  let mut file = File::create(&tmp)?;
  file.write_all(bytes)?;
  file.sync_all()?;
  fs::rename(&tmp, path)?;
  Ok(())
}

fn read_versioned<D, F>(path: &Path, version: F) -> Result<D>
where
  D: for<'de> Deserialize<'de>,
  F: Fn(&D) -> u32,
{
  let bytes = fs::read(path)
    .map_err(|e| GanError::ModelLoad(format!("{}: {}", path.display(), e)) )?;
  let decoded: D = postcard::from_bytes(&bytes)
    .map_err(|e| GanError::ModelLoad(format!("{}: {}", path.display(), e)) )?;
  let found = version(&decoded);
  if found != FORMAT_VERSION {
    return Err(GanError::ModelLoad(format!(
      "{}: format version {found}, expected {FORMAT_VERSION}", path.display())))
  }
  Ok(decoded)
}


#[cfg(test)]
mod tests {
  use super::*;
  use rand::{ SeedableRng, rngs::StdRng };

  fn trained(steps: u64) -> Gan {
    let mut gan = Gan::new(GanConfig::tiny()).unwrap();
    for seed in 0..steps {
      let images = Tensor::<f32>::rand(&[4, 8, 8, 1], &mut StdRng::seed_from_u64(seed));
      gan.train_step(&images).unwrap();
    }
    gan
  }

  fn fresh() -> Gan {
    Gan::new(GanConfig { seed: Some(1234), ..GanConfig::tiny() }).unwrap()
  }

  #[test]
  fn restore_is_exact() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = CheckpointStore::open(dir.path(), "train").unwrap();
    let mut gan = trained(2);
    let handle = store.save(&gan).unwrap();
    assert_eq!(handle.step, 1);
    assert_eq!(handle.path, dir.path().join("train-1.ckpt"));

    let mut other = fresh();
    store.restore(&handle, &mut other).unwrap();
    let latent = Tensor::vec(&[0.5, -1.0, 0.0, 2.0, 0.1, 0.2, -0.3, 0.4]);
    assert_eq!(other.generator.generate(&latent).unwrap(), gan.generator.generate(&latent).unwrap());
    assert_eq!(other.generator_optimizer, gan.generator_optimizer);
    assert_eq!(other.steps(), 2);

    // Training continues identically from the restored state
    other.rng = gan.rng.clone();
    let images = Tensor::<f32>::rand(&[4, 8, 8, 1], &mut StdRng::seed_from_u64(9));
    assert_eq!(other.train_step(&images).unwrap(), gan.train_step(&images).unwrap());
    assert_eq!(other.generator.state(), gan.generator.state());
    assert_eq!(other.discriminator.state(), gan.discriminator.state());
  }

  #[test]
  fn restore_keeps_configured_rate() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = CheckpointStore::open(dir.path(), "train").unwrap();
    let gan = trained(1);
    let handle = store.save(&gan).unwrap();

    let mut other = Gan::new(GanConfig { learning_rate: 5e-2, ..GanConfig::tiny() }).unwrap();
    store.restore(&handle, &mut other).unwrap();
    assert_eq!(other.generator_optimizer.learning_rate, 5e-2);
    assert_eq!(other.discriminator_optimizer.learning_rate, 5e-2);
    // Everything else comes from the checkpoint
    assert_eq!(other.steps(), 1);
    assert_eq!(other.generator.state(), gan.generator.state());
  }

  #[test]
  fn latest_weights_only() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = CheckpointStore::open(dir.path(), "train").unwrap();
    store.save(&trained(1)).unwrap();
    let gan = trained(3);
    store.save(&gan).unwrap();

    // Numbering continues after reopening
    let mut store = CheckpointStore::open(dir.path(), "train").unwrap();
    let mut other = fresh();
    let handle = store.load_latest(&mut other).unwrap();
    assert_eq!(handle.step, 2);
    assert_eq!(other.generator.state(), gan.generator.state());
    assert_eq!(other.discriminator.state(), gan.discriminator.state());
    assert_eq!(other.steps(), 0);
    assert_eq!(store.save(&other).unwrap().step, 3);
  }

  #[test]
  fn ignores_foreign_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = CheckpointStore::open(dir.path(), "train").unwrap();
    store.save(&fresh()).unwrap();
    for name in ["train-9.ckpt.tmp", "other-4.ckpt", "train-x.ckpt", "notes.txt"] {
      fs::write(dir.path().join(name), b"junk").unwrap();
    }
    let steps: Vec<_> = store.list().unwrap().into_iter().map(|handle| handle.step ).collect();
    assert_eq!(steps, vec![1]);
  }

  #[test]
  fn load_failures() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = CheckpointStore::open(dir.path(), "train").unwrap();
    let mut gan = fresh();
    assert!(matches!(store.load_latest(&mut gan), Err(GanError::ModelLoad(_))));

    // Architecture mismatch leaves the target untouched
    store.save(&trained(1)).unwrap();
    let mut wide = Gan::new(GanConfig { base_channels: 16, ..GanConfig::tiny() }).unwrap();
    let before = wide.generator.state();
    assert!(matches!(store.load_latest(&mut wide), Err(GanError::ModelLoad(_))));
    assert_eq!(wide.generator.state(), before);

    // Corrupt data
    fs::write(dir.path().join("train-2.ckpt"), b"\x01\x02garbage").unwrap();
    let handle = store.latest().unwrap().unwrap();
    assert_eq!(handle.step, 2);
    assert!(matches!(store.restore(&handle, &mut gan), Err(GanError::ModelLoad(_))));
  }

  #[test]
  fn prune_keeps_newest() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = CheckpointStore::open(dir.path(), "train").unwrap();
    let gan = fresh();
    for _ in 0..4 {
      store.save(&gan).unwrap();
    }
    let removed = store.prune(1).unwrap();
    assert_eq!(removed.len(), 3);
    let remaining = store.list().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].step, 4);
    assert!(store.prune(5).unwrap().is_empty());
  }

  #[test]
  fn exported_weights() {
    let dir = tempfile::tempdir().unwrap();
    let gan = trained(1);
    gan.export_weights(dir.path()).unwrap();
    assert!(dir.path().join(GENERATOR_WEIGHTS).exists());
    assert!(!dir.path().join("generator.weights.tmp").exists());

    let mut other = fresh();
    other.load_models(dir.path()).unwrap();
    let latent = Tensor::zeros(&[8]);
    assert_eq!(other.generator.generate(&latent).unwrap(), gan.generator.generate(&latent).unwrap());

    // Both files must be present and valid before anything is replaced
    fs::remove_file(dir.path().join(DISCRIMINATOR_WEIGHTS)).unwrap();
    let mut third = fresh();
    let before = third.generator.state();
    assert!(matches!(third.load_models(dir.path()), Err(GanError::ModelLoad(_))));
    assert_eq!(third.generator.state(), before);
  }
}
