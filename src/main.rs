//! Command line front end.
//!
//! ```bash
//! gifgan train --index data/gif_data.csv --images data/gif_images --epochs 50
//! gifgan generate 0.1 -0.4 0.9
//! gifgan get 12
//! gifgan sample
//! ```

use std::path::PathBuf;

use anyhow::{ bail, Context };
use clap::{ Parser, Subcommand };
use itertools::Itertools;
use rand::{ SeedableRng, rngs::StdRng };
use tracing::info;
use tracing_subscriber::EnvFilter;

use gifgan::{
  config::ServiceConfig,
  data::{ generate_random_parameters, GifDataset },
  gan::{ CheckpointStore, Gan },
  service::GifService,
};


#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "gifgan", version, about = "Train a GAN and generate gifs from parameter vectors")]
struct Cli {
  /// TOML configuration file. Built-in defaults are used if missing.
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Command {
  /// Train both networks and export their weights
  Train {
    /// CSV index with a gif_id column followed by parameter columns
    #[arg(long, default_value = "data/gif_data.csv")]
    index: PathBuf,

    /// Directory holding <gif_id>.gif
    #[arg(long, default_value = "data/gif_images")]
    images: PathBuf,

    #[arg(long, default_value_t = 50)]
    epochs: usize,

    /// Continue from the newest checkpoint
    #[arg(long)]
    resume: bool,

    /// Number of checkpoints to keep
    #[arg(long)]
    keep: Option<usize>,
  },

  /// Generate a gif from up to latent_dim parameters
  Generate {
    #[arg(allow_negative_numbers = true)]
    parameters: Vec<f32>,

    /// Fill all parameters randomly instead
    #[arg(long, conflicts_with = "parameters")]
    random: bool,
  },

  /// Print the image path of a generated gif
  Get {
    id: i64,
  },

  /// Print a random parameter vector
  Sample,
}


fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let cli = Cli::parse();
  let config = match &cli.config {
    Some(path) => ServiceConfig::from_file(path)?,
    None => ServiceConfig::default(),
  };
  run(cli.command, &config)
}

fn run(command: Command, config: &ServiceConfig) -> anyhow::Result<()> {
  match command {
    Command::Train { index, images, epochs, resume, keep } => {
      let mut gan = Gan::new(config.gan.clone())?;
      let mut checkpoints = CheckpointStore::open(&config.checkpoints, config.checkpoint_prefix.as_str())?;
      if resume {
        let handle = checkpoints.latest()?.context("No checkpoint to resume from")?;
        checkpoints.restore(&handle, &mut gan)?;
      }
      let rng = match config.gan.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
      };
      let mut dataset = GifDataset::open(&index, images, config.gan.batch_size)
        .with_context(|| format!("Failed to open dataset {}", index.display()))?
        .shuffled(rng);
      if dataset.len() < config.gan.batch_size {
        bail!("{} images do not fill a single batch of {}", dataset.len(), config.gan.batch_size);
      }
      info!(images = dataset.len(), epochs, "Training");
      gan.train(&mut dataset, epochs, &mut checkpoints)?;
      if let Some(keep) = keep {
        checkpoints.prune(keep)?;
      }
      gan.export_weights(&config.weights)?;
      info!(dir = %config.weights.display(), "Exported weights");
    },

    Command::Generate { parameters, random } => {
      let service = GifService::open(config)?;
      let parameters = if random { service.random_parameters() } else { parameters };
      let id = service.generate_gif(&parameters)?;
      println!("{id}");
    },

    Command::Get { id } => {
      let store = gifgan::store::GifStore::open(&config.database)?;
      match store.get_gif(id)? {
        Some(path) => println!("{path}"),
        None => bail!("No gif with id {id}"),
      }
    },

    Command::Sample => {
      let parameters = generate_random_parameters(config.gan.latent_dim, &mut rand::thread_rng());
      println!("{}", parameters.iter().join(" "));
    },
  }
  Ok(())
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_generate() {
    let cli = Cli::try_parse_from(["gifgan", "generate", "0.5", "-0.25"]).unwrap();
    assert_eq!(cli.command, Command::Generate { parameters: vec![0.5, -0.25], random: false });
    assert_eq!(cli.config, None);
  }

  #[test]
  fn parse_train() {
    let cli = Cli::try_parse_from(["gifgan", "train", "--epochs", "3", "--resume", "-c", "gifgan.toml"]).unwrap();
    match cli.command {
      Command::Train { epochs, resume, index, keep, .. } => {
        assert_eq!(epochs, 3);
        assert!(resume);
        assert_eq!(index, PathBuf::from("data/gif_data.csv"));
        assert_eq!(keep, None);
      },
      other => panic!("Expected train command, got {other:?}"),
    }
    assert_eq!(cli.config, Some(PathBuf::from("gifgan.toml")));
  }

  #[test]
  fn rejects_conflicts() {
    assert!(Cli::try_parse_from(["gifgan", "generate", "--random", "0.1"]).is_err());
    assert!(Cli::try_parse_from(["gifgan", "get", "abc"]).is_err());
  }

  #[test]
  fn get_unknown_id() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServiceConfig { database: dir.path().join("gifs.db"), ..ServiceConfig::default() };
    assert!(run(Command::Get { id: 1 }, &config).is_err());
  }
}
