use rand::{ SeedableRng, rngs::StdRng };
use tracing::debug;

mod generator;
mod discriminator;
mod loss;
mod train;
mod checkpoint;
mod inference;

pub use generator::{ Generator, Pass };
pub use discriminator::Discriminator;
pub use loss::{ generator_loss, discriminator_loss };
pub use train::{ Batches, BatchSource, StepReport };
pub use checkpoint::{ CheckpointStore, CheckpointHandle, GENERATOR_WEIGHTS, DISCRIMINATOR_WEIGHTS };

use crate::{
  config::GanConfig,
  error::{ GanError, Result },
  optimize::{ Optimizer, Adam },
  variable::{ BatchNorm, Moments },
  Tensor, Variable,
};


pub type AdamOptimizer = Optimizer<f32, Adam<f32>>;


/// Shared behavior of both networks: parameter enumeration and
/// (de)serialization of their learned state.
///
/// A network's state lists its trainable tensors, in a fixed order,
/// followed by the running mean and variance of each batch-norm layer.

pub trait Network {
  fn parameters(&self) -> Vec<Variable<f32>>;
  fn norms(&self) -> Vec<&BatchNorm<f32>>;
  fn norms_mut(&mut self) -> Vec<&mut BatchNorm<f32>>;

  fn state(&self) -> Vec<Tensor<f32>> {
    let weights = self.parameters().iter().map(|param| param.tensor().detach() ).collect::<Vec<_>>();
    let statistics = self.norms().into_iter().flat_map(|norm| {
      let moments = norm.statistics();
      [Tensor::vec(&moments.mean), Tensor::vec(&moments.variance)]
    });
    weights.into_iter().chain(statistics).collect()
  }

  /// Verify that `state` fits this network's architecture.

  fn check_state(&self, state: &[Tensor<f32>]) -> Result<()> {
    let expected: Vec<Vec<usize>> = self.parameters().iter()
      .map(|param| param.dims().to_vec() )
      .chain(self.norms().into_iter().flat_map(|norm| [vec![norm.channels()], vec![norm.channels()]]))
      .collect();
    if expected.len() != state.len() {
      return Err(GanError::ModelLoad(format!(
        "expected {} tensors, found {}", expected.len(), state.len())))
    }
    for (i, (dims, tensor)) in expected.iter().zip(state).enumerate() {
      if dims.as_slice() != tensor.dims() {
        return Err(GanError::ModelLoad(format!(
          "tensor {i} has shape {:?}, architecture expects {:?}", tensor.dims(), dims)))
      }
      if !tensor.all_finite() {
        return Err(GanError::ModelLoad(format!("tensor {i} holds non-finite values")))
      }
    }
    Ok(())
  }

  /// Replace weights and running statistics, leaving them untouched if `state` does not fit.

  fn load_state(&mut self, state: &[Tensor<f32>]) -> Result<()> {
    self.check_state(state)?;
    let params = self.parameters();
    for (param, tensor) in params.iter().zip(state) {
      param.tensor().assign(tensor);
    }
    let statistics = &state[params.len()..];
    for (norm, pair) in self.norms_mut().into_iter().zip(statistics.chunks(2)) {
      norm.set_statistics(Moments { mean: pair[0].to_vec(), variance: pair[1].to_vec() });
    }
    Ok(())
  }
}


/// Both networks along with their optimizers and random state.
///
/// This is the explicit context handed to training, checkpointing and
/// inference. Separate instances never share state.

#[derive(Debug)]
pub struct Gan {
  config: GanConfig,
  pub(crate) generator: Generator,
  pub(crate) discriminator: Discriminator,
  pub(crate) generator_optimizer: AdamOptimizer,
  pub(crate) discriminator_optimizer: AdamOptimizer,
  pub(crate) rng: StdRng,
}

impl Gan {
  pub fn new(config: GanConfig) -> Result<Self> {
    config.validate()?;
    let mut rng = match config.seed {
      Some(seed) => StdRng::seed_from_u64(seed),
      None => StdRng::from_entropy(),
    };
    let generator = Generator::new(&config, &mut rng);
    let discriminator = Discriminator::new(&config, &mut rng);
    debug!(
      generator = generator.parameters().iter().map(|p| p.size() ).sum::<usize>(),
      discriminator = discriminator.parameters().iter().map(|p| p.size() ).sum::<usize>(),
      "Initialized networks"
    );
    Ok(Self {
      generator_optimizer: Optimizer::new(config.learning_rate, Adam::default()),
      discriminator_optimizer: Optimizer::new(config.learning_rate, Adam::default()),
      config,
      generator,
      discriminator,
      rng,
    })
  }

  pub fn config(&self) -> &GanConfig {
    &self.config
  }

  pub fn generator(&self) -> &Generator {
    &self.generator
  }

  pub fn discriminator(&self) -> &Discriminator {
    &self.discriminator
  }

  /// Number of training steps applied so far.

  pub fn steps(&self) -> usize {
    self.generator_optimizer.steps()
  }
}
