use std::time::Instant;

use tracing::{ debug, info, warn };

use crate::{
  error::{ GanError, Result },
  variable::{ Mode, Moments },
  Tensor, Variable,
};
use super::{ Gan, Network, CheckpointStore, generator_loss, discriminator_loss };


/// Loss values observed during a training step, or averaged over an epoch.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
  pub generator_loss: f32,
  pub discriminator_loss: f32,
}


/// Batches of one epoch, loaded as they are consumed.

pub type Batches<'a> = Box<dyn Iterator<Item = Result<Tensor<f32>>> + 'a>;


/// A restartable supply of training batches.

pub trait BatchSource {
  /// All batches of one pass over the data, each shaped
  /// `[batch_size, side, side, 1]`.
  fn epoch(&mut self, epoch: usize) -> Result<Batches<'_>>;
}

impl BatchSource for Vec<Tensor<f32>> {
  fn epoch(&mut self, _epoch: usize) -> Result<Batches<'_>> {
    Ok(Box::new(self.iter().cloned().map(Ok)))
  }
}


/// Gradients for both networks, computed but not yet applied.

#[derive(Debug)]
pub(crate) struct Gradients {
  pub(crate) generator: Vec<Tensor<f32>>,
  pub(crate) discriminator: Vec<Tensor<f32>>,
  pub(crate) moments: Vec<Moments<f32>>,
  pub(crate) report: StepReport,
}

fn snapshot(params: &[Variable<f32>]) -> Vec<Tensor<f32>> {
  params.iter()
    .map(|param| param.grad().map(Tensor::detach).unwrap_or_else(|| Tensor::zeros(param.dims()) ))
    .collect()
}

fn all_finite(grads: &[Tensor<f32>]) -> bool {
  grads.iter().all(Tensor::all_finite)
}

impl Gan {
  /// Run both networks on one batch and derive each network's gradient
  /// from its own loss only.
  ///
  /// Both losses share one graph. Gradients are read off after each
  /// backward pass and the graph is reset in between, so neither loss
  /// leaks into the other network's gradient. Parameters are left as they are.

  pub(crate) fn compute_gradients(&mut self, images: &Tensor<f32>) -> Result<Gradients> {
    let batch_size = self.config.batch_size;
    let side = self.config.image_side();
    if images.dims() != [batch_size, side, side, 1] {
      return Err(GanError::shape(format!("[{batch_size}, {side}, {side}, 1]"), images.shape()))
    }
    if !images.all_finite() {
      return Err(GanError::Numerical("training batch holds non-finite values".into()))
    }

    let noise = Tensor::randn(&[batch_size, self.config.latent_dim], &mut self.rng).tracked();
    let pass = self.generator.forward(&noise, Mode::Train)?;
    let real = self.discriminator.forward(&images.tracked(), Mode::Train, &mut self.rng)?;
    let fake = self.discriminator.forward(&pass.output, Mode::Train, &mut self.rng)?;

    let gen_loss = generator_loss(&fake);
    let disc_loss = discriminator_loss(&real, &fake);
    let report = StepReport {
      generator_loss: gen_loss.item(),
      discriminator_loss: disc_loss.item(),
    };
    if !(report.generator_loss.is_finite() && report.discriminator_loss.is_finite()) {
      return Err(GanError::Numerical(format!(
        "non-finite loss (generator {}, discriminator {})",
        report.generator_loss, report.discriminator_loss)))
    }

    gen_loss.backward();
    let generator = snapshot(&self.generator.parameters());
    gen_loss.reset();

    disc_loss.backward();
    let discriminator = snapshot(&self.discriminator.parameters());
    disc_loss.reset();

    if !(all_finite(&generator) && all_finite(&discriminator)) {
      return Err(GanError::Numerical("non-finite gradient".into()))
    }
    if !pass.moments.iter().all(Moments::all_finite) {
      return Err(GanError::Numerical("non-finite batch statistics".into()))
    }

    Ok(Gradients { generator, discriminator, moments: pass.moments, report })
  }

  /// Perform one simultaneous update of both networks on a batch of real images.
  ///
  /// On error, neither network nor its optimizer has changed.

  pub fn train_step(&mut self, images: &Tensor<f32>) -> Result<StepReport> {
    let grads = self.compute_gradients(images).map_err(|err| {
      if let GanError::Numerical(reason) = &err {
        warn!(step = self.steps() + 1, %reason, "Skipped update");
      }
      err
    })?;
    self.generator_optimizer.apply(&self.generator.parameters(), &grads.generator);
    self.discriminator_optimizer.apply(&self.discriminator.parameters(), &grads.discriminator);
    self.generator.commit(&grads.moments);
    Ok(grads.report)
  }

  /// Train for `epochs` passes over `data`, checkpointing every
  /// `checkpoint_every` epochs.
  ///
  /// Returns the mean losses of each epoch. Failures to load or train on a
  /// batch are reported with their 1-based epoch and 0-based batch index.

  pub fn train(&mut self, data: &mut impl BatchSource, epochs: usize, checkpoints: &mut CheckpointStore) -> Result<Vec<StepReport>> {
    if epochs == 0 {
      return Err(GanError::Config("epochs must be greater than 0".into()))
    }
    let every = self.config.checkpoint_every;
    let mut history = Vec::with_capacity(epochs);

    for epoch in 1..=epochs {
      let start = Instant::now();
      let mut batches = 0;
      let mut generator_total = 0.0;
      let mut discriminator_total = 0.0;
      for (batch, images) in data.epoch(epoch)?.enumerate() {
        let report = images
          .and_then(|images| self.train_step(&images) )
          .map_err(|err| GanError::Training { epoch, batch, source: Box::new(err) })?;
        debug!(epoch, batch, generator_loss = report.generator_loss, discriminator_loss = report.discriminator_loss);
        generator_total += report.generator_loss;
        discriminator_total += report.discriminator_loss;
        batches += 1;
      }
      if batches == 0 {
        return Err(GanError::Data(format!("epoch {epoch} yielded no batches")))
      }

      let report = StepReport {
        generator_loss: generator_total / batches as f32,
        discriminator_loss: discriminator_total / batches as f32,
      };
      info!(
        epoch,
        batches,
        generator_loss = report.generator_loss,
        discriminator_loss = report.discriminator_loss,
        seconds = start.elapsed().as_secs_f32(),
        "Finished epoch"
      );
      history.push(report);

      if epoch % every == 0 {
        let handle = checkpoints.save(self)?;
        info!(epoch, step = handle.step, path = %handle.path.display(), "Saved checkpoint");
      }
    }
    Ok(history)
  }
}
