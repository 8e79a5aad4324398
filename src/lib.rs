//! Generate small greyscale gifs from parameter vectors with a
//! convolutional GAN. CPU only. Few dependencies.
//!
//! # Overview
//!
//! - **Networks**: A [Generator](gan::Generator) turns latent vectors into
//! images in `[-1, 1]`, a [Discriminator](gan::Discriminator) scores images
//! with an unbounded logit.
//!
//! - **Training**: [Gan::train_step](gan::Gan::train_step) updates both
//! networks simultaneously, each from its own cross-entropy loss only.
//! [Gan::train](gan::Gan::train) loops over epochs and checkpoints periodically.
//!
//! - **Checkpoints**: A [CheckpointStore](gan::CheckpointStore) keeps complete,
//! atomically written snapshots of the training state. Inference weights can be
//! exported separately.
//!
//! - **Serving**: A [GifService](service::GifService) generates images
//! on request, writes them as gifs and records them in SQLite.
//!
//! The networks are built on a small tensor library with reverse-mode
//! automatic differentiation, exposed as [Tensor] and [Variable].
//!
//! # Examples
//!
//! Training on a batch and sampling an image:
//! ```
//! use gifgan::{ config::GanConfig, gan::Gan, Tensor };
//!
//! let config = GanConfig {
//!   latent_dim: 8,
//!   base_side: 2,
//!   base_channels: 8,
//!   kernel: 3,
//!   batch_size: 2,
//!   seed: Some(1),
//!   ..GanConfig::default()
//! };
//! let mut gan = Gan::new(config)?;
//!
//! let images = Tensor::fill(&[2, 8, 8, 1], 0.5);
//! let report = gan.train_step(&images)?;
//! assert!(report.discriminator_loss.is_finite());
//!
//! // Up to latent_dim leading values; the rest is random
//! let image = gan.generate_image(&[0.2, -0.7])?;
//! assert_eq!(image.dims(), &[8, 8, 1]);
//! # Ok::<(), gifgan::GanError>(())
//! ```
//!
//! Differentiating through tensor operations:
//! ```
//! use gifgan::{ ops::*, Tensor };
//!
//! let x = Tensor::vec(&[1.0, -2.0]).trained();
//! let loss = x.softplus().mean();
//! loss.backward();
//! assert!(x.grad().unwrap().param_iter().all(|g| g > 0.0 ));
//! ```
//!
//! # Optional features
//!
//! - `unsafe` *(default)*: Accelerated matrix math using [matrixmultiply] crate.
//! - `rayon`: Process images of a batch in parallel during convolutions.

mod internal;
mod shape;
mod tensor;
mod variable;

pub mod ops;
pub mod scalar;
pub mod optimize;
pub mod error;
pub mod config;
pub mod gan;
pub mod data;
pub mod codec;
pub mod store;
pub mod service;

pub use shape::Shape;
pub use tensor::Tensor;
pub use variable::{
  Variable, UnaryOp, BinaryOp, MultiOp,
  Mode, Moments, Dense, Conv2d, ConvTranspose2d, BatchNorm, dropout,
};
pub use error::{ GanError, Result };
pub use config::{ GanConfig, ServiceConfig };
pub use gan::Gan;
