//! # Chest X-ray Transfer Learning
//!
//! Pneumonia vs. normal classification of chest X-rays with the Burn
//! framework, by training a small dense head on features from a frozen
//! VGG16 convolutional base.
//!
//! ## Pipeline
//!
//! 1. **Feature caching**: the frozen extractor runs once over the train and
//!    validation images; outputs are cached together with their manifest.
//! 2. **Head training**: `flatten → dropout → dense(relu) → dropout →
//!    dense(sigmoid)` trained with Adam on binary cross-entropy, with early
//!    stopping and best-only checkpointing on validation loss.
//! 3. **Inference**: the head is rebuilt from the checkpoint metadata and
//!    scores the test images.
//! 4. **Evaluation**: confusion matrix, classification report, ROC curve
//!    and AUC.
//!
//! ## Modules
//!
//! - `config`: pipeline configuration (TOML) with the default hyperparameters
//! - `dataset`: split manifests, image decoding, augmentation, batchers
//! - `model`: the frozen extractor and the classifier head
//! - `features`: bottleneck feature extraction and the on-disk cache
//! - `training`: training loop, early stopping, checkpoints, history
//! - `inference`: test-set predictor and evaluation report
//! - `pipeline`: stage functions used by the CLI
//! - `utils`: logging, errors, metrics and SVG charts
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use xray_transfer::backend::{default_device, TrainingBackend};
//! use xray_transfer::{pipeline, PipelineConfig};
//!
//! let config = PipelineConfig::load("pipeline.toml".as_ref())?;
//! let summary = pipeline::run_all::<TrainingBackend>(&config, &default_device(), true)?;
//! println!("{}", summary.evaluation);
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod features;
pub mod inference;
pub mod model;
pub mod pipeline;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::PipelineConfig;
pub use dataset::{DataSplit, Manifest};
pub use features::FeatureCache;
pub use inference::{EvaluationReport, Predictor};
pub use model::{ClassifierHead, ClassifierHeadConfig, FeatureExtractor, Vgg16Features};
pub use training::{HeadTrainer, DECISION_THRESHOLD};
pub use utils::error::{Result, XrayError};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
