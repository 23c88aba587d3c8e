//! Head checkpoint: Burn record plus a JSON metadata sidecar
//!
//! The sidecar carries the head architecture, so the predictor rebuilds
//! exactly the module the trainer saved.

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::CompactRecorder,
    tensor::backend::Backend,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::features::ExtractorDescriptor;
use crate::model::{ClassifierHead, ClassifierHeadConfig};
use crate::utils::error::{Result, XrayError};

/// Extension the compact recorder appends to the checkpoint stem
pub const CHECKPOINT_EXTENSION: &str = "mpk";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub epoch: usize,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub input_shape: [usize; 3],
    pub hidden_units: usize,
    pub dropout: f64,
    pub class_names: Vec<String>,
    pub extractor: ExtractorDescriptor,
    pub saved_at: DateTime<Utc>,
}

impl CheckpointMetadata {
    pub fn head_config(&self) -> ClassifierHeadConfig {
        ClassifierHeadConfig::new(self.input_shape)
            .with_hidden_units(self.hidden_units)
            .with_dropout(self.dropout)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(XrayError::Checkpoint(format!(
                "metadata {} not found; train the classifier head first",
                path.display()
            )));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

/// Paths of one checkpoint: the recorder stem and its sidecar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadCheckpoint {
    stem: PathBuf,
    metadata: PathBuf,
}

impl HeadCheckpoint {
    pub fn new(stem: PathBuf, metadata: PathBuf) -> Self {
        Self { stem, metadata }
    }

    /// File actually written by the recorder
    pub fn weights_file(&self) -> PathBuf {
        self.stem.with_extension(CHECKPOINT_EXTENSION)
    }

    pub fn metadata_file(&self) -> &Path {
        &self.metadata
    }

    pub fn exists(&self) -> bool {
        self.weights_file().exists() && self.metadata.exists()
    }

    /// Overwrite the checkpoint with `model`
    pub fn save<B: Backend>(&self, model: &ClassifierHead<B>, metadata: &CheckpointMetadata) -> Result<()> {
        if let Some(parent) = self.stem.parent() {
            fs::create_dir_all(parent)?;
        }

        model
            .clone()
            .save_file(self.stem.clone(), &CompactRecorder::new())
            .map_err(|e| XrayError::Checkpoint(format!("Failed to save head: {:?}", e)))?;
        metadata.save(&self.metadata)?;

        info!(
            "Checkpoint saved to {} (epoch {}, val_loss {:.5})",
            self.weights_file().display(),
            metadata.epoch,
            metadata.val_loss
        );
        Ok(())
    }

    /// Rebuild the head from the sidecar and load its weights
    pub fn load<B: Backend>(&self, device: &B::Device) -> Result<(ClassifierHead<B>, CheckpointMetadata)> {
        let weights = self.weights_file();
        if !weights.exists() {
            return Err(XrayError::Checkpoint(format!(
                "weights {} not found; train the classifier head first",
                weights.display()
            )));
        }
        let metadata = CheckpointMetadata::load(&self.metadata)?;

        let model = metadata
            .head_config()
            .init::<B>(device)
            .load_file(self.stem.clone(), &CompactRecorder::new(), device)
            .map_err(|e| {
                XrayError::Checkpoint(format!("Failed to load {}: {:?}", weights.display(), e))
            })?;

        info!(
            "Loaded checkpoint from epoch {} (val_loss {:.5})",
            metadata.epoch, metadata.val_loss
        );
        Ok((model, metadata))
    }
}
