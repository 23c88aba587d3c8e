//! Pipeline configuration.
//!
//! Every stage receives the same [`PipelineConfig`]. Defaults reproduce the
//! reference setup: 224 px inputs, 50 epochs, batch size 20, Adam at 7e-4,
//! early stopping on validation loss (min delta 0.01, patience 5).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::model::ClassifierHeadConfig;
use crate::utils::error::{Result, XrayError};

/// File stem of the head checkpoint inside the artifacts directory
pub const CHECKPOINT_STEM: &str = "bottleneck_transfer_model_xray";
/// File stem of the extractor snapshot written when no pretrained weights are configured
pub const EXTRACTOR_SNAPSHOT_STEM: &str = "feature_extractor";
pub const TRAIN_FEATURES_FILE: &str = "bottleneck_features_train.bin";
pub const VALIDATION_FEATURES_FILE: &str = "bottleneck_features_validation.bin";

/// Main configuration shared by all pipeline stages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub image: ImageConfig,
    pub extractor: ExtractorConfig,
    pub head: HeadConfig,
    pub training: TrainingConfig,
    pub augmentation: AugmentationConfig,
}

/// Input split directories and the output directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub train_dir: PathBuf,
    pub validation_dir: PathBuf,
    pub test_dir: PathBuf,
    /// Feature caches, checkpoint, extractor snapshot and reports
    pub artifacts_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            train_dir: PathBuf::from("xray/data/train"),
            validation_dir: PathBuf::from("xray/data/val"),
            test_dir: PathBuf::from("xray/data/test_set"),
            artifacts_dir: PathBuf::from("xray"),
        }
    }
}

impl PathsConfig {
    /// Point all three splits at `<root>/train`, `<root>/val`, `<root>/test_set`
    pub fn with_data_root(mut self, root: &Path) -> Self {
        self.train_dir = root.join("train");
        self.validation_dir = root.join("val");
        self.test_dir = root.join("test_set");
        self
    }

    pub fn train_features(&self) -> PathBuf {
        self.artifacts_dir.join(TRAIN_FEATURES_FILE)
    }

    pub fn validation_features(&self) -> PathBuf {
        self.artifacts_dir.join(VALIDATION_FEATURES_FILE)
    }

    /// Checkpoint path as handed to the recorder (extension is added on save)
    pub fn checkpoint(&self) -> PathBuf {
        self.artifacts_dir.join(CHECKPOINT_STEM)
    }

    pub fn checkpoint_metadata(&self) -> PathBuf {
        self.artifacts_dir.join(format!("{}.json", CHECKPOINT_STEM))
    }

    pub fn extractor_snapshot(&self) -> PathBuf {
        self.artifacts_dir.join(EXTRACTOR_SNAPSHOT_STEM)
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.artifacts_dir.join("reports")
    }
}

/// Image preprocessing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Square input resolution fed to the extractor
    pub size: usize,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self { size: 224 }
    }
}

/// Frozen feature extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Channel width of the first VGG16 block (64 for the standard network)
    pub base_filters: usize,
    /// Burn record holding pretrained weights; when absent a seeded random
    /// initialization is used and snapshotted for the later stages
    pub weights: Option<PathBuf>,
    pub batch_size: usize,
    pub seed: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            base_filters: 64,
            weights: None,
            batch_size: 20,
            seed: 42,
        }
    }
}

/// Trainable classifier head
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadConfig {
    pub hidden_units: usize,
    pub dropout: f64,
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self {
            hidden_units: 128,
            dropout: 0.7,
        }
    }
}

impl HeadConfig {
    /// Architecture definition for features of the given per-sample shape
    pub fn architecture(&self, input_shape: [usize; 3]) -> ClassifierHeadConfig {
        ClassifierHeadConfig::new(input_shape)
            .with_hidden_units(self.hidden_units)
            .with_dropout(self.dropout)
    }
}

/// Head training hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Reshuffle the training order every epoch
    pub shuffle: bool,
    pub seed: u64,
    pub early_stopping: EarlyStoppingConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 20,
            learning_rate: 0.0007,
            shuffle: true,
            seed: 42,
            early_stopping: EarlyStoppingConfig::default(),
        }
    }
}

/// Early stopping and checkpointing on validation loss
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyStoppingConfig {
    /// Minimum decrease of validation loss that counts as an improvement
    pub min_delta: f64,
    /// Epochs without improvement before training stops
    pub patience: usize,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        Self {
            min_delta: 0.01,
            patience: 5,
        }
    }
}

/// Training-split augmentation applied while caching features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    pub enabled: bool,
    /// Maximum shear, as a fraction of the image side
    pub shear_range: f32,
    /// Maximum zoom deviation, `[1 - z, 1 + z]`
    pub zoom_range: f32,
    pub horizontal_flip: bool,
    pub seed: u64,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            shear_range: 0.2,
            zoom_range: 0.2,
            horizontal_flip: true,
            seed: 42,
        }
    }
}

impl PipelineConfig {
    /// Load from a TOML file; missing keys keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = load_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Write as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(XrayError::Config(msg));

        if self.image.size < 32 {
            return fail(format!(
                "image.size must be at least 32 to survive five pooling stages, got {}",
                self.image.size
            ));
        }
        if self.extractor.base_filters == 0 {
            return fail("extractor.base_filters must be positive".to_string());
        }
        if self.extractor.batch_size == 0 || self.training.batch_size == 0 {
            return fail("batch sizes must be positive".to_string());
        }
        if self.training.epochs == 0 {
            return fail("training.epochs must be positive".to_string());
        }
        if !(self.training.learning_rate > 0.0 && self.training.learning_rate.is_finite()) {
            return fail(format!(
                "training.learning_rate must be positive, got {}",
                self.training.learning_rate
            ));
        }
        if !(0.0..1.0).contains(&self.head.dropout) {
            return fail(format!("head.dropout must be in [0, 1), got {}", self.head.dropout));
        }
        if self.head.hidden_units == 0 {
            return fail("head.hidden_units must be positive".to_string());
        }
        if self.training.early_stopping.min_delta < 0.0 {
            return fail("training.early_stopping.min_delta must be non-negative".to_string());
        }
        if !(0.0..1.0).contains(&self.augmentation.shear_range)
            || !(0.0..1.0).contains(&self.augmentation.zoom_range)
        {
            return fail("augmentation ranges must be in [0, 1)".to_string());
        }
        Ok(())
    }
}

/// Read and parse a TOML file into any deserializable type
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(XrayError::PathNotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| XrayError::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_reference_setup() {
        let config = PipelineConfig::default();
        assert_eq!(config.image.size, 224);
        assert_eq!(config.training.epochs, 50);
        assert_eq!(config.training.batch_size, 20);
        assert!((config.training.learning_rate - 0.0007).abs() < 1e-12);
        assert!((config.training.early_stopping.min_delta - 0.01).abs() < 1e-12);
        assert_eq!(config.training.early_stopping.patience, 5);
        assert_eq!(config.head.hidden_units, 128);
        assert!((config.head.dropout - 0.7).abs() < 1e-12);
        assert!(!config.augmentation.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_artifact_paths() {
        let paths = PathsConfig::default();
        assert_eq!(
            paths.train_features(),
            PathBuf::from("xray/bottleneck_features_train.bin")
        );
        assert_eq!(
            paths.checkpoint_metadata(),
            PathBuf::from("xray/bottleneck_transfer_model_xray.json")
        );

        let rooted = PathsConfig::default().with_data_root(Path::new("/data"));
        assert_eq!(rooted.validation_dir, PathBuf::from("/data/val"));
        assert_eq!(rooted.test_dir, PathBuf::from("/data/test_set"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        fs::write(
            &path,
            "[training]\nepochs = 3\n\n[training.early_stopping]\npatience = 2\n",
        )
        .unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.training.epochs, 3);
        assert_eq!(config.training.early_stopping.patience, 2);
        assert_eq!(config.training.batch_size, 20);
        assert_eq!(config.image.size, 224);
    }

    #[test]
    fn test_save_load_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("config.toml");
        let mut config = PipelineConfig::default();
        config.extractor.weights = Some(PathBuf::from("weights/vgg16"));
        config.save(&path).unwrap();

        assert_eq!(PipelineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/pipeline.toml");
        assert_eq!(PipelineConfig::load(&path).unwrap(), PipelineConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.head.dropout = 1.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.image.size = 16;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.training.batch_size = 0;
        assert!(matches!(config.validate(), Err(XrayError::Config(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = PipelineConfig::load(Path::new("/nonexistent/pipeline.toml")).unwrap_err();
        assert!(matches!(err, XrayError::PathNotFound(_)));
    }

    #[test]
    fn test_head_architecture() {
        let head = HeadConfig::default().architecture([512, 7, 7]);
        assert_eq!(head.input_shape, [512, 7, 7]);
        assert_eq!(head.hidden_units, 128);
    }
}
