//! Stage functions tying the modules together
//!
//! Each stage reads only what the previous one persisted, so the CLI can run
//! them separately or in sequence through [`run_all`].

use std::path::{Path, PathBuf};

use burn::tensor::backend::{AutodiffBackend, Backend};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::dataset::{DataSplit, DatasetStats, Manifest};
use crate::features::{extract_split, ExtractionOptions, ExtractorDescriptor, FeatureCache};
use crate::inference::{EvaluationReport, Predictor};
use crate::model::{prepare_extractor, ExtractorSource, Vgg16FeaturesConfig};
use crate::training::{HeadCheckpoint, HeadTrainer};
use crate::utils::error::{Result, XrayError};

/// File name of the effective configuration inside the artifacts directory
pub const EFFECTIVE_CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone)]
pub struct ExtractionSummary {
    pub train_rows: usize,
    pub validation_rows: usize,
    pub feature_shape: [usize; 3],
    pub extractor: ExtractorDescriptor,
    pub source: ExtractorSource,
    pub train_cache: PathBuf,
    pub validation_cache: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub best_val_loss: f64,
    pub stopped_at: Option<usize>,
    pub final_val_loss: f64,
    pub final_val_accuracy: f64,
    pub checkpoint: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PipelineSummary {
    pub extraction: ExtractionSummary,
    pub training: TrainingSummary,
    pub evaluation: EvaluationReport,
}

/// Write the configuration a stage ran with next to its artifacts
pub fn write_effective_config(config: &PipelineConfig) -> Result<PathBuf> {
    let path = config.paths.artifacts_dir.join(EFFECTIVE_CONFIG_FILE);
    config.save(&path)?;
    debug!("Effective configuration written to {}", path.display());
    Ok(path)
}

/// Per-class counts for every split directory that exists
pub fn dataset_stats(config: &PipelineConfig) -> Result<Vec<DatasetStats>> {
    let splits = [
        (&config.paths.train_dir, DataSplit::Train),
        (&config.paths.validation_dir, DataSplit::Validation),
        (&config.paths.test_dir, DataSplit::Test),
    ];

    let mut stats = Vec::new();
    for (dir, split) in splits {
        if !dir.exists() {
            warn!("{} directory {} not found, skipping", split, dir.display());
            continue;
        }
        stats.push(Manifest::from_directory(dir, split)?.stats());
    }
    Ok(stats)
}

/// Stage 1: run the frozen extractor over train and validation images and
/// write both feature caches
pub fn extract_features<B: Backend>(
    config: &PipelineConfig,
    device: &B::Device,
    show_progress: bool,
) -> Result<ExtractionSummary> {
    config.validate()?;
    let paths = &config.paths;

    let train_manifest = Manifest::from_directory(&paths.train_dir, DataSplit::Train)?;
    let validation_manifest = Manifest::from_directory(&paths.validation_dir, DataSplit::Validation)?;
    train_manifest.ensure_same_classes(&validation_manifest)?;

    let extractor_config = Vgg16FeaturesConfig::new().with_base_filters(config.extractor.base_filters);
    let (extractor, source) = prepare_extractor::<B>(
        &extractor_config,
        config.extractor.weights.as_deref(),
        &paths.extractor_snapshot(),
        config.extractor.seed,
        device,
    )?;

    let validation_options = ExtractionOptions {
        image_size: config.image.size,
        batch_size: config.extractor.batch_size,
        augmentation: None,
        show_progress,
    };
    let train_options = ExtractionOptions {
        augmentation: config.augmentation.enabled.then(|| config.augmentation.clone()),
        ..validation_options.clone()
    };
    if train_options.augmentation.is_some() {
        info!("Augmenting training images while caching (seed {})", config.augmentation.seed);
    }

    let train = extract_split::<B, _>(&extractor, &train_manifest, &train_options, device)?;
    train.save(&paths.train_features())?;
    let validation = extract_split::<B, _>(&extractor, &validation_manifest, &validation_options, device)?;
    validation.save(&paths.validation_features())?;

    write_effective_config(config)?;

    Ok(ExtractionSummary {
        train_rows: train.rows(),
        validation_rows: validation.rows(),
        feature_shape: train.feature_shape,
        extractor: train.extractor.clone(),
        source,
        train_cache: paths.train_features(),
        validation_cache: paths.validation_features(),
    })
}

/// Stage 2: fit the classifier head on the cached features
pub fn train_head<B: AutodiffBackend>(config: &PipelineConfig, device: &B::Device) -> Result<TrainingSummary> {
    config.validate()?;
    let paths = &config.paths;

    let train = load_cache(&paths.train_features())?;
    let validation = load_cache(&paths.validation_features())?;
    warn_if_stale(&train, &paths.train_dir);
    warn_if_stale(&validation, &paths.validation_dir);

    let checkpoint = HeadCheckpoint::new(paths.checkpoint(), paths.checkpoint_metadata());
    let trainer = HeadTrainer::<B>::new(
        config.training.clone(),
        config.head.architecture(train.feature_shape),
        checkpoint.clone(),
        device.clone(),
    );
    let outcome = trainer.fit(&train, &validation)?;

    outcome.history.save_reports(&paths.reports_dir())?;
    write_effective_config(config)?;

    Ok(TrainingSummary {
        epochs_run: outcome.history.len(),
        best_epoch: outcome.best_epoch,
        best_val_loss: outcome.best_val_loss,
        stopped_at: outcome.stopped_at,
        final_val_loss: outcome.final_val_loss,
        final_val_accuracy: outcome.final_val_accuracy,
        checkpoint: checkpoint.weights_file(),
    })
}

/// Stage 3 and 4: predict the test split with the checkpointed head and
/// compute every evaluation metric
pub fn evaluate_test_set<B: Backend>(
    config: &PipelineConfig,
    device: &B::Device,
    show_progress: bool,
) -> Result<EvaluationReport> {
    config.validate()?;

    let predictor = Predictor::<B>::load(config, device)?.with_progress(show_progress);
    let manifest = Manifest::from_directory(&config.paths.test_dir, DataSplit::Test)?;
    if manifest.class_names != predictor.metadata().class_names {
        return Err(XrayError::Dataset(format!(
            "test classes {:?} differ from the trained classes {:?}",
            manifest.class_names,
            predictor.metadata().class_names
        )));
    }

    let predictions = predictor.predict_manifest(&manifest)?;
    let report = EvaluationReport::from_split_predictions(&predictions)?;
    report.save_reports(&predictions, &config.paths.reports_dir())?;

    info!(
        "Test accuracy {:.2}% on {} images, AUC {}",
        report.accuracy() * 100.0,
        report.samples,
        report.auc_display()
    );
    Ok(report)
}

/// Every stage in order; each one finishes writing before the next reads
pub fn run_all<B: AutodiffBackend>(
    config: &PipelineConfig,
    device: &B::Device,
    show_progress: bool,
) -> Result<PipelineSummary> {
    let extraction = extract_features::<B::InnerBackend>(config, device, show_progress)?;
    let training = train_head::<B>(config, device)?;
    let evaluation = evaluate_test_set::<B::InnerBackend>(config, device, show_progress)?;

    Ok(PipelineSummary {
        extraction,
        training,
        evaluation,
    })
}

fn load_cache(path: &Path) -> Result<FeatureCache> {
    FeatureCache::load(path).map_err(|e| match e {
        XrayError::PathNotFound(p) => XrayError::FeatureCache {
            path: p,
            reason: "not found; run feature extraction first".to_string(),
        },
        other => other,
    })
}

/// The cache keeps its own manifest; a changed directory only warrants a warning
fn warn_if_stale(cache: &FeatureCache, dir: &Path) {
    if !dir.exists() {
        debug!("{} directory {} absent, skipping staleness check", cache.split(), dir.display());
        return;
    }
    match Manifest::from_directory(dir, cache.split()) {
        Ok(current) if current != cache.manifest => warn!(
            "{} directory has changed since caching ({} cached, {} on disk); re-run extraction to refresh",
            cache.split(),
            cache.rows(),
            current.len()
        ),
        Ok(_) => {}
        Err(e) => warn!("Could not rescan {}: {}", dir.display(), e),
    }
}
