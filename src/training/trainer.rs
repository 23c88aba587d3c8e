//! Classifier head training loop
//!
//! Adam on binary cross-entropy over cached features. After every epoch
//! the head is scored on the validation cache with dropout disabled; the
//! validation loss drives checkpointing and early stopping through
//! [`EarlyStopping`].

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::AutodiffModule,
    nn::loss::BinaryCrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::{activation::sigmoid, backend::AutodiffBackend, ElementConversion},
};
use chrono::Utc;
use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::config::TrainingConfig;
use crate::dataset::{FeatureBatch, FeatureBatcher, FeatureItem};
use crate::features::FeatureCache;
use crate::model::{ClassifierHead, ClassifierHeadConfig};
use crate::training::checkpoint::{CheckpointMetadata, HeadCheckpoint};
use crate::training::early_stopping::EarlyStopping;
use crate::training::history::{EpochRecord, TrainingHistory};
use crate::utils::error::{Result, XrayError};
use crate::utils::logging::TrainingLogger;

/// Probability above which a sample is classified as pneumonia
pub const DECISION_THRESHOLD: f32 = 0.5;

/// Result of a training run
#[derive(Debug)]
pub struct TrainingOutcome<B: Backend> {
    /// Model after the last epoch (not necessarily the checkpointed one)
    pub model: ClassifierHead<B>,
    pub history: TrainingHistory,
    pub best_epoch: usize,
    pub best_val_loss: f64,
    /// Epoch at which early stopping fired
    pub stopped_at: Option<usize>,
    pub final_val_loss: f64,
    pub final_val_accuracy: f64,
}

pub struct HeadTrainer<B: AutodiffBackend> {
    config: TrainingConfig,
    head: ClassifierHeadConfig,
    checkpoint: HeadCheckpoint,
    device: B::Device,
}

impl<B: AutodiffBackend> HeadTrainer<B> {
    pub fn new(
        config: TrainingConfig,
        head: ClassifierHeadConfig,
        checkpoint: HeadCheckpoint,
        device: B::Device,
    ) -> Self {
        Self {
            config,
            head,
            checkpoint,
            device,
        }
    }

    /// Train on `train`, monitor on `val`; the checkpoint is written only on
    /// validation-loss improvement
    pub fn fit(&self, train: &FeatureCache, val: &FeatureCache) -> Result<TrainingOutcome<B::InnerBackend>> {
        train.ensure_compatible(val)?;
        if train.feature_shape != self.head.input_shape {
            return Err(XrayError::ShapeMismatch {
                context: "classifier head input".to_string(),
                expected: format!("{:?}", self.head.input_shape),
                found: format!("{:?}", train.feature_shape),
            });
        }
        if train.rows() == 0 || val.rows() == 0 {
            return Err(XrayError::Training(format!(
                "empty feature cache (train {}, validation {})",
                train.rows(),
                val.rows()
            )));
        }

        let cfg = &self.config;
        info!(
            "Training head on {} samples, validating on {} (features {:?}, lr {}, batch {})",
            train.rows(),
            val.rows(),
            train.feature_shape,
            cfg.learning_rate,
            cfg.batch_size
        );

        B::seed(cfg.seed);
        let mut model: ClassifierHead<B> = self.head.init(&self.device);
        let mut optimizer = AdamConfig::new()
            .with_beta_1(0.9)
            .with_beta_2(0.999)
            .with_epsilon(1e-7)
            .init();
        let loss_fn = BinaryCrossEntropyLossConfig::new()
            .with_logits(true)
            .init(&self.device);
        let batcher = FeatureBatcher::new(train.feature_shape);

        let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
        let mut stopper = EarlyStopping::new(cfg.early_stopping);
        let mut history = TrainingHistory::default();
        let mut logger = TrainingLogger::new(cfg.epochs);
        let mut stopped_at = None;
        let mut order: Vec<usize> = (0..train.rows()).collect();

        for epoch in 1..=cfg.epochs {
            logger.start_epoch(epoch);
            if cfg.shuffle {
                order.shuffle(&mut rng);
            }

            let mut loss_sum = 0.0;
            let mut correct = 0usize;
            for chunk in order.chunks(cfg.batch_size) {
                let items: Vec<FeatureItem> = chunk.iter().filter_map(|&i| train.get(i)).collect();
                let batch: FeatureBatch<B> = batcher.batch(items, &self.device);

                let logits = model.forward(batch.features);
                let loss = loss_fn.forward(logits.clone(), batch.targets);

                let loss_value: f64 = loss.clone().into_scalar().elem();
                loss_sum += loss_value * chunk.len() as f64;
                correct += count_correct(logits.inner(), &batch.labels)?;

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(cfg.learning_rate, model, grads);
            }

            let train_loss = loss_sum / train.rows() as f64;
            let train_accuracy = correct as f64 / train.rows() as f64;
            let (val_loss, val_accuracy) =
                evaluate_head(&model.valid(), val, cfg.batch_size, &self.device)?;
            logger.end_epoch(train_loss, train_accuracy, val_loss, val_accuracy);

            let previous_best = stopper.best();
            let verdict = stopper.observe(epoch, val_loss);
            if verdict.improved {
                logger.log_new_best(previous_best, val_loss, &self.checkpoint.weights_file());
                self.checkpoint.save(
                    &model,
                    &CheckpointMetadata {
                        epoch,
                        val_loss,
                        val_accuracy,
                        input_shape: self.head.input_shape,
                        hidden_units: self.head.hidden_units,
                        dropout: self.head.dropout,
                        class_names: train.manifest.class_names.clone(),
                        extractor: train.extractor.clone(),
                        saved_at: Utc::now(),
                    },
                )?;
            } else {
                logger.log_no_improvement(stopper.best(), stopper.wait(), stopper.patience());
            }

            history.push(EpochRecord {
                epoch,
                train_loss,
                train_accuracy,
                val_loss,
                val_accuracy,
                checkpointed: verdict.improved,
            });

            if verdict.should_stop {
                logger.log_early_stop(epoch, stopper.patience());
                stopped_at = Some(epoch);
                break;
            }
        }

        let best_epoch = stopper.best_epoch().ok_or_else(|| {
            XrayError::Training("validation loss never improved; no checkpoint was written".to_string())
        })?;
        logger.log_complete(history.len(), stopper.best());

        let model = model.valid();
        let (final_val_loss, final_val_accuracy) =
            evaluate_head(&model, val, cfg.batch_size, &self.device)?;
        info!("Validation accuracy: {:.2}%", final_val_accuracy * 100.0);
        info!("Validation loss: {:.5}", final_val_loss);

        Ok(TrainingOutcome {
            model,
            history,
            best_epoch,
            best_val_loss: stopper.best(),
            stopped_at,
            final_val_loss,
            final_val_accuracy,
        })
    }
}

/// Mean binary cross-entropy and accuracy of `model` over a cache
pub fn evaluate_head<B: Backend>(
    model: &ClassifierHead<B>,
    cache: &FeatureCache,
    batch_size: usize,
    device: &B::Device,
) -> Result<(f64, f64)> {
    if cache.rows() == 0 {
        return Err(XrayError::Training(format!("{} cache is empty", cache.split())));
    }

    let batcher = FeatureBatcher::new(cache.feature_shape);
    let loss_fn = BinaryCrossEntropyLossConfig::new().with_logits(true).init(device);

    let mut loss_sum = 0.0;
    let mut correct = 0usize;
    let indices: Vec<usize> = (0..cache.rows()).collect();
    for chunk in indices.chunks(batch_size.max(1)) {
        let items: Vec<FeatureItem> = chunk.iter().filter_map(|&i| cache.get(i)).collect();
        let batch: FeatureBatch<B> = batcher.batch(items, device);

        let logits = model.forward(batch.features);
        let loss = loss_fn.forward(logits.clone(), batch.targets);
        let loss_value: f64 = loss.into_scalar().elem();

        loss_sum += loss_value * chunk.len() as f64;
        correct += count_correct(logits, &batch.labels)?;
    }

    let n = cache.rows() as f64;
    debug!("{} evaluation: loss {:.5}, accuracy {:.4}", cache.split(), loss_sum / n, correct as f64 / n);
    Ok((loss_sum / n, correct as f64 / n))
}

/// Sigmoid probabilities of a logit vector
pub fn probabilities<B: Backend>(logits: Tensor<B, 1>) -> Result<Vec<f32>> {
    sigmoid(logits)
        .into_data()
        .convert::<f32>()
        .to_vec()
        .map_err(|e| XrayError::Model(format!("Failed to read probabilities: {:?}", e)))
}

/// Class 1 iff probability exceeds [`DECISION_THRESHOLD`]
pub fn classify(probability: f32) -> usize {
    usize::from(probability > DECISION_THRESHOLD)
}

fn count_correct<B: Backend>(logits: Tensor<B, 1>, labels: &[usize]) -> Result<usize> {
    Ok(probabilities(logits)?
        .into_iter()
        .zip(labels)
        .filter(|(p, &label)| classify(*p) == label)
        .count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EarlyStoppingConfig;
    use crate::dataset::DataSplit;
    use crate::features::cache::tests::synthetic_cache;
    use burn::backend::{Autodiff, NdArray};
    use tempfile::tempdir;

    type TestBackend = Autodiff<NdArray>;

    fn trainer(dir: &std::path::Path, epochs: usize, patience: usize) -> HeadTrainer<TestBackend> {
        let config = TrainingConfig {
            epochs,
            batch_size: 4,
            learning_rate: 0.01,
            shuffle: true,
            seed: 1,
            early_stopping: EarlyStoppingConfig {
                min_delta: 0.01,
                patience,
            },
        };
        let head = ClassifierHeadConfig::new([4, 1, 1])
            .with_hidden_units(16)
            .with_dropout(0.2);
        let checkpoint = HeadCheckpoint::new(dir.join("head"), dir.join("head.json"));
        HeadTrainer::new(config, head, checkpoint, Default::default())
    }

    #[test]
    fn test_classify_threshold() {
        assert_eq!(classify(0.5), 0);
        assert_eq!(classify(0.5001), 1);
        assert_eq!(classify(0.0), 0);
        assert_eq!(classify(1.0), 1);
    }

    #[test]
    fn test_fit_separable_features() {
        let dir = tempdir().unwrap();
        let labels: Vec<usize> = (0..16).map(|i| i % 2).collect();
        let train = synthetic_cache(DataSplit::Train, &labels, [4, 1, 1]);
        let val = synthetic_cache(DataSplit::Validation, &[0, 1, 0, 1], [4, 1, 1]);

        let outcome = trainer(dir.path(), 30, 5).fit(&train, &val).unwrap();

        assert!(!outcome.history.is_empty());
        assert!(outcome.history.len() <= 30);
        assert!(outcome.final_val_accuracy > 0.99);
        assert!(dir.path().join("head.mpk").exists());
        assert!(dir.path().join("head.json").exists());

        let meta = CheckpointMetadata::load(&dir.path().join("head.json")).unwrap();
        assert_eq!(meta.epoch, outcome.best_epoch);
        assert_eq!(*outcome.history.checkpointed_epochs().last().unwrap(), outcome.best_epoch);
    }

    #[test]
    fn test_early_stopping_bound() {
        let dir = tempdir().unwrap();
        let labels: Vec<usize> = (0..8).map(|i| i % 2).collect();
        let train = synthetic_cache(DataSplit::Train, &labels, [4, 1, 1]);
        let val = synthetic_cache(DataSplit::Validation, &[0, 1], [4, 1, 1]);

        let outcome = trainer(dir.path(), 200, 2).fit(&train, &val).unwrap();
        let last = outcome.history.last().unwrap().epoch;

        // the loss plateaus well within 200 epochs
        let stopped = outcome.stopped_at.expect("training should stop early");
        assert_eq!(stopped, last);
        assert!(stopped < 200);
        assert!(stopped - outcome.best_epoch <= 2);
        // checkpoints happen only on improvement, each strictly better than the last
        let checkpointed: Vec<f64> = outcome
            .history
            .epochs
            .iter()
            .filter(|r| r.checkpointed)
            .map(|r| r.val_loss)
            .collect();
        assert!(checkpointed.windows(2).all(|w| w[1] < w[0] - 0.01));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let dir = tempdir().unwrap();
        let train = synthetic_cache(DataSplit::Train, &[0, 1], [2, 1, 1]);
        let val = synthetic_cache(DataSplit::Validation, &[0, 1], [2, 1, 1]);
        let err = trainer(dir.path(), 1, 1).fit(&train, &val).unwrap_err();
        assert!(matches!(err, XrayError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_evaluate_head_ranges() {
        let device = Default::default();
        let head = ClassifierHeadConfig::new([4, 1, 1]).init::<NdArray>(&device);
        let cache = synthetic_cache(DataSplit::Validation, &[0, 1, 1], [4, 1, 1]);

        let (loss, accuracy) = evaluate_head(&head, &cache, 2, &device).unwrap();
        assert!(loss.is_finite() && loss >= 0.0);
        assert!((0.0..=1.0).contains(&accuracy));
    }
}
