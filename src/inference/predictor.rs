//! Test-set predictor
//!
//! Runs the frozen extractor over test images, rebuilds the classifier head
//! from the checkpoint sidecar and turns logits into per-image
//! probabilities and classes.

use std::path::{Path, PathBuf};

use burn::{data::dataloader::batcher::Batcher, data::dataset::Dataset, tensor::backend::Backend};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::dataset::{imaging, FeatureBatch, FeatureBatcher, FeatureItem, ImageBatch, ImageBatcher, ImageItem, Manifest};
use crate::features::{extract_split, ExtractionOptions, FeatureCache};
use crate::model::{load_extractor, ClassifierHead, FeatureExtractor, Vgg16Features, Vgg16FeaturesConfig};
use crate::training::{classify, probabilities, CheckpointMetadata, HeadCheckpoint};
use crate::utils::error::{Result, XrayError};

/// Prediction for a single image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub path: PathBuf,
    /// Ground-truth label from the manifest
    pub label: usize,
    /// Sigmoid output, probability of class 1
    pub probability: f32,
    pub predicted: usize,
}

/// Predictions for a whole split, in manifest order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predictions {
    pub class_names: Vec<String>,
    pub entries: Vec<Prediction>,
}

impl Predictions {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn labels(&self) -> Vec<usize> {
        self.entries.iter().map(|p| p.label).collect()
    }

    pub fn classes(&self) -> Vec<usize> {
        self.entries.iter().map(|p| p.predicted).collect()
    }

    pub fn probabilities(&self) -> Vec<f32> {
        self.entries.iter().map(|p| p.probability).collect()
    }
}

pub struct Predictor<B: Backend> {
    extractor: Vgg16Features<B>,
    head: ClassifierHead<B>,
    metadata: CheckpointMetadata,
    image_size: usize,
    batch_size: usize,
    show_progress: bool,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    /// Pair an extractor with a trained head, checking they agree on the
    /// feature shape and input resolution
    pub fn new(
        extractor: Vgg16Features<B>,
        head: ClassifierHead<B>,
        metadata: CheckpointMetadata,
        image_size: usize,
        batch_size: usize,
        device: B::Device,
    ) -> Result<Self> {
        let produced = extractor.output_shape(image_size);
        if produced != metadata.input_shape {
            return Err(XrayError::ShapeMismatch {
                context: "extractor output vs. checkpoint input".to_string(),
                expected: format!("{:?}", metadata.input_shape),
                found: format!("{:?}", produced),
            });
        }
        if metadata.extractor.image_size != image_size {
            return Err(XrayError::Model(format!(
                "head was trained on {}px features but images are resized to {}px",
                metadata.extractor.image_size, image_size
            )));
        }

        Ok(Self {
            extractor,
            head,
            metadata,
            image_size,
            batch_size: batch_size.max(1),
            show_progress: false,
            device,
        })
    }

    /// Load the extractor and the head checkpoint named by `config`
    pub fn load(config: &PipelineConfig, device: &B::Device) -> Result<Self> {
        let extractor_config = Vgg16FeaturesConfig::new().with_base_filters(config.extractor.base_filters);
        let extractor = load_extractor::<B>(
            &extractor_config,
            config.extractor.weights.as_deref(),
            &config.paths.extractor_snapshot(),
            device,
        )?;

        let checkpoint = HeadCheckpoint::new(config.paths.checkpoint(), config.paths.checkpoint_metadata());
        let (head, metadata) = checkpoint.load::<B>(device)?;

        if metadata.extractor.name != extractor.name() {
            return Err(XrayError::Model(format!(
                "checkpoint was trained on features from {} but the configured extractor is {}",
                metadata.extractor.name,
                extractor.name()
            )));
        }

        info!(
            "Predictor ready: {} -> head {:?} (checkpoint epoch {})",
            extractor.name(),
            metadata.input_shape,
            metadata.epoch
        );
        Self::new(
            extractor,
            head,
            metadata,
            config.image.size,
            config.extractor.batch_size,
            device.clone(),
        )
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn metadata(&self) -> &CheckpointMetadata {
        &self.metadata
    }

    /// Predict every image of `manifest`
    pub fn predict_manifest(&self, manifest: &Manifest) -> Result<Predictions> {
        let options = ExtractionOptions {
            image_size: self.image_size,
            batch_size: self.batch_size,
            augmentation: None,
            show_progress: self.show_progress,
        };
        let features = extract_split::<B, _>(&self.extractor, manifest, &options, &self.device)?;
        let scores = self.predict_features(&features)?;

        let entries = manifest
            .entries
            .iter()
            .zip(scores)
            .map(|(entry, probability)| Prediction {
                path: entry.path.clone(),
                label: entry.label,
                probability,
                predicted: classify(probability),
            })
            .collect();

        Ok(Predictions {
            class_names: manifest.class_names.clone(),
            entries,
        })
    }

    /// Class-1 probabilities for every row of a feature cache
    pub fn predict_features(&self, cache: &FeatureCache) -> Result<Vec<f32>> {
        if cache.feature_shape != self.metadata.input_shape {
            return Err(XrayError::ShapeMismatch {
                context: format!("{} features", cache.split()),
                expected: format!("{:?}", self.metadata.input_shape),
                found: format!("{:?}", cache.feature_shape),
            });
        }

        let batcher = FeatureBatcher::new(cache.feature_shape);
        let indices: Vec<usize> = (0..cache.rows()).collect();
        let mut scores = Vec::with_capacity(cache.rows());
        for chunk in indices.chunks(self.batch_size) {
            let items: Vec<FeatureItem> = chunk.iter().filter_map(|&i| cache.get(i)).collect();
            let batch: FeatureBatch<B> = batcher.batch(items, &self.device);
            scores.extend(probabilities(self.head.forward(batch.features))?);
        }
        debug!("Scored {} {} rows", scores.len(), cache.split());
        Ok(scores)
    }

    /// Class and probability for one image file
    pub fn predict_image(&self, path: &Path) -> Result<(usize, f32)> {
        let img = imaging::load_rgb(path, self.image_size)?;
        let item = ImageItem {
            image: imaging::to_chw(&img),
            label: 0,
        };
        let batch: ImageBatch<B> = ImageBatcher::new(self.image_size).batch(vec![item], &self.device);
        let features = self.extractor.extract(batch.images);
        let probability = probabilities(self.head.forward(features))?
            .first()
            .copied()
            .ok_or_else(|| XrayError::Model("head returned no output".to_string()))?;
        Ok((classify(probability), probability))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::manifest::tests::write_split;
    use crate::dataset::DataSplit;
    use crate::features::ExtractorDescriptor;
    use crate::model::ClassifierHeadConfig;
    use burn::backend::NdArray;
    use chrono::Utc;
    use tempfile::tempdir;

    type TestBackend = NdArray;

    fn predictor(device: &<TestBackend as Backend>::Device) -> Predictor<TestBackend> {
        let extractor_config = Vgg16FeaturesConfig::new().with_base_filters(2);
        let extractor = extractor_config.init::<TestBackend>(device);
        let input_shape = extractor_config.output_shape(32);
        let head = ClassifierHeadConfig::new(input_shape)
            .with_hidden_units(4)
            .init::<TestBackend>(device);
        let metadata = CheckpointMetadata {
            epoch: 1,
            val_loss: 0.5,
            val_accuracy: 0.5,
            input_shape,
            hidden_units: 4,
            dropout: 0.7,
            class_names: vec!["NORMAL".to_string(), "PNEUMONIA".to_string()],
            extractor: ExtractorDescriptor {
                name: extractor.name(),
                image_size: 32,
                augmented: false,
            },
            saved_at: Utc::now(),
        };
        Predictor::new(extractor, head, metadata, 32, 3, device.clone()).unwrap()
    }

    #[test]
    fn test_predict_manifest_is_deterministic() {
        let dir = tempdir().unwrap();
        write_split(
            dir.path(),
            &[("NORMAL", 2, [20, 20, 20]), ("PNEUMONIA", 3, [230, 230, 230])],
        );
        let manifest = Manifest::from_directory(dir.path(), DataSplit::Test).unwrap();
        let device = Default::default();
        let predictor = predictor(&device);

        let first = predictor.predict_manifest(&manifest).unwrap();
        let second = predictor.predict_manifest(&manifest).unwrap();

        assert_eq!(first.len(), 5);
        assert_eq!(first, second);
        assert_eq!(first.labels(), vec![0, 0, 1, 1, 1]);
        for p in &first.entries {
            assert!((0.0..=1.0).contains(&p.probability));
            assert_eq!(p.predicted, classify(p.probability));
        }
    }

    #[test]
    fn test_single_image_matches_batch() {
        let dir = tempdir().unwrap();
        write_split(dir.path(), &[("NORMAL", 1, [10, 60, 90]), ("PNEUMONIA", 1, [200, 180, 40])]);
        let manifest = Manifest::from_directory(dir.path(), DataSplit::Test).unwrap();
        let device = Default::default();
        let predictor = predictor(&device);

        let batch = predictor.predict_manifest(&manifest).unwrap();
        for (entry, expected) in manifest.entries.iter().zip(&batch.entries) {
            let (class, probability) = predictor.predict_image(&entry.path).unwrap();
            assert_eq!(class, expected.predicted);
            assert!((probability - expected.probability).abs() < 1e-5);
        }
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let device = Default::default();
        let p = predictor(&device);
        let extractor = Vgg16FeaturesConfig::new().with_base_filters(2).init::<TestBackend>(&device);
        let head = p.metadata().head_config().init::<TestBackend>(&device);

        // 64px input gives [16, 2, 2], the head expects [16, 1, 1]
        let err = Predictor::new(extractor, head, p.metadata().clone(), 64, 4, device).err().unwrap();
        assert!(matches!(err, XrayError::ShapeMismatch { .. }));
    }
}
