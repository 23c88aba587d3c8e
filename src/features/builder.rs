//! Runs the frozen extractor over a split and collects its outputs

use burn::{data::dataloader::batcher::Batcher, tensor::backend::Backend};
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::config::AugmentationConfig;
use crate::dataset::{imaging, Augmenter, ImageBatch, ImageBatcher, ImageItem, Manifest};
use crate::features::cache::{ExtractorDescriptor, FeatureCache};
use crate::model::FeatureExtractor;
use crate::utils::error::{Result, XrayError};

/// Extraction settings for one split
#[derive(Debug, Clone)]
pub struct ExtractionOptions {
    pub image_size: usize,
    pub batch_size: usize,
    /// Applied to every image of the split when set
    pub augmentation: Option<AugmentationConfig>,
    pub show_progress: bool,
}

/// Extract features for every manifest entry, in manifest order
///
/// Every image is processed; the last batch may be smaller than
/// `batch_size`.
pub fn extract_split<B, E>(
    extractor: &E,
    manifest: &Manifest,
    options: &ExtractionOptions,
    device: &B::Device,
) -> Result<FeatureCache>
where
    B: Backend,
    E: FeatureExtractor<B>,
{
    let feature_shape = extractor.output_shape(options.image_size);
    let row_len: usize = feature_shape.iter().product();
    let batcher = ImageBatcher::new(options.image_size);

    let mut augment = options
        .augmentation
        .as_ref()
        .map(|cfg| (Augmenter::new(cfg), ChaCha8Rng::seed_from_u64(cfg.seed)));

    let progress = if options.show_progress {
        let pb = ProgressBar::new(manifest.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb.set_message(format!("{} images", manifest.split));
        pb
    } else {
        ProgressBar::hidden()
    };

    let mut features = Vec::with_capacity(manifest.len() * row_len);
    for chunk in manifest.entries.chunks(options.batch_size) {
        let mut items = Vec::with_capacity(chunk.len());
        for entry in chunk {
            let mut img = imaging::load_rgb(&entry.path, options.image_size)?;
            if let Some((augmenter, rng)) = augment.as_mut() {
                img = augmenter.augment(&img, rng);
            }
            items.push(ImageItem {
                image: imaging::to_chw(&img),
                label: entry.label,
            });
        }

        let batch: ImageBatch<B> = batcher.batch(items, device);
        let output = extractor.extract(batch.images);

        let [n, c, h, w] = output.dims();
        if n != chunk.len() || [c, h, w] != feature_shape {
            return Err(XrayError::ShapeMismatch {
                context: format!("{} output", extractor.name()),
                expected: format!("[{}, {:?}]", chunk.len(), feature_shape),
                found: format!("{:?}", [n, c, h, w]),
            });
        }

        let values: Vec<f32> = output
            .into_data()
            .convert::<f32>()
            .to_vec()
            .map_err(|e| XrayError::Model(format!("Failed to read extractor output: {:?}", e)))?;
        features.extend(values);
        progress.inc(chunk.len() as u64);
        debug!("{} split: {} / {} images extracted", manifest.split, features.len() / row_len, manifest.len());
    }
    progress.finish_and_clear();

    FeatureCache::new(
        manifest.clone(),
        feature_shape,
        features,
        ExtractorDescriptor {
            name: extractor.name(),
            image_size: options.image_size,
            augmented: options.augmentation.is_some(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::manifest::tests::write_split;
    use crate::dataset::DataSplit;
    use crate::model::Vgg16FeaturesConfig;
    use burn::backend::NdArray;
    use tempfile::tempdir;

    type TestBackend = NdArray;

    fn options(batch_size: usize) -> ExtractionOptions {
        ExtractionOptions {
            image_size: 32,
            batch_size,
            augmentation: None,
            show_progress: false,
        }
    }

    #[test]
    fn test_row_count_equals_image_count() {
        let dir = tempdir().unwrap();
        write_split(dir.path(), &[("NORMAL", 3, [10, 10, 10]), ("PNEUMONIA", 2, [240, 240, 240])]);
        let manifest = Manifest::from_directory(dir.path(), DataSplit::Train).unwrap();

        let device = Default::default();
        let extractor = Vgg16FeaturesConfig::new()
            .with_base_filters(2)
            .init::<TestBackend>(&device);

        // 5 images with batch size 2 leaves a final partial batch
        let cache = extract_split::<TestBackend, _>(&extractor, &manifest, &options(2), &device).unwrap();
        assert_eq!(cache.rows(), 5);
        assert_eq!(cache.feature_shape, [16, 1, 1]);
        assert_eq!(cache.features.len(), 5 * 16);
        assert_eq!(cache.labels(), vec![0, 0, 0, 1, 1]);
        assert!(cache.labels().iter().all(|&l| l <= 1));
    }

    #[test]
    fn test_batch_size_does_not_change_features() {
        let dir = tempdir().unwrap();
        write_split(dir.path(), &[("NORMAL", 2, [30, 60, 90]), ("PNEUMONIA", 1, [200, 100, 0])]);
        let manifest = Manifest::from_directory(dir.path(), DataSplit::Validation).unwrap();

        let device = Default::default();
        let extractor = Vgg16FeaturesConfig::new()
            .with_base_filters(2)
            .init::<TestBackend>(&device);

        let a = extract_split::<TestBackend, _>(&extractor, &manifest, &options(1), &device).unwrap();
        let b = extract_split::<TestBackend, _>(&extractor, &manifest, &options(3), &device).unwrap();
        for (x, y) in a.features.iter().zip(&b.features) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn test_unreadable_image_is_fatal() {
        let dir = tempdir().unwrap();
        write_split(dir.path(), &[("NORMAL", 1, [0, 0, 0]), ("PNEUMONIA", 1, [255, 255, 255])]);
        std::fs::write(dir.path().join("PNEUMONIA").join("broken.png"), b"nope").unwrap();
        let manifest = Manifest::from_directory(dir.path(), DataSplit::Train).unwrap();

        let device = Default::default();
        let extractor = Vgg16FeaturesConfig::new()
            .with_base_filters(2)
            .init::<TestBackend>(&device);
        let err = extract_split::<TestBackend, _>(&extractor, &manifest, &options(4), &device).unwrap_err();
        assert!(matches!(err, XrayError::ImageLoad(..)));
    }
}
