//! Burn batchers for images (extraction) and cached features (training)

use burn::{data::dataloader::batcher::Batcher, prelude::*};

/// A decoded image in CHW layout with values in `[0, 1]`
#[derive(Debug, Clone)]
pub struct ImageItem {
    pub image: Vec<f32>,
    pub label: usize,
}

#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    /// `[batch, 3, size, size]`
    pub images: Tensor<B, 4>,
}

#[derive(Clone, Debug)]
pub struct ImageBatcher {
    image_size: usize,
}

impl ImageBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let data: Vec<f32> = items.into_iter().flat_map(|item| item.image).collect();

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(data, [batch_size, 3, self.image_size, self.image_size]),
            device,
        );
        ImageBatch { images }
    }
}

/// One cached feature map and its label
#[derive(Debug, Clone)]
pub struct FeatureItem {
    pub features: Vec<f32>,
    pub label: usize,
}

#[derive(Debug, Clone)]
pub struct FeatureBatch<B: Backend> {
    /// `[batch, C, H, W]`
    pub features: Tensor<B, 4>,
    /// `[batch]`, values in {0, 1}
    pub targets: Tensor<B, 1, Int>,
    pub labels: Vec<usize>,
}

#[derive(Clone, Debug)]
pub struct FeatureBatcher {
    feature_shape: [usize; 3],
}

impl FeatureBatcher {
    pub fn new(feature_shape: [usize; 3]) -> Self {
        Self { feature_shape }
    }
}

impl<B: Backend> Batcher<B, FeatureItem, FeatureBatch<B>> for FeatureBatcher {
    fn batch(&self, items: Vec<FeatureItem>, device: &B::Device) -> FeatureBatch<B> {
        let batch_size = items.len();
        let [c, h, w] = self.feature_shape;

        let labels: Vec<usize> = items.iter().map(|item| item.label).collect();
        let data: Vec<f32> = items.into_iter().flat_map(|item| item.features).collect();

        let features =
            Tensor::<B, 4>::from_floats(TensorData::new(data, [batch_size, c, h, w]), device);
        let targets_data: Vec<i64> = labels.iter().map(|&l| l as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        FeatureBatch {
            features,
            targets,
            labels,
        }
    }
}
