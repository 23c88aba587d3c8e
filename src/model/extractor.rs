//! Frozen convolutional feature extractor
//!
//! The shipped extractor is the VGG16 convolutional base: five blocks of
//! 3x3 convolutions (2, 2, 3, 3, 3 layers) with ReLU, each followed by a
//! 2x2 max-pool. A 224 px image becomes a `[512, 7, 7]` feature map.
//!
//! Weights are never updated. They come either from a pretrained Burn
//! record or from a seeded initialization that is snapshotted to disk, so
//! feature caching and inference always run the same network.

use std::path::{Path, PathBuf};

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        PaddingConfig2d, Relu,
    },
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{backend::Backend, Tensor},
};
use tracing::{info, warn};

use crate::utils::error::{self, XrayError};

/// Extractor weights are stored at full precision
pub type ExtractorRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Extension the extractor recorder appends to file stems
pub const EXTRACTOR_EXTENSION: &str = "mpk";

/// Extension of the architecture file written next to the weights
pub const EXTRACTOR_CONFIG_EXTENSION: &str = "json";

/// A frozen image-to-feature-map network
pub trait FeatureExtractor<B: Backend> {
    /// `[batch, 3, size, size]` in `[0, 1]` to `[batch, C, H, W]`
    fn extract(&self, images: Tensor<B, 4>) -> Tensor<B, 4>;

    /// Per-sample output shape for square inputs of `image_size`
    fn output_shape(&self, image_size: usize) -> [usize; 3];

    fn name(&self) -> String;
}

/// VGG16 blocks as `(convolutions, channel multiplier)`
const VGG16_BLOCKS: [(usize, usize); 5] = [(2, 1), (2, 2), (3, 4), (3, 8), (3, 8)];

#[derive(Config, Debug)]
pub struct Vgg16FeaturesConfig {
    #[config(default = "3")]
    pub in_channels: usize,

    /// Width of the first block; later blocks use 2x, 4x, 8x, 8x
    #[config(default = "64")]
    pub base_filters: usize,
}

impl Vgg16FeaturesConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Vgg16Features<B> {
        let mut blocks = Vec::with_capacity(VGG16_BLOCKS.len());
        let mut channels = self.in_channels;

        for (convs, multiplier) in VGG16_BLOCKS {
            let out_channels = self.base_filters * multiplier;
            blocks.push(VggBlock::new(channels, out_channels, convs, device));
            channels = out_channels;
        }

        Vgg16Features {
            blocks,
            out_channels: channels,
        }
    }

    pub fn output_shape(&self, image_size: usize) -> [usize; 3] {
        let spatial = VGG16_BLOCKS.iter().fold(image_size, |size, _| size / 2);
        [self.base_filters * 8, spatial, spatial]
    }
}

#[derive(Module, Debug)]
pub struct VggBlock<B: Backend> {
    convs: Vec<Conv2d<B>>,
    relu: Relu,
    pool: MaxPool2d,
}

impl<B: Backend> VggBlock<B> {
    fn new(in_channels: usize, out_channels: usize, depth: usize, device: &B::Device) -> Self {
        let convs = (0..depth)
            .map(|i| {
                let input = if i == 0 { in_channels } else { out_channels };
                Conv2dConfig::new([input, out_channels], [3, 3])
                    .with_padding(PaddingConfig2d::Same)
                    .init(device)
            })
            .collect();

        Self {
            convs,
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self
            .convs
            .iter()
            .fold(x, |x, conv| self.relu.forward(conv.forward(x)));
        self.pool.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct Vgg16Features<B: Backend> {
    blocks: Vec<VggBlock<B>>,
    out_channels: usize,
}

impl<B: Backend> Vgg16Features<B> {
    /// Load weights from a Burn record written with [`ExtractorRecorder`]
    pub fn load(config: &Vgg16FeaturesConfig, path: &Path, device: &B::Device) -> error::Result<Self> {
        let file = weights_file(path);
        if !file.exists() {
            return Err(XrayError::PathNotFound(file));
        }
        if let Some(stored) = stored_config(path)? {
            if !same_architecture(&stored, config) {
                return Err(XrayError::Model(format!(
                    "{} holds an extractor with base_filters={} and in_channels={}, but base_filters={} and in_channels={} are configured",
                    file.display(),
                    stored.base_filters,
                    stored.in_channels,
                    config.base_filters,
                    config.in_channels
                )));
            }
        }

        config
            .init::<B>(device)
            .load_file(path.to_path_buf(), &ExtractorRecorder::new(), device)
            .map_err(|e| {
                XrayError::Model(format!(
                    "Failed to load extractor weights from {}: {:?}",
                    file.display(),
                    e
                ))
            })
    }

    /// Write the weights and the architecture they belong to
    pub fn save(&self, config: &Vgg16FeaturesConfig, path: &Path) -> error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.clone()
            .save_file(path.to_path_buf(), &ExtractorRecorder::new())
            .map_err(|e| XrayError::Model(format!("Failed to save extractor: {:?}", e)))?;
        config.save(config_file(path))?;
        Ok(())
    }
}

impl<B: Backend> FeatureExtractor<B> for Vgg16Features<B> {
    fn extract(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks
            .iter()
            .fold(images, |x, block| block.forward(x))
    }

    fn output_shape(&self, image_size: usize) -> [usize; 3] {
        let spatial = self.blocks.iter().fold(image_size, |size, _| size / 2);
        [self.out_channels, spatial, spatial]
    }

    fn name(&self) -> String {
        format!("vgg16-conv-base(width={})", self.out_channels / 8)
    }
}

/// Resolved file written by the recorder for a weights stem
pub fn weights_file(path: &Path) -> PathBuf {
    path.with_extension(EXTRACTOR_EXTENSION)
}

/// Architecture file stored next to a weights stem
pub fn config_file(path: &Path) -> PathBuf {
    path.with_extension(EXTRACTOR_CONFIG_EXTENSION)
}

/// Architecture recorded next to the weights, if any
pub fn stored_config(path: &Path) -> error::Result<Option<Vgg16FeaturesConfig>> {
    let file = config_file(path);
    if !file.exists() {
        return Ok(None);
    }
    Vgg16FeaturesConfig::load(&file).map(Some).map_err(|e| {
        XrayError::Model(format!("Failed to read extractor config {}: {}", file.display(), e))
    })
}

fn same_architecture(a: &Vgg16FeaturesConfig, b: &Vgg16FeaturesConfig) -> bool {
    a.base_filters == b.base_filters && a.in_channels == b.in_channels
}

/// Key remaps from a torchvision `vgg16().features` state dict onto
/// [`Vgg16Features`]
///
/// torchvision numbers every layer of `features` (convolutions, ReLUs and
/// pools alike), so each convolution index is mapped to its block and
/// position explicitly.
pub fn torchvision_key_remaps() -> Vec<(String, String)> {
    let mut remaps = Vec::new();
    let mut layer = 0;
    for (block, (convs, _)) in VGG16_BLOCKS.iter().enumerate() {
        for conv in 0..*convs {
            remaps.push((
                format!(r"^features\.{}\.", layer),
                format!("blocks.{}.convs.{}.", block, conv),
            ));
            // conv + relu
            layer += 2;
        }
        // pool
        layer += 1;
    }
    remaps
}

/// Where the extractor weights came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractorSource {
    Pretrained(PathBuf),
    Snapshot(PathBuf),
    /// Freshly initialized and written to the contained snapshot path
    Initialized(PathBuf),
}

/// Extractor for the caching stage
///
/// Uses configured pretrained weights, else an existing snapshot, else a
/// seeded initialization which is written to `snapshot`.
pub fn prepare_extractor<B: Backend>(
    config: &Vgg16FeaturesConfig,
    pretrained: Option<&Path>,
    snapshot: &Path,
    seed: u64,
    device: &B::Device,
) -> error::Result<(Vgg16Features<B>, ExtractorSource)> {
    if let Some(path) = pretrained {
        info!("Loading pretrained extractor weights from {}", path.display());
        let model = Vgg16Features::load(config, path, device)?;
        return Ok((model, ExtractorSource::Pretrained(path.to_path_buf())));
    }

    if weights_file(snapshot).exists() {
        match stored_config(snapshot)? {
            Some(stored) if !same_architecture(&stored, config) => {
                warn!(
                    "Extractor snapshot {} has base_filters={}, configured {}; regenerating",
                    weights_file(snapshot).display(),
                    stored.base_filters,
                    config.base_filters
                );
            }
            _ => {
                info!("Reusing extractor snapshot {}", weights_file(snapshot).display());
                let model = Vgg16Features::load(config, snapshot, device)?;
                return Ok((model, ExtractorSource::Snapshot(snapshot.to_path_buf())));
            }
        }
    }

    warn!("No pretrained extractor weights configured; using seeded initialization (seed {})", seed);
    B::seed(seed);
    let model = config.init::<B>(device);
    model.save(config, snapshot)?;
    Ok((model, ExtractorSource::Initialized(snapshot.to_path_buf())))
}

/// Extractor for the inference stage; never initializes new weights
pub fn load_extractor<B: Backend>(
    config: &Vgg16FeaturesConfig,
    pretrained: Option<&Path>,
    snapshot: &Path,
    device: &B::Device,
) -> error::Result<Vgg16Features<B>> {
    match pretrained {
        Some(path) => Vgg16Features::load(config, path, device),
        None => Vgg16Features::load(config, snapshot, device).map_err(|e| match e {
            XrayError::PathNotFound(p) => XrayError::Model(format!(
                "extractor snapshot {} not found; run feature extraction first",
                p.display()
            )),
            other => other,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;
    use tempfile::tempdir;

    type TestBackend = NdArray;

    fn tiny() -> Vgg16FeaturesConfig {
        Vgg16FeaturesConfig::new().with_base_filters(2)
    }

    #[test]
    fn test_standard_output_shape() {
        assert_eq!(Vgg16FeaturesConfig::new().output_shape(224), [512, 7, 7]);
        assert_eq!(Vgg16FeaturesConfig::new().output_shape(150), [512, 4, 4]);
    }

    #[test]
    fn test_forward_matches_declared_shape() {
        let device = Default::default();
        let model = tiny().init::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::random([2, 3, 32, 32], Distribution::Default, &device);
        let features = model.extract(images);

        assert_eq!(features.dims(), [2, 16, 1, 1]);
        assert_eq!(model.output_shape(32), [16, 1, 1]);
        assert_eq!(tiny().output_shape(32), [16, 1, 1]);
    }

    #[test]
    fn test_snapshot_reuse_gives_identical_features() {
        let dir = tempdir().unwrap();
        let snapshot = dir.path().join("feature_extractor");
        let device = Default::default();

        let (first, source) =
            prepare_extractor::<TestBackend>(&tiny(), None, &snapshot, 7, &device).unwrap();
        assert!(matches!(source, ExtractorSource::Initialized(_)));
        assert!(weights_file(&snapshot).exists());

        let (_, source) =
            prepare_extractor::<TestBackend>(&tiny(), None, &snapshot, 7, &device).unwrap();
        assert!(matches!(source, ExtractorSource::Snapshot(_)));

        let reloaded = load_extractor::<TestBackend>(&tiny(), None, &snapshot, &device).unwrap();
        let images = Tensor::<TestBackend, 4>::random([1, 3, 32, 32], Distribution::Default, &device);
        let a: Vec<f32> = first.extract(images.clone()).into_data().convert::<f32>().to_vec().unwrap();
        let b: Vec<f32> = reloaded.extract(images).into_data().convert::<f32>().to_vec().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_load_missing_weights() {
        let device = Default::default();
        let err = load_extractor::<TestBackend>(&tiny(), None, Path::new("/missing/extractor"), &device)
            .unwrap_err();
        assert!(matches!(err, XrayError::Model(msg) if msg.contains("feature extraction")));

        let err = load_extractor::<TestBackend>(
            &tiny(),
            Some(Path::new("/missing/vgg16")),
            Path::new("/missing/extractor"),
            &device,
        )
        .unwrap_err();
        assert!(matches!(err, XrayError::PathNotFound(_)));
    }

    #[test]
    fn test_snapshot_regenerated_when_width_changes() {
        let dir = tempdir().unwrap();
        let snapshot = dir.path().join("feature_extractor");
        let device = Default::default();

        prepare_extractor::<TestBackend>(&tiny(), None, &snapshot, 7, &device).unwrap();
        assert_eq!(stored_config(&snapshot).unwrap().unwrap().base_filters, 2);

        let wider = Vgg16FeaturesConfig::new().with_base_filters(4);
        let (model, source) = prepare_extractor::<TestBackend>(&wider, None, &snapshot, 7, &device).unwrap();
        assert!(matches!(source, ExtractorSource::Initialized(_)));
        assert_eq!(model.output_shape(32), [32, 1, 1]);
        assert_eq!(stored_config(&snapshot).unwrap().unwrap().base_filters, 4);

        let images = Tensor::<TestBackend, 4>::random([3, 3, 32, 32], Distribution::Default, &device);
        assert_eq!(model.extract(images).dims(), [3, 32, 1, 1]);
    }

    #[test]
    fn test_load_rejects_other_width() {
        let dir = tempdir().unwrap();
        let snapshot = dir.path().join("feature_extractor");
        let device = Default::default();
        prepare_extractor::<TestBackend>(&tiny(), None, &snapshot, 7, &device).unwrap();

        let wider = Vgg16FeaturesConfig::new().with_base_filters(4);
        let err = load_extractor::<TestBackend>(&wider, None, &snapshot, &device).unwrap_err();
        assert!(matches!(err, XrayError::Model(msg) if msg.contains("base_filters=2")));
    }

    #[test]
    fn test_torchvision_key_remaps() {
        let remaps = torchvision_key_remaps();
        assert_eq!(remaps.len(), 13);

        let expected = [
            (0, "blocks.0.convs.0."),
            (2, "blocks.0.convs.1."),
            (5, "blocks.1.convs.0."),
            (7, "blocks.1.convs.1."),
            (10, "blocks.2.convs.0."),
            (14, "blocks.2.convs.2."),
            (17, "blocks.3.convs.0."),
            (21, "blocks.3.convs.2."),
            (24, "blocks.4.convs.0."),
            (28, "blocks.4.convs.2."),
        ];
        for (layer, target) in expected {
            let pattern = format!(r"^features\.{}\.", layer);
            let (_, replacement) = remaps.iter().find(|(p, _)| *p == pattern).unwrap();
            assert_eq!(replacement, target);
        }
    }
}
