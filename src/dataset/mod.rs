//! Dataset module: split manifests, image decoding, augmentation and batching
//!
//! Expected layout per split:
//! ```text
//! train/
//! ├── NORMAL/
//! └── PNEUMONIA/
//! ```
//! Class indices follow sorted directory names, so `NORMAL = 0` and
//! `PNEUMONIA = 1`.

pub mod augmentation;
pub mod batcher;
pub mod imaging;
pub mod manifest;

pub use augmentation::Augmenter;
pub use batcher::{FeatureBatch, FeatureBatcher, FeatureItem, ImageBatch, ImageBatcher, ImageItem};
pub use manifest::{DataSplit, DatasetStats, Manifest, ManifestEntry, NUM_CLASSES};
