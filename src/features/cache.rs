//! On-disk feature cache
//!
//! One file per split holding the manifest, the per-sample feature shape
//! and a dense `f32` buffer of `len * C * H * W` values. Row `i` belongs to
//! manifest entry `i`.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::{DataSplit, FeatureItem, Manifest};
use crate::utils::error::{Result, XrayError};

pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Which network produced the features, and at what input size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractorDescriptor {
    pub name: String,
    pub image_size: usize,
    pub augmented: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureCache {
    pub version: u32,
    pub manifest: Manifest,
    pub feature_shape: [usize; 3],
    pub extractor: ExtractorDescriptor,
    pub created_at: DateTime<Utc>,
    pub features: Vec<f32>,
}

impl FeatureCache {
    pub fn new(
        manifest: Manifest,
        feature_shape: [usize; 3],
        features: Vec<f32>,
        extractor: ExtractorDescriptor,
    ) -> Result<Self> {
        let cache = Self {
            version: CACHE_FORMAT_VERSION,
            manifest,
            feature_shape,
            extractor,
            created_at: Utc::now(),
            features,
        };
        cache.validate(Path::new("<memory>"))?;
        Ok(cache)
    }

    pub fn split(&self) -> DataSplit {
        self.manifest.split
    }

    /// Number of cached samples
    pub fn rows(&self) -> usize {
        self.manifest.len()
    }

    /// Values per sample, `C * H * W`
    pub fn row_len(&self) -> usize {
        self.feature_shape.iter().product()
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        let len = self.row_len();
        self.features.get(index * len..(index + 1) * len)
    }

    pub fn labels(&self) -> Vec<usize> {
        self.manifest.labels()
    }

    /// Feature rows must match manifest entries, labels must be binary
    pub fn validate(&self, path: &Path) -> Result<()> {
        if self.version != CACHE_FORMAT_VERSION {
            return Err(XrayError::FeatureCache {
                path: path.to_path_buf(),
                reason: format!(
                    "unsupported format version {} (expected {})",
                    self.version, CACHE_FORMAT_VERSION
                ),
            });
        }

        let row_len = self.row_len();
        if row_len == 0 {
            return Err(XrayError::FeatureCache {
                path: path.to_path_buf(),
                reason: format!("empty feature shape {:?}", self.feature_shape),
            });
        }

        let expected = self.rows() * row_len;
        if self.features.len() != expected {
            return Err(XrayError::ShapeMismatch {
                context: format!("{} feature cache {}", self.split(), path.display()),
                expected: format!("{} values ({} rows x {:?})", expected, self.rows(), self.feature_shape),
                found: format!("{} values", self.features.len()),
            });
        }

        let num_classes = self.manifest.class_names.len();
        if let Some(entry) = self.manifest.entries.iter().find(|e| e.label >= num_classes) {
            return Err(XrayError::FeatureCache {
                path: path.to_path_buf(),
                reason: format!("label {} of {} out of range", entry.label, entry.path.display()),
            });
        }
        Ok(())
    }

    /// Write atomically: a temporary sibling file is renamed into place
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = tmp_path(path);
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            bincode::serialize_into(&mut writer, self)?;
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;

        info!(
            "Saved {} feature cache: {} rows x {:?} -> {}",
            self.split(),
            self.rows(),
            self.feature_shape,
            path.display()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(XrayError::PathNotFound(path.to_path_buf()));
        }

        let reader = BufReader::new(File::open(path)?);
        let cache: Self = bincode::deserialize_from(reader).map_err(|e| XrayError::FeatureCache {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        cache.validate(path)?;
        Ok(cache)
    }

    /// Train and validation caches must be interchangeable inputs to one head
    pub fn ensure_compatible(&self, other: &FeatureCache) -> Result<()> {
        if self.feature_shape != other.feature_shape {
            return Err(XrayError::ShapeMismatch {
                context: format!("{} vs {} feature caches", self.split(), other.split()),
                expected: format!("{:?}", self.feature_shape),
                found: format!("{:?}", other.feature_shape),
            });
        }
        if self.extractor.name != other.extractor.name
            || self.extractor.image_size != other.extractor.image_size
        {
            return Err(XrayError::Dataset(format!(
                "{} and {} caches were produced by different extractors ({:?} vs {:?})",
                self.split(),
                other.split(),
                self.extractor,
                other.extractor
            )));
        }
        self.manifest.ensure_same_classes(&other.manifest)
    }
}

impl Dataset<FeatureItem> for FeatureCache {
    fn get(&self, index: usize) -> Option<FeatureItem> {
        let features = self.row(index)?.to_vec();
        let label = self.manifest.entries.get(index)?.label;
        Some(FeatureItem { features, label })
    }

    fn len(&self) -> usize {
        self.rows()
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dataset::ManifestEntry;
    use tempfile::tempdir;

    pub(crate) fn synthetic_cache(split: DataSplit, labels: &[usize], shape: [usize; 3]) -> FeatureCache {
        let row_len: usize = shape.iter().product();
        let entries = labels
            .iter()
            .enumerate()
            .map(|(i, &label)| ManifestEntry {
                path: PathBuf::from(format!("img_{i}.png")),
                label,
            })
            .collect();
        let features = labels
            .iter()
            .flat_map(|&l| vec![if l == 1 { 1.0 } else { -1.0 }; row_len])
            .collect();

        FeatureCache::new(
            Manifest {
                split,
                class_names: vec!["NORMAL".to_string(), "PNEUMONIA".to_string()],
                entries,
            },
            shape,
            features,
            ExtractorDescriptor {
                name: "test".to_string(),
                image_size: 32,
                augmented: false,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bottleneck_features_train.bin");
        let cache = synthetic_cache(DataSplit::Train, &[0, 1, 1], [2, 1, 1]);
        cache.save(&path).unwrap();

        let loaded = FeatureCache::load(&path).unwrap();
        assert_eq!(loaded.rows(), 3);
        assert_eq!(loaded.labels(), vec![0, 1, 1]);
        assert_eq!(loaded.row(1), Some(&[1.0f32, 1.0][..]));
        assert_eq!(loaded.manifest, cache.manifest);
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn test_row_count_must_match_manifest() {
        let mut cache = synthetic_cache(DataSplit::Validation, &[0, 1], [2, 1, 1]);
        cache.features.pop();
        let err = cache.validate(Path::new("val.bin")).unwrap_err();
        assert!(matches!(err, XrayError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_load_missing_and_corrupt() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.bin");
        assert!(matches!(FeatureCache::load(&missing), Err(XrayError::PathNotFound(_))));

        let corrupt = dir.path().join("corrupt.bin");
        fs::write(&corrupt, b"garbage").unwrap();
        assert!(matches!(
            FeatureCache::load(&corrupt),
            Err(XrayError::FeatureCache { .. })
        ));
    }

    #[test]
    fn test_incompatible_shapes() {
        let train = synthetic_cache(DataSplit::Train, &[0, 1], [2, 1, 1]);
        let val = synthetic_cache(DataSplit::Validation, &[0, 1], [4, 1, 1]);
        assert!(train.ensure_compatible(&val).is_err());
    }

    #[test]
    fn test_dataset_items() {
        let cache = synthetic_cache(DataSplit::Train, &[1, 0], [1, 2, 1]);
        assert_eq!(Dataset::len(&cache), 2);
        let item = cache.get(1).unwrap();
        assert_eq!(item.label, 0);
        assert_eq!(item.features, vec![-1.0, -1.0]);
        assert!(cache.get(2).is_none());
    }
}
