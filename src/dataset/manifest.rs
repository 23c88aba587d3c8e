//! Split manifests
//!
//! A manifest is the ordered list of `(path, label)` pairs for one split.
//! It is built once per split and travels with the cached features, so
//! labels never have to be re-derived from directory order.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::utils::error::{Result, ResultExt, XrayError};

/// Binary task: exactly two class directories per split
pub const NUM_CLASSES: usize = 2;

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Dataset split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataSplit {
    Train,
    Validation,
    Test,
}

impl fmt::Display for DataSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSplit::Train => write!(f, "train"),
            DataSplit::Validation => write!(f, "validation"),
            DataSplit::Test => write!(f, "test"),
        }
    }
}

/// One image and its class index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: PathBuf,
    /// 0 = normal, 1 = pneumonia (sorted class-directory order)
    pub label: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub split: DataSplit,
    /// Class directory names, index = label
    pub class_names: Vec<String>,
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Scan `root/<class>/<image>` in sorted order
    ///
    /// ```text
    /// root/
    /// ├── NORMAL/
    /// │   └── IM-0001-0001.jpeg
    /// └── PNEUMONIA/
    ///     └── person1_bacteria_1.jpeg
    /// ```
    pub fn from_directory(root: &Path, split: DataSplit) -> Result<Self> {
        if !root.is_dir() {
            return Err(XrayError::PathNotFound(root.to_path_buf()));
        }

        let mut class_dirs: Vec<PathBuf> = Vec::new();
        for entry in WalkDir::new(root).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to read {}", root.display()))?;
            if entry.file_type().is_dir() && !is_hidden(entry.path()) {
                class_dirs.push(entry.into_path());
            }
        }
        class_dirs.sort();

        if class_dirs.len() != NUM_CLASSES {
            return Err(XrayError::Dataset(format!(
                "{} split at {} must contain exactly {} class directories, found {}",
                split,
                root.display(),
                NUM_CLASSES,
                class_dirs.len()
            )));
        }

        let mut class_names = Vec::with_capacity(NUM_CLASSES);
        let mut entries = Vec::new();
        for (label, class_dir) in class_dirs.iter().enumerate() {
            let name = class_dir
                .file_name()
                .and_then(|n| n.to_str())
                .with_context(|| format!("non UTF-8 class directory {}", class_dir.display()))?
                .to_string();

            let before = entries.len();
            entries.extend(
                WalkDir::new(class_dir)
                    .min_depth(1)
                    .max_depth(1)
                    .sort_by_file_name()
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file() && is_image_file(e.path()))
                    .map(|e| ManifestEntry {
                        path: e.into_path(),
                        label,
                    }),
            );

            let count = entries.len() - before;
            if count == 0 {
                warn!("{} split: class '{}' has no images", split, name);
            }
            debug!("{} split: class '{}' -> label {} ({} images)", split, name, label, count);
            class_names.push(name);
        }

        if entries.is_empty() {
            return Err(XrayError::Dataset(format!(
                "{} split at {} contains no images",
                split,
                root.display()
            )));
        }

        let manifest = Self {
            split,
            class_names,
            entries,
        };
        info!(
            "Built {} manifest: {} images {:?}",
            split,
            manifest.len(),
            manifest.class_counts()
        );
        Ok(manifest)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn labels(&self) -> Vec<usize> {
        self.entries.iter().map(|e| e.label).collect()
    }

    /// Number of images per class, indexed by label
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.class_names.len()];
        for entry in &self.entries {
            if let Some(c) = counts.get_mut(entry.label) {
                *c += 1;
            }
        }
        counts
    }

    /// Splits must agree on class names so labels mean the same thing
    pub fn ensure_same_classes(&self, other: &Manifest) -> Result<()> {
        if self.class_names != other.class_names {
            return Err(XrayError::Dataset(format!(
                "class directories differ between {} {:?} and {} {:?}",
                self.split, self.class_names, other.split, other.class_names
            )));
        }
        Ok(())
    }

    pub fn stats(&self) -> DatasetStats {
        DatasetStats {
            split: self.split,
            total: self.len(),
            per_class: self
                .class_names
                .iter()
                .cloned()
                .zip(self.class_counts())
                .collect(),
        }
    }
}

/// Per-class image counts of one split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub split: DataSplit,
    pub total: usize,
    pub per_class: Vec<(String, usize)>,
}

impl fmt::Display for DatasetStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({} images)", self.split, self.total)?;
        for (name, count) in &self.per_class {
            let share = if self.total > 0 {
                100.0 * *count as f64 / self.total as f64
            } else {
                0.0
            };
            writeln!(f, "  {:<12} {:>6} ({:.1}%)", name, count, share)?;
        }
        Ok(())
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::fs;
    use tempfile::tempdir;

    /// Write uniform-colour PNGs under `root/<class>/img_<i>.png`
    pub(crate) fn write_split(root: &Path, classes: &[(&str, usize, [u8; 3])]) {
        for (class, count, color) in classes {
            let dir = root.join(class);
            fs::create_dir_all(&dir).unwrap();
            for i in 0..*count {
                RgbImage::from_pixel(40, 40, Rgb(*color))
                    .save(dir.join(format!("img_{i}.png")))
                    .unwrap();
            }
        }
    }

    #[test]
    fn test_manifest_order_and_labels() {
        let dir = tempdir().unwrap();
        write_split(
            dir.path(),
            &[("PNEUMONIA", 3, [200, 200, 200]), ("NORMAL", 2, [20, 20, 20])],
        );
        fs::write(dir.path().join("NORMAL").join("notes.txt"), "skip me").unwrap();

        let manifest = Manifest::from_directory(dir.path(), DataSplit::Train).unwrap();
        assert_eq!(manifest.class_names, vec!["NORMAL", "PNEUMONIA"]);
        assert_eq!(manifest.labels(), vec![0, 0, 1, 1, 1]);
        assert_eq!(manifest.class_counts(), vec![2, 3]);
        assert!(manifest.entries[0].path.ends_with("NORMAL/img_0.png"));
        assert!(manifest.entries[4].path.ends_with("PNEUMONIA/img_2.png"));
    }

    #[test]
    fn test_manifest_is_deterministic() {
        let dir = tempdir().unwrap();
        write_split(dir.path(), &[("NORMAL", 4, [0, 0, 0]), ("PNEUMONIA", 4, [255, 255, 255])]);

        let a = Manifest::from_directory(dir.path(), DataSplit::Test).unwrap();
        let b = Manifest::from_directory(dir.path(), DataSplit::Test).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_wrong_class_count() {
        let dir = tempdir().unwrap();
        write_split(
            dir.path(),
            &[("NORMAL", 1, [0, 0, 0]), ("PNEUMONIA", 1, [9, 9, 9]), ("COVID", 1, [5, 5, 5])],
        );
        let err = Manifest::from_directory(dir.path(), DataSplit::Train).unwrap_err();
        assert!(matches!(err, XrayError::Dataset(msg) if msg.contains("found 3")));
    }

    #[test]
    fn test_missing_directory() {
        let err = Manifest::from_directory(Path::new("/no/such/split"), DataSplit::Validation)
            .unwrap_err();
        assert!(matches!(err, XrayError::PathNotFound(_)));
    }

    #[test]
    fn test_empty_split() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("NORMAL")).unwrap();
        fs::create_dir_all(dir.path().join("PNEUMONIA")).unwrap();
        assert!(Manifest::from_directory(dir.path(), DataSplit::Train).is_err());
    }

    #[test]
    fn test_class_mismatch_between_splits() {
        let train_dir = tempdir().unwrap();
        let val_dir = tempdir().unwrap();
        write_split(train_dir.path(), &[("NORMAL", 1, [0, 0, 0]), ("PNEUMONIA", 1, [9, 9, 9])]);
        write_split(val_dir.path(), &[("HEALTHY", 1, [0, 0, 0]), ("PNEUMONIA", 1, [9, 9, 9])]);

        let train = Manifest::from_directory(train_dir.path(), DataSplit::Train).unwrap();
        let val = Manifest::from_directory(val_dir.path(), DataSplit::Validation).unwrap();
        assert!(train.ensure_same_classes(&val).is_err());
    }

    #[test]
    fn test_stats_display() {
        let dir = tempdir().unwrap();
        write_split(dir.path(), &[("NORMAL", 1, [0, 0, 0]), ("PNEUMONIA", 3, [9, 9, 9])]);
        let stats = Manifest::from_directory(dir.path(), DataSplit::Train).unwrap().stats();
        let text = stats.to_string();
        assert!(text.contains("train (4 images)"));
        assert!(text.contains("75.0%"));
    }
}
