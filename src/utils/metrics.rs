//! Metrics Module for Binary Classification
//!
//! - Confusion matrix (rows = actual, cols = predicted)
//! - Per-class precision, recall, F1 and support, with macro and
//!   support-weighted averages
//! - ROC curve over every distinct score threshold and trapezoidal AUC

use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, XrayError};

/// Confusion matrix stored row-major, `matrix[actual * n + predicted]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub num_classes: usize,
    pub matrix: Vec<usize>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    /// Build from paired truth and prediction sequences
    pub fn from_predictions(
        actual: &[usize],
        predicted: &[usize],
        num_classes: usize,
    ) -> Result<Self> {
        if actual.len() != predicted.len() {
            return Err(XrayError::ShapeMismatch {
                context: "confusion matrix inputs".to_string(),
                expected: format!("{} predictions", actual.len()),
                found: format!("{} predictions", predicted.len()),
            });
        }

        let mut cm = Self::new(num_classes);
        for (&a, &p) in actual.iter().zip(predicted) {
            if a >= num_classes || p >= num_classes {
                return Err(XrayError::Evaluation(format!(
                    "label pair ({}, {}) outside 0..{}",
                    a, p, num_classes
                )));
            }
            cm.add(a, p);
        }
        Ok(cm)
    }

    pub fn add(&mut self, actual: usize, predicted: usize) {
        self.matrix[actual * self.num_classes + predicted] += 1;
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        self.matrix[actual * self.num_classes + predicted]
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct(), self.total())
    }

    /// Per-class counts of actual labels
    pub fn row_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|r| (0..self.num_classes).map(|c| self.get(r, c)).sum())
            .collect()
    }

    /// Per-class counts of predicted labels
    pub fn col_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|c| (0..self.num_classes).map(|r| self.get(r, c)).sum())
            .collect()
    }

    /// Nested rows, e.g. `[[tn, fp], [fn, tp]]` for two classes
    pub fn to_rows(&self) -> Vec<Vec<usize>> {
        self.matrix
            .chunks(self.num_classes.max(1))
            .map(|row| row.to_vec())
            .collect()
    }

    /// Text table with the diagonal highlighted
    pub fn display(&self, class_names: &[String]) -> String {
        let name = |i: usize| class_names.get(i).map(String::as_str).unwrap_or("?");
        let width = class_names
            .iter()
            .map(|n| n.len())
            .max()
            .unwrap_or(1)
            .max(6);

        let mut output = String::from("Confusion Matrix (rows=actual, cols=predicted):\n\n");
        output.push_str(&format!("{:>width$} ", "", width = width));
        for col in 0..self.num_classes {
            output.push_str(&format!("{:>width$} ", name(col), width = width + 2));
        }
        output.push('\n');

        for row in 0..self.num_classes {
            output.push_str(&format!("{:>width$} ", name(row), width = width));
            for col in 0..self.num_classes {
                let count = self.get(row, col);
                let cell = if row == col {
                    format!("[{}]", count)
                } else {
                    count.to_string()
                };
                output.push_str(&format!("{:>width$} ", cell, width = width + 2));
            }
            output.push('\n');
        }
        output
    }
}

/// Metrics for a single class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class_name: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Number of samples whose actual label is this class
    pub support: usize,
}

impl ClassMetrics {
    /// One-vs-rest metrics for `class_idx`; undefined ratios are reported as 0
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize, name: &str) -> Self {
        let tp = cm.get(class_idx, class_idx);
        let support = cm.row_sums()[class_idx];
        let predicted = cm.col_sums()[class_idx];

        let precision = ratio(tp, predicted);
        let recall = ratio(tp, support);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            class_name: name.to_string(),
            precision,
            recall,
            f1,
            support,
        }
    }
}

/// Averaged precision/recall/F1 across classes
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AveragedMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Per-class precision, recall, F1 and support plus summary rows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_avg: AveragedMetrics,
    pub weighted_avg: AveragedMetrics,
}

impl ClassificationReport {
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_names: &[String]) -> Self {
        let classes: Vec<ClassMetrics> = (0..cm.num_classes)
            .map(|i| {
                let name = class_names.get(i).map(String::as_str).unwrap_or("?");
                ClassMetrics::from_confusion_matrix(cm, i, name)
            })
            .collect();

        let total = cm.total();
        let n = classes.len().max(1) as f64;
        let macro_avg = AveragedMetrics {
            precision: classes.iter().map(|c| c.precision).sum::<f64>() / n,
            recall: classes.iter().map(|c| c.recall).sum::<f64>() / n,
            f1: classes.iter().map(|c| c.f1).sum::<f64>() / n,
            support: total,
        };

        let weighted = |f: fn(&ClassMetrics) -> f64| {
            if total == 0 {
                0.0
            } else {
                classes.iter().map(|c| f(c) * c.support as f64).sum::<f64>() / total as f64
            }
        };
        let weighted_avg = AveragedMetrics {
            precision: weighted(|c| c.precision),
            recall: weighted(|c| c.recall),
            f1: weighted(|c| c.f1),
            support: total,
        };

        Self {
            accuracy: cm.accuracy(),
            classes,
            macro_avg,
            weighted_avg,
        }
    }
}

impl std::fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let width = self
            .classes
            .iter()
            .map(|c| c.class_name.len())
            .max()
            .unwrap_or(0)
            .max("weighted avg".len());

        writeln!(
            f,
            "{:>width$} {:>10} {:>10} {:>10} {:>10}",
            "", "precision", "recall", "f1-score", "support",
            width = width
        )?;
        writeln!(f)?;
        for c in &self.classes {
            writeln!(
                f,
                "{:>width$} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                c.class_name, c.precision, c.recall, c.f1, c.support,
                width = width
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>width$} {:>10} {:>10} {:>10.2} {:>10}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support,
            width = width
        )?;
        for (label, avg) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            writeln!(
                f,
                "{:>width$} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                label, avg.precision, avg.recall, avg.f1, avg.support,
                width = width
            )?;
        }
        Ok(())
    }
}

/// Receiver operating characteristic curve
///
/// Points are ordered by decreasing threshold. The first point is `(0, 0)`
/// with an infinite threshold; each following point corresponds to one
/// distinct score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocCurve {
    pub fpr: Vec<f64>,
    pub tpr: Vec<f64>,
    /// The leading infinite threshold is stored as `null` in JSON
    #[serde(with = "open_thresholds")]
    pub thresholds: Vec<f64>,
}

mod open_thresholds {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(thresholds: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(thresholds.iter().map(|t| t.is_finite().then_some(*t)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let thresholds = Vec::<Option<f64>>::deserialize(deserializer)?;
        Ok(thresholds.into_iter().map(|t| t.unwrap_or(f64::INFINITY)).collect())
    }
}

impl RocCurve {
    /// Whether both classes occur in `labels`
    pub fn is_defined(labels: &[usize]) -> bool {
        labels.contains(&0) && labels.contains(&1)
    }

    /// Build from binary truth labels and positive-class scores
    pub fn from_scores(labels: &[usize], scores: &[f32]) -> Result<Self> {
        if labels.len() != scores.len() {
            return Err(XrayError::ShapeMismatch {
                context: "ROC inputs".to_string(),
                expected: format!("{} scores", labels.len()),
                found: format!("{} scores", scores.len()),
            });
        }
        if let Some(bad) = labels.iter().find(|&&l| l > 1) {
            return Err(XrayError::Evaluation(format!("non-binary label {}", bad)));
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(XrayError::Evaluation("scores contain NaN or infinity".to_string()));
        }

        let positives = labels.iter().filter(|&&l| l == 1).count();
        let negatives = labels.len() - positives;
        if positives == 0 || negatives == 0 {
            return Err(XrayError::Evaluation(format!(
                "ROC curve is undefined with {} positive and {} negative samples",
                positives, negatives
            )));
        }

        let mut pairs: Vec<(f64, usize)> = scores
            .iter()
            .map(|&s| f64::from(s))
            .zip(labels.iter().copied())
            .collect();
        pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut curve = Self {
            fpr: vec![0.0],
            tpr: vec![0.0],
            thresholds: vec![f64::INFINITY],
        };

        let (mut tp, mut fp) = (0usize, 0usize);
        let mut i = 0;
        while i < pairs.len() {
            let threshold = pairs[i].0;
            while i < pairs.len() && pairs[i].0 == threshold {
                if pairs[i].1 == 1 {
                    tp += 1;
                } else {
                    fp += 1;
                }
                i += 1;
            }
            curve.fpr.push(fp as f64 / negatives as f64);
            curve.tpr.push(tp as f64 / positives as f64);
            curve.thresholds.push(threshold);
        }

        Ok(curve)
    }

    /// Area under the curve by the trapezoidal rule
    pub fn auc(&self) -> f64 {
        self.fpr
            .windows(2)
            .zip(self.tpr.windows(2))
            .map(|(x, y)| (x[1] - x[0]) * (y[1] + y[0]) / 2.0)
            .sum()
    }

    pub fn points(&self) -> Vec<(f64, f64)> {
        self.fpr.iter().copied().zip(self.tpr.iter().copied()).collect()
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}
