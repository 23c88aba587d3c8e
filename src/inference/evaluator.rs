//! Test-set evaluation: confusion matrix, classification report, ROC/AUC

use std::fmt;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dataset::NUM_CLASSES;
use crate::inference::predictor::Predictions;
use crate::utils::charts::{DataSeries, LegendPosition, LineChart, COLOR_NEUTRAL, COLOR_PRIMARY};
use crate::utils::error::{Result, XrayError};
use crate::utils::metrics::{ClassificationReport, ConfusionMatrix, RocCurve};

/// Everything reported for one evaluated split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub class_names: Vec<String>,
    pub samples: usize,
    pub confusion_matrix: ConfusionMatrix,
    pub classification_report: ClassificationReport,
    /// `None` when the split holds a single class
    pub roc: Option<RocCurve>,
    pub auc: Option<f64>,
    pub evaluated_at: DateTime<Utc>,
}

impl EvaluationReport {
    /// Compute every metric from truth labels, predicted classes and
    /// class-1 probabilities
    pub fn from_predictions(
        labels: &[usize],
        predicted: &[usize],
        probabilities: &[f32],
        class_names: &[String],
    ) -> Result<Self> {
        if class_names.len() != NUM_CLASSES {
            return Err(XrayError::Evaluation(format!(
                "expected {} class names, got {:?}",
                NUM_CLASSES, class_names
            )));
        }

        let confusion_matrix = ConfusionMatrix::from_predictions(labels, predicted, NUM_CLASSES)?;
        let classification_report = ClassificationReport::from_confusion_matrix(&confusion_matrix, class_names);
        let roc = if RocCurve::is_defined(labels) {
            Some(RocCurve::from_scores(labels, probabilities)?)
        } else {
            warn!("Only one class present in {} labels; ROC AUC is undefined", labels.len());
            None
        };
        let auc = roc.as_ref().map(RocCurve::auc);

        Ok(Self {
            class_names: class_names.to_vec(),
            samples: labels.len(),
            confusion_matrix,
            classification_report,
            roc,
            auc,
            evaluated_at: Utc::now(),
        })
    }

    pub fn from_split_predictions(predictions: &Predictions) -> Result<Self> {
        Self::from_predictions(
            &predictions.labels(),
            &predictions.classes(),
            &predictions.probabilities(),
            &predictions.class_names,
        )
    }

    pub fn accuracy(&self) -> f64 {
        self.confusion_matrix.accuracy()
    }

    /// ROC curve with the no-skill diagonal and the AUC in the legend
    pub fn roc_chart(&self) -> Option<LineChart> {
        let roc = self.roc.as_ref()?;
        Some(
            LineChart::new("ROC curve", "False positive rate", "True positive rate")
                .with_x_range(0.0, 1.0)
                .with_y_range(0.0, 1.0)
                .with_legend(LegendPosition::LowerRight)
                .add_series(DataSeries::new(
                    format!("Classifier (area = {:.3})", roc.auc()),
                    roc.points(),
                    COLOR_PRIMARY,
                ))
                .add_series(DataSeries::new("No skill", vec![(0.0, 0.0), (1.0, 1.0)], COLOR_NEUTRAL).dashed()),
        )
    }

    /// AUC formatted for console output
    pub fn auc_display(&self) -> String {
        match self.auc {
            Some(auc) => format!("{:.4}", auc),
            None => "undefined".to_string(),
        }
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(XrayError::PathNotFound(path.to_path_buf()));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Write `evaluation.json`, `predictions.json` and `roc.svg` into `dir`
    ///
    /// `roc.svg` is skipped when the ROC curve is undefined.
    pub fn save_reports(&self, predictions: &Predictions, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        self.save_json(&dir.join("evaluation.json"))?;
        fs::write(dir.join("predictions.json"), serde_json::to_string_pretty(predictions)?)?;
        match self.roc_chart() {
            Some(chart) => chart.save(&dir.join("roc.svg"))?,
            None => warn!("Skipping roc.svg: the split holds a single class"),
        }
        info!("Evaluation reports written to {}", dir.display());
        Ok(())
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.confusion_matrix.display(&self.class_names))?;
        writeln!(f, "{}", self.classification_report)?;
        write!(f, "ROC AUC: {} ({} samples)", self.auc_display(), self.samples)
    }
}
