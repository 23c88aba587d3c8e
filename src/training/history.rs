//! Per-epoch training history and its exports

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::charts::{DataSeries, LegendPosition, LineChart, COLOR_PRIMARY, COLOR_TERTIARY};
use crate::utils::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// 1-based
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    /// The checkpoint was overwritten after this epoch
    pub checkpointed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
}

impl TrainingHistory {
    pub fn push(&mut self, record: EpochRecord) {
        self.epochs.push(record);
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }

    /// Epochs whose weights were written to the checkpoint
    pub fn checkpointed_epochs(&self) -> Vec<usize> {
        self.epochs
            .iter()
            .filter(|r| r.checkpointed)
            .map(|r| r.epoch)
            .collect()
    }

    pub fn to_csv(&self) -> String {
        let mut csv = String::from("epoch,train_loss,train_accuracy,val_loss,val_accuracy,checkpointed\n");
        for r in &self.epochs {
            csv.push_str(&format!(
                "{},{:.6},{:.6},{:.6},{:.6},{}\n",
                r.epoch, r.train_loss, r.train_accuracy, r.val_loss, r.val_accuracy, r.checkpointed
            ));
        }
        csv
    }

    /// Train and validation accuracy per epoch, y axis fixed to `[0.2, 1.0]`
    pub fn accuracy_chart(&self) -> LineChart {
        let train = self.epochs.iter().map(|r| (r.epoch as f64, r.train_accuracy)).collect();
        let val = self.epochs.iter().map(|r| (r.epoch as f64, r.val_accuracy)).collect();

        LineChart::new("Model accuracy", "epoch", "accuracy")
            .with_y_range(0.2, 1.0)
            .with_legend(LegendPosition::LowerRight)
            .add_series(DataSeries::new("train", train, COLOR_PRIMARY).with_markers())
            .add_series(DataSeries::new("val", val, COLOR_TERTIARY).with_markers())
    }

    /// Write `history.json`, `history.csv` and `accuracy.svg` into `dir`
    pub fn save_reports(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join("history.json"), serde_json::to_string_pretty(self)?)?;
        fs::write(dir.join("history.csv"), self.to_csv())?;
        self.accuracy_chart().save(&dir.join("accuracy.svg"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn history() -> TrainingHistory {
        let mut h = TrainingHistory::default();
        for (epoch, checkpointed) in [(1, true), (2, false), (3, true)] {
            h.push(EpochRecord {
                epoch,
                train_loss: 1.0 / epoch as f64,
                train_accuracy: 0.5 + 0.1 * epoch as f64,
                val_loss: 1.2 / epoch as f64,
                val_accuracy: 0.45 + 0.1 * epoch as f64,
                checkpointed,
            });
        }
        h
    }

    #[test]
    fn test_checkpointed_epochs() {
        assert_eq!(history().checkpointed_epochs(), vec![1, 3]);
    }

    #[test]
    fn test_csv_has_row_per_epoch() {
        let csv = history().to_csv();
        assert_eq!(csv.lines().count(), 4);
        assert!(csv.lines().nth(2).unwrap().starts_with("2,0.500000,"));
    }

    #[test]
    fn test_save_reports() {
        let dir = tempdir().unwrap();
        history().save_reports(dir.path()).unwrap();

        let svg = fs::read_to_string(dir.path().join("accuracy.svg")).unwrap();
        assert!(svg.contains("Model accuracy"));
        let json = fs::read_to_string(dir.path().join("history.json")).unwrap();
        let parsed: TrainingHistory = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 3);
    }
}
