//! Validation-loss monitor driving both early stopping and checkpointing
//!
//! An epoch improves when `val_loss < best - min_delta`. Improvement resets
//! the wait counter and marks the epoch for checkpointing; otherwise the
//! counter grows and training stops once it reaches `patience`.

use serde::{Deserialize, Serialize};

use crate::config::EarlyStoppingConfig;

/// Outcome of observing one epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub improved: bool,
    pub should_stop: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyStopping {
    min_delta: f64,
    patience: usize,
    best: f64,
    best_epoch: Option<usize>,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(config: EarlyStoppingConfig) -> Self {
        Self {
            min_delta: config.min_delta.abs(),
            patience: config.patience,
            best: f64::INFINITY,
            best_epoch: None,
            wait: 0,
        }
    }

    /// Record the validation loss of `epoch`; NaN never counts as improvement
    pub fn observe(&mut self, epoch: usize, val_loss: f64) -> Verdict {
        let improved = val_loss + self.min_delta < self.best;

        if improved {
            self.best = val_loss;
            self.best_epoch = Some(epoch);
            self.wait = 0;
        } else {
            self.wait += 1;
        }

        Verdict {
            improved,
            should_stop: !improved && self.wait >= self.patience,
        }
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    /// Consecutive epochs without improvement
    pub fn wait(&self) -> usize {
        self.wait
    }

    pub fn patience(&self) -> usize {
        self.patience
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stopper(min_delta: f64, patience: usize) -> EarlyStopping {
        EarlyStopping::new(EarlyStoppingConfig { min_delta, patience })
    }

    #[test]
    fn test_first_epoch_always_improves() {
        let mut es = stopper(0.01, 5);
        let v = es.observe(1, 0.9);
        assert!(v.improved);
        assert!(!v.should_stop);
        assert_eq!(es.best_epoch(), Some(1));
    }

    #[test]
    fn test_min_delta_threshold() {
        let mut es = stopper(0.01, 5);
        es.observe(1, 0.50);

        // smaller than min_delta: not an improvement, best unchanged
        assert!(!es.observe(2, 0.495).improved);
        assert!((es.best() - 0.50).abs() < 1e-12);
        assert_eq!(es.wait(), 1);

        assert!(es.observe(3, 0.48).improved);
        assert_eq!(es.wait(), 0);
        assert_eq!(es.best_epoch(), Some(3));
    }

    #[test]
    fn test_stops_exactly_after_patience() {
        let mut es = stopper(0.01, 3);
        es.observe(1, 0.5);

        assert!(!es.observe(2, 0.6).should_stop);
        assert!(!es.observe(3, 0.6).should_stop);
        let v = es.observe(4, 0.6);
        assert!(v.should_stop);
        assert_eq!(4 - es.best_epoch().unwrap(), es.patience());
    }

    #[test]
    fn test_loss_sequence_checkpoints() {
        let losses = [0.70, 0.60, 0.595, 0.592, 0.60, 0.61, 0.596];
        let mut es = stopper(0.01, 5);

        let verdicts: Vec<Verdict> = losses
            .iter()
            .enumerate()
            .map(|(i, &l)| es.observe(i + 1, l))
            .collect();
        let improved: Vec<usize> = verdicts
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.improved.then_some(i + 1))
            .collect();

        // later losses never beat 0.60 by more than min_delta
        assert_eq!(improved, vec![1, 2]);
        assert_eq!(es.best_epoch(), Some(2));
        assert!(verdicts[..6].iter().all(|v| !v.should_stop));
        assert!(verdicts[6].should_stop);
    }

    #[test]
    fn test_nan_is_not_improvement() {
        let mut es = stopper(0.0, 1);
        let v = es.observe(1, f64::NAN);
        assert!(!v.improved);
        assert!(v.should_stop);
        assert_eq!(es.best_epoch(), None);
    }

    #[test]
    fn test_zero_patience_stops_on_first_plateau() {
        let mut es = stopper(0.01, 0);
        assert!(!es.observe(1, 0.5).should_stop);
        assert!(es.observe(2, 0.5).should_stop);
    }
}
