//! Utilities: logging, errors, metrics and SVG charts
//!
//! ## Metrics
//!
//! The metrics module covers everything the evaluator reports:
//! - Confusion matrix (rows = actual, cols = predicted)
//! - Per-class precision, recall, F1 and support
//! - ROC curve and AUC

pub mod charts;
pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{Result, XrayError};
pub use logging::init_logging;
pub use metrics::{ClassificationReport, ConfusionMatrix, RocCurve};

/// Format a duration in a human-readable way
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0).floor();
        let secs = seconds % 60.0;
        format!("{}m {:.0}s", minutes as u32, secs)
    } else {
        let hours = (seconds / 3600.0).floor();
        let minutes = ((seconds % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours as u32, minutes as u32)
    }
}
