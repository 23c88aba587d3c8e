//! Inference and evaluation on the test split
//!
//! - `predictor`: frozen extractor + checkpointed head, per-image
//!   probability and class
//! - `evaluator`: confusion matrix, classification report, ROC curve and AUC

pub mod evaluator;
pub mod predictor;

pub use evaluator::EvaluationReport;
pub use predictor::{Prediction, Predictions, Predictor};
