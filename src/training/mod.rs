//! Classifier head training
//!
//! - `trainer`: Adam/BCE loop over cached features
//! - `early_stopping`: validation-loss monitor with `min_delta` and `patience`
//! - `checkpoint`: best-weights record and architecture sidecar
//! - `history`: per-epoch metrics, CSV/JSON export, accuracy chart

pub mod checkpoint;
pub mod early_stopping;
pub mod history;
pub mod trainer;

pub use checkpoint::{CheckpointMetadata, HeadCheckpoint};
pub use early_stopping::{EarlyStopping, Verdict};
pub use history::{EpochRecord, TrainingHistory};
pub use trainer::{classify, evaluate_head, probabilities, HeadTrainer, TrainingOutcome, DECISION_THRESHOLD};
