//! Bottleneck feature caching

pub mod builder;
pub mod cache;

pub use builder::{extract_split, ExtractionOptions};
pub use cache::{ExtractorDescriptor, FeatureCache};
