//! Model definitions: the frozen extractor and the trainable head

pub mod extractor;
pub mod head;

pub use extractor::{
    load_extractor, prepare_extractor, ExtractorSource, FeatureExtractor, Vgg16Features,
    Vgg16FeaturesConfig,
};
pub use head::{ClassifierHead, ClassifierHeadConfig};
