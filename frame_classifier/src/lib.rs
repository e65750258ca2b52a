mod classifier;
mod error;
mod labels;
mod model_service;
mod ort_service;

pub mod config;
pub mod preprocess;

pub use classifier::{Classification, FrameClassifier};
pub use error::{ClassifyError, DecodeError, InferenceError, ModelLoadError};
pub use labels::ClassLabels;
pub use model_service::ModelService;
pub use ort_service::OrtModelService;
