use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("Invalid model configuration: {0}")]
    InvalidConfig(String),
    #[error("Failed to read labels from {path:?}: {source}")]
    LabelsRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("No class labels configured")]
    EmptyLabels,
    #[error("Failed to build ONNX session: {0}")]
    Session(#[from] ort::Error),
    #[error("Unsupported model signature: {0}")]
    UnsupportedSignature(String),
    #[error("Model produces {outputs} scores but {labels} labels were configured")]
    LabelCountMismatch { outputs: usize, labels: usize },
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty frame payload")]
    Empty,
    #[error("invalid frame encoding: {0}")]
    Encoding(String),
    #[error("unrecognized image data: {0}")]
    Image(#[from] image::ImageError),
    #[error("failed to read image data: {0}")]
    Io(#[from] std::io::Error),
    #[error("image has a zero dimension ({width}x{height})")]
    ZeroDimension { width: u32, height: u32 },
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("input shape {actual:?} does not match model input {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("inference failed: {0}")]
    Run(String),
    #[error("model output unusable: {0}")]
    Corrupted(String),
}

impl InferenceError {
    /// A fatal error means the adapter can no longer be trusted for any frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, InferenceError::Corrupted(_))
    }
}

#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("classifier disabled: {0}")]
    Disabled(String),
    #[error("decode failed")]
    Decode(#[from] DecodeError),
    #[error("{0}")]
    Inference(#[from] InferenceError),
    #[error("classification worker failed: {0}")]
    Internal(String),
}

impl ClassifyError {
    /// Per-frame errors are reported to the caller and never end a stream.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ClassifyError::Decode(_) => true,
            ClassifyError::Inference(err) => !err.is_fatal(),
            ClassifyError::Disabled(_) | ClassifyError::Internal(_) => false,
        }
    }
}
