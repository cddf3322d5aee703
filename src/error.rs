use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ClassifierError {
    #[error("Failed to decode audio: {0}")]
    Decode(String),

    #[error("Feature dimension mismatch: model expects {expected} features, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{kind} not found at {}", path.display())]
    MissingArtifact { kind: &'static str, path: PathBuf },

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Invalid dataset: {0}")]
    Dataset(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Sample index {index} out of range (test set has {len} samples)")]
    IndexOutOfRange { index: usize, len: usize },
}

impl From<hound::Error> for ClassifierError {
    fn from(err: hound::Error) -> Self {
        ClassifierError::Decode(err.to_string())
    }
}
