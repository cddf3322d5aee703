pub mod aggregation;
pub mod app;
pub mod audio_processor;
pub mod config;
pub mod dataset;
pub mod error;
pub mod labels;
pub mod model_inference;
pub mod normalizer;

use serde::Serialize;

pub use aggregation::{majority_vote, soft_vote, SoftVote};
pub use app::{AppContext, ContextSummary, SamplePrediction, UploadPrediction};
pub use audio_processor::{AudioProcessor, Waveform};
pub use config::{AppConfig, NormalizerConfig};
pub use dataset::TestSet;
pub use error::ClassifierError;
pub use labels::{decode_label, labels_match, resolve_class, RawLabel};
pub use model_inference::{BatchPrediction, Classifier, OnnxClassifier};
pub use normalizer::{AlignmentPolicy, WaveformNormalizer};

/// Input width of the CatsDogs classifier when the model does not declare one.
pub const DEFAULT_FEATURE_LENGTH: usize = 14773;

/// Coarse reading of a decoded label, used for the upload summary line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    Cat,
    Dog,
    Other,
}

impl Verdict {
    pub fn from_label(label: &str) -> Self {
        let label = label.to_lowercase();
        if label.contains("cat") || label.contains("kucing") {
            Verdict::Cat
        } else if label.contains("dog") || label.contains("anjing") {
            Verdict::Dog
        } else {
            Verdict::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Cat => "Cat",
            Verdict::Dog => "Dog",
            Verdict::Other => "Other",
        }
    }
}

pub type Result<T> = std::result::Result<T, ClassifierError>;
