//! Load-once application state and the two user interactions: replaying a
//! held-out test sample and classifying an uploaded WAVE file.

use log::{debug, info, warn};
use ndarray::Axis;
use serde::Serialize;
use std::path::PathBuf;

use crate::aggregation::{majority_vote, soft_vote};
use crate::config::AppConfig;
use crate::dataset::TestSet;
use crate::labels::{decode_label, labels_match, resolve_class, RawLabel};
use crate::model_inference::{Classifier, OnnxClassifier};
use crate::normalizer::{AlignmentPolicy, WaveformNormalizer};
use crate::{ClassifierError, Result, Verdict};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplePrediction {
    pub index: usize,
    pub truth: String,
    pub predicted: String,
    pub correct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadPrediction {
    pub label: String,
    pub verdict: Verdict,
    /// Averaged probability of the winning class, when the model reports
    /// probabilities.
    pub confidence: Option<f32>,
    pub candidates: usize,
    pub alignment: AlignmentPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSummary {
    pub model_path: PathBuf,
    pub expected_features: usize,
    pub test_samples: Option<usize>,
    pub test_set_features: Option<usize>,
    pub alignment: AlignmentPolicy,
    pub candidates_per_upload: usize,
    pub sample_rate: Option<u32>,
    pub class_labels: Vec<String>,
}

pub struct AppContext {
    config: AppConfig,
    classifier: Box<dyn Classifier>,
    test_set: Result<TestSet>,
    normalizer: WaveformNormalizer,
}

impl AppContext {
    /// Loads the model and, if present, the test set. A missing model is an
    /// error; a missing test set only disables [`AppContext::predict_sample`].
    pub fn load(config: AppConfig) -> Result<Self> {
        let classifier = OnnxClassifier::new(&config.model_path, config.class_labels.clone())?;
        let test_set = TestSet::load(&config.dataset_path);
        if let Err(err) = &test_set {
            warn!("Test set unavailable: {}", err);
        }
        Self::new(config, Box::new(classifier), test_set)
    }

    pub fn new(
        config: AppConfig,
        classifier: Box<dyn Classifier>,
        test_set: Result<TestSet>,
    ) -> Result<Self> {
        config.validate()?;
        let expected_features = classifier
            .n_features_in()
            .unwrap_or(config.expected_features);
        let normalizer = WaveformNormalizer::new(config.normalizer.clone(), expected_features)?;

        info!(
            "Classifier expects {} features, uploads aligned with {:?}",
            expected_features,
            normalizer.alignment()
        );

        Ok(Self {
            config,
            classifier,
            test_set,
            normalizer,
        })
    }

    pub fn expected_features(&self) -> usize {
        self.normalizer.target_length()
    }

    pub fn test_set(&self) -> Result<&TestSet> {
        self.test_set.as_ref().map_err(Clone::clone)
    }

    pub fn summary(&self) -> ContextSummary {
        let test_set = self.test_set().ok();
        let alignment = self.normalizer.alignment();
        ContextSummary {
            model_path: self.config.model_path.clone(),
            expected_features: self.expected_features(),
            test_samples: test_set.map(TestSet::len),
            test_set_features: test_set.map(TestSet::n_features),
            alignment,
            candidates_per_upload: alignment.candidate_count(),
            sample_rate: self.config.normalizer.sample_rate,
            class_labels: self.config.class_labels.clone(),
        }
    }

    fn display_label(&self, label: &RawLabel) -> String {
        decode_label(&resolve_class(label.clone(), &self.config.class_labels))
    }

    /// Label for a soft-vote winner. Probability columns follow the order of
    /// the configured class labels.
    fn class_display(&self, index: usize) -> String {
        match self.config.class_label(index) {
            Some(label) => label.to_string(),
            None => index.to_string(),
        }
    }

    fn check_dimension(&self, actual: usize) -> Result<()> {
        let expected = self.expected_features();
        if actual != expected {
            return Err(ClassifierError::DimensionMismatch { expected, actual });
        }
        Ok(())
    }

    pub fn predict_sample(&mut self, index: usize) -> Result<SamplePrediction> {
        let (row, truth) = {
            let test_set = self.test_set()?;
            let (row, truth) = test_set.sample(index)?;
            (row.to_owned(), truth.clone())
        };
        self.check_dimension(row.len())?;

        let predictions = self.classifier.predict(row.view().insert_axis(Axis(0)))?;
        let predicted = predictions
            .first()
            .ok_or_else(|| ClassifierError::Inference("no prediction returned".into()))?;

        let truth = self.display_label(&truth);
        let predicted = self.display_label(predicted);
        let correct = labels_match(&truth, &predicted);
        debug!("Sample {}: truth {}, predicted {}", index, truth, predicted);

        Ok(SamplePrediction {
            index,
            truth,
            predicted,
            correct,
        })
    }

    pub fn predict_upload(&mut self, wav_bytes: &[u8]) -> Result<UploadPrediction> {
        // Rows always match the target length, see WaveformNormalizer::fit.
        let batch = self.normalizer.process_bytes(wav_bytes)?;
        let candidates = batch.nrows();

        let prediction = self.classifier.predict_batch(batch.view())?;
        let (label, confidence) = match prediction.probabilities {
            Some(probabilities) => {
                if probabilities.nrows() != candidates {
                    return Err(ClassifierError::Inference(format!(
                        "expected {} probability rows, got {}",
                        candidates,
                        probabilities.nrows()
                    )));
                }
                let vote = soft_vote(probabilities.view())
                    .ok_or_else(|| ClassifierError::Inference("empty probability output".into()))?;
                debug!("Soft vote over {} candidates: {:?}", candidates, vote);
                (self.class_display(vote.class_index), Some(vote.confidence))
            }
            None => {
                let winner = majority_vote(&prediction.labels)
                    .ok_or_else(|| ClassifierError::Inference("no prediction returned".into()))?;
                (self.display_label(&winner), None)
            }
        };

        let verdict = Verdict::from_label(&label);
        info!("Upload classified as {} ({})", label, verdict.as_str());

        Ok(UploadPrediction {
            label,
            verdict,
            confidence,
            candidates,
            alignment: self.normalizer.alignment(),
        })
    }
}
