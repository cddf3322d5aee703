use log::{debug, info};
use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewD, Ix2, IxDyn};
use ort::{
    session::{builder::{GraphOptimizationLevel, SessionBuilder}, Session},
    value::{Tensor, ValueType},
};
use std::path::Path;

use crate::labels::{resolve_class, RawLabel};
use crate::{ClassifierError, Result};

/// Labels for every row of a batch, plus probabilities when the model
/// reports them.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPrediction {
    pub labels: Vec<RawLabel>,
    pub probabilities: Option<Array2<f32>>,
}

/// A fitted model. Rows of `batch` are feature vectors.
pub trait Classifier {
    fn predict(&mut self, batch: ArrayView2<f32>) -> Result<Vec<RawLabel>>;

    /// Per-class probabilities, one row per input row. `None` when the
    /// model only produces hard labels.
    fn predict_proba(&mut self, _batch: ArrayView2<f32>) -> Result<Option<Array2<f32>>> {
        Ok(None)
    }

    /// Labels and probabilities together. Implementations that get both from
    /// one evaluation should override this.
    fn predict_batch(&mut self, batch: ArrayView2<f32>) -> Result<BatchPrediction> {
        let probabilities = self.predict_proba(batch)?;
        let labels = self.predict(batch)?;
        Ok(BatchPrediction {
            labels,
            probabilities,
        })
    }

    /// Input width declared by the model, if any.
    fn n_features_in(&self) -> Option<usize> {
        None
    }
}

/// ONNX export of the fitted pipeline. Integer class outputs are mapped to
/// display labels through `class_labels`; string class outputs are used as is.
pub struct OnnxClassifier {
    session: Session,
    class_labels: Vec<String>,
    n_features: Option<usize>,
}

#[derive(Debug)]
enum OutputTensor {
    F32(Vec<usize>, Vec<f32>),
    I64(Vec<usize>, Vec<i64>),
    Text(Vec<usize>, Vec<String>),
    Unsupported,
}

fn inference_error<E: std::fmt::Display>(err: E) -> ClassifierError {
    ClassifierError::Inference(err.to_string())
}

impl OnnxClassifier {
    pub fn new<P: AsRef<Path>>(model_path: P, class_labels: Vec<String>) -> Result<Self> {
        let path = model_path.as_ref();
        if !path.is_file() {
            return Err(ClassifierError::MissingArtifact {
                kind: "model",
                path: path.to_path_buf(),
            });
        }

        let session = SessionBuilder::new()
            .map_err(inference_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(inference_error)?
            .commit_from_file(path)
            .map_err(inference_error)?;

        let n_features = session.inputs.first().and_then(|input| match &input.input_type {
            ValueType::Tensor { shape, .. } => shape
                .last()
                .copied()
                .filter(|&dim| dim > 0)
                .map(|dim| dim as usize),
            _ => None,
        });

        info!("Model loaded from {}", path.display());
        debug!(
            "Model has {} input(s), {} output(s), declared width {:?}",
            session.inputs.len(),
            session.outputs.len(),
            n_features
        );

        Ok(Self {
            session,
            class_labels,
            n_features,
        })
    }

    /// Runs the session and copies every float, int64 or string output out
    /// of it.
    fn run(&mut self, batch: ArrayView2<f32>) -> Result<Vec<(String, OutputTensor)>> {
        let (rows, cols) = batch.dim();
        let data: Vec<f32> = batch.iter().copied().collect();
        let input_tensor = Tensor::from_array(([rows, cols], data)).map_err(inference_error)?;

        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .map_err(inference_error)?;

        let mut tensors = Vec::new();
        for (name, output) in outputs.iter() {
            let tensor = if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
                OutputTensor::F32(to_dims(shape), data.to_vec())
            } else if let Ok((shape, data)) = output.try_extract_tensor::<i64>() {
                OutputTensor::I64(to_dims(shape), data.to_vec())
            } else if let Ok((shape, data)) = output.try_extract_strings() {
                OutputTensor::Text(to_dims(shape), data)
            } else {
                OutputTensor::Unsupported
            };
            tensors.push((name.to_string(), tensor));
        }
        Ok(tensors)
    }

    fn resolve(&self, labels: Vec<RawLabel>) -> Vec<RawLabel> {
        labels
            .into_iter()
            .map(|label| resolve_class(label, &self.class_labels))
            .collect()
    }
}

fn to_dims(shape: &[i64]) -> Vec<usize> {
    shape.iter().map(|&x| x.max(0) as usize).collect()
}

fn argmax_row(row: ArrayView1<f32>) -> usize {
    row.iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

/// Class labels from one output tensor: int64 or string labels directly,
/// float labels rounded, float probability rows by argmax.
fn labels_from_tensor(tensor: &OutputTensor) -> Result<Vec<RawLabel>> {
    match tensor {
        OutputTensor::I64(_, data) => Ok(data.iter().map(|&id| RawLabel::Int(id)).collect()),
        OutputTensor::Text(_, data) => Ok(data.iter().map(|s| RawLabel::Text(s.clone())).collect()),
        OutputTensor::F32(dims, data) => {
            let view = ArrayViewD::from_shape(IxDyn(dims), data).map_err(inference_error)?;
            match view.ndim() {
                // Direct class predictions
                1 => Ok(view
                    .iter()
                    .map(|&pred| RawLabel::Int(pred.round() as i64))
                    .collect()),
                // Probability rows, take argmax
                2 => {
                    let rows = view
                        .into_dimensionality::<Ix2>()
                        .map_err(inference_error)?;
                    Ok(rows
                        .rows()
                        .into_iter()
                        .map(|row| RawLabel::Int(argmax_row(row) as i64))
                        .collect())
                }
                _ => Err(ClassifierError::Inference(format!(
                    "unexpected output tensor shape: {:?}",
                    dims
                ))),
            }
        }
        OutputTensor::Unsupported => Err(ClassifierError::Inference(
            "unsupported output tensor type".into(),
        )),
    }
}

/// Labels from the first output, checked against the batch size.
fn labels_from_outputs(
    outputs: &[(String, OutputTensor)],
    batch_size: usize,
) -> Result<Vec<RawLabel>> {
    let (_, first) = outputs
        .first()
        .ok_or_else(|| ClassifierError::Inference("model produced no output".into()))?;
    let labels = labels_from_tensor(first)?;

    if labels.len() != batch_size {
        return Err(ClassifierError::Inference(format!(
            "prediction count mismatch: expected {}, got {}",
            batch_size,
            labels.len()
        )));
    }
    Ok(labels)
}

/// The first 2-D float output is taken as class probabilities. It must have
/// one row per input row.
fn probabilities_from_outputs(
    outputs: &[(String, OutputTensor)],
    batch_size: usize,
) -> Result<Option<Array2<f32>>> {
    let candidate = outputs.iter().find_map(|(name, output)| match output {
        OutputTensor::F32(dims, data) if dims.len() == 2 => Some((name, dims, data)),
        _ => None,
    });
    let Some((name, dims, data)) = candidate else {
        return Ok(None);
    };

    if dims[0] != batch_size {
        return Err(ClassifierError::Inference(format!(
            "output '{}' has {} probability rows for a batch of {}",
            name, dims[0], batch_size
        )));
    }
    debug!("Using output '{}' as class probabilities", name);
    Array2::from_shape_vec((dims[0], dims[1]), data.clone())
        .map(Some)
        .map_err(inference_error)
}

impl Classifier for OnnxClassifier {
    fn predict(&mut self, batch: ArrayView2<f32>) -> Result<Vec<RawLabel>> {
        let outputs = self.run(batch)?;
        let labels = labels_from_outputs(&outputs, batch.nrows())?;
        Ok(self.resolve(labels))
    }

    fn predict_proba(&mut self, batch: ArrayView2<f32>) -> Result<Option<Array2<f32>>> {
        let outputs = self.run(batch)?;
        probabilities_from_outputs(&outputs, batch.nrows())
    }

    fn predict_batch(&mut self, batch: ArrayView2<f32>) -> Result<BatchPrediction> {
        let outputs = self.run(batch)?;
        let labels = labels_from_outputs(&outputs, batch.nrows())?;
        let probabilities = probabilities_from_outputs(&outputs, batch.nrows())?;
        Ok(BatchPrediction {
            labels: self.resolve(labels),
            probabilities,
        })
    }

    fn n_features_in(&self) -> Option<usize> {
        self.n_features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(tensor: OutputTensor) -> (String, OutputTensor) {
        ("output".to_string(), tensor)
    }

    #[test]
    fn test_missing_model_is_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let result = OnnxClassifier::new(dir.path().join("absent.onnx"), vec![]);

        match result {
            Err(ClassifierError::MissingArtifact { kind, path }) => {
                assert_eq!(kind, "model");
                assert!(path.ends_with("absent.onnx"));
            }
            _ => panic!("expected MissingArtifact"),
        }
    }

    #[test]
    fn test_to_dims_clamps_dynamic_axes() {
        assert_eq!(to_dims(&[-1, 14773]), vec![0, 14773]);
    }

    #[test]
    fn test_float_label_vector_is_rounded() {
        let tensor = OutputTensor::F32(vec![3], vec![0.0, 1.0, 0.9999]);
        assert_eq!(
            labels_from_tensor(&tensor).unwrap(),
            vec![RawLabel::Int(0), RawLabel::Int(1), RawLabel::Int(1)]
        );
    }

    #[test]
    fn test_probability_rows_take_argmax() {
        let tensor = OutputTensor::F32(vec![2, 2], vec![0.8, 0.2, 0.3, 0.7]);
        assert_eq!(
            labels_from_tensor(&tensor).unwrap(),
            vec![RawLabel::Int(0), RawLabel::Int(1)]
        );
    }

    #[test]
    fn test_string_labels_pass_through() {
        let tensor = OutputTensor::Text(vec![2], vec!["cat".into(), "dog".into()]);
        assert_eq!(
            labels_from_tensor(&tensor).unwrap(),
            vec![RawLabel::from("cat"), RawLabel::from("dog")]
        );
    }

    #[test]
    fn test_rank_three_output_is_rejected() {
        let tensor = OutputTensor::F32(vec![1, 2, 2], vec![0.0; 4]);
        assert!(matches!(
            labels_from_tensor(&tensor),
            Err(ClassifierError::Inference(_))
        ));
        assert!(labels_from_tensor(&OutputTensor::Unsupported).is_err());
    }

    #[test]
    fn test_label_count_must_match_batch() {
        let outputs = vec![named(OutputTensor::I64(vec![2], vec![0, 1]))];
        assert!(labels_from_outputs(&outputs, 2).is_ok());
        assert!(labels_from_outputs(&outputs, 3).is_err());
        assert!(labels_from_outputs(&[], 1).is_err());
    }

    #[test]
    fn test_probabilities_found_after_label_output() {
        let outputs = vec![
            named(OutputTensor::Text(vec![3], vec!["cat".into(); 3])),
            named(OutputTensor::F32(vec![3, 2], vec![0.9, 0.1, 0.3, 0.7, 0.6, 0.4])),
        ];
        let probs = probabilities_from_outputs(&outputs, 3).unwrap().unwrap();
        assert_eq!(probs.dim(), (3, 2));
        assert_eq!(probs[[1, 1]], 0.7);
    }

    #[test]
    fn test_probability_rows_must_match_batch() {
        let outputs = vec![named(OutputTensor::F32(vec![2, 2], vec![0.5; 4]))];
        assert!(matches!(
            probabilities_from_outputs(&outputs, 3),
            Err(ClassifierError::Inference(_))
        ));
    }

    #[test]
    fn test_hard_label_model_has_no_probabilities() {
        let outputs = vec![named(OutputTensor::I64(vec![1], vec![1]))];
        assert_eq!(probabilities_from_outputs(&outputs, 1).unwrap(), None);
    }
}
