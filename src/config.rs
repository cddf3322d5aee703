use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::normalizer::AlignmentPolicy;
use crate::{ClassifierError, Result, DEFAULT_FEATURE_LENGTH};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Resample uploads to this rate. `None` keeps the file's native rate.
    pub sample_rate: Option<u32>,
    pub alignment: AlignmentPolicy,
    /// Silence trimming threshold in dB below the loudest frame.
    pub trim_top_db: Option<f32>,
    pub peak_normalize: bool,
    pub frame_length: usize,
    pub hop_length: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            sample_rate: None,
            alignment: AlignmentPolicy::default(),
            trim_top_db: None,
            peak_normalize: false,
            frame_length: 2048,
            hop_length: 512,
        }
    }
}

impl NormalizerConfig {
    /// Frames may overlap but must not leave gaps, so `hop_length` is bounded
    /// by `frame_length`.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == Some(0) {
            return Err(ClassifierError::Config("sample_rate must be positive".into()));
        }
        if self.frame_length == 0 || self.hop_length == 0 {
            return Err(ClassifierError::Config(
                "frame_length and hop_length must be positive".into(),
            ));
        }
        if self.hop_length > self.frame_length {
            return Err(ClassifierError::Config(format!(
                "hop_length ({}) must not exceed frame_length ({})",
                self.hop_length, self.frame_length
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model_path: PathBuf,
    pub dataset_path: PathBuf,
    /// Used when the model does not declare its input width.
    pub expected_features: usize,
    /// Class index to display label, in the order of the model's outputs.
    pub class_labels: Vec<String>,
    pub normalizer: NormalizerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("model.onnx"),
            dataset_path: PathBuf::from("data_processed.npz"),
            expected_features: DEFAULT_FEATURE_LENGTH,
            class_labels: vec!["cat".to_string(), "dog".to_string()],
            normalizer: NormalizerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Reads a JSON config. Relative artifact paths are resolved against the
    /// directory holding the config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            ClassifierError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config: AppConfig = serde_json::from_str(&text)
            .map_err(|e| ClassifierError::Config(format!("{}: {}", path.display(), e)))?;

        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        config.validate()?;

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn resolve_relative_to(&mut self, base: &Path) {
        if self.model_path.is_relative() {
            self.model_path = base.join(&self.model_path);
        }
        if self.dataset_path.is_relative() {
            self.dataset_path = base.join(&self.dataset_path);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.expected_features == 0 {
            return Err(ClassifierError::Config("expected_features must be positive".into()));
        }
        if self.class_labels.is_empty() {
            return Err(ClassifierError::Config("class_labels must not be empty".into()));
        }
        self.normalizer.validate()
    }

    pub fn class_label(&self, index: usize) -> Option<&str> {
        self.class_labels.get(index).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.expected_features, 14773);
        assert_eq!(config.class_label(1), Some("dog"));
        assert_eq!(config.normalizer.alignment, AlignmentPolicy::Scan);
        assert_eq!(config.normalizer.sample_rate, None);
    }

    #[test]
    fn test_from_file_resolves_paths_and_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classifier.json");
        let mut file = fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"model_path": "models/rf.onnx", "normalizer": {{"alignment": "energy_peak", "sample_rate": 16000}}}}"#
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.model_path, dir.path().join("models/rf.onnx"));
        assert_eq!(config.dataset_path, dir.path().join("data_processed.npz"));
        assert_eq!(config.normalizer.alignment, AlignmentPolicy::EnergyPeak);
        assert_eq!(config.normalizer.sample_rate, Some(16000));
        assert_eq!(config.normalizer.hop_length, 512);
    }

    #[test]
    fn test_zero_sample_rate_rejected() {
        let mut config = AppConfig::default();
        config.normalizer.sample_rate = Some(0);
        assert!(matches!(config.validate(), Err(ClassifierError::Config(_))));
    }

    #[test]
    fn test_hop_longer_than_frame_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gappy.json");
        fs::write(
            &path,
            r#"{"normalizer": {"alignment": "energy_peak", "frame_length": 4, "hop_length": 10}}"#,
        )
        .unwrap();

        assert!(matches!(
            AppConfig::from_file(&path),
            Err(ClassifierError::Config(_))
        ));
    }

    #[test]
    fn test_empty_class_labels_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"class_labels": []}"#).unwrap();

        assert!(matches!(
            AppConfig::from_file(&path),
            Err(ClassifierError::Config(_))
        ));
    }
}
