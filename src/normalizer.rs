//! Fitting variable-length waveforms to the classifier's fixed input width.
//!
//! The pipeline is: decode, optional silence trim, optional peak
//! normalization, then one [`AlignmentPolicy`]. Every emitted row has exactly
//! `target_length` samples.

use log::debug;
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::audio_processor::AudioProcessor;
use crate::config::NormalizerConfig;
use crate::{ClassifierError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentPolicy {
    /// Keep the first `target` samples, zero-pad at the end.
    PadEnd,
    /// Symmetric crop or pad around the middle.
    Center,
    /// Window centered on the loudest RMS frame, clamped to the buffer.
    EnergyPeak,
    /// Repeat the signal until it covers the target, then truncate.
    LoopTile,
    /// Left, center and right aligned variants stacked as three rows.
    #[default]
    Scan,
}

impl AlignmentPolicy {
    pub fn candidate_count(&self) -> usize {
        match self {
            AlignmentPolicy::Scan => 3,
            _ => 1,
        }
    }
}

impl std::str::FromStr for AlignmentPolicy {
    type Err = ClassifierError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pad_end" | "pad-end" => Ok(AlignmentPolicy::PadEnd),
            "center" => Ok(AlignmentPolicy::Center),
            "energy_peak" | "energy-peak" => Ok(AlignmentPolicy::EnergyPeak),
            "loop_tile" | "loop-tile" => Ok(AlignmentPolicy::LoopTile),
            "scan" => Ok(AlignmentPolicy::Scan),
            other => Err(ClassifierError::Config(format!(
                "unknown alignment policy: {}",
                other
            ))),
        }
    }
}

pub struct WaveformNormalizer {
    audio_processor: AudioProcessor,
    config: NormalizerConfig,
    target_length: usize,
}

impl WaveformNormalizer {
    pub fn new(config: NormalizerConfig, target_length: usize) -> Result<Self> {
        if target_length == 0 {
            return Err(ClassifierError::Config("target length must be positive".into()));
        }
        config.validate()?;

        Ok(Self {
            audio_processor: AudioProcessor::new(config.sample_rate),
            config,
            target_length,
        })
    }

    pub fn target_length(&self) -> usize {
        self.target_length
    }

    pub fn alignment(&self) -> AlignmentPolicy {
        self.config.alignment
    }

    /// Decode a WAVE buffer and turn it into a `(1, target)` or `(3, target)`
    /// batch.
    pub fn process_bytes(&self, data: &[u8]) -> Result<Array2<f32>> {
        let waveform = self.audio_processor.decode_bytes(data)?;
        debug!(
            "Normalizing {} samples ({:.2} seconds) to {} with {:?}",
            waveform.samples.len(),
            waveform.duration_secs(),
            self.target_length,
            self.config.alignment
        );
        Ok(self.process_samples(&waveform.samples))
    }

    pub fn process_samples(&self, samples: &[f32]) -> Array2<f32> {
        let trimmed = match self.config.trim_top_db {
            Some(top_db) => trim_silence(
                samples,
                top_db,
                self.config.frame_length,
                self.config.hop_length,
            ),
            None => samples,
        };

        let mut signal = trimmed.to_vec();
        if self.config.peak_normalize {
            normalize_peak(&mut signal);
        }

        self.fit(&signal)
    }

    pub fn fit(&self, samples: &[f32]) -> Array2<f32> {
        let target = self.target_length;
        let rows = match self.config.alignment {
            AlignmentPolicy::PadEnd => vec![pad_end(samples, target)],
            AlignmentPolicy::Center => vec![center_fit(samples, target)],
            AlignmentPolicy::EnergyPeak => vec![energy_peak_window(
                samples,
                target,
                self.config.frame_length,
                self.config.hop_length,
            )],
            AlignmentPolicy::LoopTile => vec![loop_tile(samples, target)],
            AlignmentPolicy::Scan => scan_candidates(samples, target).into(),
        };
        stack_rows(&rows, target)
    }
}

fn stack_rows(rows: &[Vec<f32>], width: usize) -> Array2<f32> {
    let mut batch = Array2::zeros((rows.len(), width));
    for (mut dst, src) in batch.rows_mut().into_iter().zip(rows) {
        dst.assign(&ArrayView1::from(src.as_slice()));
    }
    batch
}

/// Keep the first `target` samples; zero-pad at the end.
pub fn pad_end(samples: &[f32], target: usize) -> Vec<f32> {
    let mut out = samples[..samples.len().min(target)].to_vec();
    out.resize(target, 0.0);
    out
}

/// Keep the last `target` samples; zero-pad at the start.
pub fn align_end(samples: &[f32], target: usize) -> Vec<f32> {
    if samples.len() >= target {
        return samples[samples.len() - target..].to_vec();
    }
    let mut out = vec![0.0; target - samples.len()];
    out.extend_from_slice(samples);
    out
}

/// Centered crop, or centered pad with the odd sample going to the right.
pub fn center_fit(samples: &[f32], target: usize) -> Vec<f32> {
    let len = samples.len();
    if len >= target {
        let start = (len - target) / 2;
        return samples[start..start + target].to_vec();
    }
    let left = (target - len) / 2;
    let mut out = Vec::with_capacity(target);
    out.resize(left, 0.0);
    out.extend_from_slice(samples);
    out.resize(target, 0.0);
    out
}

pub fn loop_tile(samples: &[f32], target: usize) -> Vec<f32> {
    if samples.is_empty() {
        return vec![0.0; target];
    }
    samples.iter().copied().cycle().take(target).collect()
}

pub fn energy_peak_window(
    samples: &[f32],
    target: usize,
    frame_length: usize,
    hop_length: usize,
) -> Vec<f32> {
    let len = samples.len();
    if len == 0 {
        return vec![0.0; target];
    }

    let energies = frame_rms(samples, frame_length, hop_length);
    let peak_frame = argmax(&energies).unwrap_or(0);
    let frame_start = peak_frame * hop_length;
    let frame_end = (frame_start + frame_length).min(len);
    let peak_center = (frame_start + frame_end) / 2;

    if len >= target {
        let start = peak_center.saturating_sub(target / 2).min(len - target);
        return samples[start..start + target].to_vec();
    }

    // Shorter than the window: shift the signal so its peak lands near the middle.
    let offset = (target / 2).saturating_sub(peak_center).min(target - len);
    let mut out = vec![0.0; offset];
    out.extend_from_slice(samples);
    out.resize(target, 0.0);
    out
}

/// Left-aligned, center-aligned and right-aligned pad-or-crop variants.
pub fn scan_candidates(samples: &[f32], target: usize) -> [Vec<f32>; 3] {
    [
        pad_end(samples, target),
        center_fit(samples, target),
        align_end(samples, target),
    ]
}

/// Drop leading and trailing frames quieter than `top_db` below the loudest
/// frame. All-silent input comes back untouched.
pub fn trim_silence(
    samples: &[f32],
    top_db: f32,
    frame_length: usize,
    hop_length: usize,
) -> &[f32] {
    let energies = frame_rms(samples, frame_length, hop_length);
    let max_energy = energies.iter().copied().fold(0.0f32, f32::max);
    if max_energy <= 0.0 {
        return samples;
    }

    let threshold = max_energy * db_to_linear(-top_db.abs());
    let first = energies.iter().position(|&e| e > threshold);
    let last = energies.iter().rposition(|&e| e > threshold);

    match (first, last) {
        (Some(first), Some(last)) => {
            let start = first * hop_length;
            let end = (last * hop_length + frame_length).min(samples.len());
            &samples[start..end]
        }
        _ => samples,
    }
}

/// Scale so the largest magnitude is 1.0. Silent input is left as is.
pub fn normalize_peak(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak == 0.0 {
        return;
    }
    for sample in samples.iter_mut() {
        *sample /= peak;
    }
}

/// RMS per frame. Frames start every `hop_length` samples; the last frame
/// is cut short so the whole buffer is covered.
pub fn frame_rms(samples: &[f32], frame_length: usize, hop_length: usize) -> Vec<f32> {
    let len = samples.len();
    if len == 0 {
        return Vec::new();
    }
    let n_frames = if len <= frame_length {
        1
    } else {
        (len - frame_length).div_ceil(hop_length) + 1
    };

    (0..n_frames)
        .map(|k| k * hop_length)
        .take_while(|&start| start < len)
        .map(|start| {
            let end = (start + frame_length).min(len);
            root_mean_square(&samples[start..end])
        })
        .collect()
}

fn root_mean_square(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum = samples.iter().map(|s| s * s).sum::<f32>();
    (sum / samples.len() as f32).sqrt()
}

fn db_to_linear(db: f32) -> f32 {
    10_f32.powf(db / 20.0)
}

/// Index of the first maximum.
fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}
