use hound::{SampleFormat, WavReader};
use log::debug;
use rubato::{FftFixedIn, Resampler};
use std::io::{Cursor, Read};
use crate::{ClassifierError, Result};

/// Mono samples in [-1.0, 1.0] at a known sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Decodes WAVE containers. With `target_sample_rate == None` the file's
/// native rate is kept.
pub struct AudioProcessor {
    target_sample_rate: Option<u32>,
}

impl AudioProcessor {
    pub fn new(target_sample_rate: Option<u32>) -> Self {
        Self { target_sample_rate }
    }

    pub fn decode_bytes(&self, data: &[u8]) -> Result<Waveform> {
        let reader = WavReader::new(Cursor::new(data))?;
        self.decode(reader)
    }

    fn decode<R: Read>(&self, mut reader: WavReader<R>) -> Result<Waveform> {
        let spec = reader.spec();
        if spec.channels == 0 {
            return Err(ClassifierError::Decode("WAV header declares zero channels".into()));
        }
        if spec.sample_rate == 0 {
            return Err(ClassifierError::Decode("WAV header declares a zero sample rate".into()));
        }

        let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Float, 32) => reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()?,
            (SampleFormat::Int, bits @ (8 | 16 | 24 | 32)) => {
                let scale = (1u64 << (bits - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|sample| sample as f32 / scale))
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
            (format, bits) => {
                return Err(ClassifierError::Decode(format!(
                    "unsupported sample format: {:?} {}-bit",
                    format, bits
                )));
            }
        };

        let mut samples = to_mono(&interleaved, spec.channels as usize);
        let mut sample_rate = spec.sample_rate;

        if let Some(target) = self.target_sample_rate {
            if target != sample_rate {
                samples = resample(&samples, sample_rate, target)?;
                sample_rate = target;
            }
        }

        debug!(
            "Decoded {} channel(s) at {} Hz into {} mono samples at {} Hz",
            spec.channels,
            spec.sample_rate,
            samples.len(),
            sample_rate
        );

        Ok(Waveform { samples, sample_rate })
    }
}

fn to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

const RESAMPLE_CHUNK: usize = 1024;

fn resample_error<E: std::fmt::Display>(err: E) -> ClassifierError {
    ClassifierError::Decode(format!("resampling failed: {}", err))
}

/// Band-limited FFT resampling. The output is aligned to the input (the
/// resampler's delay is dropped) and has exactly `len * to / from` samples.
fn resample(audio: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if audio.is_empty() || from_rate == to_rate {
        return Ok(audio.to_vec());
    }

    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        RESAMPLE_CHUNK,
        2,
        1,
    )
    .map_err(resample_error)?;

    let expected_len = (audio.len() as f64 * to_rate as f64 / from_rate as f64).round() as usize;
    let delay = resampler.output_delay();
    let mut out = Vec::with_capacity(expected_len + delay + RESAMPLE_CHUNK);

    let mut chunks = audio.chunks_exact(RESAMPLE_CHUNK);
    for chunk in &mut chunks {
        let frames = resampler
            .process(&[chunk.to_vec()], None)
            .map_err(resample_error)?;
        out.extend_from_slice(&frames[0]);
    }

    let rest = chunks.remainder();
    if !rest.is_empty() {
        let frames = resampler
            .process_partial(Some(&[rest.to_vec()]), None)
            .map_err(resample_error)?;
        out.extend_from_slice(&frames[0]);
    }

    // Flush the filter tail until the delayed signal is fully out.
    for _ in 0..(delay / RESAMPLE_CHUNK + 2) {
        if out.len() >= expected_len + delay {
            break;
        }
        let frames = resampler
            .process_partial::<Vec<f32>>(None, None)
            .map_err(resample_error)?;
        if frames[0].is_empty() {
            break;
        }
        out.extend_from_slice(&frames[0]);
    }

    let mut aligned: Vec<f32> = out.into_iter().skip(delay).take(expected_len).collect();
    aligned.resize(expected_len, 0.0);
    Ok(aligned)
}
