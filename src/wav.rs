//! 16-bit PCM WAV read/write for the batch pipeline and dictionary
//! pretraining corpus, backed by `hound`.
//!
//! Conversion constants match `saveTargetSignalEstimates`/`loadMixtureSignal`
//! in the original implementation: samples are scaled by `2**16/2 = 32768`
//! in each direction, with output clipped to `[-1, 1]` before quantization.

use crate::error::{GccNmfError, Result};
use ndarray::Array2;
use std::path::Path;

const PCM_SCALE: f32 = 32_768.0;

/// A multi-channel signal as `f32` samples in `[-1, 1]`, one row per
/// channel, loaded from (or destined for) a 16-bit PCM WAV file.
#[derive(Debug, Clone)]
pub struct WavSignal {
    pub samples: Array2<f32>, // (channels, num_samples)
    pub sample_rate: u32,
}

impl WavSignal {
    pub fn num_channels(&self) -> usize {
        self.samples.shape()[0]
    }

    pub fn num_samples(&self) -> usize {
        self.samples.shape()[1]
    }

    pub fn load(path: &Path) -> Result<Self> {
        let reader = hound::WavReader::open(path)
            .map_err(|e| GccNmfError::IoError(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))?;
        let spec = reader.spec();
        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            return Err(GccNmfError::invalid(format!(
                "{}: expected 16-bit PCM, found {}-bit {:?}",
                path.display(),
                spec.bits_per_sample,
                spec.sample_format
            )));
        }
        let channels = spec.channels as usize;
        let interleaved: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| GccNmfError::IoError(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))?;

        let num_samples = interleaved.len() / channels;
        let mut samples = Array2::<f32>::zeros((channels, num_samples));
        for (i, frame) in interleaved.chunks_exact(channels).enumerate() {
            for (ch, &s) in frame.iter().enumerate() {
                samples[[ch, i]] = pcm_to_float(s);
            }
        }
        Ok(WavSignal {
            samples,
            sample_rate: spec.sample_rate,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let spec = hound::WavSpec {
            channels: self.num_channels() as u16,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)
            .map_err(|e| GccNmfError::IoError(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        let (channels, n) = (self.num_channels(), self.num_samples());
        for i in 0..n {
            for ch in 0..channels {
                writer
                    .write_sample(float_to_pcm(self.samples[[ch, i]]))
                    .map_err(|e| GccNmfError::IoError(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
            }
        }
        writer
            .finalize()
            .map_err(|e| GccNmfError::IoError(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
    }
}

pub fn pcm_to_float(sample: i16) -> f32 {
    sample as f32 / PCM_SCALE
}

pub fn float_to_pcm(sample: f32) -> i16 {
    let clipped = sample.clamp(-1.0, 1.0);
    (clipped * (PCM_SCALE - 1.0)).round() as i16
}
