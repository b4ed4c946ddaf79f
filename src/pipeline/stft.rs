//! Windowed FFT/iFFT helpers shared by the realtime and batch pipelines.
//!
//! Grounded on `dsp/dtln_denoiser.rs`'s own per-frame windowed-FFT bookkeeping
//! (analysis window -> `rustfft` forward transform -> magnitude/phase ->
//! ... -> inverse transform -> synthesis window): the same shape, applied to
//! whole `(channels, window_size, windows_per_block)` tensors instead of one
//! frame at a time; `rustfft` has no built-in real-to-complex transform, so a
//! real window is forward-transformed as a zero-imaginary complex signal and
//! only the first `window_size/2 + 1` bins are kept, mirroring `numpy.fft.rfft`.

use ndarray::{Array1, Array2, Array3, ArrayView2, ArrayView3};
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// `sqrt(hanning(window_size))`, used as both analysis and synthesis window
/// (matching `GCCNMFProcessor.windowFunction`/`synthesisWindowFunction`).
/// Satisfies the COLA condition at `hop = window_size / 2`.
pub fn sqrt_hann(window_size: usize) -> Array1<f32> {
    hann(window_size).mapv(f32::sqrt)
}

/// Plain Hanning window, used by the batch pipeline's full-file STFT/iSTFT
/// (matching `computeComplexMixtureSpectrogram`'s `hanning` argument).
pub fn hann(window_size: usize) -> Array1<f32> {
    Array1::from_shape_fn(window_size, |n| 0.5 - 0.5 * (2.0 * PI * n as f32 / window_size as f32).cos())
}

/// Frames a full-length multi-channel signal into overlapping analysis
/// windows, shape `(channels, window_size, num_frames)`, with
/// `num_frames = (num_samples - window_size) / hop_size + 1` (frames that
/// would run past the end of the signal are dropped, matching
/// `librosa`'s `center=False` framing).
pub fn frame_signal(signal: ArrayView2<f32>, window_size: usize, hop_size: usize) -> Array3<f32> {
    let (channels, num_samples) = (signal.shape()[0], signal.shape()[1]);
    if num_samples < window_size {
        return Array3::zeros((channels, window_size, 0));
    }
    let num_frames = (num_samples - window_size) / hop_size + 1;
    Array3::from_shape_fn((channels, window_size, num_frames), |(ch, n, t)| signal[[ch, t * hop_size + n]])
}

/// Inverse of `frame_signal` via overlap-add: reconstructs a full-length
/// signal from overlapping windowed frames, each already synthesis-windowed.
pub fn overlap_add_signal(frames: ArrayView3<f32>, hop_size: usize) -> Array2<f32> {
    let (channels, window_size, num_frames) = (frames.shape()[0], frames.shape()[1], frames.shape()[2]);
    let num_samples = if num_frames == 0 { 0 } else { (num_frames - 1) * hop_size + window_size };
    let mut signal = Array2::<f32>::zeros((channels, num_samples));
    for ch in 0..channels {
        for t in 0..num_frames {
            for n in 0..window_size {
                signal[[ch, t * hop_size + n]] += frames[[ch, n, t]];
            }
        }
    }
    signal
}

pub struct StftPlan {
    pub window_size: usize,
    pub num_frequencies: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl StftPlan {
    pub fn new(window_size: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        StftPlan {
            window_size,
            num_frequencies: window_size / 2 + 1,
            forward: planner.plan_fft_forward(window_size),
            inverse: planner.plan_fft_inverse(window_size),
        }
    }

    /// Windows and forward-transforms `windowed` (`channels x window_size x
    /// windows_per_block`), returning the half-spectrum
    /// `channels x num_frequencies x windows_per_block`.
    pub fn forward(&self, windowed: ArrayView3<f32>, analysis_window: &Array1<f32>) -> Array3<Complex32> {
        let (channels, window_size, frames) = (windowed.shape()[0], windowed.shape()[1], windowed.shape()[2]);
        assert_eq!(window_size, self.window_size);

        let mut spectrogram = Array3::<Complex32>::zeros((channels, self.num_frequencies, frames));
        let mut scratch = vec![Complex32::new(0.0, 0.0); window_size];
        for ch in 0..channels {
            for t in 0..frames {
                for n in 0..window_size {
                    scratch[n] = Complex32::new(windowed[[ch, n, t]] * analysis_window[n], 0.0);
                }
                self.forward.process(&mut scratch);
                for f in 0..self.num_frequencies {
                    spectrogram[[ch, f, t]] = scratch[f];
                }
            }
        }
        spectrogram
    }

    /// Inverse-transforms a half-spectrum back to `channels x window_size x
    /// windows_per_block` real samples, applying the synthesis window and
    /// normalizing by `window_size` (`rustfft` transforms are unnormalized).
    pub fn inverse(&self, spectrogram: &Array3<Complex32>, synthesis_window: &Array1<f32>) -> Array3<f32> {
        let (channels, num_freq, frames) = (spectrogram.shape()[0], spectrogram.shape()[1], spectrogram.shape()[2]);
        assert_eq!(num_freq, self.num_frequencies);
        let window_size = self.window_size;

        let mut result = Array3::<f32>::zeros((channels, window_size, frames));
        let mut scratch = vec![Complex32::new(0.0, 0.0); window_size];
        let scale = 1.0 / window_size as f32;
        for ch in 0..channels {
            for t in 0..frames {
                for f in 0..num_freq {
                    scratch[f] = spectrogram[[ch, f, t]];
                }
                // Reconstruct the conjugate-symmetric upper half so the
                // inverse of a real-valued signal comes back real.
                for f in num_freq..window_size {
                    scratch[f] = scratch[window_size - f].conj();
                }
                self.inverse.process(&mut scratch);
                for n in 0..window_size {
                    result[[ch, n, t]] = scratch[n].re * scale * synthesis_window[n];
                }
            }
        }
        result
    }
}

/// Overlap-adds already-synthesis-windowed frames and normalizes by the
/// overlap-added squared window, the standard OLA reconstruction used when
/// a signal is windowed once on analysis and once on synthesis (as in
/// `istft`). `hann`'s self-overlap is only exactly constant at a handful of
/// hop ratios, so this divides it out explicitly rather than assuming COLA.
pub fn overlap_add_normalized(windowed_frames: ArrayView3<f32>, window: &Array1<f32>, hop_size: usize) -> Array2<f32> {
    let (window_size, num_frames) = (windowed_frames.shape()[1], windowed_frames.shape()[2]);
    let numerator = overlap_add_signal(windowed_frames, hop_size);
    let num_samples = numerator.shape()[1];

    let mut denom = Array1::<f32>::zeros(num_samples);
    for t in 0..num_frames {
        for n in 0..window_size {
            denom[t * hop_size + n] += window[n] * window[n];
        }
    }

    let mut result = numerator;
    for mut row in result.axis_iter_mut(ndarray::Axis(0)) {
        for (x, &d) in row.iter_mut().zip(denom.iter()) {
            *x /= d.max(1e-8);
        }
    }
    result
}

/// Per-frequency-bin magnitude averaged across channels and frames, used for
/// the `-mean(|X|)^(1/3)` history-buffer transforms in `processFrames`.
pub fn mean_magnitude_cube_root(spectrogram: &Array3<Complex32>) -> ndarray::Array1<f32> {
    let (channels, num_freq, frames) = (spectrogram.shape()[0], spectrogram.shape()[1], spectrogram.shape()[2]);
    ndarray::Array1::from_shape_fn(num_freq, |f| {
        let mut total = 0.0f32;
        let mut count = 0usize;
        for ch in 0..channels {
            for t in 0..frames {
                total += spectrogram[[ch, f, t]].norm();
                count += 1;
            }
        }
        let mean = total / count.max(1) as f32;
        -mean.cbrt()
    })
}
