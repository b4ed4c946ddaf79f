//! GCC-PHAT: steering matrix construction, PHAT-normalized cross-channel
//! coherence, and angular (TDOA) spectrum projection.
//!
//! Transcribed from `buildTheanoFunctions`'s steering-matrix setup and
//! `getAngularSpectrogram` in the original implementation. The steering
//! matrix and hypothesis TDOA grid are rebuilt whenever `microphoneSeparationInMetres`
//! or `numTDOAs` changes (a C8 rebuild), exactly as `GCCNMFProcessor.reset()`
//! rebuilds `expJOmegaTau` there.

use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};
use rustfft::num_complex::Complex32;
use std::f32::consts::PI;

pub const SPEED_OF_SOUND_IN_METRES_PER_SECOND: f32 = 340.29;

pub fn max_tdoa(microphone_separation_in_metres: f32) -> f32 {
    microphone_separation_in_metres / SPEED_OF_SOUND_IN_METRES_PER_SECOND
}

/// `numTDOAs` hypothesis TDOA values spanning `[-maxTDOA, maxTDOA]`.
pub fn tdoas_in_seconds(microphone_separation_in_metres: f32, num_tdoas: usize) -> Array1<f32> {
    let max_tdoa = max_tdoa(microphone_separation_in_metres);
    linspace(-max_tdoa, max_tdoa, num_tdoas)
}

/// `numFrequencies` frequency bins spanning `[0, sampleRate/2]`.
pub fn frequencies_in_hz(sample_rate: u32, num_frequencies: usize) -> Array1<f32> {
    linspace(0.0, sample_rate as f32 / 2.0, num_frequencies)
}

fn linspace(start: f32, end: f32, n: usize) -> Array1<f32> {
    if n == 1 {
        return Array1::from_elem(1, start);
    }
    let step = (end - start) / (n - 1) as f32;
    Array1::from_shape_fn(n, |i| start + step * i as f32)
}

/// The `(num_frequencies, num_tdoas)` steering matrix `E[f, k] = exp(-j*2*pi*freq_f*tdoa_k)`.
pub fn steering_matrix(frequencies_hz: &Array1<f32>, tdoas_seconds: &Array1<f32>) -> Array2<Complex32> {
    Array2::from_shape_fn((frequencies_hz.len(), tdoas_seconds.len()), |(f, k)| {
        let phase = -2.0 * PI * frequencies_hz[f] * tdoas_seconds[k];
        Complex32::new(phase.cos(), phase.sin())
    })
}

/// PHAT-normalized cross-channel coherence `V = X0 * conj(X1) / (|X0| * |X1|)`,
/// shape `(num_frequencies, num_time)`. Bins where either channel is silent
/// (`|X| == 0`) are set to zero rather than producing `NaN`.
pub fn coherence(channel0: ArrayView2<Complex32>, channel1: ArrayView2<Complex32>) -> Array2<Complex32> {
    assert_eq!(channel0.shape(), channel1.shape());
    Array2::from_shape_fn(
        (channel0.shape()[0], channel0.shape()[1]),
        |(f, t)| {
            let x0 = channel0[[f, t]];
            let x1 = channel1[[f, t]];
            let mag0 = x0.norm();
            let mag1 = x1.norm();
            if mag0 <= f32::EPSILON || mag1 <= f32::EPSILON {
                Complex32::new(0.0, 0.0)
            } else {
                (x0 * x1.conj()) / (mag0 * mag1)
            }
        },
    )
}

/// The per-TDOA-hypothesis complex GCC, shape `(num_frequencies, num_time, num_tdoas)`:
/// `complexGCC[f, t, k] = V[f, t] * E[f, k]`.
pub fn complex_gcc(v: &Array2<Complex32>, steering: &Array2<Complex32>) -> Array3<Complex32> {
    let (num_freq, num_time) = (v.shape()[0], v.shape()[1]);
    let num_tdoas = steering.shape()[1];
    Array3::from_shape_fn((num_freq, num_time, num_tdoas), |(f, t, k)| v[[f, t]] * steering[[f, k]])
}

/// Projects per-atom dictionary responses onto the per-TDOA-hypothesis GCC,
/// shape `(num_tdoas, num_time, num_atoms)`:
/// `gccNMF[k, t, a] = sum_f real(complexGCC[f, t, k]) * W[f, a]`.
pub fn gcc_nmf(real_gcc: &Array3<f32>, w: &Array2<f32>) -> Array3<f32> {
    let (num_freq, num_time, num_tdoas) = (real_gcc.shape()[0], real_gcc.shape()[1], real_gcc.shape()[2]);
    let num_atoms = w.shape()[1];
    assert_eq!(w.shape()[0], num_freq);

    let mut result = Array3::<f32>::zeros((num_tdoas, num_time, num_atoms));
    for k in 0..num_tdoas {
        for t in 0..num_time {
            for a in 0..num_atoms {
                let mut acc = 0.0f32;
                for f in 0..num_freq {
                    acc += real_gcc[[f, t, k]] * w[[f, a]];
                }
                result[[k, t, a]] = acc;
            }
        }
    }
    result
}

/// The angular spectrogram used for localization: projects the coherence
/// through the steering matrix and sums the real part over frequency,
/// shape `(num_tdoas, num_time)`. Matches `getAngularSpectrogram` exactly.
pub fn angular_spectrogram(v: &Array2<Complex32>, steering: &Array2<Complex32>) -> Array2<f32> {
    let gcc = complex_gcc(v, steering); // (F, T, TDOA)
    let summed = gcc.map(|c| c.re).sum_axis(Axis(0)); // (T, TDOA)
    summed.reversed_axes() // (TDOA, T)
}

/// Time-averaged angular spectrum, `(num_tdoas,)`, used to pick peak TDOAs.
pub fn mean_angular_spectrum(angular_spectrogram: &Array2<f32>) -> Array1<f32> {
    angular_spectrogram.mean_axis(Axis(1)).expect("non-empty time axis")
}
