//! Whole-file offline source separation: the non-realtime counterpart to
//! [`super::realtime::RealtimePipeline`], transcribed from `runGCCNMF.py`.
//!
//! Where the realtime pipeline consumes fixed-size blocks and maintains
//! shared-memory history buffers for a UI, the batch pipeline loads an
//! entire two-channel recording, factors its full magnitude spectrogram
//! once, estimates a fixed number of target directions, and writes one WAV
//! file per separated target.

use crate::error::{GccNmfError, Result};
use crate::gcc_phat::{self, tdoas_in_seconds};
use crate::nmf::{self, NmfFactorization};
use crate::wav::WavSignal;

use super::stft::{frame_signal, hann, overlap_add_normalized, StftPlan};

use ndarray::{s, Array1, Array2, Array3, Axis};
use rustfft::num_complex::Complex32;
use std::path::{Path, PathBuf};

/// Tunable parameters for one offline separation run, matching the
/// module-level constants in `runGCCNMF.py`'s `__main__` block.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub window_size: usize,
    pub hop_size: usize,
    pub num_tdoas: usize,
    pub microphone_separation_in_metres: f32,
    pub dictionary_size: usize,
    pub num_iterations: usize,
    pub sparsity_alpha: f32,
    /// `None` falls back to the k-means(k=2) peak-clustering heuristic;
    /// `Some(n)` takes the `n` largest angular-spectrum peaks instead.
    pub num_sources: Option<usize>,
    pub seed: u64,
}

impl BatchConfig {
    pub fn defaults() -> Self {
        BatchConfig {
            window_size: 1024,
            hop_size: 128,
            num_tdoas: 128,
            microphone_separation_in_metres: 1.0,
            dictionary_size: 128,
            num_iterations: 100,
            sparsity_alpha: 0.0,
            num_sources: None,
            seed: 0,
        }
    }
}

pub struct BatchPipeline {
    config: BatchConfig,
}

impl BatchPipeline {
    pub fn new(config: BatchConfig) -> Self {
        BatchPipeline { config }
    }

    /// Loads `input_path`, separates it into `config.num_sources` (or as
    /// many as the clustering fallback finds) target signals, and writes
    /// each as `<output_dir>/<prefix>_sim_<n>.wav`. Returns the written
    /// paths, ordered left-to-right by estimated TDOA.
    pub fn process_file(&self, input_path: &Path, output_dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
        let mixture = WavSignal::load(input_path)?;
        let targets = self.separate(&mixture)?;

        std::fs::create_dir_all(output_dir).map_err(GccNmfError::IoError)?;
        let mut paths = Vec::with_capacity(targets.len());
        for (target_index, samples) in targets.into_iter().enumerate() {
            let path = output_dir.join(format!("{prefix}_sim_{}.wav", target_index + 1));
            let signal = WavSignal {
                samples,
                sample_rate: mixture.sample_rate,
            };
            signal.save(&path)?;
            paths.push(path);
        }
        Ok(paths)
    }

    /// Runs the full separation algorithm, returning one `(channels,
    /// num_samples)` signal per estimated target, ordered left-to-right.
    pub fn separate(&self, mixture: &WavSignal) -> Result<Vec<Array2<f32>>> {
        if mixture.num_channels() != 2 {
            return Err(GccNmfError::invalid(format!(
                "batch separation requires a stereo mixture, found {} channel(s)",
                mixture.num_channels()
            )));
        }
        let cfg = &self.config;
        let window = hann(cfg.window_size);
        let stft = StftPlan::new(cfg.window_size);

        let frames = frame_signal(mixture.samples.view(), cfg.window_size, cfg.hop_size);
        let spectrogram = stft.forward(frames.view(), &window); // (2, F, T)
        let (num_freq, num_time) = (spectrogram.shape()[1], spectrogram.shape()[2]);
        let frequencies_hz = gcc_phat::frequencies_in_hz(mixture.sample_rate, num_freq);

        // V = concatenate(abs(complexMixtureSpectrogram), axis=-1): the two
        // channels' magnitude spectrograms side by side along time.
        let mut v = Array2::<f32>::zeros((num_freq, 2 * num_time));
        for ch in 0..2 {
            for f in 0..num_freq {
                for t in 0..num_time {
                    v[[f, ch * num_time + t]] = spectrogram[[ch, f, t]].norm();
                }
            }
        }

        let NmfFactorization { w, h } = nmf::kl_nmf(&v, cfg.dictionary_size, cfg.num_iterations, cfg.sparsity_alpha, cfg.seed);
        let stereo_h = [h.slice(s![.., 0..num_time]).to_owned(), h.slice(s![.., num_time..2 * num_time]).to_owned()];

        let channel0 = spectrogram.index_axis(Axis(0), 0);
        let channel1 = spectrogram.index_axis(Axis(0), 1);
        let coherence = gcc_phat::coherence(channel0, channel1);

        let tdoas = tdoas_in_seconds(cfg.microphone_separation_in_metres, cfg.num_tdoas);
        let steering = gcc_phat::steering_matrix(&frequencies_hz, &tdoas);
        let angular_spectrogram = gcc_phat::angular_spectrogram(&coherence, &steering);
        let mean_spectrum = gcc_phat::mean_angular_spectrum(&angular_spectrogram);

        let target_tdoa_indexes = estimate_target_tdoa_indexes(&mean_spectrum, cfg.num_sources);
        if target_tdoa_indexes.is_empty() {
            return Err(GccNmfError::invalid("no target directions found in the angular spectrum"));
        }

        let target_gcc_nmfs = target_tdoa_gcc_nmfs(&coherence, &steering, &w, &target_tdoa_indexes);
        let coefficient_masks = target_coefficient_masks(&target_gcc_nmfs);
        let target_spectrograms = target_spectrogram_estimates(&coefficient_masks, &spectrogram, &w, &stereo_h);

        let mut results = Vec::with_capacity(target_tdoa_indexes.len());
        for target_spectrogram in &target_spectrograms {
            let windowed = stft.inverse(target_spectrogram, &window);
            let signal = overlap_add_normalized(windowed.view(), &window, cfg.hop_size);
            results.push(signal);
        }
        Ok(results)
    }
}

/// Interior local maxima of `spectrum`, matching `scipy.signal.argrelmax`'s
/// default `order=1, mode='clip'` (endpoints never compare as greater than
/// themselves, so they're never reported).
fn local_maxima(spectrum: &Array1<f32>) -> Vec<usize> {
    let n = spectrum.len();
    (1..n.saturating_sub(1))
        .filter(|&i| spectrum[i] > spectrum[i - 1] && spectrum[i] > spectrum[i + 1])
        .collect()
}

/// Picks target TDOA indexes from the mean angular spectrum's local maxima:
/// the `num_sources` largest peaks by amplitude if given, otherwise a
/// k-means(k=2) split of peak amplitudes with the higher-mean cluster kept
/// (init deterministically at the peak extremes rather than
/// `sklearn`'s randomized restarts). Returned left-to-right by TDOA index.
fn estimate_target_tdoa_indexes(mean_spectrum: &Array1<f32>, num_sources: Option<usize>) -> Vec<usize> {
    let peaks = local_maxima(mean_spectrum);
    if peaks.is_empty() {
        return Vec::new();
    }

    let mut selected: Vec<usize> = match num_sources {
        Some(n) => {
            let mut by_amplitude = peaks.clone();
            by_amplitude.sort_by(|&a, &b| mean_spectrum[a].partial_cmp(&mean_spectrum[b]).unwrap());
            by_amplitude.into_iter().rev().take(n).collect()
        }
        None => {
            let values: Vec<f32> = peaks.iter().map(|&i| mean_spectrum[i]).collect();
            let (labels, centers) = kmeans_2(&values);
            let source_cluster = if centers[0] >= centers[1] { 0 } else { 1 };
            peaks
                .iter()
                .zip(labels.iter())
                .filter(|(_, &label)| label == source_cluster)
                .map(|(&i, _)| i)
                .collect()
        }
    };
    selected.sort_unstable();
    selected
}

/// Lloyd's algorithm for 1-D k-means with `k=2`, initialized at the sample
/// minimum and maximum (deterministic, since the original's randomized
/// multi-restart init has no direct equivalent without pulling in a
/// clustering crate this pack never uses).
fn kmeans_2(values: &[f32]) -> (Vec<usize>, [f32; 2]) {
    if values.is_empty() {
        return (Vec::new(), [0.0, 0.0]);
    }
    let min = values.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let mut centers = [min, max];

    let mut labels = vec![0usize; values.len()];
    for _ in 0..50 {
        let mut changed = false;
        for (i, &v) in values.iter().enumerate() {
            let label = if (v - centers[0]).abs() <= (v - centers[1]).abs() { 0 } else { 1 };
            if labels[i] != label {
                changed = true;
            }
            labels[i] = label;
        }

        for cluster in 0..2 {
            let members: Vec<f32> = values
                .iter()
                .zip(labels.iter())
                .filter(|(_, &l)| l == cluster)
                .map(|(&v, _)| v)
                .collect();
            if !members.is_empty() {
                centers[cluster] = members.iter().sum::<f32>() / members.len() as f32;
            }
        }
        if !changed {
            break;
        }
    }
    (labels, centers)
}

/// Per-target GCC-NMF atom activations projected through a single
/// hypothesis TDOA, shape `(num_targets, num_atoms, num_time)`. Matches
/// `getTargetTDOAGCCNMFs`.
fn target_tdoa_gcc_nmfs(
    coherence: &Array2<Complex32>,
    steering: &Array2<Complex32>,
    w: &Array2<f32>,
    target_tdoa_indexes: &[usize],
) -> Array3<f32> {
    let (num_freq, num_time) = (coherence.shape()[0], coherence.shape()[1]);
    let num_atoms = w.shape()[1];
    assert_eq!(w.shape()[0], num_freq);

    let mut result = Array3::<f32>::zeros((target_tdoa_indexes.len(), num_atoms, num_time));
    for (target_index, &tdoa_index) in target_tdoa_indexes.iter().enumerate() {
        for t in 0..num_time {
            for a in 0..num_atoms {
                let mut acc = Complex32::new(0.0, 0.0);
                for f in 0..num_freq {
                    acc += w[[f, a]] * coherence[[f, t]] * steering[[f, tdoa_index]];
                }
                result[[target_index, a, t]] = acc.re;
            }
        }
    }
    result
}

/// Hard per-target coefficient mask: each `(atom, time)` cell is assigned
/// to whichever target's GCC-NMF activation is largest there. Matches
/// `getTargetCoefficientMasks`.
fn target_coefficient_masks(target_gcc_nmfs: &Array3<f32>) -> Array3<f32> {
    let (num_targets, num_atoms, num_time) = (
        target_gcc_nmfs.shape()[0],
        target_gcc_nmfs.shape()[1],
        target_gcc_nmfs.shape()[2],
    );
    let mut masks = Array3::<f32>::zeros((num_targets, num_atoms, num_time));
    for a in 0..num_atoms {
        for t in 0..num_time {
            let mut best_target = 0usize;
            let mut best_value = f32::NEG_INFINITY;
            for target_index in 0..num_targets {
                let value = target_gcc_nmfs[[target_index, a, t]];
                if value > best_value {
                    best_value = value;
                    best_target = target_index;
                }
            }
            masks[[best_target, a, t]] = 1.0;
        }
    }
    masks
}

/// Reconstructs each target's complex spectrogram: `W . (H * mask)` gives a
/// magnitude estimate per channel, which is then rephased by the original
/// mixture's phase. Matches `getTargetSpectrogramEstimates`.
fn target_spectrogram_estimates(
    coefficient_masks: &Array3<f32>,
    mixture_spectrogram: &Array3<Complex32>,
    w: &Array2<f32>,
    stereo_h: &[Array2<f32>; 2],
) -> Vec<Array3<Complex32>> {
    let num_targets = coefficient_masks.shape()[0];
    let (num_channels, num_freq, num_time) = (
        mixture_spectrogram.shape()[0],
        mixture_spectrogram.shape()[1],
        mixture_spectrogram.shape()[2],
    );

    let mut estimates = Vec::with_capacity(num_targets);
    for target_index in 0..num_targets {
        let mask = coefficient_masks.index_axis(Axis(0), target_index); // (atoms, time)
        let mut spectrogram = Array3::<Complex32>::zeros((num_channels, num_freq, num_time));
        for ch in 0..num_channels {
            let masked_h = &stereo_h[ch] * &mask; // (atoms, time)
            let magnitude = w.dot(&masked_h); // (F, T)
            for f in 0..num_freq {
                for t in 0..num_time {
                    let phase = mixture_spectrogram[[ch, f, t]].arg();
                    spectrogram[[ch, f, t]] = Complex32::from_polar(magnitude[[f, t]], phase);
                }
            }
        }
        estimates.push(spectrogram);
    }
    estimates
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn synthetic_stereo_mixture(sample_rate: u32, seconds: f32) -> WavSignal {
        let num_samples = (sample_rate as f32 * seconds) as usize;
        let mut samples = Array2::<f32>::zeros((2, num_samples));
        for i in 0..num_samples {
            let t = i as f32 / sample_rate as f32;
            let left = 0.4 * (2.0 * PI * 440.0 * t).sin();
            let right = 0.4 * (2.0 * PI * 660.0 * t).sin();
            samples[[0, i]] = left + 0.1 * right;
            samples[[1, i]] = 0.1 * left + right;
        }
        WavSignal { samples, sample_rate }
    }

    #[test]
    fn local_maxima_ignores_endpoints_and_plateaus() {
        let spectrum = Array1::from(vec![5.0, 1.0, 3.0, 1.0, 4.0]);
        assert_eq!(local_maxima(&spectrum), vec![2, 4]);
    }

    #[test]
    fn kmeans_2_separates_two_well_apart_clusters() {
        let values = vec![0.1, 0.2, 0.15, 9.0, 9.2, 8.9];
        let (labels, centers) = kmeans_2(&values);
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[3]);
        assert!((centers[0] - centers[1]).abs() > 5.0);
    }

    #[test]
    fn separate_produces_requested_number_of_targets_with_matching_channel_count() {
        let mixture = synthetic_stereo_mixture(16_000, 1.0);
        let pipeline = BatchPipeline::new(BatchConfig {
            window_size: 256,
            hop_size: 64,
            num_tdoas: 32,
            microphone_separation_in_metres: 0.2,
            dictionary_size: 16,
            num_iterations: 10,
            sparsity_alpha: 0.0,
            num_sources: Some(2),
            seed: 1,
        });

        let targets = pipeline.separate(&mixture).expect("separation should succeed");
        assert_eq!(targets.len(), 2);
        for target in &targets {
            assert_eq!(target.shape()[0], 2);
            assert!(target.shape()[1] > 0);
            assert!(target.iter().all(|x| x.is_finite()));
        }
    }

    #[test]
    fn rejects_a_mono_mixture() {
        let mixture = WavSignal {
            samples: Array2::<f32>::zeros((1, 1000)),
            sample_rate: 16_000,
        };
        let pipeline = BatchPipeline::new(BatchConfig::defaults());
        assert!(pipeline.separate(&mixture).is_err());
    }
}
