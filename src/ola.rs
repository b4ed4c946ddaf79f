//! Overlap-add framer: turns fixed-size audio blocks into overlapping
//! analysis frames for STFT-domain processing, and the processed frames
//! back into fixed-size output blocks.
//!
//! Grounded directly on `OverlapAddProcessor` in the original implementation:
//! a rolling input buffer and a rolling output buffer, each `numBlocksPerBuffer`
//! blocks long. Each call shifts both buffers left by one block, appends the
//! new input block, slices `windowsPerBlock` overlapping analysis windows out
//! of the input buffer, hands them to the caller-supplied processing
//! function, overlap-adds the result back into the output buffer, and emits
//! one block of output delayed by two blocks relative to the input just
//! appended (a fixed, deterministic pipeline latency).

use crate::error::{GccNmfError, Result};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};

/// Number of blocks the rolling input/output buffers hold. Three is the
/// minimum: the framer always emits from two blocks behind the newest write,
/// so at least one more block of headroom is needed behind that.
const DEFAULT_BLOCKS_PER_BUFFER: usize = 8;

pub struct OlaFramer {
    num_channels: usize,
    window_size: usize,
    hop_size: usize,
    block_size: usize,
    windows_per_block: usize,
    blocks_per_buffer: usize,

    input_buffer: Array2<f32>,
    output_buffer: Array2<f32>,
    window_indexes: Vec<usize>,
}

impl OlaFramer {
    pub fn new(num_channels: usize, window_size: usize, hop_size: usize, block_size: usize) -> Result<Self> {
        Self::with_blocks_per_buffer(num_channels, window_size, hop_size, block_size, DEFAULT_BLOCKS_PER_BUFFER)
    }

    pub fn with_blocks_per_buffer(
        num_channels: usize,
        window_size: usize,
        hop_size: usize,
        block_size: usize,
        blocks_per_buffer: usize,
    ) -> Result<Self> {
        if hop_size == 0 || block_size % hop_size != 0 {
            return Err(GccNmfError::config(format!(
                "block_size ({}) must be a multiple of hop_size ({})",
                block_size, hop_size
            )));
        }
        let windows_per_block = block_size / hop_size;

        if blocks_per_buffer < 3 {
            return Err(GccNmfError::config(format!(
                "blocks_per_buffer ({}) must be >= 3: the framer emits output two \
                 blocks behind the newest write and needs one more block of headroom",
                blocks_per_buffer
            )));
        }
        let buffer_size = block_size * blocks_per_buffer;
        let window_span = window_size + (windows_per_block - 1) * hop_size;
        if window_span > buffer_size {
            return Err(GccNmfError::config(format!(
                "window_size ({}) and hop_size ({}) span {} samples, larger than the \
                 {}-block input buffer ({}); increase blocks_per_buffer",
                window_size, hop_size, window_span, blocks_per_buffer, buffer_size
            )));
        }

        let window_indexes: Vec<usize> = (0..windows_per_block)
            .map(|i| buffer_size - window_size - (windows_per_block - 1 - i) * hop_size)
            .collect();

        Ok(OlaFramer {
            num_channels,
            window_size,
            hop_size,
            block_size,
            windows_per_block,
            blocks_per_buffer,
            input_buffer: Array2::zeros((num_channels, buffer_size)),
            output_buffer: Array2::zeros((num_channels, buffer_size)),
            window_indexes,
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn windows_per_block(&self) -> usize {
        self.windows_per_block
    }

    pub fn reset(&mut self) {
        self.input_buffer.fill(0.0);
        self.output_buffer.fill(0.0);
    }

    /// Slices the current input buffer (after shifting in `input_block`)
    /// into `windows_per_block` overlapping analysis frames, shaped
    /// `(channels, window_size, windows_per_block)`.
    fn slice_windows(&self) -> Array3<f32> {
        let mut windowed = Array3::zeros((self.num_channels, self.window_size, self.windows_per_block));
        for (i, &start) in self.window_indexes.iter().enumerate() {
            let frame = self.input_buffer.slice(ndarray::s![.., start..start + self.window_size]);
            windowed.index_axis_mut(Axis(2), i).assign(&frame);
        }
        windowed
    }

    fn overlap_add(&mut self, processed: ArrayView3<f32>) {
        for (i, &start) in self.window_indexes.iter().enumerate() {
            let frame = processed.index_axis(Axis(2), i);
            let mut dst = self.output_buffer.slice_mut(ndarray::s![.., start..start + self.window_size]);
            dst += &frame;
        }
    }

    /// Advances the framer by one block: shifts `input_block` in, slices
    /// analysis windows, invokes `process` on them, overlap-adds the result,
    /// and returns the delayed output block.
    ///
    /// `process` receives `(channels, window_size, windows_per_block)` and
    /// must return a tensor of the same shape (e.g. windowed-STFT -> mask ->
    /// windowed-iSTFT).
    pub fn process_block<F>(&mut self, input_block: ArrayView2<f32>, mut process: F) -> Result<Array2<f32>>
    where
        F: FnMut(ArrayView3<f32>) -> Array3<f32>,
    {
        if input_block.shape() != [self.num_channels, self.block_size] {
            return Err(GccNmfError::invalid(format!(
                "expected input block shape ({}, {}), got {:?}",
                self.num_channels,
                self.block_size,
                input_block.shape()
            )));
        }

        let buffer_size = self.input_buffer.shape()[1];
        let b = self.block_size;

        shift_left_and_append(&mut self.input_buffer, input_block, b);
        shift_left_and_zero_tail(&mut self.output_buffer, b);

        let windowed = self.slice_windows();
        let processed = process(windowed.view());
        if processed.shape() != windowed.shape() {
            return Err(GccNmfError::invalid(format!(
                "processing callback changed shape from {:?} to {:?}",
                windowed.shape(),
                processed.shape()
            )));
        }
        self.overlap_add(processed.view());

        let emit_start = buffer_size - 3 * b;
        let emit_end = buffer_size - 2 * b;
        Ok(self.output_buffer.slice(ndarray::s![.., emit_start..emit_end]).to_owned())
    }
}

fn shift_left_and_append(buffer: &mut Array2<f32>, new_tail: ArrayView2<f32>, block_size: usize) {
    let size = buffer.shape()[1];
    for ch in 0..buffer.shape()[0] {
        let mut row = buffer.row_mut(ch);
        for i in 0..size - block_size {
            row[i] = row[i + block_size];
        }
    }
    buffer.slice_mut(ndarray::s![.., size - block_size..]).assign(&new_tail);
}

fn shift_left_and_zero_tail(buffer: &mut Array2<f32>, block_size: usize) {
    let size = buffer.shape()[1];
    for ch in 0..buffer.shape()[0] {
        let mut row = buffer.row_mut(ch);
        for i in 0..size - block_size {
            row[i] = row[i + block_size];
        }
    }
    buffer.slice_mut(ndarray::s![.., size - block_size..]).fill(0.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array1;

    /// A sqrt-Hann window satisfying COLA at `hop = window/2`.
    fn sqrt_hann(window_size: usize) -> Array1<f32> {
        (0..window_size)
            .map(|n| {
                let hann = 0.5 - 0.5 * (2.0 * std::f32::consts::PI * n as f32 / window_size as f32).cos();
                hann.sqrt()
            })
            .collect()
    }

    #[test]
    fn rejects_too_few_blocks_per_buffer() {
        let err = OlaFramer::with_blocks_per_buffer(2, 1024, 512, 512, 2).unwrap_err();
        assert!(matches!(err, GccNmfError::ConfigError(_)));
    }

    #[test]
    fn rejects_hop_not_dividing_block() {
        assert!(OlaFramer::new(2, 1024, 300, 512).is_err());
    }

    #[test]
    fn identity_processing_reproduces_input_after_latency() {
        // COLA-windowed identity pass-through should reproduce the input
        // signal exactly once the pipeline fills (after the fixed 2-block
        // latency), since sqrt-Hann squared sums to 1 at hop = window/2.
        let window_size = 8;
        let hop_size = 4;
        let block_size = 4;
        let win = sqrt_hann(window_size);

        let mut framer = OlaFramer::new(1, window_size, hop_size, block_size).unwrap();

        // Feed a long enough ramp signal to exercise multiple blocks.
        let total_blocks = 12;
        let mut all_input = Vec::new();
        let mut all_output = Vec::new();
        for b in 0..total_blocks {
            let block: Vec<f32> = (0..block_size).map(|i| (b * block_size + i) as f32 * 0.01).collect();
            all_input.extend_from_slice(&block);
            let input_arr = Array2::from_shape_vec((1, block_size), block).unwrap();
            let win = win.clone();
            let out = framer
                .process_block(input_arr.view(), move |windowed| {
                    let mut result = windowed.to_owned();
                    for mut col in result.axis_iter_mut(Axis(2)) {
                        for (mut row, w) in col.axis_iter_mut(Axis(0)).zip(win.iter()) {
                            for v in row.iter_mut() {
                                *v *= w * w; // analysis + synthesis window both applied
                            }
                        }
                    }
                    result
                })
                .unwrap();
            all_output.extend(out.row(0).to_vec());
        }

        // Skip the startup transient (first few blocks where the window
        // hasn't fully overlapped yet) and compare what's left, accounting
        // for the 2-block emission delay.
        let delay = 2 * block_size;
        let skip = window_size + delay;
        for i in skip..all_output.len() {
            assert_relative_eq!(all_output[i], all_input[i - delay], epsilon = 1e-4);
        }
    }

    #[test]
    fn output_block_shape_matches_input() {
        let mut framer = OlaFramer::new(2, 1024, 512, 512).unwrap();
        let input = Array2::<f32>::zeros((2, 512));
        let out = framer.process_block(input.view(), |w| w.to_owned()).unwrap();
        assert_eq!(out.shape(), &[2, 512]);
    }

    #[test]
    fn rejects_wrong_shaped_input_block() {
        let mut framer = OlaFramer::new(2, 1024, 512, 512).unwrap();
        let input = Array2::<f32>::zeros((2, 256));
        assert!(framer.process_block(input.view(), |w| w.to_owned()).is_err());
    }
}
