//! Column-circular 2-D ring buffer shared between the DSP worker and a UI
//! or batch consumer (history of input/output spectrogram magnitudes, GCC-PHAT
//! angular spectra, coefficient masks).
//!
//! Grounded directly on `SharedMemoryCircularBuffer` in the original
//! implementation: a dense `(rows, numValues)` array plus a write cursor.
//! `set` always writes whole columns at the cursor, wrapping around the end;
//! `get` reads back the most recently written column (or an arbitrary one by
//! index); `unraveled` returns the buffer logically reordered so that column
//! 0 is the oldest and the last column is the newest — the layout a plotting
//! UI wants. Unlike the Python original (which shares the buffer across
//! processes via `multiprocessing.Array`), here a single process hands out
//! `Arc<Mutex<SharedRingBuffer2D>>` handles; tearing is avoided by locking
//! around the whole read/write rather than racing on raw memory.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

/// A dense `(rows, cols)` buffer written one or more columns at a time,
/// wrapping around `cols` like a ring.
#[derive(Debug, Clone)]
pub struct SharedRingBuffer2D {
    values: Array2<f32>,
    index: usize,
}

impl SharedRingBuffer2D {
    pub fn new(rows: usize, cols: usize, init_value: f32) -> Self {
        SharedRingBuffer2D {
            values: Array2::from_elem((rows, cols), init_value),
            index: 0,
        }
    }

    pub fn rows(&self) -> usize {
        self.values.shape()[0]
    }

    pub fn size(&self) -> usize {
        self.values.shape()[1]
    }

    /// Writes `new_values` (rows x k, k <= size) starting at the current
    /// cursor, wrapping around the end of the buffer, and advances the
    /// cursor by `k`. Returns the new cursor position.
    pub fn set(&mut self, new_values: ArrayView2<f32>) -> usize {
        self.set_at(new_values, self.index)
    }

    pub fn set_at(&mut self, new_values: ArrayView2<f32>, index: usize) -> usize {
        let num_new = new_values.shape()[1];
        let cols = self.size();
        assert_eq!(new_values.shape()[0], self.rows(), "row count mismatch");
        assert!(num_new <= cols, "batch larger than ring capacity");

        if index + num_new < cols {
            self.values
                .slice_mut(ndarray::s![.., index..index + num_new])
                .assign(&new_values);
            self.index = index + num_new;
        } else {
            let num_at_end = cols - index;
            let num_at_start = num_new - num_at_end;
            self.values
                .slice_mut(ndarray::s![.., index..])
                .assign(&new_values.slice(ndarray::s![.., ..num_at_end]));
            self.values
                .slice_mut(ndarray::s![.., ..num_at_start])
                .assign(&new_values.slice(ndarray::s![.., num_at_end..]));
            self.index = num_at_start;
        }
        self.index
    }

    /// Reads back the column at `index`, or the most recently written
    /// column if `index` is `None`.
    pub fn get(&self, index: Option<usize>) -> ArrayView1<f32> {
        let cols = self.size();
        let idx = match index {
            Some(i) => i % cols,
            None => (self.index + cols - 1) % cols,
        };
        self.values.index_axis(Axis(1), idx)
    }

    /// Returns the buffer reordered so index 0 is the oldest column and the
    /// last column is the most recently written one.
    pub fn unraveled(&self) -> Array2<f32> {
        let cols = self.size();
        let tail = self.values.slice(ndarray::s![.., self.index..]);
        let head = self.values.slice(ndarray::s![.., ..self.index]);
        ndarray::concatenate(Axis(1), &[tail, head]).expect("shapes match by construction")
    }

    pub fn cursor(&self) -> usize {
        self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn set_wraps_around_end_of_buffer() {
        let mut buf = SharedRingBuffer2D::new(1, 4, 0.0);
        buf.set(array![[1.0, 2.0, 3.0]].view());
        assert_eq!(buf.cursor(), 3);
        // Next write of 2 columns should wrap: one lands at index 3, one at index 0.
        buf.set(array![[4.0, 5.0]].view());
        assert_eq!(buf.cursor(), 1);
        assert_eq!(buf.get(Some(3))[()], 4.0);
        assert_eq!(buf.get(Some(0))[()], 5.0);
    }

    #[test]
    fn get_defaults_to_most_recently_written_column() {
        let mut buf = SharedRingBuffer2D::new(1, 3, 0.0);
        buf.set(array![[9.0]].view());
        assert_eq!(buf.get(None)[()], 9.0);
    }

    #[test]
    fn unraveled_orders_oldest_to_newest() {
        let mut buf = SharedRingBuffer2D::new(1, 4, 0.0);
        buf.set(array![[1.0, 2.0, 3.0, 4.0]].view());
        // cursor wrapped to 0, so the whole buffer is already in order
        assert_eq!(buf.cursor(), 0);
        let unraveled = buf.unraveled();
        assert_eq!(unraveled.row(0).to_vec(), vec![1.0, 2.0, 3.0, 4.0]);

        buf.set(array![[5.0]].view());
        let unraveled = buf.unraveled();
        assert_eq!(unraveled.row(0).to_vec(), vec![2.0, 3.0, 4.0, 5.0]);
    }
}
