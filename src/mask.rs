//! Atom-to-TDOA assignment and time-frequency masking.
//!
//! Transcribed from `buildTheanoFunctions`'s `HMask`/`recSource`/`tfMask`
//! graph in the original implementation: each dictionary atom is assigned,
//! per analysis frame, to whichever hypothesis TDOA its GCC-NMF response
//! peaks at; atoms whose assigned TDOA falls inside the target window
//! contribute to the reconstructed spectrum, atoms outside it are
//! suppressed, and normalizing by the dictionary's per-frequency energy
//! turns that into a soft time-frequency mask.

use ndarray::{Array2, Array3, Axis};

/// Per-atom, per-frame hypothesis-TDOA index that best explains that atom's
/// GCC-NMF response, shape `(num_atoms, num_time)`.
///
/// `gcc_nmf` is `(num_tdoas, num_time, num_atoms)`, matching
/// `gcc_phat::gcc_nmf`'s output.
pub fn atom_tdoa_assignment(gcc_nmf: &Array3<f32>) -> Array2<f32> {
    let (num_tdoas, num_time, num_atoms) = (gcc_nmf.shape()[0], gcc_nmf.shape()[1], gcc_nmf.shape()[2]);
    let mut assignment = Array2::<f32>::zeros((num_atoms, num_time));
    for t in 0..num_time {
        for a in 0..num_atoms {
            let mut best_k = 0usize;
            let mut best_v = f32::NEG_INFINITY;
            for k in 0..num_tdoas {
                let v = gcc_nmf[[k, t, a]];
                if v > best_v {
                    best_v = v;
                    best_k = k;
                }
            }
            assignment[[a, t]] = best_k as f32;
        }
    }
    assignment
}

/// Boxcar atom mask: atoms whose assigned TDOA index falls within
/// `target_tdoa_epsilon` of `target_tdoa_index` pass (1.0), the rest are
/// zeroed. Matches `TARGET_MODE_BOXCAR`'s `HMask`.
pub fn atom_mask_boxcar(assignment: &Array2<f32>, target_tdoa_index: f32, target_tdoa_epsilon: f32) -> Array2<f32> {
    assignment.mapv(|idx| {
        if (idx - target_tdoa_index).abs() < target_tdoa_epsilon {
            1.0
        } else {
            0.0
        }
    })
}

/// Generalized-Gaussian-window atom mask: a smooth falloff in assigned-TDOA
/// distance from the target, governed by `target_tdoa_epsilon` (width),
/// `target_tdoa_beta` (shape), and `target_tdoa_noise_floor` (minimum gain
/// for rejected atoms). Matches `TARGET_MODE_WINDOW_FUNCTION`'s `HMask`.
pub fn atom_mask_window(
    assignment: &Array2<f32>,
    target_tdoa_index: f32,
    target_tdoa_epsilon: f32,
    target_tdoa_beta: f32,
    target_tdoa_noise_floor: f32,
) -> Array2<f32> {
    assignment.mapv(|idx| {
        let distance = (idx - target_tdoa_index).abs() / target_tdoa_epsilon;
        let gain = (-distance.powf(target_tdoa_beta)).exp();
        gain / (1.0 + target_tdoa_noise_floor) + target_tdoa_noise_floor
    })
}

/// Turns an atom mask (`num_atoms x num_time`) into a time-frequency mask
/// (`num_frequencies x num_time`) against dictionary `w`
/// (`num_frequencies x num_atoms`): `recSource = W . atomMask`, `recV = sum(W, axis=atoms)`,
/// `tfMask[f, t] = recSource[f, t] / recV[f]`.
pub fn tf_mask(w: &Array2<f32>, atom_mask: &Array2<f32>) -> Array2<f32> {
    let rec_source = w.dot(atom_mask); // (F, T)
    let rec_v = w.sum_axis(Axis(1)); // (F,)
    let mut mask = rec_source;
    for (mut row, &denom) in mask.axis_iter_mut(Axis(0)).zip(rec_v.iter()) {
        let denom = denom.max(1e-12);
        row.mapv_inplace(|x| x / denom);
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn toy_gcc_nmf() -> Array3<f32> {
        // (num_tdoas=3, num_time=2, num_atoms=2). Atom 0 always peaks at
        // TDOA index 0; atom 1 always peaks at TDOA index 2.
        let mut g = Array3::<f32>::zeros((3, 2, 2));
        for t in 0..2 {
            g[[0, t, 0]] = 5.0;
            g[[1, t, 0]] = 1.0;
            g[[2, t, 0]] = 0.5;

            g[[0, t, 1]] = 0.1;
            g[[1, t, 1]] = 0.2;
            g[[2, t, 1]] = 9.0;
        }
        g
    }

    #[test]
    fn assignment_picks_the_peak_tdoa_index_per_atom() {
        let assignment = atom_tdoa_assignment(&toy_gcc_nmf());
        assert_eq!(assignment.shape(), &[2, 2]);
        assert_eq!(assignment[[0, 0]], 0.0);
        assert_eq!(assignment[[1, 0]], 2.0);
    }

    #[test]
    fn boxcar_mask_is_zero_or_one() {
        let assignment = array![[0.0, 0.0], [2.0, 2.0]];
        let mask = atom_mask_boxcar(&assignment, 0.0, 0.5);
        assert_eq!(mask, array![[1.0, 1.0], [0.0, 0.0]]);
    }

    #[test]
    fn window_mask_stays_within_unit_range_when_noise_floor_is_zero() {
        let assignment = array![[0.0, 1.0, 2.0, 5.0]];
        let mask = atom_mask_window(&assignment, 0.0, 2.0, 2.0, 0.0);
        for &v in mask.iter() {
            assert!((0.0..=1.0 + 1e-6).contains(&v), "mask value {} out of range", v);
        }
    }

    #[test]
    fn window_mask_decays_with_distance_from_target() {
        let assignment = array![[0.0, 1.0, 4.0]];
        let mask = atom_mask_window(&assignment, 0.0, 2.0, 2.0, 0.0);
        assert!(mask[[0, 0]] > mask[[0, 1]]);
        assert!(mask[[0, 1]] > mask[[0, 2]]);
    }

    #[test]
    fn tf_mask_normalizes_by_dictionary_energy() {
        let w = array![[1.0, 1.0], [2.0, 0.0]]; // (F=2, atoms=2)
        let atom_mask = array![[1.0, 0.0], [0.0, 1.0]]; // (atoms=2, T=2)
        let mask = tf_mask(&w, &atom_mask);
        // recSource = W . atomMask = [[1,1],[2,0]]
        // recV = [2, 2]
        assert_eq!(mask, array![[0.5, 0.5], [1.0, 0.0]]);
    }
}
