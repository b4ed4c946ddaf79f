//! Dictionary storage: persistence, ordering, pretrain-on-miss loading, and
//! the seeded `Random` variant.
//!
//! Grounded on `gccNMFPretraining.py`: `getDictionariesW` builds both a
//! `Pretrained` and a `Random` dictionary per size; `loadPretrainedW` loads
//! the former from disk, or trains one against a supplied corpus and
//! persists it if the file is missing; `getOrderedDictionary` reorders atoms
//! by spectral centroid so a plotted dictionary reads low-to-high frequency,
//! left to right. The original persists `.npy` files via `numpy.save`; since
//! no `numpy`-compatible reader is in this crate's dependency stack,
//! dictionary files here use a small fixed-header binary format instead (see
//! `DictHeader`).

use crate::error::{GccNmfError, Result};
use crate::nmf::kl_nmf;
use ndarray::{Array1, Array2, Axis};
use rand::distributions::Uniform;
use rand::prelude::*;
use rand::rngs::StdRng;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Which of the two dictionary variants `getDictionariesW` builds is active:
/// `Pretrained` loads (or trains-on-miss) from disk, `Random` draws a fresh
/// uniform matrix from a seeded RNG every time, matching
/// `np.random.rand(fftSize, dictionarySize)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictionaryType {
    Pretrained,
    Random,
}

impl DictionaryType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Pretrained" => Some(DictionaryType::Pretrained),
            "Random" => Some(DictionaryType::Random),
            _ => None,
        }
    }
}

/// Draws a `(num_frequencies, dictionary_size)` dictionary of i.i.d. uniform
/// `[0, 1)` entries, matching the original's unseeded `Random` variant but
/// made reproducible via an explicit seed.
pub fn random_dictionary(num_frequencies: usize, dictionary_size: usize, seed: u64) -> Array2<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let dist = Uniform::new(0.0f32, 1.0f32);
    Array2::from_shape_fn((num_frequencies, dictionary_size), |_| dist.sample(&mut rng))
}

const MAGIC: [u8; 4] = *b"GNMF";
const HEADER_LEN: usize = 16;
const DTYPE_F32: u8 = 1;

const NUM_PRETRAIN_ITERATIONS: usize = 100;
const PRETRAIN_SPARSITY_ALPHA: f32 = 0.0;
const PRETRAIN_SEED: u64 = 0;

/// Fixed 16-byte header preceding raw little-endian `f32` row-major
/// dictionary data: `{ magic: [u8;4], dtype: u8, _pad: [u8;3], rows: u32, cols: u32 }`.
struct DictHeader {
    rows: u32,
    cols: u32,
}

impl DictHeader {
    fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4] = DTYPE_F32;
        buf[8..12].copy_from_slice(&self.rows.to_le_bytes());
        buf[12..16].copy_from_slice(&self.cols.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self> {
        if buf[0..4] != MAGIC {
            return Err(GccNmfError::invalid("dictionary file missing GNMF magic header"));
        }
        if buf[4] != DTYPE_F32 {
            return Err(GccNmfError::invalid("dictionary file has unsupported dtype"));
        }
        let rows = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let cols = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        Ok(DictHeader { rows, cols })
    }
}

/// Writes `w` (shape `(num_frequencies, dictionary_size)`) to `path` in the
/// fixed-header binary format.
pub fn save_dictionary(w: &Array2<f32>, path: &Path) -> Result<()> {
    let header = DictHeader {
        rows: w.shape()[0] as u32,
        cols: w.shape()[1] as u32,
    };
    let mut file = std::fs::File::create(path)?;
    file.write_all(&header.encode())?;
    for &v in w.iter() {
        file.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

/// Reads a dictionary previously written by `save_dictionary`.
pub fn load_dictionary(path: &Path) -> Result<Array2<f32>> {
    let mut file = std::fs::File::open(path)?;
    let mut header_buf = [0u8; HEADER_LEN];
    file.read_exact(&mut header_buf)?;
    let header = DictHeader::decode(&header_buf)?;

    let (rows, cols) = (header.rows as usize, header.cols as usize);
    let mut data = vec![0u8; rows * cols * 4];
    file.read_exact(&mut data)?;
    let values: Vec<f32> = data.chunks_exact(4).map(|b| f32::from_le_bytes(b.try_into().unwrap())).collect();
    Array2::from_shape_vec((rows, cols), values).map_err(|e| GccNmfError::invalid(e.to_string()))
}

/// Reorders dictionary atoms by ascending spectral centroid, matching
/// `getOrderedDictionary`: `centroid[a] = sum_f(f * W[f,a]) / sum_f(W[f,a])`.
pub fn ordered_by_centroid(w: &Array2<f32>) -> Array2<f32> {
    let num_freq = w.shape()[0];
    let centroids: Array1<f32> = w
        .axis_iter(Axis(1))
        .map(|col| {
            let weighted: f32 = col.iter().enumerate().map(|(f, &v)| f as f32 * v).sum();
            let total: f32 = col.sum();
            weighted / total.max(1e-12)
        })
        .collect();

    let mut order: Vec<usize> = (0..centroids.len()).collect();
    order.sort_by(|&a, &b| centroids[a].partial_cmp(&centroids[b]).unwrap());

    let mut ordered = Array2::<f32>::zeros((num_freq, w.shape()[1]));
    for (dst, &src) in order.iter().enumerate() {
        ordered.column_mut(dst).assign(&w.column(src));
    }
    ordered
}

/// Manages on-disk dictionaries for a configured set of sizes, loading each
/// from `data_dir/pretrainedW/W_<size>.bin` or training it against
/// `training_spectrogram` if missing, matching `loadPretrainedW`'s
/// load-or-train fallback.
pub struct DictionaryStore {
    data_dir: PathBuf,
}

impl DictionaryStore {
    pub fn new(data_dir: PathBuf) -> Self {
        DictionaryStore { data_dir }
    }

    fn path_for(&self, dictionary_size: usize) -> PathBuf {
        self.data_dir.join("pretrainedW").join(format!("W_{}.bin", dictionary_size))
    }

    /// Loads the dictionary for `dictionary_size`, training and persisting
    /// one from `training_spectrogram` (`(num_frequencies, num_frames)`) if
    /// no file exists yet.
    pub fn load_or_train(&self, dictionary_size: usize, training_spectrogram: &Array2<f32>) -> Result<Array2<f32>> {
        let path = self.path_for(dictionary_size);
        if path.exists() {
            log::info!("loading pretrained dictionary (size {}): {}", dictionary_size, path.display());
            return load_dictionary(&path);
        }

        log::info!("pretrained dictionary not found at {}, training...", path.display());
        let factorization = kl_nmf(
            training_spectrogram,
            dictionary_size,
            NUM_PRETRAIN_ITERATIONS,
            PRETRAIN_SPARSITY_ALPHA,
            PRETRAIN_SEED,
        );
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        save_dictionary(&factorization.w, &path)?;
        Ok(factorization.w)
    }

    /// Loads (or trains) every size in `dictionary_sizes`, applying
    /// `ordered_by_centroid` to each, matching `getDictionariesW(..., ordered=True)`.
    pub fn load_ordered_set(
        &self,
        dictionary_sizes: &[usize],
        training_spectrogram: &Array2<f32>,
    ) -> Result<Vec<(usize, Array2<f32>)>> {
        dictionary_sizes
            .iter()
            .map(|&size| {
                let w = self.load_or_train(size, training_spectrogram)?;
                Ok((size, ordered_by_centroid(&w)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn round_trips_through_the_binary_format() {
        let w = Array2::from_shape_fn((5, 3), |(f, a)| (f * 3 + a) as f32 * 0.1);
        let dir = std::env::temp_dir().join(format!("gcc_nmf_dict_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("w.bin");

        save_dictionary(&w, &path).unwrap();
        let loaded = load_dictionary(&path).unwrap();
        assert_eq!(w, loaded);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rejects_a_file_without_the_magic_header() {
        let dir = std::env::temp_dir().join(format!("gcc_nmf_dict_bad_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.bin");
        std::fs::write(&path, [0u8; 16]).unwrap();
        assert!(load_dictionary(&path).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn orders_atoms_by_ascending_spectral_centroid() {
        // Atom 0 concentrated at high frequency bins, atom 1 at low ones.
        let w = array![[0.0, 1.0], [0.0, 1.0], [1.0, 0.0], [1.0, 0.0]];
        let ordered = ordered_by_centroid(&w);
        // After ordering, the low-centroid atom (originally column 1) comes first.
        assert_eq!(ordered.column(0).to_vec(), w.column(1).to_vec());
        assert_eq!(ordered.column(1).to_vec(), w.column(0).to_vec());
    }

    #[test]
    fn random_dictionary_is_reproducible_for_a_given_seed() {
        let a = random_dictionary(9, 4, 42);
        let b = random_dictionary(9, 4, 42);
        assert_eq!(a, b);
        assert_eq!(a.shape(), &[9, 4]);
        assert!(a.iter().all(|&v| (0.0..1.0).contains(&v)));

        let c = random_dictionary(9, 4, 43);
        assert_ne!(a, c);
    }

    #[test]
    fn dictionary_type_parses_the_two_known_variants_only() {
        assert_eq!(DictionaryType::parse("Pretrained"), Some(DictionaryType::Pretrained));
        assert_eq!(DictionaryType::parse("Random"), Some(DictionaryType::Random));
        assert_eq!(DictionaryType::parse("Harmonic"), None);
    }

    #[test]
    fn load_or_train_persists_a_dictionary_on_first_use() {
        let dir = std::env::temp_dir().join(format!("gcc_nmf_store_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let store = DictionaryStore::new(dir.clone());
        let training = Array2::from_shape_fn((10, 8), |(f, t)| ((f + 1) * (t + 1)) as f32 * 0.01 + 0.01);

        let w1 = store.load_or_train(4, &training).unwrap();
        assert_eq!(w1.shape(), &[10, 4]);
        assert!(store.path_for(4).exists());

        // Second call loads from disk rather than retraining; same values.
        let w2 = store.load_or_train(4, &training).unwrap();
        assert_eq!(w1, w2);

        std::fs::remove_dir_all(&dir).ok();
    }
}
