//! Loads the GCC-NMF engine configuration from an INI-style file.
//!
//! The original Python implementation leans on `configparser` plus
//! `ast.literal_eval` for anything outside its typed option lists. Neither
//! exists on this side, and no pack example pulls in an `ini`-family crate,
//! so this is a small hand-rolled tokenizer: split `[section]` headers and
//! `key = value` lines, strip `;`/`#` comments, and convert each value
//! through the same four typed option classes the original uses.

use crate::dictionary::DictionaryType;
use crate::error::{GccNmfError, Result};
use std::collections::HashMap;
use std::env;
use std::path::Path;

const SPEED_OF_SOUND_IN_METRES_PER_SECOND: f32 = 340.29;

/// `[UI] startupWindowMode`, matching the three values the original's
/// interface layer accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMode {
    Normal,
    Maximized,
    Fullscreen,
}

impl WindowMode {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "normal" => Some(WindowMode::Normal),
            "maximized" => Some(WindowMode::Maximized),
            "fullscreen" => Some(WindowMode::Fullscreen),
            _ => None,
        }
    }
}

/// Fully resolved, typed configuration for one engine instance.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    // TDOA
    pub num_tdoas: usize,
    pub num_tdoa_history: usize,
    pub num_spectrogram_history: usize,
    pub gcc_phat_nl_alpha: f32,
    pub gcc_phat_nl_enabled: bool,
    pub microphone_separation_in_metres: f32,
    pub target_tdoa_epsilon: f32,
    pub target_tdoa_beta: f32,
    pub target_tdoa_noise_floor: f32,
    pub localization_enabled: bool,
    pub localization_window_size: usize,

    // Audio
    pub num_channels: usize,
    pub sample_rate: u32,
    /// Source file for the file-player back-end; `None` means the audio
    /// device is a live capture device instead.
    pub audio_path: Option<String>,
    /// Substring used to pick a capture/playback device by name instead of
    /// by index.
    pub device_name_query: Option<String>,

    // UI
    pub normalize_input: bool,
    pub normalize_input_max_value: f32,
    pub startup_window_mode: WindowMode,

    // STFT
    pub window_size: usize,
    pub hop_size: usize,
    pub block_size: usize,

    // NMF
    pub dictionary_size: usize,
    pub dictionary_sizes: Vec<usize>,
    pub dictionary_type: DictionaryType,
    /// Seeds the `Random` dictionary variant; ignored when `dictionary_type`
    /// is `Pretrained`.
    pub dictionary_seed: u64,
    pub num_h_updates: usize,

    /// Directory dictionaries are loaded from / persisted to. Defaults to
    /// `./data`, overridable via `GCCNMF_DATA_DIR`.
    pub data_dir: std::path::PathBuf,
}

impl EngineConfig {
    pub fn num_freq(&self) -> usize {
        self.window_size / 2 + 1
    }

    pub fn windows_per_block(&self) -> usize {
        self.block_size / self.hop_size
    }

    pub fn speed_of_sound(&self) -> f32 {
        SPEED_OF_SOUND_IN_METRES_PER_SECOND
    }

    /// Defaults matching `getDefaultConfig()` in the original implementation.
    pub fn defaults() -> Self {
        EngineConfig {
            num_tdoas: 64,
            num_tdoa_history: 128,
            num_spectrogram_history: 128,
            gcc_phat_nl_alpha: 2.0,
            gcc_phat_nl_enabled: false,
            microphone_separation_in_metres: 0.1,
            target_tdoa_epsilon: 5.0,
            target_tdoa_beta: 2.0,
            target_tdoa_noise_floor: 0.0,
            localization_enabled: true,
            localization_window_size: 6,
            num_channels: 2,
            sample_rate: 16_000,
            audio_path: None,
            device_name_query: None,
            normalize_input: false,
            normalize_input_max_value: 1.0,
            startup_window_mode: WindowMode::Normal,
            window_size: 1024,
            hop_size: 512,
            block_size: 512,
            dictionary_size: 64,
            dictionary_sizes: vec![64, 128, 256, 512, 1024],
            dictionary_type: DictionaryType::Pretrained,
            dictionary_seed: 0,
            num_h_updates: 0,
            data_dir: default_data_dir(),
        }
    }

    /// Loads from an INI file at `path`, falling back to `defaults()` for
    /// any key the file doesn't set. Returns `ConfigError` on a malformed
    /// file (unknown section, unparsable value).
    pub fn load(path: &Path) -> Result<Self> {
        let text = crate::error::io_context(std::fs::read_to_string(path), &path.to_path_buf())?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let sections = parse_ini(text)?;
        let mut cfg = Self::defaults();

        for (section, entries) in &sections {
            for (key, value) in entries {
                apply_entry(&mut cfg, section, key, value)?;
            }
        }
        Ok(cfg)
    }
}

fn default_data_dir() -> std::path::PathBuf {
    match env::var("GCCNMF_DATA_DIR") {
        Ok(dir) => std::path::PathBuf::from(dir),
        Err(_) => std::path::PathBuf::from("data"),
    }
}

/// Tokenizes `[section]` headers and `key = value` lines into an ordered
/// map of section name -> (key, raw value) pairs, stripping `;`/`#`
/// comments and blank lines.
fn parse_ini(text: &str) -> Result<Vec<(String, Vec<(String, String)>)>> {
    let mut sections: Vec<(String, Vec<(String, String)>)> = Vec::new();
    let mut current: Option<usize> = None;

    for (lineno, raw_line) in text.lines().enumerate() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('[') {
            let Some(end) = line.find(']') else {
                return Err(GccNmfError::config(format!(
                    "line {}: unterminated section header",
                    lineno + 1
                )));
            };
            let name = line[1..end].trim().to_string();
            sections.push((name, Vec::new()));
            current = Some(sections.len() - 1);
            continue;
        }
        let Some(eq) = line.find('=') else {
            return Err(GccNmfError::config(format!(
                "line {}: expected 'key = value'",
                lineno + 1
            )));
        };
        let key = line[..eq].trim().to_string();
        let value = line[eq + 1..].trim().to_string();
        match current {
            Some(idx) => sections[idx].1.push((key, value)),
            None => {
                return Err(GccNmfError::config(format!(
                    "line {}: key outside of any [section]",
                    lineno + 1
                )))
            }
        }
    }
    Ok(sections)
}

fn strip_comment(line: &str) -> &str {
    for (i, c) in line.char_indices() {
        if c == ';' || c == '#' {
            return &line[..i];
        }
    }
    line
}

fn parse_int(section: &str, key: &str, value: &str) -> Result<usize> {
    value
        .parse::<usize>()
        .map_err(|_| GccNmfError::config(format!("[{}] {} = {:?}: not an integer", section, key, value)))
}

fn parse_float(section: &str, key: &str, value: &str) -> Result<f32> {
    value
        .parse::<f32>()
        .map_err(|_| GccNmfError::config(format!("[{}] {} = {}: not a float", section, key, value)))
}

fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(GccNmfError::config(format!(
            "[{}] {} = {}: not a boolean",
            section, key, value
        ))),
    }
}

fn parse_int_list(section: &str, key: &str, value: &str) -> Result<Vec<usize>> {
    let inner = value.trim().trim_start_matches('[').trim_end_matches(']');
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|tok| {
            tok.trim()
                .parse::<usize>()
                .map_err(|_| GccNmfError::config(format!("[{}] {}: invalid list element {:?}", section, key, tok)))
        })
        .collect()
}

fn apply_entry(cfg: &mut EngineConfig, section: &str, key: &str, value: &str) -> Result<()> {
    match (section, key) {
        ("TDOA", "numTDOAs") => cfg.num_tdoas = parse_int(section, key, value)?,
        ("TDOA", "numTDOAHistory") => cfg.num_tdoa_history = parse_int(section, key, value)?,
        ("TDOA", "numSpectrogramHistory") => cfg.num_spectrogram_history = parse_int(section, key, value)?,
        ("TDOA", "gccPHATNLAlpha") => cfg.gcc_phat_nl_alpha = parse_float(section, key, value)?,
        ("TDOA", "gccPHATNLEnabled") => cfg.gcc_phat_nl_enabled = parse_bool(section, key, value)?,
        ("TDOA", "microphoneSeparationInMetres") => {
            cfg.microphone_separation_in_metres = parse_float(section, key, value)?
        }
        ("TDOA", "targetTDOAEpsilon") => cfg.target_tdoa_epsilon = parse_float(section, key, value)?,
        ("TDOA", "targetTDOABeta") => cfg.target_tdoa_beta = parse_float(section, key, value)?,
        ("TDOA", "targetTDOANoiseFloor") => cfg.target_tdoa_noise_floor = parse_float(section, key, value)?,
        ("TDOA", "localizationEnabled") => cfg.localization_enabled = parse_bool(section, key, value)?,
        ("TDOA", "localizationWindowSize") => cfg.localization_window_size = parse_int(section, key, value)?,

        ("Audio", "numChannels") => cfg.num_channels = parse_int(section, key, value)?,
        ("Audio", "sampleRate") => cfg.sample_rate = parse_int(section, key, value)? as u32,
        ("Audio", "deviceIndex") => {} // device backend is an external collaborator
        ("Audio", "audioPath") => cfg.audio_path = Some(value.to_string()),
        ("Audio", "deviceNameQuery") => cfg.device_name_query = Some(value.to_string()),

        ("UI", "normalizeInput") => cfg.normalize_input = parse_bool(section, key, value)?,
        ("UI", "normalizeInputMaxValue") => cfg.normalize_input_max_value = parse_float(section, key, value)?,
        ("UI", "startupWindowMode") => {
            cfg.startup_window_mode = WindowMode::parse(value)
                .ok_or_else(|| GccNmfError::config(format!("[UI] startupWindowMode = {:?}: not one of normal/maximized/fullscreen", value)))?
        }

        ("STFT", "windowSize") => cfg.window_size = parse_int(section, key, value)?,
        ("STFT", "hopSize") => cfg.hop_size = parse_int(section, key, value)?,
        ("STFT", "blockSize") => cfg.block_size = parse_int(section, key, value)?,

        ("NMF", "dictionarySize") => cfg.dictionary_size = parse_int(section, key, value)?,
        ("NMF", "dictionarySizes") => cfg.dictionary_sizes = parse_int_list(section, key, value)?,
        ("NMF", "dictionaryType") => {
            cfg.dictionary_type = DictionaryType::parse(value)
                .ok_or_else(|| GccNmfError::config(format!("[NMF] dictionaryType = {:?}: not one of Pretrained/Random", value)))?
        }
        ("NMF", "dictionarySeed") => cfg.dictionary_seed = parse_int(section, key, value)? as u64,
        ("NMF", "numHUpdates") => cfg.num_h_updates = parse_int(section, key, value)?,

        (other_section, other_key) => {
            return Err(GccNmfError::config(format!(
                "unknown config key [{}] {}",
                other_section, other_key
            )))
        }
    }
    Ok(())
}

/// Raw key/value view of a parsed file, exposed for diagnostics/logging
/// (mirrors `getDictFromConfig`'s logged section dump in the original).
pub fn dump_sections(text: &str) -> Result<HashMap<String, Vec<(String, String)>>> {
    Ok(parse_ini(text)?.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_implementation() {
        let cfg = EngineConfig::defaults();
        assert_eq!(cfg.num_tdoas, 64);
        assert_eq!(cfg.window_size, 1024);
        assert_eq!(cfg.hop_size, 512);
        assert_eq!(cfg.block_size, 512);
        assert_eq!(cfg.dictionary_sizes, vec![64, 128, 256, 512, 1024]);
        assert_eq!(cfg.num_freq(), 513);
        assert_eq!(cfg.windows_per_block(), 1);
    }

    #[test]
    fn parses_overrides_and_leaves_rest_default() {
        let text = "[TDOA]\nnumTDOAs = 32\nmicrophoneSeparationInMetres = 0.2\n\n[STFT]\nwindowSize = 2048\n";
        let cfg = EngineConfig::parse(text).unwrap();
        assert_eq!(cfg.num_tdoas, 32);
        assert!((cfg.microphone_separation_in_metres - 0.2).abs() < 1e-6);
        assert_eq!(cfg.window_size, 2048);
        assert_eq!(cfg.hop_size, 512); // untouched default
    }

    #[test]
    fn strips_comments_and_blank_lines() {
        let text = "; a comment\n[NMF]\ndictionarySize = 128 # inline comment\n\n";
        let cfg = EngineConfig::parse(text).unwrap();
        assert_eq!(cfg.dictionary_size, 128);
    }

    #[test]
    fn unknown_key_is_a_config_error() {
        let text = "[TDOA]\nbogusKey = 1\n";
        let err = EngineConfig::parse(text).unwrap_err();
        assert!(matches!(err, GccNmfError::ConfigError(_)));
    }

    #[test]
    fn parses_ui_section_and_audio_path() {
        let text = "[UI]\nnormalizeInput = true\nnormalizeInputMaxValue = 0.8\nstartupWindowMode = maximized\n\n[Audio]\naudioPath = /tmp/mix.wav\ndeviceNameQuery = USB Mic\n";
        let cfg = EngineConfig::parse(text).unwrap();
        assert!(cfg.normalize_input);
        assert!((cfg.normalize_input_max_value - 0.8).abs() < 1e-6);
        assert_eq!(cfg.startup_window_mode, WindowMode::Maximized);
        assert_eq!(cfg.audio_path.as_deref(), Some("/tmp/mix.wav"));
        assert_eq!(cfg.device_name_query.as_deref(), Some("USB Mic"));
    }

    #[test]
    fn dictionary_type_random_is_accepted_and_invalid_values_are_rejected() {
        let text = "[NMF]\ndictionaryType = Random\ndictionarySeed = 7\n";
        let cfg = EngineConfig::parse(text).unwrap();
        assert_eq!(cfg.dictionary_type, DictionaryType::Random);
        assert_eq!(cfg.dictionary_seed, 7);

        let bad = "[NMF]\ndictionaryType = Harmonic\n";
        assert!(EngineConfig::parse(bad).is_err());
    }

    #[test]
    fn key_outside_section_is_a_config_error() {
        let text = "numTDOAs = 1\n";
        assert!(EngineConfig::parse(text).is_err());
    }

    #[test]
    fn parses_int_list() {
        let text = "[NMF]\ndictionarySizes = [32, 64, 128]\n";
        let cfg = EngineConfig::parse(text).unwrap();
        assert_eq!(cfg.dictionary_sizes, vec![32, 64, 128]);
    }
}
