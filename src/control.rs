//! Lock-free-ish control surface shared between a UI/control thread and the
//! real-time `RealtimePipeline`.
//!
//! Grounded on two things: `meters.rs`'s `AtomicF32` (bit-cast `AtomicU32`)
//! for wait-free scalar fields readable from the DSP worker without locking,
//! and `gccNMFProcessor.py`'s `updateGCCNMFParams`/`GCC_NMF_PARAMETERS_REQUIRING_RESET`
//! for the dirty-name-list pattern: the UI thread writes a new value and
//! appends the field's name to an append-only dirty list; the DSP worker
//! drains that list between blocks, applies each change, and triggers a full
//! rebuild if any changed field requires one.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

/// A lock-free `f32` built on `AtomicU32`'s bit pattern, matching
/// `meters.rs`'s `AtomicF32`.
#[derive(Debug)]
pub struct AtomicF32 {
    inner: AtomicU32,
}

impl AtomicF32 {
    pub const fn new(value: f32) -> Self {
        Self {
            inner: AtomicU32::new(value.to_bits()),
        }
    }

    pub fn load(&self, order: Ordering) -> f32 {
        f32::from_bits(self.inner.load(order))
    }

    pub fn store(&self, value: f32, order: Ordering) {
        self.inner.store(value.to_bits(), order);
    }
}

/// Parameters that require a full `RealtimePipeline` rebuild (steering
/// matrix, dictionary, internal buffers) when changed, matching
/// `GCC_NMF_PARAMETERS_REQUIRING_RESET` exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirtyField {
    MicrophoneSeparationInMetres,
    NumTDOAs,
    DictionarySize,
    TargetTDOAIndex,
    TargetTDOAEpsilon,
    TargetTDOABeta,
    TargetTDOANoiseFloor,
    SeparationEnabled,
    TargetMode,
    PlaybackGain,
}

impl DirtyField {
    pub fn requires_rebuild(self) -> bool {
        matches!(
            self,
            DirtyField::MicrophoneSeparationInMetres | DirtyField::NumTDOAs | DirtyField::DictionarySize
        )
    }
}

/// One entry in the control plane's append-only change log, describing
/// exactly which field changed and its new value.
#[derive(Debug, Clone, Copy)]
pub enum ParamChange {
    MicrophoneSeparationInMetres(f32),
    NumTDOAs(u32),
    DictionarySize(u32),
    TargetTDOAIndex(f32),
    TargetTDOAEpsilon(f32),
    TargetTDOABeta(f32),
    TargetTDOANoiseFloor(f32),
    SeparationEnabled(bool),
    TargetMode(TargetMode),
    PlaybackGain(f32),
}

impl ParamChange {
    pub fn field(&self) -> DirtyField {
        match self {
            ParamChange::MicrophoneSeparationInMetres(_) => DirtyField::MicrophoneSeparationInMetres,
            ParamChange::NumTDOAs(_) => DirtyField::NumTDOAs,
            ParamChange::DictionarySize(_) => DirtyField::DictionarySize,
            ParamChange::TargetTDOAIndex(_) => DirtyField::TargetTDOAIndex,
            ParamChange::TargetTDOAEpsilon(_) => DirtyField::TargetTDOAEpsilon,
            ParamChange::TargetTDOABeta(_) => DirtyField::TargetTDOABeta,
            ParamChange::TargetTDOANoiseFloor(_) => DirtyField::TargetTDOANoiseFloor,
            ParamChange::SeparationEnabled(_) => DirtyField::SeparationEnabled,
            ParamChange::TargetMode(_) => DirtyField::TargetMode,
            ParamChange::PlaybackGain(_) => DirtyField::PlaybackGain,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMode {
    Boxcar,
    WindowFunction,
}

/// Atomic-field mirror of `EngineConfig`'s tunable parameters, plus an
/// append-only dirty list the DSP worker drains once per block.
pub struct GccNmfParams {
    microphone_separation_in_metres: AtomicF32,
    num_tdoas: AtomicU32,
    dictionary_size: AtomicU32,
    target_tdoa_index: AtomicF32,
    target_tdoa_epsilon: AtomicF32,
    target_tdoa_beta: AtomicF32,
    target_tdoa_noise_floor: AtomicF32,
    separation_enabled: AtomicBool,
    target_mode: AtomicU32, // 0 = Boxcar, 1 = WindowFunction
    audio_playback_gain: AtomicF32,

    dirty: Mutex<Vec<DirtyField>>,
}

impl GccNmfParams {
    pub fn new(microphone_separation_in_metres: f32, num_tdoas: u32, dictionary_size: u32) -> Self {
        GccNmfParams {
            microphone_separation_in_metres: AtomicF32::new(microphone_separation_in_metres),
            num_tdoas: AtomicU32::new(num_tdoas),
            dictionary_size: AtomicU32::new(dictionary_size),
            target_tdoa_index: AtomicF32::new(0.0),
            target_tdoa_epsilon: AtomicF32::new(5.0),
            target_tdoa_beta: AtomicF32::new(2.0),
            target_tdoa_noise_floor: AtomicF32::new(0.0),
            separation_enabled: AtomicBool::new(true),
            target_mode: AtomicU32::new(1),
            audio_playback_gain: AtomicF32::new(1.0),
            dirty: Mutex::new(Vec::new()),
        }
    }

    pub fn microphone_separation_in_metres(&self) -> f32 {
        self.microphone_separation_in_metres.load(Ordering::Relaxed)
    }

    pub fn num_tdoas(&self) -> u32 {
        self.num_tdoas.load(Ordering::Relaxed)
    }

    pub fn dictionary_size(&self) -> u32 {
        self.dictionary_size.load(Ordering::Relaxed)
    }

    pub fn target_tdoa_index(&self) -> f32 {
        self.target_tdoa_index.load(Ordering::Relaxed)
    }

    pub fn target_tdoa_epsilon(&self) -> f32 {
        self.target_tdoa_epsilon.load(Ordering::Relaxed)
    }

    pub fn target_tdoa_beta(&self) -> f32 {
        self.target_tdoa_beta.load(Ordering::Relaxed)
    }

    pub fn target_tdoa_noise_floor(&self) -> f32 {
        self.target_tdoa_noise_floor.load(Ordering::Relaxed)
    }

    pub fn separation_enabled(&self) -> bool {
        self.separation_enabled.load(Ordering::Relaxed)
    }

    pub fn target_mode(&self) -> TargetMode {
        match self.target_mode.load(Ordering::Relaxed) {
            0 => TargetMode::Boxcar,
            _ => TargetMode::WindowFunction,
        }
    }

    pub fn audio_playback_gain(&self) -> f32 {
        self.audio_playback_gain.load(Ordering::Relaxed)
    }

    /// Applies a change from the UI/control thread: stores the new value
    /// atomically and appends the field to the dirty list. Never blocks the
    /// DSP worker — at worst it contends briefly for the dirty-list mutex,
    /// which the worker only holds for the duration of an append or a drain.
    pub fn apply(&self, change: ParamChange) {
        match change {
            ParamChange::MicrophoneSeparationInMetres(v) => self.microphone_separation_in_metres.store(v, Ordering::Relaxed),
            ParamChange::NumTDOAs(v) => self.num_tdoas.store(v, Ordering::Relaxed),
            ParamChange::DictionarySize(v) => self.dictionary_size.store(v, Ordering::Relaxed),
            ParamChange::TargetTDOAIndex(v) => self.target_tdoa_index.store(v, Ordering::Relaxed),
            ParamChange::TargetTDOAEpsilon(v) => self.target_tdoa_epsilon.store(v, Ordering::Relaxed),
            ParamChange::TargetTDOABeta(v) => self.target_tdoa_beta.store(v, Ordering::Relaxed),
            ParamChange::TargetTDOANoiseFloor(v) => self.target_tdoa_noise_floor.store(v, Ordering::Relaxed),
            ParamChange::SeparationEnabled(v) => self.separation_enabled.store(v, Ordering::Relaxed),
            ParamChange::TargetMode(mode) => {
                let code = match mode {
                    TargetMode::Boxcar => 0,
                    TargetMode::WindowFunction => 1,
                };
                self.target_mode.store(code, Ordering::Relaxed);
            }
            ParamChange::PlaybackGain(v) => self.audio_playback_gain.store(v, Ordering::Relaxed),
        }
        self.dirty.lock().unwrap().push(change.field());
    }

    /// Drains the dirty list, returning the distinct fields that changed
    /// since the last drain and whether any of them requires a rebuild.
    /// Call this once per block from the DSP worker, never from the UI
    /// thread.
    pub fn drain_dirty(&self) -> (Vec<DirtyField>, bool) {
        let mut guard = self.dirty.lock().unwrap();
        let drained: Vec<DirtyField> = guard.drain(..).collect();
        let rebuild_required = drained.iter().any(|f| f.requires_rebuild());
        (drained, rebuild_required)
    }
}
