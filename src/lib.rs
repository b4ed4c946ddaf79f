//! Two-microphone source separation: GCC-PHAT direction-of-arrival
//! localization combined with NMF dictionary-based spectral masking.
//!
//! [`pipeline::realtime::RealtimePipeline`] processes fixed-size audio
//! blocks continuously, maintaining shared-memory history buffers a UI can
//! read without locking. [`pipeline::batch::BatchPipeline`] factors an
//! entire recording at once and writes one file per separated target.

pub mod config;
pub mod control;
pub mod debug;
pub mod dictionary;
pub mod error;
pub mod gcc_phat;
pub mod mask;
pub mod nmf;
pub mod ola;
pub mod pipeline;
pub mod ring_buffer;
pub mod wav;

pub use config::EngineConfig;
pub use control::GccNmfParams;
pub use error::{GccNmfError, Result};
pub use pipeline::{BatchPipeline, RealtimePipeline, StereoBlock};
