//! Typed error kinds shared across the whole crate.

use std::path::PathBuf;
use thiserror::Error;

/// The error type returned by every fallible operation in this crate.
///
/// `Underrun` and `RebuildInProgress` are recoverable: callers on the
/// real-time path are expected to substitute a block of silence and keep
/// going rather than propagate them as fatal. Every other variant is fatal
/// at the call site that produced it.
#[derive(Debug, Error)]
pub enum GccNmfError {
    #[error("config error: {0}")]
    ConfigError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("device error: {0}")]
    DeviceError(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The DSP worker did not receive enough input blocks to fill one
    /// analysis frame in time; `count` blocks of silence were substituted.
    #[error("input underrun: {0} block(s) substituted with silence")]
    Underrun(usize),

    /// A parameter change requiring full reallocation (microphone
    /// separation, TDOA count, dictionary size) is being applied; the
    /// caller should retry the block that triggered this after the rebuild
    /// completes.
    #[error("rebuild in progress, block dropped")]
    RebuildInProgress,
}

impl GccNmfError {
    /// Process exit code used by the CLI entry point, per the external
    /// interface contract: 0 success, 1 config/IO, 2 device.
    pub fn exit_code(&self) -> i32 {
        match self {
            GccNmfError::ConfigError(_) | GccNmfError::IoError(_) | GccNmfError::InvalidInput(_) => 1,
            GccNmfError::DeviceError(_) => 2,
            GccNmfError::Underrun(_) | GccNmfError::RebuildInProgress => 0,
        }
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        GccNmfError::ConfigError(msg.into())
    }

    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        GccNmfError::InvalidInput(msg.into())
    }

    pub fn missing_file(path: &std::path::Path) -> Self {
        GccNmfError::ConfigError(format!("missing file: {}", path.display()))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GccNmfError>;

/// Helper for reporting a path alongside an IO error without losing the
/// `#[from] std::io::Error` conversion used elsewhere.
pub fn io_context<T>(result: std::io::Result<T>, path: &PathBuf) -> Result<T> {
    result.map_err(|e| GccNmfError::IoError(std::io::Error::new(e.kind(), format!("{}: {}", path.display(), e))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_external_interface_contract() {
        assert_eq!(GccNmfError::config("bad").exit_code(), 1);
        assert_eq!(GccNmfError::DeviceError("no device".into()).exit_code(), 2);
        assert_eq!(GccNmfError::Underrun(3).exit_code(), 0);
        assert_eq!(GccNmfError::RebuildInProgress.exit_code(), 0);
    }

    #[test]
    fn underrun_display_includes_count() {
        let err = GccNmfError::Underrun(2);
        assert!(err.to_string().contains('2'));
    }
}
