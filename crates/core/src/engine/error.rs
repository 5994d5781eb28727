//! Error types for the engine module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by a transcoding engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// FFmpeg binary not found.
    #[error("FFmpeg not found at path: {path}")]
    FfmpegNotFound { path: PathBuf },

    /// The engine could not be loaded.
    #[error("Engine failed to load: {reason}")]
    LoadFailed { reason: String },

    /// The engine is not (or never became) ready.
    #[error("Engine not ready: {reason}")]
    NotReady { reason: String },

    /// A virtual file name would escape the engine namespace.
    #[error("Invalid virtual file name: {name:?}")]
    InvalidName { name: String },

    /// Input bytes could not be written into the engine namespace.
    #[error("Failed to stage {name}: {reason}")]
    StagingFailed { name: String, reason: String },

    /// The transcoding command failed. The message ends with the last few
    /// diagnostic lines ffmpeg printed.
    #[error("Execution failed: {reason}{}", stderr_suffix(.stderr))]
    ExecutionFailed {
        reason: String,
        stderr: Option<String>,
    },

    /// Execution finished but did not produce the named artifact.
    #[error("Output not found: {name}")]
    OutputMissing { name: String },

    /// Execution timed out.
    #[error("Execution timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// I/O error inside the engine.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Diagnostic lines repeated in the error message.
const DISPLAYED_STDERR_LINES: usize = 3;

fn stderr_suffix(stderr: &Option<String>) -> String {
    let lines: Vec<&str> = stderr
        .as_deref()
        .unwrap_or_default()
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        return String::new();
    }
    let start = lines.len().saturating_sub(DISPLAYED_STDERR_LINES);
    format!(" ({})", lines[start..].join("; "))
}

impl EngineError {
    /// Creates a new load failed error.
    pub fn load_failed(reason: impl Into<String>) -> Self {
        Self::LoadFailed {
            reason: reason.into(),
        }
    }

    /// Creates a new staging failed error.
    pub fn staging_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StagingFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new execution failed error with stderr output.
    pub fn execution_failed(reason: impl Into<String>, stderr: Option<String>) -> Self {
        Self::ExecutionFailed {
            reason: reason.into(),
            stderr,
        }
    }

    /// Creates a new output missing error.
    pub fn output_missing(name: impl Into<String>) -> Self {
        Self::OutputMissing { name: name.into() }
    }

    /// Whether this error means the engine itself is unusable for the session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::FfmpegNotFound { .. } | Self::LoadFailed { .. } | Self::NotReady { .. }
        )
    }
}
