//! Error types for the conversion controller.

use thiserror::Error;

use crate::engine::EngineError;

use super::types::JobErrorKind;

/// A request the controller refused. Job failures are never reported this way;
/// they end up in `Phase::Failed`.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// No source asset has been selected.
    #[error("no file selected")]
    NoFileSelected,

    /// A job is initializing or running.
    #[error("a conversion is already in progress")]
    ConversionInFlight,

    /// The engine failed to load; nothing can be converted this session.
    #[error("transcoding engine unavailable: {0}")]
    EngineUnavailable(String),

    /// There is no successful result to save.
    #[error("no conversion result to save")]
    NoResult,

    /// Writing the result failed.
    #[error("failed to save result: {0}")]
    Save(#[from] std::io::Error),
}

/// A resolution outside the supported set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported resolution {0:?}, expected one of 480, 720, 1080")]
pub struct InvalidResolution(pub String);

/// Why a job ended in `Failed`. The display text is the user-facing message.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Failed to load the transcoding engine: {0}")]
    EngineLoad(#[source] EngineError),

    #[error("Could not stage the input file: {0}")]
    Staging(#[source] EngineError),

    #[error("An error occurred during conversion: {0}")]
    Execution(#[source] EngineError),

    #[error("Conversion produced no output: {0}")]
    OutputMissing(#[source] EngineError),
}

impl JobError {
    /// Classifies a read-back failure.
    pub fn from_read(err: EngineError) -> Self {
        match err {
            EngineError::OutputMissing { .. } => Self::OutputMissing(err),
            other => Self::Execution(other),
        }
    }

    /// The taxonomy bucket of this error.
    pub fn kind(&self) -> JobErrorKind {
        match self {
            Self::EngineLoad(_) => JobErrorKind::EngineLoad,
            Self::Staging(_) => JobErrorKind::Staging,
            Self::Execution(_) => JobErrorKind::Execution,
            Self::OutputMissing(_) => JobErrorKind::OutputMissing,
        }
    }
}
