//! Conversion controller: the job lifecycle state machine.
//!
//! `ConversionController` owns the single source of truth for phase,
//! progress, error and result. It admits one job at a time, sequences
//! stage → execute → read against the engine, and ignores anything reported
//! by a job that has since been superseded.

mod args;
mod error;
mod runner;
mod types;

pub use args::{
    transcode_args, CRF, DOWNLOAD_FILE_NAME, INPUT_NAME, OUTPUT_MIME_TYPE, OUTPUT_NAME, PRESET,
    VIDEO_CODEC,
};
pub use error::{ControllerError, InvalidResolution, JobError};
pub use runner::ConversionController;
pub use types::{
    ControllerState, JobErrorKind, JobFailure, JobId, JobOutcome, JobStage, Phase,
    ProgressEvent, Resolution, ResultAsset, SourceAsset,
};
