//! Types for the conversion controller.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::engine::EngineReadiness;

use super::args::{DOWNLOAD_FILE_NAME, OUTPUT_MIME_TYPE};
use super::error::InvalidResolution;

/// Output height. The width follows the source aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Resolution {
    /// 480p
    P480,
    /// 720p
    #[default]
    P720,
    /// 1080p
    P1080,
}

impl Resolution {
    /// All supported resolutions, lowest first.
    pub const ALL: [Resolution; 3] = [Resolution::P480, Resolution::P720, Resolution::P1080];

    /// Vertical pixel height.
    pub fn height(self) -> u32 {
        match self {
            Self::P480 => 480,
            Self::P720 => 720,
            Self::P1080 => 1080,
        }
    }
}

impl TryFrom<u32> for Resolution {
    type Error = InvalidResolution;

    fn try_from(height: u32) -> Result<Self, Self::Error> {
        match height {
            480 => Ok(Self::P480),
            720 => Ok(Self::P720),
            1080 => Ok(Self::P1080),
            other => Err(InvalidResolution(other.to_string())),
        }
    }
}

impl From<Resolution> for u32 {
    fn from(resolution: Resolution) -> Self {
        resolution.height()
    }
}

impl FromStr for Resolution {
    type Err = InvalidResolution;

    /// Accepts `720` as well as `720p`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_suffix('p')
            .or_else(|| trimmed.strip_suffix('P'))
            .unwrap_or(trimmed);
        digits
            .parse::<u32>()
            .map_err(|_| InvalidResolution(s.to_string()))
            .and_then(Resolution::try_from)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}p", self.height())
    }
}

/// User-supplied video content. Replaced, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAsset {
    /// Display name, usually the original file name.
    pub name: String,
    /// The raw file contents.
    pub bytes: Bytes,
}

impl SourceAsset {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Reads a file from disk, naming the asset after the file.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(name, bytes))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Generation number of a conversion attempt. Later jobs have larger ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Step of a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Staging,
    Executing,
    ReadingOutput,
}

/// Bucket of the error taxonomy a job failed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    /// The engine never became ready. Fatal for the session.
    EngineLoad,
    /// Input could not be written into the engine namespace.
    Staging,
    /// The transcoding command failed.
    Execution,
    /// Execution succeeded without producing the output artifact.
    OutputMissing,
}

impl JobErrorKind {
    /// Whether retrying in the same session can help.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::EngineLoad)
    }
}

/// A failed job, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub job: JobId,
    pub kind: JobErrorKind,
    pub message: String,
}

/// The compressed video produced by a successful job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultAsset {
    pub job: JobId,
    pub bytes: Bytes,
    pub file_name: String,
    pub mime_type: &'static str,
    pub completed_at: DateTime<Utc>,
}

impl ResultAsset {
    pub fn new(job: JobId, bytes: Bytes) -> Self {
        Self {
            job,
            bytes,
            file_name: DOWNLOAD_FILE_NAME.to_string(),
            mime_type: OUTPUT_MIME_TYPE,
            completed_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Writes the video into `dir` under the fixed download name.
    pub async fn save_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(&self.file_name);
        tokio::fs::write(&path, &self.bytes).await?;
        Ok(path)
    }
}

/// Where the controller is in the job lifecycle. Payloads only exist in the
/// phase they belong to, so a result and an error can never coexist.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Phase {
    /// No file selected.
    #[default]
    Idle,
    /// A file is selected and no job exists.
    FileSelected,
    /// A job is waiting for the engine to finish loading.
    Initializing { job: JobId },
    /// A job is driving the engine.
    Running { job: JobId, stage: JobStage },
    /// The last job produced a result.
    Succeeded(ResultAsset),
    /// The last job failed.
    Failed(JobFailure),
}

impl Phase {
    /// The job that currently owns the controller, if any.
    pub fn active_job(&self) -> Option<JobId> {
        match self {
            Self::Initializing { job } | Self::Running { job, .. } => Some(*job),
            _ => None,
        }
    }

    /// Short lowercase name, for logs and rendering.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::FileSelected => "file_selected",
            Self::Initializing { .. } => "initializing",
            Self::Running { .. } => "running",
            Self::Succeeded(_) => "succeeded",
            Self::Failed(_) => "failed",
        }
    }
}

/// Snapshot of everything the presentation layer renders.
#[derive(Debug, Clone, Default)]
pub struct ControllerState {
    pub phase: Phase,
    pub source: Option<SourceAsset>,
    pub resolution: Resolution,
    /// 0-100, never decreasing within a job.
    pub progress_percent: u8,
    /// Mirror of the shared engine's readiness.
    pub readiness: EngineReadiness,
}

impl ControllerState {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            ..Default::default()
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.phase {
            Phase::Failed(failure) => Some(&failure.message),
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&ResultAsset> {
        match &self.phase {
            Phase::Succeeded(result) => Some(result),
            _ => None,
        }
    }

    pub fn source_name(&self) -> Option<&str> {
        self.source.as_ref().map(|s| s.name.as_str())
    }

    /// Whether a job is initializing or running.
    pub fn is_busy(&self) -> bool {
        self.phase.active_job().is_some()
    }
}

/// How a call to `start_conversion` ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded(ResultAsset),
    Failed(JobFailure),
    /// A newer file selection, reset, or job took over; nothing was applied.
    Superseded,
}

/// A progress ratio tagged with the job that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEvent {
    pub job: JobId,
    pub ratio: f64,
}

impl ProgressEvent {
    /// `round(clamp(ratio, 0, 1) * 100)`, or `None` for NaN.
    pub fn percent(&self) -> Option<u8> {
        if self.ratio.is_nan() {
            return None;
        }
        Some((self.ratio.clamp(0.0, 1.0) * 100.0).round() as u8)
    }
}
