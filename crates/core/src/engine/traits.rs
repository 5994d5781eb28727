//! Trait definitions for the engine module.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::error::EngineError;

/// An opaque transcoding capability.
///
/// The engine owns a private namespace of virtual files. Callers stage input
/// bytes under a name, execute a command that refers to those names, and
/// read the produced artifact back.
#[async_trait]
pub trait TranscodingEngine: Send + Sync {
    /// Returns the name of this engine implementation.
    fn name(&self) -> &str;

    /// Loads the engine. Called at most once per process by `EngineHandle`.
    async fn initialize(&self) -> Result<(), EngineError>;

    /// Copies `bytes` into the engine namespace under `virtual_name`.
    async fn stage_input(&self, bytes: Bytes, virtual_name: &str) -> Result<(), EngineError>;

    /// Runs a transcoding command.
    ///
    /// Progress ratios in `[0.0, 1.0]` are sent on `progress` zero or more
    /// times. They are not guaranteed to be monotonic or to reach 1.0.
    /// If the receiver is dropped, execution continues without reporting.
    async fn execute(
        &self,
        args: Vec<String>,
        progress: mpsc::Sender<f64>,
    ) -> Result<(), EngineError>;

    /// Reads a produced artifact from the engine namespace.
    async fn read_output(&self, virtual_name: &str) -> Result<Bytes, EngineError>;
}

/// Rejects virtual names that are not plain file names.
pub(crate) fn validate_virtual_name(name: &str) -> Result<(), EngineError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');

    if invalid {
        return Err(EngineError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}
