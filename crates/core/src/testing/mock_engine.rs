//! Mock transcoding engine for testing.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify, RwLock};

use crate::engine::{EngineError, TranscodingEngine};

/// An engine operation that can be paused or made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockStep {
    Initialize,
    Stage,
    Execute,
    ReadOutput,
}

/// Mock implementation of the TranscodingEngine trait.
///
/// Provides controllable behavior for testing:
/// - Inject a one-shot error per operation
/// - Pause an operation until the test releases it
/// - Script the progress ratios emitted during execute
/// - Record every command for assertions
///
/// By default execute copies the staged input to the output name.
///
/// # Example
///
/// ```rust,ignore
/// use vcompress_core::testing::{MockEngine, MockStep};
///
/// let engine = Arc::new(MockEngine::new());
/// engine.set_progress(vec![0.0, 0.5, 1.0]).await;
/// let gate = engine.pause(MockStep::Execute).await;
///
/// // ... start a conversion, observe the paused state ...
///
/// gate.notify_one();
/// ```
#[derive(Debug)]
pub struct MockEngine {
    /// Virtual filesystem.
    files: Arc<RwLock<HashMap<String, Bytes>>>,
    /// Recorded execute argument lists.
    executions: Arc<RwLock<Vec<Vec<String>>>>,
    /// Number of initialize calls.
    initialize_count: Arc<RwLock<usize>>,
    /// One-shot errors by operation.
    next_errors: Arc<RwLock<HashMap<MockStep, EngineError>>>,
    /// One-shot pauses by operation.
    pauses: Arc<RwLock<HashMap<MockStep, Arc<Notify>>>>,
    /// Ratios sent during execute.
    progress: Arc<RwLock<Vec<f64>>>,
    /// Fixed output contents; `None` echoes the input.
    output: Arc<RwLock<Option<Bytes>>>,
    /// Whether execute writes the output file at all.
    produce_output: Arc<RwLock<bool>>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// Create a new mock engine.
    pub fn new() -> Self {
        Self {
            files: Arc::new(RwLock::new(HashMap::new())),
            executions: Arc::new(RwLock::new(Vec::new())),
            initialize_count: Arc::new(RwLock::new(0)),
            next_errors: Arc::new(RwLock::new(HashMap::new())),
            pauses: Arc::new(RwLock::new(HashMap::new())),
            progress: Arc::new(RwLock::new(Vec::new())),
            output: Arc::new(RwLock::new(None)),
            produce_output: Arc::new(RwLock::new(true)),
        }
    }

    /// Configure the next call of `step` to fail with the given error.
    pub async fn set_next_error(&self, step: MockStep, error: EngineError) {
        self.next_errors.write().await.insert(step, error);
    }

    /// Make the next call of `step` wait until the returned gate is notified.
    pub async fn pause(&self, step: MockStep) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.pauses.write().await.insert(step, Arc::clone(&gate));
        gate
    }

    /// Set the ratios emitted during execute.
    pub async fn set_progress(&self, ratios: Vec<f64>) {
        *self.progress.write().await = ratios;
    }

    /// Set fixed output contents.
    pub async fn set_output(&self, bytes: Bytes) {
        *self.output.write().await = Some(bytes);
    }

    /// Enable or disable writing the output artifact.
    pub async fn set_produce_output(&self, produce: bool) {
        *self.produce_output.write().await = produce;
    }

    /// All execute argument lists, oldest first.
    pub async fn executions(&self) -> Vec<Vec<String>> {
        self.executions.read().await.clone()
    }

    /// Number of initialize calls.
    pub async fn initialize_count(&self) -> usize {
        *self.initialize_count.read().await
    }

    /// Contents of a virtual file.
    pub async fn staged(&self, name: &str) -> Option<Bytes> {
        self.files.read().await.get(name).cloned()
    }

    async fn take_error(&self, step: MockStep) -> Option<EngineError> {
        self.next_errors.write().await.remove(&step)
    }

    async fn wait_if_paused(&self, step: MockStep) {
        let gate = self.pauses.write().await.remove(&step);
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

#[async_trait]
impl TranscodingEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn initialize(&self) -> Result<(), EngineError> {
        *self.initialize_count.write().await += 1;
        self.wait_if_paused(MockStep::Initialize).await;
        match self.take_error(MockStep::Initialize).await {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn stage_input(&self, bytes: Bytes, virtual_name: &str) -> Result<(), EngineError> {
        self.wait_if_paused(MockStep::Stage).await;
        if let Some(err) = self.take_error(MockStep::Stage).await {
            return Err(err);
        }
        self.files
            .write()
            .await
            .insert(virtual_name.to_string(), bytes);
        Ok(())
    }

    async fn execute(
        &self,
        args: Vec<String>,
        progress: mpsc::Sender<f64>,
    ) -> Result<(), EngineError> {
        self.executions.write().await.push(args.clone());
        self.wait_if_paused(MockStep::Execute).await;

        let ratios = self.progress.read().await.clone();
        for ratio in ratios {
            let _ = progress.send(ratio).await;
        }

        if let Some(err) = self.take_error(MockStep::Execute).await {
            return Err(err);
        }

        let input = args
            .iter()
            .position(|a| a == "-i")
            .and_then(|i| args.get(i + 1))
            .ok_or_else(|| EngineError::execution_failed("missing -i argument", None))?;
        let output = args
            .last()
            .ok_or_else(|| EngineError::execution_failed("missing output argument", None))?;

        let data = match self.output.read().await.clone() {
            Some(data) => data,
            None => self
                .files
                .read()
                .await
                .get(input)
                .cloned()
                .ok_or_else(|| EngineError::execution_failed("input not staged", None))?,
        };

        if *self.produce_output.read().await {
            self.files.write().await.insert(output.clone(), data);
        }
        Ok(())
    }

    async fn read_output(&self, virtual_name: &str) -> Result<Bytes, EngineError> {
        self.wait_if_paused(MockStep::ReadOutput).await;
        if let Some(err) = self.take_error(MockStep::ReadOutput).await {
            return Err(err);
        }
        self.files
            .read()
            .await
            .get(virtual_name)
            .cloned()
            .ok_or_else(|| EngineError::output_missing(virtual_name))
    }
}
