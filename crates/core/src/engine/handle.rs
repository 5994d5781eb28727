//! Process-wide engine handle with a one-shot initialization lifecycle.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use super::error::EngineError;
use super::traits::TranscodingEngine;

/// Readiness of the shared engine.
///
/// Moves `Uninitialized -> Loading` once, then `Loading -> Ready` or
/// `Loading -> Failed` once. It never re-enters `Loading`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum EngineReadiness {
    #[default]
    Uninitialized,
    Loading,
    Ready,
    Failed(String),
}

impl EngineReadiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Whether initialization has reached its final outcome.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed(_))
    }
}

struct Inner {
    engine: Arc<dyn TranscodingEngine>,
    readiness: watch::Sender<EngineReadiness>,
    started: AtomicBool,
}

/// Shared handle to the single engine instance.
///
/// Cheaply cloneable. Initialization is triggered by `start` (or lazily by
/// the first `wait_ready`) and attempted at most once per handle.
#[derive(Clone)]
pub struct EngineHandle {
    inner: Arc<Inner>,
}

impl EngineHandle {
    /// Wraps an engine without starting it.
    pub fn new(engine: Arc<dyn TranscodingEngine>) -> Self {
        let (readiness, _) = watch::channel(EngineReadiness::Uninitialized);
        Self {
            inner: Arc::new(Inner {
                engine,
                readiness,
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Wraps an engine and immediately starts loading it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn launch(engine: Arc<dyn TranscodingEngine>) -> Self {
        let handle = Self::new(engine);
        handle.start();
        handle
    }

    /// Spawns engine initialization. Calls after the first are no-ops.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.readiness.send_replace(EngineReadiness::Loading);
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            info!("Loading transcoding engine: {}", inner.engine.name());
            match inner.engine.initialize().await {
                Ok(()) => {
                    info!("Transcoding engine ready");
                    inner.readiness.send_replace(EngineReadiness::Ready);
                }
                Err(e) => {
                    error!("Failed to load transcoding engine: {}", e);
                    inner
                        .readiness
                        .send_replace(EngineReadiness::Failed(e.to_string()));
                }
            }
        });
    }

    /// Current readiness.
    pub fn readiness(&self) -> EngineReadiness {
        self.inner.readiness.borrow().clone()
    }

    /// Receiver notified on every readiness change.
    pub fn subscribe(&self) -> watch::Receiver<EngineReadiness> {
        self.inner.readiness.subscribe()
    }

    /// Suspends until initialization settles. Never re-triggers it.
    pub async fn wait_ready(&self) -> Result<(), EngineError> {
        self.start();

        let mut rx = self.inner.readiness.subscribe();
        let settled = rx
            .wait_for(EngineReadiness::is_settled)
            .await
            .map_err(|_| EngineError::NotReady {
                reason: "engine handle closed".to_string(),
            })?
            .clone();

        match settled {
            EngineReadiness::Ready => Ok(()),
            EngineReadiness::Failed(reason) => Err(EngineError::NotReady { reason }),
            other => Err(EngineError::NotReady {
                reason: format!("unexpected readiness {:?}", other),
            }),
        }
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &Arc<dyn TranscodingEngine> {
        &self.inner.engine
    }
}
