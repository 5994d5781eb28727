//! Conversion controller implementation.
//!
//! Drives one job at a time through the engine:
//! - **Initializing**: wait for the shared engine to finish loading
//! - **Staging**: copy the source into the engine namespace
//! - **Executing**: run the transcode while consuming progress events
//! - **Reading output**: fetch the artifact and publish the result
//!
//! All state lives in a `watch` channel. Every write made after a suspension
//! point is tagged with the job id and dropped if that job is no longer the
//! active one.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::engine::{EngineHandle, EngineReadiness};

use super::args::{transcode_args, INPUT_NAME, OUTPUT_NAME};
use super::error::{ControllerError, JobError};
use super::types::{
    ControllerState, JobFailure, JobId, JobOutcome, JobStage, Phase, ProgressEvent, Resolution,
    ResultAsset, SourceAsset,
};

/// Capacity of the per-job progress channel.
const PROGRESS_BUFFER: usize = 64;

/// Parameters captured when a job is admitted.
#[derive(Debug, Clone)]
struct ConversionJob {
    id: JobId,
    /// Admitted as `Initializing`; must wait for the engine before staging.
    awaits_engine: bool,
    source: SourceAsset,
    resolution: Resolution,
}

/// Why a job stopped before producing a result.
enum Interrupt {
    Superseded,
    Failed(JobError),
}

impl From<JobError> for Interrupt {
    fn from(err: JobError) -> Self {
        Self::Failed(err)
    }
}

struct Inner {
    engine: EngineHandle,
    state: watch::Sender<ControllerState>,
    last_job: AtomicU64,
    /// Serializes access to the engine namespace, including the tail of a
    /// superseded job that is still unwinding.
    engine_slot: Mutex<()>,
}

/// The conversion state machine.
///
/// Cloning yields another handle to the same controller.
#[derive(Clone)]
pub struct ConversionController {
    inner: Arc<Inner>,
}

impl ConversionController {
    /// Creates a controller with the default resolution.
    pub fn new(engine: EngineHandle) -> Self {
        Self::with_resolution(engine, Resolution::default())
    }

    /// Creates a controller with an initial resolution.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_resolution(engine: EngineHandle, resolution: Resolution) -> Self {
        let mut initial = ControllerState::new(resolution);
        initial.readiness = engine.readiness();
        let (state, _) = watch::channel(initial);

        let controller = Self {
            inner: Arc::new(Inner {
                engine,
                state,
                last_job: AtomicU64::new(0),
                engine_slot: Mutex::new(()),
            }),
        };
        controller.track_readiness();
        controller
    }

    /// Copies engine readiness into the published state until the controller
    /// or the engine goes away.
    fn track_readiness(&self) {
        let mut rx = self.inner.engine.subscribe();
        let weak = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            loop {
                let readiness: EngineReadiness = rx.borrow_and_update().clone();
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                inner.state.send_if_modified(|state| {
                    if state.readiness == readiness {
                        return false;
                    }
                    state.readiness = readiness;
                    true
                });
                drop(inner);

                if rx.changed().await.is_err() {
                    return;
                }
            }
        });
    }

    /// Current state snapshot.
    pub fn state(&self) -> ControllerState {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every visible state change.
    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.inner.state.subscribe()
    }

    /// Readiness of the underlying engine.
    pub fn readiness(&self) -> EngineReadiness {
        self.inner.engine.readiness()
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.inner.engine
    }

    /// Selects a new source. Allowed in every phase; any active job is
    /// superseded and all progress, result and error state is cleared.
    pub fn select_file(&self, asset: SourceAsset) {
        info!("Selected {} ({} bytes)", asset.name, asset.len());
        self.inner.state.send_modify(|state| {
            if let Some(job) = state.phase.active_job() {
                info!("{} superseded by file selection", job);
            }
            state.source = Some(asset);
            state.phase = Phase::FileSelected;
            state.progress_percent = 0;
        });
    }

    /// Changes the output resolution. Rejected while a job is in flight.
    pub fn set_resolution(&self, resolution: Resolution) -> Result<(), ControllerError> {
        let mut outcome = Ok(());
        self.inner.state.send_if_modified(|state| {
            if state.is_busy() {
                outcome = Err(ControllerError::ConversionInFlight);
                return false;
            }
            if state.resolution == resolution {
                return false;
            }
            state.resolution = resolution;
            true
        });

        match &outcome {
            Ok(()) => debug!("Resolution set to {}", resolution),
            Err(_) => debug!("Ignoring resolution change to {} during conversion", resolution),
        }
        outcome
    }

    /// Clears progress, result and error, superseding any active job.
    pub fn reset(&self) {
        self.inner.state.send_modify(|state| {
            if let Some(job) = state.phase.active_job() {
                info!("{} superseded by reset", job);
            }
            state.phase = if state.source.is_some() {
                Phase::FileSelected
            } else {
                Phase::Idle
            };
            state.progress_percent = 0;
        });
    }

    /// Runs a conversion of the selected file to completion.
    ///
    /// Returns `Err` only when the request is refused. Every failure of an
    /// admitted job is captured in `Phase::Failed` and returned as
    /// `JobOutcome::Failed`.
    pub async fn start_conversion(&self) -> Result<JobOutcome, ControllerError> {
        let readiness = self.inner.engine.readiness();
        if let EngineReadiness::Failed(reason) = &readiness {
            return Err(ControllerError::EngineUnavailable(reason.clone()));
        }
        let ready = readiness.is_ready();

        let mut admitted = Err(ControllerError::NoFileSelected);
        self.inner.state.send_if_modified(|state| {
            if state.is_busy() {
                admitted = Err(ControllerError::ConversionInFlight);
                return false;
            }
            let Some(source) = state.source.clone() else {
                return false;
            };

            let id = JobId(self.inner.last_job.fetch_add(1, Ordering::SeqCst) + 1);
            state.phase = if ready {
                Phase::Running {
                    job: id,
                    stage: JobStage::Staging,
                }
            } else {
                Phase::Initializing { job: id }
            };
            state.progress_percent = 0;
            admitted = Ok(ConversionJob {
                id,
                awaits_engine: !ready,
                source,
                resolution: state.resolution,
            });
            true
        });

        let job = admitted?;
        info!(
            "Starting {}: {} at {}",
            job.id, job.source.name, job.resolution
        );
        Ok(self.run_job(job).await)
    }

    /// Saves the current result under the fixed download name in `dir`.
    pub async fn save_result(&self, dir: &Path) -> Result<PathBuf, ControllerError> {
        let result = self
            .state()
            .result()
            .cloned()
            .ok_or(ControllerError::NoResult)?;
        let path = result.save_to(dir).await?;
        info!("Saved {} ({} bytes)", path.display(), result.len());
        Ok(path)
    }

    /// Applies a progress event if it belongs to the running job.
    ///
    /// Events from superseded jobs, events outside `Running`, NaN ratios and
    /// values below the current percentage are ignored. Returns whether the
    /// visible state changed.
    pub fn apply_progress(&self, event: ProgressEvent) -> bool {
        let Some(percent) = event.percent() else {
            return false;
        };

        self.inner.state.send_if_modified(|state| {
            match state.phase {
                Phase::Running { job, .. } if job == event.job => {}
                _ => {
                    debug!("Dropping progress from inactive {}", event.job);
                    return false;
                }
            }
            if percent <= state.progress_percent {
                return false;
            }
            state.progress_percent = percent;
            true
        })
    }

    async fn run_job(&self, job: ConversionJob) -> JobOutcome {
        match self.drive(&job).await {
            Ok(bytes) => self.finish(job.id, Ok(ResultAsset::new(job.id, bytes))),
            Err(Interrupt::Failed(err)) => self.finish(job.id, Err(err)),
            Err(Interrupt::Superseded) => {
                debug!("{} stopped after being superseded", job.id);
                JobOutcome::Superseded
            }
        }
    }

    async fn drive(&self, job: &ConversionJob) -> Result<Bytes, Interrupt> {
        let handle = self.inner.engine.clone();

        if job.awaits_engine {
            info!("{} waiting for the transcoding engine", job.id);
            self.guarded(job.id, handle.wait_ready())
                .await?
                .map_err(JobError::EngineLoad)?;
            self.enter_stage(job.id, JobStage::Staging)?;
        }

        let _slot = self.guarded(job.id, self.inner.engine_slot.lock()).await?;
        let engine = handle.engine();

        self.guarded(job.id, engine.stage_input(job.source.bytes.clone(), INPUT_NAME))
            .await?
            .map_err(JobError::Staging)?;
        self.enter_stage(job.id, JobStage::Executing)?;

        let args = transcode_args(job.resolution);
        debug!("{} engine args: {}", job.id, args.join(" "));
        self.execute_with_progress(job.id, args).await?;
        self.enter_stage(job.id, JobStage::ReadingOutput)?;

        let bytes = self
            .guarded(job.id, engine.read_output(OUTPUT_NAME))
            .await?
            .map_err(JobError::from_read)?;
        Ok(bytes)
    }

    /// Runs `execute` while draining its progress channel into the state.
    async fn execute_with_progress(&self, job: JobId, args: Vec<String>) -> Result<(), Interrupt> {
        let (tx, mut rx) = mpsc::channel(PROGRESS_BUFFER);
        let mut state_rx = self.watch_job(job)?;

        let execution = self.inner.engine.engine().execute(args, tx);
        tokio::pin!(execution);

        let result = loop {
            tokio::select! {
                result = &mut execution => break result,
                Some(ratio) = rx.recv() => {
                    self.apply_progress(ProgressEvent { job, ratio });
                }
                changed = state_rx.changed() => {
                    if changed.is_err() || state_rx.borrow_and_update().phase.active_job() != Some(job) {
                        return Err(Interrupt::Superseded);
                    }
                }
            }
        };

        // Events queued before execute returned still count
        while let Ok(ratio) = rx.try_recv() {
            self.apply_progress(ProgressEvent { job, ratio });
        }

        result.map_err(|e| JobError::Execution(e).into())
    }

    /// Subscribes to state changes, failing fast if `job` is already stale.
    fn watch_job(&self, job: JobId) -> Result<watch::Receiver<ControllerState>, Interrupt> {
        let mut rx = self.inner.state.subscribe();
        if rx.borrow_and_update().phase.active_job() != Some(job) {
            return Err(Interrupt::Superseded);
        }
        Ok(rx)
    }

    /// Awaits `fut` unless `job` is superseded first, in which case the
    /// future is dropped.
    async fn guarded<F: Future>(&self, job: JobId, fut: F) -> Result<F::Output, Interrupt> {
        let mut rx = self.watch_job(job)?;
        tokio::pin!(fut);

        loop {
            tokio::select! {
                out = &mut fut => return Ok(out),
                changed = rx.changed() => {
                    if changed.is_err() || rx.borrow_and_update().phase.active_job() != Some(job) {
                        return Err(Interrupt::Superseded);
                    }
                }
            }
        }
    }

    fn enter_stage(&self, job: JobId, stage: JobStage) -> Result<(), Interrupt> {
        let mut current = false;
        self.inner.state.send_if_modified(|state| {
            if state.phase.active_job() != Some(job) {
                return false;
            }
            current = true;
            state.phase = Phase::Running { job, stage };
            true
        });

        if current {
            debug!("{} entered {:?}", job, stage);
            Ok(())
        } else {
            Err(Interrupt::Superseded)
        }
    }

    /// Publishes the terminal phase of `job` if it is still the active one.
    fn finish(&self, job: JobId, outcome: Result<ResultAsset, JobError>) -> JobOutcome {
        let terminal = match &outcome {
            Ok(result) => Phase::Succeeded(result.clone()),
            Err(err) => Phase::Failed(JobFailure {
                job,
                kind: err.kind(),
                message: err.to_string(),
            }),
        };

        let mut applied = false;
        self.inner.state.send_if_modified(|state| {
            if state.phase.active_job() != Some(job) {
                return false;
            }
            if matches!(terminal, Phase::Succeeded(_)) {
                state.progress_percent = 100;
            }
            state.phase = terminal.clone();
            applied = true;
            true
        });

        if !applied {
            debug!("Discarding outcome of superseded {}", job);
            return JobOutcome::Superseded;
        }

        match (outcome, terminal) {
            (Ok(result), _) => {
                info!("{} succeeded ({} bytes)", job, result.len());
                JobOutcome::Succeeded(result)
            }
            (Err(err), Phase::Failed(failure)) => {
                match &err {
                    JobError::OutputMissing(_) => {
                        error!("{} violated the engine contract: {}", job, err)
                    }
                    JobError::EngineLoad(_) => error!("{} failed: {}", job, err),
                    _ => warn!("{} failed: {}", job, err),
                }
                JobOutcome::Failed(failure)
            }
            (Err(_), _) => JobOutcome::Superseded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;
    use crate::testing::{MockEngine, MockStep};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    async fn ready_controller() -> (ConversionController, Arc<MockEngine>) {
        let engine = Arc::new(MockEngine::new());
        let handle = EngineHandle::launch(engine.clone());
        handle.wait_ready().await.unwrap();
        (ConversionController::new(handle), engine)
    }

    fn asset(name: &str) -> SourceAsset {
        SourceAsset::new(name, format!("video:{}", name).into_bytes())
    }

    async fn wait_for_phase(controller: &ConversionController, name: &str) {
        let mut rx = controller.subscribe();
        timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.phase.name() == name),
        )
        .await
        .expect("timed out waiting for phase")
        .unwrap();
    }

    #[tokio::test]
    async fn test_initial_state() {
        let (controller, _) = ready_controller().await;
        let state = controller.state();
        assert_eq!(state.phase, Phase::Idle);
        assert_eq!(state.resolution, Resolution::P720);
        assert_eq!(state.progress_percent, 0);
        assert!(state.source.is_none());
    }

    #[tokio::test]
    async fn test_start_without_file_is_rejected() {
        let (controller, engine) = ready_controller().await;
        let err = controller.start_conversion().await.unwrap_err();
        assert!(matches!(err, ControllerError::NoFileSelected));
        assert!(engine.executions().await.is_empty());
    }

    #[tokio::test]
    async fn test_successful_conversion() {
        let (controller, engine) = ready_controller().await;
        engine.set_output(Bytes::from_static(b"small")).await;

        controller.select_file(asset("a.mp4"));
        let outcome = controller.start_conversion().await.unwrap();

        let JobOutcome::Succeeded(result) = outcome else {
            panic!("expected success, got {:?}", outcome);
        };
        assert_eq!(&result.bytes[..], b"small");
        assert_eq!(result.file_name, "compressed_video.mp4");

        let state = controller.state();
        assert_eq!(state.progress_percent, 100);
        assert!(state.error_message().is_none());
        assert_eq!(state.result(), Some(&result));
        assert_eq!(
            engine.staged("input.mp4").await.as_deref(),
            Some(&b"video:a.mp4"[..])
        );
    }

    #[tokio::test]
    async fn test_stage_failure_is_recoverable() {
        let (controller, engine) = ready_controller().await;
        engine
            .set_next_error(
                MockStep::Stage,
                EngineError::staging_failed("input.mp4", "quota exceeded"),
            )
            .await;

        controller.select_file(asset("a.mp4"));
        let outcome = controller.start_conversion().await.unwrap();
        let JobOutcome::Failed(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, crate::controller::JobErrorKind::Staging);
        assert!(failure.message.contains("quota exceeded"));
        assert!(engine.executions().await.is_empty());

        let outcome = controller.start_conversion().await.unwrap();
        assert!(matches!(outcome, JobOutcome::Succeeded(_)));
        assert!(controller.state().error_message().is_none());
    }

    #[tokio::test]
    async fn test_missing_output_is_classified() {
        let (controller, engine) = ready_controller().await;
        engine.set_produce_output(false).await;

        controller.select_file(asset("a.mp4"));
        let outcome = controller.start_conversion().await.unwrap();
        let JobOutcome::Failed(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, crate::controller::JobErrorKind::OutputMissing);
        assert!(controller.state().result().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_start_is_rejected() {
        let (controller, engine) = ready_controller().await;
        let gate = engine.pause(MockStep::Execute).await;

        controller.select_file(asset("a.mp4"));
        let running = tokio::spawn({
            let controller = controller.clone();
            async move { controller.start_conversion().await }
        });
        wait_for_phase(&controller, "running").await;

        let err = controller.start_conversion().await.unwrap_err();
        assert!(matches!(err, ControllerError::ConversionInFlight));

        gate.notify_one();
        let outcome = running.await.unwrap().unwrap();
        assert!(matches!(outcome, JobOutcome::Succeeded(_)));
        assert_eq!(engine.executions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_resolution_locked_while_running() {
        let (controller, engine) = ready_controller().await;
        let gate = engine.pause(MockStep::Execute).await;

        controller.select_file(asset("a.mp4"));
        controller.set_resolution(Resolution::P480).unwrap();
        let running = tokio::spawn({
            let controller = controller.clone();
            async move { controller.start_conversion().await }
        });
        wait_for_phase(&controller, "running").await;

        assert!(controller.set_resolution(Resolution::P1080).is_err());
        assert_eq!(controller.state().resolution, Resolution::P480);

        gate.notify_one();
        running.await.unwrap().unwrap();
        assert!(engine.executions().await[0].contains(&"scale=-2:480".to_string()));

        controller.set_resolution(Resolution::P1080).unwrap();
        assert_eq!(controller.state().resolution, Resolution::P1080);
    }

    #[tokio::test]
    async fn test_apply_progress_rules() {
        let (controller, engine) = ready_controller().await;
        let gate = engine.pause(MockStep::Execute).await;

        controller.select_file(asset("a.mp4"));
        // Outside Running nothing applies
        assert!(!controller.apply_progress(ProgressEvent { job: JobId(1), ratio: 0.5 }));

        let running = tokio::spawn({
            let controller = controller.clone();
            async move { controller.start_conversion().await }
        });
        wait_for_phase(&controller, "running").await;
        let job = controller.state().phase.active_job().unwrap();

        assert!(controller.apply_progress(ProgressEvent { job, ratio: 0.4 }));
        assert!(!controller.apply_progress(ProgressEvent { job, ratio: 0.2 }));
        assert!(!controller.apply_progress(ProgressEvent { job, ratio: f64::NAN }));
        assert!(!controller.apply_progress(ProgressEvent {
            job: JobId(job.0 + 7),
            ratio: 0.9
        }));
        assert_eq!(controller.state().progress_percent, 40);

        gate.notify_one();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_reset_supersedes_running_job() {
        let (controller, engine) = ready_controller().await;
        let gate = engine.pause(MockStep::Execute).await;

        controller.select_file(asset("a.mp4"));
        let running = tokio::spawn({
            let controller = controller.clone();
            async move { controller.start_conversion().await }
        });
        wait_for_phase(&controller, "running").await;

        controller.reset();
        let outcome = running.await.unwrap().unwrap();
        assert_eq!(outcome, JobOutcome::Superseded);
        drop(gate);

        let state = controller.state();
        assert_eq!(state.phase, Phase::FileSelected);
        assert_eq!(state.progress_percent, 0);
    }

    #[tokio::test]
    async fn test_save_result() {
        let (controller, engine) = ready_controller().await;
        let dir = TempDir::new().unwrap();

        let err = controller.save_result(dir.path()).await.unwrap_err();
        assert!(matches!(err, ControllerError::NoResult));

        engine.set_output(Bytes::from_static(b"out")).await;
        controller.select_file(asset("a.mp4"));
        controller.start_conversion().await.unwrap();

        let path = controller.save_result(dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join("compressed_video.mp4"));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"out");
    }

    #[tokio::test]
    async fn test_waits_for_engine_without_retriggering() {
        let engine = Arc::new(MockEngine::new());
        let gate = engine.pause(MockStep::Initialize).await;
        let handle = EngineHandle::launch(engine.clone());
        let controller = ConversionController::new(handle);

        controller.select_file(asset("a.mp4"));
        let running = tokio::spawn({
            let controller = controller.clone();
            async move { controller.start_conversion().await }
        });
        wait_for_phase(&controller, "initializing").await;
        assert!(controller.set_resolution(Resolution::P480).is_err());

        gate.notify_one();
        let outcome = running.await.unwrap().unwrap();
        assert!(matches!(outcome, JobOutcome::Succeeded(_)));
        assert_eq!(engine.initialize_count().await, 1);
    }

    #[tokio::test]
    async fn test_initializing_job_reports_staging() {
        let engine = Arc::new(MockEngine::new());
        let init_gate = engine.pause(MockStep::Initialize).await;
        let stage_gate = engine.pause(MockStep::Stage).await;
        let handle = EngineHandle::launch(engine.clone());
        let controller = ConversionController::new(handle);

        controller.select_file(asset("a.mp4"));
        let running = tokio::spawn({
            let controller = controller.clone();
            async move { controller.start_conversion().await }
        });
        wait_for_phase(&controller, "initializing").await;

        // The engine becomes ready while the job is parked on it
        init_gate.notify_one();
        let mut rx = controller.subscribe();
        timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| {
                matches!(
                    s.phase,
                    Phase::Running {
                        stage: JobStage::Staging,
                        ..
                    }
                )
            }),
        )
        .await
        .expect("job never reported staging")
        .unwrap();

        stage_gate.notify_one();
        let outcome = running.await.unwrap().unwrap();
        assert!(matches!(outcome, JobOutcome::Succeeded(_)));
    }

    #[tokio::test]
    async fn test_state_tracks_engine_readiness() {
        let engine = Arc::new(MockEngine::new());
        let gate = engine.pause(MockStep::Initialize).await;
        let handle = EngineHandle::launch(engine.clone());
        let controller = ConversionController::new(handle);
        assert_eq!(controller.state().readiness, EngineReadiness::Loading);

        gate.notify_one();
        let mut rx = controller.subscribe();
        timeout(Duration::from_secs(5), rx.wait_for(|s| s.readiness.is_ready()))
            .await
            .expect("readiness never published")
            .unwrap();
        assert_eq!(controller.readiness(), EngineReadiness::Ready);
    }

    #[tokio::test]
    async fn test_state_publishes_engine_failure() {
        let engine = Arc::new(MockEngine::new());
        engine
            .set_next_error(MockStep::Initialize, EngineError::load_failed("bad build"))
            .await;
        let controller = ConversionController::new(EngineHandle::launch(engine.clone()));

        let mut rx = controller.subscribe();
        let state = timeout(Duration::from_secs(5), rx.wait_for(|s| s.readiness.is_failed()))
            .await
            .expect("failure never published")
            .unwrap()
            .clone();
        assert_eq!(state.phase, Phase::Idle);
        assert!(matches!(state.readiness, EngineReadiness::Failed(ref r) if r.contains("bad build")));
    }
}
