//! Terminal rendering of controller state.

use tokio::sync::watch;
use vcompress_core::{ControllerState, EngineReadiness, JobStage, Phase};

/// One status line for the given state.
pub fn status_line(state: &ControllerState) -> String {
    // Before any job, the engine's own status is what the user waits on
    if matches!(state.phase, Phase::Idle | Phase::FileSelected) {
        match &state.readiness {
            EngineReadiness::Uninitialized | EngineReadiness::Loading => {
                return "Loading ffmpeg...".to_string()
            }
            EngineReadiness::Failed(reason) => return format!("Failed to load ffmpeg: {}", reason),
            EngineReadiness::Ready => {}
        }
    }

    match &state.phase {
        Phase::Idle => "No file selected".to_string(),
        Phase::FileSelected => format!(
            "Selected {} ({})",
            state.source_name().unwrap_or("input"),
            state.resolution
        ),
        Phase::Initializing { .. } => "Loading ffmpeg...".to_string(),
        Phase::Running { stage, .. } => match stage {
            JobStage::Staging => "Preparing input...".to_string(),
            JobStage::Executing => format!("Converting: {}%", state.progress_percent),
            JobStage::ReadingOutput => "Collecting output...".to_string(),
        },
        Phase::Succeeded(result) => format!(
            "Conversion complete: {} ({} bytes)",
            result.file_name,
            result.len()
        ),
        Phase::Failed(failure) => failure.message.clone(),
    }
}

/// Whether no further updates will be rendered for the current job.
pub fn is_terminal(state: &ControllerState) -> bool {
    matches!(state.phase, Phase::Succeeded(_) | Phase::Failed(_))
}

/// Prints a line each time the status text changes, until a job finishes
/// or the controller goes away.
pub async fn follow(mut rx: watch::Receiver<ControllerState>) {
    let mut last = String::new();
    loop {
        let (line, done) = {
            let state = rx.borrow_and_update();
            (status_line(&state), is_terminal(&state))
        };
        if line != last {
            eprintln!("{}", line);
            last = line;
        }
        if done || rx.changed().await.is_err() {
            return;
        }
    }
}
