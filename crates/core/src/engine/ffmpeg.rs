//! FFmpeg-based engine implementation.
//!
//! The engine namespace is a private working directory; virtual names map to
//! plain files inside it and ffmpeg runs with that directory as its cwd.

use async_trait::async_trait;
use bytes::Bytes;
use regex_lite::Regex;
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use super::config::EngineConfig;
use super::error::EngineError;
use super::traits::{validate_virtual_name, TranscodingEngine};

/// Most recent ffmpeg diagnostic lines kept for a failed run.
const STDERR_TAIL_LINES: usize = 20;

/// FFmpeg-based engine implementation.
pub struct FfmpegEngine {
    config: EngineConfig,
}

impl FfmpegEngine {
    /// Creates a new FFmpeg engine with the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Creates an engine with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default())
    }

    /// The directory backing the engine namespace.
    pub fn work_dir(&self) -> &Path {
        &self.config.work_dir
    }

    /// Removes the working directory and everything staged in it.
    pub async fn cleanup(&self) -> Result<(), EngineError> {
        match tokio::fs::remove_dir_all(&self.config.work_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EngineError::Io(e)),
        }
    }

    fn resolve(&self, virtual_name: &str) -> Result<PathBuf, EngineError> {
        validate_virtual_name(virtual_name)?;
        Ok(self.config.work_dir.join(virtual_name))
    }

    /// Prepends the process-level flags to the caller's command.
    fn build_command_args(&self, args: &[String]) -> Vec<String> {
        let mut full = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-nostats".to_string(),
            "-loglevel".to_string(),
            self.config.log_level.clone(),
            "-progress".to_string(),
            "pipe:2".to_string(),
        ];
        full.extend(self.config.extra_args.iter().cloned());
        full.extend(args.iter().cloned());
        full
    }

    fn map_spawn_error(&self, e: std::io::Error) -> EngineError {
        if e.kind() == ErrorKind::NotFound {
            EngineError::FfmpegNotFound {
                path: self.config.ffmpeg_path.clone(),
            }
        } else {
            EngineError::Io(e)
        }
    }
}

fn is_error_line(line: &str) -> bool {
    line.contains("Error")
        || line.contains("error")
        || line.contains("Invalid")
        || line.contains("Unknown")
        || line.contains("not found")
}

/// Turns ffmpeg stderr lines into progress ratios.
///
/// The total comes from the input's `Duration:` line; the position from the
/// `-progress` key/value output (`out_time_us`, `out_time_ms` are both in
/// microseconds) or a classic `time=` stats field.
pub(crate) struct ProgressParser {
    duration_secs: Option<f64>,
    duration_re: Option<Regex>,
    out_time_re: Option<Regex>,
    stats_time_re: Option<Regex>,
}

impl ProgressParser {
    pub(crate) fn new() -> Self {
        Self {
            duration_secs: None,
            duration_re: Regex::new(r"Duration:\s*(\d+):(\d+):(\d+(?:\.\d+)?)").ok(),
            out_time_re: Regex::new(r"^out_time_(?:us|ms)=(\d+)").ok(),
            stats_time_re: Regex::new(r"time=(\d+):(\d+):(\d+(?:\.\d+)?)").ok(),
        }
    }

    /// Feeds one stderr line, returning a ratio when the line carries one.
    pub(crate) fn feed(&mut self, line: &str) -> Option<f64> {
        let line = line.trim();

        if line == "progress=end" {
            return Some(1.0);
        }

        // Only the first Duration line belongs to the input
        if self.duration_secs.is_none() {
            if let Some(caps) = self.duration_re.as_ref().and_then(|re| re.captures(line)) {
                self.duration_secs = hms_to_secs(&caps[1], &caps[2], &caps[3]);
                return None;
            }
        }

        let position = if let Some(caps) =
            self.out_time_re.as_ref().and_then(|re| re.captures(line))
        {
            caps[1].parse::<f64>().ok().map(|us| us / 1_000_000.0)
        } else if let Some(caps) = self.stats_time_re.as_ref().and_then(|re| re.captures(line)) {
            hms_to_secs(&caps[1], &caps[2], &caps[3])
        } else {
            None
        };

        let position = position?;
        let total = self.duration_secs.filter(|d| *d > 0.0)?;
        Some((position / total).clamp(0.0, 1.0))
    }
}

fn hms_to_secs(h: &str, m: &str, s: &str) -> Option<f64> {
    let h = h.parse::<f64>().ok()?;
    let m = m.parse::<f64>().ok()?;
    let s = s.parse::<f64>().ok()?;
    Some(h * 3600.0 + m * 60.0 + s)
}

#[async_trait]
impl TranscodingEngine for FfmpegEngine {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn initialize(&self) -> Result<(), EngineError> {
        let output = Command::new(&self.config.ffmpeg_path)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.map_spawn_error(e))?;

        if !output.status.success() {
            return Err(EngineError::load_failed(format!(
                "{} -version exited with code: {:?}",
                self.config.ffmpeg_path.display(),
                output.status.code()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let version = stdout.lines().next().unwrap_or("unknown version");
        info!("Using {}", version);

        tokio::fs::create_dir_all(&self.config.work_dir)
            .await
            .map_err(|e| {
                EngineError::load_failed(format!(
                    "cannot create working directory {}: {}",
                    self.config.work_dir.display(),
                    e
                ))
            })?;

        Ok(())
    }

    async fn stage_input(&self, bytes: Bytes, virtual_name: &str) -> Result<(), EngineError> {
        let path = self.resolve(virtual_name)?;

        tokio::fs::create_dir_all(&self.config.work_dir)
            .await
            .map_err(|e| EngineError::staging_failed(virtual_name, e.to_string()))?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| EngineError::staging_failed(virtual_name, e.to_string()))?;

        debug!("Staged {} ({} bytes)", virtual_name, bytes.len());
        Ok(())
    }

    async fn execute(
        &self,
        args: Vec<String>,
        progress: mpsc::Sender<f64>,
    ) -> Result<(), EngineError> {
        // The trailing argument is ffmpeg's output; a leftover from a previous
        // run must not be mistaken for this run's artifact.
        if let Some(output_name) = args.last() {
            if let Ok(path) = self.resolve(output_name) {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => debug!("Removed stale {}", output_name),
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(EngineError::Io(e)),
                }
            }
        }

        let full_args = self.build_command_args(&args);
        debug!("Running {} {}", self.config.ffmpeg_path.display(), full_args.join(" "));

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&full_args)
            .current_dir(&self.config.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.map_spawn_error(e))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::execution_failed("ffmpeg stderr not captured", None))?;
        let mut reader = BufReader::new(stderr).lines();
        let mut parser = ProgressParser::new();

        let timeout_duration = Duration::from_secs(self.config.timeout_secs);
        let result = timeout(timeout_duration, async {
            let mut error_lines = VecDeque::with_capacity(STDERR_TAIL_LINES);

            while let Some(line) = reader.next_line().await? {
                if is_error_line(&line) {
                    if error_lines.len() == STDERR_TAIL_LINES {
                        error_lines.pop_front();
                    }
                    error_lines.push_back(line.clone());
                }

                if let Some(ratio) = parser.feed(&line) {
                    // Non-blocking: a slow consumer only loses intermediate updates
                    let _ = progress.try_send(ratio);
                }
            }

            let status = child.wait().await?;
            let error_output = Vec::from(error_lines).join("\n");
            Ok::<(std::process::ExitStatus, String), std::io::Error>((status, error_output))
        })
        .await;

        match result {
            Ok(Ok((status, error_output))) => {
                if !status.success() {
                    warn!(
                        "FFmpeg exited with code {:?}:\n{}",
                        status.code(),
                        error_output
                    );
                    return Err(EngineError::execution_failed(
                        format!("FFmpeg exited with code: {:?}", status.code()),
                        if error_output.is_empty() {
                            None
                        } else {
                            Some(error_output)
                        },
                    ));
                }
                Ok(())
            }
            Ok(Err(e)) => Err(EngineError::Io(e)),
            Err(_) => {
                let _ = child.kill().await;
                Err(EngineError::Timeout {
                    timeout_secs: self.config.timeout_secs,
                })
            }
        }
    }

    async fn read_output(&self, virtual_name: &str) -> Result<Bytes, EngineError> {
        let path = self.resolve(virtual_name)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(EngineError::output_missing(virtual_name))
            }
            Err(e) => Err(EngineError::Io(e)),
        }
    }
}
