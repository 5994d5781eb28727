//! Engine module: the transcoding capability the controller drives.
//!
//! This module provides the `TranscodingEngine` trait, an FFmpeg-backed
//! implementation, and `EngineHandle`, the process-wide wrapper that loads the
//! engine exactly once and exposes its readiness.
//!
//! # Example
//!
//! ```ignore
//! use vcompress_core::engine::{EngineConfig, EngineHandle, FfmpegEngine};
//!
//! let engine = Arc::new(FfmpegEngine::new(EngineConfig::default()));
//! let handle = EngineHandle::launch(engine);
//!
//! // Later, before the first job
//! handle.wait_ready().await?;
//! ```

mod config;
mod error;
mod ffmpeg;
mod handle;
mod traits;

pub use config::EngineConfig;
pub use error::EngineError;
pub use ffmpeg::FfmpegEngine;
pub use handle::{EngineHandle, EngineReadiness};
pub use traits::TranscodingEngine;
