//! Testing utilities and mock implementations.
//!
//! This module provides a scriptable engine so the controller can be tested
//! without an ffmpeg binary.
//!
//! # Example
//!
//! ```rust,ignore
//! use vcompress_core::testing::{MockEngine, MockStep};
//!
//! let engine = Arc::new(MockEngine::new());
//! engine.set_next_error(MockStep::Execute, EngineError::execution_failed("unsupported codec", None)).await;
//!
//! let handle = EngineHandle::launch(engine.clone());
//! let controller = ConversionController::new(handle);
//! ```

mod mock_engine;

pub use mock_engine::{MockEngine, MockStep};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::controller::SourceAsset;

    /// Bytes that start like an MP4 file.
    pub fn mp4_bytes(tag: &str) -> Vec<u8> {
        let mut bytes = b"\x00\x00\x00\x18ftypmp42\x00\x00\x00\x00mp42isom".to_vec();
        bytes.extend_from_slice(tag.as_bytes());
        bytes
    }

    /// A source asset named `name` with MP4-looking contents.
    pub fn source_asset(name: &str) -> SourceAsset {
        SourceAsset::new(name, mp4_bytes(name))
    }
}
