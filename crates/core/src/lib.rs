pub mod config;
pub mod controller;
pub mod engine;
pub mod testing;

pub use config::{
    load_config, load_config_from_env, load_config_from_str, validate_config, Config, ConfigError,
    OutputConfig,
};
pub use controller::{
    ControllerError, ControllerState, ConversionController, JobErrorKind, JobFailure, JobId,
    JobOutcome, JobStage, Phase, ProgressEvent, Resolution, ResultAsset, SourceAsset,
};
pub use engine::{
    EngineConfig, EngineError, EngineHandle, EngineReadiness, FfmpegEngine, TranscodingEngine,
};
