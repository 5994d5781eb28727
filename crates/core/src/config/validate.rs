use super::{types::Config, ConfigError};

/// Log levels ffmpeg accepts for `-loglevel`
const FFMPEG_LOG_LEVELS: &[&str] = &[
    "quiet", "panic", "fatal", "error", "warning", "info", "verbose", "debug", "trace",
];

/// Validate configuration
/// Currently validates:
/// - engine.ffmpeg_path is not empty
/// - engine.timeout_secs is not 0
/// - engine.log_level is a level ffmpeg understands
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.engine.ffmpeg_path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "engine.ffmpeg_path cannot be empty".to_string(),
        ));
    }

    if config.engine.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "engine.timeout_secs cannot be 0".to_string(),
        ));
    }

    if !FFMPEG_LOG_LEVELS.contains(&config.engine.log_level.as_str()) {
        return Err(ConfigError::ValidationError(format!(
            "engine.log_level must be one of {}, got {:?}",
            FFMPEG_LOG_LEVELS.join(", "),
            config.engine.log_level
        )));
    }

    Ok(())
}
