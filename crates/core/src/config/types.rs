use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::controller::Resolution;
use crate::engine::EngineConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Where results go and which resolution is preselected
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,
    #[serde(default)]
    pub default_resolution: Resolution,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            default_resolution: Resolution::default(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}
