//! Configuration module
//!
//! YAML configuration with environment overrides for the LLM endpoint and the
//! browser control channel.

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;


use crate::errors::ConfigError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<QueuePilotConfig, ConfigError> {
    ConfigLoader::from_file(path).await
}
