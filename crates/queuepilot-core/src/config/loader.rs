//! Configuration loader for YAML files and environment resolution
//!
//! Values are resolved in this order: YAML file (or defaults), `.env` files
//! listed under `environment.env_files`, `environment.variables`, then the
//! `LLM_*` process variables, which win over everything else.

use crate::config::types::*;
use crate::errors::ConfigError;
use std::env;
use std::path::Path;
use tokio::fs;

pub const ENV_BASE_URL: &str = "LLM_BASE_URL";
pub const ENV_MODEL: &str = "LLM_MODEL";
pub const ENV_API_KEY: &str = "LLM_API_KEY";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<QueuePilotConfig, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await.map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        log::debug!("Loaded config file {}", path.display());
        Self::from_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_str(content: &str) -> Result<QueuePilotConfig, ConfigError> {
        let config: QueuePilotConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::finish(config)
    }

    /// Defaults plus environment, for running without a config file
    pub fn from_env() -> Result<QueuePilotConfig, ConfigError> {
        Self::finish(QueuePilotConfig::default())
    }

    /// Uses `path` when it exists, otherwise falls back to `from_env`.
    pub async fn from_file_or_env<P: AsRef<Path>>(path: P) -> Result<QueuePilotConfig, ConfigError> {
        let path = path.as_ref();
        if fs::try_exists(path).await.unwrap_or(false) {
            Self::from_file(path).await
        } else {
            log::info!(
                "Config file {} not found, using defaults and environment",
                path.display()
            );
            Self::from_env()
        }
    }

    fn finish(mut config: QueuePilotConfig) -> Result<QueuePilotConfig, ConfigError> {
        Self::resolve_environment(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    fn resolve_environment(config: &mut QueuePilotConfig) -> Result<(), ConfigError> {
        for env_file in &config.environment.env_files {
            if env_file.exists() {
                Self::load_env_file(env_file)?;
            }
        }

        for (key, value) in &config.environment.variables {
            env::set_var(key, value);
        }

        Self::apply_llm_overrides(&mut config.llm);
        Ok(())
    }

    fn apply_llm_overrides(llm: &mut LlmSettings) {
        if let Some(base_url) = non_empty_var(ENV_BASE_URL) {
            llm.base_url = base_url;
        }
        if let Some(model) = non_empty_var(ENV_MODEL) {
            llm.model = model;
        }

        if let Some(env_var) = &llm.api_key_env {
            if let Some(api_key) = non_empty_var(env_var) {
                llm.api_key = Some(api_key);
            }
        }
        if let Some(api_key) = non_empty_var(ENV_API_KEY) {
            llm.api_key = Some(api_key);
        }
    }

    /// Loads `KEY=value` lines into the process environment. Variables that
    /// are already set are left alone.
    pub fn load_env_file<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().display().to_string(),
            message: e.to_string(),
        })?;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let line = line.strip_prefix("export ").unwrap_or(line);
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim().trim_matches('"').trim_matches('\'');
                if env::var_os(key).is_none() {
                    env::set_var(key, value);
                }
            }
        }

        Ok(())
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}
