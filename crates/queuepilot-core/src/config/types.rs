//! Configuration type definitions
//!
//! Every section is optional in YAML; a missing file section falls back to
//! defaults tuned for a local OpenAI-compatible server and a locally launched
//! Chromium. Sampling parameters are `Option` because an unset parameter must
//! be left out of the request entirely rather than sent as zero.

use crate::errors::ConfigError;
use crate::llm::SchemaOptions;
use crate::transport::{ConnectParams, KeepalivePolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueuePilotConfig {
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub environment: EnvironmentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_tier: Option<String>,

    #[serde(default = "default_reasoning_effort")]
    pub reasoning_effort: String,
    /// Substrings identifying reasoning models, matched case-insensitively
    /// against `model`.
    #[serde(default = "default_reasoning_models")]
    pub reasoning_models: Vec<String>,

    #[serde(default)]
    pub remove_min_items_from_schema: bool,
    #[serde(default)]
    pub remove_defaults_from_schema: bool,
    #[serde(default = "default_true")]
    pub add_schema_to_system_prompt: bool,
    /// Skip provider-side `response_format` enforcement and rely on the
    /// normalizer plus client-side validation. Most local servers implement
    /// structured output inconsistently, hence the default.
    #[serde(default = "default_true")]
    pub dont_force_structured_output: bool,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            api_key: None,
            api_key_env: None,
            temperature: None,
            frequency_penalty: None,
            max_completion_tokens: None,
            top_p: None,
            seed: None,
            service_tier: None,
            reasoning_effort: default_reasoning_effort(),
            reasoning_models: default_reasoning_models(),
            remove_min_items_from_schema: false,
            remove_defaults_from_schema: false,
            add_schema_to_system_prompt: true,
            dont_force_structured_output: true,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl LlmSettings {
    pub fn is_reasoning_model(&self) -> bool {
        let model = self.model.to_lowercase();
        self.reasoning_models
            .iter()
            .any(|name| model.contains(&name.to_lowercase()))
    }

    pub fn schema_options(&self) -> SchemaOptions {
        SchemaOptions {
            remove_min_items: self.remove_min_items_from_schema,
            remove_defaults: self.remove_defaults_from_schema,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Browser control-channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: Option<usize>,
    #[serde(default)]
    pub additional_headers: HashMap<String, String>,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_keepalive_timeout_secs")]
    pub ping_timeout_secs: u64,
    #[serde(default = "default_keepalive_timeout_secs")]
    pub close_timeout_secs: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ws_url: None,
            max_frame_size: default_max_frame_size(),
            additional_headers: HashMap::new(),
            ping_interval_secs: default_ping_interval_secs(),
            ping_timeout_secs: default_keepalive_timeout_secs(),
            close_timeout_secs: default_keepalive_timeout_secs(),
        }
    }
}

impl ChannelConfig {
    pub fn keepalive(&self) -> KeepalivePolicy {
        KeepalivePolicy {
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            ping_timeout: Duration::from_secs(self.ping_timeout_secs),
            close_timeout: Duration::from_secs(self.close_timeout_secs),
        }
    }

    /// Connection parameters for `url`, or for the configured `ws_url`.
    pub fn connect_params(&self, url: Option<&str>) -> Option<ConnectParams> {
        let url = url.or(self.ws_url.as_deref())?;
        Some(ConnectParams {
            url: url.to_string(),
            max_frame_size: self.max_frame_size,
            additional_headers: self.additional_headers.clone(),
            keepalive: self.keepalive(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default = "default_env_files")]
    pub env_files: Vec<PathBuf>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            env_files: default_env_files(),
            variables: HashMap::new(),
        }
    }
}

impl QueuePilotConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let llm = &self.llm;
        if llm.model.trim().is_empty() {
            return Err(ConfigError::Invalid("llm.model must not be empty".to_string()));
        }
        if llm.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("llm.base_url must not be empty".to_string()));
        }
        if let Some(temperature) = llm.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ConfigError::Invalid(format!(
                    "llm.temperature must be between 0.0 and 2.0, got {}",
                    temperature
                )));
            }
        }
        if let Some(top_p) = llm.top_p {
            if !(0.0..=1.0).contains(&top_p) {
                return Err(ConfigError::Invalid(format!(
                    "llm.top_p must be between 0.0 and 1.0, got {}",
                    top_p
                )));
            }
        }
        if llm.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "llm.request_timeout_secs must be greater than zero".to_string(),
            ));
        }

        let channel = &self.channel;
        if channel.ping_interval_secs == 0
            || channel.ping_timeout_secs == 0
            || channel.close_timeout_secs == 0
        {
            return Err(ConfigError::Invalid(
                "channel keepalive durations must be greater than zero".to_string(),
            ));
        }
        if let Some(url) = &channel.ws_url {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(ConfigError::Invalid(format!(
                    "channel.ws_url must be a ws:// or wss:// URL, got {}",
                    url
                )));
            }
        }

        Ok(())
    }
}

fn default_model() -> String {
    "local-model".to_string()
}

fn default_base_url() -> String {
    "http://localhost:8080/v1".to_string()
}

fn default_reasoning_effort() -> String {
    "low".to_string()
}

fn default_reasoning_models() -> Vec<String> {
    ["o4-mini", "o3", "o3-mini", "o1", "o1-pro", "o3-pro", "gpt-5"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_max_frame_size() -> Option<usize> {
    Some(100 * 1024 * 1024)
}

fn default_ping_interval_secs() -> u64 {
    20
}

fn default_keepalive_timeout_secs() -> u64 {
    120
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_env_files() -> Vec<PathBuf> {
    vec![PathBuf::from(".env")]
}
