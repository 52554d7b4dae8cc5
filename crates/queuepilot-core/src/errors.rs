//! Error types for the invocation, configuration and control-channel layers
//!
//! Invocation failures are folded into a small closed taxonomy so callers can
//! decide on backoff without knowing anything about the provider's HTTP API.
//! Each variant keeps the provider's original message text.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvocationError {
    #[error("Rate limited by provider for model '{model}': {message}")]
    RateLimited { model: String, message: String },
    #[error("Connection to provider failed for model '{model}': {message}")]
    ConnectionFailed { model: String, message: String },
    #[error("Provider returned status {status} for model '{model}': {message}")]
    ProviderStatus {
        model: String,
        status: u16,
        message: String,
    },
    #[error("Failed to parse output of model '{model}': {message}")]
    ParseFailed {
        model: String,
        message: String,
        raw: String,
        normalized: Option<String>,
    },
    #[error("Model '{model}' invocation failed: {message}")]
    Unknown { model: String, message: String },
}

impl InvocationError {
    pub fn model(&self) -> &str {
        match self {
            InvocationError::RateLimited { model, .. }
            | InvocationError::ConnectionFailed { model, .. }
            | InvocationError::ProviderStatus { model, .. }
            | InvocationError::ParseFailed { model, .. }
            | InvocationError::Unknown { model, .. } => model,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            InvocationError::RateLimited { message, .. }
            | InvocationError::ConnectionFailed { message, .. }
            | InvocationError::ProviderStatus { message, .. }
            | InvocationError::ParseFailed { message, .. }
            | InvocationError::Unknown { message, .. } => message,
        }
    }

    /// Provider status code, where one is known.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            InvocationError::RateLimited { .. } => Some(429),
            InvocationError::ProviderStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether repeating the identical request can reasonably succeed.
    ///
    /// Parse failures are never retryable: the same malformed text fails the
    /// same way.
    pub fn is_retryable(&self) -> bool {
        match self {
            InvocationError::RateLimited { .. } | InvocationError::ConnectionFailed { .. } => true,
            InvocationError::ProviderStatus { status, .. } => (500..600).contains(status),
            InvocationError::ParseFailed { .. } | InvocationError::Unknown { .. } => false,
        }
    }

    /// Local servers report an exhausted context window as a plain error
    /// message; this recognizes it so the caller can suggest a bigger context.
    pub fn is_context_overflow(&self) -> bool {
        let message = self.message().to_lowercase();
        message.contains("context") && message.contains("token")
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Read { path: String, message: String },
    #[error("Failed to parse YAML config: {0}")]
    Parse(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Control channel is already started")]
    AlreadyStarted,
    #[error("Control channel is not started")]
    NotStarted,
    #[error("Invalid connection request: {0}")]
    InvalidRequest(String),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Control channel closed")]
    Closed,
    #[error("Browser returned an error: {0}")]
    Protocol(String),
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ChannelError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ChannelError::WebSocket(err.to_string())
    }
}
