//! Message and completion types shared between the caller and the LLM client
//!
//! Messages follow the OpenAI chat format since local inference servers
//! (llama.cpp, LM Studio, vLLM) all speak that dialect.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// Usage statistics structure
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_cached_tokens: Option<u32>,
}

/// Result of one invocation: either free text or a value already validated
/// against the requested output shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion<T> {
    pub completion: T,
    pub usage: Option<Usage>,
    pub stop_reason: Option<String>,
}

impl<T> Completion<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Completion<U> {
        Completion {
            completion: f(self.completion),
            usage: self.usage,
            stop_reason: self.stop_reason,
        }
    }
}
