//! LLM provider implementations
//!
//! Local inference servers (llama.cpp, LM Studio, vLLM, Ollama) all expose the
//! OpenAI chat-completions protocol, so a single provider covers them.

use crate::config::LlmSettings;
use crate::errors::ConfigError;
use crate::llm::ChatModel;
use std::sync::Arc;

pub mod openai;

/// Create a chat model from the LLM settings
pub fn create_chat_model(settings: &LlmSettings) -> Result<Arc<dyn ChatModel>, ConfigError> {
    Ok(Arc::new(openai::LocalChatClient::new(settings.clone())?))
}
