//! Language model client abstractions.
//!
//! Defines the chat-model trait the browsing agent calls each turn, the
//! completion normalizer that repairs local-model output, the output-shape
//! machinery, and the OpenAI-compatible provider implementation.

pub use crate::core_types::{Completion, Message, Role, Usage};
use crate::errors::InvocationError;
use async_trait::async_trait;
use serde_json::Value;

pub mod normalizer;
pub mod providers;
pub mod shape;

pub use normalizer::normalize;
pub use providers::openai::LocalChatClient;
pub use shape::{OutputFormat, OutputShape, SchemaOptions};

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Name reported in errors and logs.
    fn name(&self) -> &str;

    /// Schema pruning switches this model wants applied to output shapes.
    fn schema_options(&self) -> SchemaOptions {
        SchemaOptions::default()
    }

    /// Free-text completion.
    async fn invoke(&self, messages: Vec<Message>) -> Result<Completion<String>, InvocationError>;

    /// Completion constrained to `format`; the returned value has passed the
    /// format's strict validator.
    async fn invoke_format(
        &self,
        messages: Vec<Message>,
        format: &OutputFormat,
    ) -> Result<Completion<Value>, InvocationError>;
}

#[async_trait]
pub trait ChatModelExt: ChatModel {
    /// Completion parsed into the shape `S`.
    async fn invoke_structured<S: OutputShape>(
        &self,
        messages: Vec<Message>,
    ) -> Result<Completion<S>, InvocationError> {
        let format = OutputFormat::of::<S>(self.schema_options());
        let completion = self.invoke_format(messages, &format).await?;
        let parsed = serde_json::from_value::<S>(completion.completion.clone()).map_err(|e| {
            InvocationError::ParseFailed {
                model: self.name().to_string(),
                message: e.to_string(),
                raw: completion.completion.to_string(),
                normalized: None,
            }
        })?;
        Ok(completion.map(|_| parsed))
    }
}

impl<T: ChatModel + ?Sized> ChatModelExt for T {}
