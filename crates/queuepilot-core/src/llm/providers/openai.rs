use crate::config::LlmSettings;
use crate::core_types::{Completion, Message, Role, Usage};
use crate::errors::{ConfigError, InvocationError};
use crate::llm::{ChatModel, OutputFormat, SchemaOptions};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};

/// Chat client for an OpenAI-compatible local inference server.
///
/// Each call is a single attempt: every failure is translated into one
/// `InvocationError` kind and returned, and retrying is left to the caller.
#[derive(Debug, Clone)]
pub struct LocalChatClient {
    client: Client,
    settings: LlmSettings,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ResponseUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: Option<u32>,
}

impl From<ResponseUsage> for Usage {
    fn from(usage: ResponseUsage) -> Self {
        Usage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            prompt_cached_tokens: usage.prompt_tokens_details.and_then(|d| d.cached_tokens),
        }
    }
}

/// Content, usage and finish reason of the first choice.
struct FirstChoice {
    content: Option<String>,
    usage: Option<Usage>,
    stop_reason: Option<String>,
}

impl LocalChatClient {
    pub fn new(settings: LlmSettings) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| ConfigError::Invalid(format!("Failed to build HTTP client: {}", e)))?;
        let api_base = settings.base_url.trim_end_matches('/').to_string();

        Ok(Self {
            client,
            settings,
            api_base,
        })
    }

    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    /// Sampling parameters to send. Unset parameters are left out entirely;
    /// reasoning models get `reasoning_effort` instead of temperature and
    /// frequency penalty.
    pub fn model_params(&self) -> Map<String, Value> {
        let settings = &self.settings;
        let mut params = Map::new();

        if let Some(temperature) = settings.temperature {
            params.insert("temperature".to_string(), temperature.into());
        }
        if let Some(frequency_penalty) = settings.frequency_penalty {
            params.insert("frequency_penalty".to_string(), frequency_penalty.into());
        }
        if let Some(max_completion_tokens) = settings.max_completion_tokens {
            params.insert("max_completion_tokens".to_string(), max_completion_tokens.into());
        }
        if let Some(top_p) = settings.top_p {
            params.insert("top_p".to_string(), top_p.into());
        }
        if let Some(seed) = settings.seed {
            params.insert("seed".to_string(), seed.into());
        }
        if let Some(service_tier) = &settings.service_tier {
            params.insert("service_tier".to_string(), service_tier.clone().into());
        }

        if settings.is_reasoning_model() {
            params.insert(
                "reasoning_effort".to_string(),
                settings.reasoning_effort.clone().into(),
            );
            params.remove("temperature");
            params.remove("frequency_penalty");
        }

        params
    }

    fn format_messages(&self, messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| {
                json!({
                    "role": format_role(msg.role),
                    "content": msg.content,
                })
            })
            .collect()
    }

    fn build_request_body(&self, messages: &[Message], response_format: Option<Value>) -> Value {
        let mut body = Map::new();
        body.insert("model".to_string(), self.settings.model.clone().into());
        body.insert(
            "messages".to_string(),
            Value::Array(self.format_messages(messages)),
        );
        if let Some(response_format) = response_format {
            body.insert("response_format".to_string(), response_format);
        }
        body.extend(self.model_params());
        Value::Object(body)
    }

    async fn send(&self, body: Value) -> Result<FirstChoice, InvocationError> {
        let url = format!("{}/chat/completions", self.api_base);
        log::debug!("Chat completion request to {} (model {})", url, self.settings.model);

        let mut request = self.client.post(&url).json(&body);
        if let Some(api_key) = &self.settings.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let response_text = response.text().await.map_err(|e| self.transport_error(e))?;

        log::debug!("Chat completion response ({}): {}", status, response_text);

        if !status.is_success() {
            return Err(self.status_error(status.as_u16(), &response_text));
        }

        let response: ChatResponse =
            serde_json::from_str(&response_text).map_err(|e| InvocationError::Unknown {
                model: self.settings.model.clone(),
                message: format!("Invalid chat completion response: {}", e),
            })?;

        let usage = response.usage.map(Usage::from);
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| InvocationError::Unknown {
                model: self.settings.model.clone(),
                message: "No choices in response".to_string(),
            })?;

        Ok(FirstChoice {
            content: choice.message.content,
            usage,
            stop_reason: choice.finish_reason,
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> InvocationError {
        let model = self.settings.model.clone();
        let message = err.to_string();
        if err.is_connect() || err.is_timeout() || err.is_request() || err.is_body() {
            InvocationError::ConnectionFailed { model, message }
        } else {
            InvocationError::Unknown { model, message }
        }
    }

    fn status_error(&self, status: u16, body: &str) -> InvocationError {
        let model = self.settings.model.clone();
        let message = provider_message(body).unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("HTTP {}", status)
            } else {
                body.to_string()
            }
        });

        if status == 429 {
            InvocationError::RateLimited { model, message }
        } else {
            InvocationError::ProviderStatus {
                model,
                status,
                message,
            }
        }
    }
}

fn format_role(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

/// The human-readable message of an OpenAI-style error body.
fn provider_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error = value.get("error").unwrap_or(&value);
    match error {
        Value::String(message) => Some(message.clone()),
        Value::Object(object) => object
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// Appends the schema as a visible block to a leading system message. Models
/// that ignore `response_format` still see what shape is expected.
fn append_schema_block(messages: &mut [Message], format: &OutputFormat) {
    if let Some(first) = messages.first_mut() {
        if first.role == Role::System {
            let schema = serde_json::to_string_pretty(&format.json_schema(true))
                .unwrap_or_else(|_| format.json_schema(true).to_string());
            first.content.push_str(&format!("\n<json_schema>\n{}\n</json_schema>", schema));
        }
    }
}

#[async_trait]
impl ChatModel for LocalChatClient {
    fn name(&self) -> &str {
        &self.settings.model
    }

    fn schema_options(&self) -> SchemaOptions {
        self.settings.schema_options()
    }

    async fn invoke(&self, messages: Vec<Message>) -> Result<Completion<String>, InvocationError> {
        let body = self.build_request_body(&messages, None);
        let choice = self.send(body).await?;

        Ok(Completion {
            completion: choice.content.unwrap_or_default(),
            usage: choice.usage,
            stop_reason: choice.stop_reason,
        })
    }

    async fn invoke_format(
        &self,
        mut messages: Vec<Message>,
        format: &OutputFormat,
    ) -> Result<Completion<Value>, InvocationError> {
        if self.settings.add_schema_to_system_prompt {
            append_schema_block(&mut messages, format);
        }

        let response_format = if self.settings.dont_force_structured_output {
            None
        } else {
            Some(json!({
                "type": "json_schema",
                "json_schema": format.json_schema(true),
            }))
        };

        let body = self.build_request_body(&messages, response_format);
        let choice = self.send(body).await?;

        let raw = match choice.content {
            Some(content) if !content.trim().is_empty() => content,
            _ => {
                return Err(InvocationError::ParseFailed {
                    model: self.settings.model.clone(),
                    message: "Failed to parse structured output from model response: no content"
                        .to_string(),
                    raw: String::new(),
                    normalized: None,
                })
            }
        };

        let normalized = format.normalize(&raw);
        match format.validate(&normalized) {
            Ok(value) => Ok(Completion {
                completion: value,
                usage: choice.usage,
                stop_reason: choice.stop_reason,
            }),
            Err(message) => {
                log::warn!(
                    "Completion from {} does not match '{}': {}",
                    self.settings.model,
                    format.name(),
                    message
                );
                Err(InvocationError::ParseFailed {
                    model: self.settings.model.clone(),
                    message,
                    raw,
                    normalized: Some(normalized),
                })
            }
        }
    }
}
