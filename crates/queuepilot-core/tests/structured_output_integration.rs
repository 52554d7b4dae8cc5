use async_trait::async_trait;
use queuepilot_core::actions::ActionBatch;
use queuepilot_core::core_types::{Completion, Message};
use queuepilot_core::errors::InvocationError;
use queuepilot_core::llm::{ChatModel, ChatModelExt, OutputFormat, OutputShape};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Replays canned completions through the same normalize-then-validate path
/// a real provider uses.
struct ScriptedModel {
    completions: Arc<Mutex<Vec<String>>>,
}

impl ScriptedModel {
    fn new(completions: &[&str]) -> Self {
        let mut completions: Vec<String> = completions.iter().map(|c| c.to_string()).collect();
        completions.reverse();
        Self {
            completions: Arc::new(Mutex::new(completions)),
        }
    }

    fn next(&self) -> String {
        self.completions.lock().unwrap().pop().unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, _messages: Vec<Message>) -> Result<Completion<String>, InvocationError> {
        Ok(Completion {
            completion: self.next(),
            usage: None,
            stop_reason: Some("stop".to_string()),
        })
    }

    async fn invoke_format(
        &self,
        _messages: Vec<Message>,
        format: &OutputFormat,
    ) -> Result<Completion<Value>, InvocationError> {
        let raw = self.next();
        let normalized = format.normalize(&raw);
        let value = format
            .validate(&normalized)
            .map_err(|message| InvocationError::ParseFailed {
                model: self.name().to_string(),
                message,
                raw: raw.clone(),
                normalized: Some(normalized.clone()),
            })?;
        Ok(Completion {
            completion: value,
            usage: None,
            stop_reason: Some("stop".to_string()),
        })
    }
}

#[derive(Debug, Deserialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
struct SlotChoice {
    branch: String,
    date: String,
}

impl OutputShape for SlotChoice {
    const NAME: &'static str = "slot_choice";
}

#[tokio::test]
async fn test_action_batch_through_chat_model() {
    let model = ScriptedModel::new(&[
        "<output>{\"next_goal\": \"log in\", \"action\": [{\"click\": {\"index\": \"[12]\"}}, {\"wait\": {}}]}</output>",
    ]);

    let completion = model
        .invoke_structured::<ActionBatch>(vec![Message::user("log in")])
        .await
        .unwrap();
    let batch = completion.completion;
    assert_eq!(batch.action.len(), 1);
    assert_eq!(batch.first().and_then(|a| a.element_index()).map(|i| i.0), Some(12));
    assert_eq!(batch.next_goal.as_deref(), Some("log in"));
}

#[tokio::test]
async fn test_custom_shape_is_repaired_and_parsed() {
    let model = ScriptedModel::new(&[
        "Sure! {\"branch\": \"Pulogadung\", \"date\": \"2025-07-01\",} Hope that helps.",
    ]);

    let completion = model
        .invoke_structured::<SlotChoice>(vec![Message::user("pick a slot")])
        .await
        .unwrap();
    assert_eq!(
        completion.completion,
        SlotChoice {
            branch: "Pulogadung".to_string(),
            date: "2025-07-01".to_string(),
        }
    );
}

#[tokio::test]
async fn test_shape_mismatch_is_parse_failure() {
    let model = ScriptedModel::new(&["{\"branch\": \"Pulogadung\", \"time\": \"09:00\"}"]);

    let err = model
        .invoke_structured::<SlotChoice>(vec![Message::user("pick a slot")])
        .await
        .unwrap_err();
    assert!(matches!(err, InvocationError::ParseFailed { .. }));
    assert!(!err.is_retryable());
    assert_eq!(err.model(), "scripted");
}

#[tokio::test]
async fn test_models_are_usable_as_trait_objects() {
    let model: Arc<dyn ChatModel> = Arc::new(ScriptedModel::new(&["plain answer"]));
    let completion = model.invoke(vec![Message::user("hi")]).await.unwrap();
    assert_eq!(completion.completion, "plain answer");
}
