//! Output shapes: the structural contract a structured completion must meet
//!
//! A shape is a Rust type that can be deserialized and described as JSON
//! schema. `OutputFormat` is its runtime form: the optimized schema sent to
//! the provider, the data fix-up the normalizer applies, and the strict
//! validator run on the normalized text.

use crate::llm::normalizer;
use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

pub trait OutputShape: DeserializeOwned + JsonSchema + Send + 'static {
    /// Name of the `json_schema` response format.
    const NAME: &'static str;

    /// Data-shape repair applied to a successfully parsed completion before
    /// strict validation.
    fn fix_up(value: &mut Value) {
        normalizer::fix_action_batch(value);
    }
}

/// Schema pruning switches. Some local servers choke on `minItems` or on
/// `default` values inside constrained-decoding grammars.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchemaOptions {
    pub remove_min_items: bool,
    pub remove_defaults: bool,
}

#[derive(Clone)]
pub struct OutputFormat {
    name: String,
    schema: Value,
    fix_up: fn(&mut Value),
    validate: fn(&str) -> Result<(), String>,
}

impl std::fmt::Debug for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputFormat")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish()
    }
}

impl OutputFormat {
    pub fn of<S: OutputShape>(options: SchemaOptions) -> Self {
        Self {
            name: S::NAME.to_string(),
            schema: optimized_schema::<S>(options),
            fix_up: S::fix_up,
            validate: validate_as::<S>,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// The `json_schema` object of an OpenAI `response_format`.
    pub fn json_schema(&self, strict: bool) -> Value {
        json!({
            "name": self.name,
            "strict": strict,
            "schema": self.schema,
        })
    }

    pub fn normalize(&self, raw: &str) -> String {
        normalizer::normalize_with(raw, self.fix_up)
    }

    /// Strictly parses `text` as the shape, returning the parsed JSON value.
    pub fn validate(&self, text: &str) -> Result<Value, String> {
        (self.validate)(text)?;
        serde_json::from_str(text).map_err(|e| e.to_string())
    }
}

fn validate_as<S: OutputShape>(text: &str) -> Result<(), String> {
    serde_json::from_str::<S>(text)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

/// Derives the JSON schema of `S` with every subschema inlined, then prunes
/// it according to `options`.
pub fn optimized_schema<S: JsonSchema>(options: SchemaOptions) -> Value {
    let settings = SchemaSettings::draft07().with(|s| {
        s.inline_subschemas = true;
    });
    let root = settings.into_generator().into_root_schema_for::<S>();
    let mut schema = serde_json::to_value(root).unwrap_or_else(|_| json!({"type": "object"}));

    if let Some(object) = schema.as_object_mut() {
        object.remove("$schema");
        if object
            .get("definitions")
            .and_then(Value::as_object)
            .is_some_and(Map::is_empty)
        {
            object.remove("definitions");
        }
    }

    prune(&mut schema, options);
    schema
}

fn prune(schema: &mut Value, options: SchemaOptions) {
    let Some(object) = schema.as_object_mut() else {
        return;
    };

    if options.remove_min_items {
        object.remove("minItems");
    }
    if options.remove_defaults {
        object.remove("default");
    }

    for keyword in ["properties", "definitions"] {
        if let Some(children) = object.get_mut(keyword).and_then(Value::as_object_mut) {
            for child in children.values_mut() {
                prune(child, options);
            }
        }
    }

    for keyword in ["oneOf", "anyOf", "allOf"] {
        if let Some(children) = object.get_mut(keyword).and_then(Value::as_array_mut) {
            for child in children.iter_mut() {
                prune(child, options);
            }
        }
    }

    for keyword in ["additionalProperties", "not"] {
        if let Some(child) = object.get_mut(keyword) {
            prune(child, options);
        }
    }

    match object.get_mut("items") {
        Some(Value::Array(children)) => {
            for child in children.iter_mut() {
                prune(child, options);
            }
        }
        Some(child) => prune(child, options),
        None => {}
    }
}
