//! Recovery of well-formed action payloads from raw local-model completions
//!
//! Local models asked for a single JSON action routinely wrap it in XML-ish
//! tags, surround it with prose, leave trailing commas, quote element indexes
//! as `"[285]<a /> Log In"` or emit several actions at once. The normalizer
//! undoes exactly those failure modes and nothing else. It never fails: when
//! the text cannot be repaired it is passed on so the strict parser reports
//! the error.

use crate::actions::Action;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Tag names a model may wrap its whole answer in.
pub const WRAPPER_TAGS: [&str; 5] = ["output", "action", "response", "json", "result"];

const LOG_PREVIEW_CHARS: usize = 200;

fn wrapper_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let names = WRAPPER_TAGS.join("|");
        Regex::new(&format!(
            r"(?s)^<({names})>\s*(.*?)\s*</({names})>$",
            names = names
        ))
        .expect("wrapper pattern is valid")
    })
}

fn trailing_comma_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s*([}\]])").expect("trailing comma pattern is valid"))
}

fn digit_run_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[0-9]+").expect("digit pattern is valid"))
}

/// Normalizes a completion expected to hold an action batch.
pub fn normalize(raw: &str) -> String {
    normalize_with(raw, fix_action_batch)
}

/// Normalizes a completion, applying `fix_up` to any value that parses.
pub fn normalize_with(raw: &str, fix_up: fn(&mut Value)) -> String {
    let trimmed = raw.trim();
    let unwrapped = strip_wrapper(trimmed);
    let candidate = slice_object(unwrapped);

    let normalized = parse_and_fix(candidate, fix_up)
        .or_else(|| parse_and_fix(&remove_trailing_commas(candidate), fix_up))
        .unwrap_or_else(|| candidate.to_string());

    if normalized != raw {
        log::debug!(
            "Cleaned LLM response:\n  BEFORE: {}\n  AFTER:  {}",
            preview(raw),
            preview(&normalized)
        );
    }
    normalized
}

/// Strips one allow-listed `<tag>...</tag>` pair spanning the whole text.
pub fn strip_wrapper(text: &str) -> &str {
    match wrapper_regex().captures(text) {
        Some(caps) if caps[1] == caps[3] => caps.get(2).map_or(text, |m| m.as_str().trim()),
        _ => text,
    }
}

/// Slices from the first `{` to the last `}` when both exist in order.
///
/// Sibling objects or braces inside string literals end up in the slice too;
/// the strict parse afterwards is what rejects those.
pub fn slice_object(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(first), Some(last)) if first < last => &text[first..=last],
        _ => text,
    }
}

/// Removes commas that directly precede a closing brace or bracket.
pub fn remove_trailing_commas(text: &str) -> String {
    trailing_comma_regex().replace_all(text, "$1").into_owned()
}

fn parse_and_fix(text: &str, fix_up: fn(&mut Value)) -> Option<String> {
    let mut value: Value = serde_json::from_str(text).ok()?;
    fix_up(&mut value);
    serde_json::to_string(&value).ok()
}

/// Data-shape fix-up for action batches: integer indexes, one action per turn.
///
/// Only `action` and, inside it, the index field each action type declares
/// through `Indexed` are touched. Reapplying it to already fixed data is a
/// no-op.
pub fn fix_action_batch(value: &mut Value) {
    let Some(actions) = value.get_mut("action").and_then(Value::as_array_mut) else {
        return;
    };

    for action in actions.iter_mut() {
        let Some(entries) = action.as_object_mut() else {
            continue;
        };
        for (name, params) in entries.iter_mut() {
            let Some(field) = Action::index_field(name) else {
                continue;
            };
            if let Some(index) = params.as_object_mut().and_then(|p| p.get_mut(field)) {
                coerce_index(index);
            }
        }
    }

    actions.truncate(1);
}

/// Replaces a textual index with the first run of decimal digits in it.
/// Text without digits, or whose digits overflow, is left for the strict
/// parser to reject.
pub fn coerce_index(index: &mut Value) {
    let Value::String(text) = &*index else {
        return;
    };
    let parsed = digit_run_regex()
        .find(text)
        .and_then(|m| m.as_str().parse::<u64>().ok());
    if let Some(number) = parsed {
        *index = Value::from(number);
    }
}

fn preview(text: &str) -> String {
    text.chars().take(LOG_PREVIEW_CHARS).collect()
}
