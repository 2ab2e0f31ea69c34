//! Plan extraction and step normalization.
//!
//! Plans reach the client as JSON objects embedded in message text, and
//! their steps come in several wire shapes. Everything here is pure: shapes
//! are sniffed exactly once in [`normalize_steps`] and code downstream only
//! sees canonical [`PlanStep`]s.

use runstream_types::{MessageContent, Plan, PlanStep};
use serde_json::{Map, Value};

/// Keys that mark a JSON object as a plan.
const PLAN_KEYS: [&str; 3] = ["task", "steps", "plan_summary"];

/// Result of scanning text for an embedded plan.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlanExtraction {
    pub plan: Option<Plan>,
    /// Text after the plan object, trimmed. The whole input when no plan
    /// was found.
    pub remaining: String,
}

fn is_plan_object(obj: &Map<String, Value>) -> bool {
    PLAN_KEYS.iter().any(|k| obj.contains_key(*k))
}

/// True if the whole text is a JSON object carrying a plan key.
pub fn is_plan_content(text: &str) -> bool {
    matches!(
        serde_json::from_str::<Value>(text),
        Ok(Value::Object(ref obj)) if is_plan_object(obj)
    )
}

/// Byte range of the first balanced `{...}` in `text`.
///
/// Braces inside JSON strings are counted like any other.
fn first_balanced_object(text: &str) -> Option<(usize, usize)> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, start + offset + 1));
                }
            }
            _ => {}
        }
    }
    None
}

/// Find the first balanced JSON object in `text` and return it as a plan if
/// it is plan-shaped, along with whatever follows it.
pub fn extract_plan_and_remainder(text: &str) -> PlanExtraction {
    let not_found = || PlanExtraction {
        plan: None,
        remaining: text.to_string(),
    };

    let Some((start, end)) = first_balanced_object(text) else {
        return not_found();
    };

    let value = match serde_json::from_str::<Value>(&text[start..end]) {
        Ok(Value::Object(obj)) if is_plan_object(&obj) => Value::Object(obj),
        Ok(_) => return not_found(),
        Err(e) => {
            tracing::debug!(target: "runstream::plan", "Embedded object is not JSON: {}", e);
            return not_found();
        }
    };

    match serde_json::from_value::<Plan>(value) {
        Ok(plan) => PlanExtraction {
            plan: Some(plan),
            remaining: text[end..].trim().to_string(),
        },
        Err(e) => {
            tracing::debug!(target: "runstream::plan", "Plan-shaped object rejected: {}", e);
            not_found()
        }
    }
}

/// The plan carried by a message body, if its text is or embeds a plan.
pub fn plan_from_content(content: &MessageContent) -> Option<Plan> {
    let text = content.as_text()?;
    extract_plan_and_remainder(text).plan
}

/// A step as found on the wire, classified once.
#[derive(Debug)]
enum RawStep<'a> {
    /// `"step1: title - details"`
    Line(&'a str),
    /// `{ "title": "details" }`
    Pair(&'a str, &'a Value),
    /// `{ title, details, enabled?, agent_name?, open? }`
    Full(&'a Map<String, Value>),
    /// Anything else; kept as JSON text so the step count holds
    Opaque(&'a Value),
}

impl<'a> RawStep<'a> {
    fn sniff(value: &'a Value) -> Self {
        match value {
            Value::String(s) => RawStep::Line(s),
            Value::Object(obj) if obj.contains_key("title") || obj.contains_key("details") => {
                RawStep::Full(obj)
            }
            Value::Object(obj) => match obj.iter().next() {
                Some((key, val)) => RawStep::Pair(key, val),
                None => RawStep::Opaque(value),
            },
            other => RawStep::Opaque(other),
        }
    }

    fn into_step(self) -> PlanStep {
        match self {
            RawStep::Line(line) => match line.split_once(':') {
                Some((head, rest)) => PlanStep::new(head.trim(), rest.trim()),
                None => PlanStep::new("", line),
            },
            RawStep::Pair(title, details) => PlanStep::new(title, value_text(details)),
            RawStep::Full(obj) => PlanStep {
                title: obj.get("title").map(value_text).unwrap_or_default(),
                details: obj.get("details").map(value_text).unwrap_or_default(),
                enabled: !matches!(obj.get("enabled"), Some(Value::Bool(false))),
                agent_name: obj
                    .get("agent_name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                open: matches!(obj.get("open"), Some(Value::Bool(true))),
            },
            RawStep::Opaque(value) => PlanStep::new("", value.to_string()),
        }
    }
}

/// Strings as-is, anything else as its JSON text.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Fold raw wire steps into canonical steps, one output per input.
pub fn normalize_steps(raw: &[Value]) -> Vec<PlanStep> {
    raw.iter()
        .map(|value| RawStep::sniff(value).into_step())
        .collect()
}

/// Wire encoding of a plan's steps: a JSON array of canonical steps.
pub fn plan_steps_to_json_string(steps: &[PlanStep]) -> serde_json::Result<String> {
    serde_json::to_string(steps)
}

/// Decode a plan string (a JSON array of steps in any shape).
pub fn parse_plan_steps(text: &str) -> Option<Vec<PlanStep>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(raw)) => Some(normalize_steps(&raw)),
        _ => None,
    }
}

/// Steps carried in the `plan` string of a user message body.
///
/// Empty when the body is not JSON or has no plan.
pub fn find_user_plan(content: &str) -> Vec<PlanStep> {
    let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(content) else {
        return Vec::new();
    };
    obj.get("plan")
        .and_then(Value::as_str)
        .and_then(parse_plan_steps)
        .unwrap_or_default()
}

/// Rewrite the `steps` of a JSON plan body.
///
/// `None` when the content is not a JSON object.
pub fn update_plan(content: &str, steps: &[PlanStep]) -> Option<String> {
    let mut obj = match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(obj)) => obj,
        Ok(_) => return None,
        Err(e) => {
            tracing::warn!(target: "runstream::plan", "Failed to update plan: {}", e);
            return None;
        }
    };
    let steps = serde_json::to_value(steps).ok()?;
    obj.insert("steps".to_string(), steps);
    serde_json::to_string(&obj).ok()
}
