//! Repeated and failed step detection.
//!
//! Both sets are derived from the transcript alone and are recomputed in full
//! after every mutation.

use runstream_types::Message;
use serde_json::Value;
use std::collections::BTreeSet;

/// Progress report parsed from a step-execution message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepInfo {
    pub index: Option<u64>,
    pub title: String,
    pub details: String,
    pub plan_length: Option<u64>,
}

impl StepInfo {
    /// Parse a step body. Bodies that are not a JSON object with at least one
    /// of `index`, `title`, `details` are plain content.
    pub fn parse(text: &str) -> Option<Self> {
        let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(text.trim()) else {
            return None;
        };
        if !["index", "title", "details"].iter().any(|k| obj.contains_key(*k)) {
            return None;
        }
        let text_of = |key: &str| {
            obj.get(key)
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                })
                .unwrap_or_default()
        };
        Some(Self {
            index: obj.get("index").and_then(Value::as_u64),
            title: text_of("title"),
            details: text_of("details"),
            plan_length: obj.get("plan_length").and_then(Value::as_u64),
        })
    }

    /// Structural identity: `(index, title, details)`.
    fn same_identity(&self, other: &StepInfo) -> bool {
        self.index == other.index && self.title == other.title && self.details == other.details
    }

    fn same_content(&self, other: &StepInfo) -> bool {
        self.title == other.title && self.details == other.details
    }
}

/// Step info of a step-execution message, if it has one.
pub fn step_info(message: &Message) -> Option<StepInfo> {
    if !message.is_step_execution() {
        return None;
    }
    StepInfo::parse(message.text()?)
}

/// Messages that end a run of repeated steps.
fn is_step_boundary(message: &Message) -> bool {
    message.is_plan() || message.is_final_answer()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub repeated: BTreeSet<usize>,
    pub failed: BTreeSet<usize>,
}

/// Recompute the repeated and failed sets for a transcript.
pub fn classify(messages: &[Message]) -> Classification {
    let infos: Vec<Option<StepInfo>> = messages.iter().map(step_info).collect();
    let mut out = Classification::default();

    for (i, info) in infos.iter().enumerate() {
        let Some(info) = info else { continue };
        if is_repeated(messages, &infos, i, info) {
            out.repeated.insert(i);
        }
        if is_failed(messages, i) {
            out.failed.insert(i);
        }
    }
    out
}

fn is_repeated(messages: &[Message], infos: &[Option<StepInfo>], i: usize, info: &StepInfo) -> bool {
    let latest = (0..i)
        .rev()
        .find(|&j| infos[j].as_ref().is_some_and(|prev| prev.same_identity(info)));
    match latest {
        Some(j) => !messages[j + 1..i].iter().any(is_step_boundary),
        None => false,
    }
}

fn is_failed(messages: &[Message], i: usize) -> bool {
    for later in &messages[i + 1..] {
        if later.is_replanning() {
            return true;
        }
        if later.is_step_execution() || is_step_boundary(later) {
            return false;
        }
    }
    false
}

/// A step whose `(title, details)` matches no earlier step-execution message.
pub fn is_novel_step(messages: &[Message], i: usize) -> bool {
    let Some(info) = messages.get(i).and_then(step_info) else {
        return false;
    };
    !messages[..i]
        .iter()
        .filter_map(step_info)
        .any(|prev| prev.same_content(&info))
}
