//! Plan progress derived from the transcript.

use crate::classifier::step_info;
use runstream_types::{Message, Plan, RunStatus};

/// Step position within the current plan. Both fields are `None` before the
/// first step report and whenever the run is not in progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub current_step: Option<u64>,
    pub total_steps: Option<u64>,
}

/// Index of the last final answer with text content.
pub fn last_final_answer_index(messages: &[Message]) -> Option<usize> {
    messages.iter().rposition(Message::is_text_final_answer)
}

fn since_last_final_answer(messages: &[Message]) -> &[Message] {
    match last_final_answer_index(messages) {
        Some(i) => &messages[i + 1..],
        None => messages,
    }
}

/// The last plan message whose body parses as a plan.
pub fn current_plan(messages: &[Message]) -> Option<Plan> {
    messages
        .iter()
        .rev()
        .filter(|m| m.is_plan())
        .find_map(|m| serde_json::from_str::<Plan>(m.text()?).ok())
}

pub fn progress(messages: &[Message], status: &RunStatus) -> Progress {
    if !status.tracks_progress() {
        return Progress::default();
    }
    let mut out = Progress::default();
    for info in since_last_final_answer(messages).iter().filter_map(step_info) {
        if let Some(index) = info.index {
            out.current_step = Some(index);
            if let Some(len) = info.plan_length.filter(|&n| n > 0) {
                out.total_steps = Some(len);
            }
        }
    }
    out
}

/// A final answer exists and no plan followed it.
pub fn has_final_answer(messages: &[Message]) -> bool {
    match last_final_answer_index(messages) {
        Some(i) => !messages[i + 1..].iter().any(Message::is_plan),
        None => false,
    }
}

/// A plan is on screen and its execution has not started yet.
pub fn is_planning(messages: &[Message], status: &RunStatus) -> bool {
    if !status.tracks_progress() {
        return false;
    }
    let not_started = progress(messages, status).current_step.is_none();
    match last_final_answer_index(messages) {
        Some(i) => not_started && messages[i + 1..].iter().any(Message::is_plan),
        None => {
            let recent = &messages[messages.len().saturating_sub(3)..];
            not_started && recent.iter().any(Message::is_plan)
        }
    }
}

/// The user may edit the plan: input is awaited and the last message is a plan.
pub fn is_plan_editable(messages: &[Message], status: &RunStatus) -> bool {
    *status == RunStatus::AwaitingInput
        && messages
            .last()
            .and_then(Message::text)
            .is_some_and(crate::plan::is_plan_content)
}

/// Final answer body without its `Final Answer:` label.
pub fn final_answer_text(text: &str) -> &str {
    text.trim_start()
        .strip_prefix("Final Answer:")
        .unwrap_or(text)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::tests::{final_answer, msg, plan, step};
    use runstream_types::MessageKind;

    #[test]
    fn test_progress_tracks_latest_step() {
        let messages = vec![plan(), step(0, "a", "b"), step(1, "c", "d")];
        let p = progress(&messages, &RunStatus::Active);
        assert_eq!(p.current_step, Some(1));
        assert_eq!(p.total_steps, Some(3));
    }

    #[test]
    fn test_progress_resets_after_final_answer() {
        let messages = vec![step(0, "a", "b"), final_answer(), plan()];
        assert_eq!(progress(&messages, &RunStatus::Active), Progress::default());
    }

    #[test]
    fn test_progress_hidden_when_not_running() {
        let messages = vec![step(0, "a", "b")];
        assert_eq!(progress(&messages, &RunStatus::Complete), Progress::default());
        assert!(!is_planning(&[plan()], &RunStatus::Stopped));
    }

    #[test]
    fn test_has_final_answer() {
        assert!(has_final_answer(&[step(0, "a", "b"), final_answer()]));
        assert!(!has_final_answer(&[final_answer(), plan()]));
        assert!(!has_final_answer(&[step(0, "a", "b")]));
    }

    #[test]
    fn test_is_planning() {
        assert!(is_planning(&[msg(MessageKind::UserMessage, "go"), plan()], &RunStatus::AwaitingInput));
        assert!(!is_planning(&[plan(), step(0, "a", "b")], &RunStatus::Active));
        assert!(is_planning(&[final_answer(), plan()], &RunStatus::AwaitingInput));
        assert!(!is_planning(&[plan(), final_answer()], &RunStatus::AwaitingInput));
    }

    #[test]
    fn test_current_plan_uses_last_parseable() {
        let newer_broken = msg(MessageKind::PlanMessage, "not a plan");
        let older = msg(
            MessageKind::PlanMessage,
            r#"{"task":"t","steps":["step1: a - b"]}"#,
        );
        let messages = vec![older, newer_broken];
        let plan = current_plan(&messages).unwrap();
        assert_eq!(plan.task.as_deref(), Some("t"));
    }

    #[test]
    fn test_is_plan_editable() {
        assert!(is_plan_editable(&[plan()], &RunStatus::AwaitingInput));
        assert!(!is_plan_editable(&[plan()], &RunStatus::Active));
        assert!(!is_plan_editable(&[plan(), final_answer()], &RunStatus::AwaitingInput));
    }

    #[test]
    fn test_final_answer_text() {
        assert_eq!(final_answer_text("Final Answer: 42"), "42");
        assert_eq!(final_answer_text("  just text "), "just text");
    }
}
