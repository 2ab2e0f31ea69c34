//! Plan types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One step of a plan in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub title: String,
    pub details: String,
    /// Disabled steps are skipped by the executor.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Agent the step is assigned to, empty when unassigned.
    #[serde(default)]
    pub agent_name: String,
    /// UI hint: whether the step is expanded in an editor.
    #[serde(default)]
    pub open: bool,
}

fn default_enabled() -> bool {
    true
}

impl PlanStep {
    pub fn new(title: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            details: details.into(),
            enabled: true,
            agent_name: String::new(),
            open: false,
        }
    }
}

/// A plan as carried in plan messages and start frames.
///
/// `steps` are kept raw here; the engine's normalizer folds them into
/// [`PlanStep`]s. Unknown keys are preserved in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default)]
    pub steps: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialog: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Plan payload attached to `settings_config.plan` when executing a saved plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedPlan {
    pub task: String,
    pub steps: Vec<PlanStep>,
    pub plan_summary: String,
}

impl SavedPlan {
    pub fn new(task: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        let task = task.into();
        let plan_summary = format!("Saved plan for task: {}", task);
        Self {
            task,
            steps,
            plan_summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plan_step_defaults() {
        let step: PlanStep =
            serde_json::from_value(json!({"title": "Search", "details": "find docs"})).unwrap();
        assert!(step.enabled);
        assert_eq!(step.agent_name, "");
        assert!(!step.open);
    }

    #[test]
    fn test_plan_preserves_extra_keys() {
        let plan: Plan = serde_json::from_value(json!({
            "task": "x",
            "steps": [],
            "needs_plan": true
        }))
        .unwrap();
        assert_eq!(plan.task.as_deref(), Some("x"));
        assert_eq!(plan.extra.get("needs_plan"), Some(&json!(true)));
    }

    #[test]
    fn test_saved_plan_summary() {
        let saved = SavedPlan::new("book a flight", vec![PlanStep::new("a", "b")]);
        assert_eq!(saved.plan_summary, "Saved plan for task: book a flight");
    }
}
