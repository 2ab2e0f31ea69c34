//! Run lifecycle types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Stored status of a run.
///
/// Statuses reported by the backend that this client has no name for are
/// kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunStatus {
    /// Run exists locally, socket not yet opened.
    Created,
    Idle,
    /// Socket is open, start frame not yet acknowledged.
    Connected,
    Active,
    AwaitingInput,
    Pausing,
    Paused,
    Stopped,
    Complete,
    Error,
    Other(String),
}

impl RunStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Created => "created",
            RunStatus::Idle => "idle",
            RunStatus::Connected => "connected",
            RunStatus::Active => "active",
            RunStatus::AwaitingInput => "awaiting_input",
            RunStatus::Pausing => "pausing",
            RunStatus::Paused => "paused",
            RunStatus::Stopped => "stopped",
            RunStatus::Complete => "complete",
            RunStatus::Error => "error",
            RunStatus::Other(s) => s,
        }
    }

    /// Socket handshake in progress; user control frames are not sent.
    pub fn is_connecting(&self) -> bool {
        matches!(self, RunStatus::Created | RunStatus::Connected)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Stopped | RunStatus::Complete | RunStatus::Error
        )
    }

    /// Statuses in which plan progress is tracked.
    pub fn tracks_progress(&self) -> bool {
        matches!(
            self,
            RunStatus::Active | RunStatus::AwaitingInput | RunStatus::Paused | RunStatus::Pausing
        )
    }

    /// Map a `result`/`completion` frame status onto a terminal status.
    pub fn from_completion(status: &str) -> Self {
        match status {
            "complete" => RunStatus::Complete,
            "error" => RunStatus::Error,
            _ => RunStatus::Stopped,
        }
    }
}

impl From<String> for RunStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "created" => RunStatus::Created,
            "idle" => RunStatus::Idle,
            "connected" => RunStatus::Connected,
            "active" => RunStatus::Active,
            "awaiting_input" => RunStatus::AwaitingInput,
            "pausing" => RunStatus::Pausing,
            "paused" => RunStatus::Paused,
            "stopped" => RunStatus::Stopped,
            "complete" => RunStatus::Complete,
            "error" => RunStatus::Error,
            _ => RunStatus::Other(s),
        }
    }
}

impl From<&str> for RunStatus {
    fn from(s: &str) -> Self {
        RunStatus::from(s.to_string())
    }
}

impl From<RunStatus> for String {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status as shown to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum ReportedStatus {
    Stored(RunStatus),
    /// Awaiting input right after a final answer. Never stored.
    FinalAnswerAwaitingInput,
}

impl ReportedStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ReportedStatus::Stored(status) => status.as_str(),
            ReportedStatus::FinalAnswerAwaitingInput => "final_answer_awaiting_input",
        }
    }
}

impl From<ReportedStatus> for String {
    fn from(status: ReportedStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for ReportedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the backend is waiting on from the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "input_type", rename_all = "snake_case")]
pub enum InputRequest {
    TextInput,
    Approval {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
    },
}

impl InputRequest {
    /// Build from the loose fields of an `input_request` frame. Anything but
    /// `approval` is a text input request.
    pub fn from_frame(input_type: Option<&str>, prompt: Option<String>) -> Self {
        match input_type {
            Some("approval") => InputRequest::Approval { prompt },
            _ => InputRequest::TextInput,
        }
    }
}

/// Team definition forwarded in start frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamConfig {
    #[serde(default = "default_team_name")]
    pub name: String,
    #[serde(default = "default_team_type")]
    pub team_type: String,
    #[serde(default = "default_component_type")]
    pub component_type: String,
    #[serde(default)]
    pub participants: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_team_name() -> String {
    "Default Team".to_string()
}

fn default_team_type() -> String {
    "RoundRobinGroupChat".to_string()
}

fn default_component_type() -> String {
    "team".to_string()
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            name: default_team_name(),
            team_type: default_team_type(),
            component_type: default_component_type(),
            participants: Vec::new(),
            extra: Map::new(),
        }
    }
}

/// Summary attached to a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamResult {
    pub task_result: Value,
    pub usage: Value,
    pub duration: f64,
}

impl TeamResult {
    /// Accept `data` only when it has the full team-result shape.
    pub fn from_value(data: &Value) -> Option<Self> {
        let obj = data.as_object()?;
        if !["task_result", "usage", "duration"]
            .iter()
            .all(|k| obj.contains_key(*k))
        {
            return None;
        }
        serde_json::from_value(data.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_round_trip() {
        let status: RunStatus = serde_json::from_value(json!("awaiting_input")).unwrap();
        assert_eq!(status, RunStatus::AwaitingInput);
        let other: RunStatus = serde_json::from_value(json!("warming_up")).unwrap();
        assert_eq!(other, RunStatus::Other("warming_up".to_string()));
        assert_eq!(serde_json::to_value(&other).unwrap(), json!("warming_up"));
    }

    #[test]
    fn test_completion_mapping() {
        assert_eq!(RunStatus::from_completion("complete"), RunStatus::Complete);
        assert_eq!(RunStatus::from_completion("error"), RunStatus::Error);
        assert_eq!(RunStatus::from_completion("cancelled"), RunStatus::Stopped);
    }

    #[test]
    fn test_reported_status_string() {
        let reported = ReportedStatus::FinalAnswerAwaitingInput;
        assert_eq!(
            serde_json::to_value(&reported).unwrap(),
            json!("final_answer_awaiting_input")
        );
        assert_eq!(ReportedStatus::Stored(RunStatus::Active).as_str(), "active");
    }

    #[test]
    fn test_input_request_from_frame() {
        assert_eq!(InputRequest::from_frame(None, None), InputRequest::TextInput);
        assert_eq!(
            InputRequest::from_frame(Some("approval"), Some("Proceed?".to_string())),
            InputRequest::Approval {
                prompt: Some("Proceed?".to_string())
            }
        );
    }

    #[test]
    fn test_team_result_requires_shape() {
        let full = json!({"task_result": {"messages": []}, "usage": "", "duration": 1.5});
        assert!(TeamResult::from_value(&full).is_some());
        assert!(TeamResult::from_value(&json!({"task_result": {}})).is_none());
        assert!(TeamResult::from_value(&json!("done")).is_none());
    }

    #[test]
    fn test_team_config_defaults() {
        let config: TeamConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, TeamConfig::default());
        assert_eq!(config.team_type, "RoundRobinGroupChat");
    }
}
