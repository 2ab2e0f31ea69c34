//! WebSocket frame protocol between the client and the run endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AgentMessage, RunStatus, SessionId, TeamConfig};

/// Frames received from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// A transcript message or streaming fragment
    Message {
        #[serde(default)]
        data: Option<AgentMessage>,
    },
    /// Status change, adopted verbatim
    System { status: RunStatus },
    /// Backend failure; terminal
    Error {
        #[serde(default)]
        error: Option<String>,
    },
    InputRequest {
        #[serde(default)]
        input_type: Option<String>,
        #[serde(default)]
        prompt: Option<String>,
    },
    Completion {
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        data: Value,
    },
    Result {
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        data: Value,
    },
    /// Heartbeat reply
    Pong,
    /// Any frame type this client does not handle
    #[serde(other)]
    Unknown,
}

impl InboundFrame {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn is_pong(&self) -> bool {
        matches!(self, InboundFrame::Pong)
    }
}

/// Frames sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Start {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Task text, or a JSON-encoded [`TaskPayload`]
        task: String,
        #[serde(default)]
        files: Vec<Value>,
        team_config: TeamConfig,
        settings_config: Value,
        #[serde(
            rename = "sessionId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        session_id: Option<SessionId>,
    },
    /// `response` is a JSON-encoded [`InputResponsePayload`]
    InputResponse { response: String },
    Stop { reason: String },
    Pause,
    Ping,
}

impl OutboundFrame {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundFrame::Start { .. } => "start",
            OutboundFrame::InputResponse { .. } => "input_response",
            OutboundFrame::Stop { .. } => "stop",
            OutboundFrame::Pause => "pause",
            OutboundFrame::Ping => "ping",
        }
    }
}

/// Body of a start frame's `task` string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub content: String,
    /// Plan steps as a JSON array string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
}

/// Body of an `input_response` frame's `response` string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputResponsePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted: Option<bool>,
    pub content: String,
    /// Plan steps as a JSON array string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
}
