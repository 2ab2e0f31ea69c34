//! Transcript message types.
//!
//! A [`Message`] is one entry in a run's transcript. The wire payload carried
//! by `message` frames is an [`AgentMessage`]; the store turns it into a
//! `Message` by assigning an identity and timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Chat session identifier as used by the backend.
pub type SessionId = i64;

/// Who produced a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageSource {
    /// The human at the keyboard
    User,
    /// An agent speaking on behalf of the user
    UserProxy,
    /// Generic assistant output
    #[default]
    Assistant,
    /// A named agent (e.g. "Orchestrator", "WebSurfer")
    Agent(String),
}

impl MessageSource {
    pub fn as_str(&self) -> &str {
        match self {
            MessageSource::User => "user",
            MessageSource::UserProxy => "user_proxy",
            MessageSource::Assistant => "assistant",
            MessageSource::Agent(name) => name,
        }
    }

    /// Both the user and the user proxy count as user-side messages.
    pub fn is_user(&self) -> bool {
        matches!(self, MessageSource::User | MessageSource::UserProxy)
    }
}

impl From<String> for MessageSource {
    fn from(s: String) -> Self {
        match s.as_str() {
            "user" => MessageSource::User,
            "user_proxy" => MessageSource::UserProxy,
            "assistant" => MessageSource::Assistant,
            _ => MessageSource::Agent(s),
        }
    }
}

impl From<MessageSource> for String {
    fn from(source: MessageSource) -> Self {
        match source {
            MessageSource::Agent(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

/// The `metadata.type` discriminator of a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    Thinking,
    Response,
    PlanMessage,
    StepExecution,
    SubstepExecution,
    FinalAnswer,
    Replanning,
    BrowserAddress,
    BrowserScreenshot,
    Codes,
    Code,
    UserMessage,
    UserInput,
    AgentError,
    File,
    /// Any type this client has no special handling for
    Other(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Thinking => "thinking",
            MessageKind::Response => "response",
            MessageKind::PlanMessage => "plan_message",
            MessageKind::StepExecution => "step_execution",
            MessageKind::SubstepExecution => "substep_execution",
            MessageKind::FinalAnswer => "final_answer",
            MessageKind::Replanning => "replanning",
            MessageKind::BrowserAddress => "browser_address",
            MessageKind::BrowserScreenshot => "browser_screenshot",
            MessageKind::Codes => "codes",
            MessageKind::Code => "code",
            MessageKind::UserMessage => "user_message",
            MessageKind::UserInput => "user_input",
            MessageKind::AgentError => "agent_error",
            MessageKind::File => "file",
            MessageKind::Other(s) => s,
        }
    }

    /// Streaming fragment types that are merged into an incomplete tail.
    pub fn is_streaming(&self) -> bool {
        matches!(self, MessageKind::Thinking | MessageKind::Response)
    }

    pub fn is_plan(&self) -> bool {
        matches!(self, MessageKind::PlanMessage)
    }

    pub fn is_step_execution(&self) -> bool {
        matches!(
            self,
            MessageKind::StepExecution | MessageKind::SubstepExecution
        )
    }

    pub fn is_final_answer(&self) -> bool {
        matches!(self, MessageKind::FinalAnswer)
    }

    pub fn is_replanning(&self) -> bool {
        matches!(self, MessageKind::Replanning)
    }

    pub fn is_code(&self) -> bool {
        matches!(self, MessageKind::Codes | MessageKind::Code)
    }
}

impl From<String> for MessageKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "thinking" => MessageKind::Thinking,
            "response" => MessageKind::Response,
            "plan_message" => MessageKind::PlanMessage,
            "step_execution" => MessageKind::StepExecution,
            "substep_execution" => MessageKind::SubstepExecution,
            "final_answer" => MessageKind::FinalAnswer,
            "replanning" => MessageKind::Replanning,
            "browser_address" => MessageKind::BrowserAddress,
            "browser_screenshot" => MessageKind::BrowserScreenshot,
            "codes" => MessageKind::Codes,
            "code" => MessageKind::Code,
            "user_message" => MessageKind::UserMessage,
            "user_input" => MessageKind::UserInput,
            "agent_error" => MessageKind::AgentError,
            "file" => MessageKind::File,
            _ => MessageKind::Other(s),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

/// Message metadata. Known keys are typed, everything else is kept verbatim
/// in `extra` so it survives a merge and a re-serialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_complete: Option<bool>,
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub novnc_port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessageMetadata {
    pub fn of_kind(kind: MessageKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    /// Fold a continuation fragment's metadata into this (tail) metadata.
    ///
    /// The tail keeps its `type` and `run_id` when it has them; every other
    /// key present on `other` wins.
    pub fn absorb(&mut self, other: MessageMetadata) {
        if self.kind.is_none() {
            self.kind = other.kind;
        }
        if self.run_id.is_none() {
            self.run_id = other.run_id;
        }
        if other.is_complete.is_some() {
            self.is_complete = other.is_complete;
        }
        if other.agent_type.is_some() {
            self.agent_type = other.agent_type;
        }
        if other.novnc_port.is_some() {
            self.novnc_port = other.novnc_port;
        }
        if other.content_type.is_some() {
            self.content_type = other.content_type;
        }
        self.extra.extend(other.extra);
    }

    fn kind_matches(&self, pred: impl Fn(&MessageKind) -> bool) -> bool {
        self.kind.as_ref().is_some_and(pred)
    }
}

/// Ports and run ids show up as either strings or numbers on the wire.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Message body: plain text or a list of structured blocks (images, tool
/// calls, function results).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<Value>),
}

impl<'de> Deserialize<'de> for MessageContent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(deserializer).map(MessageContent::from)
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

impl From<Value> for MessageContent {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => MessageContent::Text(s),
            Value::Array(blocks) => MessageContent::Blocks(blocks),
            Value::Null => MessageContent::default(),
            other => MessageContent::Text(other.to_string()),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

impl MessageContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(s) => Some(s),
            MessageContent::Blocks(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(s) => s.is_empty(),
            MessageContent::Blocks(b) => b.is_empty(),
        }
    }

    /// Concatenate a continuation fragment onto this content.
    ///
    /// Text + text concatenates. As soon as either side carries blocks the
    /// result is a block list, with text becoming string blocks.
    pub fn append(&mut self, other: MessageContent) {
        if other.is_empty() {
            return;
        }
        match (&mut *self, other) {
            (MessageContent::Text(head), MessageContent::Text(tail)) => head.push_str(&tail),
            (MessageContent::Blocks(head), MessageContent::Blocks(tail)) => head.extend(tail),
            (MessageContent::Blocks(head), MessageContent::Text(tail)) => {
                head.push(Value::String(tail))
            }
            (MessageContent::Text(head), MessageContent::Blocks(tail)) => {
                let mut blocks = Vec::with_capacity(tail.len() + 1);
                if !head.is_empty() {
                    blocks.push(Value::String(std::mem::take(head)));
                }
                blocks.extend(tail);
                *self = MessageContent::Blocks(blocks);
            }
        }
    }

    /// Text rendition: text as-is, string blocks joined by newlines.
    pub fn to_display_string(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| b.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// The `data` payload of an inbound `message` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    #[serde(default)]
    pub source: MessageSource,
    #[serde(default)]
    pub content: MessageContent,
    #[serde(default)]
    pub metadata: MessageMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

impl AgentMessage {
    pub fn new(
        source: MessageSource,
        content: impl Into<MessageContent>,
        metadata: MessageMetadata,
    ) -> Self {
        Self {
            source,
            content: content.into(),
            metadata,
            version: None,
        }
    }

    /// A message typed by the local user.
    pub fn user_message(text: impl Into<String>) -> Self {
        Self::new(
            MessageSource::User,
            MessageContent::Text(text.into()),
            MessageMetadata::of_kind(MessageKind::UserMessage),
        )
    }
}

/// A transcript entry owned by exactly one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned identity, unique within the run
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub session_id: SessionId,
    pub run_id: String,
    pub source: MessageSource,
    pub content: MessageContent,
    pub metadata: MessageMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

impl Message {
    pub fn from_agent(id: u64, session_id: SessionId, run_id: &str, agent: AgentMessage) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            session_id,
            run_id: run_id.to_string(),
            source: agent.source,
            content: agent.content,
            metadata: agent.metadata,
            version: agent.version,
        }
    }

    pub fn kind(&self) -> Option<&MessageKind> {
        self.metadata.kind.as_ref()
    }

    pub fn text(&self) -> Option<&str> {
        self.content.as_text()
    }

    pub fn is_complete(&self) -> Option<bool> {
        self.metadata.is_complete
    }

    pub fn is_plan(&self) -> bool {
        self.metadata.kind_matches(MessageKind::is_plan)
    }

    pub fn is_step_execution(&self) -> bool {
        self.metadata.kind_matches(MessageKind::is_step_execution)
    }

    pub fn is_final_answer(&self) -> bool {
        self.metadata.kind_matches(MessageKind::is_final_answer)
    }

    pub fn is_replanning(&self) -> bool {
        self.metadata.kind_matches(MessageKind::is_replanning)
    }

    /// Final answer carrying text content, the form that ends a planning cycle.
    pub fn is_text_final_answer(&self) -> bool {
        self.is_final_answer() && self.text().is_some()
    }
}
