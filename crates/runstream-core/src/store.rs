//! Transcript storage with streaming-fragment merge.

use chrono::Utc;
use runstream_types::{AgentMessage, Message, SessionId};

/// Which branch [`MessageStore::append`] took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A new message was pushed at `index`
    Appended { index: usize },
    /// The fragment was folded into the tail at `index`
    Merged { index: usize },
}

impl MergeOutcome {
    pub fn index(&self) -> usize {
        match self {
            MergeOutcome::Appended { index } | MergeOutcome::Merged { index } => *index,
        }
    }
}

/// Whether `incoming` continues the in-progress tail message.
///
/// The tail must be explicitly incomplete. The fragment then either shares
/// the tail's `(type, run_id)` stream key or is an empty completion marker.
pub fn should_merge_into_tail(last: &Message, incoming: &AgentMessage) -> bool {
    if last.metadata.is_complete != Some(false) {
        return false;
    }
    let same_stream = last.metadata.kind == incoming.metadata.kind
        && last.metadata.run_id == incoming.metadata.run_id;
    let completion_marker =
        incoming.metadata.is_complete == Some(true) && incoming.content.is_empty();
    same_stream || completion_marker
}

/// Ordered transcript of one run.
///
/// Messages are never removed or reordered; only the in-progress tail is
/// ever mutated.
#[derive(Debug, Clone)]
pub struct MessageStore {
    session_id: SessionId,
    run_id: String,
    messages: Vec<Message>,
    next_id: u64,
}

impl MessageStore {
    pub fn new(session_id: SessionId, run_id: impl Into<String>) -> Self {
        Self {
            session_id,
            run_id: run_id.into(),
            messages: Vec::new(),
            next_id: 1,
        }
    }

    /// Load a persisted transcript. New ids continue after the highest one.
    pub fn restore(session_id: SessionId, run_id: impl Into<String>, messages: Vec<Message>) -> Self {
        let next_id = messages.iter().map(|m| m.id).max().unwrap_or(0) + 1;
        Self {
            session_id,
            run_id: run_id.into(),
            messages,
            next_id,
        }
    }

    pub fn append(&mut self, incoming: AgentMessage) -> MergeOutcome {
        if let Some(last) = self.messages.last_mut() {
            if should_merge_into_tail(last, &incoming) {
                last.content.append(incoming.content);
                last.metadata.absorb(incoming.metadata);
                last.updated_at = Utc::now();
                let index = self.messages.len() - 1;
                tracing::trace!(target: "runstream::store", index, "Merged fragment into tail");
                return MergeOutcome::Merged { index };
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        self.messages
            .push(Message::from_agent(id, self.session_id, &self.run_id, incoming));
        let index = self.messages.len() - 1;
        tracing::trace!(target: "runstream::store", index, id, "Appended message");
        MergeOutcome::Appended { index }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runstream_types::{MessageContent, MessageKind, MessageMetadata, MessageSource};
    use serde_json::json;

    fn fragment(kind: MessageKind, content: &str, complete: Option<bool>, run: &str) -> AgentMessage {
        AgentMessage::new(
            MessageSource::Agent("Orchestrator".to_string()),
            content,
            MessageMetadata {
                kind: Some(kind),
                is_complete: complete,
                run_id: Some(run.to_string()),
                ..Default::default()
            },
        )
    }

    // ==================== Merge ====================

    #[test]
    fn test_thinking_fragments_merge() {
        let mut store = MessageStore::new(1, "run");
        let a = store.append(fragment(MessageKind::Thinking, "Let me ", Some(false), "r1"));
        let b = store.append(fragment(MessageKind::Thinking, "think", Some(false), "r1"));
        assert_eq!(a, MergeOutcome::Appended { index: 0 });
        assert_eq!(b, MergeOutcome::Merged { index: 0 });
        assert_eq!(store.len(), 1);
        assert_eq!(store.messages()[0].text(), Some("Let me think"));
    }

    #[test]
    fn test_different_run_id_does_not_merge() {
        let mut store = MessageStore::new(1, "run");
        store.append(fragment(MessageKind::Thinking, "a", Some(false), "r1"));
        let out = store.append(fragment(MessageKind::Thinking, "b", Some(false), "r2"));
        assert_eq!(out, MergeOutcome::Appended { index: 1 });
    }

    #[test]
    fn test_different_type_does_not_merge() {
        let mut store = MessageStore::new(1, "run");
        store.append(fragment(MessageKind::Thinking, "a", Some(false), "r1"));
        let out = store.append(fragment(MessageKind::Response, "b", Some(false), "r1"));
        assert_eq!(out, MergeOutcome::Appended { index: 1 });
    }

    #[test]
    fn test_complete_tail_does_not_merge() {
        let mut store = MessageStore::new(1, "run");
        store.append(fragment(MessageKind::Thinking, "a", Some(true), "r1"));
        store.append(fragment(MessageKind::Thinking, "b", Some(false), "r1"));
        assert_eq!(store.len(), 2);

        let mut store = MessageStore::new(1, "run");
        store.append(fragment(MessageKind::Thinking, "a", None, "r1"));
        store.append(fragment(MessageKind::Thinking, "b", None, "r1"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_completion_marker_closes_tail() {
        let mut store = MessageStore::new(1, "run");
        store.append(fragment(MessageKind::Response, "The answer", Some(false), "r1"));
        let mut marker = fragment(MessageKind::Response, "", Some(true), "other");
        marker.metadata.kind = None;
        marker
            .metadata
            .extra
            .insert("usage".to_string(), json!({"tokens": 3}));

        assert_eq!(store.append(marker), MergeOutcome::Merged { index: 0 });
        let tail = store.last().unwrap();
        assert_eq!(tail.text(), Some("The answer"));
        assert_eq!(tail.metadata.is_complete, Some(true));
        assert_eq!(tail.metadata.kind, Some(MessageKind::Response));
        assert_eq!(tail.metadata.run_id.as_deref(), Some("r1"));
        assert_eq!(tail.metadata.extra["usage"], json!({"tokens": 3}));

        // Tail is now complete, so the next fragment starts a new message
        let out = store.append(fragment(MessageKind::Response, "more", Some(false), "r1"));
        assert_eq!(out, MergeOutcome::Appended { index: 1 });
    }

    #[test]
    fn test_completion_marker_after_complete_tail_appends() {
        let mut store = MessageStore::new(1, "run");
        store.append(fragment(MessageKind::Response, "done", Some(true), "r1"));
        let out = store.append(fragment(MessageKind::Response, "", Some(true), "r1"));
        assert_eq!(out, MergeOutcome::Appended { index: 1 });
    }

    #[test]
    fn test_merge_mixed_content() {
        let mut store = MessageStore::new(1, "run");
        store.append(fragment(MessageKind::Response, "see: ", Some(false), "r1"));
        let mut blocks = fragment(MessageKind::Response, "", Some(false), "r1");
        blocks.content = MessageContent::Blocks(vec![json!({"url": "a.png"})]);
        store.append(blocks);
        assert_eq!(
            store.last().unwrap().content,
            MessageContent::Blocks(vec![json!("see: "), json!({"url": "a.png"})])
        );
    }

    // ==================== Identity ====================

    #[test]
    fn test_ids_and_ownership() {
        let mut store = MessageStore::new(7, "session_7_1_abc");
        store.append(AgentMessage::user_message("hi"));
        store.append(AgentMessage::user_message("again"));
        let ids: Vec<u64> = store.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(store.messages().iter().all(|m| m.session_id == 7));
        assert!(store.messages().iter().all(|m| m.run_id == "session_7_1_abc"));
    }

    #[test]
    fn test_restore_continues_ids() {
        let mut original = MessageStore::new(1, "run");
        original.append(AgentMessage::user_message("a"));
        original.append(AgentMessage::user_message("b"));

        let mut restored = MessageStore::restore(1, "run", original.messages().to_vec());
        let out = restored.append(AgentMessage::user_message("c"));
        assert_eq!(out, MergeOutcome::Appended { index: 2 });
        assert_eq!(restored.last().unwrap().id, 3);
    }
}
