//! Side-panel state derived from message content: generated code and the
//! live browser port.

use once_cell::sync::Lazy;
use regex::Regex;
use runstream_types::{Message, MessageKind};

static FENCED_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:[A-Za-z0-9_+\-]+)?\n?([\s\S]*?)```").unwrap());

/// What the client shows next to the transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SidePanel {
    pub has_code: bool,
    /// Latest extracted code
    pub code: Option<String>,
    /// noVNC port of the agent's browser
    pub browser_port: Option<String>,
}

fn looks_like_code(text: &str) -> bool {
    text.contains("def ") || text.contains("import ")
}

/// Code to show for a message body: a fenced block's body wins over the raw
/// heuristic.
pub fn extract_code(text: &str) -> Option<String> {
    if let Some(caps) = FENCED_CODE.captures(text) {
        return caps.get(1).map(|m| m.as_str().trim().to_string());
    }
    looks_like_code(text).then(|| text.to_string())
}

impl SidePanel {
    /// Update panel state from one message. Returns true if anything changed.
    ///
    /// Inspecting the same message twice is a no-op.
    pub fn inspect(&mut self, message: &Message) -> bool {
        let mut changed = false;

        if message.kind() == Some(&MessageKind::BrowserAddress) {
            if let Some(port) = message.metadata.novnc_port.as_deref().filter(|p| !p.is_empty()) {
                if self.browser_port.as_deref() != Some(port) {
                    tracing::debug!(target: "runstream::store", port, "Browser port updated");
                    self.browser_port = Some(port.to_string());
                    changed = true;
                }
            }
        }

        let text = message.text();
        let is_code_kind = message.kind().is_some_and(MessageKind::is_code);
        let is_code_text = text.is_some_and(|t| FENCED_CODE.is_match(t) || looks_like_code(t));
        if is_code_kind || is_code_text {
            if !self.has_code {
                self.has_code = true;
                changed = true;
            }
            if let Some(code) = text.and_then(extract_code).filter(|c| !c.is_empty()) {
                if self.code.as_deref() != Some(code.as_str()) {
                    tracing::debug!(target: "runstream::store", len = code.len(), "Code updated");
                    self.code = Some(code);
                    changed = true;
                }
            }
        }

        changed
    }

    /// Rebuild panel state from a whole transcript.
    pub fn replay<'a>(messages: impl IntoIterator<Item = &'a Message>) -> Self {
        let mut panel = Self::default();
        for message in messages {
            panel.inspect(message);
        }
        panel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::tests::msg;

    #[test]
    fn test_fenced_block_wins() {
        let text = "Here you go:\n```python\nimport os\nprint(os.getcwd())\n```\nDone";
        assert_eq!(
            extract_code(text).as_deref(),
            Some("import os\nprint(os.getcwd())")
        );
    }

    #[test]
    fn test_fenced_block_any_language() {
        assert_eq!(
            extract_code("```rust\nfn main() {}\n```").as_deref(),
            Some("fn main() {}")
        );
    }

    #[test]
    fn test_raw_heuristic() {
        let text = "def add(a, b):\n    return a + b";
        assert_eq!(extract_code(text).as_deref(), Some(text));
        assert!(extract_code("no code here").is_none());
    }

    #[test]
    fn test_inspect_code_kind_without_text_code() {
        let mut panel = SidePanel::default();
        assert!(panel.inspect(&msg(MessageKind::Codes, "running script")));
        assert!(panel.has_code);
        assert!(panel.code.is_none());
    }

    #[test]
    fn test_inspect_is_idempotent() {
        let mut panel = SidePanel::default();
        let message = msg(MessageKind::Response, "```\nx = 1\n```");
        assert!(panel.inspect(&message));
        assert!(!panel.inspect(&message));
        assert_eq!(panel.code.as_deref(), Some("x = 1"));
    }

    #[test]
    fn test_browser_port() {
        let mut panel = SidePanel::default();
        let mut message = msg(MessageKind::BrowserAddress, "browser ready");
        message.metadata.novnc_port = Some("6080".to_string());
        assert!(panel.inspect(&message));
        assert_eq!(panel.browser_port.as_deref(), Some("6080"));

        let mut empty = msg(MessageKind::BrowserAddress, "");
        empty.metadata.novnc_port = Some(String::new());
        assert!(!panel.inspect(&empty));
        assert_eq!(panel.browser_port.as_deref(), Some("6080"));
    }

    #[test]
    fn test_replay() {
        let messages = vec![
            msg(MessageKind::Response, "import json"),
            msg(MessageKind::Response, "```\nprint(1)\n```"),
        ];
        let panel = SidePanel::replay(&messages);
        assert!(panel.has_code);
        assert_eq!(panel.code.as_deref(), Some("print(1)"));
    }
}
