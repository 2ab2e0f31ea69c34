//! Interpretation of lines typed at the prompt.

use runstream_core::Command;
use std::io::BufRead;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Plain text: a reply while input is requested, otherwise a new task
    Text(String),
    Approve,
    Deny,
    Cancel,
    Pause,
    Reconnect,
    Quit,
    Unknown(String),
}

impl Input {
    /// `None` for blank lines.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(word) = line.strip_prefix('/') else {
            return Some(Input::Text(line.to_string()));
        };
        Some(match word {
            "approve" | "yes" => Input::Approve,
            "deny" | "no" => Input::Deny,
            "cancel" | "stop" => Input::Cancel,
            "pause" => Input::Pause,
            "reconnect" => Input::Reconnect,
            "quit" | "exit" => Input::Quit,
            other => Input::Unknown(other.to_string()),
        })
    }

    /// The controller command for this input. `Quit` and unknown words have none.
    pub fn into_command(self) -> Option<Command> {
        match self {
            Input::Text(query) => Some(Command::Submit {
                query,
                files: Vec::new(),
                accepted: true,
                plan: None,
            }),
            Input::Approve => Some(Command::Approve),
            Input::Deny => Some(Command::Deny),
            Input::Cancel => Some(Command::Cancel),
            Input::Pause => Some(Command::Pause),
            Input::Reconnect => Some(Command::Reconnect),
            Input::Quit | Input::Unknown(_) => None,
        }
    }
}

/// Read stdin on a dedicated thread so a pending read never holds up
/// runtime shutdown. The channel closes at end of input.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_and_blank() {
        assert_eq!(Input::parse("   "), None);
        assert_eq!(
            Input::parse("  find a recipe \n"),
            Some(Input::Text("find a recipe".to_string()))
        );
    }

    #[test]
    fn test_parse_controls() {
        assert_eq!(Input::parse("/approve"), Some(Input::Approve));
        assert_eq!(Input::parse("/no"), Some(Input::Deny));
        assert_eq!(Input::parse("/stop"), Some(Input::Cancel));
        assert_eq!(Input::parse("/exit"), Some(Input::Quit));
        assert_eq!(Input::parse("/dance"), Some(Input::Unknown("dance".to_string())));
    }

    #[test]
    fn test_text_becomes_accepted_submit() {
        let command = Input::Text("go on".to_string()).into_command();
        assert!(matches!(
            command,
            Some(Command::Submit { ref query, accepted: true, plan: None, .. }) if query == "go on"
        ));
        assert!(Input::Quit.into_command().is_none());
    }
}
