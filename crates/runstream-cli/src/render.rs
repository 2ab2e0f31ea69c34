//! Line-oriented transcript renderer.
//!
//! Streaming fragments are held back until they complete or another message
//! arrives, so each message is printed once. Collapsed steps are still
//! printed; visibility only matters to interactive views.

use runstream_core::plan::plan_from_content;
use runstream_core::progress::final_answer_text;
use runstream_core::{normalize_steps, RunEvent, SidePanel, StepInfo};
use runstream_types::{InputRequest, Message, ReportedStatus};
use std::io::{self, Write};

pub struct Renderer<W: Write> {
    out: W,
    /// Incomplete streaming message awaiting more fragments
    pending: Option<(usize, Message)>,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W) -> Self {
        Self { out, pending: None }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn render(&mut self, event: &RunEvent) -> io::Result<()> {
        match event {
            RunEvent::Appended { index, message } | RunEvent::Merged { index, message } => {
                self.on_message(*index, message)
            }
            RunEvent::StatusChanged(status) => {
                self.flush()?;
                self.status(status)
            }
            RunEvent::InputRequested(request) => {
                self.flush()?;
                match request {
                    InputRequest::TextInput => {
                        writeln!(self.out, "? input requested (type a reply, /approve or /deny)")
                    }
                    InputRequest::Approval { prompt } => writeln!(
                        self.out,
                        "? approval requested: {} (/approve or /deny)",
                        prompt.as_deref().unwrap_or("continue?")
                    ),
                }
            }
            RunEvent::PanelChanged(panel) => self.panel(panel),
            RunEvent::LocalError(error) => writeln!(self.out, "! {}", error),
            RunEvent::SocketClosed => {
                self.flush()?;
                writeln!(self.out, "-- disconnected")
            }
            RunEvent::VisibilityChanged { .. } => Ok(()),
        }
    }

    /// Print a held-back streaming message, if any.
    pub fn flush(&mut self) -> io::Result<()> {
        match self.pending.take() {
            Some((_, message)) => self.message(&message),
            None => Ok(()),
        }
    }

    fn on_message(&mut self, index: usize, message: &Message) -> io::Result<()> {
        if self.pending.as_ref().is_some_and(|(i, _)| *i != index) {
            self.flush()?;
        }
        let streaming = message.kind().is_some_and(|k| k.is_streaming());
        if streaming && message.is_complete() == Some(false) {
            self.pending = Some((index, message.clone()));
            return Ok(());
        }
        self.pending = None;
        self.message(message)
    }

    fn message(&mut self, message: &Message) -> io::Result<()> {
        let source = message.source.as_str();
        let body = message.content.to_display_string();

        if message.source.is_user() {
            return writeln!(self.out, "> {}", body.trim_end());
        }
        if message.is_plan() {
            return self.plan(source, message);
        }
        if message.is_step_execution() {
            if let Some(step) = StepInfo::parse(&body) {
                let position = match (step.index, step.plan_length) {
                    (Some(i), Some(n)) => format!(" {}/{}", i + 1, n),
                    (Some(i), None) => format!(" {}", i + 1),
                    _ => String::new(),
                };
                return writeln!(self.out, "[{}] step{}: {}", source, position, step.title);
            }
        }
        if message.is_final_answer() {
            return writeln!(self.out, "[{}] final answer: {}", source, final_answer_text(&body));
        }
        writeln!(self.out, "[{}] {}", source, body.trim_end())
    }

    fn plan(&mut self, source: &str, message: &Message) -> io::Result<()> {
        let Some(plan) = plan_from_content(&message.content) else {
            return writeln!(self.out, "[{}] {}", source, message.content.to_display_string());
        };
        writeln!(
            self.out,
            "[{}] plan: {}",
            source,
            plan.task.as_deref().unwrap_or("(untitled)")
        )?;
        for (i, step) in normalize_steps(&plan.steps).iter().enumerate() {
            let marker = if step.enabled { ' ' } else { 'x' };
            writeln!(self.out, "  {}{}. {}", marker, i + 1, step.title)?;
        }
        Ok(())
    }

    fn status(&mut self, status: &ReportedStatus) -> io::Result<()> {
        match status {
            ReportedStatus::FinalAnswerAwaitingInput => {
                writeln!(self.out, "-- final answer ready, awaiting input")
            }
            ReportedStatus::Stored(status) => writeln!(self.out, "-- status: {}", status),
        }
    }

    fn panel(&mut self, panel: &SidePanel) -> io::Result<()> {
        if let Some(port) = &panel.browser_port {
            writeln!(self.out, "-- browser view on port {}", port)?;
        }
        if panel.has_code {
            writeln!(self.out, "-- code available")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runstream_types::{
        AgentMessage, MessageContent, MessageKind, MessageMetadata, MessageSource, RunStatus,
    };

    fn message(kind: MessageKind, text: &str, complete: Option<bool>) -> Message {
        let mut metadata = MessageMetadata::of_kind(kind);
        metadata.is_complete = complete;
        metadata.run_id = Some("r1".to_string());
        Message::from_agent(
            0,
            1,
            "r1",
            AgentMessage::new(
                MessageSource::Assistant,
                MessageContent::Text(text.to_string()),
                metadata,
            ),
        )
    }

    fn rendered(events: &[RunEvent]) -> String {
        let mut renderer = Renderer::new(Vec::new());
        for event in events {
            renderer.render(event).unwrap();
        }
        renderer.flush().unwrap();
        String::from_utf8(renderer.into_inner()).unwrap()
    }

    #[test]
    fn test_streaming_printed_once_when_complete() {
        let out = rendered(&[
            RunEvent::Appended {
                index: 0,
                message: message(MessageKind::Thinking, "Let me", Some(false)),
            },
            RunEvent::Merged {
                index: 0,
                message: message(MessageKind::Thinking, "Let me think.", Some(true)),
            },
        ]);
        assert_eq!(out, "[assistant] Let me think.\n");
    }

    #[test]
    fn test_pending_flushed_by_next_message() {
        let out = rendered(&[
            RunEvent::Appended {
                index: 0,
                message: message(MessageKind::Thinking, "partial", Some(false)),
            },
            RunEvent::Appended {
                index: 1,
                message: message(MessageKind::Response, "Answer", None),
            },
        ]);
        assert_eq!(out, "[assistant] partial\n[assistant] Answer\n");
    }

    #[test]
    fn test_plan_and_steps() {
        let plan = r#"{"task":"Find a recipe","steps":["Search: look it up",{"title":"Summarize","details":"","enabled":false}]}"#;
        let step = r#"{"index":0,"title":"Search","details":"look it up","plan_length":2}"#;
        let out = rendered(&[
            RunEvent::Appended {
                index: 0,
                message: message(MessageKind::PlanMessage, plan, None),
            },
            RunEvent::Appended {
                index: 1,
                message: message(MessageKind::StepExecution, step, None),
            },
        ]);
        assert_eq!(
            out,
            "[assistant] plan: Find a recipe\n   1. Search\n  x2. Summarize\n[assistant] step 1/2: Search\n"
        );
    }

    #[test]
    fn test_user_side_messages_quoted() {
        let mut proxy = message(MessageKind::UserInput, "approve", None);
        proxy.source = MessageSource::UserProxy;
        let out = rendered(&[
            RunEvent::Appended {
                index: 0,
                message: Message::from_agent(0, 1, "r1", AgentMessage::user_message("find a recipe")),
            },
            RunEvent::Appended { index: 1, message: proxy },
        ]);
        assert_eq!(out, "> find a recipe\n> approve\n");
    }

    #[test]
    fn test_final_answer_label_stripped() {
        let out = rendered(&[RunEvent::Appended {
            index: 3,
            message: message(MessageKind::FinalAnswer, "Final Answer: Pancakes.", None),
        }]);
        assert_eq!(out, "[assistant] final answer: Pancakes.\n");
    }

    #[test]
    fn test_status_lines() {
        let out = rendered(&[
            RunEvent::StatusChanged(ReportedStatus::Stored(RunStatus::Active)),
            RunEvent::StatusChanged(ReportedStatus::FinalAnswerAwaitingInput),
            RunEvent::LocalError("WebSocket not available".to_string()),
            RunEvent::SocketClosed,
        ]);
        assert_eq!(
            out,
            "-- status: active\n-- final answer ready, awaiting input\n! WebSocket not available\n-- disconnected\n"
        );
    }
}
