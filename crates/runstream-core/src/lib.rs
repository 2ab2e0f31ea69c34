//! Run message-stream engine.
//!
//! Ingests the socket event stream of one conversation run, builds the
//! transcript, classifies and collapses plan steps, and drives the run
//! lifecycle. User actions flow back out as [`runstream_types::OutboundFrame`]s.

pub mod classifier;
pub mod connection;
pub mod content;
mod error;
pub mod plan;
pub mod progress;
pub mod run;
pub mod store;
pub mod visibility;

pub use classifier::{classify, is_novel_step, Classification, StepInfo};
pub use connection::{
    mint_run_id, Command, ConnectionConfig, ControllerHandle, ReadyState, RunEvent,
    SessionController, SocketConnection, SocketProvider,
};
pub use content::SidePanel;
pub use error::EngineError;
pub use plan::{
    extract_plan_and_remainder, find_user_plan, is_plan_content, normalize_steps,
    parse_plan_steps, plan_steps_to_json_string, update_plan, PlanExtraction,
};
pub use progress::Progress;
pub use run::{Run, RunEffect};
pub use store::{should_merge_into_tail, MergeOutcome, MessageStore};
pub use visibility::{Trigger, Visibility};

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
