//! Shared wire and data-model types for the run message-stream engine.

mod message;
mod plan;
mod run;
mod ws;

pub use message::*;
pub use plan::*;
pub use run::*;
pub use ws::*;
