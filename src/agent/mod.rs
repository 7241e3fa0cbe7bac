//! Agent Core and its per-run state.

pub mod context;
pub mod core;
pub mod events;

pub use self::context::AgentContext;
pub use self::core::{AgentCore, AgentOutcome, tool_error_payload};
pub use self::events::{AgentEvent, AgentState, EventStream, RecordedEvent};
