//! Memory systems
//!
//! Short-term memory is a bounded per-session window of conversation
//! turns; long-term memory is the append-only store of completed workflow
//! records with monthly archival.

pub mod long_term;
pub mod short_term;

pub use long_term::WorkflowMemory;
pub use short_term::{ConversationTurn, SessionStore, ShortTermMemory, TurnRole};
