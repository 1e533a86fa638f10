//! Presail Context Engine
//!
//! Conversation persistence and the generation orchestrator: retrieved
//! passages plus recent history in, a grounded cited answer out.

pub mod history;
pub mod orchestrator;

pub use history::ConversationStore;
pub use orchestrator::{ChatAnswer, Orchestrator};
