//! Domain models shared across Presail crates

pub mod chunk;
pub mod citation;
pub mod conversation;
pub mod document;
pub mod proposal;
pub mod review_event;

pub use chunk::ChunkRecord;
pub use citation::Citation;
pub use conversation::{ChatTurn, TurnRole};
pub use document::{DocFormat, Document, IngestStatus, OwnerKind};
pub use proposal::{Proposal, ProposalStatus, ReviewAction};
pub use review_event::ReviewEvent;
