//! Presail Workflow Engine
//!
//! Proposal lifecycle: a closed status state machine persisted behind an
//! optimistic check-and-set store, an append-only review-event audit
//! trail written atomically with each transition, and analytics rollups
//! recomputed from that trail.

pub mod analytics;
pub mod engine;
pub mod store;

pub use analytics::{AnalyticsAggregator, AnalyticsSnapshot};
pub use engine::WorkflowEngine;
pub use store::{NewProposal, WorkflowStore};
