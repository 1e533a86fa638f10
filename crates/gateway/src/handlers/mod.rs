//! API handlers module

pub mod analytics;
pub mod chat;
pub mod documents;
pub mod health;
pub mod proposals;
