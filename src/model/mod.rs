//! Core data model: parsed messages, routing decisions, dispatch outcomes.

pub mod address;
pub mod decision;
pub mod message;
