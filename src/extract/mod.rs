//! Content extraction from a parsed message: plain-text body and attachments.

pub mod attachment;
pub mod body;
