//! `mail2rmq`: route incoming email to message broker queues.
//!
//! This crate provides the library behind the `mail2rmq` binary: message
//! parsing, subject/sender classification, attachment re-encoding, and a
//! publish-or-archive dispatch engine that never drops a message.

pub mod broker;
pub mod classify;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod lock;
pub mod model;
pub mod parser;
pub mod pipeline;
