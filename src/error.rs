//! Centralized error types for mail2rmq.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mail2rmq library.
#[derive(Error, Debug)]
pub enum Mail2RmqError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The specified file does not exist.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// The configuration file could not be parsed.
    #[error("Invalid configuration file '{path}': {source}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A configured directory is missing, unusable, or not writable.
    #[error("Directory '{path}' is not usable: {reason}")]
    InvalidDirectory { path: PathBuf, reason: String },

    /// A subject filter is not a valid regular expression.
    #[error("Invalid subject filter '{pattern}': {source}")]
    InvalidFilter {
        pattern: String,
        source: regex::Error,
    },

    /// Any other configuration problem.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The input could not be understood as an email message.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// An attachment payload could not be turned into bytes.
    #[error("Cannot convert attachment '{filename}': {reason}")]
    AttachmentConversion { filename: String, reason: String },

    /// The broker could not be reached.
    #[error("Broker connection failed: {0}")]
    Connection(String),

    /// A connection was established but the channel is not open.
    #[error("Broker channel is not open")]
    ChannelClosed,

    /// The outgoing payload was empty.
    #[error("Refusing to publish an empty payload")]
    EmptyPayload,

    /// The broker rejected the message.
    #[error("Broker publish failed: {0}")]
    Publish(String),

    /// The archive copy could not be written.
    #[error("Failed to archive message to '{path}': {source}")]
    Archive {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A temporary file could not be removed.
    #[error("Failed to remove '{path}': {source}")]
    FileRemoval {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Another instance already holds the lock for this flavor.
    #[error("Another instance is running for flavor '{flavor}' (lock: {path})")]
    Locked { flavor: String, path: PathBuf },
}

/// Convenience alias for `Result<T, Mail2RmqError>`.
pub type Result<T> = std::result::Result<T, Mail2RmqError>;

impl Mail2RmqError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare, prefer `Mail2RmqError::io`).
impl From<std::io::Error> for Mail2RmqError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
