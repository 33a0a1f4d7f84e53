//! Routing decisions, attachment artifacts and dispatch outcomes.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::Mail2RmqError;

/// What gets published for a decision.
#[derive(Debug)]
pub enum Payload {
    /// The plain-text body of the message.
    Body,
    /// From/To/Subject headers plus body, for error queues.
    Envelope,
    /// One extracted attachment. Owned by the decision, so the encoded file
    /// lives exactly as long as the dispatch attempt that consumes it.
    Attachment(AttachmentArtifact),
}

/// Payload discriminant, kept after the artifact itself is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Body,
    Envelope,
    Attachment,
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Body => PayloadKind::Body,
            Self::Envelope => PayloadKind::Envelope,
            Self::Attachment(_) => PayloadKind::Attachment,
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Body => "body",
            Self::Envelope => "envelope",
            Self::Attachment => "attachment",
        };
        f.write_str(name)
    }
}

/// One publish to perform: a destination queue and what to send there.
///
/// The routing key always equals the queue name (direct exchange).
#[derive(Debug)]
pub struct RoutingDecision {
    pub queue: String,
    pub routing_key: String,
    pub payload: Payload,
}

impl RoutingDecision {
    pub fn new(queue: impl Into<String>, payload: Payload) -> Self {
        let queue = queue.into();
        Self {
            routing_key: queue.clone(),
            queue,
            payload,
        }
    }

    pub fn kind(&self) -> PayloadKind {
        self.payload.kind()
    }
}

/// A base64-encoded attachment staged in the temp directory.
///
/// Dropping the artifact deletes the encoded file. A failed delete is
/// logged as a warning and otherwise ignored.
#[derive(Debug)]
pub struct AttachmentArtifact {
    source_filename: String,
    encoded_path: PathBuf,
    content_type: String,
}

impl AttachmentArtifact {
    /// Take ownership of an encoded file already written to disk.
    pub fn new(
        source_filename: impl Into<String>,
        encoded_path: impl Into<PathBuf>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            source_filename: source_filename.into(),
            encoded_path: encoded_path.into(),
            content_type: content_type.into(),
        }
    }

    /// Filename of the attachment as named in the message.
    pub fn source_filename(&self) -> &str {
        &self.source_filename
    }

    /// Path of the encoded file.
    pub fn encoded_path(&self) -> &Path {
        &self.encoded_path
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Name the attachment is published under: the last path component of
    /// the source filename, so a renamed duplicate (`scan_1.pdf`) is still
    /// published as `scan.pdf`. Falls back to the encoded file name with its
    /// final extension removed (`report.pdf.encoded` → `report.pdf`).
    pub fn filename_stem(&self) -> String {
        let base = self
            .source_filename
            .rsplit(|c: char| c == '/' || c == '\\')
            .next()
            .unwrap_or_default();
        if !base.is_empty() && base != "." && base != ".." {
            return base.to_string();
        }
        self.encoded_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source_filename.clone())
    }
}

impl Drop for AttachmentArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.encoded_path) {
            Ok(()) => {
                tracing::debug!(path = %self.encoded_path.display(), "Removed encoded attachment");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                let err = Mail2RmqError::FileRemoval {
                    path: self.encoded_path.clone(),
                    source,
                };
                tracing::warn!(error = %err, "Encoded attachment left behind");
            }
        }
    }
}

/// Result of one dispatch attempt. Exactly one of delivered/archived holds.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub queue: String,
    pub routing_key: String,
    pub kind: PayloadKind,
    /// `true` if the broker accepted the message.
    pub delivered: bool,
    /// Why the publish failed, when it did.
    pub error: Option<Mail2RmqError>,
    /// Where the original message was archived after a failure.
    pub archive_path: Option<PathBuf>,
    /// Set when even the archive write failed.
    pub archive_error: Option<Mail2RmqError>,
}

impl DispatchOutcome {
    pub(crate) fn delivered(queue: &str, routing_key: &str, kind: PayloadKind) -> Self {
        Self {
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
            kind,
            delivered: true,
            error: None,
            archive_path: None,
            archive_error: None,
        }
    }

    pub(crate) fn failed(
        queue: &str,
        routing_key: &str,
        kind: PayloadKind,
        error: Mail2RmqError,
        archive: crate::error::Result<PathBuf>,
    ) -> Self {
        let (archive_path, archive_error) = match archive {
            Ok(path) => (Some(path), None),
            Err(e) => (None, Some(e)),
        };
        Self {
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
            kind,
            delivered: false,
            error: Some(error),
            archive_path,
            archive_error,
        }
    }

    /// `true` if the message was saved to the archive directory.
    pub fn archived(&self) -> bool {
        self.archive_path.is_some()
    }

    /// Human-readable failure description.
    pub fn error_detail(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}
