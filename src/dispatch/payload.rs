//! Outgoing message bodies.

use serde::Serialize;

use crate::error::{Mail2RmqError, Result};
use crate::extract::body::extract_body;
use crate::model::decision::{AttachmentArtifact, Payload};
use crate::model::message::ParsedMessage;

/// JSON record published for an attachment.
#[derive(Debug, Serialize)]
struct AttachmentRecord<'a> {
    filename: &'a str,
    contents: &'a str,
}

/// Render the text to publish for a decision's payload.
///
/// An empty result is returned as-is; the caller decides what empty means.
pub fn render(payload: &Payload, msg: &ParsedMessage) -> Result<String> {
    match payload {
        Payload::Body => {
            tracing::info!("Processing email body...");
            Ok(extract_body(msg))
        }
        Payload::Envelope => {
            tracing::info!("Processing error message...");
            Ok(envelope(msg))
        }
        Payload::Attachment(artifact) => {
            tracing::info!(
                filename = artifact.source_filename(),
                "Processing file/attachment..."
            );
            attachment_record(artifact)
        }
    }
}

/// `From: {from} To: {to} Subject: {subject} Body: {body}`.
pub fn envelope(msg: &ParsedMessage) -> String {
    format!(
        "From: {} To: {} Subject: {} Body: {}",
        msg.from,
        msg.to,
        msg.subject,
        extract_body(msg)
    )
}

/// `{"filename": stem, "contents": encoded text}`. Empty when the encoded
/// file is empty.
fn attachment_record(artifact: &AttachmentArtifact) -> Result<String> {
    let path = artifact.encoded_path();
    let contents = std::fs::read_to_string(path).map_err(|e| Mail2RmqError::io(path, e))?;
    if contents.is_empty() {
        return Ok(String::new());
    }

    let stem = artifact.filename_stem();
    let record = AttachmentRecord {
        filename: &stem,
        contents: &contents,
    };
    serde_json::to_string(&record).map_err(|e| Mail2RmqError::Publish(e.to_string()))
}
