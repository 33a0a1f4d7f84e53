//! Extract allowed attachments and stage them, base64-encoded, in a temp directory.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::{Mail2RmqError, Result};
use crate::model::decision::AttachmentArtifact;
use crate::model::message::{MessagePart, ParsedMessage};

/// Line length of the encoded files (MIME base64).
const ENCODED_LINE_LEN: usize = 76;

/// How many numbered variants of a filename to try before giving up.
const MAX_NAME_ATTEMPTS: usize = 1000;

/// Suffix appended to the staged attachment name.
pub const ENCODED_SUFFIX: &str = "encoded";

/// Stage every allowed attachment of a multipart message.
///
/// A leaf part qualifies when its content type is in `allowed_types` and it
/// carries a filename. Named parts of any other type are logged and dropped.
/// Each qualifying part becomes `{tmp_dir}/{filename}.encoded`. A part that
/// cannot be staged is skipped and the scan continues.
pub fn extract_attachments(
    msg: &ParsedMessage,
    allowed_types: &[String],
    tmp_dir: &Path,
) -> Vec<AttachmentArtifact> {
    if !msg.is_multipart() {
        tracing::debug!("Single-part message, no attachments to locate");
        return Vec::new();
    }

    tracing::info!("Locating attachments...");
    let mut artifacts = Vec::new();

    for part in msg.walk().filter(|p| !p.is_container()) {
        let Some(filename) = part.filename.as_deref() else {
            continue;
        };

        if !allowed_types.iter().any(|t| *t == part.content_type) {
            tracing::warn!(
                filename,
                content_type = %part.content_type,
                "Attachment type not allowed, skipping"
            );
            continue;
        }

        tracing::info!(filename, content_type = %part.content_type, "Attachment detected");
        match stage_attachment(part, filename, tmp_dir) {
            Ok(artifact) => artifacts.push(artifact),
            Err(e) => {
                tracing::warn!(filename, error = %e, "Failed to extract attachment");
            }
        }
    }

    artifacts
}

/// Read an encoded artifact back into the original attachment bytes.
pub fn decode_artifact(path: &Path) -> Result<Vec<u8>> {
    let text = std::fs::read(path).map_err(|e| Mail2RmqError::io(path, e))?;
    let compact: Vec<u8> = text
        .into_iter()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD
        .decode(compact)
        .map_err(|e| Mail2RmqError::AttachmentConversion {
            filename: path.display().to_string(),
            reason: e.to_string(),
        })
}

/// Write the raw bytes, encode them next to it, then remove the raw file.
fn stage_attachment(
    part: &MessagePart,
    filename: &str,
    tmp_dir: &Path,
) -> Result<AttachmentArtifact> {
    let data = match part.payload() {
        Some(bytes) if !bytes.is_empty() => bytes,
        Some(_) => {
            return Err(Mail2RmqError::AttachmentConversion {
                filename: filename.to_string(),
                reason: "attachment is empty".into(),
            })
        }
        None => {
            return Err(Mail2RmqError::AttachmentConversion {
                filename: filename.to_string(),
                reason: "payload could not be decoded".into(),
            })
        }
    };

    let name = safe_file_name(filename).ok_or_else(|| Mail2RmqError::AttachmentConversion {
        filename: filename.to_string(),
        reason: "filename has no usable component".into(),
    })?;

    let raw_path = write_staging_file(tmp_dir, name, data)?;
    let encoded_path = encoded_path_for(&raw_path);

    let encoded = encode_file(&raw_path, &encoded_path);
    remove_raw_file(&raw_path);
    encoded?;

    Ok(AttachmentArtifact::new(
        filename,
        encoded_path,
        part.content_type.clone(),
    ))
}

/// Base64-encode `src` into `dst`, wrapped at 76 columns.
fn encode_file(src: &Path, dst: &Path) -> Result<()> {
    let data = std::fs::read(src).map_err(|e| Mail2RmqError::io(src, e))?;
    let encoded = STANDARD.encode(data);

    let mut out = Vec::with_capacity(encoded.len() + encoded.len() / ENCODED_LINE_LEN + 1);
    for line in encoded.as_bytes().chunks(ENCODED_LINE_LEN) {
        out.extend_from_slice(line);
        out.push(b'\n');
    }

    std::fs::write(dst, &out).map_err(|e| Mail2RmqError::io(dst, e))
}

fn remove_raw_file(path: &Path) {
    if let Err(source) = std::fs::remove_file(path) {
        let err = Mail2RmqError::FileRemoval {
            path: path.to_path_buf(),
            source,
        };
        tracing::warn!(error = %err, "Raw attachment left in temp directory");
    }
}

/// Create the raw staging file exclusively, numbering the name on collision
/// (`report.pdf` → `report_1.pdf`).
fn write_staging_file(tmp_dir: &Path, name: &str, data: &[u8]) -> Result<PathBuf> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let path = tmp_dir.join(numbered_name(name, attempt));
        if encoded_path_for(&path).exists() {
            continue;
        }
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                if let Err(e) = file.write_all(data) {
                    drop(file);
                    remove_raw_file(&path);
                    return Err(Mail2RmqError::io(&path, e));
                }
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(Mail2RmqError::io(&path, e)),
        }
    }

    Err(Mail2RmqError::AttachmentConversion {
        filename: name.to_string(),
        reason: format!("no free name in {}", tmp_dir.display()),
    })
}

fn encoded_path_for(raw_path: &Path) -> PathBuf {
    let mut name = raw_path.as_os_str().to_os_string();
    name.push(".");
    name.push(ENCODED_SUFFIX);
    PathBuf::from(name)
}

fn numbered_name(name: &str, n: usize) -> String {
    if n == 0 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{n}.{ext}"),
        _ => format!("{name}_{n}"),
    }
}

/// Last path component of an attachment filename, so names such as
/// `../../etc/passwd` or `C:\x\y.pdf` stay inside the temp directory.
fn safe_file_name(filename: &str) -> Option<&str> {
    let name = filename.rsplit(|c: char| c == '/' || c == '\\').next()?.trim();
    match name {
        "" | "." | ".." => None,
        _ => Some(name),
    }
}
