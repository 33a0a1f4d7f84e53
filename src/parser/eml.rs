//! Message sources: a single `.eml`-style file, or a whole stream such as stdin.

use std::io::Read;
use std::path::Path;

use crate::error::{Mail2RmqError, Result};
use crate::model::message::ParsedMessage;
use crate::parser::mime;

/// Read and parse one message file.
///
/// The file is a bare RFC 5322 message, optionally preceded by an mbox
/// `From ` line (archived messages are written exactly as received).
pub fn read_message_file(path: impl AsRef<Path>) -> Result<ParsedMessage> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Mail2RmqError::FileNotFound(path.to_path_buf())
        } else {
            Mail2RmqError::io(path, e)
        }
    })?;
    tracing::debug!(path = %path.display(), bytes = data.len(), "Read message file");
    mime::parse_message(data)
}

/// Read a whole message from a stream until EOF and parse it.
pub fn read_message<R: Read>(mut reader: R) -> Result<ParsedMessage> {
    let mut data = Vec::new();
    reader
        .read_to_end(&mut data)
        .map_err(|e| Mail2RmqError::io("<stdin>", e))?;
    tracing::debug!(bytes = data.len(), "Read message from stream");
    mime::parse_message(data)
}
