//! Plain-text body extraction.

use crate::model::message::ParsedMessage;

/// Concatenate every non-empty `text/plain` leaf, depth-first, no separator.
///
/// Returns an empty string when the message has no plain-text content.
/// Never mutates the message, so repeated calls return the same text.
pub fn extract_body(msg: &ParsedMessage) -> String {
    msg.walk()
        .filter(|part| !part.is_container() && part.content_type == "text/plain")
        .filter_map(|part| part.payload())
        .filter(|payload| !payload.is_empty())
        .map(String::from_utf8_lossy)
        .collect()
}
