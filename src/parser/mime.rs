//! MIME message parsing: raw bytes → [`ParsedMessage`] part tree.

use mail_parser::decoders::base64::base64_decode;
use mail_parser::decoders::quoted_printable::quoted_printable_decode;
use mail_parser::{Address, Message, MessageParser, MimeHeaders, PartType};

use crate::error::{Mail2RmqError, Result};
use crate::model::message::{MessagePart, ParsedMessage};

/// Maximum depth for recursive multipart parsing (to prevent stack overflow on adversarial input).
const MAX_DEPTH: usize = 10;

/// Parse a complete raw message (headers + body).
///
/// Uses `mail-parser` for the MIME structure and for the decoded Subject,
/// From and To headers. The raw bytes are kept verbatim inside the returned
/// message.
pub fn parse_message(raw: Vec<u8>) -> Result<ParsedMessage> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(Mail2RmqError::InvalidMessage("message is empty".into()));
    }

    let message_bytes = skip_from_line(&raw);

    let (subject, from, to, root) = match MessageParser::default().parse(message_bytes) {
        Some(msg) => (
            msg.subject().unwrap_or_default().trim().to_string(),
            format_addresses(msg.from()),
            format_addresses(msg.to()),
            convert_message(&msg, 0),
        ),
        None => {
            tracing::warn!("MIME structure not recognized, treating message as plain text");
            (
                String::new(),
                String::new(),
                String::new(),
                MessagePart::leaf("text/plain", None, extract_body_fallback(message_bytes)),
            )
        }
    };

    Ok(ParsedMessage::new(subject, from, to, root, raw))
}

/// Render an address header as `Name <addr>, other@host`.
fn format_addresses(addresses: Option<&Address<'_>>) -> String {
    let Some(addresses) = addresses else {
        return String::new();
    };
    addresses
        .iter()
        .filter_map(|addr| match (addr.name.as_deref(), addr.address.as_deref()) {
            (Some(name), Some(address)) => Some(format!("{name} <{address}>")),
            (None, Some(address)) => Some(address.to_string()),
            (Some(name), None) => Some(name.to_string()),
            (None, None) => None,
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn convert_message(msg: &Message<'_>, depth: usize) -> MessagePart {
    if msg.parts.is_empty() {
        return MessagePart::leaf("text/plain", None, Vec::new());
    }
    convert_part(msg, 0, depth)
}

fn convert_part(msg: &Message<'_>, id: usize, depth: usize) -> MessagePart {
    let Some(part) = msg.parts.get(id) else {
        return MessagePart::undecodable("application/octet-stream", None);
    };

    let filename = part.attachment_name().map(String::from);
    let declared = part.content_type().map(|ct: &mail_parser::ContentType| {
        let main = ct.ctype();
        match ct.subtype() {
            Some(sub) => format!("{main}/{sub}"),
            None => main.to_string(),
        }
    });

    match &part.body {
        PartType::Multipart(ids) => {
            let content_type = declared.unwrap_or_else(|| "multipart/mixed".to_string());
            if depth >= MAX_DEPTH {
                tracing::warn!(depth, "Multipart nesting too deep, ignoring sub-parts");
                return MessagePart::container(content_type, Vec::new());
            }
            let children = ids
                .iter()
                .map(|&child| convert_part(msg, child as usize, depth + 1))
                .collect();
            MessagePart::container(content_type, children)
        }
        PartType::Message(inner) => {
            let content_type = declared.unwrap_or_else(|| "message/rfc822".to_string());
            if depth >= MAX_DEPTH {
                return MessagePart::container(content_type, Vec::new());
            }
            MessagePart::container(content_type, vec![convert_message(inner, depth + 1)])
        }
        PartType::Text(text) | PartType::Html(text) => {
            let fallback = if matches!(part.body, PartType::Html(_)) {
                "text/html"
            } else {
                "text/plain"
            };
            let content_type = declared.unwrap_or_else(|| fallback.to_string());
            if filename.is_none() {
                return MessagePart::leaf(content_type, None, text.as_bytes());
            }
            // Named text parts are files: keep their bytes, not the charset-decoded text.
            match transfer_decoded(msg, part) {
                Some(bytes) => MessagePart::leaf(content_type, filename, bytes),
                None => MessagePart::undecodable(content_type, filename),
            }
        }
        PartType::Binary(data) | PartType::InlineBinary(data) => {
            let content_type =
                declared.unwrap_or_else(|| "application/octet-stream".to_string());
            if part.is_encoding_problem {
                tracing::debug!(
                    content_type = %content_type,
                    "Part has a transfer-encoding problem, payload unusable"
                );
                MessagePart::undecodable(content_type, filename)
            } else {
                MessagePart::leaf(content_type, filename, data.to_vec())
            }
        }
    }
}

/// Body bytes of a part after undoing its Content-Transfer-Encoding only.
fn transfer_decoded(msg: &Message<'_>, part: &mail_parser::MessagePart<'_>) -> Option<Vec<u8>> {
    let body = msg
        .raw_message()
        .get(part.raw_body_offset()..part.raw_end_offset())?;
    let encoding = part
        .content_transfer_encoding()
        .unwrap_or("7bit")
        .trim()
        .to_ascii_lowercase();

    match encoding.as_str() {
        "base64" => base64_decode(body),
        "quoted-printable" => quoted_printable_decode(body),
        _ => Some(body.to_vec()),
    }
}

/// Skip the `From ` separator line that mail delivery agents prepend.
fn skip_from_line(data: &[u8]) -> &[u8] {
    // Handle BOM
    let data = if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
        &data[3..]
    } else {
        data
    };

    if data.starts_with(b"From ") {
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return &data[pos + 1..];
        }
    }
    data
}

/// Fallback body extraction when `mail-parser` cannot parse the message.
fn extract_body_fallback(data: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(data);
    // Everything after the first blank line is the body
    if let Some(pos) = text.find("\n\n") {
        text[pos + 2..].as_bytes().to_vec()
    } else if let Some(pos) = text.find("\r\n\r\n") {
        text[pos + 4..].as_bytes().to_vec()
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTIPART: &str = "From: Alice <alice@example.com>\r\n\
To: ops@example.com\r\n\
Subject: Monthly report\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
\r\n\
--XYZ\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
See attached.\r\n\
--XYZ\r\n\
Content-Type: application/pdf; name=\"report.pdf\"\r\n\
Content-Disposition: attachment; filename=\"report.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQK\r\n\
--XYZ--\r\n";

    #[test]
    fn test_parse_headers_and_raw() {
        let raw = MULTIPART.as_bytes().to_vec();
        let msg = parse_message(raw.clone()).unwrap();
        assert_eq!(msg.subject, "Monthly report");
        assert_eq!(msg.from, "Alice <alice@example.com>");
        assert_eq!(msg.to, "ops@example.com");
        assert_eq!(msg.raw(), raw.as_slice());
    }

    #[test]
    fn test_parse_part_tree() {
        let msg = parse_message(MULTIPART.as_bytes().to_vec()).unwrap();
        assert!(msg.is_multipart());
        assert_eq!(msg.root.children.len(), 2);

        let text = &msg.root.children[0];
        assert_eq!(text.content_type, "text/plain");
        assert!(text.filename.is_none());

        let pdf = &msg.root.children[1];
        assert_eq!(pdf.content_type, "application/pdf");
        assert_eq!(pdf.filename.as_deref(), Some("report.pdf"));
        assert_eq!(pdf.payload(), Some(&b"%PDF-1.4\n"[..]));
    }

    #[test]
    fn test_parse_single_part() {
        let raw = b"From: a@b.com\nSubject: Queue1\n\nHello\n".to_vec();
        let msg = parse_message(raw).unwrap();
        assert!(!msg.is_multipart());
        assert_eq!(msg.root.content_type, "text/plain");
        let body = String::from_utf8_lossy(msg.root.payload().unwrap()).into_owned();
        assert!(body.starts_with("Hello"));
    }

    #[test]
    fn test_parse_with_from_separator_keeps_raw() {
        let raw = b"From a@b.com Thu Jan 01 00:00:00 2024\nFrom: a@b.com\nSubject: S\n\nBody\n".to_vec();
        let msg = parse_message(raw.clone()).unwrap();
        assert_eq!(msg.from, "a@b.com");
        assert_eq!(msg.subject, "S");
        assert_eq!(msg.raw(), raw.as_slice());
    }

    #[test]
    fn test_encoded_word_headers() {
        let raw = b"From: =?UTF-8?B?Sm9zw6k=?= <jose@example.com>\n\
To: a@b.com, =?ISO-8859-1?Q?M=FCller?= <m@c.de>\n\
Subject: =?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?=\n\nx\n"
            .to_vec();
        let msg = parse_message(raw).unwrap();
        assert_eq!(msg.subject, "Hola mundo");
        assert_eq!(msg.from, "José <jose@example.com>");
        assert_eq!(msg.to, "a@b.com, Müller <m@c.de>");
    }

    #[test]
    fn test_missing_headers_are_empty() {
        let msg = parse_message(b"X-Other: 1\n\nbody\n".to_vec()).unwrap();
        assert_eq!(msg.subject, "");
        assert_eq!(msg.from, "");
        assert_eq!(msg.to, "");
    }

    #[test]
    fn test_named_text_part_keeps_original_bytes() {
        let raw = "From: a@b.com\r\n\
Subject: data\r\n\
Content-Type: multipart/mixed; boundary=\"b\"\r\n\
\r\n\
--b\r\n\
Content-Type: text/plain\r\n\
\r\n\
body\r\n\
--b\r\n\
Content-Type: text/csv; charset=iso-8859-1\r\n\
Content-Disposition: attachment; filename=\"menu.csv\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
Y2Fm6Q==\r\n\
--b--\r\n";
        let msg = parse_message(raw.as_bytes().to_vec()).unwrap();
        let csv = &msg.root.children[1];
        assert_eq!(csv.filename.as_deref(), Some("menu.csv"));
        assert_eq!(csv.payload(), Some(&b"caf\xE9"[..]));
    }

    #[test]
    fn test_named_quoted_printable_part() {
        let raw = "From: a@b.com\r\n\
Content-Type: multipart/mixed; boundary=\"b\"\r\n\
\r\n\
--b\r\n\
Content-Type: text/plain; charset=iso-8859-1\r\n\
Content-Disposition: attachment; filename=\"note.txt\"\r\n\
Content-Transfer-Encoding: quoted-printable\r\n\
\r\n\
caf=E9\r\n\
--b--\r\n";
        let msg = parse_message(raw.as_bytes().to_vec()).unwrap();
        let note = &msg.root.children[0];
        let bytes = note.payload().unwrap();
        assert!(bytes.starts_with(b"caf\xE9"), "{bytes:?}");
    }

    #[test]
    fn test_empty_input_is_rejected() {
        let err = parse_message(b"  \n".to_vec()).unwrap_err();
        assert!(matches!(err, Mail2RmqError::InvalidMessage(_)));
    }

    #[test]
    fn test_skip_from_line_no_from() {
        let data = b"Subject: Test\n\nBody\n";
        assert_eq!(skip_from_line(data), data);
    }
}
