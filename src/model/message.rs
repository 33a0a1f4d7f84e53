//! Parsed message and its MIME part tree.

/// A single message, parsed once and never modified afterwards.
///
/// The raw bytes are kept verbatim so a failed dispatch can archive exactly
/// what was received.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    /// Decoded `Subject:` header (empty if missing).
    pub subject: String,
    /// Decoded `From:` header (empty if missing).
    pub from: String,
    /// Decoded `To:` header (empty if missing).
    pub to: String,
    /// Root of the MIME part tree.
    pub root: MessagePart,
    raw: Vec<u8>,
}

/// A node of the MIME part tree.
///
/// Containers (`multipart/*`, embedded `message/rfc822`) have children and no
/// payload. Leaves have a payload and no children.
#[derive(Debug, Clone, PartialEq)]
pub struct MessagePart {
    /// Lower-cased `type/subtype`.
    pub content_type: String,
    /// Attachment filename from `Content-Disposition` or `Content-Type`.
    pub filename: Option<String>,
    /// Child parts, in message order.
    pub children: Vec<MessagePart>,
    payload: Option<Vec<u8>>,
    container: bool,
}

impl ParsedMessage {
    /// Assemble a message from already-decoded parts.
    pub fn new(
        subject: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        root: MessagePart,
        raw: Vec<u8>,
    ) -> Self {
        Self {
            subject: subject.into(),
            from: from.into(),
            to: to.into(),
            root,
            raw,
        }
    }

    /// The message exactly as received.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// `true` if the top-level part is a multipart container.
    pub fn is_multipart(&self) -> bool {
        self.root.is_container() && self.root.content_type.starts_with("multipart/")
    }

    /// Depth-first, pre-order iterator over every part, root included.
    pub fn walk(&self) -> Walk<'_> {
        self.root.walk()
    }
}

impl MessagePart {
    /// A leaf part carrying decoded bytes.
    pub fn leaf(
        content_type: impl Into<String>,
        filename: Option<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            content_type: content_type.into().to_ascii_lowercase(),
            filename,
            children: Vec::new(),
            payload: Some(payload.into()),
            container: false,
        }
    }

    /// A leaf part whose payload could not be decoded.
    pub fn undecodable(content_type: impl Into<String>, filename: Option<String>) -> Self {
        Self {
            content_type: content_type.into().to_ascii_lowercase(),
            filename,
            children: Vec::new(),
            payload: None,
            container: false,
        }
    }

    /// A container node.
    pub fn container(content_type: impl Into<String>, children: Vec<MessagePart>) -> Self {
        Self {
            content_type: content_type.into().to_ascii_lowercase(),
            filename: None,
            children,
            payload: None,
            container: true,
        }
    }

    pub fn is_container(&self) -> bool {
        self.container
    }

    /// Decoded payload bytes. `None` for containers and undecodable leaves.
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Depth-first, pre-order iterator starting at this part.
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }
}

/// Pre-order traversal of a part tree.
pub struct Walk<'a> {
    stack: Vec<&'a MessagePart>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a MessagePart;

    fn next(&mut self) -> Option<Self::Item> {
        let part = self.stack.pop()?;
        self.stack.extend(part.children.iter().rev());
        Some(part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_is_depth_first_in_order() {
        let tree = MessagePart::container(
            "multipart/mixed",
            vec![
                MessagePart::container(
                    "multipart/alternative",
                    vec![
                        MessagePart::leaf("text/plain", None, "a"),
                        MessagePart::leaf("text/html", None, "<b>a</b>"),
                    ],
                ),
                MessagePart::leaf("application/pdf", Some("x.pdf".into()), "pdf"),
            ],
        );
        let types: Vec<&str> = tree.walk().map(|p| p.content_type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "multipart/mixed",
                "multipart/alternative",
                "text/plain",
                "text/html",
                "application/pdf"
            ]
        );
    }

    #[test]
    fn test_is_multipart() {
        let single = ParsedMessage::new(
            "s",
            "f",
            "t",
            MessagePart::leaf("text/plain", None, "body"),
            Vec::new(),
        );
        assert!(!single.is_multipart());

        let multi = ParsedMessage::new(
            "s",
            "f",
            "t",
            MessagePart::container("multipart/mixed", Vec::new()),
            Vec::new(),
        );
        assert!(multi.is_multipart());
    }

    #[test]
    fn test_content_type_lowercased() {
        let part = MessagePart::leaf("Application/PDF", None, Vec::new());
        assert_eq!(part.content_type, "application/pdf");
    }
}
