//! PDF attachment extraction.
//!
//! A parsed message is turned into a [`MimePart`] tree and walked depth
//! first. A part qualifies when its `Content-Disposition` header mentions
//! `attachment` anywhere (parameters included) or its content type is
//! `application/pdf`, and its header-decoded filename ends in `.pdf`.

use mail_parser::{HeaderName, MessageParser, MimeHeaders, PartType};
use tracing::{debug, info, warn};

use super::types::{Attachment, Message};

/// One node of a message's MIME structure.
#[derive(Debug, Clone)]
pub struct MimePart<'a> {
    /// Lowercased `type/subtype`. `text/plain` when the header is absent.
    pub content_type: String,
    /// Lowercased `Content-Disposition` value with parameters, whitespace
    /// collapsed. `None` when the header is absent.
    pub disposition: Option<String>,
    /// Header-decoded filename from the disposition or content type.
    pub filename: Option<String>,
    /// Transfer-decoded body. Empty for multipart containers.
    pub payload: &'a [u8],
    pub children: Vec<MimePart<'a>>,
}

impl<'a> MimePart<'a> {
    /// Build the tree rooted at a parsed message's top-level part.
    pub fn from_message(message: &'a mail_parser::Message<'_>) -> Option<Self> {
        message
            .parts
            .first()
            .map(|root| Self::from_part(message, root))
    }

    fn from_part(
        message: &'a mail_parser::Message<'_>,
        part: &'a mail_parser::MessagePart<'_>,
    ) -> Self {
        let content_type = part
            .content_type()
            .map(|ct| match ct.subtype() {
                Some(sub) => format!("{}/{}", ct.ctype(), sub),
                None => ct.ctype().to_string(),
            })
            .unwrap_or_else(|| "text/plain".to_string())
            .to_ascii_lowercase();

        let disposition = disposition_of(message, part);

        let children = match &part.body {
            PartType::Multipart(ids) => ids
                .iter()
                .filter_map(|id| message.parts.get(*id as usize))
                .map(|child| Self::from_part(message, child))
                .collect(),
            PartType::Message(nested) => Self::from_message(nested).into_iter().collect(),
            _ => Vec::new(),
        };

        Self {
            content_type,
            disposition,
            filename: part.attachment_name().map(str::to_string),
            payload: part.contents(),
            children,
        }
    }

    /// Depth-first, pre-order iterator over this part and all descendants.
    pub fn walk(&self) -> impl Iterator<Item = &MimePart<'a>> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let part = stack.pop()?;
            stack.extend(part.children.iter().rev());
            Some(part)
        })
    }

    /// Whether this part could be a PDF attachment, ignoring its filename.
    pub fn is_pdf_candidate(&self) -> bool {
        self.disposition
            .as_deref()
            .is_some_and(|d| d.contains("attachment"))
            || self.content_type == "application/pdf"
    }

    /// The filename, when this part is a PDF attachment.
    pub fn pdf_filename(&self) -> Option<&str> {
        if !self.is_pdf_candidate() {
            return None;
        }
        self.filename
            .as_deref()
            .filter(|name| name.to_lowercase().ends_with(".pdf"))
    }
}

/// Lowercased `Content-Disposition` value, parameters included. Falls back
/// to the bare disposition type when the raw header text is unavailable.
fn disposition_of(
    message: &mail_parser::Message<'_>,
    part: &mail_parser::MessagePart<'_>,
) -> Option<String> {
    let ctype = part.content_disposition()?.ctype().to_ascii_lowercase();
    match raw_header(message, part, HeaderName::ContentDisposition) {
        Some(raw) if raw.starts_with(&ctype) => Some(raw),
        _ => Some(ctype),
    }
}

/// Unparsed header value of `part`, lowercased and unfolded.
fn raw_header(
    message: &mail_parser::Message<'_>,
    part: &mail_parser::MessagePart<'_>,
    name: HeaderName<'_>,
) -> Option<String> {
    let header = part.headers.iter().find(|h| h.name == name)?;
    let start = usize::try_from(header.offset_start).ok()?;
    let end = usize::try_from(header.offset_end).ok()?;
    let raw = message.raw_message.get(start..end)?;
    let value = String::from_utf8_lossy(raw)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();
    Some(value)
}

/// Collect the PDF attachments of a raw RFC 822 message.
pub fn extract_pdfs_from_raw(raw: &[u8]) -> Vec<Attachment> {
    let Some(parsed) = MessageParser::default().parse(raw) else {
        warn!("Message could not be parsed, no attachments extracted");
        return Vec::new();
    };
    let Some(root) = MimePart::from_message(&parsed) else {
        return Vec::new();
    };

    let mut attachments = Vec::new();
    for part in root.walk() {
        match part.pdf_filename() {
            Some(filename) => {
                info!("Found PDF: {filename}");
                attachments.push(Attachment::new(filename, part.payload));
            }
            None => debug!(content_type = %part.content_type, "No PDF attachment in this part"),
        }
    }
    attachments
}

/// Collect the PDF attachments of a selected message.
pub fn extract_pdfs(message: &Message) -> Vec<Attachment> {
    let attachments = extract_pdfs_from_raw(&message.raw);
    debug!(
        seq = message.seq,
        count = attachments.len(),
        "Extracted attachments"
    );
    attachments
}
