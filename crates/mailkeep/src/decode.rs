//! Message decoding: raw RFC 822 bytes into structured fields and attachments.

use log::debug;
use mail_parser::{MessagePart, MessageParser, MimeHeaders, PartType};

/// Errors raised while decoding a raw message.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Failed to parse message: {0}")]
    Parse(String),
}

/// Result type for decode operations.
pub type Result<T> = std::result::Result<T, DecodeError>;

/// A fully decoded message ready for archival.
#[derive(Debug, Clone)]
pub struct DecodedMessage {
    /// Subject with encoded-word tokens reassembled into one string.
    pub subject: String,
    /// From header, formatted as `Name <addr>` when a display name exists.
    pub sender: String,
    /// All To addresses, comma-joined.
    pub recipients: String,
    /// Parsed date as RFC 3339, best-effort.
    pub date: Option<String>,
    /// The Date header exactly as it appeared on the wire (unfolded).
    pub raw_date: String,
    /// The Message-ID header exactly as it appeared on the wire (unfolded).
    pub message_id: String,
    /// Concatenation of every text/plain and text/html part, in tree order.
    pub body: String,
    pub attachments: Vec<DecodedAttachment>,
}

/// An attachment captured verbatim from a message part.
#[derive(Debug, Clone)]
pub struct DecodedAttachment {
    pub filename: String,
    pub content: Vec<u8>,
    /// Content-ID exactly as written in the part header, angle brackets
    /// and all. Used for inline-image resolution by the presentation
    /// layer.
    pub content_id: Option<String>,
}

impl DecodedMessage {
    /// Computes the dedup fingerprint over the five identity fields.
    pub fn fingerprint(&self) -> String {
        crate::fingerprint::fingerprint(
            &self.subject,
            &self.sender,
            &self.recipients,
            &self.raw_date,
            &self.message_id,
        )
    }
}

/// Decodes raw message bytes into structured fields and extracted attachments.
///
/// Per-part charset problems never fail the whole message: each text part is
/// decoded with its declared charset (default utf-8) and undecodable bytes
/// are replaced. Only a message whose header block cannot be parsed at all
/// yields [`DecodeError::Parse`].
pub fn decode(raw: &[u8]) -> Result<DecodedMessage> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| DecodeError::Parse("unparseable message".to_string()))?;

    let subject = message.subject().unwrap_or_default().to_string();
    let sender = message
        .from()
        .and_then(|addr| addr.first().map(format_address))
        .unwrap_or_default();
    let recipients = message
        .to()
        .map(|addr| {
            addr.iter()
                .map(format_address)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();
    let date = message.date().map(|d| d.to_rfc3339());

    // The fingerprint is defined over the raw header values, so these are
    // taken from the wire bytes rather than the parser's normalized forms.
    let raw_date = raw_header(raw, "Date").unwrap_or_default();
    let message_id = raw_header(raw, "Message-ID").unwrap_or_default();

    let mut body = String::new();
    let mut attachments = Vec::new();

    for part in message.parts.iter() {
        // A part with a disposition header and a filename is an attachment,
        // inline or not. Everything else that is text contributes to the body.
        let is_attachment =
            part.content_disposition().is_some() && part.attachment_name().is_some();

        if !is_attachment {
            match &part.body {
                PartType::Text(text) => body.push_str(text),
                PartType::Html(html) => body.push_str(html),
                _ => {}
            }
            continue;
        }

        let Some(filename) = part.attachment_name() else {
            continue;
        };

        let content = match &part.body {
            PartType::Binary(data) | PartType::InlineBinary(data) => data.to_vec(),
            PartType::Text(text) => text.as_bytes().to_vec(),
            PartType::Html(html) => html.as_bytes().to_vec(),
            _ => continue,
        };

        debug!(
            "Captured attachment '{}' ({} bytes)",
            filename,
            content.len()
        );

        // The parser strips the angle brackets from Content-ID; the
        // archive keeps the header value verbatim, so it is re-read from
        // the raw bytes through the part's offsets.
        attachments.push(DecodedAttachment {
            filename: filename.to_string(),
            content,
            content_id: raw_part_header(raw, part, "Content-ID"),
        });
    }

    Ok(DecodedMessage {
        subject,
        sender,
        recipients,
        date,
        raw_date,
        message_id,
        body,
        attachments,
    })
}

/// Formats an address as `Name <addr>` when a display name is present.
fn format_address(addr: &mail_parser::Addr) -> String {
    if let Some(name) = addr.name() {
        format!("{} <{}>", name, addr.address().unwrap_or_default())
    } else {
        addr.address().unwrap_or_default().to_string()
    }
}

/// Re-reads a part-level header value from the raw bytes through the
/// parser's byte offsets, unfolding continuation lines but otherwise
/// leaving the value untouched.
fn raw_part_header(raw: &[u8], part: &MessagePart, name: &str) -> Option<String> {
    let header = part
        .headers
        .iter()
        .find(|h| h.name.as_str().eq_ignore_ascii_case(name))?;
    let bytes = raw.get(header.offset_start() as usize..header.offset_end() as usize)?;
    let text = String::from_utf8_lossy(bytes);

    let mut value = String::new();
    for line in text.lines() {
        if !value.is_empty() {
            value.push(' ');
        }
        value.push_str(line.trim());
    }
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Extracts a top-level header value from the raw bytes, unfolding
/// continuation lines but otherwise leaving the value untouched.
fn raw_header(raw: &[u8], name: &str) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let header_block = text
        .split("\r\n\r\n")
        .next()
        .and_then(|b| b.split("\n\n").next())?;

    let mut value: Option<String> = None;
    for line in header_block.lines() {
        if let Some(v) = &mut value {
            // Folded continuation lines start with whitespace.
            if line.starts_with(' ') || line.starts_with('\t') {
                v.push(' ');
                v.push_str(line.trim_start());
                continue;
            }
            break;
        }
        if let Some((field, rest)) = line.split_once(':') {
            if field.eq_ignore_ascii_case(name) {
                value = Some(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            }
        }
    }
    value
}
