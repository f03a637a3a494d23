//! Header and body parsing
//!
//! Turns the raw header block of a window fetch into envelope fields and a
//! downloaded RFC822 source into display text, using `mailparse` for MIME
//! decoding and `ammonia` to strip markup from HTML-only messages.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use mailparse::{DispositionType, MailAddr, MailHeaderMap, ParsedMail};

use crate::errors::{AppError, AppResult};

/// Envelope fields extracted from a header block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedEnvelope {
    /// Decoded Subject; empty when missing
    pub subject: String,
    /// Bare address of the first From mailbox; empty when missing
    pub from: String,
    /// Bare addresses of every To mailbox, groups flattened
    pub to: Vec<String>,
    /// Date header, if present and parseable
    pub date: Option<DateTime<Utc>>,
}

/// Parse a `Date`/`From`/`To`/`Subject` header block
///
/// # Errors
///
/// - `Internal` if the block is not a header section at all
pub fn parse_envelope(header_bytes: &[u8]) -> AppResult<ParsedEnvelope> {
    let (headers, _) = mailparse::parse_headers(header_bytes)
        .map_err(|e| AppError::Internal(format!("failed to parse message headers: {e}")))?;

    let subject = headers.get_first_value("Subject").unwrap_or_default();
    let from = headers
        .get_first_header("From")
        .map(|h| addresses(h))
        .and_then(|list| list.into_iter().next())
        .unwrap_or_default();
    let to = headers
        .get_all_headers("To")
        .into_iter()
        .flat_map(addresses)
        .collect();
    let date = headers
        .get_first_value("Date")
        .and_then(|v| mailparse::dateparse(&v).ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

    Ok(ParsedEnvelope {
        subject: subject.trim().to_owned(),
        from,
        to,
        date,
    })
}

/// Addresses in an address-list header; falls back to the raw value when the
/// header does not parse as an address list
fn addresses(header: &mailparse::MailHeader<'_>) -> Vec<String> {
    match mailparse::addrparse_header(header) {
        Ok(list) => list
            .iter()
            .flat_map(|addr| match addr {
                MailAddr::Single(info) => vec![info.addr.clone()],
                MailAddr::Group(group) => group.addrs.iter().map(|i| i.addr.clone()).collect(),
            })
            .filter(|a| !a.is_empty())
            .collect(),
        Err(_) => {
            let raw = header.get_value();
            let raw = raw.trim();
            if raw.is_empty() {
                Vec::new()
            } else {
                vec![raw.to_owned()]
            }
        }
    }
}

/// Extract display text from a full RFC822 source
///
/// Prefers the first inline `text/plain` part; otherwise strips the tags of
/// the first inline `text/html` part. Attachments are skipped. A message
/// with neither yields an empty string.
///
/// # Errors
///
/// - `Internal` if `mailparse` cannot parse the message
pub fn extract_body_text(raw: &[u8]) -> AppResult<String> {
    let parsed = mailparse::parse_mail(raw)
        .map_err(|e| AppError::Internal(format!("failed to parse RFC822 message: {e}")))?;

    let mut body_text = None;
    let mut body_html = None;
    walk_parts(&parsed, &mut body_text, &mut body_html);

    Ok(body_text
        .or_else(|| body_html.map(|html| html_to_text(&html)))
        .unwrap_or_default())
}

/// Walk MIME part tree recursively, keeping the first text and HTML bodies
fn walk_parts(
    part: &ParsedMail<'_>,
    body_text: &mut Option<String>,
    body_html: &mut Option<String>,
) {
    if part.subparts.is_empty() {
        let ctype = part.ctype.mimetype.to_ascii_lowercase();
        let disp = part.get_content_disposition();
        if disp.disposition == DispositionType::Attachment
            || disp.params.contains_key("filename")
        {
            return;
        }

        if ctype == "text/plain"
            && body_text.is_none()
            && let Ok(text) = part.get_body()
        {
            *body_text = Some(text);
        }

        if ctype == "text/html"
            && body_html.is_none()
            && let Ok(html) = part.get_body()
        {
            *body_html = Some(html);
        }
        return;
    }

    for sub in &part.subparts {
        walk_parts(sub, body_text, body_html);
    }
}

/// Remove all markup, keeping text content
fn html_to_text(html: &str) -> String {
    ammonia::Builder::empty()
        .clean_content_tags(HashSet::from(["script", "style"]))
        .clean(html)
        .to_string()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncate string to maximum characters (Unicode-aware)
pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    input.chars().take(max_chars).collect()
}
