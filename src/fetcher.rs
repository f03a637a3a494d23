//! Message fetcher: the most recent window of one folder
//!
//! Reads the folder's message count under a read-only lock, fetches envelope
//! data for the last `limit` sequence numbers, then downloads each body
//! separately. A body that cannot be downloaded leaves the message in the
//! result with an empty body.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};
use crate::mime;
use crate::session::{LockMode, MailTransport, RawEnvelope, Session};

/// A message as fetched from the server
///
/// `uid` only identifies the message together with the folder it was
/// fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub uid: u32,
    /// Decoded subject; empty when the message has none
    pub subject: String,
    /// Text body; empty when the download failed or the message has no text
    pub body: String,
    /// Sender address
    pub from: String,
    /// Recipient addresses in header order
    pub to: Vec<String>,
    pub date: DateTime<Utc>,
    /// Flags in protocol form, e.g. `\Seen`
    pub flags: Vec<String>,
}

impl Message {
    pub fn is_seen(&self) -> bool {
        self.flags.iter().any(|f| f.eq_ignore_ascii_case("\\Seen"))
    }
}

/// A message tagged with the folder it was fetched from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderMessage {
    pub folder: String,
    #[serde(flatten)]
    pub message: Message,
}

impl FolderMessage {
    pub fn tag(folder: &str, messages: Vec<Message>) -> Vec<Self> {
        messages
            .into_iter()
            .map(|message| Self {
                folder: folder.to_owned(),
                message,
            })
            .collect()
    }
}

/// Sequence range of the newest `limit` messages out of `exists`
///
/// Returns `None` when there is nothing to fetch.
pub fn fetch_window(exists: u32, limit: usize) -> Option<(u32, u32)> {
    if exists == 0 || limit == 0 {
        return None;
    }
    let limit = u32::try_from(limit).unwrap_or(u32::MAX);
    let first = exists.saturating_sub(limit).saturating_add(1).max(1);
    Some((first, exists))
}

/// Fetch the newest `limit` messages of `folder`, newest first
///
/// # Errors
///
/// - `FolderUnavailable` if the folder cannot be opened or its window
///   cannot be enumerated
/// - `Network` if the connection fails or times out, including during a
///   body download
pub async fn fetch_messages<T: MailTransport>(
    session: &mut Session<T>,
    folder: &str,
    limit: usize,
) -> AppResult<Vec<Message>> {
    let mut lock = session.lock_folder(folder, LockMode::ReadOnly).await?;
    let Some((first, last)) = fetch_window(lock.exists(), limit) else {
        return Ok(Vec::new());
    };

    let mut envelopes = lock
        .transport()
        .fetch_envelopes(first, last)
        .await
        .map_err(|e| match e {
            AppError::Network(_) => e,
            other => AppError::FolderUnavailable(format!("{folder}: {other}")),
        })?;

    let window = (last - first + 1) as usize;
    if envelopes.len() < window {
        // EXISTS may have shrunk between SELECT and FETCH; the window is not
        // re-read, so those messages are simply missing from this result.
        debug!(
            folder,
            expected = window,
            fetched = envelopes.len(),
            "fetch window returned fewer messages than requested"
        );
    }

    envelopes.sort_by(|a, b| b.seq.cmp(&a.seq));

    let fetched_at = Utc::now();
    let mut messages = Vec::with_capacity(envelopes.len());
    for envelope in envelopes {
        let body = match lock.transport().fetch_body(envelope.uid).await {
            Ok(raw) => mime::extract_body_text(&raw).unwrap_or_else(|e| {
                warn!(folder, uid = envelope.uid, error = %e, "failed to parse message body");
                String::new()
            }),
            Err(e @ AppError::Network(_)) => return Err(e),
            Err(e) => {
                warn!(folder, uid = envelope.uid, error = %e, "failed to download message body");
                String::new()
            }
        };
        messages.push(build_message(folder, envelope, body, fetched_at));
    }

    debug!(folder, count = messages.len(), "fetched folder window");
    Ok(messages)
}

/// Combine envelope data and body into a [`Message`]
///
/// The timestamp comes from the Date header, then INTERNALDATE, then the
/// time of the fetch.
fn build_message(
    folder: &str,
    envelope: RawEnvelope,
    body: String,
    fetched_at: DateTime<Utc>,
) -> Message {
    let parsed = mime::parse_envelope(&envelope.header).unwrap_or_else(|e| {
        warn!(folder, uid = envelope.uid, error = %e, "unparseable envelope; using defaults");
        mime::ParsedEnvelope::default()
    });

    Message {
        uid: envelope.uid,
        subject: parsed.subject,
        body,
        from: parsed.from,
        to: parsed.to,
        date: parsed
            .date
            .or(envelope.internal_date)
            .unwrap_or(fetched_at),
        flags: envelope.flags,
    }
}
