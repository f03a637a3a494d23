//! Input/output DTOs and schema-bearing types
//!
//! Defines all data structures used in MCP tool contracts. Each type is
//! annotated with `JsonSchema` for automatic schema generation.

use chrono::{DateTime, SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::catalog::Folder;
use crate::fetcher::FolderMessage;
use crate::message_ref::MessageRef;
use crate::mime;
use crate::service::AccountStatus;
use crate::thread::{Contact, SearchResult, Thread};

/// Metadata included in all tool responses
///
/// Provides timing information and current UTC timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Meta {
    /// Current UTC timestamp in RFC 3339 format with milliseconds
    pub now_utc: String,
    /// Tool execution duration in milliseconds
    pub duration_ms: u64,
}

impl Meta {
    /// Create metadata populated with current time and elapsed duration
    pub fn now(duration_ms: u64) -> Self {
        Self {
            now_utc: rfc3339(Utc::now()),
            duration_ms,
        }
    }
}

/// Standard response envelope for all tools
///
/// Wraps tool-specific data with human-readable summary and execution metadata.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolEnvelope<T>
where
    T: JsonSchema,
{
    /// Human-readable summary of the operation outcome
    pub summary: String,
    /// Tool-specific data payload
    pub data: T,
    /// Execution metadata (timestamp, duration)
    pub meta: Meta,
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Account metadata (no credentials)
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AccountInfo {
    pub account_id: String,
    pub host: String,
    pub port: u16,
    /// Always true; plaintext connections are refused
    pub secure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AccountList {
    pub accounts: Vec<AccountInfo>,
}

/// Outcome of `mail_verify_account`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AccountCheck {
    pub account_id: String,
    pub ok: bool,
    pub user: String,
    /// Folders advertised by the server
    pub folder_count: usize,
    pub latency_ms: u64,
}

impl AccountCheck {
    pub fn new(account_id: &str, status: AccountStatus) -> Self {
        Self {
            account_id: account_id.to_owned(),
            ok: true,
            user: status.principal,
            folder_count: status.folder_count,
            latency_ms: status.latency_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FolderInfo {
    /// Server folder path, e.g. `INBOX` or `Projects/2026`
    pub name: String,
    pub message_count: u32,
}

impl From<Folder> for FolderInfo {
    fn from(folder: Folder) -> Self {
        Self {
            name: folder.name,
            message_count: folder.message_count,
        }
    }
}

/// Folder listing with INBOX, Sent, Drafts and Trash split out
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FolderList {
    pub account_id: String,
    pub special: Vec<FolderInfo>,
    pub other: Vec<FolderInfo>,
}

/// One message as shown inside a thread or search hit
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MessageView {
    /// Reference accepted by the write tools (`mail:{account}:{folder}:{uid}`)
    pub message_ref: String,
    pub folder: String,
    pub uid: u32,
    pub subject: String,
    pub from: String,
    pub to: Vec<String>,
    /// RFC 3339 timestamp
    pub date: String,
    pub flags: Vec<String>,
    pub seen: bool,
    /// Text body, truncated to `body_max_chars`
    pub body: String,
}

impl MessageView {
    pub fn new(account_id: &str, message: &FolderMessage, body_max_chars: usize) -> Self {
        let FolderMessage { folder, message } = message;
        Self {
            message_ref: MessageRef::new(account_id, folder, message.uid).encode(),
            folder: folder.clone(),
            uid: message.uid,
            subject: message.subject.clone(),
            from: message.from.clone(),
            to: message.to.clone(),
            date: rfc3339(message.date),
            flags: message.flags.clone(),
            seen: message.is_seen(),
            body: mime::truncate_chars(&message.body, body_max_chars),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ThreadView {
    /// Lower-cased subject; pass to `mail_get_thread`
    pub thread_key: String,
    pub subject: String,
    /// RFC 3339 timestamp of the newest message
    pub latest_activity: String,
    pub message_count: usize,
    pub unread_count: usize,
    /// Messages, oldest first
    pub messages: Vec<MessageView>,
}

impl ThreadView {
    pub fn new(account_id: &str, thread: &Thread, body_max_chars: usize) -> Self {
        Self {
            thread_key: thread.key.clone(),
            subject: thread.subject.clone(),
            latest_activity: rfc3339(thread.latest_activity),
            message_count: thread.messages.len(),
            unread_count: thread.unread_count(),
            messages: thread
                .messages
                .iter()
                .map(|m| MessageView::new(account_id, m, body_max_chars))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ThreadList {
    pub account_id: String,
    pub folder: String,
    pub threads: Vec<ThreadView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchHit {
    pub thread_key: String,
    pub subject: String,
    /// Folder holding the latest matching message
    pub folder: String,
    pub latest_activity: String,
    pub latest: MessageView,
}

impl SearchHit {
    pub fn new(account_id: &str, result: SearchResult, body_max_chars: usize) -> Self {
        let latest = FolderMessage {
            folder: result.folder,
            message: result.latest,
        };
        Self {
            thread_key: result.key,
            subject: result.subject,
            folder: latest.folder.clone(),
            latest_activity: rfc3339(result.latest_activity),
            latest: MessageView::new(account_id, &latest, body_max_chars),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchHits {
    pub account_id: String,
    pub query: String,
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ThreadDetail {
    pub account_id: String,
    pub thread: ThreadView,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ContactInfo {
    pub email: String,
    /// Guessed from the address local part
    pub first_name: String,
    pub last_name: String,
}

impl From<Contact> for ContactInfo {
    fn from(contact: Contact) -> Self {
        Self {
            email: contact.email,
            first_name: contact.first_name,
            last_name: contact.last_name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ContactList {
    pub account_id: String,
    pub contacts: Vec<ContactInfo>,
}

/// Result of a write tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MutationOutcome {
    pub account_id: String,
    pub message_ref: String,
    pub folder: String,
    /// Destination folder for moves
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_folder: Option<String>,
}

/// Input: account_id only
///
/// Used by `mail_verify_account`, `mail_list_folders`, and
/// `mail_list_contacts`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AccountOnlyInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
}

/// Input: threads of one folder
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListThreadsInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Folder name or alias (`inbox`, `sent`, `drafts`, `trash`, `archive`, `starred`)
    #[serde(default = "default_folder")]
    pub folder: String,
    /// Newest messages to group (1..500, default from server config)
    pub limit: Option<usize>,
    /// Maximum body characters per message (0..20000, default 500)
    #[serde(default = "default_body_max_chars")]
    pub body_max_chars: usize,
}

/// Input: substring search across all folders
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchThreadsInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Case-insensitive text matched against subject, body, sender and recipients
    pub query: String,
    /// Maximum body characters in each result (0..20000, default 500)
    #[serde(default = "default_body_max_chars")]
    pub body_max_chars: usize,
}

/// Input: one thread by key
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetThreadInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Thread key as returned by the listing tools (matching ignores case)
    pub thread_key: String,
    /// Restrict the lookup to one folder or alias; all folders when omitted
    pub folder: Option<String>,
    /// Maximum body characters per message (0..20000, default 500)
    #[serde(default = "default_body_max_chars")]
    pub body_max_chars: usize,
}

/// Input: mark a message read or unread
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UpdateReadStateInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Message reference (`mail:{account}:{folder}:{uid}`)
    pub message_ref: String,
    /// `true` sets `\Seen`, `false` clears it
    pub read: bool,
}

/// Input: set or clear one flag
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SetFlagInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Message reference (`mail:{account}:{folder}:{uid}`)
    pub message_ref: String,
    /// Flag atom, e.g. `\Flagged` or a keyword like `Important`
    pub flag: String,
    /// `true` adds the flag, `false` removes it
    pub enabled: bool,
}

/// Input: move a message to another folder
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MoveMessageInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Message reference (`mail:{account}:{folder}:{uid}`)
    pub message_ref: String,
    /// Destination folder name or alias
    pub destination_folder: String,
}

/// Input: delete message
///
/// Requires explicit `confirm=true`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DeleteMessageInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Message reference (`mail:{account}:{folder}:{uid}`)
    pub message_ref: String,
    /// Explicit confirmation required (must be `true`)
    pub confirm: bool,
}

/// Default value for `account_id` field
pub fn default_account_id() -> String {
    "default".to_owned()
}

fn default_folder() -> String {
    "inbox".to_owned()
}

/// Default value for `body_max_chars`
///
/// Threads carry many messages, so bodies are kept short unless asked for.
fn default_body_max_chars() -> usize {
    500
}
