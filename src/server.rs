//! MCP server implementation with tool handlers
//!
//! Implements the `ServerHandler` trait and registers the mail tools. Handles
//! input validation, folder alias resolution and response formatting; the
//! mail work itself is delegated to [`MailService`].

use std::sync::Arc;
use std::time::Instant;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{ErrorData, ServerCapabilities, ServerInfo};
use rmcp::{Json, ServerHandler, tool, tool_handler, tool_router};
use tracing::info;

use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};
use crate::imap::ImapConnector;
use crate::message_ref::MessageRef;
use crate::models::{
    AccountCheck, AccountInfo, AccountList, AccountOnlyInput, ContactList, DeleteMessageInput,
    FolderList, GetThreadInput, ListThreadsInput, Meta, MoveMessageInput, MutationOutcome,
    SearchHit, SearchHits, SearchThreadsInput, SetFlagInput, ThreadDetail, ThreadList,
    ThreadView, ToolEnvelope, UpdateReadStateInput,
};
use crate::service::{FetchLimits, MailService};
use crate::session::Credentials;

/// Largest per-folder window a caller may request
const MAX_THREAD_LIMIT: usize = 500;
/// Largest body excerpt per message
const MAX_BODY_CHARS: usize = 20_000;
/// Longest accepted search query
const MAX_QUERY_CHARS: usize = 256;

/// Caller-facing folder names and the server folders they stand for
const FOLDER_ALIASES: [(&str, &str); 6] = [
    ("inbox", "INBOX"),
    ("sent", "Sent"),
    ("drafts", "Drafts"),
    ("trash", "Trash"),
    ("archive", "Archive"),
    ("starred", "Starred"),
];

/// Mail threads MCP server
#[derive(Clone)]
pub struct MailThreadsServer {
    /// Server config (accounts, timeouts, limits, write flag)
    config: Arc<ServerConfig>,
    /// Tool router for dispatching MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl MailThreadsServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            tool_router: Self::tool_router(),
        }
    }

    /// Tool: List configured accounts without credentials
    #[tool(
        name = "mail_list_accounts",
        description = "List configured mail accounts"
    )]
    async fn list_accounts(&self) -> Result<Json<ToolEnvelope<AccountList>>, ErrorData> {
        let started = Instant::now();
        let accounts = self
            .config
            .accounts
            .values()
            .map(|a| AccountInfo {
                account_id: a.account_id.clone(),
                host: a.host.clone(),
                port: a.port,
                secure: a.secure,
            })
            .collect::<Vec<_>>();
        finalize_tool(
            started,
            Ok((
                format!("{} account(s) configured", accounts.len()),
                AccountList { accounts },
            )),
        )
    }

    /// Tool: Connect, authenticate and log out
    #[tool(
        name = "mail_verify_account",
        description = "Verify that an account can connect and authenticate"
    )]
    async fn verify_account(
        &self,
        Parameters(input): Parameters<AccountOnlyInput>,
    ) -> Result<Json<ToolEnvelope<AccountCheck>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(started, self.verify_account_impl(input).await)
    }

    /// Tool: Folders with message counts, well-known folders first
    #[tool(
        name = "mail_list_folders",
        description = "List folders with message counts; INBOX, Sent, Drafts and Trash first"
    )]
    async fn list_folders(
        &self,
        Parameters(input): Parameters<AccountOnlyInput>,
    ) -> Result<Json<ToolEnvelope<FolderList>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(started, self.list_folders_impl(input).await)
    }

    /// Tool: Conversation threads of one folder
    ///
    /// Groups the newest messages of the folder by subject. An unreadable
    /// folder yields an empty list.
    #[tool(
        name = "mail_list_threads",
        description = "List subject threads built from the newest messages of a folder"
    )]
    async fn list_threads(
        &self,
        Parameters(input): Parameters<ListThreadsInput>,
    ) -> Result<Json<ToolEnvelope<ThreadList>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(started, self.list_threads_impl(input).await)
    }

    /// Tool: Substring search across every folder
    ///
    /// Returns one hit per thread, carrying the latest matching message.
    #[tool(
        name = "mail_search_threads",
        description = "Search all folders by subject, body, sender or recipient; one result per thread"
    )]
    async fn search_threads(
        &self,
        Parameters(input): Parameters<SearchThreadsInput>,
    ) -> Result<Json<ToolEnvelope<SearchHits>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(started, self.search_threads_impl(input).await)
    }

    /// Tool: All messages of one thread
    #[tool(
        name = "mail_get_thread",
        description = "Get every message of a thread, from one folder or from all folders"
    )]
    async fn get_thread(
        &self,
        Parameters(input): Parameters<GetThreadInput>,
    ) -> Result<Json<ToolEnvelope<ThreadDetail>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(started, self.get_thread_impl(input).await)
    }

    /// Tool: Correspondents of recent INBOX messages
    #[tool(
        name = "mail_list_contacts",
        description = "List distinct sender and recipient addresses of recent INBOX messages"
    )]
    async fn list_contacts(
        &self,
        Parameters(input): Parameters<AccountOnlyInput>,
    ) -> Result<Json<ToolEnvelope<ContactList>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(started, self.list_contacts_impl(input).await)
    }

    /// Tool: Mark a message read or unread
    ///
    /// Requires `MAIL_THREADS_WRITE_ENABLED=true`.
    #[tool(
        name = "mail_update_read_state",
        description = "Mark a message read or unread"
    )]
    async fn update_read_state(
        &self,
        Parameters(input): Parameters<UpdateReadStateInput>,
    ) -> Result<Json<ToolEnvelope<MutationOutcome>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(started, self.update_read_state_impl(input).await)
    }

    /// Tool: Add or remove one flag
    ///
    /// Requires `MAIL_THREADS_WRITE_ENABLED=true`.
    #[tool(name = "mail_set_flag", description = "Add or remove a message flag")]
    async fn set_flag(
        &self,
        Parameters(input): Parameters<SetFlagInput>,
    ) -> Result<Json<ToolEnvelope<MutationOutcome>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(started, self.set_flag_impl(input).await)
    }

    /// Tool: Move a message to another folder
    ///
    /// The message gets a new UID in the destination, so the old reference
    /// stops working. Requires `MAIL_THREADS_WRITE_ENABLED=true`.
    #[tool(
        name = "mail_move_message",
        description = "Move a message to another folder"
    )]
    async fn move_message(
        &self,
        Parameters(input): Parameters<MoveMessageInput>,
    ) -> Result<Json<ToolEnvelope<MutationOutcome>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(started, self.move_message_impl(input).await)
    }

    /// Tool: Delete a message permanently
    ///
    /// Requires explicit `confirm=true` and `MAIL_THREADS_WRITE_ENABLED=true`.
    #[tool(name = "mail_delete_message", description = "Delete a message")]
    async fn delete_message(
        &self,
        Parameters(input): Parameters<DeleteMessageInput>,
    ) -> Result<Json<ToolEnvelope<MutationOutcome>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(started, self.delete_message_impl(input).await)
    }
}

/// MCP server handler implementation
#[tool_handler(router = self.tool_router)]
impl ServerHandler for MailThreadsServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build()).with_instructions(
            "Mail threads MCP server. Messages are grouped into threads by subject. Read tools are enabled by default; write tools require MAIL_THREADS_WRITE_ENABLED=true.",
        )
    }
}

/// Tool implementation methods
///
/// Each returns the response summary and payload; the `#[tool]` methods
/// above wrap them in the response envelope.
impl MailThreadsServer {
    async fn verify_account_impl(
        &self,
        input: AccountOnlyInput,
    ) -> AppResult<(String, AccountCheck)> {
        let (service, credentials) = self.service_for(&input.account_id)?;
        let status = service.verify(&credentials).await?;
        Ok((
            "Account verification succeeded".to_owned(),
            AccountCheck::new(&input.account_id, status),
        ))
    }

    async fn list_folders_impl(&self, input: AccountOnlyInput) -> AppResult<(String, FolderList)> {
        let (service, credentials) = self.service_for(&input.account_id)?;
        let groups = service.list_folder_groups(&credentials).await?;
        let data = FolderList {
            account_id: input.account_id.clone(),
            special: groups.special.into_iter().map(Into::into).collect(),
            other: groups.other.into_iter().map(Into::into).collect(),
        };
        Ok((
            format!("{} folder(s)", data.special.len() + data.other.len()),
            data,
        ))
    }

    async fn list_threads_impl(&self, input: ListThreadsInput) -> AppResult<(String, ThreadList)> {
        let folder = resolve_folder(&input.folder);
        validate_folder(&folder)?;
        if let Some(limit) = input.limit {
            validate_range(limit, 1, MAX_THREAD_LIMIT, "limit")?;
        }
        validate_range(input.body_max_chars, 0, MAX_BODY_CHARS, "body_max_chars")?;

        let (service, credentials) = self.service_for(&input.account_id)?;
        let threads = service
            .fetch_threads_for_folder(&credentials, &folder, input.limit)
            .await?;
        let threads = threads
            .iter()
            .map(|t| ThreadView::new(&input.account_id, t, input.body_max_chars))
            .collect::<Vec<_>>();
        Ok((
            format!("{} thread(s) in {folder}", threads.len()),
            ThreadList {
                account_id: input.account_id.clone(),
                folder,
                threads,
            },
        ))
    }

    async fn search_threads_impl(
        &self,
        input: SearchThreadsInput,
    ) -> AppResult<(String, SearchHits)> {
        validate_query(&input.query)?;
        validate_range(input.body_max_chars, 0, MAX_BODY_CHARS, "body_max_chars")?;

        let (service, credentials) = self.service_for(&input.account_id)?;
        let results = service
            .search_threads(&credentials, &input.query)
            .await?
            .into_iter()
            .map(|r| SearchHit::new(&input.account_id, r, input.body_max_chars))
            .collect::<Vec<_>>();
        Ok((
            format!("{} matching thread(s)", results.len()),
            SearchHits {
                account_id: input.account_id.clone(),
                query: input.query.clone(),
                results,
            },
        ))
    }

    async fn get_thread_impl(&self, input: GetThreadInput) -> AppResult<(String, ThreadDetail)> {
        validate_thread_key(&input.thread_key)?;
        validate_range(input.body_max_chars, 0, MAX_BODY_CHARS, "body_max_chars")?;
        let folder = input.folder.as_deref().map(resolve_folder);
        if let Some(folder) = &folder {
            validate_folder(folder)?;
        }

        let (service, credentials) = self.service_for(&input.account_id)?;
        let thread = service
            .get_thread(&credentials, &input.thread_key, folder.as_deref())
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("no thread with key '{}'", input.thread_key))
            })?;
        let view = ThreadView::new(&input.account_id, &thread, input.body_max_chars);
        Ok((
            format!("{} message(s) in thread", view.message_count),
            ThreadDetail {
                account_id: input.account_id.clone(),
                thread: view,
            },
        ))
    }

    async fn list_contacts_impl(
        &self,
        input: AccountOnlyInput,
    ) -> AppResult<(String, ContactList)> {
        let (service, credentials) = self.service_for(&input.account_id)?;
        let contacts = service
            .list_contacts(&credentials)
            .await?
            .into_iter()
            .map(Into::into)
            .collect::<Vec<_>>();
        Ok((
            format!("{} contact(s)", contacts.len()),
            ContactList {
                account_id: input.account_id.clone(),
                contacts,
            },
        ))
    }

    async fn update_read_state_impl(
        &self,
        input: UpdateReadStateInput,
    ) -> AppResult<(String, MutationOutcome)> {
        require_write_enabled(&self.config)?;
        let msg = parse_message_ref(&input.account_id, &input.message_ref)?;
        let (service, credentials) = self.service_for(&input.account_id)?;
        if input.read {
            service.mark_read(&credentials, &msg.folder, msg.uid).await?;
        } else {
            service.mark_unread(&credentials, &msg.folder, msg.uid).await?;
        }
        let state = if input.read { "read" } else { "unread" };
        Ok((format!("Message marked {state}"), outcome(&msg, None)))
    }

    async fn set_flag_impl(&self, input: SetFlagInput) -> AppResult<(String, MutationOutcome)> {
        require_write_enabled(&self.config)?;
        validate_flag(&input.flag)?;
        let msg = parse_message_ref(&input.account_id, &input.message_ref)?;
        let (service, credentials) = self.service_for(&input.account_id)?;
        service
            .set_flag(&credentials, &msg.folder, msg.uid, &input.flag, input.enabled)
            .await?;
        let verb = if input.enabled { "set" } else { "cleared" };
        Ok((format!("Flag {} {verb}", input.flag), outcome(&msg, None)))
    }

    async fn move_message_impl(
        &self,
        input: MoveMessageInput,
    ) -> AppResult<(String, MutationOutcome)> {
        require_write_enabled(&self.config)?;
        let msg = parse_message_ref(&input.account_id, &input.message_ref)?;
        let destination = resolve_folder(&input.destination_folder);
        validate_folder(&destination)?;
        if destination == msg.folder {
            return Err(AppError::invalid(
                "destination_folder must differ from the message's folder",
            ));
        }
        let (service, credentials) = self.service_for(&input.account_id)?;
        service
            .move_message(&credentials, &msg.folder, msg.uid, &destination)
            .await?;
        Ok((
            format!("Message moved to {destination}"),
            outcome(&msg, Some(destination)),
        ))
    }

    async fn delete_message_impl(
        &self,
        input: DeleteMessageInput,
    ) -> AppResult<(String, MutationOutcome)> {
        require_write_enabled(&self.config)?;
        if !input.confirm {
            return Err(AppError::invalid("delete requires confirm=true"));
        }
        let msg = parse_message_ref(&input.account_id, &input.message_ref)?;
        let (service, credentials) = self.service_for(&input.account_id)?;
        service
            .delete_message(&credentials, &msg.folder, msg.uid)
            .await?;
        Ok(("Message deleted".to_owned(), outcome(&msg, None)))
    }

    /// Service and credentials for a configured account
    fn service_for(
        &self,
        account_id: &str,
    ) -> AppResult<(MailService<ImapConnector>, Credentials)> {
        validate_account_id(account_id)?;
        let account = self.config.get_account(account_id)?;
        info!(account_id, host = %account.host, "dispatching mail operation");
        Ok((
            MailService::new(
                ImapConnector::new(&self.config, account),
                FetchLimits::from_config(&self.config),
            ),
            account.credentials(),
        ))
    }
}

fn outcome(msg: &MessageRef, destination_folder: Option<String>) -> MutationOutcome {
    MutationOutcome {
        account_id: msg.account_id.clone(),
        message_ref: msg.encode(),
        folder: msg.folder.clone(),
        destination_folder,
    }
}

/// Calculate elapsed milliseconds
fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

/// Build a standardized MCP tool response envelope from business logic output
fn finalize_tool<T>(
    started: Instant,
    result: AppResult<(String, T)>,
) -> Result<Json<ToolEnvelope<T>>, ErrorData>
where
    T: schemars::JsonSchema,
{
    match result {
        Ok((summary, data)) => Ok(Json(ToolEnvelope {
            summary,
            data,
            meta: Meta::now(duration_ms(started)),
        })),
        Err(e) => Err(e.to_error_data()),
    }
}

/// Map a caller-facing alias to the server folder; other names pass through
fn resolve_folder(folder: &str) -> String {
    let trimmed = folder.trim();
    FOLDER_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(trimmed))
        .map_or_else(|| trimmed.to_owned(), |(_, server)| (*server).to_owned())
}

/// Parse a message reference and enforce that it belongs to `account_id`
fn parse_message_ref(account_id: &str, raw: &str) -> AppResult<MessageRef> {
    validate_account_id(account_id)?;
    let msg = MessageRef::parse(raw)?;
    validate_folder(&msg.folder)?;
    if msg.account_id != account_id {
        return Err(AppError::invalid(
            "message_ref account does not match account_id",
        ));
    }
    Ok(msg)
}

/// Validate account_id format
fn validate_account_id(account_id: &str) -> AppResult<()> {
    if account_id.is_empty() || account_id.len() > 64 {
        return Err(AppError::invalid("account_id must be 1..64 characters"));
    }
    if !account_id
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
    {
        return Err(AppError::invalid("account_id must match [A-Za-z0-9_-]+"));
    }
    Ok(())
}

/// Validate folder name format
fn validate_folder(folder: &str) -> AppResult<()> {
    if folder.is_empty() || folder.len() > 256 {
        return Err(AppError::invalid("folder must be 1..256 characters"));
    }
    validate_no_controls(folder, "folder")
}

fn validate_thread_key(key: &str) -> AppResult<()> {
    if key.trim().is_empty() || key.len() > 998 {
        return Err(AppError::invalid("thread_key must be 1..998 characters"));
    }
    validate_no_controls(key, "thread_key")
}

/// Blank queries are accepted and match nothing
fn validate_query(query: &str) -> AppResult<()> {
    if query.chars().count() > MAX_QUERY_CHARS {
        return Err(AppError::invalid(format!(
            "query must be at most {MAX_QUERY_CHARS} characters"
        )));
    }
    validate_no_controls(query, "query")
}

/// Reject control characters in user-provided values
fn validate_no_controls(value: &str, field: &str) -> AppResult<()> {
    if value.chars().any(|ch| ch.is_ascii_control()) {
        return Err(AppError::InvalidInput(format!(
            "{field} must not contain control characters"
        )));
    }
    Ok(())
}

/// Validate numeric value in range
fn validate_range(value: usize, min: usize, max: usize, field: &str) -> AppResult<()> {
    if value < min || value > max {
        return Err(AppError::InvalidInput(format!(
            "{field} must be in range {min}..{max}"
        )));
    }
    Ok(())
}

/// Validate a flag as a system flag (`\Seen`) or keyword atom
fn validate_flag(flag: &str) -> AppResult<()> {
    let invalid = || {
        AppError::InvalidInput(format!(
            "invalid flag '{flag}'; flags must not contain whitespace, control chars, quotes, parentheses, or braces"
        ))
    };
    if flag.is_empty() || flag.len() > 64 {
        return Err(invalid());
    }

    let atom = match flag.strip_prefix('\\') {
        Some("") => return Err(invalid()),
        Some(rest) => rest,
        None => flag,
    };

    if atom.chars().any(|ch| {
        ch.is_ascii_control()
            || ch.is_ascii_whitespace()
            || matches!(ch, '"' | '(' | ')' | '{' | '}' | '\\' | '%' | '*' | ']')
    }) {
        return Err(invalid());
    }

    Ok(())
}

/// Check if write operations are enabled
fn require_write_enabled(config: &ServerConfig) -> AppResult<()> {
    if !config.write_enabled {
        return Err(AppError::invalid(
            "write tools are disabled; set MAIL_THREADS_WRITE_ENABLED=true",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{
        parse_message_ref, require_write_enabled, resolve_folder, validate_account_id,
        validate_flag, validate_folder, validate_query, validate_range,
    };
    use crate::config::ServerConfig;

    fn config(write_enabled: bool) -> ServerConfig {
        ServerConfig {
            accounts: BTreeMap::new(),
            write_enabled,
            connect_timeout_ms: 30_000,
            greeting_timeout_ms: 15_000,
            socket_timeout_ms: 300_000,
            folder_limit: 50,
            search_limit: 100,
            fetch_concurrency: 1,
            subscribed_only: true,
        }
    }

    #[test]
    fn aliases_map_to_server_folders() {
        assert_eq!(resolve_folder("inbox"), "INBOX");
        assert_eq!(resolve_folder("Sent"), "Sent");
        assert_eq!(resolve_folder("TRASH"), "Trash");
        assert_eq!(resolve_folder("starred"), "Starred");
        assert_eq!(resolve_folder("Projects/2026"), "Projects/2026");
    }

    #[test]
    fn rejects_control_chars_in_folder() {
        let err = validate_folder("INBOX\r").expect_err("must fail");
        assert!(err.to_string().contains("control characters"));
    }

    #[test]
    fn account_id_charset_is_enforced() {
        validate_account_id("work-2").expect("valid id");
        assert!(validate_account_id("").is_err());
        assert!(validate_account_id("a b").is_err());
    }

    #[test]
    fn validate_flag_allows_common_flags() {
        validate_flag("\\Seen").expect("system flag must be valid");
        validate_flag("\\Flagged").expect("system flag must be valid");
        validate_flag("$MailFlagBit0").expect("keyword flag must be valid");
    }

    #[test]
    fn validate_flag_rejects_injection_like_value() {
        let err = validate_flag("\\Seen) UID FETCH 1:* (BODY[]").expect_err("must fail");
        assert!(err.to_string().contains("invalid flag"));
        assert!(validate_flag("\\").is_err());
    }

    #[test]
    fn query_may_be_blank_but_not_oversized() {
        validate_query("").expect("blank query is allowed");
        assert!(validate_query(&"x".repeat(300)).is_err());
        assert!(validate_query("a\nb").is_err());
    }

    #[test]
    fn ranges_are_inclusive() {
        validate_range(1, 1, 500, "limit").expect("lower bound");
        validate_range(500, 1, 500, "limit").expect("upper bound");
        assert!(validate_range(0, 1, 500, "limit").is_err());
    }

    #[test]
    fn message_ref_must_match_account() {
        let msg = parse_message_ref("default", "mail:default:INBOX:5").expect("valid");
        assert_eq!(msg.folder, "INBOX");
        let err = parse_message_ref("work", "mail:default:INBOX:5").expect_err("must fail");
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn write_tools_require_opt_in() {
        let err = require_write_enabled(&config(false)).expect_err("must fail");
        assert!(err.to_string().contains("MAIL_THREADS_WRITE_ENABLED"));
        require_write_enabled(&config(true)).expect("enabled");
    }
}
