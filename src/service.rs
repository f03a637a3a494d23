//! Caller-facing mail operations
//!
//! Every operation takes credentials explicitly, opens its own session, does
//! its work and closes the session before returning, on success and on
//! error. Read operations degrade to partial or empty results when single
//! folders fail; session and mutation failures are returned.

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};

use crate::aggregate;
use crate::catalog::{self, Folder, FolderGroups};
use crate::config::ServerConfig;
use crate::errors::AppResult;
use crate::fetcher::{self, FolderMessage};
use crate::mutation::{self, SEEN};
use crate::session::{Connector, Credentials, Session};
use crate::thread::{self, Contact, SearchResult, Thread};

/// Folder the contact list is built from
const CONTACTS_FOLDER: &str = "INBOX";

/// Fetch sizes and fan-out settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    /// Messages per folder view
    pub folder: usize,
    /// Messages per folder for search, thread lookup and contacts
    pub search: usize,
    /// Sessions used at once by cross-folder operations
    pub concurrency: usize,
    pub subscribed_only: bool,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            folder: 50,
            search: 100,
            concurrency: 1,
            subscribed_only: true,
        }
    }
}

impl FetchLimits {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            folder: config.folder_limit,
            search: config.search_limit,
            concurrency: config.fetch_concurrency,
            subscribed_only: config.subscribed_only,
        }
    }
}

/// Result of an account check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountStatus {
    pub principal: String,
    /// Folders advertised by the server, before any filtering
    pub folder_count: usize,
    pub latency_ms: u64,
}

/// Mail operations for accounts reachable through one connector
#[derive(Debug, Clone)]
pub struct MailService<C: Connector> {
    connector: C,
    limits: FetchLimits,
}

impl<C: Connector> MailService<C> {
    pub fn new(connector: C, limits: FetchLimits) -> Self {
        Self { connector, limits }
    }

    async fn open(&self, credentials: &Credentials) -> AppResult<Session<C::Transport>> {
        Session::open(&self.connector, credentials).await
    }

    /// Connect, probe and disconnect
    pub async fn verify(&self, credentials: &Credentials) -> AppResult<AccountStatus> {
        let started = Instant::now();
        let mut session = self.open(credentials).await?;
        let result = match session.noop().await {
            Ok(()) => session.list_folder_entries().await,
            Err(e) => Err(e),
        };
        session.close().await;

        let entries = result?;
        Ok(AccountStatus {
            principal: credentials.principal.clone(),
            folder_count: entries.len(),
            latency_ms: duration_ms(started),
        })
    }

    pub async fn list_folders(&self, credentials: &Credentials) -> AppResult<Vec<Folder>> {
        let mut session = self.open(credentials).await?;
        let result = catalog::list_folders(&mut session, self.limits.subscribed_only).await;
        session.close().await;
        result
    }

    /// Folders split into INBOX/Sent/Drafts/Trash and the rest
    pub async fn list_folder_groups(&self, credentials: &Credentials) -> AppResult<FolderGroups> {
        self.list_folders(credentials)
            .await
            .map(catalog::partition_special)
    }

    /// Threads of the newest messages in one folder
    ///
    /// An unreadable folder yields no threads.
    pub async fn fetch_threads_for_folder(
        &self,
        credentials: &Credentials,
        folder: &str,
        limit: Option<usize>,
    ) -> AppResult<Vec<Thread>> {
        let limit = limit.unwrap_or(self.limits.folder);
        let messages = self.fetch_folder(credentials, folder, limit).await?;
        Ok(thread::group(messages))
    }

    /// One result per matching thread across every folder
    ///
    /// A blank query returns nothing without connecting.
    pub async fn search_threads(
        &self,
        credentials: &Credentials,
        query: &str,
    ) -> AppResult<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let messages = self.fetch_everywhere(credentials, self.limits.search).await?;
        Ok(thread::group_for_search(messages, query))
    }

    /// The thread with key `key`, looked up in `folder` or in every folder
    pub async fn get_thread(
        &self,
        credentials: &Credentials,
        key: &str,
        folder: Option<&str>,
    ) -> AppResult<Option<Thread>> {
        let messages = match folder {
            Some(folder) => {
                self.fetch_folder(credentials, folder, self.limits.search)
                    .await?
            }
            None => self.fetch_everywhere(credentials, self.limits.search).await?,
        };
        Ok(thread::find_thread(messages, key))
    }

    /// Distinct correspondents of recent INBOX messages
    pub async fn list_contacts(&self, credentials: &Credentials) -> AppResult<Vec<Contact>> {
        let messages = self
            .fetch_folder(credentials, CONTACTS_FOLDER, self.limits.search)
            .await?;
        Ok(thread::collect_contacts(&messages))
    }

    pub async fn delete_message(
        &self,
        credentials: &Credentials,
        folder: &str,
        uid: u32,
    ) -> AppResult<()> {
        let mut session = self.open(credentials).await?;
        let result = mutation::delete_message(&mut session, folder, uid).await;
        session.close().await;
        result
    }

    pub async fn move_message(
        &self,
        credentials: &Credentials,
        folder: &str,
        uid: u32,
        target: &str,
    ) -> AppResult<()> {
        let mut session = self.open(credentials).await?;
        let result = mutation::move_message(&mut session, folder, uid, target).await;
        session.close().await;
        result
    }

    pub async fn set_flag(
        &self,
        credentials: &Credentials,
        folder: &str,
        uid: u32,
        flag: &str,
        on: bool,
    ) -> AppResult<()> {
        let mut session = self.open(credentials).await?;
        let result = mutation::set_flag(&mut session, folder, uid, flag, on).await;
        session.close().await;
        result
    }

    pub async fn mark_read(
        &self,
        credentials: &Credentials,
        folder: &str,
        uid: u32,
    ) -> AppResult<()> {
        self.set_flag(credentials, folder, uid, SEEN, true).await
    }

    pub async fn mark_unread(
        &self,
        credentials: &Credentials,
        folder: &str,
        uid: u32,
    ) -> AppResult<()> {
        self.set_flag(credentials, folder, uid, SEEN, false).await
    }

    /// Newest `limit` messages of one folder, empty if the folder is unreadable
    async fn fetch_folder(
        &self,
        credentials: &Credentials,
        folder: &str,
        limit: usize,
    ) -> AppResult<Vec<FolderMessage>> {
        let mut session = self.open(credentials).await?;
        let result = fetcher::fetch_messages(&mut session, folder, limit).await;
        session.close().await;

        match result {
            Ok(messages) => Ok(FolderMessage::tag(folder, messages)),
            Err(e) if e.is_folder_local() => {
                warn!(folder, error = %e, "folder unavailable; returning no messages");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Newest `limit` messages of every catalog folder
    async fn fetch_everywhere(
        &self,
        credentials: &Credentials,
        limit: usize,
    ) -> AppResult<Vec<FolderMessage>> {
        let mut session = self.open(credentials).await?;

        if self.limits.concurrency <= 1 {
            let result =
                aggregate::fetch_all(&mut session, limit, self.limits.subscribed_only).await;
            session.close().await;
            return result;
        }

        let folders = catalog::list_folders(&mut session, self.limits.subscribed_only).await;
        session.close().await;
        let folders = folders?;
        debug!(
            folders = folders.len(),
            concurrency = self.limits.concurrency,
            "fetching folders in parallel"
        );
        Ok(aggregate::fetch_all_parallel(
            &self.connector,
            credentials,
            &folders,
            limit,
            self.limits.concurrency,
        )
        .await)
    }
}

fn duration_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
