//! Session manager: one authenticated connection, one folder lock at a time
//!
//! The protocol is reached through two seams. [`Connector`] opens and
//! authenticates a connection; [`MailTransport`] is the small set of
//! protocol commands the engine needs on an open connection. The IMAP
//! implementation lives in [`crate::imap`]; tests drive the same code through
//! an in-memory transport.
//!
//! A [`Session`] moves through `Connected → (FolderLocked ↔ Connected) →
//! Disconnected`. Folder access is only possible through a [`FolderLock`]
//! guard, which mutably borrows the session, so two locks can never be held
//! at once. Dropping the guard releases the lock on every exit path,
//! including `?` returns and cancelled futures.

use std::fmt;
use std::future::Future;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};

/// Principal and secret used to authenticate a session
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Login name, usually the mailbox address
    pub principal: String,
    /// Password, never logged
    pub secret: SecretString,
}

/// How a folder is opened while locked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// `EXAMINE`: reading never changes `\Seen`
    ReadOnly,
    /// `SELECT`: required for flag changes, moves and deletes
    ReadWrite,
}

/// Direction of a flag update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOp {
    Add,
    Remove,
}

/// A folder as advertised by the server's LIST/LSUB responses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderEntry {
    /// Decoded (UTF-8) folder path
    pub name: String,
    pub subscribed: bool,
    /// False for `\Noselect` containers
    pub selectable: bool,
}

/// Per-message data returned by the window fetch, before header parsing
#[derive(Debug, Clone)]
pub struct RawEnvelope {
    /// Message sequence number inside the selected folder
    pub seq: u32,
    pub uid: u32,
    /// Raw `Date`, `From`, `To` and `Subject` header lines
    pub header: Vec<u8>,
    /// Flags in protocol form (`\Seen`, `\Flagged`, keywords)
    pub flags: Vec<String>,
    pub internal_date: Option<DateTime<Utc>>,
}

/// Protocol commands available on an authenticated connection
///
/// Folder-scoped commands (`fetch_envelopes`, `fetch_body`, the mutations)
/// act on the folder most recently passed to `select`. Only
/// [`FolderLock`] calls them, which keeps the selection and the lock in step.
pub trait MailTransport: Send {
    /// LIST and LSUB merged, in server LIST order
    fn list_folders(&mut self) -> impl Future<Output = AppResult<Vec<FolderEntry>>> + Send;

    /// Open `folder` and return its message count (EXISTS)
    fn select(
        &mut self,
        folder: &str,
        mode: LockMode,
    ) -> impl Future<Output = AppResult<u32>> + Send;

    /// Envelope data for sequence numbers `first..=last`
    fn fetch_envelopes(
        &mut self,
        first: u32,
        last: u32,
    ) -> impl Future<Output = AppResult<Vec<RawEnvelope>>> + Send;

    /// Full RFC822 source of one message
    fn fetch_body(&mut self, uid: u32) -> impl Future<Output = AppResult<Vec<u8>>> + Send;

    fn store_flag(
        &mut self,
        uid: u32,
        op: FlagOp,
        flag: &str,
    ) -> impl Future<Output = AppResult<()>> + Send;

    /// Whether the server advertises the MOVE extension
    fn supports_move(&mut self) -> impl Future<Output = AppResult<bool>> + Send;

    fn move_message(
        &mut self,
        uid: u32,
        target: &str,
    ) -> impl Future<Output = AppResult<()>> + Send;

    fn copy_message(
        &mut self,
        uid: u32,
        target: &str,
    ) -> impl Future<Output = AppResult<()>> + Send;

    /// Permanently remove `uid` if it carries `\Deleted`
    fn expunge(&mut self, uid: u32) -> impl Future<Output = AppResult<()>> + Send;

    /// Liveness probe
    fn noop(&mut self) -> impl Future<Output = AppResult<()>> + Send;

    fn logout(&mut self) -> impl Future<Output = AppResult<()>> + Send;
}

/// Opens authenticated transports
pub trait Connector: Send + Sync {
    type Transport: MailTransport;

    /// # Errors
    ///
    /// - `AuthFailed` if the server rejects the credentials
    /// - `Network` if the server is unreachable or a timeout elapses
    fn connect(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = AppResult<Self::Transport>> + Send;
}

/// Lifecycle of a [`Session`]
///
/// There is no `Unconnected` value: a session only exists once
/// [`Session::open`] has succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    FolderLocked,
    Disconnected,
}

/// One authenticated connection owned by a single logical operation
pub struct Session<T: MailTransport> {
    transport: Option<T>,
    state: SessionState,
    principal: String,
}

impl<T: MailTransport> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("principal", &self.principal)
            .field("state", &self.state)
            .finish()
    }
}

impl<T: MailTransport> Session<T> {
    /// Connect and authenticate
    pub async fn open<C>(connector: &C, credentials: &Credentials) -> AppResult<Self>
    where
        C: Connector<Transport = T>,
    {
        let transport = connector.connect(credentials).await?;
        debug!(principal = %credentials.principal, "session opened");
        Ok(Self {
            transport: Some(transport),
            state: SessionState::Connected,
            principal: credentials.principal.clone(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Lock `folder` for exactly one operation
    ///
    /// The returned guard is the only way to reach folder-scoped commands.
    ///
    /// # Errors
    ///
    /// - `Lock` if the session is closed or a lock is somehow still held
    /// - `Network` if the server stops responding
    /// - `FolderUnavailable` if the server refuses to open the folder
    pub async fn lock_folder(
        &mut self,
        folder: &str,
        mode: LockMode,
    ) -> AppResult<FolderLock<'_, T>> {
        match self.state {
            SessionState::Connected => {}
            SessionState::FolderLocked => {
                return Err(AppError::Lock(format!(
                    "cannot lock '{folder}' while another folder is locked"
                )));
            }
            SessionState::Disconnected => {
                return Err(AppError::Lock(format!(
                    "cannot lock '{folder}' on a closed session"
                )));
            }
        }

        let Self {
            transport, state, ..
        } = self;
        let transport = transport
            .as_mut()
            .ok_or_else(|| AppError::Lock("session has no transport".to_owned()))?;

        let exists = transport
            .select(folder, mode)
            .await
            .map_err(|e| match e {
                AppError::Network(_) => e,
                other => AppError::FolderUnavailable(format!("{folder}: {other}")),
            })?;

        *state = SessionState::FolderLocked;
        debug!(folder, ?mode, exists, "folder locked");
        Ok(FolderLock {
            transport,
            state,
            folder: folder.to_owned(),
            exists,
        })
    }

    /// Liveness probe outside of any folder
    pub async fn noop(&mut self) -> AppResult<()> {
        match self.transport.as_mut() {
            Some(transport) => transport.noop().await,
            None => Err(AppError::Lock("session is closed".to_owned())),
        }
    }

    /// Read the folder list; needs no lock
    pub async fn list_folder_entries(&mut self) -> AppResult<Vec<FolderEntry>> {
        match self.transport.as_mut() {
            Some(transport) => transport.list_folders().await,
            None => Err(AppError::Lock("session is closed".to_owned())),
        }
    }

    /// Log out and disconnect
    ///
    /// Idempotent. A failing LOGOUT is logged, not returned: the connection is
    /// dropped either way.
    pub async fn close(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        self.state = SessionState::Disconnected;
        if let Err(e) = transport.logout().await {
            warn!(principal = %self.principal, error = %e, "logout failed; dropping connection");
        } else {
            debug!(principal = %self.principal, "session closed");
        }
    }
}

impl<T: MailTransport> Drop for Session<T> {
    fn drop(&mut self) {
        if self.transport.is_some() {
            debug!(
                principal = %self.principal,
                "session dropped without logout; closing connection"
            );
        }
    }
}

/// Exclusive access to one selected folder
///
/// Released when dropped.
pub struct FolderLock<'a, T: MailTransport> {
    transport: &'a mut T,
    state: &'a mut SessionState,
    folder: String,
    exists: u32,
}

impl<T: MailTransport> fmt::Debug for FolderLock<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FolderLock")
            .field("folder", &self.folder)
            .field("exists", &self.exists)
            .finish()
    }
}

impl<T: MailTransport> FolderLock<'_, T> {
    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// Message count reported when the folder was opened
    pub fn exists(&self) -> u32 {
        self.exists
    }

    pub fn transport(&mut self) -> &mut T {
        self.transport
    }
}

impl<T: MailTransport> Drop for FolderLock<'_, T> {
    fn drop(&mut self) {
        if *self.state == SessionState::FolderLocked {
            *self.state = SessionState::Connected;
        }
        debug!(folder = %self.folder, "folder released");
    }
}
