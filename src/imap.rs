//! IMAP transport over TLS
//!
//! Implements [`Connector`] and [`MailTransport`] with timeout-bounded
//! wrappers around `async-imap` operations. All connections use TLS, and every
//! timeout surfaces as `AppError::Network`. Folder names cross this boundary
//! in modified UTF-7 on the wire and UTF-8 everywhere else.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_imap::error::Error as ImapError;
use async_imap::types::{Fetch, Flag, NameAttribute};
use async_imap::{Client, Session};
use chrono::Utc;
use futures::TryStreamExt;
use rustls::ClientConfig;
use rustls::RootCertStore;
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::warn;
use utf7_imap::{decode_utf7_imap, encode_utf7_imap};

use crate::config::{AccountConfig, ServerConfig};
use crate::errors::{AppError, AppResult};
use crate::session::{
    Connector, Credentials, FlagOp, FolderEntry, LockMode, MailTransport, RawEnvelope,
};

/// Type alias for authenticated IMAP session over TLS
pub type ImapSession = Session<tokio_rustls::client::TlsStream<TcpStream>>;

/// Attributes requested for every message in a fetch window
///
/// `BODY.PEEK` keeps the fetch from setting `\Seen`.
const ENVELOPE_QUERY: &str =
    "(UID FLAGS INTERNALDATE BODY.PEEK[HEADER.FIELDS (DATE FROM TO SUBJECT)])";

/// Connection parameters for one account's server
#[derive(Debug, Clone)]
pub struct ImapConnector {
    host: String,
    port: u16,
    secure: bool,
    connect_timeout: Duration,
    greeting_timeout: Duration,
    socket_timeout: Duration,
}

impl ImapConnector {
    pub fn new(server: &ServerConfig, account: &AccountConfig) -> Self {
        Self {
            host: account.host.clone(),
            port: account.port,
            secure: account.secure,
            connect_timeout: Duration::from_millis(server.connect_timeout_ms),
            greeting_timeout: Duration::from_millis(server.greeting_timeout_ms),
            socket_timeout: Duration::from_millis(server.socket_timeout_ms),
        }
    }
}

impl Connector for ImapConnector {
    type Transport = ImapTransport;

    /// Connect to IMAP server and authenticate
    ///
    /// Performs full connection sequence with timeouts:
    /// 1. TCP connect
    /// 2. TLS handshake with webpki root certificates
    /// 3. Read IMAP greeting
    /// 4. LOGIN authentication
    ///
    /// Rejects insecure connections (`secure: false`) to prevent password
    /// exposure.
    async fn connect(&self, credentials: &Credentials) -> AppResult<ImapTransport> {
        if !self.secure {
            return Err(AppError::InvalidInput(
                "insecure IMAP is not supported; set MAIL_THREADS_<ACCOUNT>_SECURE=true".to_owned(),
            ));
        }

        let tcp = timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| AppError::Network("tcp connect timeout".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Network(format!("tcp connect failed: {e}"))))?;

        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(tls_config));

        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|_| AppError::InvalidInput("invalid IMAP host for TLS SNI".to_owned()))?;
        let tls_stream = timeout(self.greeting_timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| AppError::Network("TLS handshake timeout".to_owned()))
            .and_then(|r| r.map_err(|e| AppError::Network(format!("TLS handshake failed: {e}"))))?;

        let mut client = Client::new(tls_stream);
        let greeting = timeout(self.greeting_timeout, client.read_response())
            .await
            .map_err(|_| AppError::Network("IMAP greeting timeout".to_owned()))
            .and_then(|r| {
                r.map_err(|e| AppError::Network(format!("IMAP greeting failed: {e}")))
            })?;

        if greeting.is_none() {
            return Err(AppError::Network(
                "IMAP server closed connection before greeting".to_owned(),
            ));
        }

        let pass = credentials.secret.expose_secret();
        let session = timeout(
            self.greeting_timeout,
            client.login(credentials.principal.as_str(), pass),
        )
        .await
        .map_err(|_| AppError::Network("IMAP login timeout".to_owned()))
        .and_then(|r| r.map_err(|(e, _)| imap_error(e, "LOGIN failed", AppError::AuthFailed)))?;

        Ok(ImapTransport {
            session,
            socket_timeout: self.socket_timeout,
            move_supported: None,
        })
    }
}

/// Map an `async-imap` error to the error taxonomy
///
/// A tagged `NO` or `BAD` means the server refused the command and becomes
/// `refused`. A broken stream always becomes `Network`, whatever the command.
fn imap_error(err: ImapError, context: &str, refused: fn(String) -> AppError) -> AppError {
    match err {
        ImapError::No(_) | ImapError::Bad(_) => refused(format!("{context}: {err}")),
        ImapError::Io(_) | ImapError::ConnectionLost => {
            AppError::Network(format!("{context}: {err}"))
        }
        other => AppError::Internal(format!("{context}: {other}")),
    }
}

/// Authenticated IMAP connection
pub struct ImapTransport {
    session: ImapSession,
    socket_timeout: Duration,
    /// Cached MOVE capability, probed on first use
    move_supported: Option<bool>,
}

impl MailTransport for ImapTransport {
    async fn list_folders(&mut self) -> AppResult<Vec<FolderEntry>> {
        let names = {
            let stream = timeout(self.socket_timeout, self.session.list(None, Some("*")))
                .await
                .map_err(|_| AppError::Network("LIST timed out".to_owned()))
                .and_then(|r| r.map_err(|e| imap_error(e, "LIST failed", AppError::Internal)))?;
            timeout(self.socket_timeout, stream.try_collect::<Vec<_>>())
                .await
                .map_err(|_| AppError::Network("LIST stream timed out".to_owned()))
                .and_then(|r| {
                    r.map_err(|e| imap_error(e, "LIST stream failed", AppError::Internal))
                })?
        };

        let subscribed: HashSet<String> = {
            let stream = timeout(self.socket_timeout, self.session.lsub(None, Some("*")))
                .await
                .map_err(|_| AppError::Network("LSUB timed out".to_owned()))
                .and_then(|r| r.map_err(|e| imap_error(e, "LSUB failed", AppError::Internal)))?;
            let subs: Vec<async_imap::types::Name> =
                timeout(self.socket_timeout, stream.try_collect())
                    .await
                    .map_err(|_| AppError::Network("LSUB stream timed out".to_owned()))
                    .and_then(|r| {
                        r.map_err(|e| imap_error(e, "LSUB stream failed", AppError::Internal))
                    })?;
            subs.iter().map(|n| n.name().to_owned()).collect()
        };

        Ok(names
            .iter()
            .map(|item| FolderEntry {
                name: decode_utf7_imap(item.name().to_owned()),
                subscribed: subscribed.contains(item.name()),
                selectable: !item
                    .attributes()
                    .iter()
                    .any(|a| matches!(a, NameAttribute::NoSelect)),
            })
            .collect())
    }

    /// `EXAMINE` for read-only locks, `SELECT` for read-write locks
    async fn select(&mut self, folder: &str, mode: LockMode) -> AppResult<u32> {
        let wire_name = encode_utf7_imap(folder.to_owned());
        let (command, selected) = match mode {
            LockMode::ReadOnly => (
                "EXAMINE",
                timeout(self.socket_timeout, self.session.examine(&wire_name)).await,
            ),
            LockMode::ReadWrite => (
                "SELECT",
                timeout(self.socket_timeout, self.session.select(&wire_name)).await,
            ),
        };
        let mailbox = selected
            .map_err(|_| AppError::Network(format!("{command} timed out for folder '{folder}'")))
            .and_then(|r| {
                r.map_err(|e| {
                    imap_error(e, &format!("cannot open folder '{folder}'"), AppError::NotFound)
                })
            })?;
        Ok(mailbox.exists)
    }

    async fn fetch_envelopes(&mut self, first: u32, last: u32) -> AppResult<Vec<RawEnvelope>> {
        let stream = timeout(
            self.socket_timeout,
            self.session.fetch(format!("{first}:{last}"), ENVELOPE_QUERY),
        )
        .await
        .map_err(|_| AppError::Network("FETCH timed out".to_owned()))
        .and_then(|r| r.map_err(|e| imap_error(e, "fetch failed", AppError::Internal)))?;
        let fetches: Vec<Fetch> = timeout(self.socket_timeout, stream.try_collect())
            .await
            .map_err(|_| AppError::Network("FETCH stream timed out".to_owned()))
            .and_then(|r| r.map_err(|e| imap_error(e, "fetch stream failed", AppError::Internal)))?;

        let mut envelopes = Vec::with_capacity(fetches.len());
        for fetch in &fetches {
            let Some(uid) = fetch.uid else {
                warn!(seq = fetch.message, "fetch response without UID; skipping");
                continue;
            };
            envelopes.push(RawEnvelope {
                seq: fetch.message,
                uid,
                header: fetch
                    .header()
                    .or_else(|| fetch.body())
                    .map(<[u8]>::to_vec)
                    .unwrap_or_default(),
                flags: flags_to_strings(fetch),
                internal_date: fetch.internal_date().map(|d| d.with_timezone(&Utc)),
            });
        }
        Ok(envelopes)
    }

    async fn fetch_body(&mut self, uid: u32) -> AppResult<Vec<u8>> {
        let stream = timeout(
            self.socket_timeout,
            self.session.uid_fetch(uid.to_string(), "(UID BODY.PEEK[])"),
        )
        .await
        .map_err(|_| AppError::Network("UID FETCH timed out".to_owned()))
        .and_then(|r| r.map_err(|e| imap_error(e, "uid fetch failed", AppError::Internal)))?;
        let fetches: Vec<Fetch> = timeout(self.socket_timeout, stream.try_collect())
            .await
            .map_err(|_| AppError::Network("UID FETCH stream timed out".to_owned()))
            .and_then(|r| {
                r.map_err(|e| imap_error(e, "uid fetch stream failed", AppError::Internal))
            })?;

        fetches
            .iter()
            .find_map(|f| f.body().map(<[u8]>::to_vec))
            .ok_or_else(|| AppError::NotFound(format!("message uid {uid} has no body")))
    }

    /// `UID STORE` with `+FLAGS.SILENT` or `-FLAGS.SILENT`
    async fn store_flag(&mut self, uid: u32, op: FlagOp, flag: &str) -> AppResult<()> {
        let query = match op {
            FlagOp::Add => format!("+FLAGS.SILENT ({flag})"),
            FlagOp::Remove => format!("-FLAGS.SILENT ({flag})"),
        };
        let stream = timeout(
            self.socket_timeout,
            self.session.uid_store(uid.to_string(), &query),
        )
        .await
        .map_err(|_| AppError::Network("UID STORE timed out".to_owned()))
        .and_then(|r| r.map_err(|e| imap_error(e, "UID STORE failed", AppError::Mutation)))?;
        let _: Vec<Fetch> = timeout(self.socket_timeout, stream.try_collect())
            .await
            .map_err(|_| AppError::Network("UID STORE stream timed out".to_owned()))
            .and_then(|r| {
                r.map_err(|e| imap_error(e, "UID STORE stream failed", AppError::Mutation))
            })?;
        Ok(())
    }

    async fn supports_move(&mut self) -> AppResult<bool> {
        if let Some(cached) = self.move_supported {
            return Ok(cached);
        }
        let caps = timeout(self.socket_timeout, self.session.capabilities())
            .await
            .map_err(|_| AppError::Network("CAPABILITY timed out".to_owned()))
            .and_then(|r| r.map_err(|e| imap_error(e, "CAPABILITY failed", AppError::Internal)))?;
        let supported = caps.has_str("MOVE");
        self.move_supported = Some(supported);
        Ok(supported)
    }

    /// `UID MOVE` (RFC 6851)
    async fn move_message(&mut self, uid: u32, target: &str) -> AppResult<()> {
        let wire_name = encode_utf7_imap(target.to_owned());
        timeout(
            self.socket_timeout,
            self.session.uid_mv(uid.to_string(), &wire_name),
        )
        .await
        .map_err(|_| AppError::Network("UID MOVE timed out".to_owned()))
        .and_then(|r| r.map_err(|e| imap_error(e, "UID MOVE failed", AppError::Mutation)))
    }

    async fn copy_message(&mut self, uid: u32, target: &str) -> AppResult<()> {
        let wire_name = encode_utf7_imap(target.to_owned());
        timeout(
            self.socket_timeout,
            self.session.uid_copy(uid.to_string(), &wire_name),
        )
        .await
        .map_err(|_| AppError::Network("UID COPY timed out".to_owned()))
        .and_then(|r| r.map_err(|e| imap_error(e, "UID COPY failed", AppError::Mutation)))
    }

    /// `UID EXPUNGE` (RFC 4315) so only this message is removed
    async fn expunge(&mut self, uid: u32) -> AppResult<()> {
        let stream = timeout(
            self.socket_timeout,
            self.session.uid_expunge(uid.to_string()),
        )
        .await
        .map_err(|_| AppError::Network("UID EXPUNGE timed out".to_owned()))
        .and_then(|r| r.map_err(|e| imap_error(e, "UID EXPUNGE failed", AppError::Mutation)))?;
        let _: Vec<u32> = timeout(self.socket_timeout, stream.try_collect())
            .await
            .map_err(|_| AppError::Network("UID EXPUNGE stream timed out".to_owned()))
            .and_then(|r| {
                r.map_err(|e| imap_error(e, "UID EXPUNGE stream failed", AppError::Mutation))
            })?;
        Ok(())
    }

    async fn noop(&mut self) -> AppResult<()> {
        timeout(self.socket_timeout, self.session.noop())
            .await
            .map_err(|_| AppError::Network("NOOP timed out".to_owned()))
            .and_then(|r| r.map_err(|e| AppError::Network(format!("NOOP failed: {e}"))))
    }

    async fn logout(&mut self) -> AppResult<()> {
        timeout(self.socket_timeout, self.session.logout())
            .await
            .map_err(|_| AppError::Network("LOGOUT timed out".to_owned()))
            .and_then(|r| r.map_err(|e| AppError::Network(format!("LOGOUT failed: {e}"))))
    }
}

/// Convert fetch flags to their protocol spelling
pub fn flags_to_strings(fetch: &Fetch) -> Vec<String> {
    fetch.flags().map(|flag| flag_to_string(&flag)).collect()
}

fn flag_to_string(flag: &Flag<'_>) -> String {
    match flag {
        Flag::Seen => "\\Seen".to_owned(),
        Flag::Answered => "\\Answered".to_owned(),
        Flag::Flagged => "\\Flagged".to_owned(),
        Flag::Deleted => "\\Deleted".to_owned(),
        Flag::Draft => "\\Draft".to_owned(),
        Flag::Recent => "\\Recent".to_owned(),
        Flag::Custom(name) => name.to_string(),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use async_imap::error::Error as ImapError;
    use async_imap::types::Flag;
    use std::borrow::Cow;
    use std::io;

    use super::{flag_to_string, imap_error};
    use crate::errors::AppError;

    #[test]
    fn system_flags_keep_backslash_prefix() {
        assert_eq!(flag_to_string(&Flag::Seen), "\\Seen");
        assert_eq!(flag_to_string(&Flag::Deleted), "\\Deleted");
        assert_eq!(
            flag_to_string(&Flag::Custom(Cow::Borrowed("$Important"))),
            "$Important"
        );
    }

    #[test]
    fn login_rejection_is_auth_failure() {
        let err = imap_error(
            ImapError::No("[AUTHENTICATIONFAILED] Invalid credentials".to_owned()),
            "LOGIN failed",
            AppError::AuthFailed,
        );
        assert!(matches!(err, AppError::AuthFailed(_)));
    }

    #[test]
    fn io_failure_during_login_is_network_error() {
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer");
        let err = imap_error(ImapError::Io(reset), "LOGIN failed", AppError::AuthFailed);
        assert!(matches!(err, AppError::Network(_)));
    }

    #[test]
    fn refused_select_is_not_found_but_dropped_link_is_network() {
        let refused = imap_error(
            ImapError::No("Mailbox does not exist".to_owned()),
            "cannot open folder 'Gone'",
            AppError::NotFound,
        );
        assert!(matches!(refused, AppError::NotFound(_)));

        let lost = imap_error(
            ImapError::ConnectionLost,
            "cannot open folder 'INBOX'",
            AppError::NotFound,
        );
        assert!(matches!(lost, AppError::Network(_)));
    }

    #[test]
    fn dropped_link_during_list_or_store_is_network() {
        let eof = || io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(
            imap_error(ImapError::Io(eof()), "LIST failed", AppError::Internal),
            AppError::Network(_)
        ));
        assert!(matches!(
            imap_error(ImapError::Io(eof()), "UID STORE failed", AppError::Mutation),
            AppError::Network(_)
        ));
        assert!(matches!(
            imap_error(
                ImapError::Bad("bad flag".to_owned()),
                "UID STORE failed",
                AppError::Mutation
            ),
            AppError::Mutation(_)
        ));
    }
}
