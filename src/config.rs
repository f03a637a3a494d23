//! Environment configuration: accounts, timeouts and fetch limits
//!
//! Every variable starts with `MAIL_THREADS_`. An account named `WORK` is
//! read from `MAIL_THREADS_WORK_{HOST,USER,PASS,PORT,SECURE}`; accounts are
//! discovered from their `_HOST` variable and `DEFAULT` is assumed when none
//! is set.

use std::collections::BTreeMap;
use std::env::{self, VarError};
use std::str::FromStr;

use regex::Regex;
use secrecy::SecretString;

use crate::errors::{AppError, AppResult};
use crate::session::Credentials;

const PREFIX: &str = "MAIL_THREADS_";
const MAX_FETCH_CONCURRENCY: usize = 16;

/// One mailbox account; the password never appears in `Debug` output
#[derive(Debug, Clone)]
pub struct AccountConfig {
    /// Lower-cased segment, `default` for `MAIL_THREADS_DEFAULT_*`
    pub account_id: String,
    pub host: String,
    pub port: u16,
    /// Must be true; plaintext IMAP is refused at connect time
    pub secure: bool,
    pub user: String,
    pub pass: SecretString,
}

impl AccountConfig {
    /// Credentials handed to the engine for every operation on this account
    pub fn credentials(&self) -> Credentials {
        Credentials {
            principal: self.user.clone(),
            secret: self.pass.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub accounts: BTreeMap<String, AccountConfig>,
    /// Gate for flag, move and delete tools
    pub write_enabled: bool,
    pub connect_timeout_ms: u64,
    /// Also bounds the TLS handshake and LOGIN
    pub greeting_timeout_ms: u64,
    /// Bound on every command after login
    pub socket_timeout_ms: u64,
    /// Messages fetched from a folder for a thread listing
    pub folder_limit: usize,
    /// Messages fetched per folder for search, thread lookup and contacts
    pub search_limit: usize,
    /// Sessions open at once during aggregation; 1 keeps a single session
    pub fetch_concurrency: usize,
    pub subscribed_only: bool,
}

impl ServerConfig {
    /// Read accounts and settings from the process environment
    ///
    /// # Errors
    ///
    /// `InvalidInput` naming the first missing or malformed variable.
    pub fn load_from_env() -> AppResult<Self> {
        let mut accounts = BTreeMap::new();
        for segment in account_segments()? {
            let account = load_account(&segment)?;
            accounts.insert(account.account_id.clone(), account);
        }

        let folder_limit = env_or("FOLDER_LIMIT", 50)?;
        let search_limit = env_or("SEARCH_LIMIT", 100)?;
        let fetch_concurrency = env_or("FETCH_CONCURRENCY", 1)?;
        check_limits(folder_limit, search_limit, fetch_concurrency)?;

        Ok(Self {
            accounts,
            write_enabled: bool_env_or(&format!("{PREFIX}WRITE_ENABLED"), false)?,
            connect_timeout_ms: env_or("CONNECT_TIMEOUT_MS", 30_000)?,
            greeting_timeout_ms: env_or("GREETING_TIMEOUT_MS", 15_000)?,
            socket_timeout_ms: env_or("SOCKET_TIMEOUT_MS", 300_000)?,
            folder_limit,
            search_limit,
            fetch_concurrency,
            subscribed_only: bool_env_or(&format!("{PREFIX}SUBSCRIBED_ONLY"), true)?,
        })
    }

    /// # Errors
    ///
    /// `NotFound` if `account_id` is not configured.
    pub fn get_account(&self, account_id: &str) -> AppResult<&AccountConfig> {
        self.accounts
            .get(account_id)
            .ok_or_else(|| AppError::NotFound(format!("account '{account_id}' is not configured")))
    }
}

/// Sorted account segments found in `MAIL_THREADS_<SEGMENT>_HOST` names
fn account_segments() -> AppResult<Vec<String>> {
    let pattern = Regex::new(r"^MAIL_THREADS_([A-Z0-9_]+)_HOST$")
        .map_err(|e| AppError::Internal(format!("invalid account regex: {e}")))?;

    let mut segments: Vec<String> = env::vars()
        .filter_map(|(key, _)| {
            pattern
                .captures(&key)
                .and_then(|c| c.get(1).map(|m| m.as_str().to_owned()))
        })
        .collect();
    if segments.is_empty() {
        segments.push("DEFAULT".to_owned());
    }
    segments.sort();
    segments.dedup();
    Ok(segments)
}

fn load_account(segment: &str) -> AppResult<AccountConfig> {
    let prefix = format!("{PREFIX}{}_", sanitize_segment(segment));
    let host = required_env(&format!("{prefix}HOST"))?;
    let user = required_env(&format!("{prefix}USER"))?;
    let pass = required_env(&format!("{prefix}PASS"))?;

    Ok(AccountConfig {
        account_id: segment_to_account_id(segment),
        host,
        port: parse_env(&format!("{prefix}PORT"), 993)?,
        secure: bool_env_or(&format!("{prefix}SECURE"), true)?,
        user,
        pass: SecretString::new(pass.into()),
    })
}

/// Fetch sizes must be positive; concurrency is capped to keep the number of
/// simultaneous logins per account small
fn check_limits(folder_limit: usize, search_limit: usize, concurrency: usize) -> AppResult<()> {
    if folder_limit == 0 {
        return Err(AppError::invalid(format!("{PREFIX}FOLDER_LIMIT must be at least 1")));
    }
    if search_limit == 0 {
        return Err(AppError::invalid(format!("{PREFIX}SEARCH_LIMIT must be at least 1")));
    }
    if !(1..=MAX_FETCH_CONCURRENCY).contains(&concurrency) {
        return Err(AppError::invalid(format!(
            "{PREFIX}FETCH_CONCURRENCY must be in range 1..{MAX_FETCH_CONCURRENCY}"
        )));
    }
    Ok(())
}

fn segment_to_account_id(segment: &str) -> String {
    segment.to_ascii_lowercase()
}

fn sanitize_segment(seg: &str) -> String {
    seg.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('_')
        .to_owned()
}

fn required_env(key: &str) -> AppResult<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::invalid(format!(
            "missing required environment variable {key}"
        ))),
    }
}

/// Server-wide numeric setting `MAIL_THREADS_<name>`
fn env_or<V: FromStr>(name: &str, default: V) -> AppResult<V> {
    parse_env(&format!("{PREFIX}{name}"), default)
}

fn parse_env<V: FromStr>(key: &str, default: V) -> AppResult<V> {
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<V>()
            .map_err(|_| AppError::invalid(format!("invalid value for {key}: '{v}'"))),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(non_unicode(key)),
    }
}

fn bool_env_or(key: &str, default: bool) -> AppResult<bool> {
    match env::var(key) {
        Ok(v) => parse_bool_value(&v)
            .ok_or_else(|| AppError::invalid(format!("invalid boolean for {key}: '{v}'"))),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(non_unicode(key)),
    }
}

/// `1/true/yes/y/on` or `0/false/no/n/off`, any case
fn parse_bool_value(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn non_unicode(key: &str) -> AppError {
    AppError::invalid(format!("environment variable {key} contains non-unicode data"))
}
