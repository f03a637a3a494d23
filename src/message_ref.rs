//! Opaque message references handed to MCP clients
//!
//! A UID only names a message together with its account and folder, so every
//! message returned by a tool carries a reference of the form
//! `mail:{account_id}:{folder}:{uid}`. Folder names may contain colons; the
//! UID is always the last segment.

use std::fmt;

use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub account_id: String,
    pub folder: String,
    pub uid: u32,
}

impl MessageRef {
    pub fn new(account_id: &str, folder: &str, uid: u32) -> Self {
        Self {
            account_id: account_id.to_owned(),
            folder: folder.to_owned(),
            uid,
        }
    }

    /// Parse a reference produced by [`MessageRef::encode`]
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the prefix, account, folder or UID is missing or
    ///   malformed
    pub fn parse(raw: &str) -> AppResult<Self> {
        let rest = raw
            .strip_prefix("mail:")
            .ok_or_else(|| AppError::invalid("message_ref must start with 'mail:'"))?;
        let (account_id, rest) = rest
            .split_once(':')
            .ok_or_else(|| AppError::invalid("message_ref is missing its folder"))?;
        let (folder, uid) = rest
            .rsplit_once(':')
            .ok_or_else(|| AppError::invalid("message_ref is missing its uid"))?;

        if account_id.is_empty() {
            return Err(AppError::invalid("message_ref account cannot be empty"));
        }
        if folder.is_empty() {
            return Err(AppError::invalid("message_ref folder cannot be empty"));
        }
        let uid = uid
            .parse::<u32>()
            .ok()
            .filter(|uid| *uid > 0)
            .ok_or_else(|| AppError::invalid("invalid uid in message_ref"))?;

        Ok(Self::new(account_id, folder, uid))
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mail:{}:{}:{}", self.account_id, self.folder, self.uid)
    }
}

#[cfg(test)]
mod tests {
    use super::MessageRef;

    #[test]
    fn parses_plain_reference() {
        let r = MessageRef::parse("mail:default:INBOX:42").expect("parse succeeds");
        assert_eq!(r, MessageRef::new("default", "INBOX", 42));
        assert_eq!(r.encode(), "mail:default:INBOX:42");
    }

    #[test]
    fn folder_may_contain_colons() {
        let r = MessageRef::parse("mail:work:Projects:2026:Q1:7").expect("parse succeeds");
        assert_eq!(r.account_id, "work");
        assert_eq!(r.folder, "Projects:2026:Q1");
        assert_eq!(r.uid, 7);
    }

    #[test]
    fn rejects_malformed_references() {
        for raw in [
            "imap:default:INBOX:1",
            "mail:default",
            "mail:default:INBOX:zero",
            "mail:default:INBOX:0",
            "mail::INBOX:1",
            "mail:default::1",
        ] {
            assert!(MessageRef::parse(raw).is_err(), "{raw} should be rejected");
        }
    }
}
