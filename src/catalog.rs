//! Folder catalog
//!
//! Enumerates the folders an account shows to its user and reads each
//! folder's message count. A folder whose count cannot be read is left out
//! rather than failing the whole listing.

use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::AppResult;
use crate::session::{LockMode, MailTransport, Session};

/// A selectable folder and its message count at listing time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Folder {
    pub name: String,
    pub message_count: u32,
}

/// Folders grouped for display: well-known folders first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FolderGroups {
    /// INBOX, Sent, Drafts and Trash, in that order, when present
    pub special: Vec<Folder>,
    /// Everything else, in server order
    pub other: Vec<Folder>,
}

const SPECIAL_ORDER: [&str; 4] = ["INBOX", "Sent", "Drafts", "Trash"];

/// List folders with their message counts
///
/// With `subscribed_only`, folders the user has not subscribed to are
/// skipped. `\Noselect` containers are always skipped. Folders whose count
/// cannot be read are omitted with a warning.
///
/// # Errors
///
/// - `Network` if the folder list cannot be read
pub async fn list_folders<T: MailTransport>(
    session: &mut Session<T>,
    subscribed_only: bool,
) -> AppResult<Vec<Folder>> {
    let entries = session.list_folder_entries().await?;
    let mut folders = Vec::with_capacity(entries.len());

    for entry in entries {
        if !entry.selectable {
            debug!(folder = %entry.name, "skipping non-selectable folder");
            continue;
        }
        if subscribed_only && !entry.subscribed {
            debug!(folder = %entry.name, "skipping unsubscribed folder");
            continue;
        }

        match session.lock_folder(&entry.name, LockMode::ReadOnly).await {
            Ok(lock) => folders.push(Folder {
                name: entry.name.clone(),
                message_count: lock.exists(),
            }),
            Err(e) if e.is_folder_local() => {
                warn!(folder = %entry.name, error = %e, "omitting folder with unreadable count");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(folders)
}

/// Split folders into well-known and other folders
///
/// Well-known names match case-insensitively; a server spelling such as
/// `Inbox` keeps its own case.
pub fn partition_special(folders: Vec<Folder>) -> FolderGroups {
    let mut special: Vec<(usize, Folder)> = Vec::new();
    let mut other = Vec::new();

    for folder in folders {
        match SPECIAL_ORDER
            .iter()
            .position(|s| s.eq_ignore_ascii_case(&folder.name))
        {
            Some(rank) => special.push((rank, folder)),
            None => other.push(folder),
        }
    }

    special.sort_by_key(|(rank, _)| *rank);
    FolderGroups {
        special: special.into_iter().map(|(_, f)| f).collect(),
        other,
    }
}

#[cfg(test)]
mod tests {
    use super::{Folder, list_folders, partition_special};
    use crate::errors::AppError;
    use crate::session::Session;
    use crate::testing::{FakeServer, credentials};

    fn folder(name: &str) -> Folder {
        Folder {
            name: name.to_owned(),
            message_count: 0,
        }
    }

    #[tokio::test]
    async fn lists_counts_and_omits_unreadable_folders() {
        let server = FakeServer::new("secret")
            .with_folder("INBOX", 4)
            .with_failing_folder("Broken")
            .with_folder("Archive", 2);
        let mut session = Session::open(&server, &credentials("secret"))
            .await
            .expect("open");

        let folders = list_folders(&mut session, true).await.expect("list");

        assert_eq!(
            folders,
            vec![
                Folder {
                    name: "INBOX".to_owned(),
                    message_count: 4
                },
                Folder {
                    name: "Archive".to_owned(),
                    message_count: 2
                },
            ]
        );
    }

    #[tokio::test]
    async fn subscription_filter_is_optional() {
        let server = FakeServer::new("secret")
            .with_folder("INBOX", 1)
            .with_unsubscribed_folder("Old", 3)
            .with_noselect_folder("[Gmail]");
        let mut session = Session::open(&server, &credentials("secret"))
            .await
            .expect("open");

        let subscribed: Vec<String> = list_folders(&mut session, true)
            .await
            .expect("list")
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(subscribed, vec!["INBOX"]);

        let all: Vec<String> = list_folders(&mut session, false)
            .await
            .expect("list")
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(all, vec!["INBOX", "Old"]);
    }

    #[tokio::test]
    async fn lost_connection_while_counting_fails_the_listing() {
        let server = FakeServer::new("secret")
            .with_folder("INBOX", 1)
            .with_folder("Archive", 2)
            .with_link_lost_on_select("Archive")
            .with_folder("Work", 1);
        let mut session = Session::open(&server, &credentials("secret"))
            .await
            .expect("open");

        let err = list_folders(&mut session, true)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::Network(_)));
    }

    #[test]
    fn special_folders_come_first_in_fixed_order() {
        let groups = partition_special(vec![
            folder("Work"),
            folder("Trash"),
            folder("Inbox"),
            folder("Receipts"),
            folder("Sent"),
        ]);

        let special: Vec<&str> = groups.special.iter().map(|f| f.name.as_str()).collect();
        let other: Vec<&str> = groups.other.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(special, vec!["Inbox", "Sent", "Trash"]);
        assert_eq!(other, vec!["Work", "Receipts"]);
    }
}
