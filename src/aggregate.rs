//! Cross-folder aggregation
//!
//! Runs the fetcher over every catalog folder and tags each message with its
//! folder. A folder that cannot be read is skipped with a warning and the
//! remaining folders still contribute their messages.

use futures::{StreamExt, stream};
use tracing::{debug, info, warn};

use crate::catalog::{self, Folder};
use crate::errors::AppResult;
use crate::fetcher::{self, FolderMessage};
use crate::session::{Connector, Credentials, MailTransport, Session};

/// Fetch the newest `limit` messages of every catalog folder on one session
///
/// # Errors
///
/// - `Network` if the folder list cannot be read or the connection drops
pub async fn fetch_all<T: MailTransport>(
    session: &mut Session<T>,
    limit: usize,
    subscribed_only: bool,
) -> AppResult<Vec<FolderMessage>> {
    let folders = catalog::list_folders(session, subscribed_only).await?;
    fetch_folders(session, &folders, limit).await
}

/// Visit `folders` one at a time, in order
///
/// Folder-local failures are skipped. Session-level failures end the
/// aggregation since no later folder could be read either.
pub async fn fetch_folders<T: MailTransport>(
    session: &mut Session<T>,
    folders: &[Folder],
    limit: usize,
) -> AppResult<Vec<FolderMessage>> {
    let mut combined = Vec::new();
    let mut skipped = 0usize;

    for folder in folders {
        match fetcher::fetch_messages(session, &folder.name, limit).await {
            Ok(messages) => combined.extend(FolderMessage::tag(&folder.name, messages)),
            Err(e) if e.is_folder_local() => {
                warn!(folder = %folder.name, error = %e, "skipping folder during aggregation");
                skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    debug!(
        folders = folders.len(),
        skipped,
        messages = combined.len(),
        "aggregated folders"
    );
    Ok(combined)
}

/// Fetch `folders` with up to `concurrency` sessions open at once
///
/// Each folder gets its own session, opened and closed around its fetch.
/// Results are merged in `folders` order regardless of completion order. Any
/// failure, including failing to connect, only drops that folder.
pub async fn fetch_all_parallel<C: Connector>(
    connector: &C,
    credentials: &Credentials,
    folders: &[Folder],
    limit: usize,
    concurrency: usize,
) -> Vec<FolderMessage> {
    let tasks: Vec<_> = folders
        .iter()
        .map(|folder| fetch_one(connector, credentials, &folder.name, limit))
        .collect();
    let per_folder = stream::iter(tasks)
        .buffered(concurrency.max(1))
        .collect::<Vec<_>>()
        .await;

    let mut combined = Vec::new();
    let mut skipped = 0usize;
    for messages in per_folder {
        match messages {
            Some(messages) => combined.extend(messages),
            None => skipped += 1,
        }
    }

    info!(
        folders = folders.len(),
        skipped,
        messages = combined.len(),
        concurrency,
        "aggregated folders in parallel"
    );
    combined
}

async fn fetch_one<C: Connector>(
    connector: &C,
    credentials: &Credentials,
    folder: &str,
    limit: usize,
) -> Option<Vec<FolderMessage>> {
    let mut session = match Session::open(connector, credentials).await {
        Ok(session) => session,
        Err(e) => {
            warn!(folder, error = %e, "connection for folder failed; skipping");
            return None;
        }
    };

    let result = fetcher::fetch_messages(&mut session, folder, limit).await;
    session.close().await;

    match result {
        Ok(messages) => Some(FolderMessage::tag(folder, messages)),
        Err(e) => {
            warn!(folder, error = %e, "skipping folder during aggregation");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{fetch_all, fetch_all_parallel, fetch_folders};
    use crate::catalog::Folder;
    use crate::errors::AppError;
    use crate::session::Session;
    use crate::testing::{FakeServer, credentials};

    fn three_folders() -> FakeServer {
        FakeServer::new("secret")
            .with_folder("A", 3)
            .with_failing_folder("B")
            .with_folder("C", 2)
    }

    fn folder(name: &str) -> Folder {
        Folder {
            name: name.to_owned(),
            message_count: 0,
        }
    }

    #[tokio::test]
    async fn failing_folder_does_not_hide_the_others() {
        let server = three_folders();
        let mut session = Session::open(&server, &credentials("secret"))
            .await
            .expect("open");

        let messages = fetch_all(&mut session, 100, true).await.expect("aggregate");

        assert_eq!(messages.len(), 5);
        assert!(messages.iter().all(|m| m.folder == "A" || m.folder == "C"));
        assert_eq!(messages.iter().filter(|m| m.folder == "A").count(), 3);
    }

    #[tokio::test]
    async fn enumeration_failure_is_skipped_like_select_failure() {
        let server = FakeServer::new("secret")
            .with_folder("A", 1)
            .with_fetch_failure("A")
            .with_folder("C", 2);
        let mut session = Session::open(&server, &credentials("secret"))
            .await
            .expect("open");

        let messages = fetch_folders(&mut session, &[folder("A"), folder("C")], 10)
            .await
            .expect("aggregate");

        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.folder == "C"));
    }

    #[tokio::test]
    async fn closed_session_aborts_aggregation() {
        let server = three_folders();
        let mut session = Session::open(&server, &credentials("secret"))
            .await
            .expect("open");
        session.close().await;

        let err = fetch_folders(&mut session, &[folder("A")], 10)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::Lock(_)));
    }

    #[tokio::test]
    async fn lost_connection_is_not_skipped_like_a_folder_failure() {
        let server = FakeServer::new("secret")
            .with_folder("A", 1)
            .with_link_lost_on_select("A")
            .with_folder("C", 2);
        let mut session = Session::open(&server, &credentials("secret"))
            .await
            .expect("open");

        let err = fetch_folders(&mut session, &[folder("A"), folder("C")], 10)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::Network(_)));
    }

    #[tokio::test]
    async fn parallel_fetch_merges_in_folder_order() {
        let server = three_folders();
        let folders = [folder("A"), folder("B"), folder("C")];

        let messages = fetch_all_parallel(&server, &credentials("secret"), &folders, 100, 3).await;

        let tags: Vec<&str> = messages.iter().map(|m| m.folder.as_str()).collect();
        assert_eq!(tags, vec!["A", "A", "A", "C", "C"]);
        assert_eq!(server.connections(), 3);
        assert_eq!(server.logouts(), 3);
    }

    #[tokio::test]
    async fn parallel_fetch_skips_folders_it_cannot_connect_for() {
        let server = FakeServer::new("secret").with_folder("A", 2);

        let messages =
            fetch_all_parallel(&server, &credentials("wrong"), &[folder("A")], 10, 2).await;
        assert!(messages.is_empty());
    }
}
