//! Single-message mutations
//!
//! Each operation locks the message's folder read-write, performs one
//! server-side change keyed by UID and releases the lock. Server refusals
//! are returned to the caller as `AppError::Mutation` with the server text.

use tracing::info;

use crate::errors::{AppError, AppResult};
use crate::session::{FlagOp, FolderLock, LockMode, MailTransport, Session};

pub const SEEN: &str = "\\Seen";
pub const DELETED: &str = "\\Deleted";

fn mutation_error(e: AppError) -> AppError {
    match e {
        AppError::Network(_) | AppError::Lock(_) | AppError::Mutation(_) => e,
        other => AppError::Mutation(other.to_string()),
    }
}

async fn lock_for_write<'s, T: MailTransport>(
    session: &'s mut Session<T>,
    folder: &str,
) -> AppResult<FolderLock<'s, T>> {
    session
        .lock_folder(folder, LockMode::ReadWrite)
        .await
        .map_err(mutation_error)
}

/// Flag `uid` as deleted and expunge it
///
/// # Errors
///
/// - `Mutation` if the folder cannot be opened or the server refuses
/// - `Network` if the connection fails
pub async fn delete_message<T: MailTransport>(
    session: &mut Session<T>,
    folder: &str,
    uid: u32,
) -> AppResult<()> {
    let mut lock = lock_for_write(session, folder).await?;
    lock.transport()
        .store_flag(uid, FlagOp::Add, DELETED)
        .await
        .map_err(mutation_error)?;
    lock.transport().expunge(uid).await.map_err(mutation_error)?;
    info!(folder = lock.folder(), uid, "message deleted");
    Ok(())
}

/// Move `uid` from `folder` to `target`
///
/// Uses UID MOVE when the server supports it, otherwise copies, flags the
/// source as deleted and expunges it. The message gets a new UID in
/// `target`.
///
/// # Errors
///
/// - `Mutation` if either step is refused, e.g. `target` does not exist
/// - `Network` if the connection fails
pub async fn move_message<T: MailTransport>(
    session: &mut Session<T>,
    folder: &str,
    uid: u32,
    target: &str,
) -> AppResult<()> {
    let mut lock = lock_for_write(session, folder).await?;
    let transport = lock.transport();

    if transport.supports_move().await.map_err(mutation_error)? {
        transport
            .move_message(uid, target)
            .await
            .map_err(mutation_error)?;
    } else {
        transport
            .copy_message(uid, target)
            .await
            .map_err(mutation_error)?;
        transport
            .store_flag(uid, FlagOp::Add, DELETED)
            .await
            .map_err(mutation_error)?;
        transport.expunge(uid).await.map_err(mutation_error)?;
    }

    info!(folder = lock.folder(), uid, target, "message moved");
    Ok(())
}

/// Add (`on`) or remove a flag on `uid`
///
/// Adding a flag that is already set, or removing one that is not, succeeds
/// without changing anything.
///
/// # Errors
///
/// - `Mutation` if the server refuses
/// - `Network` if the connection fails
pub async fn set_flag<T: MailTransport>(
    session: &mut Session<T>,
    folder: &str,
    uid: u32,
    flag: &str,
    on: bool,
) -> AppResult<()> {
    let op = if on { FlagOp::Add } else { FlagOp::Remove };
    let mut lock = lock_for_write(session, folder).await?;
    lock.transport()
        .store_flag(uid, op, flag)
        .await
        .map_err(mutation_error)?;
    info!(folder = lock.folder(), uid, flag, on, "flag updated");
    Ok(())
}
