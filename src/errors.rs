//! Application error model with MCP error mapping
//!
//! Defines the failure taxonomy of the threading engine using `thiserror`.
//! Errors scoped to one folder or one message are absorbed by the engine and
//! only logged; session-level and mutation errors reach the caller and are
//! mapped to MCP `ErrorData` at the tool boundary.

use rmcp::model::ErrorData;
use serde_json::json;
use thiserror::Error;

/// Application error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid user input (validation failed, malformed request)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Resource not found (account, thread)
    #[error("not found: {0}")]
    NotFound(String),
    /// Bad credentials; fatal to the session and never retried
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Server unreachable, connection dropped, or a timeout elapsed
    #[error("network error: {0}")]
    Network(String),
    /// A single folder could not be examined or enumerated
    #[error("folder unavailable: {0}")]
    FolderUnavailable(String),
    /// Folder lock requested while another one is held, or on a closed session
    #[error("lock error: {0}")]
    Lock(String),
    /// Delete, move or flag change rejected by the server
    #[error("mutation failed: {0}")]
    Mutation(String),
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether the failure is confined to one folder and may be absorbed
    pub fn is_folder_local(&self) -> bool {
        matches!(self, Self::FolderUnavailable(_))
    }

    /// Convert to MCP `ErrorData`
    ///
    /// # Mappings
    ///
    /// - `InvalidInput` → `invalid_params`
    /// - `NotFound` → `resource_not_found`
    /// - `AuthFailed` → `invalid_request`
    /// - `Network` → `internal_error`
    /// - `FolderUnavailable` → `resource_not_found`
    /// - `Lock` → `internal_error`
    /// - `Mutation` → `invalid_request`
    /// - `Internal` → `internal_error`
    pub fn to_error_data(&self) -> ErrorData {
        match self {
            Self::InvalidInput(msg) => {
                ErrorData::invalid_params(msg.clone(), Some(json!({ "code": "invalid_input" })))
            }
            Self::NotFound(msg) => {
                ErrorData::resource_not_found(msg.clone(), Some(json!({ "code": "not_found" })))
            }
            Self::AuthFailed(msg) => {
                ErrorData::invalid_request(msg.clone(), Some(json!({ "code": "auth_failed" })))
            }
            Self::Network(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "network" })))
            }
            Self::FolderUnavailable(msg) => ErrorData::resource_not_found(
                msg.clone(),
                Some(json!({ "code": "folder_unavailable" })),
            ),
            Self::Lock(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "lock" })))
            }
            Self::Mutation(msg) => {
                ErrorData::invalid_request(msg.clone(), Some(json!({ "code": "mutation_failed" })))
            }
            Self::Internal(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "internal" })))
            }
        }
    }
}

/// Type alias for fallible return values
pub type AppResult<T> = Result<T, AppError>;
