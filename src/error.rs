//! Error types

use thiserror::Error;

use crate::model::{IssueId, IssueStatus, UserId};
use crate::sync::SyncReport;

/// Unknown enum text in input or in a stored row
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind}: '{value}'")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseError {
    pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

/// Persistence failure. Callers treat these as fatal for the operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<ParseError> for StoreError {
    fn from(e: ParseError) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

/// Errors surfaced to callers of issue and user operations
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{entity} {} not found", entity_ref(entity, *id))]
    NotFound { entity: &'static str, id: i64 },

    #[error("issue {0} is already claimed")]
    AlreadyClaimed(IssueId),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("issue {id} is {status} and cannot be {action}")]
    InvalidState {
        id: IssueId,
        status: IssueStatus,
        action: &'static str,
    },

    #[error("a user with email {0} already exists")]
    EmailTaken(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LifecycleError {
    pub fn issue_not_found(id: IssueId) -> Self {
        LifecycleError::NotFound {
            entity: "issue",
            id: id.0,
        }
    }

    pub fn user_not_found(id: UserId) -> Self {
        LifecycleError::NotFound {
            entity: "user",
            id: id.0,
        }
    }
}

/// Render an id the way the typed ids display it
fn entity_ref(entity: &str, id: i64) -> String {
    match entity {
        "issue" => IssueId(id).to_string(),
        _ => UserId(id).to_string(),
    }
}

impl From<ParseError> for LifecycleError {
    fn from(e: ParseError) -> Self {
        LifecycleError::Validation(e.to_string())
    }
}

/// Errors that abort a whole synchronization run
///
/// Per-repository fetch failures never appear here; they are recorded in the
/// run's report instead.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a synchronization run is already in progress")]
    AlreadyRunning,

    /// The store failed mid-run; `report` covers the repositories
    /// processed up to that point
    #[error("synchronization aborted: {source}")]
    Aborted {
        source: StoreError,
        report: Box<SyncReport>,
    },
}

/// Errors from maintainer-only operations
#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl From<StoreError> for AdminError {
    fn from(e: StoreError) -> Self {
        AdminError::Lifecycle(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            LifecycleError::issue_not_found(IssueId(5)).to_string(),
            "issue #5 not found"
        );
        assert_eq!(
            LifecycleError::user_not_found(UserId(3)).to_string(),
            "user 3 not found"
        );
        assert_eq!(
            LifecycleError::AlreadyClaimed(IssueId(7)).to_string(),
            "issue #7 is already claimed"
        );
        let err: LifecycleError = ParseError::new("difficulty", "legendary").into();
        assert_eq!(err.to_string(), "invalid input: unknown difficulty: 'legendary'");
    }
}
