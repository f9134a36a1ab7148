//! Issue and identity stores
//!
//! The lifecycle code only talks to these traits. Every write that touches
//! both an issue and a user goes through [`IssueStore::apply_transition`],
//! which each backend implements as one atomic unit:
//!
//! - [`MemoryStore`]: a single mutex over ordered maps (tests, demo server)
//! - [`SqliteStore`]: `BEGIN IMMEDIATE` transactions (CLI)
//! - [`PgStore`]: row lock with `SELECT ... FOR UPDATE` (server)

pub mod memory;
pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{
    Issue, IssueFilter, IssueId, IssueStatus, NewIssue, NewUser, StatDelta, Transition, User,
    UserId,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of [`IssueStore::apply_transition`]
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// Issue and statistics were written; `user` is the user whose
    /// statistics changed, if any
    Applied { issue: Issue, user: Option<User> },
    IssueMissing,
    UserMissing,
    /// The guard did not hold; carries the issue as it currently is
    Rejected(Issue),
}

#[async_trait]
pub trait IssueStore: Send + Sync {
    async fn find_issue(&self, id: IssueId) -> StoreResult<Option<Issue>>;

    async fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<Issue>>;

    /// Matching issues, id ascending
    async fn find_filtered(&self, filter: &IssueFilter) -> StoreResult<Vec<Issue>>;

    async fn find_all(&self) -> StoreResult<Vec<Issue>> {
        self.find_filtered(&IssueFilter::default()).await
    }

    async fn find_by_status(&self, status: IssueStatus) -> StoreResult<Vec<Issue>> {
        self.find_filtered(&IssueFilter {
            status: Some(status),
            ..Default::default()
        })
        .await
    }

    async fn count_issues(&self) -> StoreResult<u64>;

    /// Insert unless an issue with the same external id exists.
    /// Returns `None` when the insert was skipped.
    async fn insert_new_issue(&self, issue: NewIssue) -> StoreResult<Option<Issue>>;

    /// Check the transition's guard and, if it holds, write the issue change
    /// and the implied statistic delta together
    async fn apply_transition(
        &self,
        id: IssueId,
        transition: &Transition,
    ) -> StoreResult<TransitionOutcome>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, id: UserId) -> StoreResult<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    async fn exists_by_email(&self, email: &str) -> StoreResult<bool> {
        Ok(self.find_user_by_email(email).await?.is_some())
    }

    /// Insert a user; `None` when the email is already taken
    async fn insert_user(&self, user: NewUser) -> StoreResult<Option<User>>;

    /// Atomic read-modify-write of a user's counters; `None` if absent
    async fn apply_stat_delta(&self, id: UserId, delta: StatDelta) -> StoreResult<Option<User>>;
}

/// Both halves of the data model behind one transactional boundary
pub trait Store: IssueStore + UserStore {}

impl<T: IssueStore + UserStore + ?Sized> Store for T {}

/// `LIKE` pattern matching `term` literally anywhere in a value
pub(crate) fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}
