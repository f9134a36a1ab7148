//! DevVault - claimable bounty issues ingested from GitHub
//!
//! Open issues are pulled from a configured set of GitHub repositories,
//! classified by their labels into a difficulty tier, and priced with a
//! point reward. Registered developers claim an issue, work on it and
//! complete it to collect the reward.
//!
//! # How it works
//!
//! 1. The sync pipeline pages through each repository's open issues and
//!    inserts the ones not seen before (existing issues are never touched)
//! 2. Labels decide difficulty: `good first issue`/`beginner`/`easy` is EASY
//!    (100 points), `hard`/`complex`/`expert` is HARD (500), anything else
//!    MEDIUM (250)
//! 3. A developer claims an OPEN issue; concurrent claims resolve to
//!    exactly one winner
//! 4. Completing credits the reward, one completed issue, and a tenth of
//!    the reward as reputation, atomically with the status change
//!
//! # Issue states
//!
//! `OPEN -> CLAIMED -> IN_PROGRESS -> COMPLETED`, plus `CLOSED` as a
//! maintainer-only exit. `COMPLETED` and `CLOSED` are terminal.

pub mod admin;
pub mod classify;
pub mod config;
pub mod error;
pub mod github;
pub mod lifecycle;
pub mod model;
pub mod seed;
pub mod server;
pub mod source;
pub mod store;
pub mod sync;
pub mod users;

pub use admin::{AdminService, SyncSummary};
pub use classify::{classify, reward_for};
pub use config::Config;
pub use error::{AdminError, LifecycleError, StoreError, SyncError};
pub use github::{GitHubClient, RateLimitInfo};
pub use lifecycle::{IssueLifecycle, SearchQuery};
pub use model::{Difficulty, Issue, IssueId, IssueStatus, NewIssue, NewUser, Role, User, UserId};
pub use source::{ExternalIssueRecord, IssueSource, RepoRef, SourceError};
pub use store::{IssueStore, MemoryStore, PgStore, SqliteStore, Store, UserStore};
pub use sync::{SyncPipeline, SyncReport, SyncSettings};
pub use users::UserService;
