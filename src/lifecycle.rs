//! Issue lifecycle manager
//!
//! Every write is a single [`IssueStore::apply_transition`] call: the store
//! evaluates the guard and applies the issue change and the statistic delta
//! atomically. This module turns the store's outcome into the caller-facing
//! error.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::LifecycleError;
use crate::model::{Issue, IssueChange, IssueFilter, IssueId, Transition, UserId};
use crate::store::{Store, TransitionOutcome};

pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Raw search parameters as they arrive from a caller
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default, alias = "search")]
    pub term: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl SearchQuery {
    pub fn term(term: impl Into<String>) -> Self {
        Self {
            term: Some(term.into()),
            ..Default::default()
        }
    }

    /// Validate the enum filters. Blank values count as absent.
    pub fn to_filter(&self) -> Result<IssueFilter> {
        let present = |v: &Option<String>| -> Option<String> {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Ok(IssueFilter {
            term: self.term.clone(),
            difficulty: present(&self.difficulty).map(|d| d.parse()).transpose()?,
            status: present(&self.status).map(|s| s.parse()).transpose()?,
            ..Default::default()
        })
    }
}

/// Claim, start, complete and close issues
///
/// ```
/// # use std::sync::Arc;
/// # use devvault::{IssueLifecycle, IssueStatus, IssueStore, MemoryStore, NewIssue, NewUser, UserStore};
/// # tokio_test::block_on(async {
/// let store = Arc::new(MemoryStore::new());
/// let issue = store
///     .insert_new_issue(NewIssue::classified("42", "Typo in README", "acme", "docs", vec!["easy".into()]))
///     .await?
///     .unwrap();
/// let dev = store.insert_user(NewUser::new("dev@example.com", "Dev")).await?.unwrap();
///
/// let lifecycle = IssueLifecycle::new(store.clone());
/// lifecycle.claim(issue.id, dev.id).await.unwrap();
/// let done = lifecycle.complete(issue.id, dev.id).await.unwrap();
/// assert_eq!(done.status, IssueStatus::Completed);
///
/// let dev = store.find_user(dev.id).await?.unwrap();
/// assert_eq!(dev.reward_points, 100);
/// # Ok::<(), devvault::StoreError>(())
/// # }).unwrap();
/// ```
#[derive(Clone)]
pub struct IssueLifecycle {
    store: Arc<dyn Store>,
}

impl IssueLifecycle {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn claim(&self, issue: IssueId, user: UserId) -> Result<Issue> {
        self.transition(issue, Transition::new(user, IssueChange::Claim))
            .await
    }

    pub async fn unclaim(&self, issue: IssueId, user: UserId) -> Result<Issue> {
        self.transition(issue, Transition::new(user, IssueChange::Release))
            .await
    }

    /// CLAIMED -> IN_PROGRESS, by the claimant
    pub async fn start_work(&self, issue: IssueId, user: UserId) -> Result<Issue> {
        self.transition(issue, Transition::new(user, IssueChange::StartWork))
            .await
    }

    pub async fn complete(&self, issue: IssueId, user: UserId) -> Result<Issue> {
        self.transition(issue, Transition::new(user, IssueChange::Complete))
            .await
    }

    /// Administrative close. Role checks belong to the caller.
    pub async fn close(&self, issue: IssueId, actor: UserId) -> Result<Issue> {
        self.transition(issue, Transition::new(actor, IssueChange::Close))
            .await
    }

    async fn transition(&self, id: IssueId, transition: Transition) -> Result<Issue> {
        let outcome = self.store.apply_transition(id, &transition).await?;
        match outcome {
            TransitionOutcome::Applied { issue, user } => {
                info!(
                    "Issue {} {} by user {} (status {})",
                    id,
                    transition.change.verb(),
                    transition.actor,
                    issue.status
                );
                if let Some(user) = user {
                    debug!(
                        "User {} stats: points={} reputation={} claimed={} completed={}",
                        user.id,
                        user.reward_points,
                        user.reputation,
                        user.claimed_issues,
                        user.completed_issues
                    );
                }
                Ok(issue)
            }
            TransitionOutcome::IssueMissing => Err(LifecycleError::issue_not_found(id)),
            TransitionOutcome::UserMissing => Err(LifecycleError::user_not_found(transition.actor)),
            TransitionOutcome::Rejected(current) => {
                debug!(
                    "Rejected {:?} on issue {} (status {}) by user {}",
                    transition.change, id, current.status, transition.actor
                );
                Err(rejection(&transition, &current))
            }
        }
    }

    pub async fn get(&self, id: IssueId) -> Result<Issue> {
        self.store
            .find_issue(id)
            .await?
            .ok_or_else(|| LifecycleError::issue_not_found(id))
    }

    /// Filters are validated before the store is touched
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<Issue>> {
        let filter = query.to_filter()?;
        Ok(self.store.find_filtered(&filter).await?)
    }

    pub async fn list_available(&self) -> Result<Vec<Issue>> {
        Ok(self.store.find_filtered(&IssueFilter::available()).await?)
    }

    pub async fn list_all(&self) -> Result<Vec<Issue>> {
        Ok(self.store.find_all().await?)
    }

    /// Issues the user currently holds or has completed
    pub async fn issues_for_user(&self, user: UserId) -> Result<Vec<Issue>> {
        if self.store.find_user(user).await?.is_none() {
            return Err(LifecycleError::user_not_found(user));
        }
        Ok(self
            .store
            .find_filtered(&IssueFilter::involving(user))
            .await?)
    }
}

fn rejection(transition: &Transition, current: &Issue) -> LifecycleError {
    let invalid_state = || LifecycleError::InvalidState {
        id: current.id,
        status: current.status,
        action: transition.change.verb(),
    };
    let not_holder = || {
        LifecycleError::Forbidden(format!(
            "user {} does not hold issue {}",
            transition.actor, current.id
        ))
    };

    match transition.change {
        IssueChange::Claim if current.claimant.is_some() => {
            LifecycleError::AlreadyClaimed(current.id)
        }
        IssueChange::Claim | IssueChange::Close => invalid_state(),
        IssueChange::Release | IssueChange::Complete if current.status.is_terminal() => {
            invalid_state()
        }
        IssueChange::Release | IssueChange::Complete => not_holder(),
        IssueChange::StartWork if current.claimant == Some(transition.actor) => invalid_state(),
        IssueChange::StartWork => not_holder(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Difficulty, IssueStatus, NewIssue, NewUser};
    use crate::store::{IssueStore, MemoryStore, UserStore};

    struct Fixture {
        store: Arc<MemoryStore>,
        lifecycle: IssueLifecycle,
        issue: IssueId,
        alice: UserId,
        bob: UserId,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let issue = store
            .insert_new_issue(NewIssue::classified(
                "gh-1",
                "Fix flaky websocket test",
                "acme",
                "realtime",
                vec!["bug".to_string()],
            ))
            .await
            .unwrap()
            .unwrap()
            .id;
        let alice = store
            .insert_user(NewUser::new("alice@example.com", "Alice"))
            .await
            .unwrap()
            .unwrap()
            .id;
        let bob = store
            .insert_user(NewUser::new("bob@example.com", "Bob"))
            .await
            .unwrap()
            .unwrap()
            .id;
        Fixture {
            lifecycle: IssueLifecycle::new(store.clone()),
            store,
            issue,
            alice,
            bob,
        }
    }

    #[tokio::test]
    async fn test_claim_then_second_claim_fails() {
        let f = fixture().await;
        let issue = f.lifecycle.claim(f.issue, f.alice).await.unwrap();
        assert_eq!(issue.status, IssueStatus::Claimed);
        assert_eq!(issue.claimant, Some(f.alice));

        let err = f.lifecycle.claim(f.issue, f.bob).await.unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadyClaimed(id) if id == f.issue));

        // the holder claiming again is rejected the same way
        let err = f.lifecycle.claim(f.issue, f.alice).await.unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadyClaimed(_)));
    }

    #[tokio::test]
    async fn test_claim_missing_issue_or_user() {
        let f = fixture().await;
        let err = f.lifecycle.claim(IssueId(99), f.alice).await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound { entity: "issue", id: 99 }));

        let err = f.lifecycle.claim(f.issue, UserId(99)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound { entity: "user", id: 99 }));
    }

    #[tokio::test]
    async fn test_unclaim_by_non_holder_is_forbidden() {
        let f = fixture().await;
        let err = f.lifecycle.unclaim(f.issue, f.alice).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Forbidden(_)));

        f.lifecycle.claim(f.issue, f.alice).await.unwrap();
        let err = f.lifecycle.unclaim(f.issue, f.bob).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Forbidden(_)));

        let issue = f.lifecycle.unclaim(f.issue, f.alice).await.unwrap();
        assert_eq!(issue.status, IssueStatus::Open);
        assert!(issue.is_available());
        let alice = f.store.find_user(f.alice).await.unwrap().unwrap();
        assert_eq!(alice.claimed_issues, 0);
    }

    #[tokio::test]
    async fn test_start_work_rules() {
        let f = fixture().await;
        f.lifecycle.claim(f.issue, f.alice).await.unwrap();

        let err = f.lifecycle.start_work(f.issue, f.bob).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Forbidden(_)));

        let issue = f.lifecycle.start_work(f.issue, f.alice).await.unwrap();
        assert_eq!(issue.status, IssueStatus::InProgress);

        let err = f.lifecycle.start_work(f.issue, f.alice).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidState { status: IssueStatus::InProgress, .. }
        ));

        // completion works from IN_PROGRESS too
        let issue = f.lifecycle.complete(f.issue, f.alice).await.unwrap();
        assert_eq!(issue.status, IssueStatus::Completed);
    }

    #[tokio::test]
    async fn test_complete_credits_once() {
        let f = fixture().await;
        f.lifecycle.claim(f.issue, f.alice).await.unwrap();
        let issue = f.lifecycle.complete(f.issue, f.alice).await.unwrap();
        assert_eq!(issue.difficulty, Difficulty::Medium);
        assert_eq!(issue.completed_by, Some(f.alice));
        assert!(issue.completed_at.is_some());

        let err = f.lifecycle.complete(f.issue, f.alice).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidState { status: IssueStatus::Completed, action: "completed", .. }
        ));
        let err = f.lifecycle.unclaim(f.issue, f.alice).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidState { status: IssueStatus::Completed, action: "unclaimed", .. }
        ));
        let err = f.lifecycle.complete(f.issue, f.bob).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidState { .. }));

        let alice = f.store.find_user(f.alice).await.unwrap().unwrap();
        assert_eq!(alice.reward_points, 250);
        assert_eq!(alice.reputation, 25);
        assert_eq!(alice.completed_issues, 1);
    }

    #[tokio::test]
    async fn test_terminal_issue_cannot_be_claimed() {
        let f = fixture().await;
        f.lifecycle.claim(f.issue, f.alice).await.unwrap();
        f.lifecycle.complete(f.issue, f.alice).await.unwrap();

        let err = f.lifecycle.claim(f.issue, f.bob).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidState { status: IssueStatus::Completed, .. }
        ));
    }

    #[tokio::test]
    async fn test_close_releases_claimant() {
        let f = fixture().await;
        f.lifecycle.claim(f.issue, f.alice).await.unwrap();
        let issue = f.lifecycle.close(f.issue, f.bob).await.unwrap();
        assert_eq!(issue.status, IssueStatus::Closed);
        assert_eq!(issue.claimant, None);

        let alice = f.store.find_user(f.alice).await.unwrap().unwrap();
        assert_eq!(alice.claimed_issues, 0);

        let err = f.lifecycle.close(f.issue, f.bob).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_search_validates_before_store_access() {
        let f = fixture().await;
        let query = SearchQuery {
            difficulty: Some("legendary".to_string()),
            ..Default::default()
        };
        let err = f.lifecycle.search(&query).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));

        let query = SearchQuery {
            term: Some("WEBSOCKET".to_string()),
            difficulty: Some("medium".to_string()),
            status: Some(" ".to_string()),
        };
        assert_eq!(f.lifecycle.search(&query).await.unwrap().len(), 1);
        assert!(f
            .lifecycle
            .search(&SearchQuery::term("graphql"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_listings() {
        let f = fixture().await;
        assert_eq!(f.lifecycle.list_available().await.unwrap().len(), 1);
        assert!(f.lifecycle.issues_for_user(f.alice).await.unwrap().is_empty());

        f.lifecycle.claim(f.issue, f.alice).await.unwrap();
        assert!(f.lifecycle.list_available().await.unwrap().is_empty());
        assert_eq!(f.lifecycle.list_all().await.unwrap().len(), 1);
        assert_eq!(f.lifecycle.issues_for_user(f.alice).await.unwrap().len(), 1);
        assert!(f.lifecycle.issues_for_user(f.bob).await.unwrap().is_empty());

        let err = f.lifecycle.issues_for_user(UserId(42)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound { entity: "user", .. }));

        let err = f.lifecycle.get(IssueId(42)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound { entity: "issue", .. }));
    }
}
