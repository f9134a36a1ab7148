//! In-memory store
//!
//! All state sits behind one mutex, so every operation (including
//! transitions spanning an issue and a user) is trivially atomic.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{IssueStore, StoreResult, TransitionOutcome, UserStore};
use crate::model::{
    Issue, IssueFilter, IssueId, NewIssue, NewUser, StatDelta, Transition, User, UserId,
};

#[derive(Default)]
struct Inner {
    issues: BTreeMap<IssueId, Issue>,
    by_external_id: HashMap<String, IssueId>,
    users: BTreeMap<UserId, User>,
    next_issue_id: i64,
    next_user_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IssueStore for MemoryStore {
    async fn find_issue(&self, id: IssueId) -> StoreResult<Option<Issue>> {
        Ok(self.inner.lock().issues.get(&id).cloned())
    }

    async fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<Issue>> {
        let inner = self.inner.lock();
        Ok(inner
            .by_external_id
            .get(external_id)
            .and_then(|id| inner.issues.get(id))
            .cloned())
    }

    async fn find_filtered(&self, filter: &IssueFilter) -> StoreResult<Vec<Issue>> {
        let inner = self.inner.lock();
        Ok(inner
            .issues
            .values()
            .filter(|issue| filter.matches(issue))
            .cloned()
            .collect())
    }

    async fn count_issues(&self) -> StoreResult<u64> {
        Ok(self.inner.lock().issues.len() as u64)
    }

    async fn insert_new_issue(&self, issue: NewIssue) -> StoreResult<Option<Issue>> {
        let mut inner = self.inner.lock();
        if inner.by_external_id.contains_key(&issue.external_id) {
            return Ok(None);
        }

        inner.next_issue_id += 1;
        let id = IssueId(inner.next_issue_id);
        let issue = issue.into_issue(id, Utc::now());
        inner.by_external_id.insert(issue.external_id.clone(), id);
        inner.issues.insert(id, issue.clone());
        Ok(Some(issue))
    }

    async fn apply_transition(
        &self,
        id: IssueId,
        transition: &Transition,
    ) -> StoreResult<TransitionOutcome> {
        let mut guard = self.inner.lock();
        let Inner { issues, users, .. } = &mut *guard;

        let Some(issue) = issues.get_mut(&id) else {
            return Ok(TransitionOutcome::IssueMissing);
        };
        if !users.contains_key(&transition.actor) {
            return Ok(TransitionOutcome::UserMissing);
        }
        if !transition.admits(issue) {
            return Ok(TransitionOutcome::Rejected(issue.clone()));
        }

        let delta = transition.stat_delta(issue);
        if let Some((target, _)) = &delta {
            if !users.contains_key(target) {
                return Ok(TransitionOutcome::UserMissing);
            }
        }

        transition.apply_to(issue);
        let user = delta.and_then(|(target, delta)| {
            users.get_mut(&target).map(|user| {
                user.apply_delta(&delta);
                user.clone()
            })
        });

        Ok(TransitionOutcome::Applied {
            issue: issue.clone(),
            user,
        })
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.inner.lock().users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .inner
            .lock()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn insert_user(&self, user: NewUser) -> StoreResult<Option<User>> {
        let mut inner = self.inner.lock();
        if inner.users.values().any(|u| u.email == user.email) {
            return Ok(None);
        }

        inner.next_user_id += 1;
        let id = UserId(inner.next_user_id);
        let user = user.into_user(id, Utc::now());
        inner.users.insert(id, user.clone());
        Ok(Some(user))
    }

    async fn apply_stat_delta(&self, id: UserId, delta: StatDelta) -> StoreResult<Option<User>> {
        let mut inner = self.inner.lock();
        Ok(inner.users.get_mut(&id).map(|user| {
            user.apply_delta(&delta);
            user.clone()
        }))
    }
}
