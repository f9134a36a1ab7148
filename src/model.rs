//! Data model for issues, users and the transitions between issue states
//!
//! An issue moves through `OPEN -> CLAIMED -> IN_PROGRESS -> COMPLETED`, with
//! `CLOSED` as an administrative exit. The rules for which caller may move an
//! issue, and what each move does to the caller's statistics, live on
//! [`Transition`] so every store applies them identically.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify;
use crate::error::ParseError;

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Store-assigned issue identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueId(pub i64);

/// Store-assigned user identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ENUMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "EASY",
            Difficulty::Medium => "MEDIUM",
            Difficulty::Hard => "HARD",
        }
    }
}

impl FromStr for Difficulty {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Difficulty::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseError::new("difficulty", s))
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueStatus {
    Open,
    Claimed,
    InProgress,
    Completed,
    Closed,
}

impl IssueStatus {
    pub const ALL: [IssueStatus; 5] = [
        IssueStatus::Open,
        IssueStatus::Claimed,
        IssueStatus::InProgress,
        IssueStatus::Completed,
        IssueStatus::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Open => "OPEN",
            IssueStatus::Claimed => "CLAIMED",
            IssueStatus::InProgress => "IN_PROGRESS",
            IssueStatus::Completed => "COMPLETED",
            IssueStatus::Closed => "CLOSED",
        }
    }

    /// No transition leaves a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, IssueStatus::Completed | IssueStatus::Closed)
    }

    /// States in which an issue must have a claimant
    pub fn holds_claim(&self) -> bool {
        matches!(self, IssueStatus::Claimed | IssueStatus::InProgress)
    }
}

impl FromStr for IssueStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace(['-', ' '], "_");
        IssueStatus::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| ParseError::new("status", s))
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[default]
    Developer,
    Maintainer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Developer => "DEVELOPER",
            Role::Maintainer => "MAINTAINER",
        }
    }
}

impl FromStr for Role {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Role::Developer, Role::Maintainer]
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseError::new("role", s))
    }
}

// ============================================================================
// ISSUE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    /// Identifier in the external source, unique across the store
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub repository: String,
    pub owner: String,
    pub url: String,
    pub labels: Vec<String>,
    pub difficulty: Difficulty,
    pub reward: u32,
    pub status: IssueStatus,
    pub claimant: Option<UserId>,
    pub claimed_at: Option<DateTime<Utc>>,
    /// Who completed the issue; survives the claimant being cleared
    pub completed_by: Option<UserId>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Issue {
    /// Open and nobody holds it
    pub fn is_available(&self) -> bool {
        self.status == IssueStatus::Open && self.claimant.is_none()
    }

    /// Claimant, claim timestamp and completion timestamp agree with the status
    pub fn is_consistent(&self) -> bool {
        self.claimant.is_some() == self.status.holds_claim()
            && self.claimed_at.is_some() == self.claimant.is_some()
            && self.completed_at.is_some() == (self.status == IssueStatus::Completed)
    }
}

/// An issue ready to be inserted; the store assigns the id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewIssue {
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub repository: String,
    pub owner: String,
    pub url: String,
    pub labels: Vec<String>,
    pub difficulty: Difficulty,
    pub reward: u32,
    pub created_at: DateTime<Utc>,
}

impl NewIssue {
    /// Build an OPEN issue whose difficulty and reward follow from its labels
    pub fn classified(
        external_id: impl Into<String>,
        title: impl Into<String>,
        owner: impl Into<String>,
        repository: impl Into<String>,
        labels: Vec<String>,
    ) -> Self {
        let labels = dedup_labels(labels);
        let difficulty = classify::classify(&labels);
        Self {
            external_id: external_id.into(),
            title: title.into(),
            description: String::new(),
            repository: repository.into(),
            owner: owner.into(),
            url: String::new(),
            labels,
            difficulty,
            reward: classify::reward_for(difficulty),
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn into_issue(self, id: IssueId, ingested_at: DateTime<Utc>) -> Issue {
        Issue {
            id,
            external_id: self.external_id,
            title: self.title,
            description: self.description,
            repository: self.repository,
            owner: self.owner,
            url: self.url,
            labels: self.labels,
            difficulty: self.difficulty,
            reward: self.reward,
            status: IssueStatus::Open,
            claimant: None,
            claimed_at: None,
            completed_by: None,
            completed_at: None,
            created_at: self.created_at,
            updated_at: ingested_at,
        }
    }
}

/// Labels keep their first-seen order; repeats are dropped
pub fn dedup_labels(labels: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    labels
        .into_iter()
        .filter(|l| seen.insert(l.clone()))
        .collect()
}

// ============================================================================
// USER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub github_username: Option<String>,
    pub role: Role,
    pub reward_points: u32,
    pub reputation: u32,
    pub claimed_issues: u32,
    pub completed_issues: u32,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_maintainer(&self) -> bool {
        self.role == Role::Maintainer
    }

    pub fn apply_delta(&mut self, delta: &StatDelta) {
        self.reward_points = self.reward_points.saturating_add(delta.reward_points);
        self.reputation = self.reputation.saturating_add(delta.reputation);
        self.completed_issues = self.completed_issues.saturating_add(delta.completed);
        self.claimed_issues = if delta.claimed < 0 {
            self.claimed_issues
                .saturating_sub(delta.claimed.unsigned_abs())
        } else {
            self.claimed_issues.saturating_add(delta.claimed.unsigned_abs())
        };
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub github_username: Option<String>,
    #[serde(default)]
    pub role: Role,
}

impl NewUser {
    pub fn new(email: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            display_name: display_name.into(),
            github_username: None,
            role: Role::Developer,
        }
    }

    pub fn maintainer(mut self) -> Self {
        self.role = Role::Maintainer;
        self
    }

    pub fn with_github(mut self, username: impl Into<String>) -> Self {
        self.github_username = Some(username.into());
        self
    }

    pub fn into_user(self, id: UserId, now: DateTime<Utc>) -> User {
        User {
            id,
            email: self.email,
            display_name: self.display_name,
            github_username: self.github_username,
            role: self.role,
            reward_points: 0,
            reputation: 0,
            claimed_issues: 0,
            completed_issues: 0,
            created_at: now,
        }
    }
}

/// Increment applied to a user's statistics in one atomic step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatDelta {
    pub reward_points: u32,
    pub reputation: u32,
    /// Signed: releases decrement, floored at zero when applied
    pub claimed: i32,
    pub completed: u32,
}

impl StatDelta {
    pub const fn claim() -> Self {
        Self {
            reward_points: 0,
            reputation: 0,
            claimed: 1,
            completed: 0,
        }
    }

    pub const fn release() -> Self {
        Self {
            reward_points: 0,
            reputation: 0,
            claimed: -1,
            completed: 0,
        }
    }

    pub const fn completion(reward: u32) -> Self {
        Self {
            reward_points: reward,
            reputation: classify::reputation_for(reward),
            claimed: 0,
            completed: 1,
        }
    }
}

// ============================================================================
// TRANSITIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueChange {
    Claim,
    Release,
    StartWork,
    Complete,
    Close,
}

impl IssueChange {
    /// Verb used in log lines and error messages
    pub fn verb(&self) -> &'static str {
        match self {
            IssueChange::Claim => "claimed",
            IssueChange::Release => "unclaimed",
            IssueChange::StartWork => "started",
            IssueChange::Complete => "completed",
            IssueChange::Close => "closed",
        }
    }
}

/// A requested state change made by `actor`
///
/// Stores evaluate [`Transition::admits`] and apply [`Transition::apply_to`]
/// together with [`Transition::stat_delta`] as one atomic unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub actor: UserId,
    pub change: IssueChange,
    pub at: DateTime<Utc>,
}

impl Transition {
    pub fn new(actor: UserId, change: IssueChange) -> Self {
        Self {
            actor,
            change,
            at: Utc::now(),
        }
    }

    /// Guard evaluated against the current issue row
    pub fn admits(&self, issue: &Issue) -> bool {
        match self.change {
            IssueChange::Claim => issue.claimant.is_none() && issue.status == IssueStatus::Open,
            IssueChange::Release | IssueChange::Complete => issue.claimant == Some(self.actor),
            IssueChange::StartWork => {
                issue.claimant == Some(self.actor) && issue.status == IssueStatus::Claimed
            }
            IssueChange::Close => !issue.status.is_terminal(),
        }
    }

    /// Statistic update implied by applying this transition to `issue`
    pub fn stat_delta(&self, issue: &Issue) -> Option<(UserId, StatDelta)> {
        match self.change {
            IssueChange::Claim => Some((self.actor, StatDelta::claim())),
            IssueChange::Release => Some((self.actor, StatDelta::release())),
            IssueChange::StartWork => None,
            IssueChange::Complete => Some((self.actor, StatDelta::completion(issue.reward))),
            IssueChange::Close => issue.claimant.map(|c| (c, StatDelta::release())),
        }
    }

    pub fn apply_to(&self, issue: &mut Issue) {
        match self.change {
            IssueChange::Claim => {
                issue.claimant = Some(self.actor);
                issue.claimed_at = Some(self.at);
                issue.status = IssueStatus::Claimed;
            }
            IssueChange::Release => {
                issue.claimant = None;
                issue.claimed_at = None;
                issue.status = IssueStatus::Open;
            }
            IssueChange::StartWork => {
                issue.status = IssueStatus::InProgress;
            }
            IssueChange::Complete => {
                issue.claimant = None;
                issue.claimed_at = None;
                issue.completed_by = Some(self.actor);
                issue.completed_at = Some(self.at);
                issue.status = IssueStatus::Completed;
            }
            IssueChange::Close => {
                issue.claimant = None;
                issue.claimed_at = None;
                issue.status = IssueStatus::Closed;
            }
        }
        issue.updated_at = self.at;
    }
}

// ============================================================================
// FILTERS
// ============================================================================

/// Conjunctive issue filter; every unset field matches everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssueFilter {
    pub term: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub status: Option<IssueStatus>,
    pub unclaimed_only: bool,
    /// Currently claimed by, or completed by, this user
    pub involving: Option<UserId>,
}

impl IssueFilter {
    pub fn available() -> Self {
        Self {
            status: Some(IssueStatus::Open),
            unclaimed_only: true,
            ..Default::default()
        }
    }

    pub fn involving(user: UserId) -> Self {
        Self {
            involving: Some(user),
            ..Default::default()
        }
    }

    /// Search term, lowercased, or `None` when blank
    pub fn normalized_term(&self) -> Option<String> {
        self.term
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
    }

    pub fn matches(&self, issue: &Issue) -> bool {
        if let Some(term) = self.normalized_term() {
            let hit = [&issue.title, &issue.description, &issue.repository]
                .iter()
                .any(|field| field.to_lowercase().contains(&term));
            if !hit {
                return false;
            }
        }
        if self.difficulty.is_some_and(|d| d != issue.difficulty) {
            return false;
        }
        if self.status.is_some_and(|s| s != issue.status) {
            return false;
        }
        if self.unclaimed_only && issue.claimant.is_some() {
            return false;
        }
        if let Some(user) = self.involving {
            if issue.claimant != Some(user) && issue.completed_by != Some(user) {
                return false;
            }
        }
        true
    }
}
