//! External issue source contract
//!
//! A paginated, read-only feed of open issues per repository. The GitHub
//! client implements it for production; tests plug in an in-process fake.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest page the GitHub issues endpoint will serve
pub const MAX_PAGE_SIZE: u32 = 100;

/// A repository to ingest from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLabel {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

/// One issue as reported by the external source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalIssueRecord {
    pub external_id: String,
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub state: String,
    pub html_url: String,
    pub created_at: DateTime<Utc>,
    pub labels: Vec<ExternalLabel>,
    pub reporter: Option<String>,
    /// The GitHub issues feed also lists pull requests
    pub is_pull_request: bool,
}

impl ExternalIssueRecord {
    pub fn label_names(&self) -> Vec<String> {
        self.labels.iter().map(|l| l.name.clone()).collect()
    }
}

/// Failure fetching or decoding one page for one repository
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("rate limit exhausted, resets in {reset_in_secs}s")]
    RateLimited { reset_in_secs: i64 },

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("malformed response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait IssueSource: Send + Sync {
    /// Fetch one page (1-based) of open issues for `owner/repo`
    async fn fetch_open_issues(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
    ) -> Result<Vec<ExternalIssueRecord>, SourceError>;

    /// Records per full page; a shorter page is the last one
    fn page_size(&self) -> u32 {
        MAX_PAGE_SIZE
    }
}
