//! Synchronization pipeline
//!
//! Pulls open issues for each configured repository from an [`IssueSource`]
//! and inserts the ones the store has not seen yet. Existing issues are never
//! touched, so local claim and completion state survives re-syncs.
//!
//! Repositories are processed one at a time with a pacing delay between
//! them. A failure fetching one repository is recorded in the run's
//! [`SyncReport`] and the run moves on; only store failures abort it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{StoreError, SyncError};
use crate::model::NewIssue;
use crate::source::{ExternalIssueRecord, IssueSource, RepoRef, SourceError};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub repos: Vec<RepoRef>,
    /// Delay between two repositories
    pub pace: Duration,
    /// Upper bound on pages fetched per repository
    pub max_pages: u32,
    /// Deadline for a single page fetch
    pub fetch_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            repos: Vec::new(),
            pace: Duration::from_secs(1),
            max_pages: 10,
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepoFailure {
    pub repo: String,
    pub page: u32,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub repos_attempted: usize,
    pub repos_failed: usize,
    pub fetched: usize,
    pub inserted: usize,
    pub skipped_existing: usize,
    pub skipped_pull_requests: usize,
    pub failures: Vec<RepoFailure>,
    /// A stop was requested and remaining repositories were not visited
    pub interrupted: bool,
    /// Store failure that ended the run early
    pub aborted: Option<String>,
}

impl SyncReport {
    fn start() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            repos_attempted: 0,
            repos_failed: 0,
            fetched: 0,
            inserted: 0,
            skipped_existing: 0,
            skipped_pull_requests: 0,
            failures: Vec::new(),
            interrupted: false,
            aborted: None,
        }
    }

    /// One line naming every failed repository, or `None` if all succeeded
    pub fn error_summary(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        let details: Vec<String> = self
            .failures
            .iter()
            .map(|f| format!("{} (page {}): {}", f.repo, f.page, f.error))
            .collect();
        Some(format!(
            "{} of {} repositories failed: {}",
            self.repos_failed,
            self.repos_attempted,
            details.join("; ")
        ))
    }
}

/// Asks a running sync to stop at the next repository boundary
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

enum RepoError {
    Source { page: u32, error: SourceError },
    Store(StoreError),
}

impl From<StoreError> for RepoError {
    fn from(e: StoreError) -> Self {
        RepoError::Store(e)
    }
}

/// Map an external record to an OPEN issue of `repo`
pub fn new_issue_from(repo: &RepoRef, record: ExternalIssueRecord) -> NewIssue {
    let labels = record.label_names();
    NewIssue::classified(
        record.external_id,
        record.title,
        &repo.owner,
        &repo.repo,
        labels,
    )
    .with_description(record.body.unwrap_or_default())
    .with_url(record.html_url)
    .with_created_at(record.created_at)
}

pub struct SyncPipeline {
    source: Arc<dyn IssueSource>,
    store: Arc<dyn Store>,
    settings: SyncSettings,
    running: tokio::sync::Mutex<()>,
    stop: StopHandle,
    last_report: RwLock<Option<SyncReport>>,
}

impl SyncPipeline {
    pub fn new(source: Arc<dyn IssueSource>, store: Arc<dyn Store>, settings: SyncSettings) -> Self {
        Self {
            source,
            store,
            settings,
            running: tokio::sync::Mutex::new(()),
            stop: StopHandle::default(),
            last_report: RwLock::new(None),
        }
    }

    pub fn repos(&self) -> &[RepoRef] {
        &self.settings.repos
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    pub fn last_report(&self) -> Option<SyncReport> {
        self.last_report.read().clone()
    }

    /// Run one full synchronization. A second concurrent call is rejected
    /// with [`SyncError::AlreadyRunning`].
    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        let _running = self
            .running
            .try_lock()
            .map_err(|_| SyncError::AlreadyRunning)?;
        self.stop.reset();

        let mut report = SyncReport::start();
        info!(
            "Sync {} started for {} repositories",
            report.run_id,
            self.settings.repos.len()
        );

        for (index, repo) in self.settings.repos.iter().enumerate() {
            if index > 0 && !self.settings.pace.is_zero() {
                tokio::time::sleep(self.settings.pace).await;
            }
            if self.stop.is_requested() {
                warn!(
                    "Sync {} interrupted before {} ({} repositories not visited)",
                    report.run_id,
                    repo,
                    self.settings.repos.len() - index
                );
                report.interrupted = true;
                break;
            }

            report.repos_attempted += 1;
            let inserted_before = report.inserted;
            match self.sync_repo(repo, &mut report).await {
                Ok(()) => {
                    let inserted = report.inserted - inserted_before;
                    if inserted > 0 {
                        info!("Synced {} new issues from {}", inserted, repo);
                    } else {
                        debug!("No new issues from {}", repo);
                    }
                }
                Err(RepoError::Source { page, error }) => {
                    warn!(
                        "Sync {}: failed to fetch {} page {}: {}",
                        report.run_id, repo, page, error
                    );
                    report.repos_failed += 1;
                    report.failures.push(RepoFailure {
                        repo: repo.to_string(),
                        page,
                        error: error.to_string(),
                    });
                }
                Err(RepoError::Store(e)) => {
                    error!("Sync {} aborted on {}: {}", report.run_id, repo, e);
                    report.finished_at = Utc::now();
                    report.aborted = Some(format!("{}: {}", repo, e));
                    *self.last_report.write() = Some(report.clone());
                    return Err(SyncError::Aborted {
                        source: e,
                        report: Box::new(report),
                    });
                }
            }
        }

        report.finished_at = Utc::now();
        info!(
            "Sync {} complete: {} fetched, {} inserted, {} already known, {} failed repositories",
            report.run_id,
            report.fetched,
            report.inserted,
            report.skipped_existing,
            report.repos_failed
        );
        *self.last_report.write() = Some(report.clone());
        Ok(report)
    }

    async fn sync_repo(&self, repo: &RepoRef, report: &mut SyncReport) -> Result<(), RepoError> {
        let page_size = self.source.page_size().max(1) as usize;

        for page in 1..=self.settings.max_pages.max(1) {
            let records = self
                .fetch_page(repo, page)
                .await
                .map_err(|error| RepoError::Source { page, error })?;
            let count = records.len();
            report.fetched += count;

            for record in records {
                if record.is_pull_request {
                    report.skipped_pull_requests += 1;
                    continue;
                }
                match self.store.insert_new_issue(new_issue_from(repo, record)).await? {
                    Some(issue) => {
                        debug!("Inserted issue {} ({})", issue.id, issue.external_id);
                        report.inserted += 1;
                    }
                    None => report.skipped_existing += 1,
                }
            }

            if count < page_size {
                return Ok(());
            }
        }

        debug!(
            "Stopped {} after {} pages",
            repo,
            self.settings.max_pages.max(1)
        );
        Ok(())
    }

    async fn fetch_page(
        &self,
        repo: &RepoRef,
        page: u32,
    ) -> Result<Vec<ExternalIssueRecord>, SourceError> {
        let timeout = self.settings.fetch_timeout;
        tokio::time::timeout(
            timeout,
            self.source.fetch_open_issues(&repo.owner, &repo.repo, page),
        )
        .await
        .unwrap_or(Err(SourceError::Timeout(timeout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Difficulty;
    use crate::source::ExternalLabel;

    fn record(id: &str, labels: &[&str]) -> ExternalIssueRecord {
        ExternalIssueRecord {
            external_id: id.to_string(),
            number: 1,
            title: "Crash when saving".to_string(),
            body: None,
            state: "open".to_string(),
            html_url: "https://github.com/acme/app/issues/1".to_string(),
            created_at: "2024-03-01T12:00:00Z".parse().unwrap(),
            labels: labels
                .iter()
                .map(|l| ExternalLabel {
                    name: l.to_string(),
                    color: None,
                })
                .collect(),
            reporter: Some("octocat".to_string()),
            is_pull_request: false,
        }
    }

    #[test]
    fn test_new_issue_from_record() {
        let repo = RepoRef::new("acme", "app");
        let issue = new_issue_from(&repo, record("55", &["Expert", "bug", "bug"]));

        assert_eq!(issue.external_id, "55");
        assert_eq!(issue.owner, "acme");
        assert_eq!(issue.repository, "app");
        assert_eq!(issue.description, "");
        assert_eq!(issue.url, "https://github.com/acme/app/issues/1");
        assert_eq!(issue.labels, vec!["Expert".to_string(), "bug".to_string()]);
        assert_eq!(issue.difficulty, Difficulty::Hard);
        assert_eq!(issue.reward, 500);
        assert_eq!(issue.created_at.to_rfc3339(), "2024-03-01T12:00:00+00:00");
    }

    #[test]
    fn test_error_summary() {
        let mut report = SyncReport::start();
        assert_eq!(report.error_summary(), None);

        report.repos_attempted = 3;
        report.repos_failed = 1;
        report.failures.push(RepoFailure {
            repo: "acme/app".to_string(),
            page: 2,
            error: "unexpected status 502: bad gateway".to_string(),
        });
        assert_eq!(
            report.error_summary().unwrap(),
            "1 of 3 repositories failed: acme/app (page 2): unexpected status 502: bad gateway"
        );
    }

    #[test]
    fn test_stop_handle_is_shared() {
        let handle = StopHandle::default();
        let other = handle.clone();
        other.request_stop();
        assert!(handle.is_requested());
        handle.reset();
        assert!(!other.is_requested());
    }
}
