//! Maintainer-only operations

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{AdminError, LifecycleError, SyncError};
use crate::lifecycle::IssueLifecycle;
use crate::model::{Issue, IssueId, User, UserId};
use crate::store::Store;
use crate::sync::{SyncPipeline, SyncReport};

/// Outcome of an administrative sync trigger
#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub success: bool,
    pub report: Option<SyncReport>,
    pub error_summary: Option<String>,
}

#[derive(Clone)]
pub struct AdminService {
    store: Arc<dyn Store>,
    lifecycle: IssueLifecycle,
    pipeline: Arc<SyncPipeline>,
}

impl AdminService {
    pub fn new(store: Arc<dyn Store>, pipeline: Arc<SyncPipeline>) -> Self {
        Self {
            lifecycle: IssueLifecycle::new(store.clone()),
            store,
            pipeline,
        }
    }

    async fn require_maintainer(&self, actor: UserId) -> Result<User, AdminError> {
        let user = self
            .store
            .find_user(actor)
            .await?
            .ok_or_else(|| LifecycleError::user_not_found(actor))?;
        if !user.is_maintainer() {
            warn!("User {} attempted an admin operation without MAINTAINER role", actor);
            return Err(LifecycleError::Forbidden(format!(
                "user {} is not a maintainer",
                actor
            ))
            .into());
        }
        Ok(user)
    }

    /// Run synchronization now
    ///
    /// Per-repository failures still count as success; they show up in the
    /// error summary. A run already in progress is an error.
    pub async fn trigger_sync(&self, actor: UserId) -> Result<SyncSummary, AdminError> {
        let user = self.require_maintainer(actor).await?;
        info!("Sync triggered by {} ({})", user.id, user.email);

        match self.pipeline.run().await {
            Ok(report) => Ok(SyncSummary {
                success: true,
                error_summary: report.error_summary(),
                report: Some(report),
            }),
            Err(SyncError::Aborted { source, report }) => Ok(SyncSummary {
                success: false,
                error_summary: Some(source.to_string()),
                report: Some(*report),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn last_sync(&self) -> Option<SyncReport> {
        self.pipeline.last_report()
    }

    pub fn sync_running(&self) -> bool {
        self.pipeline.is_running()
    }

    pub async fn close_issue(&self, issue: IssueId, actor: UserId) -> Result<Issue, AdminError> {
        self.require_maintainer(actor).await?;
        Ok(self.lifecycle.close(issue, actor).await?)
    }
}
