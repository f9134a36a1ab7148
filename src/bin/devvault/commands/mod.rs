//! CLI commands

pub mod classify;
pub mod issues;
pub mod sync;
pub mod transition;
pub mod users;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use devvault::{Config, Issue, SqliteStore, Store, UserId};

use crate::style::*;

/// Loaded configuration plus the opened local store
pub struct Context {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub user: Option<UserId>,
}

impl Context {
    pub fn open(config_path: &Path, db: Option<PathBuf>, user: Option<i64>) -> Result<Self> {
        let config = Config::load_from(config_path)?.with_env_overrides()?;
        let path = db.unwrap_or_else(|| config.database.sqlite_path.clone());
        let store = SqliteStore::open(&path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        Ok(Self {
            config,
            store: Arc::new(store),
            user: user.map(UserId),
        })
    }

    /// The acting user, required by commands that act on someone's behalf
    pub fn require_user(&self) -> Result<UserId> {
        self.user
            .ok_or_else(|| anyhow::anyhow!("no user given; pass --user <id> or set DEVVAULT_USER"))
    }
}

pub fn print_issue_table(issues: &[Issue]) {
    if issues.is_empty() {
        print_info("No issues found");
        return;
    }

    println!(
        "{:>5}  {:<6}  {:>6}  {:<11}  {:<28}  {}",
        "ID", "LEVEL", "REWARD", "STATUS", "REPOSITORY", "TITLE"
    );
    for issue in issues {
        println!(
            "{:>5}  {}  {:>6}  {}  {:<28}  {}",
            issue.id.0,
            style_difficulty(issue.difficulty),
            issue.reward,
            style_status(issue.status),
            truncate(&format!("{}/{}", issue.owner, issue.repository), 28),
            truncate(&issue.title, 60)
        );
    }
    println!();
    println!("{}", style_dim(&format!("{} issues", issues.len())));
}
