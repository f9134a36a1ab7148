//! SQLite store for local tracking
//!
//! Transitions run inside `BEGIN IMMEDIATE` so the guard read and the writes
//! hold the database write lock together.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use tracing::info;

use super::{like_pattern, IssueStore, StoreResult, TransitionOutcome, UserStore};
use crate::error::StoreError;
use crate::model::{
    Issue, IssueFilter, IssueId, NewIssue, NewUser, StatDelta, Transition, User, UserId,
};

const ISSUE_COLUMNS: &str = "id, external_id, title, description, repository, owner, url, \
     labels, difficulty, reward, status, claimant_id, claimed_at, completed_by, completed_at, \
     created_at, updated_at";

const USER_COLUMNS: &str = "id, email, display_name, github_username, role, reward_points, \
     reputation, claimed_issues, completed_issues, created_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        register_functions(&conn)?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// SQLite's `LOWER` only folds ASCII; search needs the same folding as
/// `str::to_lowercase` on the term
fn register_functions(conn: &Connection) -> StoreResult<()> {
    conn.create_scalar_function(
        "unicode_lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let value: Option<String> = ctx.get(0)?;
            Ok(value.map(|v| v.to_lowercase()))
        },
    )?;
    Ok(())
}

fn run_migrations(conn: &Connection) -> StoreResult<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        conn.execute_batch(include_str!("../../migrations/sqlite/001_schema.sql"))?;
        info!("Applied migration 001_schema");
    }
    Ok(())
}

// ============================================================================
// ROW MAPPING
// ============================================================================

/// Raw column values; decoded into domain types outside rusqlite's closure
struct IssueRow {
    id: i64,
    external_id: String,
    title: String,
    description: String,
    repository: String,
    owner: String,
    url: String,
    labels: String,
    difficulty: String,
    reward: u32,
    status: String,
    claimant_id: Option<i64>,
    claimed_at: Option<String>,
    completed_by: Option<i64>,
    completed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl IssueRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            external_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            repository: row.get(4)?,
            owner: row.get(5)?,
            url: row.get(6)?,
            labels: row.get(7)?,
            difficulty: row.get(8)?,
            reward: row.get(9)?,
            status: row.get(10)?,
            claimant_id: row.get(11)?,
            claimed_at: row.get(12)?,
            completed_by: row.get(13)?,
            completed_at: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }

    fn into_issue(self) -> StoreResult<Issue> {
        Ok(Issue {
            id: IssueId(self.id),
            external_id: self.external_id,
            title: self.title,
            description: self.description,
            repository: self.repository,
            owner: self.owner,
            url: self.url,
            labels: serde_json::from_str(&self.labels)?,
            difficulty: self.difficulty.parse()?,
            reward: self.reward,
            status: self.status.parse()?,
            claimant: self.claimant_id.map(UserId),
            claimed_at: parse_optional_time(self.claimed_at)?,
            completed_by: self.completed_by.map(UserId),
            completed_at: parse_optional_time(self.completed_at)?,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

struct UserRow {
    id: i64,
    email: String,
    display_name: String,
    github_username: Option<String>,
    role: String,
    reward_points: u32,
    reputation: u32,
    claimed_issues: u32,
    completed_issues: u32,
    created_at: String,
}

impl UserRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            display_name: row.get(2)?,
            github_username: row.get(3)?,
            role: row.get(4)?,
            reward_points: row.get(5)?,
            reputation: row.get(6)?,
            claimed_issues: row.get(7)?,
            completed_issues: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn into_user(self) -> StoreResult<User> {
        Ok(User {
            id: UserId(self.id),
            email: self.email,
            display_name: self.display_name,
            github_username: self.github_username,
            role: self.role.parse()?,
            reward_points: self.reward_points,
            reputation: self.reputation,
            claimed_issues: self.claimed_issues,
            completed_issues: self.completed_issues,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

fn parse_time(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{}': {}", value, e)))
}

fn parse_optional_time(value: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_time).transpose()
}

fn select_issue(conn: &Connection, id: IssueId) -> StoreResult<Option<Issue>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM issues WHERE id = ?1", ISSUE_COLUMNS),
            params![id.0],
            IssueRow::read,
        )
        .optional()?;
    row.map(IssueRow::into_issue).transpose()
}

fn select_user(conn: &Connection, id: UserId) -> StoreResult<Option<User>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            params![id.0],
            UserRow::read,
        )
        .optional()?;
    row.map(UserRow::into_user).transpose()
}

fn update_stats(conn: &Connection, id: UserId, delta: &StatDelta) -> StoreResult<Option<User>> {
    let changed = conn.execute(
        "UPDATE users SET
            reward_points = reward_points + ?1,
            reputation = reputation + ?2,
            claimed_issues = MAX(0, claimed_issues + ?3),
            completed_issues = completed_issues + ?4
         WHERE id = ?5",
        params![
            delta.reward_points,
            delta.reputation,
            delta.claimed,
            delta.completed,
            id.0
        ],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    select_user(conn, id)
}

// ============================================================================
// STORE IMPLEMENTATION
// ============================================================================

#[async_trait]
impl IssueStore for SqliteStore {
    async fn find_issue(&self, id: IssueId) -> StoreResult<Option<Issue>> {
        select_issue(&self.conn.lock(), id)
    }

    async fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<Issue>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("SELECT {} FROM issues WHERE external_id = ?1", ISSUE_COLUMNS),
                params![external_id],
                IssueRow::read,
            )
            .optional()?;
        row.map(IssueRow::into_issue).transpose()
    }

    async fn find_filtered(&self, filter: &IssueFilter) -> StoreResult<Vec<Issue>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<Value> = Vec::new();

        if let Some(term) = filter.normalized_term() {
            clauses.push(
                "(unicode_lower(title) LIKE ? ESCAPE '\\' \
                  OR unicode_lower(description) LIKE ? ESCAPE '\\' \
                  OR unicode_lower(repository) LIKE ? ESCAPE '\\')",
            );
            let pattern = like_pattern(&term);
            args.extend(std::iter::repeat(Value::Text(pattern)).take(3));
        }
        if let Some(difficulty) = filter.difficulty {
            clauses.push("difficulty = ?");
            args.push(Value::Text(difficulty.as_str().to_string()));
        }
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            args.push(Value::Text(status.as_str().to_string()));
        }
        if filter.unclaimed_only {
            clauses.push("claimant_id IS NULL");
        }
        if let Some(user) = filter.involving {
            clauses.push("(claimant_id = ? OR completed_by = ?)");
            args.push(Value::Integer(user.0));
            args.push(Value::Integer(user.0));
        }

        let mut sql = format!("SELECT {} FROM issues", ISSUE_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY id ASC");

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args), IssueRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(IssueRow::into_issue).collect()
    }

    async fn count_issues(&self) -> StoreResult<u64> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM issues", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    async fn insert_new_issue(&self, issue: NewIssue) -> StoreResult<Option<Issue>> {
        let labels = serde_json::to_string(&issue.labels)?;
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO issues
                (external_id, title, description, repository, owner, url, labels,
                 difficulty, reward, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'OPEN', ?10, ?11)",
            params![
                issue.external_id,
                issue.title,
                issue.description,
                issue.repository,
                issue.owner,
                issue.url,
                labels,
                issue.difficulty.as_str(),
                issue.reward,
                issue.created_at.to_rfc3339(),
                now,
            ],
        )?;
        if inserted == 0 {
            return Ok(None);
        }
        select_issue(&conn, IssueId(conn.last_insert_rowid()))
    }

    async fn apply_transition(
        &self,
        id: IssueId,
        transition: &Transition,
    ) -> StoreResult<TransitionOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(mut issue) = select_issue(&tx, id)? else {
            return Ok(TransitionOutcome::IssueMissing);
        };
        if select_user(&tx, transition.actor)?.is_none() {
            return Ok(TransitionOutcome::UserMissing);
        }
        if !transition.admits(&issue) {
            return Ok(TransitionOutcome::Rejected(issue));
        }

        let delta = transition.stat_delta(&issue);
        transition.apply_to(&mut issue);
        tx.execute(
            "UPDATE issues SET status = ?1, claimant_id = ?2, claimed_at = ?3,
                completed_by = ?4, completed_at = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                issue.status.as_str(),
                issue.claimant.map(|u| u.0),
                issue.claimed_at.map(|t| t.to_rfc3339()),
                issue.completed_by.map(|u| u.0),
                issue.completed_at.map(|t| t.to_rfc3339()),
                issue.updated_at.to_rfc3339(),
                id.0,
            ],
        )?;

        let user = match delta {
            Some((target, delta)) => match update_stats(&tx, target, &delta)? {
                Some(user) => Some(user),
                // dropping the transaction rolls the issue update back
                None => return Ok(TransitionOutcome::UserMissing),
            },
            None => None,
        };

        tx.commit()?;
        Ok(TransitionOutcome::Applied { issue, user })
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn find_user(&self, id: UserId) -> StoreResult<Option<User>> {
        select_user(&self.conn.lock(), id)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
                params![email],
                UserRow::read,
            )
            .optional()?;
        row.map(UserRow::into_user).transpose()
    }

    async fn insert_user(&self, user: NewUser) -> StoreResult<Option<User>> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO users (email, display_name, github_username, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.email,
                user.display_name,
                user.github_username,
                user.role.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        if inserted == 0 {
            return Ok(None);
        }
        select_user(&conn, UserId(conn.last_insert_rowid()))
    }

    async fn apply_stat_delta(&self, id: UserId, delta: StatDelta) -> StoreResult<Option<User>> {
        update_stats(&self.conn.lock(), id, &delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Difficulty, IssueChange, IssueStatus};

    fn new_issue(external_id: &str, title: &str, labels: &[&str]) -> NewIssue {
        NewIssue::classified(
            external_id,
            title,
            "acme",
            "widgets",
            labels.iter().map(|l| l.to_string()).collect(),
        )
    }

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let store = SqliteStore::in_memory().unwrap();
        let inserted = store
            .insert_new_issue(
                new_issue("9001", "Dark mode", &["enhancement", "good first issue"])
                    .with_description("Add a toggle")
                    .with_url("https://github.com/acme/widgets/issues/1"),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(inserted.status, IssueStatus::Open);
        assert_eq!(inserted.difficulty, Difficulty::Easy);
        assert_eq!(inserted.reward, 100);
        assert_eq!(
            inserted.labels,
            vec!["enhancement".to_string(), "good first issue".to_string()]
        );

        let found = store.find_by_external_id("9001").await.unwrap().unwrap();
        assert_eq!(found, inserted);
        assert!(store
            .insert_new_issue(new_issue("9001", "Dup", &[]))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_filtered_search_escapes_like_wildcards() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .insert_new_issue(new_issue("1", "Support 100% width", &[]))
            .await
            .unwrap();
        store
            .insert_new_issue(new_issue("2", "Support 1000 items", &["hard"]))
            .await
            .unwrap();

        let filter = IssueFilter {
            term: Some("100%".to_string()),
            ..Default::default()
        };
        let hits = store.find_filtered(&filter).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].external_id, "1");

        let hard = store
            .find_filtered(&IssueFilter {
                difficulty: Some(Difficulty::Hard),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hard.len(), 1);
        assert_eq!(hard[0].external_id, "2");

        let all = store.find_all().await.unwrap();
        assert_eq!(all.iter().map(|i| i.id.0).collect::<Vec<_>>(), vec![1, 2]);

        store
            .insert_new_issue(new_issue("3", "Überarbeitung der Ansicht", &[]))
            .await
            .unwrap();
        for term in ["überarbeitung", "ÜBERARBEITUNG", "ansicht"] {
            let hits = store
                .find_filtered(&IssueFilter {
                    term: Some(term.to_string()),
                    ..Default::default()
                })
                .await
                .unwrap();
            assert_eq!(hits.len(), 1, "term {}", term);
            assert_eq!(hits[0].external_id, "3");
        }
    }

    #[tokio::test]
    async fn test_transition_writes_issue_and_stats_together() {
        let store = SqliteStore::in_memory().unwrap();
        let issue = store
            .insert_new_issue(new_issue("7", "Leak", &["expert"]))
            .await
            .unwrap()
            .unwrap();
        let user = store
            .insert_user(NewUser::new("dev@example.com", "Dev"))
            .await
            .unwrap()
            .unwrap();

        for change in [IssueChange::Claim, IssueChange::StartWork, IssueChange::Complete] {
            let outcome = store
                .apply_transition(issue.id, &Transition::new(user.id, change))
                .await
                .unwrap();
            assert!(matches!(outcome, TransitionOutcome::Applied { .. }));
        }

        let issue = store.find_issue(issue.id).await.unwrap().unwrap();
        assert_eq!(issue.status, IssueStatus::Completed);
        assert_eq!(issue.claimant, None);
        assert_eq!(issue.completed_by, Some(user.id));
        assert!(issue.is_consistent());

        let user = store.find_user(user.id).await.unwrap().unwrap();
        assert_eq!(user.reward_points, 500);
        assert_eq!(user.reputation, 50);
        assert_eq!(user.completed_issues, 1);
        assert_eq!(user.claimed_issues, 1);

        let mine = store
            .find_filtered(&IssueFilter::involving(user.id))
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
    }

    #[tokio::test]
    async fn test_release_floors_claimed_counter() {
        let store = SqliteStore::in_memory().unwrap();
        let user = store
            .insert_user(NewUser::new("dev@example.com", "Dev"))
            .await
            .unwrap()
            .unwrap();
        let after = store
            .apply_stat_delta(user.id, StatDelta::release())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.claimed_issues, 0);
    }

    #[tokio::test]
    async fn test_duplicate_email_is_skipped() {
        let store = SqliteStore::in_memory().unwrap();
        let first = store
            .insert_user(NewUser::new("a@example.com", "A").maintainer())
            .await
            .unwrap()
            .unwrap();
        assert!(first.is_maintainer());
        assert!(store
            .insert_user(NewUser::new("a@example.com", "B"))
            .await
            .unwrap()
            .is_none());
    }
}
