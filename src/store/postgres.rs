//! PostgreSQL store for the server
//!
//! Connects through a deadpool pool. Transitions lock the issue row with
//! `SELECT ... FOR UPDATE` before evaluating the guard, so concurrent claims
//! on one issue serialize and exactly one of them wins.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::types::ToSql;
use tokio_postgres::{GenericClient, NoTls, Row};
use tracing::info;

use super::{like_pattern, IssueStore, StoreResult, TransitionOutcome, UserStore};
use crate::error::StoreError;
use crate::model::{
    Issue, IssueFilter, IssueId, NewIssue, NewUser, StatDelta, Transition, User, UserId,
};

/// Database pool configuration
const DB_POOL_MAX_SIZE: usize = 20;
const DB_QUERY_TIMEOUT_SECS: u64 = 30;

const ISSUE_COLUMNS: &str = "id, external_id, title, description, repository, owner, url, \
     labels, difficulty, reward, status, claimant_id, claimed_at, completed_by, completed_at, \
     created_at, updated_at";

const USER_COLUMNS: &str = "id, email, display_name, github_username, role, reward_points, \
     reputation, claimed_issues, completed_issues, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Connect and apply pending migrations
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let mut config = Config::new();
        config.url = Some(database_url.to_string());
        config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        config.pool = Some(PoolConfig {
            max_size: DB_POOL_MAX_SIZE,
            timeouts: deadpool_postgres::Timeouts {
                wait: Some(Duration::from_secs(DB_QUERY_TIMEOUT_SECS)),
                create: Some(Duration::from_secs(10)),
                recycle: Some(Duration::from_secs(30)),
            },
            ..Default::default()
        });

        let pool = config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Corrupt(format!("invalid pool configuration: {}", e)))?;

        let client = pool.get().await?;
        client
            .execute(
                &format!("SET statement_timeout = '{}s'", DB_QUERY_TIMEOUT_SECS),
                &[],
            )
            .await?;

        info!(
            "Connected to PostgreSQL (pool_size: {}, query_timeout: {}s)",
            DB_POOL_MAX_SIZE, DB_QUERY_TIMEOUT_SECS
        );

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        let client = self.pool.get().await?;

        let exists: bool = client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_name = 'schema_migrations')",
                &[],
            )
            .await?
            .get(0);

        if !exists {
            client
                .batch_execute(include_str!("../../migrations/postgres/001_schema.sql"))
                .await?;
            info!("Applied migration 001_schema");
        }
        Ok(())
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn to_u32(value: i64, column: &str) -> StoreResult<u32> {
    u32::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("{} out of range: {}", column, value)))
}

fn issue_from_row(row: &Row) -> StoreResult<Issue> {
    Ok(Issue {
        id: IssueId(row.try_get("id")?),
        external_id: row.try_get("external_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        repository: row.try_get("repository")?,
        owner: row.try_get("owner")?,
        url: row.try_get("url")?,
        labels: row.try_get("labels")?,
        difficulty: row.try_get::<_, String>("difficulty")?.parse()?,
        reward: to_u32(row.try_get("reward")?, "reward")?,
        status: row.try_get::<_, String>("status")?.parse()?,
        claimant: row.try_get::<_, Option<i64>>("claimant_id")?.map(UserId),
        claimed_at: row.try_get("claimed_at")?,
        completed_by: row.try_get::<_, Option<i64>>("completed_by")?.map(UserId),
        completed_at: row.try_get("completed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn user_from_row(row: &Row) -> StoreResult<User> {
    Ok(User {
        id: UserId(row.try_get("id")?),
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        github_username: row.try_get("github_username")?,
        role: row.try_get::<_, String>("role")?.parse()?,
        reward_points: to_u32(row.try_get("reward_points")?, "reward_points")?,
        reputation: to_u32(row.try_get("reputation")?, "reputation")?,
        claimed_issues: to_u32(row.try_get("claimed_issues")?, "claimed_issues")?,
        completed_issues: to_u32(row.try_get("completed_issues")?, "completed_issues")?,
        created_at: row.try_get("created_at")?,
    })
}

async fn update_stats<C: GenericClient + Sync>(
    client: &C,
    id: UserId,
    delta: &StatDelta,
) -> StoreResult<Option<User>> {
    let row = client
        .query_opt(
            &format!(
                "UPDATE users SET
                    reward_points = reward_points + $1,
                    reputation = reputation + $2,
                    claimed_issues = GREATEST(0, claimed_issues + $3),
                    completed_issues = completed_issues + $4
                 WHERE id = $5
                 RETURNING {}",
                USER_COLUMNS
            ),
            &[
                &i64::from(delta.reward_points),
                &i64::from(delta.reputation),
                &i64::from(delta.claimed),
                &i64::from(delta.completed),
                &id.0,
            ],
        )
        .await?;
    row.as_ref().map(user_from_row).transpose()
}

// ============================================================================
// STORE IMPLEMENTATION
// ============================================================================

#[async_trait]
impl IssueStore for PgStore {
    async fn find_issue(&self, id: IssueId) -> StoreResult<Option<Issue>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM issues WHERE id = $1", ISSUE_COLUMNS),
                &[&id.0],
            )
            .await?;
        row.as_ref().map(issue_from_row).transpose()
    }

    async fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<Issue>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM issues WHERE external_id = $1", ISSUE_COLUMNS),
                &[&external_id],
            )
            .await?;
        row.as_ref().map(issue_from_row).transpose()
    }

    async fn find_filtered(&self, filter: &IssueFilter) -> StoreResult<Vec<Issue>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Box<dyn ToSql + Sync + Send>> = Vec::new();

        if let Some(term) = filter.normalized_term() {
            args.push(Box::new(like_pattern(&term)));
            let n = args.len();
            clauses.push(format!(
                "(LOWER(title) LIKE ${n} ESCAPE '\\' \
                  OR LOWER(description) LIKE ${n} ESCAPE '\\' \
                  OR LOWER(repository) LIKE ${n} ESCAPE '\\')"
            ));
        }
        if let Some(difficulty) = filter.difficulty {
            args.push(Box::new(difficulty.as_str()));
            clauses.push(format!("difficulty = ${}", args.len()));
        }
        if let Some(status) = filter.status {
            args.push(Box::new(status.as_str()));
            clauses.push(format!("status = ${}", args.len()));
        }
        if filter.unclaimed_only {
            clauses.push("claimant_id IS NULL".to_string());
        }
        if let Some(user) = filter.involving {
            args.push(Box::new(user.0));
            let n = args.len();
            clauses.push(format!("(claimant_id = ${n} OR completed_by = ${n})"));
        }

        let mut sql = format!("SELECT {} FROM issues", ISSUE_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY id ASC");

        let params: Vec<&(dyn ToSql + Sync)> = args
            .iter()
            .map(|a| a.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let client = self.pool.get().await?;
        let rows = client.query(&sql, &params).await?;
        rows.iter().map(issue_from_row).collect()
    }

    async fn count_issues(&self) -> StoreResult<u64> {
        let client = self.pool.get().await?;
        let count: i64 = client
            .query_one("SELECT COUNT(*) FROM issues", &[])
            .await?
            .get(0);
        Ok(count.max(0) as u64)
    }

    async fn insert_new_issue(&self, issue: NewIssue) -> StoreResult<Option<Issue>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "INSERT INTO issues
                        (external_id, title, description, repository, owner, url, labels,
                         difficulty, reward, status, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'OPEN', $10, NOW())
                     ON CONFLICT (external_id) DO NOTHING
                     RETURNING {}",
                    ISSUE_COLUMNS
                ),
                &[
                    &issue.external_id,
                    &issue.title,
                    &issue.description,
                    &issue.repository,
                    &issue.owner,
                    &issue.url,
                    &issue.labels,
                    &issue.difficulty.as_str(),
                    &i64::from(issue.reward),
                    &issue.created_at,
                ],
            )
            .await?;
        row.as_ref().map(issue_from_row).transpose()
    }

    async fn apply_transition(
        &self,
        id: IssueId,
        transition: &Transition,
    ) -> StoreResult<TransitionOutcome> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                &format!(
                    "SELECT {} FROM issues WHERE id = $1 FOR UPDATE",
                    ISSUE_COLUMNS
                ),
                &[&id.0],
            )
            .await?;
        let Some(row) = row else {
            return Ok(TransitionOutcome::IssueMissing);
        };
        let mut issue = issue_from_row(&row)?;

        let actor = tx
            .query_opt("SELECT 1 FROM users WHERE id = $1", &[&transition.actor.0])
            .await?;
        if actor.is_none() {
            return Ok(TransitionOutcome::UserMissing);
        }
        if !transition.admits(&issue) {
            return Ok(TransitionOutcome::Rejected(issue));
        }

        let delta = transition.stat_delta(&issue);
        transition.apply_to(&mut issue);
        tx.execute(
            "UPDATE issues SET status = $1, claimant_id = $2, claimed_at = $3,
                completed_by = $4, completed_at = $5, updated_at = $6
             WHERE id = $7",
            &[
                &issue.status.as_str(),
                &issue.claimant.map(|u| u.0),
                &issue.claimed_at,
                &issue.completed_by.map(|u| u.0),
                &issue.completed_at,
                &issue.updated_at,
                &id.0,
            ],
        )
        .await?;

        let user = match delta {
            Some((target, delta)) => match update_stats(&*tx, target, &delta).await? {
                Some(user) => Some(user),
                None => return Ok(TransitionOutcome::UserMissing),
            },
            None => None,
        };

        tx.commit().await?;
        Ok(TransitionOutcome::Applied { issue, user })
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_user(&self, id: UserId) -> StoreResult<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS),
                &[&id.0],
            )
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS),
                &[&email],
            )
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn insert_user(&self, user: NewUser) -> StoreResult<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "INSERT INTO users (email, display_name, github_username, role)
                     VALUES ($1, $2, $3, $4)
                     ON CONFLICT (email) DO NOTHING
                     RETURNING {}",
                    USER_COLUMNS
                ),
                &[
                    &user.email,
                    &user.display_name,
                    &user.github_username,
                    &user.role.as_str(),
                ],
            )
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn apply_stat_delta(&self, id: UserId, delta: StatDelta) -> StoreResult<Option<User>> {
        let client = self.pool.get().await?;
        update_stats(&**client, id, &delta).await
    }
}
