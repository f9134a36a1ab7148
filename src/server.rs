//! DevVault HTTP server
//!
//! Thin JSON surface over the lifecycle, user and admin services. The
//! surrounding system authenticates callers and passes the caller's user id
//! in the `x-user-id` header.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::admin::{AdminService, SyncSummary};
use crate::error::{AdminError, LifecycleError, SyncError};
use crate::lifecycle::{IssueLifecycle, SearchQuery};
use crate::model::{Issue, IssueId, NewUser, User, UserId};
use crate::sync::{StopHandle, SyncReport};
use crate::users::UserService;

pub const USER_ID_HEADER: &str = "x-user-id";

pub struct AppState {
    pub lifecycle: IssueLifecycle,
    pub users: UserService,
    pub admin: AdminService,
    pub started_at: std::time::Instant,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/issues", get(search_handler))
        .route("/issues/available", get(available_handler))
        .route("/issues/:id", get(issue_handler))
        .route("/issues/:id/claim", post(claim_handler))
        .route("/issues/:id/unclaim", post(unclaim_handler))
        .route("/issues/:id/start", post(start_handler))
        .route("/issues/:id/complete", post(complete_handler))
        .route("/users", post(register_handler))
        .route("/users/:id", get(profile_handler))
        .route("/users/:id/issues", get(user_issues_handler))
        .route("/admin/sync", post(trigger_sync_handler))
        .route("/admin/sync/last", get(last_sync_handler))
        .route("/admin/issues/:id/close", post(close_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// ERRORS AND CALLER IDENTITY
// ============================================================================

pub struct ApiError {
    status: StatusCode,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

pub fn lifecycle_status(e: &LifecycleError) -> StatusCode {
    match e {
        LifecycleError::NotFound { .. } => StatusCode::NOT_FOUND,
        LifecycleError::AlreadyClaimed(_)
        | LifecycleError::InvalidState { .. }
        | LifecycleError::EmailTaken(_) => StatusCode::CONFLICT,
        LifecycleError::Forbidden(_) => StatusCode::FORBIDDEN,
        LifecycleError::Validation(_) => StatusCode::BAD_REQUEST,
        LifecycleError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        let status = lifecycle_status(&e);
        if status.is_server_error() {
            error!("Request failed: {}", e);
        }
        ApiError {
            status,
            message: e.to_string(),
        }
    }
}

impl From<AdminError> for ApiError {
    fn from(e: AdminError) -> Self {
        match e {
            AdminError::Lifecycle(e) => e.into(),
            AdminError::Sync(SyncError::AlreadyRunning) => ApiError {
                status: StatusCode::CONFLICT,
                message: SyncError::AlreadyRunning.to_string(),
            },
            AdminError::Sync(e) => {
                error!("Sync failed: {}", e);
                ApiError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: e.to_string(),
                }
            }
        }
    }
}

/// Caller's user id, taken from the `x-user-id` header
pub struct Caller(pub UserId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError {
                status: StatusCode::UNAUTHORIZED,
                message: format!("missing {} header", USER_ID_HEADER),
            })?;
        let id = value.trim().parse::<i64>().map_err(|_| ApiError {
            status: StatusCode::BAD_REQUEST,
            message: format!("invalid {} header: '{}'", USER_ID_HEADER, value),
        })?;
        Ok(Caller(UserId(id)))
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ============================================================================
// HANDLERS
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    healthy: bool,
    version: &'static str,
    uptime_secs: u64,
    sync_running: bool,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        sync_running: state.admin.sync_running(),
    })
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Vec<Issue>> {
    Ok(Json(state.lifecycle.search(&query).await?))
}

async fn available_handler(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Issue>> {
    Ok(Json(state.lifecycle.list_available().await?))
}

async fn issue_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Issue> {
    Ok(Json(state.lifecycle.get(IssueId(id)).await?))
}

async fn claim_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Caller(user): Caller,
) -> ApiResult<Issue> {
    Ok(Json(state.lifecycle.claim(IssueId(id), user).await?))
}

async fn unclaim_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Caller(user): Caller,
) -> ApiResult<Issue> {
    Ok(Json(state.lifecycle.unclaim(IssueId(id), user).await?))
}

async fn start_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Caller(user): Caller,
) -> ApiResult<Issue> {
    Ok(Json(state.lifecycle.start_work(IssueId(id), user).await?))
}

async fn complete_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Caller(user): Caller,
) -> ApiResult<Issue> {
    Ok(Json(state.lifecycle.complete(IssueId(id), user).await?))
}

async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(user): Json<NewUser>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = state.users.register(user).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn profile_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<User> {
    Ok(Json(state.users.profile(UserId(id)).await?))
}

async fn user_issues_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<Issue>> {
    Ok(Json(state.lifecycle.issues_for_user(UserId(id)).await?))
}

async fn trigger_sync_handler(
    State(state): State<Arc<AppState>>,
    Caller(user): Caller,
) -> ApiResult<SyncSummary> {
    Ok(Json(state.admin.trigger_sync(user).await?))
}

async fn last_sync_handler(State(state): State<Arc<AppState>>) -> ApiResult<Option<SyncReport>> {
    Ok(Json(state.admin.last_sync()))
}

async fn close_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Caller(user): Caller,
) -> ApiResult<Issue> {
    Ok(Json(state.admin.close_issue(IssueId(id), user).await?))
}

/// Run the server until Ctrl-C, then ask any running sync to stop
pub async fn run_server(
    host: &str,
    port: u16,
    state: Arc<AppState>,
    sync_stop: StopHandle,
) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = format!("{}:{}", host, port);

    info!("Starting DevVault server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
            sync_stop.request_stop();
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::model::IssueStatus;

    #[test]
    fn test_lifecycle_error_statuses() {
        assert_eq!(
            lifecycle_status(&LifecycleError::issue_not_found(IssueId(1))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            lifecycle_status(&LifecycleError::AlreadyClaimed(IssueId(1))),
            StatusCode::CONFLICT
        );
        assert_eq!(
            lifecycle_status(&LifecycleError::InvalidState {
                id: IssueId(1),
                status: IssueStatus::Closed,
                action: "claimed",
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            lifecycle_status(&LifecycleError::Forbidden("no".to_string())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            lifecycle_status(&LifecycleError::Validation("bad".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            lifecycle_status(&LifecycleError::Store(StoreError::Corrupt("x".to_string()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_already_running_is_conflict() {
        let err: ApiError = AdminError::Sync(SyncError::AlreadyRunning).into();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }
}
