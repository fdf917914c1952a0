//! HTTP surface: health, read-only job views, restart trigger and the relay producer

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::batch::{JobLaunchCoordinator, JobRepository};
use crate::config::ServerConfig;
use crate::db;
use crate::error::AppError;
use crate::relay::{relay_routes, Broker};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub jobs: JobRepository,
    /// Absent when the file pipeline is not running in this process
    pub coordinator: Option<Arc<JobLaunchCoordinator>>,
    pub broker: Broker,
}

impl AppState {
    pub fn new(db: SqlitePool, broker: Broker) -> Self {
        Self {
            jobs: JobRepository::new(db.clone()),
            db,
            coordinator: None,
            broker,
        }
    }

    pub fn with_coordinator(mut self, coordinator: Arc<JobLaunchCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }
}

/// Create the application router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    let relay = relay_routes().with_state(state.broker.clone());

    Router::new()
        .route("/health", get(health_check))
        .route("/jobs", get(list_jobs))
        .route("/jobs/:execution_id", get(get_job))
        .route("/jobs/:execution_id/restart", post(restart_job))
        .with_state(state)
        .merge(relay)
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until `shutdown` fires
pub async fn serve(
    config: &ServerConfig,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

/// Health check handler
///
/// GET /health
async fn health_check(State(state): State<AppState>) -> Response {
    match db::ping(&state.db).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected"
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "database": "unreachable"
                })),
            )
                .into_response()
        },
    }
}

/// List job executions, newest first
///
/// GET /jobs
async fn list_jobs(State(state): State<AppState>) -> Result<Response, AppError> {
    let executions = state.jobs.list().await?;
    Ok((StatusCode::OK, Json(json!({ "jobs": executions }))).into_response())
}

/// Get one job execution
///
/// GET /jobs/:execution_id
async fn get_job(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let execution = state.jobs.get(execution_id).await?;
    Ok((StatusCode::OK, Json(json!(execution))).into_response())
}

/// Restart a FAILED execution from its checkpoint
///
/// POST /jobs/:execution_id/restart
async fn restart_job(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let coordinator = state
        .coordinator
        .as_ref()
        .ok_or_else(|| AppError::Unavailable("file pipeline is not running".to_string()))?;

    let job = coordinator.restart(execution_id).await?;
    Ok((StatusCode::ACCEPTED, Json(json!(job.execution))).into_response())
}
