//! Status API handlers.
//!
//! Provides:
//! - `GET /api/connections`: live snapshot of every federation connection
//! - `GET /api/connections/log`: accounting records of closed connections

use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use s2s_dialback::FederationSnapshot;
use s2s_observe::{query_records, ConnectionLogEntry, RecordFilter};
use s2s_types::Direction;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::AppState;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

/// Handler for `GET /api/connections`.
pub async fn connections_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<FederationSnapshot>, ApiError> {
    let snapshot = state
        .engine
        .snapshot()
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;
    Ok(Json(snapshot))
}

/// Query parameters for `GET /api/connections/log`.
#[derive(Debug, Deserialize)]
pub struct LogQuery {
    /// Filter by remote domain.
    pub peer: Option<String>,
    /// `in` or `out`.
    pub direction: Option<String>,
    /// Return records closed at or after this `YYYY-MM-DD HH:MM:SS` UTC timestamp.
    pub since: Option<String>,
    /// Maximum number of records to return (default: 100, max: 1000).
    pub limit: Option<i64>,
}

/// Response wrapper for accounting records.
#[derive(Debug, Serialize)]
pub struct LogResponse {
    /// Matching records, most recent first.
    pub records: Vec<ConnectionLogEntry>,
    pub count: usize,
}

/// Handler for `GET /api/connections/log`.
pub async fn connection_log_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<LogQuery>,
) -> Result<Json<LogResponse>, ApiError> {
    let direction = params
        .direction
        .as_deref()
        .map(str::parse::<Direction>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let filter = RecordFilter {
        peer_domain: params.peer,
        direction,
        since: params.since,
        limit: Some(params.limit.unwrap_or(100).clamp(1, 1000)),
    };

    let pool = state.pool.clone();
    let records = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| {
            ApiError::InternalServerError(format!("db connection failed: {}", e))
        })?;
        query_records(&conn, &filter).map_err(|e| ApiError::InternalServerError(e.to_string()))
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("task join error: {}", e)))??;

    let count = records.len();
    Ok(Json(LogResponse { records, count }))
}
