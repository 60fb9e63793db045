use std::collections::BTreeMap;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    pool::{AcquireError, PoolSnapshot},
    scheduler::DispatchError,
    stats::CounterSnapshot,
};

#[derive(Debug, ToSchema, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(skip)]
    status_code: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status_code: StatusCode, message: &str) -> Self {
        Self {
            status_code,
            message: message.to_string(),
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal_error(e: anyhow::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!("API error: {} - {}", self.status_code, self.message);
        (
            self.status_code,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match &e {
            DispatchError::Acquire(AcquireError::ShuttingDown) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, &e.to_string())
            }
            DispatchError::Acquire(AcquireError::Launch(_)) | DispatchError::Transport(_) => {
                Self::new(StatusCode::BAD_GATEWAY, &e.to_string())
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SetStrategyRequest {
    /// "lru" or "mru", case-insensitive; "lcs" is accepted for "lru".
    pub strategy: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StrategyResponse {
    pub strategy: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FunctionStats {
    pub cold_starts: u64,
    pub warm_starts: u64,
    pub requests_queued: u64,
    pub requests_failed: u64,
    pub idle: usize,
    pub busy: usize,
    pub queue_depth: usize,
    pub concurrency_cap: usize,
}

impl FunctionStats {
    pub fn from_parts(counters: CounterSnapshot, pool: PoolSnapshot) -> Self {
        Self {
            cold_starts: counters.cold_starts,
            warm_starts: counters.warm_starts,
            requests_queued: counters.requests_queued,
            requests_failed: counters.requests_failed,
            idle: pool.idle,
            busy: pool.busy,
            queue_depth: pool.queue_depth,
            concurrency_cap: pool.concurrency_cap,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatsResponse {
    pub total_cold_starts: u64,
    pub total_warm_starts: u64,
    pub total_requests_queued: u64,
    pub total_requests_failed: u64,
    pub strategy: String,
    pub per_function: BTreeMap<String, FunctionStats>,
}
