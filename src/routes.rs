use std::{collections::BTreeMap, sync::Arc};

use axum::{
    Json,
    Router,
    body::Body,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    data_model::Strategy,
    http_objects::{
        ApiError,
        FunctionStats,
        SetStrategyRequest,
        StatsResponse,
        StrategyResponse,
    },
    scheduler::Scheduler,
};

pub const CONTAINER_ID_HEADER: &str = "x-warmpool-container-id";
pub const EXECUTION_MS_HEADER: &str = "x-warmpool-execution-ms";

#[derive(OpenApi)]
#[openapi(
    paths(invoke, set_strategy, stats, reset_stats),
    components(schemas(
        ApiError,
        SetStrategyRequest,
        StrategyResponse,
        StatsResponse,
        FunctionStats,
    )),
    tags(
        (name = "warmpool", description = "Warm-pool FaaS scheduler API")
    )
)]
struct ApiDoc;

#[derive(Clone)]
pub struct RouteState {
    pub scheduler: Arc<Scheduler>,
}

pub fn create_routes(route_state: RouteState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/docs/swagger").url("/docs/openapi.json", ApiDoc::openapi()))
        .route(
            "/invoke/{function_id}",
            get(invoke).with_state(route_state.clone()),
        )
        .route(
            "/set_strategy",
            post(set_strategy).with_state(route_state.clone()),
        )
        .route("/stats", get(stats).with_state(route_state.clone()))
        .route(
            "/stats/reset",
            post(reset_stats).with_state(route_state.clone()),
        )
        .layer(TraceLayer::new_for_http())
}

/// Dispatch one invocation of a function
#[utoipa::path(
    get,
    path = "/invoke/{function_id}",
    tag = "warmpool",
    responses(
        (status = 200, description = "function response body"),
        (status = 502, description = "container launch or transport failure"),
        (status = 503, description = "scheduler is shutting down")
    ),
)]
async fn invoke(
    Path(function_id): Path<String>,
    State(state): State<RouteState>,
) -> Result<Response, ApiError> {
    let reply = state
        .scheduler
        .dispatch(&function_id)
        .await
        .map_err(ApiError::from)?;
    let status = StatusCode::from_u16(reply.status)
        .map_err(|e| ApiError::internal_error(anyhow::anyhow!(e)))?;
    Response::builder()
        .status(status)
        .header(CONTAINER_ID_HEADER, reply.container_id)
        .header(EXECUTION_MS_HEADER, reply.execution_time_ms.to_string())
        .body(Body::from(reply.body))
        .map_err(|e| ApiError::internal_error(anyhow::anyhow!(e)))
}

/// Swap the container reuse strategy
#[utoipa::path(
    post,
    path = "/set_strategy",
    request_body = SetStrategyRequest,
    tag = "warmpool",
    responses(
        (status = 200, description = "strategy changed", body = StrategyResponse),
        (status = 400, description = "unknown strategy")
    ),
)]
async fn set_strategy(
    State(state): State<RouteState>,
    Json(request): Json<SetStrategyRequest>,
) -> Result<Json<StrategyResponse>, ApiError> {
    let strategy: Strategy = request
        .strategy
        .parse()
        .map_err(|e: crate::data_model::UnknownStrategy| ApiError::bad_request(&e.to_string()))?;
    state.scheduler.set_strategy(strategy);
    Ok(Json(StrategyResponse {
        strategy: strategy.to_string(),
    }))
}

/// Snapshot of dispatch counters and pool gauges
#[utoipa::path(
    get,
    path = "/stats",
    tag = "warmpool",
    responses(
        (status = 200, description = "current statistics", body = StatsResponse)
    ),
)]
async fn stats(State(state): State<RouteState>) -> Json<StatsResponse> {
    let scheduler = &state.scheduler;
    let global = scheduler.stats().global_snapshot();
    let mut per_function = BTreeMap::new();
    for pool in scheduler.pools_snapshot() {
        let counters = scheduler.stats().function_snapshot(pool.function_id());
        per_function.insert(
            pool.function_id().to_string(),
            FunctionStats::from_parts(counters, pool.snapshot()),
        );
    }
    Json(StatsResponse {
        total_cold_starts: global.cold_starts,
        total_warm_starts: global.warm_starts,
        total_requests_queued: global.requests_queued,
        total_requests_failed: global.requests_failed,
        strategy: scheduler.strategy().to_string(),
        per_function,
    })
}

/// Zero all counters
#[utoipa::path(
    post,
    path = "/stats/reset",
    tag = "warmpool",
    responses((status = 200, description = "counters zeroed")),
)]
async fn reset_stats(State(state): State<RouteState>) -> impl IntoResponse {
    state.scheduler.stats().reset();
    StatusCode::OK
}
