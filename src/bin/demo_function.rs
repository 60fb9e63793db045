//! Minimal function image used to exercise the scheduler: answers POST /
//! after simulating some work. Build it into the image configured as
//! `image` and point the scheduler at it.

use std::time::Duration;

use axum::{Json, Router, routing::post};
use tracing::info;

async fn execute() -> Json<serde_json::Value> {
    tokio::time::sleep(Duration::from_secs(2)).await;
    Json(serde_json::json!({ "message": "function executed" }))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let function_id = std::env::var("FUNCTION_ID").unwrap_or_else(|_| "unknown".to_string());
    info!(function_id = %function_id, "demo function listening on 0.0.0.0:5000");

    let app = Router::new().route("/", post(execute));
    let listener = tokio::net::TcpListener::bind("0.0.0.0:5000")
        .await
        .expect("failed to bind function port");
    axum::serve(listener, app)
        .await
        .expect("function server failed");
}
