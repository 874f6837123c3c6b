use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::api::AppState;

/// Process counters for operators holding `metrics:view`.
#[utoipa::path(
    get,
    path = "/debug/metrics",
    responses(
        (status = 200, description = "Runtime counters"),
        (status = 403, description = "Missing metrics:view permission"),
    ),
    security(("bearer" = [])),
    tag = "debug"
)]
pub async fn show(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "metrics": {
            "version": env!("CARGO_PKG_VERSION"),
            "limiter_enabled": state.limiter.config().enabled(),
            "limiter_clients": state.limiter.len(),
            "background_tasks": state.tasks.len(),
        }
    }))
}
