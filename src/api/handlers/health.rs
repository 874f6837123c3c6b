use axum::{extract::State, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::api::AppState;
use crate::GIT_COMMIT_HASH;

#[derive(ToSchema, Serialize, Debug)]
pub struct SystemInfo {
    environment: String,
    version: String,
    commit: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct Health {
    status: String,
    system_info: SystemInfo,
}

#[utoipa::path(
    get,
    path = "/v1/healthcheck",
    responses(
        (status = 200, description = "Service is available", body = Health),
    ),
    tag = "health"
)]
pub async fn healthcheck(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "available".to_string(),
        system_info: SystemInfo {
            environment: state.environment.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            commit: GIT_COMMIT_HASH.to_string(),
        },
    })
}
