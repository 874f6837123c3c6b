use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::api::{error::ApiError, json::JsonBody, AppState};
use crate::data::{permissions::is_known_code, Validator};

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default, deny_unknown_fields)]
pub struct GrantRequest {
    pub user_id: i64,
    pub permission: String,
}

/// Grant one permission code to a user.
#[utoipa::path(
    post,
    path = "/v1/permissions",
    request_body = GrantRequest,
    responses(
        (status = 200, description = "Permission granted"),
        (status = 404, description = "Unknown user"),
        (status = 422, description = "Validation failed"),
    ),
    security(("bearer" = [])),
    tag = "permissions"
)]
#[instrument(skip_all)]
pub async fn grant(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<GrantRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut v = Validator::new();
    v.check(input.user_id > 0, "user_id", "must be a positive integer");
    v.check(!input.permission.is_empty(), "permission", "must be provided");
    v.check(
        is_known_code(&input.permission),
        "permission",
        "must be a known permission code",
    );
    if !v.valid() {
        return Err(ApiError::FailedValidation(v.into_errors()));
    }

    state
        .models
        .permissions
        .add_permission_for_user(input.user_id, &input.permission)
        .await?;

    info!(user_id = input.user_id, code = %input.permission, "permission granted");
    Ok(Json(json!({
        "permission": { "user_id": input.user_id, "code": input.permission }
    })))
}
