use anyhow::Context;
use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;
use utoipa::ToSchema;

use super::AUTHENTICATION_TOKEN_TTL;
use crate::api::{error::ApiError, json::JsonBody, AppState};
use crate::data::{
    users::{normalize_email, validate_email, validate_password, verify_password},
    Scope, StoreError, Validator,
};

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default, deny_unknown_fields)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Exchange email and password for an authentication token.
#[utoipa::path(
    post,
    path = "/v1/tokens/authentication",
    request_body = Credentials,
    responses(
        (status = 201, description = "Token issued"),
        (status = 401, description = "Invalid credentials"),
        (status = 422, description = "Validation failed"),
    ),
    tag = "tokens"
)]
#[instrument(skip_all)]
pub async fn create_authentication_token(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<Credentials>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let email = normalize_email(&input.email);

    let mut v = Validator::new();
    validate_email(&mut v, &email);
    validate_password(&mut v, &input.password);
    if !v.valid() {
        return Err(ApiError::FailedValidation(v.into_errors()));
    }

    let user = match state.models.users.get_by_email(&email).await {
        Ok(user) => user,
        Err(StoreError::NotFound) => return Err(ApiError::InvalidCredentials),
        Err(err) => return Err(err.into()),
    };

    let password = input.password;
    let stored = user.password_hash.clone();
    let matches = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
        .await
        .context("password verification task failed")
        .and_then(|result| result)
        .map_err(ApiError::Internal)?;
    if !matches {
        return Err(ApiError::InvalidCredentials);
    }

    let token = state
        .models
        .tokens
        .generate(user.id, AUTHENTICATION_TOKEN_TTL, Scope::Authentication)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "authentication_token": token })),
    ))
}
