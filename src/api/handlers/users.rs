//! Registration and activation.

use anyhow::Context;
use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{info, instrument};
use utoipa::ToSchema;

use super::ACTIVATION_TOKEN_TTL;
use crate::api::{email::EmailMessage, error::ApiError, json::JsonBody, AppState};
use crate::data::{
    permissions::MOVIES_READ,
    tokens::TOKEN_LENGTH,
    users::{hash_password, normalize_email, validate_registration},
    NewUser, Scope, StoreError, Validator,
};

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default, deny_unknown_fields)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default, deny_unknown_fields)]
pub struct ActivateRequest {
    pub token: String,
}

fn field_error(field: &str, message: &str) -> ApiError {
    ApiError::FailedValidation(BTreeMap::from([(field.to_string(), message.to_string())]))
}

#[utoipa::path(
    post,
    path = "/v1/users",
    request_body = RegisterRequest,
    responses(
        (status = 202, description = "User created; activation email queued"),
        (status = 400, description = "Malformed body"),
        (status = 422, description = "Validation failed"),
    ),
    tag = "users"
)]
#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let email = normalize_email(&input.email);

    let mut v = Validator::new();
    validate_registration(&mut v, &input.name, &email, &input.password);
    if !v.valid() {
        return Err(ApiError::FailedValidation(v.into_errors()));
    }

    // Argon2 is CPU bound.
    let password = input.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .context("password hashing task failed")
        .and_then(|hash| hash)
        .map_err(ApiError::Internal)?;

    let user = match state
        .models
        .users
        .insert(&NewUser {
            name: input.name,
            email,
            password_hash,
        })
        .await
    {
        Ok(user) => user,
        Err(StoreError::DuplicateEmail) => {
            return Err(field_error(
                "email",
                "a user with this email address already exists",
            ));
        }
        Err(err) => return Err(err.into()),
    };

    let token = state
        .models
        .tokens
        .generate(user.id, ACTIVATION_TOKEN_TTL, Scope::Activation)
        .await?;

    state.mailer.send_in_background(
        &state.tasks,
        EmailMessage {
            to_email: user.email.clone(),
            template: "user_welcome".to_string(),
            payload: json!({
                "activationToken": token.plain_text,
                "userID": user.id,
            }),
        },
    );

    info!(user_id = user.id, "user registered");
    Ok((StatusCode::ACCEPTED, Json(json!({ "user": user }))))
}

#[utoipa::path(
    put,
    path = "/v1/users/activated",
    request_body = ActivateRequest,
    responses(
        (status = 200, description = "User activated"),
        (status = 409, description = "Concurrent update"),
        (status = 422, description = "Invalid or expired activation token"),
    ),
    tag = "users"
)]
#[instrument(skip_all)]
pub async fn activate(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<ActivateRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut v = Validator::new();
    v.check(!input.token.is_empty(), "token", "must be provided");
    v.check(
        input.token.len() == TOKEN_LENGTH,
        "token",
        "must be 26 bytes long",
    );
    if !v.valid() {
        return Err(ApiError::FailedValidation(v.into_errors()));
    }

    let mut user = match state
        .models
        .tokens
        .resolve_principal(&input.token, Scope::Activation)
        .await
    {
        Ok(user) => user,
        Err(StoreError::NotFound) => {
            return Err(field_error("token", "invalid or expired activation token"));
        }
        Err(err) => return Err(err.into()),
    };

    user.activated = true;
    let user = state.models.users.update(&user).await?;

    state
        .models
        .tokens
        .delete_all_for_user(user.id, Scope::Activation)
        .await?;
    state
        .models
        .permissions
        .add_permission_for_user(user.id, MOVIES_READ)
        .await?;

    info!(user_id = user.id, "user activated");
    Ok(Json(json!({ "user": user })))
}
