//! Error taxonomy for the HTTP surface and its `{"error": ...}` envelope.

use axum::{
    http::{
        header::{CONNECTION, WWW_AUTHENTICATE},
        HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::error;

use crate::data::StoreError;

const SERVER_ERROR_MESSAGE: &str = "the server encountered a problem and could not process your request";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing scheme, malformed header, bad length, unknown or expired token.
    #[error("invalid or missing authentication token")]
    InvalidCredential,
    #[error("invalid authentication credentials")]
    InvalidCredentials,
    #[error("you must be authenticated to access this resource")]
    AuthenticationRequired,
    #[error("your user account must be activated to access this resource")]
    AccountNotActivated,
    #[error("your user account doesn't have the necessary permissions to access this resource")]
    NotPermitted,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("the requested resource could not be found")]
    NotFound,
    #[error("{0}")]
    BadRequest(String),
    #[error("failed validation")]
    FailedValidation(BTreeMap<String, String>),
    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict,
    #[error("store fault: {0:#}")]
    StoreFault(anyhow::Error),
    #[error("internal error: {0:#}")]
    Internal(anyhow::Error),
    #[error("unrecovered fault: {0}")]
    UnrecoveredFault(String),
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredential | Self::InvalidCredentials | Self::AuthenticationRequired => {
                StatusCode::UNAUTHORIZED
            }
            Self::AccountNotActivated | Self::NotPermitted => StatusCode::FORBIDDEN,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::FailedValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::EditConflict => StatusCode::CONFLICT,
            Self::StoreFault(_) | Self::Internal(_) | Self::UnrecoveredFault(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound,
            StoreError::EditConflict => Self::EditConflict,
            other => Self::StoreFault(anyhow::Error::new(other)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::FailedValidation(errors) => json!({ "error": errors }),
            Self::StoreFault(_) | Self::Internal(_) | Self::UnrecoveredFault(_) => {
                // Details stay in the log.
                error!("{self}");
                json!({ "error": SERVER_ERROR_MESSAGE })
            }
            other => json!({ "error": other.to_string() }),
        };

        let mut response = (status, Json(body)).into_response();
        match self {
            Self::InvalidCredential => {
                response
                    .headers_mut()
                    .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            Self::UnrecoveredFault(_) => {
                response
                    .headers_mut()
                    .insert(CONNECTION, HeaderValue::from_static("close"));
            }
            _ => {}
        }
        response
    }
}
