//! Converts a panic anywhere below this layer into `ApiError::UnrecoveredFault`.

use axum::{
    http::{header::VARY, HeaderValue},
    response::{IntoResponse, Response},
};
use std::any::Any;

use crate::api::error::ApiError;

/// Panic handler for `tower_http::catch_panic::CatchPanicLayer::custom`.
pub fn recover(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    };
    let mut response = ApiError::UnrecoveredFault(detail).into_response();
    // The authenticator's own Vary header is lost with the unwound response.
    response
        .headers_mut()
        .append(VARY, HeaderValue::from_static("Authorization"));
    response
}
