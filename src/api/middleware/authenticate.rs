//! Bearer-token authentication.
//!
//! Every request leaves this layer with exactly one [`Principal`] in its
//! extensions, or is rejected with `InvalidCredential`. The rejection is the same
//! for a bad header, a malformed token, an unknown token and an expired one.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{
        header::{AUTHORIZATION, VARY},
        request::Parts,
        HeaderMap, HeaderValue,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::convert::Infallible;
use tracing::debug;

use crate::api::error::ApiError;
use crate::data::{Principal, Scope, StoreError, TokenStore};

/// Resolve the `Authorization` header into a principal.
///
/// # Errors
/// Returns `ApiError::InvalidCredential` for any unusable credential and
/// `ApiError::StoreFault` when the token lookup itself fails.
pub async fn resolve_principal(
    tokens: &TokenStore,
    headers: &HeaderMap,
) -> Result<Principal, ApiError> {
    // A blank header is the same as no header.
    let Some(value) = headers
        .get(AUTHORIZATION)
        .filter(|value| !value.as_bytes().iter().all(u8::is_ascii_whitespace))
    else {
        return Ok(Principal::Anonymous);
    };
    let value = value.to_str().map_err(|_| ApiError::InvalidCredential)?;

    let parts: Vec<&str> = value.split(' ').collect();
    let [scheme, token] = parts.as_slice() else {
        return Err(ApiError::InvalidCredential);
    };
    if *scheme != "Bearer" {
        return Err(ApiError::InvalidCredential);
    }

    match tokens.resolve_principal(token, Scope::Authentication).await {
        Ok(user) => Ok(Principal::User(user)),
        Err(StoreError::NotFound) => {
            debug!("bearer token rejected");
            Err(ApiError::InvalidCredential)
        }
        Err(err) => Err(err.into()),
    }
}

/// Middleware: attach the request's [`Principal`]; responses always vary on `Authorization`.
pub async fn authenticate(
    State(tokens): State<TokenStore>,
    mut request: Request,
    next: Next,
) -> Response {
    let mut response = match resolve_principal(&tokens, request.headers()).await {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    };
    response
        .headers_mut()
        .append(VARY, HeaderValue::from_static("Authorization"));
    response
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    /// Requests that bypassed the authenticator are treated as anonymous.
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<Principal>()
            .cloned()
            .unwrap_or(Principal::Anonymous))
    }
}
