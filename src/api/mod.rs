//! HTTP surface: router, gatekeeper pipeline and server lifecycle.

use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, patch, post, put},
    Router,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;

use crate::clock::Clock;
use crate::data::{
    permissions::{METRICS_VIEW, MOVIES_READ, MOVIES_WRITE, PERMISSIONS_WRITE},
    Models,
};

pub mod email;
pub mod error;
pub mod handlers;
pub mod json;
pub mod middleware;
mod openapi;

pub use error::ApiError;
pub use openapi::openapi;

use email::{BackgroundTasks, Mailer};
use handlers::{health, metrics, movies, permissions, tokens, users};
use middleware::{authenticate, gated, rate_limit, recover, Gate, RateLimiter};

/// How long shutdown waits for queued background work.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Shared handles for every request.
#[derive(Clone, Debug)]
pub struct AppState {
    pub models: Models,
    pub mailer: Mailer,
    pub tasks: BackgroundTasks,
    pub limiter: Arc<RateLimiter>,
    pub clock: Arc<dyn Clock>,
    pub environment: String,
}

/// Build the full application: routes, per-route gates and the request pipeline.
///
/// Pipeline, outermost first: request id, trace span, panic guard, CORS,
/// rate limiter, authenticator. Gates run after routing, only on matched routes.
pub fn app(state: AppState, trusted_origins: Vec<HeaderValue>) -> Router {
    let perms = state.models.permissions.clone();
    let read = Gate::Permission(MOVIES_READ);
    let write = Gate::Permission(MOVIES_WRITE);

    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_origin(AllowOrigin::list(trusted_origins));

    Router::new()
        .route("/v1/healthcheck", get(health::healthcheck))
        .route(
            "/v1/movies",
            gated(read, perms.clone(), get(movies::list))
                .merge(gated(write, perms.clone(), post(movies::create))),
        )
        .route(
            "/v1/movies/:id",
            gated(read, perms.clone(), get(movies::show)).merge(gated(
                write,
                perms.clone(),
                put(movies::replace)
                    .patch(movies::update)
                    .delete(movies::delete),
            )),
        )
        .route("/v1/users", post(users::register))
        .route("/v1/users/activated", put(users::activate))
        .route(
            "/v1/tokens/authentication",
            post(tokens::create_authentication_token),
        )
        .route(
            "/v1/permissions",
            gated(
                Gate::Permission(PERMISSIONS_WRITE),
                perms.clone(),
                post(permissions::grant),
            ),
        )
        .route(
            "/debug/metrics",
            gated(Gate::Permission(METRICS_VIEW), perms, get(metrics::show)),
        )
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(CatchPanicLayer::custom(recover))
                .layer(cors)
                .layer(from_fn_with_state(state.limiter.clone(), rate_limit))
                .layer(from_fn_with_state(state.models.tokens.clone(), authenticate)),
        )
        .with_state(state)
}

async fn not_found() -> impl IntoResponse {
    ApiError::NotFound
}

/// Start the server and block until it has shut down.
///
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, state: AppState, trusted_origins: Vec<HeaderValue>) -> Result<()> {
    state.limiter.start();

    let app = app(state.clone(), trusted_origins);
    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    info!(environment = %state.environment, "Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    state.limiter.stop();
    info!(pending = state.tasks.len(), "completing background tasks");
    state.tasks.wait(SHUTDOWN_GRACE).await;
    info!("Gracefully shutdown");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {err}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c"),
        () = terminate => info!("received SIGTERM"),
    }
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

/// Reduce a trusted origin URL to its `scheme://host[:port]` header form.
///
/// # Errors
/// Returns an error if the URL is invalid or has no host.
pub fn origin_header(origin: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(origin).with_context(|| format!("Invalid trusted origin: {origin}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Trusted origin must include a valid host: {origin}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build origin header")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_header_strips_path() {
        let value = origin_header("https://app.example.com:8443/some/path").unwrap();
        assert_eq!(value, "https://app.example.com:8443");
        let value = origin_header("http://localhost").unwrap();
        assert_eq!(value, "http://localhost");
    }

    #[test]
    fn origin_header_rejects_garbage() {
        assert!(origin_header("not a url").is_err());
        assert!(origin_header("mailto:someone@example.com").is_err());
    }
}
