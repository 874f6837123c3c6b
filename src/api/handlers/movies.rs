//! Movie catalogue CRUD.

use axum::{
    extract::{Path, State},
    http::{header::LOCATION, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use serde_json::{json, Value};
use tracing::instrument;

use crate::api::{error::ApiError, json::JsonBody, AppState};
use crate::data::{
    movies::{validate_movie, MoviePatch},
    MovieInput, Validator,
};

/// Positive integer id from the path; anything else is a missing resource.
fn read_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or(ApiError::NotFound)
}

#[utoipa::path(
    get,
    path = "/v1/movies",
    responses((status = 200, description = "All movies")),
    security(("bearer" = [])),
    tag = "movies"
)]
pub async fn list(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let movies = state.models.movies.list().await?;
    Ok(Json(json!({ "movies": movies })))
}

#[utoipa::path(
    post,
    path = "/v1/movies",
    request_body = MovieInput,
    responses(
        (status = 201, description = "Movie created"),
        (status = 422, description = "Validation failed"),
    ),
    security(("bearer" = [])),
    tag = "movies"
)]
#[instrument(skip_all)]
pub async fn create(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<MovieInput>,
) -> Result<(StatusCode, HeaderMap, Json<Value>), ApiError> {
    let mut v = Validator::new();
    validate_movie(
        &mut v,
        &input.title,
        input.year,
        input.runtime,
        &input.genres,
        state.clock.now(),
    );
    if !v.valid() {
        return Err(ApiError::FailedValidation(v.into_errors()));
    }

    let movie = state.models.movies.insert(&input).await?;

    let mut headers = HeaderMap::new();
    if let Ok(location) = HeaderValue::from_str(&format!("/v1/movies/{}", movie.id)) {
        headers.insert(LOCATION, location);
    }
    Ok((
        StatusCode::CREATED,
        headers,
        Json(json!({ "movie": movie })),
    ))
}

#[utoipa::path(
    get,
    path = "/v1/movies/{id}",
    params(("id" = i64, Path, description = "Movie id")),
    responses(
        (status = 200, description = "Movie"),
        (status = 404, description = "No such movie"),
    ),
    security(("bearer" = [])),
    tag = "movies"
)]
pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let movie = state.models.movies.get(read_id(&id)?).await?;
    Ok(Json(json!({ "movie": movie })))
}

#[utoipa::path(
    put,
    path = "/v1/movies/{id}",
    params(("id" = i64, Path, description = "Movie id")),
    request_body = MovieInput,
    responses(
        (status = 200, description = "Movie replaced"),
        (status = 404, description = "No such movie"),
        (status = 409, description = "Concurrent update"),
        (status = 422, description = "Validation failed"),
    ),
    security(("bearer" = [])),
    tag = "movies"
)]
#[instrument(skip_all)]
pub async fn replace(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(input): JsonBody<MovieInput>,
) -> Result<Json<Value>, ApiError> {
    let mut movie = state.models.movies.get(read_id(&id)?).await?;
    // Every field is overwritten; omitted ones fall back to empty and fail below.
    movie.title = input.title;
    movie.year = input.year;
    movie.runtime = input.runtime;
    movie.genres = input.genres;

    let mut v = Validator::new();
    validate_movie(
        &mut v,
        &movie.title,
        movie.year,
        movie.runtime,
        &movie.genres,
        state.clock.now(),
    );
    if !v.valid() {
        return Err(ApiError::FailedValidation(v.into_errors()));
    }

    let movie = state.models.movies.update(&movie).await?;
    Ok(Json(json!({ "movie": movie })))
}

#[utoipa::path(
    patch,
    path = "/v1/movies/{id}",
    params(("id" = i64, Path, description = "Movie id")),
    request_body = MoviePatch,
    responses(
        (status = 200, description = "Movie updated"),
        (status = 409, description = "Concurrent update"),
        (status = 422, description = "Validation failed"),
    ),
    security(("bearer" = [])),
    tag = "movies"
)]
#[instrument(skip_all)]
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(patch): JsonBody<MoviePatch>,
) -> Result<Json<Value>, ApiError> {
    let mut movie = state.models.movies.get(read_id(&id)?).await?;
    patch.apply(&mut movie);

    let mut v = Validator::new();
    validate_movie(
        &mut v,
        &movie.title,
        movie.year,
        movie.runtime,
        &movie.genres,
        state.clock.now(),
    );
    if !v.valid() {
        return Err(ApiError::FailedValidation(v.into_errors()));
    }

    let movie = state.models.movies.update(&movie).await?;
    Ok(Json(json!({ "movie": movie })))
}

#[utoipa::path(
    delete,
    path = "/v1/movies/{id}",
    params(("id" = i64, Path, description = "Movie id")),
    responses(
        (status = 200, description = "Movie deleted"),
        (status = 404, description = "No such movie"),
    ),
    security(("bearer" = [])),
    tag = "movies"
)]
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.models.movies.delete(read_id(&id)?).await?;
    Ok(Json(json!({ "message": "movie successfully deleted" })))
}
