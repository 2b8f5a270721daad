//! `/api/users` record endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use relay_store::{NewUser, UserRepo, UserRow};

use crate::error::ApiError;

/// Routes relative to `/api/users`.
pub fn routes<S>(repo: UserRepo) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/", get(list).post(create))
        .route("/{id}", get(fetch).put(update).delete(remove))
        .with_state(repo)
}

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id >= 0)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid id {raw:?}")))
}

fn body(payload: Result<Json<NewUser>, JsonRejection>) -> Result<NewUser, ApiError> {
    payload
        .map(|Json(user)| user)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

async fn list(State(repo): State<UserRepo>) -> Result<Json<Vec<UserRow>>, ApiError> {
    Ok(Json(repo.list()?))
}

async fn fetch(
    State(repo): State<UserRepo>,
    Path(id): Path<String>,
) -> Result<Json<UserRow>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(repo.get(id)?))
}

async fn create(
    State(repo): State<UserRepo>,
    payload: Result<Json<NewUser>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let user = repo.create(&body(payload)?)?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn update(
    State(repo): State<UserRepo>,
    Path(id): Path<String>,
    payload: Result<Json<NewUser>, JsonRejection>,
) -> Result<Json<UserRow>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(repo.update(id, &body(payload)?)?))
}

async fn remove(
    State(repo): State<UserRepo>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    let _ = repo.delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}
