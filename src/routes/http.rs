//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs its parameters and basic result info.

use std::sync::Arc;

use axum::{
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
  Json,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::logic::*;
use crate::machine::Command;
use crate::protocol::*;
use crate::session::SessionHandle;
use crate::state::AppState;

async fn session(state: &AppState, id: Uuid) -> Result<SessionHandle, ApiError> {
  state.get_session(id).await.ok_or(ApiError::SessionNotFound(id))
}

async fn command(state: &AppState, id: Uuid, command: Command) -> Result<Json<SessionOut>, ApiError> {
  let handle = session(state, id).await?;
  Ok(Json(run_command(state, &handle, command).await))
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state))]
pub async fn http_get_poems(
  State(state): State<Arc<AppState>>,
  Query(q): Query<DifficultyQuery>,
) -> impl IntoResponse {
  let out = poems(&state, q.difficulty.as_deref());
  info!(target: "quiz", difficulty = %out.difficulty, count = out.poems.len(), "HTTP poems served");
  Json(out)
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_leaderboard(
  State(state): State<Arc<AppState>>,
  Query(q): Query<DifficultyQuery>,
) -> Result<Json<LeaderboardOut>, ApiError> {
  Ok(Json(leaderboard(&state, q.difficulty.as_deref())?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_create_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  let handle = state.create_session(None).await;
  (StatusCode::CREATED, Json(snapshot(&handle).await))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_session(
  State(state): State<Arc<AppState>>,
  Path(id): Path<Uuid>,
) -> Result<Json<SessionOut>, ApiError> {
  let handle = session(&state, id).await?;
  Ok(Json(snapshot(&handle).await))
}

#[instrument(level = "info", skip(state))]
pub async fn http_delete_session(
  State(state): State<Arc<AppState>>,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
  if state.remove_session(id).await {
    Ok(StatusCode::NO_CONTENT)
  } else {
    Err(ApiError::SessionNotFound(id))
  }
}

#[instrument(level = "info", skip(state, body), fields(difficulty = ?body.difficulty))]
pub async fn http_start(
  State(state): State<Arc<AppState>>,
  Path(id): Path<Uuid>,
  Json(body): Json<StartIn>,
) -> Result<Json<SessionOut>, ApiError> {
  let difficulty = parse_difficulty(body.difficulty.as_deref())?;
  command(&state, id, Command::Start { difficulty }).await
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_select(
  State(state): State<Arc<AppState>>,
  Path(id): Path<Uuid>,
  Json(body): Json<SelectIn>,
) -> Result<Json<SessionOut>, ApiError> {
  command(&state, id, Command::SelectOption { line: body.line }).await
}

#[instrument(level = "info", skip(state))]
pub async fn http_acknowledge(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<SessionOut>, ApiError> {
  command(&state, id, Command::Acknowledge).await
}

#[instrument(level = "info", skip(state))]
pub async fn http_dismiss(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<SessionOut>, ApiError> {
  command(&state, id, Command::DismissFeedback).await
}

#[instrument(level = "info", skip(state))]
pub async fn http_restart(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<SessionOut>, ApiError> {
  command(&state, id, Command::Restart).await
}

#[instrument(level = "info", skip(state))]
pub async fn http_reset(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<SessionOut>, ApiError> {
  command(&state, id, Command::Reset).await
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_feedback(
  State(state): State<Arc<AppState>>,
  Path(id): Path<Uuid>,
  Json(body): Json<FeedbackIn>,
) -> Result<impl IntoResponse, ApiError> {
  let handle = session(&state, id).await?;
  let outcome = submit_feedback(&state, &handle, body).await?;
  info!(target: "feedback", %id, success = outcome.success, mode = ?outcome.mode, "HTTP feedback handled");
  Ok(Json(outcome))
}
