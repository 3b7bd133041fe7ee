//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - Running a game command against a session and snapshotting the result
//!   - Reading leaderboards and corpus listings by difficulty name
//!   - Building and submitting feedback with the session's current statistics

use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::domain::Difficulty;
use crate::error::ApiError;
use crate::feedback::{FeedbackPayload, SubmitOutcome};
use crate::machine::Command;
use crate::protocol::{session_out, FeedbackIn, LeaderboardOut, PoemSummaryOut, PoemsOut, SessionOut};
use crate::session::{dispatch, SessionHandle};
use crate::state::AppState;
use crate::util::char_len;

/// Difficulty from an optional request value; absent means beginner.
pub fn parse_difficulty(raw: Option<&str>) -> Result<Difficulty, ApiError> {
  match raw {
    None => Ok(Difficulty::default()),
    Some(s) => Difficulty::parse(s).ok_or_else(|| ApiError::UnknownDifficulty(s.to_string())),
  }
}

#[instrument(level = "info", skip(state, handle))]
pub async fn run_command(state: &AppState, handle: &SessionHandle, command: Command) -> SessionOut {
  let mut guard = handle.lock().await;
  let effects = dispatch(&state.runtime, handle, &mut guard, command);
  debug!(target: "quiz", session = %guard.id, ?effects, "Command applied");
  session_out(&guard, &effects)
}

pub async fn snapshot(handle: &SessionHandle) -> SessionOut {
  let mut guard = handle.lock().await;
  guard.touch();
  session_out(&guard, &[])
}

#[instrument(level = "info", skip(state))]
pub fn leaderboard(state: &AppState, difficulty: Option<&str>) -> Result<LeaderboardOut, ApiError> {
  let difficulty = parse_difficulty(difficulty)?;
  let entries = state.runtime.leaderboard.get(difficulty);
  info!(target: "leaderboard", %difficulty, rows = entries.len(), "Leaderboard served");
  Ok(LeaderboardOut { difficulty, difficulty_label: difficulty.label_zh(), entries })
}

/// Poem summaries of a tier, without their text. Unknown names yield an empty list.
pub fn poems(state: &AppState, difficulty: Option<&str>) -> PoemsOut {
  let name = difficulty.unwrap_or(Difficulty::default().as_str());
  let poems = state.runtime.repo.by_difficulty_name(name).iter().map(PoemSummaryOut::from).collect();
  PoemsOut { difficulty: name.to_string(), poems }
}

/// Validate feedback and attach the session's current statistics.
pub async fn prepare_feedback(state: &AppState, handle: &SessionHandle, input: FeedbackIn) -> Result<FeedbackPayload, ApiError> {
  if input.user_feedback.trim().is_empty() {
    return Err(ApiError::EmptyFeedback);
  }
  let session = handle.lock().await;
  let user_name = input
    .user_name
    .filter(|n| !n.trim().is_empty())
    .unwrap_or_else(|| session.user_name.clone());
  Ok(FeedbackPayload {
    user_name,
    user_contact: input.user_contact,
    user_feedback: input.user_feedback,
    game_stats: session.game.run.stats(Utc::now(), state.config.game.max_levels),
    timestamp: Utc::now(),
  })
}

#[instrument(level = "info", skip(state, handle, input), fields(feedback_len = char_len(&input.user_feedback)))]
pub async fn submit_feedback(state: &AppState, handle: &SessionHandle, input: FeedbackIn) -> Result<SubmitOutcome, ApiError> {
  let payload = prepare_feedback(state, handle, input).await?;
  Ok(state.feedback.submit(&payload).await)
}
