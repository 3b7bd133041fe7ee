//! 诗词填空 · Poem quiz backend
//!
//! - Axum HTTP + WebSocket API driving "fill the missing line" runs
//! - File-backed leaderboards and a pending-feedback queue under the data dir
//! - Optional hosted feedback table (simulation mode when unconfigured)
//! - Static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT              : u16 (default 3000)
//!   QUIZ_CONFIG_PATH  : path to TOML config (game, storage, corpus, feedback)
//!   QUIZ_DATA_DIR     : overrides storage.data_dir
//!   QUIZ_MAX_LEVELS   : overrides game.max_levels
//!   QUIZ_RNG_SEED     : fixed seed for reproducible sessions
//!   (idle HTTP sessions expire after game.session_ttl_secs, default 1800)
//!   SUPABASE_URL / SUPABASE_ANON_KEY / SUPABASE_TABLE : feedback backend
//!   LOG_LEVEL         : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT        : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod error;
mod config;
mod corpus;
mod distractor;
mod question;
mod ladder;
mod machine;
mod session;
mod leaderboard;
mod feedback;
mod state;
mod protocol;
mod logic;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::load_config_from_env;
use crate::routes::build_router;
use crate::state::{spawn_session_sweeper, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  telemetry::init_tracing();

  let config = load_config_from_env();
  info!(target: "shici_quiz_backend", ?config, "Configuration resolved");

  let state = Arc::new(AppState::new(config)?);

  // Retry feedback that could not be delivered during an earlier run.
  let flush_state = state.clone();
  tokio::spawn(async move {
    flush_state.feedback.flush_pending().await;
  });
  spawn_session_sweeper(state.clone());

  let app = build_router(state.clone());

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
  info!(target: "shici_quiz_backend", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("serving HTTP")?;
  info!(target: "shici_quiz_backend", "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(target: "shici_quiz_backend", error = %e, "Failed to listen for ctrl-c");
    std::future::pending::<()>().await;
  }
  info!(target: "shici_quiz_backend", "Shutdown signal received");
}
