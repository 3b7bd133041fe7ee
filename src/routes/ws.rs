//! WebSocket upgrade + message loop. One session per connection: it is created on
//! connect, announced with a snapshot and closed on disconnect. Each client message
//! gets one JSON reply; retry timer transitions are pushed as unsolicited snapshots.
//! Feedback submission runs in its own task and its result arrives later through
//! the reply channel, so the loop keeps serving commands meanwhile.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tokio::sync::mpsc;
use tracing::{info, error, instrument, debug};

use crate::logic::*;
use crate::machine::Command;
use crate::protocol::{session_out, ClientWsMessage, ServerWsMessage};
use crate::session::SessionHandle;
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "shici_quiz_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn send(socket: &mut WebSocket, msg: &ServerWsMessage) -> bool {
  let out = serde_json::to_string(msg).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
  });
  if let Err(e) = socket.send(Message::Text(out)).await {
    error!(target: "shici_quiz_backend", error = %e, "WS send error");
    return false;
  }
  true
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  let (tx, mut rx) = mpsc::unbounded_channel();
  let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ServerWsMessage>();
  let handle = state.create_session(Some(tx)).await;
  let id = handle.lock().await.id;
  info!(target: "shici_quiz_backend", session = %id, "WebSocket connected");

  let hello = ServerWsMessage::Session { session: snapshot(&handle).await };
  if send(&mut socket, &hello).await {
    loop {
      tokio::select! {
        incoming = socket.recv() => {
          let Some(Ok(msg)) = incoming else { break };
          match msg {
            Message::Text(txt) => {
              let reply = match serde_json::from_str::<ClientWsMessage>(&txt) {
                Ok(incoming) => {
                  debug!(target: "shici_quiz_backend", "WS received: {:?}", &incoming);
                  handle_client_ws(incoming, &state, &handle, &reply_tx).await
                }
                Err(e) => Some(ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) }),
              };
              if let Some(reply) = reply {
                if !send(&mut socket, &reply).await {
                  break;
                }
              }
            }
            Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
            Message::Close(_) => break,
            _ => {}
          }
        }
        Some(effects) = rx.recv() => {
          let session = { let guard = handle.lock().await; session_out(&guard, &effects) };
          if !send(&mut socket, &ServerWsMessage::Session { session }).await {
            break;
          }
        }
        Some(reply) = reply_rx.recv() => {
          if !send(&mut socket, &reply).await {
            break;
          }
        }
      }
    }
  }

  state.remove_session(id).await;
  info!(target: "shici_quiz_backend", session = %id, "WebSocket disconnected");
}

/// Immediate reply to `msg`, if any. Deferred replies go to `replies`.
#[instrument(level = "info", skip(state, handle, replies))]
async fn handle_client_ws(
  msg: ClientWsMessage,
  state: &AppState,
  handle: &SessionHandle,
  replies: &mpsc::UnboundedSender<ServerWsMessage>,
) -> Option<ServerWsMessage> {
  let command = match msg {
    ClientWsMessage::Ping => return Some(ServerWsMessage::Pong),

    ClientWsMessage::Leaderboard { difficulty } => {
      return Some(match leaderboard(state, difficulty.as_deref()) {
        Ok(out) => ServerWsMessage::Leaderboard(out),
        Err(e) => ServerWsMessage::Error { message: e.to_string() },
      });
    }

    ClientWsMessage::SubmitFeedback(input) => {
      let payload = match prepare_feedback(state, handle, input).await {
        Ok(payload) => payload,
        Err(e) => return Some(ServerWsMessage::Error { message: e.to_string() }),
      };
      let submitter = state.feedback.clone();
      let replies = replies.clone();
      tokio::spawn(async move {
        let outcome = submitter.submit(&payload).await;
        info!(target: "feedback", success = outcome.success, mode = ?outcome.mode, "WS feedback handled");
        if replies.send(ServerWsMessage::FeedbackResult { outcome }).is_err() {
          debug!(target: "feedback", "Feedback result dropped; socket gone");
        }
      });
      return None;
    }

    ClientWsMessage::StartGame { difficulty } => match parse_difficulty(difficulty.as_deref()) {
      Ok(difficulty) => Command::Start { difficulty },
      Err(e) => return Some(ServerWsMessage::Error { message: e.to_string() }),
    },
    ClientWsMessage::SelectOption { line } => Command::SelectOption { line },
    ClientWsMessage::Acknowledge => Command::Acknowledge,
    ClientWsMessage::DismissFeedback => Command::DismissFeedback,
    ClientWsMessage::Restart => Command::Restart,
    ClientWsMessage::Reset => Command::Reset,
  };
  Some(ServerWsMessage::Session { session: run_command(state, handle, command).await })
}
