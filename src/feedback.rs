//! Player feedback submission to the hosted feedback table.
//!
//! Submissions never fail loudly: without usable configuration they are simulated,
//! and when the request fails the payload is queued on disk for a later flush and
//! `success = false` is returned to the caller.
//!
//! NOTE: We never log the anon key or the feedback text in full.

use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{error, info, instrument, warn};

use crate::config::FeedbackConfig;
use crate::error::FeedbackError;
use crate::machine::GameStats;
use crate::util::{char_len, trunc_for_log};

/// What the player submits, plus the run statistics at that moment.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackPayload {
  pub user_name: String,
  pub user_contact: String,
  pub user_feedback: String,
  pub game_stats: GameStats,
  pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubmitMode {
  Production,
  Simulation,
}

/// Status value handed back to callers instead of an error.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct SubmitOutcome {
  pub success: bool,
  pub mode: SubmitMode,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

/// Row body sent to the REST endpoint.
#[derive(Serialize)]
struct FeedbackRow<'a> {
  #[serde(flatten)]
  payload: &'a FeedbackPayload,
  created_at: DateTime<Utc>,
}

/// A payload waiting for the network to come back.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingFeedback {
  #[serde(flatten)]
  pub payload: FeedbackPayload,
  pub queued_at: DateTime<Utc>,
  pub status: String,
}

/// Durable list of unsent feedback (`pending_feedback.json`).
pub struct PendingQueue {
  path: PathBuf,
  lock: Mutex<()>,
}

impl PendingQueue {
  pub fn new(data_dir: &Path) -> Self {
    Self { path: data_dir.join("pending_feedback.json"), lock: Mutex::new(()) }
  }

  /// Queued items; unreadable or malformed files count as empty.
  pub fn items(&self) -> Vec<PendingFeedback> {
    let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
    self.read()
  }

  pub fn push(&self, payload: FeedbackPayload) -> Result<(), FeedbackError> {
    let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
    let mut items = self.read();
    items.push(PendingFeedback { payload, queued_at: Utc::now(), status: "pending".into() });
    self.write(&items)
  }

  /// Remove one delivered item. Other items, including ones queued meanwhile, stay.
  pub fn remove(&self, item: &PendingFeedback) -> Result<(), FeedbackError> {
    let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
    let mut items = self.read();
    let Some(pos) = items.iter().position(|i| i == item) else {
      return Ok(());
    };
    items.remove(pos);
    self.write(&items)
  }

  fn read(&self) -> Vec<PendingFeedback> {
    match fs::read_to_string(&self.path) {
      Ok(raw) => {
        let values: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
          Ok(v) => v,
          Err(e) => {
            error!(target: "feedback", path = %self.path.display(), error = %e, "Pending feedback file is malformed; ignoring it");
            return Vec::new();
          }
        };
        values.into_iter().filter_map(|v| serde_json::from_value(v).ok()).collect()
      }
      Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
      Err(e) => {
        error!(target: "feedback", path = %self.path.display(), error = %e, "Failed to read pending feedback");
        Vec::new()
      }
    }
  }

  fn write(&self, items: &[PendingFeedback]) -> Result<(), FeedbackError> {
    let parent_dir = self.path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent_dir)?;
    let temp_file = NamedTempFile::new_in(parent_dir)?;
    {
      let mut writer = BufWriter::new(&temp_file);
      serde_json::to_writer(&mut writer, items)?;
      writer.flush()?;
    }
    temp_file.persist(&self.path)?;
    Ok(())
  }
}

pub struct FeedbackSubmitter {
  client: reqwest::Client,
  config: Option<FeedbackConfig>,
  queue: Arc<PendingQueue>,
}

impl FeedbackSubmitter {
  pub fn new(config: Option<FeedbackConfig>, queue: PendingQueue) -> Self {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(20))
      .build()
      .unwrap_or_else(|_| reqwest::Client::new());
    Self { client, config, queue: Arc::new(queue) }
  }

  #[cfg(test)]
  pub fn queue(&self) -> &PendingQueue {
    &self.queue
  }

  /// Run queue file I/O on the blocking pool.
  async fn with_queue<T, F>(&self, op: F) -> Option<T>
  where
    T: Send + 'static,
    F: FnOnce(&PendingQueue) -> T + Send + 'static,
  {
    let queue = self.queue.clone();
    match tokio::task::spawn_blocking(move || op(&queue)).await {
      Ok(value) => Some(value),
      Err(e) => {
        error!(target: "feedback", error = %e, "Pending queue task failed");
        None
      }
    }
  }

  /// Usable configuration, or why there is none.
  fn ready_config(&self) -> Result<&FeedbackConfig, FeedbackError> {
    match &self.config {
      None => Err(FeedbackError::ConfigMissing),
      Some(cfg) if cfg.is_placeholder() => Err(FeedbackError::ConfigPlaceholder),
      Some(cfg) => Ok(cfg),
    }
  }

  pub fn mode(&self) -> SubmitMode {
    if self.ready_config().is_ok() { SubmitMode::Production } else { SubmitMode::Simulation }
  }

  #[instrument(level = "info", skip(self, payload), fields(user = %payload.user_name, feedback_len = char_len(&payload.user_feedback)))]
  pub async fn submit(&self, payload: &FeedbackPayload) -> SubmitOutcome {
    let cfg = match self.ready_config() {
      Ok(cfg) => cfg,
      Err(reason) => {
        warn!(target: "feedback", %reason, "Feedback backend not configured; using simulation mode");
        let delay = self.config.as_ref().map(FeedbackConfig::simulation_delay).unwrap_or(Duration::from_millis(1000));
        tokio::time::sleep(delay).await;
        return SubmitOutcome { success: true, mode: SubmitMode::Simulation, error: None };
      }
    };

    match self.post(cfg, payload).await {
      Ok(()) => {
        info!(target: "feedback", "Feedback submitted");
        SubmitOutcome { success: true, mode: SubmitMode::Production, error: None }
      }
      Err(e) => {
        error!(target: "feedback", error = %e, text = %trunc_for_log(&payload.user_feedback, 40), "Feedback submission failed; queueing locally");
        let queued = payload.clone();
        if let Some(Err(qe)) = self.with_queue(move |q| q.push(queued)).await {
          error!(target: "feedback", error = %qe, "Failed to queue feedback locally");
        }
        SubmitOutcome { success: false, mode: SubmitMode::Production, error: Some(e.to_string()) }
      }
    }
  }

  async fn post(&self, cfg: &FeedbackConfig, payload: &FeedbackPayload) -> Result<(), FeedbackError> {
    let row = FeedbackRow { payload, created_at: Utc::now() };
    let resp = self
      .client
      .post(cfg.endpoint())
      .header(CONTENT_TYPE, "application/json")
      .header("apikey", &cfg.anon_key)
      .header(AUTHORIZATION, format!("Bearer {}", cfg.anon_key))
      .header("Prefer", "return=minimal")
      .json(&row)
      .send()
      .await
      .map_err(|e| FeedbackError::Network(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
      let body = resp.text().await.unwrap_or_default();
      return Err(FeedbackError::Status { status: status.as_u16(), body: trunc_for_log(&body, 200) });
    }
    Ok(())
  }

  /// Resend queued payloads. Each item leaves the file only once it has been
  /// delivered; failures stay queued untouched. Returns how many were delivered.
  #[instrument(level = "info", skip(self))]
  pub async fn flush_pending(&self) -> usize {
    let cfg = match self.ready_config() {
      Ok(cfg) => cfg,
      Err(reason) => {
        info!(target: "feedback", %reason, "Skipping pending feedback flush");
        return 0;
      }
    };
    let items = self.with_queue(|q| q.items()).await.unwrap_or_default();
    let total = items.len();

    let mut delivered = 0;
    for item in items {
      if let Err(e) = self.post(cfg, &item.payload).await {
        warn!(target: "feedback", error = %e, queued_at = %item.queued_at, "Pending feedback still undeliverable");
        continue;
      }
      delivered += 1;
      if let Some(Err(e)) = self.with_queue(move |q| q.remove(&item)).await {
        error!(target: "feedback", error = %e, "Failed to drop delivered feedback from the queue");
      }
    }
    if delivered > 0 {
      info!(target: "feedback", delivered, "Flushed pending feedback");
    }
    if delivered < total {
      warn!(target: "feedback", delivered, still_pending = total - delivered, "Pending feedback remains queued");
    }
    delivered
  }
}
