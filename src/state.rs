//! Application state: corpus, stores, feedback submitter and the live session table.
//!
//! Sessions live in memory only; a restart of the process drops them. HTTP sessions
//! idle past `game.session_ttl_secs` are swept periodically; WebSocket sessions end
//! with their socket. Leaderboards and the pending-feedback queue are file-backed
//! under `storage.data_dir`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::QuizConfig;
use crate::corpus::PoemRepository;
use crate::feedback::{FeedbackSubmitter, PendingQueue};
use crate::leaderboard::{FileLeaderboard, LeaderboardStore, MemoryLeaderboard};
use crate::session::{QuizRuntime, Session, SessionHandle, SessionNotifier};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<QuizConfig>,
    pub runtime: QuizRuntime,
    pub feedback: Arc<FeedbackSubmitter>,
    pub sessions: Arc<RwLock<HashMap<Uuid, SessionHandle>>>,
    session_seq: Arc<AtomicU64>,
}

impl AppState {
    /// Build state from config: load the corpus, open the stores.
    #[instrument(level = "info", skip_all)]
    pub fn new(config: QuizConfig) -> anyhow::Result<Self> {
        let repo = PoemRepository::load(config.corpus.path.as_deref()).context("loading poem corpus")?;
        let data_dir = &config.storage.data_dir;
        let leaderboard: Arc<dyn LeaderboardStore> = match std::fs::create_dir_all(data_dir) {
            Ok(()) => {
                info!(target: "leaderboard", dir = %data_dir.display(), "File-backed leaderboards");
                Arc::new(FileLeaderboard::new(data_dir.clone()))
            }
            Err(e) => {
                warn!(target: "leaderboard", dir = %data_dir.display(), error = %e, "Data directory unusable; leaderboards kept in memory");
                Arc::new(MemoryLeaderboard::default())
            }
        };

        Ok(Self::from_parts(config, repo, leaderboard))
    }

    /// Assemble state from already-built parts.
    pub fn from_parts(config: QuizConfig, repo: PoemRepository, leaderboard: Arc<dyn LeaderboardStore>) -> Self {
        let queue = PendingQueue::new(&config.storage.data_dir);
        let feedback = FeedbackSubmitter::new(config.feedback.clone(), queue);
        info!(target: "feedback", mode = ?feedback.mode(), "Feedback submitter ready");

        let runtime = QuizRuntime { repo: Arc::new(repo), settings: config.game.clone(), leaderboard };
        Self {
            config: Arc::new(config),
            runtime,
            feedback: Arc::new(feedback),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            session_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// RNG for a new session. With a configured seed, sessions get `seed + n`.
    fn session_rng(&self) -> StdRng {
        let n = self.session_seq.fetch_add(1, Ordering::Relaxed);
        match self.config.game.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(n)),
            None => StdRng::from_entropy(),
        }
    }

    /// Create and register a session. WebSocket sessions pass a notifier.
    #[instrument(level = "info", skip(self, notifier))]
    pub async fn create_session(&self, notifier: Option<SessionNotifier>) -> SessionHandle {
        let id = Uuid::new_v4();
        let mut session = Session::new(id, self.session_rng());
        if let Some(tx) = notifier {
            session = session.with_notifier(tx);
        }
        info!(target: "quiz", session = %id, user = %session.user_name, "Session created");
        let handle = Arc::new(Mutex::new(session));
        self.sessions.write().await.insert(id, handle.clone());
        handle
    }

    #[instrument(level = "debug", skip(self), fields(%id))]
    pub async fn get_session(&self, id: Uuid) -> Option<SessionHandle> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Unregister and close a session. Returns false for unknown ids.
    #[instrument(level = "info", skip(self), fields(%id))]
    pub async fn remove_session(&self, id: Uuid) -> bool {
        let removed = self.sessions.write().await.remove(&id);
        match removed {
            Some(handle) => {
                handle.lock().await.close();
                true
            }
            None => false,
        }
    }

    /// Close and drop sessions idle for longer than `ttl`. Returns how many went.
    pub async fn sweep_idle_sessions(&self, ttl: Duration) -> usize {
        let handles: Vec<(Uuid, SessionHandle)> =
            self.sessions.read().await.iter().map(|(id, h)| (*id, h.clone())).collect();

        let mut expired = Vec::new();
        for (id, handle) in handles {
            let session = handle.lock().await;
            if !session.has_notifier() && session.idle_for() > ttl {
                expired.push(id);
            }
        }
        if expired.is_empty() {
            return 0;
        }

        let removed: Vec<SessionHandle> = {
            let mut sessions = self.sessions.write().await;
            expired.iter().filter_map(|id| sessions.remove(id)).collect()
        };
        for handle in &removed {
            handle.lock().await.close();
        }
        info!(target: "quiz", swept = removed.len(), "Idle sessions dropped");
        removed.len()
    }
}

/// Periodically sweep idle sessions, checking every half TTL (at least once a second).
pub fn spawn_session_sweeper(state: Arc<AppState>) -> JoinHandle<()> {
    let ttl = state.config.game.session_ttl();
    let period = (ttl / 2).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let swept = state.sweep_idle_sessions(ttl).await;
            debug!(target: "quiz", swept, "Session sweep done");
        }
    })
}
