//! Per-player sessions and the runtime that carries out machine effects.
//!
//! A session owns one `Game`, its RNG and at most one armed retry timer. Commands
//! go through `dispatch` while the caller holds the session lock, so a transition
//! and its effects (timer arm/cancel, leaderboard write) are applied together.
//! The retry timer is a spawned task that re-locks the session when it fires; it
//! is aborted on cancel, on re-arm and when the session is closed.
//!
//! Completed runs are written to the leaderboard from a spawned task, off the
//! session lock, and the file I/O itself runs on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::config::GameSettings;
use crate::corpus::PoemRepository;
use crate::domain::LeaderboardEntry;
use crate::leaderboard::LeaderboardStore;
use crate::machine::{AnswerStateMachine, Command, Effect, Game, RunSummary};

pub type SessionHandle = Arc<Mutex<Session>>;

/// Effects of a transition that happened without a client request (the retry timer).
pub type SessionNotifier = mpsc::UnboundedSender<Vec<Effect>>;

/// Shared, read-only dependencies of every session.
#[derive(Clone)]
pub struct QuizRuntime {
  pub repo: Arc<PoemRepository>,
  pub settings: GameSettings,
  pub leaderboard: Arc<dyn LeaderboardStore>,
}

pub struct Session {
  pub id: Uuid,
  pub user_name: String,
  pub game: Game,
  pub created_at: DateTime<Utc>,
  last_seen: Instant,
  rng: StdRng,
  retry_task: Option<JoinHandle<()>>,
  notifier: Option<SessionNotifier>,
}

impl Session {
  /// New idle session; the guest name is drawn from the session's own RNG.
  pub fn new(id: Uuid, mut rng: StdRng) -> Self {
    let user_name = guest_name(&mut rng);
    Self { id, user_name, game: Game::default(), created_at: Utc::now(), last_seen: Instant::now(), rng, retry_task: None, notifier: None }
  }

  pub fn with_notifier(mut self, notifier: SessionNotifier) -> Self {
    self.notifier = Some(notifier);
    self
  }

  /// Mark the session as used by its player.
  pub fn touch(&mut self) {
    self.last_seen = Instant::now();
  }

  pub fn idle_for(&self) -> Duration {
    self.last_seen.elapsed()
  }

  /// Bound to a live WebSocket; such sessions end with their socket.
  pub fn has_notifier(&self) -> bool {
    self.notifier.is_some()
  }

  pub fn retry_pending(&self) -> bool {
    self.retry_task.as_ref().is_some_and(|t| !t.is_finished())
  }

  /// Abandon the session: cancel the retry timer and stop notifications.
  pub fn close(&mut self) {
    self.cancel_retry();
    self.notifier = None;
    info!(target: "quiz", session = %self.id, "Session closed");
  }

  fn cancel_retry(&mut self) {
    if let Some(task) = self.retry_task.take() {
      task.abort();
      debug!(target: "quiz", session = %self.id, "Retry timer cancelled");
    }
  }
}

/// `游客NNNN`, N in 1..=9999.
pub fn guest_name<R: Rng + ?Sized>(rng: &mut R) -> String {
  format!("游客{:04}", rng.gen_range(1..=9999))
}

/// Apply `command` to a locked session and carry out the resulting effects.
/// `handle` must be the handle `session` was locked from; the retry task keeps a clone.
#[instrument(level = "debug", skip(runtime, handle, session), fields(session = %session.id))]
pub fn dispatch(runtime: &QuizRuntime, handle: &SessionHandle, session: &mut Session, command: Command) -> Vec<Effect> {
  let machine = AnswerStateMachine::new(&runtime.repo, &runtime.settings);
  if !matches!(command, Command::RetryElapsed { .. }) {
    session.touch();
  }
  let game = std::mem::take(&mut session.game);
  let step = machine.apply(game, command, Utc::now(), &mut session.rng);
  session.game = step.game;
  process_effects(runtime, handle, session, &step.effects);
  step.effects
}

fn process_effects(runtime: &QuizRuntime, handle: &SessionHandle, session: &mut Session, effects: &[Effect]) {
  for effect in effects {
    match effect {
      Effect::ScheduleRetry { after, version } => {
        session.cancel_retry();
        let (after, version) = (*after, *version);
        let runtime = runtime.clone();
        let handle = handle.clone();
        session.retry_task = Some(tokio::spawn(async move {
          tokio::time::sleep(after).await;
          fire_retry(runtime, handle, version).await;
        }));
        debug!(target: "quiz", session = %session.id, version, delay_ms = after.as_millis() as u64, "Retry timer armed");
      }
      Effect::CancelRetry => session.cancel_retry(),
      Effect::RunCompleted { summary } => record_run(runtime, session, summary),
      _ => {}
    }
  }
}

/// Timer callback: deliver `RetryElapsed` and push the outcome to the notifier.
async fn fire_retry(runtime: QuizRuntime, handle: SessionHandle, version: u64) {
  let mut guard = handle.lock().await;
  let session = &mut *guard;
  // This task is the one running; dropping the handle does not abort it.
  session.retry_task = None;
  let effects = dispatch(&runtime, &handle, session, Command::RetryElapsed { version });
  if let Some(notifier) = &session.notifier {
    if notifier.send(effects).is_err() {
      debug!(target: "quiz", session = %session.id, "Retry notification dropped; receiver gone");
    }
  }
}

fn record_run(runtime: &QuizRuntime, session: &Session, summary: &RunSummary) {
  let entry = LeaderboardEntry {
    username: session.user_name.clone(),
    score: summary.score,
    accuracy: summary.accuracy,
    play_time: summary.play_time.clone(),
  };
  let store = runtime.leaderboard.clone();
  let (id, difficulty, score) = (session.id, summary.difficulty, summary.score);
  tokio::spawn(async move {
    let user_name = entry.username.clone();
    match tokio::task::spawn_blocking(move || store.put(difficulty, entry)).await {
      Ok(Ok(board)) => {
        let rank = board.iter().position(|e| e.username == user_name && e.score == score);
        info!(target: "leaderboard", session = %id, %difficulty, score, rank = ?rank.map(|r| r + 1), "Run recorded");
      }
      Ok(Err(e)) => error!(target: "leaderboard", session = %id, error = %e, "Failed to record run"),
      Err(e) => error!(target: "leaderboard", session = %id, error = %e, "Leaderboard write task failed"),
    }
  });
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex as StdMutex;
  use std::time::Duration;

  use rand::SeedableRng;

  use super::*;
  use crate::corpus::fixture_repo;
  use crate::domain::Difficulty;
  use crate::error::LeaderboardError;
  use crate::machine::Phase;

  #[derive(Default)]
  struct RecordingLeaderboard {
    puts: StdMutex<Vec<(Difficulty, LeaderboardEntry)>>,
    /// When set, `put` blocks until the test sends on the paired channel.
    gate: StdMutex<Option<std::sync::mpsc::Receiver<()>>>,
  }

  impl RecordingLeaderboard {
    fn gated() -> (Self, std::sync::mpsc::Sender<()>) {
      let (tx, rx) = std::sync::mpsc::channel();
      (Self { gate: StdMutex::new(Some(rx)), ..Self::default() }, tx)
    }

    async fn wait_for_puts(&self, n: usize) -> Vec<(Difficulty, LeaderboardEntry)> {
      for _ in 0..200 {
        let puts = self.puts.lock().expect("lock").clone();
        if puts.len() >= n {
          return puts;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
      }
      self.puts.lock().expect("lock").clone()
    }
  }

  impl LeaderboardStore for RecordingLeaderboard {
    fn get(&self, _level: Difficulty) -> Vec<LeaderboardEntry> {
      Vec::new()
    }

    fn put(&self, level: Difficulty, entry: LeaderboardEntry) -> Result<Vec<LeaderboardEntry>, LeaderboardError> {
      if let Some(gate) = self.gate.lock().expect("lock").take() {
        let _ = gate.recv();
      }
      let mut puts = self.puts.lock().expect("lock");
      puts.push((level, entry.clone()));
      Ok(vec![entry])
    }
  }

  fn runtime(board: Arc<RecordingLeaderboard>) -> QuizRuntime {
    QuizRuntime {
      repo: Arc::new(fixture_repo()),
      settings: GameSettings { max_levels: 3, ..GameSettings::default() },
      leaderboard: board,
    }
  }

  fn new_session(seed: u64) -> (SessionHandle, mpsc::UnboundedReceiver<Vec<Effect>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = Session::new(Uuid::new_v4(), StdRng::seed_from_u64(seed)).with_notifier(tx);
    (Arc::new(Mutex::new(session)), rx)
  }

  fn wrong_line(game: &Game) -> String {
    let q = game.phase.question().expect("question");
    q.options.iter().find(|o| **o != q.correct_line).expect("a distractor").clone()
  }

  async fn run(rt: &QuizRuntime, handle: &SessionHandle, command: Command) -> Vec<Effect> {
    let mut guard = handle.lock().await;
    dispatch(rt, handle, &mut guard, command)
  }

  #[test]
  fn guest_names_are_zero_padded() {
    let mut rng = StdRng::seed_from_u64(0);
    for _ in 0..50 {
      let name = guest_name(&mut rng);
      let digits = name.strip_prefix("游客").expect("prefix");
      assert_eq!(digits.len(), 4);
      let n: u32 = digits.parse().expect("number");
      assert!((1..=9999).contains(&n));
    }
  }

  #[tokio::test(start_paused = true)]
  async fn incorrect_answer_is_retried_after_the_delay() {
    let rt = runtime(Arc::default());
    let (handle, mut rx) = new_session(1);
    run(&rt, &handle, Command::Start { difficulty: Difficulty::Beginner }).await;
    let line = wrong_line(&handle.lock().await.game);
    run(&rt, &handle, Command::SelectOption { line }).await;
    assert!(handle.lock().await.retry_pending());

    let effects = rx.recv().await.expect("retry notification");
    assert!(effects.contains(&Effect::QuestionRegenerated { level: 1 }));
    let session = handle.lock().await;
    assert!(matches!(session.game.phase, Phase::Presenting { .. }));
    assert_eq!(session.game.run.total_attempts, 1);
    assert!(!session.retry_pending());
  }

  #[tokio::test(start_paused = true)]
  async fn restart_cancels_the_pending_retry() {
    let rt = runtime(Arc::default());
    let (handle, mut rx) = new_session(2);
    run(&rt, &handle, Command::Start { difficulty: Difficulty::Beginner }).await;
    let line = wrong_line(&handle.lock().await.game);
    run(&rt, &handle, Command::SelectOption { line }).await;
    run(&rt, &handle, Command::Restart).await;
    assert!(!handle.lock().await.retry_pending());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(rx.try_recv().is_err());
    let session = handle.lock().await;
    assert!(matches!(session.game.phase, Phase::Presenting { .. }));
    assert_eq!(session.game.run.total_attempts, 0);
  }

  #[tokio::test(start_paused = true)]
  async fn closing_the_session_aborts_the_timer() {
    let rt = runtime(Arc::default());
    let (handle, mut rx) = new_session(3);
    run(&rt, &handle, Command::Start { difficulty: Difficulty::Beginner }).await;
    let line = wrong_line(&handle.lock().await.game);
    run(&rt, &handle, Command::SelectOption { line }).await;
    handle.lock().await.close();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(rx.try_recv().is_err());
    assert!(matches!(handle.lock().await.game.phase, Phase::IncorrectFeedback { .. }));
  }

  #[tokio::test]
  async fn completed_run_is_recorded_once_under_its_tier() {
    let board = Arc::new(RecordingLeaderboard::default());
    let rt = runtime(board.clone());
    let (handle, _rx) = new_session(4);
    run(&rt, &handle, Command::Start { difficulty: Difficulty::Beginner }).await;

    for _ in 0..3 {
      let line = handle.lock().await.game.phase.question().expect("question").correct_line.clone();
      run(&rt, &handle, Command::SelectOption { line }).await;
      run(&rt, &handle, Command::Acknowledge).await;
    }
    // Further acknowledgements after completion change nothing.
    run(&rt, &handle, Command::Acknowledge).await;

    let user_name = handle.lock().await.user_name.clone();
    let puts = board.wait_for_puts(1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(board.puts.lock().expect("lock").len(), 1);
    assert_eq!(puts[0].0, Difficulty::Beginner);
    assert_eq!(puts[0].1.username, user_name);
    assert_eq!(puts[0].1.score, 30);
    assert_eq!(puts[0].1.accuracy, 100);
  }

  #[tokio::test]
  async fn slow_leaderboard_write_does_not_hold_the_session() {
    let (board, release) = RecordingLeaderboard::gated();
    let board = Arc::new(board);
    let rt = runtime(board.clone());
    let (handle, _rx) = new_session(5);
    run(&rt, &handle, Command::Start { difficulty: Difficulty::Beginner }).await;
    for _ in 0..3 {
      let line = handle.lock().await.game.phase.question().expect("question").correct_line.clone();
      run(&rt, &handle, Command::SelectOption { line }).await;
      run(&rt, &handle, Command::Acknowledge).await;
    }

    // The write is still blocked, yet the session is free and already completed.
    let session = handle.try_lock().expect("session lock is free");
    assert!(matches!(session.game.phase, Phase::Completed { .. }));
    drop(session);
    assert!(board.puts.lock().expect("lock").is_empty());

    release.send(()).expect("release");
    assert_eq!(board.wait_for_puts(1).await.len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn commands_refresh_last_seen_but_retries_do_not() {
    let rt = runtime(Arc::default());
    let (handle, mut rx) = new_session(6);
    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(handle.lock().await.idle_for() >= Duration::from_secs(60));

    run(&rt, &handle, Command::Start { difficulty: Difficulty::Beginner }).await;
    assert!(handle.lock().await.idle_for() < Duration::from_secs(1));

    let line = wrong_line(&handle.lock().await.game);
    run(&rt, &handle, Command::SelectOption { line }).await;
    rx.recv().await.expect("retry notification");
    assert!(handle.lock().await.idle_for() >= rt.settings.retry_delay());
  }
}
