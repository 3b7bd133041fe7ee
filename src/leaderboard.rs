//! Per-difficulty leaderboards.
//!
//! `put` is a read-modify-write: append, sort descending by score (stable, so equal
//! scores keep arrival order), keep the top 20, persist. The file-backed store writes
//! through a temp file + rename so readers only ever see a whole board.

use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::NamedTempFile;
use tracing::{error, info, instrument, warn};

use crate::domain::{Difficulty, LeaderboardEntry};
use crate::error::LeaderboardError;

/// Boards keep this many rows.
pub const LEADERBOARD_CAPACITY: usize = 20;

pub trait LeaderboardStore: Send + Sync {
  /// Stored rows, or the seed rows when nothing usable is stored.
  fn get(&self, level: Difficulty) -> Vec<LeaderboardEntry>;

  /// Insert `entry` and return the resulting board.
  fn put(&self, level: Difficulty, entry: LeaderboardEntry) -> Result<Vec<LeaderboardEntry>, LeaderboardError>;
}

/// Append, sort descending by score, truncate.
pub fn insert_ranked(mut board: Vec<LeaderboardEntry>, entry: LeaderboardEntry) -> Vec<LeaderboardEntry> {
  board.push(entry);
  board.sort_by(|a, b| b.score.cmp(&a.score));
  board.truncate(LEADERBOARD_CAPACITY);
  board
}

/// Sample rows shown before anyone has played a tier.
pub fn default_entries(level: Difficulty) -> Vec<LeaderboardEntry> {
  let row = |username: &str, score: u32, play_time: &str| LeaderboardEntry {
    username: username.into(),
    score,
    accuracy: score,
    play_time: play_time.into(),
  };
  match level {
    Difficulty::Beginner => vec![
      row("诗词达人001", 95, "2分30秒"),
      row("古韵悠扬", 88, "3分15秒"),
      row("文学爱好者", 82, "4分05秒"),
      row("诗意人生", 76, "3分45秒"),
      row("墨香书生", 70, "4分20秒"),
    ],
    Difficulty::Intermediate => vec![
      row("诗词高手", 92, "5分10秒"),
      row("文化传承者", 85, "6分30秒"),
      row("古典文学迷", 78, "7分15秒"),
    ],
    Difficulty::Advanced => vec![row("诗词大师", 98, "8分45秒"), row("国学专家", 90, "10分20秒")],
  }
}

/// Parse a stored board. A blob that is not a JSON array yields `None`; rows that
/// do not match the schema are dropped and accuracy is clamped to 100.
pub fn parse_board(raw: &str) -> Option<Vec<LeaderboardEntry>> {
  let values: Vec<serde_json::Value> = serde_json::from_str(raw).ok()?;
  let total = values.len();
  let board: Vec<LeaderboardEntry> = values
    .into_iter()
    .filter_map(|v| serde_json::from_value::<LeaderboardEntry>(v).ok())
    .map(|mut e| {
      e.accuracy = e.accuracy.min(100);
      e
    })
    .collect();
  if board.len() < total {
    warn!(target: "leaderboard", dropped = total - board.len(), "Dropped malformed leaderboard rows");
  }
  Some(board)
}

/// Boards stored as `leaderboard_<level>.json` under a data directory.
pub struct FileLeaderboard {
  dir: PathBuf,
  write_lock: Mutex<()>,
}

impl FileLeaderboard {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into(), write_lock: Mutex::new(()) }
  }

  fn path_for(&self, level: Difficulty) -> PathBuf {
    self.dir.join(format!("leaderboard_{}.json", level.as_str()))
  }

  fn read(&self, level: Difficulty) -> Vec<LeaderboardEntry> {
    let path = self.path_for(level);
    match fs::read_to_string(&path) {
      Ok(raw) => parse_board(&raw).unwrap_or_else(|| {
        error!(target: "leaderboard", path = %path.display(), "Failed to parse leaderboard; using defaults");
        default_entries(level)
      }),
      Err(e) if e.kind() == ErrorKind::NotFound => default_entries(level),
      Err(e) => {
        error!(target: "leaderboard", path = %path.display(), error = %e, "Failed to read leaderboard; using defaults");
        default_entries(level)
      }
    }
  }
}

impl LeaderboardStore for FileLeaderboard {
  fn get(&self, level: Difficulty) -> Vec<LeaderboardEntry> {
    self.read(level)
  }

  #[instrument(level = "info", skip(self, entry), fields(%level, username = %entry.username, score = entry.score))]
  fn put(&self, level: Difficulty, entry: LeaderboardEntry) -> Result<Vec<LeaderboardEntry>, LeaderboardError> {
    let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
    let board = insert_ranked(self.read(level), entry);
    write_atomically(&self.path_for(level), &board)?;
    info!(target: "leaderboard", %level, rows = board.len(), "Leaderboard saved");
    Ok(board)
  }
}

fn write_atomically(path: &Path, board: &[LeaderboardEntry]) -> Result<(), LeaderboardError> {
  let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
  fs::create_dir_all(parent_dir)?;

  let temp_file = NamedTempFile::new_in(parent_dir)?;
  {
    let mut writer = BufWriter::new(&temp_file);
    serde_json::to_writer(&mut writer, board)?;
    writer.flush()?;
  }
  temp_file.persist(path)?;
  Ok(())
}

/// Process-local boards, seeded with the default rows.
#[derive(Default)]
pub struct MemoryLeaderboard {
  boards: Mutex<HashMap<Difficulty, Vec<LeaderboardEntry>>>,
}

impl LeaderboardStore for MemoryLeaderboard {
  fn get(&self, level: Difficulty) -> Vec<LeaderboardEntry> {
    let boards = self.boards.lock().unwrap_or_else(|e| e.into_inner());
    boards.get(&level).cloned().unwrap_or_else(|| default_entries(level))
  }

  fn put(&self, level: Difficulty, entry: LeaderboardEntry) -> Result<Vec<LeaderboardEntry>, LeaderboardError> {
    let mut boards = self.boards.lock().unwrap_or_else(|e| e.into_inner());
    let current = boards.get(&level).cloned().unwrap_or_else(|| default_entries(level));
    let board = insert_ranked(current, entry);
    boards.insert(level, board.clone());
    Ok(board)
  }
}
