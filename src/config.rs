//! Loading service configuration (game rules, storage, corpus, feedback backend) from TOML.
//!
//! The file is optional (`QUIZ_CONFIG_PATH`); a handful of environment variables
//! override individual values afterwards. See `QuizConfig` for the schema.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::ladder::DEFAULT_MAX_LEVELS;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct QuizConfig {
  #[serde(default)]
  pub game: GameSettings,
  #[serde(default)]
  pub storage: StorageSettings,
  #[serde(default)]
  pub corpus: CorpusSettings,
  /// Absent means feedback runs in simulation mode.
  #[serde(default)]
  pub feedback: Option<FeedbackConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GameSettings {
  #[serde(default = "default_max_levels")]
  pub max_levels: usize,
  /// Delay before an incorrect answer is replaced by a new question.
  #[serde(default = "default_retry_delay_ms")]
  pub retry_delay_ms: u64,
  /// Fixed seed for reproducible sessions; entropy when unset.
  #[serde(default)]
  pub rng_seed: Option<u64>,
  /// HTTP sessions untouched for this long are closed and dropped.
  #[serde(default = "default_session_ttl_secs")]
  pub session_ttl_secs: u64,
}

impl Default for GameSettings {
  fn default() -> Self {
    Self {
      max_levels: default_max_levels(),
      retry_delay_ms: default_retry_delay_ms(),
      rng_seed: None,
      session_ttl_secs: default_session_ttl_secs(),
    }
  }
}

impl GameSettings {
  pub fn retry_delay(&self) -> Duration {
    Duration::from_millis(self.retry_delay_ms)
  }

  pub fn session_ttl(&self) -> Duration {
    Duration::from_secs(self.session_ttl_secs)
  }
}

#[derive(Clone, Debug, Deserialize)]
pub struct StorageSettings {
  /// Directory for leaderboard boards and the pending-feedback queue.
  #[serde(default = "default_data_dir")]
  pub data_dir: PathBuf,
}

impl Default for StorageSettings {
  fn default() -> Self {
    Self { data_dir: default_data_dir() }
  }
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct CorpusSettings {
  /// External corpus TOML replacing the built-in one.
  #[serde(default)]
  pub path: Option<PathBuf>,
}

/// Connection details for the hosted feedback table.
///
/// Note: Debug masks the anon key.
#[derive(Clone, Deserialize)]
pub struct FeedbackConfig {
  #[serde(default)]
  pub url: String,
  #[serde(default)]
  pub anon_key: String,
  #[serde(default = "default_table_name", alias = "feedback_table")]
  pub table_name: String,
  /// Artificial latency of simulation mode.
  #[serde(default = "default_simulation_delay_ms")]
  pub simulation_delay_ms: u64,
}

impl fmt::Debug for FeedbackConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FeedbackConfig")
      .field("url", &self.url)
      .field("anon_key", &"***")
      .field("table_name", &self.table_name)
      .field("simulation_delay_ms", &self.simulation_delay_ms)
      .finish()
  }
}

impl FeedbackConfig {
  /// True while the values are blank or still the template's.
  pub fn is_placeholder(&self) -> bool {
    let url = self.url.trim();
    let key = self.anon_key.trim();
    url.is_empty() || key.is_empty() || url.contains("your-project-id") || key.contains("your-anon-key")
  }

  pub fn endpoint(&self) -> String {
    format!("{}/rest/v1/{}", self.url.trim_end_matches('/'), self.table_name)
  }

  pub fn simulation_delay(&self) -> Duration {
    Duration::from_millis(self.simulation_delay_ms)
  }
}

fn default_max_levels() -> usize { DEFAULT_MAX_LEVELS }
fn default_retry_delay_ms() -> u64 { 2000 }
fn default_session_ttl_secs() -> u64 { 1800 }
fn default_data_dir() -> PathBuf { PathBuf::from("./data") }
fn default_table_name() -> String { "game_feedback".into() }
fn default_simulation_delay_ms() -> u64 { 1000 }

pub fn parse_config(s: &str) -> Result<QuizConfig, toml::de::Error> {
  toml::from_str::<QuizConfig>(s)
}

/// Apply environment overrides. `lookup` is `std::env::var` in production.
pub fn apply_env_overrides(mut cfg: QuizConfig, lookup: impl Fn(&str) -> Option<String>) -> QuizConfig {
  let url = lookup("SUPABASE_URL");
  let key = lookup("SUPABASE_ANON_KEY");
  let table = lookup("SUPABASE_TABLE");
  if url.is_some() || key.is_some() || table.is_some() {
    let fb = cfg.feedback.get_or_insert_with(|| FeedbackConfig {
      url: String::new(),
      anon_key: String::new(),
      table_name: default_table_name(),
      simulation_delay_ms: default_simulation_delay_ms(),
    });
    if let Some(url) = url { fb.url = url; }
    if let Some(key) = key { fb.anon_key = key; }
    if let Some(table) = table { fb.table_name = table; }
  }

  if let Some(dir) = lookup("QUIZ_DATA_DIR") {
    cfg.storage.data_dir = PathBuf::from(dir);
  }
  if let Some(raw) = lookup("QUIZ_MAX_LEVELS") {
    match raw.parse::<usize>() {
      Ok(n) => cfg.game.max_levels = n,
      Err(e) => warn!(target: "shici_quiz_backend", %raw, error = %e, "Ignoring invalid QUIZ_MAX_LEVELS"),
    }
  }
  if let Some(raw) = lookup("QUIZ_RNG_SEED") {
    match raw.parse::<u64>() {
      Ok(seed) => cfg.game.rng_seed = Some(seed),
      Err(e) => warn!(target: "shici_quiz_backend", %raw, error = %e, "Ignoring invalid QUIZ_RNG_SEED"),
    }
  }
  cfg
}

/// Load from QUIZ_CONFIG_PATH (if set) plus env overrides. On any IO/parsing error the
/// defaults are used.
pub fn load_config_from_env() -> QuizConfig {
  let base = match std::env::var("QUIZ_CONFIG_PATH") {
    Ok(path) => match std::fs::read_to_string(&path) {
      Ok(s) => match parse_config(&s) {
        Ok(cfg) => {
          info!(target: "shici_quiz_backend", %path, "Loaded quiz config (TOML)");
          cfg
        }
        Err(e) => {
          error!(target: "shici_quiz_backend", %path, error = %e, "Failed to parse TOML config");
          QuizConfig::default()
        }
      },
      Err(e) => {
        error!(target: "shici_quiz_backend", %path, error = %e, "Failed to read TOML config file");
        QuizConfig::default()
      }
    },
    Err(_) => QuizConfig::default(),
  };
  apply_env_overrides(base, |k| std::env::var(k).ok())
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use super::*;

  #[test]
  fn empty_file_gives_defaults() {
    let cfg = parse_config("").expect("empty config");
    assert_eq!(cfg.game.max_levels, 5);
    assert_eq!(cfg.game.retry_delay(), Duration::from_millis(2000));
    assert_eq!(cfg.game.session_ttl(), Duration::from_secs(1800));
    assert_eq!(cfg.storage.data_dir, PathBuf::from("./data"));
    assert!(cfg.feedback.is_none());
    assert!(cfg.corpus.path.is_none());
  }

  #[test]
  fn full_file_is_parsed() {
    let cfg = parse_config(
      r#"
[game]
max_levels = 3
retry_delay_ms = 500
rng_seed = 42
session_ttl_secs = 600

[storage]
data_dir = "/tmp/quiz"

[feedback]
url = "https://abc.supabase.co"
anon_key = "eyJreal"
feedback_table = "fb"
"#,
    )
    .expect("config");
    assert_eq!(cfg.game.max_levels, 3);
    assert_eq!(cfg.game.rng_seed, Some(42));
    assert_eq!(cfg.game.session_ttl(), Duration::from_secs(600));
    let fb = cfg.feedback.expect("feedback section");
    assert_eq!(fb.table_name, "fb");
    assert_eq!(fb.endpoint(), "https://abc.supabase.co/rest/v1/fb");
    assert!(!fb.is_placeholder());
    assert!(!format!("{fb:?}").contains("eyJreal"));
  }

  #[test]
  fn template_values_count_as_placeholder() {
    let fb = FeedbackConfig {
      url: "https://your-project-id.supabase.co".into(),
      anon_key: "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.your-anon-key-here".into(),
      table_name: "game_feedback".into(),
      simulation_delay_ms: 0,
    };
    assert!(fb.is_placeholder());
    let blank = FeedbackConfig { url: String::new(), ..fb.clone() };
    assert!(blank.is_placeholder());
  }

  #[test]
  fn env_overrides_win() {
    let env: HashMap<&str, &str> = HashMap::from([
      ("SUPABASE_URL", "https://real.supabase.co"),
      ("SUPABASE_ANON_KEY", "eyJkey"),
      ("QUIZ_MAX_LEVELS", "7"),
      ("QUIZ_RNG_SEED", "not-a-number"),
      ("QUIZ_DATA_DIR", "/var/lib/quiz"),
    ]);
    let cfg = apply_env_overrides(QuizConfig::default(), |k| env.get(k).map(|v| v.to_string()));
    assert_eq!(cfg.game.max_levels, 7);
    assert_eq!(cfg.game.rng_seed, None);
    assert_eq!(cfg.storage.data_dir, PathBuf::from("/var/lib/quiz"));
    let fb = cfg.feedback.expect("feedback from env");
    assert_eq!(fb.url, "https://real.supabase.co");
    assert_eq!(fb.table_name, "game_feedback");
  }
}
