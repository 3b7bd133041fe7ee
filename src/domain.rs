//! Domain models used by the backend: difficulty tiers, poems, questions and leaderboard rows.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::util::char_len;

/// Which tier of the corpus a poem (and a run) belongs to.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
  Beginner,
  Intermediate,
  Advanced,
}

impl Default for Difficulty {
  fn default() -> Self { Difficulty::Beginner }
}

impl Difficulty {
  pub const ALL: [Difficulty; 3] = [Difficulty::Beginner, Difficulty::Intermediate, Difficulty::Advanced];

  pub fn as_str(&self) -> &'static str {
    match self {
      Difficulty::Beginner => "beginner",
      Difficulty::Intermediate => "intermediate",
      Difficulty::Advanced => "advanced",
    }
  }

  /// Lenient parse used by the transport layer ("Beginner", " advanced ").
  pub fn parse(s: &str) -> Option<Self> {
    let s = s.trim().to_ascii_lowercase();
    Difficulty::ALL.into_iter().find(|d| d.as_str() == s)
  }

  pub fn label_zh(&self) -> &'static str {
    match self {
      Difficulty::Beginner => "初级",
      Difficulty::Intermediate => "中级",
      Difficulty::Advanced => "高级",
    }
  }
}

impl fmt::Display for Difficulty {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One classical poem. `content` holds the lines in reading order.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Poem {
  pub id: u32,
  pub title: String,
  pub author: String,
  pub dynasty: String,
  pub content: Vec<String>,
  pub difficulty: Difficulty,
  pub theme: String,
}

impl Poem {
  /// Sum of the character counts of every line (the ladder sort key).
  pub fn total_chars(&self) -> usize {
    self.content.iter().map(|l| char_len(l)).sum()
  }

  /// At least one line and no blank lines.
  pub fn is_well_formed(&self) -> bool {
    !self.content.is_empty() && self.content.iter().all(|l| !l.trim().is_empty())
  }
}

/// A poem line as shown to the player; the masked line carries the placeholder.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DisplayLine {
  pub text: String,
  pub is_masked: bool,
}

/// A single "fill the missing line" question. Created per attempt and discarded once resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Question {
  pub poem: Poem,
  pub masked_index: usize,
  pub correct_line: String,
  /// Shuffled; contains `correct_line` exactly once. Fewer than 4 only when distractors ran out.
  pub options: Vec<String>,
  pub display_lines: Vec<DisplayLine>,
}

impl Question {
  pub fn has_option(&self, line: &str) -> bool {
    self.options.iter().any(|o| o == line)
  }

  pub fn is_correct(&self, line: &str) -> bool {
    self.correct_line == line
  }
}

/// Leaderboard row as persisted and served.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderboardEntry {
  pub username: String,
  pub score: u32,
  /// Percentage, 0–100.
  pub accuracy: u32,
  #[serde(rename = "playTime")]
  pub play_time: String,
}
