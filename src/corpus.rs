//! Poem corpus and distractor pool.
//!
//! Both are load-time constants: built once at startup from TOML (the embedded
//! asset or an external file) and only read afterwards.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;
use tracing::{error, info, instrument, warn};

use crate::domain::{Difficulty, Poem};
use crate::error::CorpusError;

/// The corpus shipped with the binary.
const BUILTIN_CORPUS: &str = include_str!("../assets/corpus.toml");

/// On-disk schema of a corpus file.
#[derive(Debug, Deserialize)]
struct CorpusFile {
  #[serde(default)]
  poems: Vec<Poem>,
  #[serde(default)]
  distractors: BTreeMap<String, Vec<String>>,
}

/// Theme name → candidate wrong-answer lines.
#[derive(Clone, Debug, Default)]
pub struct DistractorPool {
  themes: BTreeMap<String, Vec<String>>,
}

impl DistractorPool {
  /// Builds the pool, dropping blank lines and repeats within a theme.
  pub fn new(themes: BTreeMap<String, Vec<String>>) -> Self {
    let themes = themes
      .into_iter()
      .map(|(theme, lines)| {
        let mut kept: Vec<String> = Vec::with_capacity(lines.len());
        for line in lines {
          let line = line.trim().to_string();
          if !line.is_empty() && !kept.contains(&line) {
            kept.push(line);
          }
        }
        (theme, kept)
      })
      .collect();
    Self { themes }
  }

  /// Lines for one theme; empty for an unknown theme.
  pub fn theme(&self, theme: &str) -> &[String] {
    self.themes.get(theme).map(Vec::as_slice).unwrap_or(&[])
  }

  pub fn themes(&self) -> impl Iterator<Item = (&str, &[String])> {
    self.themes.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
  }

  /// Every line of every theme, theme by theme. A line shared by two themes appears twice.
  pub fn all_lines(&self) -> impl Iterator<Item = &str> {
    self.themes.values().flat_map(|v| v.iter().map(String::as_str))
  }

  pub fn theme_count(&self) -> usize {
    self.themes.len()
  }
}

/// Immutable in-memory corpus grouped by difficulty, plus the distractor pool.
#[derive(Clone, Debug)]
pub struct PoemRepository {
  by_difficulty: HashMap<Difficulty, Vec<Poem>>,
  distractors: DistractorPool,
}

impl PoemRepository {
  /// Builds a repository from already-parsed parts. Poems with no lines or blank
  /// lines are skipped; corpus order is kept within each tier.
  pub fn from_parts(poems: Vec<Poem>, distractors: DistractorPool) -> Self {
    let mut by_difficulty: HashMap<Difficulty, Vec<Poem>> = HashMap::new();
    for poem in poems {
      if !poem.is_well_formed() {
        error!(target: "quiz", id = poem.id, title = %poem.title, "Skipping corpus poem: empty content or blank line.");
        continue;
      }
      by_difficulty.entry(poem.difficulty).or_default().push(poem);
    }
    Self { by_difficulty, distractors }
  }

  pub fn from_toml_str(s: &str) -> Result<Self, CorpusError> {
    let file: CorpusFile = toml::from_str(s)?;
    let repo = Self::from_parts(file.poems, DistractorPool::new(file.distractors));
    if repo.is_empty() {
      return Err(CorpusError::Empty);
    }
    Ok(repo)
  }

  pub fn from_path(path: &Path) -> Result<Self, CorpusError> {
    let s = std::fs::read_to_string(path).map_err(|source| CorpusError::Io {
      path: path.display().to_string(),
      source,
    })?;
    Self::from_toml_str(&s)
  }

  /// The corpus compiled into the binary.
  pub fn builtin() -> Result<Self, CorpusError> {
    Self::from_toml_str(BUILTIN_CORPUS)
  }

  /// External corpus if configured and valid, otherwise the built-in one.
  #[instrument(level = "info")]
  pub fn load(path: Option<&Path>) -> Result<Self, CorpusError> {
    if let Some(path) = path {
      match Self::from_path(path) {
        Ok(repo) => {
          info!(target: "quiz", path = %path.display(), poems = repo.len(), "Loaded external corpus");
          return Ok(repo);
        }
        Err(e) => {
          warn!(target: "quiz", path = %path.display(), error = %e, "External corpus unusable; using built-in corpus");
        }
      }
    }
    let repo = Self::builtin()?;
    for d in Difficulty::ALL {
      info!(target: "quiz", difficulty = %d, poems = repo.by_difficulty(d).len(), "Startup corpus inventory");
    }
    info!(target: "quiz", themes = repo.distractors.theme_count(), "Startup distractor inventory");
    Ok(repo)
  }

  /// Poems of one tier in corpus order; empty if the tier has none.
  pub fn by_difficulty(&self, difficulty: Difficulty) -> &[Poem] {
    self.by_difficulty.get(&difficulty).map(Vec::as_slice).unwrap_or(&[])
  }

  /// String-keyed lookup for transport callers; unknown names yield an empty slice.
  pub fn by_difficulty_name(&self, name: &str) -> &[Poem] {
    Difficulty::parse(name).map(|d| self.by_difficulty(d)).unwrap_or(&[])
  }

  #[cfg(test)]
  pub fn poem(&self, id: u32) -> Option<&Poem> {
    self.by_difficulty.values().flatten().find(|p| p.id == id)
  }

  pub fn distractors(&self) -> &DistractorPool {
    &self.distractors
  }

  pub fn len(&self) -> usize {
    self.by_difficulty.values().map(Vec::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Small corpus shared by unit tests across modules: every line is five characters
/// and every theme has plenty of same-length distractors.
#[cfg(test)]
pub(crate) fn fixture_repo() -> PoemRepository {
  let poem = |id: u32, title: &str, lines: [&str; 4], theme: &str| Poem {
    id,
    title: title.into(),
    author: "佚名".into(),
    dynasty: "唐".into(),
    content: lines.iter().map(|s| s.to_string()).collect(),
    difficulty: Difficulty::Beginner,
    theme: theme.into(),
  };
  let poems = vec![
    poem(1, "静夜思", ["床前明月光", "疑是地上霜", "举头望明月", "低头思故乡"], "思乡"),
    poem(2, "春晓", ["春眠不觉晓", "处处闻啼鸟", "夜来风雨声", "花落知多少"], "春景"),
    poem(3, "登鹳雀楼", ["白日依山尽", "黄河入海流", "欲穷千里目", "更上一层楼"], "思乡"),
  ];
  let mut themes = BTreeMap::new();
  themes.insert(
    "思乡".to_string(),
    ["月落乌啼霜", "江枫渔火愁", "姑苏城外寺", "夜半钟声到", "独在异乡为异客"]
      .iter()
      .map(|s| s.to_string())
      .collect(),
  );
  themes.insert(
    "春景".to_string(),
    ["春种一粒粟", "秋收万颗子", "四海无闲田", "农夫犹饿死"].iter().map(|s| s.to_string()).collect(),
  );
  PoemRepository::from_parts(poems, DistractorPool::new(themes))
}
