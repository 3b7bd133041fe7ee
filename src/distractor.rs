//! Wrong-answer selection.
//!
//! Candidates are drawn in three tiers, each relaxing the previous one:
//!   1) same theme, same character length
//!   2) any other theme, same character length
//!   3) anywhere in the pool, length within ±1
//! A tier is only consulted while the result is still short. Each tier is shuffled
//! before lines are taken from it, and the final set is shuffled once more.
//! A line from a higher tier is never displaced by one from a lower tier.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, instrument};

use crate::corpus::DistractorPool;
use crate::util::char_len;

/// Number of wrong answers offered next to the correct line.
pub const DEFAULT_DISTRACTOR_COUNT: usize = 3;

#[derive(Clone, Copy, Debug)]
pub struct DistractorSelector<'a> {
  pool: &'a DistractorPool,
}

impl<'a> DistractorSelector<'a> {
  pub fn new(pool: &'a DistractorPool) -> Self {
    Self { pool }
  }

  /// Up to `count` distinct lines, none equal to `correct_line`.
  /// A shorter result is normal when the pool runs dry.
  #[instrument(level = "debug", skip(self, rng), fields(len = char_len(correct_line)))]
  pub fn select<R: Rng + ?Sized>(
    &self,
    correct_line: &str,
    theme: &str,
    count: usize,
    rng: &mut R,
  ) -> Vec<String> {
    let target = char_len(correct_line);
    let same_theme = self.pool.theme(theme);
    let mut chosen: Vec<&'a str> = Vec::with_capacity(count);

    let tier1: Vec<&'a str> = same_theme
      .iter()
      .map(String::as_str)
      .filter(|l| *l != correct_line && char_len(l) == target)
      .collect();
    take_from_tier(&mut chosen, tier1, count, rng);

    if chosen.len() < count {
      let tier2: Vec<&'a str> = self
        .pool
        .themes()
        .filter(|(name, _)| *name != theme)
        .flat_map(|(_, lines)| lines.iter().map(String::as_str))
        .filter(|l| *l != correct_line && char_len(l) == target && !same_theme.iter().any(|s| s == l))
        .collect();
      take_from_tier(&mut chosen, tier2, count, rng);
    }

    if chosen.len() < count {
      let tier3: Vec<&'a str> = self
        .pool
        .all_lines()
        .filter(|l| *l != correct_line && char_len(l).abs_diff(target) <= 1)
        .collect();
      take_from_tier(&mut chosen, tier3, count, rng);
    }

    chosen.shuffle(rng);
    if chosen.len() < count {
      debug!(target: "quiz", %theme, wanted = count, found = chosen.len(), "Insufficient distractors; offering a smaller option set");
    }
    chosen.into_iter().map(str::to_owned).collect()
  }
}

fn take_from_tier<'p, R: Rng + ?Sized>(chosen: &mut Vec<&'p str>, mut tier: Vec<&'p str>, count: usize, rng: &mut R) {
  tier.shuffle(rng);
  for line in tier {
    if chosen.len() >= count {
      break;
    }
    if !chosen.contains(&line) {
      chosen.push(line);
    }
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use rand::rngs::StdRng;
  use rand::SeedableRng;

  use super::*;
  use crate::corpus::PoemRepository;

  fn pool(entries: &[(&str, &[&str])]) -> DistractorPool {
    let mut themes = BTreeMap::new();
    for (theme, lines) in entries {
      themes.insert(theme.to_string(), lines.iter().map(|s| s.to_string()).collect());
    }
    DistractorPool::new(themes)
  }

  #[test]
  fn never_returns_the_correct_line() {
    let p = pool(&[("思乡", &["床前明月光", "月落乌啼霜", "江枫渔火愁", "姑苏城外寺", "夜半钟声到"])]);
    let selector = DistractorSelector::new(&p);
    for seed in 0..200 {
      let mut rng = StdRng::seed_from_u64(seed);
      let picked = selector.select("床前明月光", "思乡", 3, &mut rng);
      assert_eq!(picked.len(), 3);
      assert!(!picked.iter().any(|l| l == "床前明月光"));
    }
  }

  #[test]
  fn quiet_night_thought_gets_three_five_character_lines_from_builtin_pool() {
    let repo = PoemRepository::builtin().expect("builtin corpus");
    let selector = DistractorSelector::new(repo.distractors());
    for seed in 0..50 {
      let mut rng = StdRng::seed_from_u64(seed);
      let picked = selector.select("床前明月光", "思乡", 3, &mut rng);
      assert_eq!(picked.len(), 3);
      assert!(picked.iter().all(|l| char_len(l) == 5), "{picked:?}");
      assert!(!picked.iter().any(|l| l == "床前明月光"));
      let mut dedup = picked.clone();
      dedup.sort();
      dedup.dedup();
      assert_eq!(dedup.len(), 3);
    }
  }

  #[test]
  fn same_theme_exact_length_is_preferred() {
    let p = pool(&[
      ("思乡", &["月落乌啼霜", "江枫渔火愁", "姑苏城外寺", "独在异乡为异客"]),
      ("春景", &["春种一粒粟", "秋收万颗子"]),
    ]);
    let selector = DistractorSelector::new(&p);
    let mut expected = vec!["月落乌啼霜".to_string(), "江枫渔火愁".to_string(), "姑苏城外寺".to_string()];
    expected.sort();
    for seed in 0..50 {
      let mut rng = StdRng::seed_from_u64(seed);
      let mut picked = selector.select("床前明月光", "思乡", 3, &mut rng);
      picked.sort();
      assert_eq!(picked, expected, "seed {seed}");
    }
  }

  #[test]
  fn partial_higher_tier_is_always_kept_whole() {
    // One same-theme line, many other-theme and near-length lines competing for the rest.
    let p = pool(&[
      ("思乡", &["月落乌啼霜", "独在异乡为异客"]),
      ("春景", &["春种一粒粟", "秋收万颗子", "四海无闲田", "农夫犹饿死"]),
      ("咏物", &["墙角数枝", "凌寒独自", "遥知不是雪", "为有暗香来"]),
    ]);
    let selector = DistractorSelector::new(&p);
    for seed in 0..50 {
      let mut rng = StdRng::seed_from_u64(seed);
      let picked = selector.select("床前明月光", "思乡", 3, &mut rng);
      assert_eq!(picked.len(), 3);
      assert!(picked.contains(&"月落乌啼霜".to_string()), "seed {seed}: {picked:?}");
      // Exact-length lines from other themes outnumber the two open slots.
      assert!(picked.iter().all(|l| char_len(l) == 5), "seed {seed}: {picked:?}");
    }
  }

  #[test]
  fn falls_through_to_other_themes_then_near_length() {
    let p = pool(&[
      ("思乡", &["月落乌啼霜", "独在异乡为异客"]),
      ("春景", &["春种一粒粟"]),
      ("咏物", &["墙角数枝", "一二三"]),
    ]);
    let selector = DistractorSelector::new(&p);
    let mut rng = StdRng::seed_from_u64(1);
    let mut picked = selector.select("床前明月光", "思乡", 3, &mut rng);
    picked.sort();
    let mut expected = vec!["月落乌啼霜".to_string(), "春种一粒粟".to_string(), "墙角数枝".to_string()];
    expected.sort();
    assert_eq!(picked, expected);
  }

  #[test]
  fn short_pool_returns_partial_set() {
    let p = pool(&[("咏物", &["墙角数枝梅", "凌寒独自开"])]);
    let selector = DistractorSelector::new(&p);
    let mut rng = StdRng::seed_from_u64(3);
    assert!(selector.select("鹅鹅鹅", "咏物", 3, &mut rng).is_empty());
    assert!(selector.select("鹅鹅鹅", "unknown", 3, &mut rng).is_empty());
  }

  #[test]
  fn lines_shared_between_themes_are_not_repeated() {
    let p = pool(&[
      ("励志", &["柳暗花明又一村"]),
      ("寻访", &["柳暗花明又一村", "只缘身在此山中"]),
    ]);
    let selector = DistractorSelector::new(&p);
    let mut rng = StdRng::seed_from_u64(11);
    let picked = selector.select("春色满园关不住", "思乡", 3, &mut rng);
    assert_eq!(picked.len(), 2);
    assert_ne!(picked[0], picked[1]);
  }

  #[test]
  fn zero_count_returns_nothing() {
    let p = pool(&[("思乡", &["月落乌啼霜"])]);
    let mut rng = StdRng::seed_from_u64(0);
    assert!(DistractorSelector::new(&p).select("床前明月光", "思乡", 0, &mut rng).is_empty());
  }
}
