//! Level ladder: the ordered subset of poems a run climbs through.

use tracing::debug;

use crate::corpus::PoemRepository;
use crate::domain::{Difficulty, Poem};
use crate::machine::RunState;

/// Default number of levels in a run.
pub const DEFAULT_MAX_LEVELS: usize = 5;

/// The beginner ladder: shortest poems first, at most `max_levels` of them.
pub fn initialize(repo: &PoemRepository, max_levels: usize) -> Vec<Poem> {
  ladder_for(repo, Difficulty::Beginner, max_levels)
}

/// Ladder for any tier. Poems are ordered by total character count, ascending;
/// the sort is stable so equal counts keep corpus order. The ladder may be shorter
/// than `max_levels` and its length, not `max_levels`, decides completion.
pub fn ladder_for(repo: &PoemRepository, difficulty: Difficulty, max_levels: usize) -> Vec<Poem> {
  let mut poems = repo.by_difficulty(difficulty).to_vec();
  poems.sort_by_key(Poem::total_chars);
  poems.truncate(max_levels);
  debug!(
    target: "quiz",
    %difficulty,
    ladder = ?poems.iter().map(|p| (p.title.as_str(), p.total_chars())).collect::<Vec<_>>(),
    "Level ladder built"
  );
  poems
}

/// Poem for the run's current (1-based) level; `None` once the ladder is exhausted.
pub fn current_poem(run: &RunState) -> Option<&Poem> {
  run.current_level.checked_sub(1).and_then(|i| run.ladder.get(i))
}
