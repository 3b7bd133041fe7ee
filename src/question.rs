//! Question construction: hide one line of a poem and assemble the option set.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, instrument, warn};

use crate::corpus::DistractorPool;
use crate::distractor::{DistractorSelector, DEFAULT_DISTRACTOR_COUNT};
use crate::domain::{DisplayLine, Poem, Question};

/// Shown in place of the masked line.
pub const MASK_PLACEHOLDER: &str = "___________";

#[derive(Clone, Copy, Debug)]
pub struct QuestionBuilder<'a> {
  selector: DistractorSelector<'a>,
  distractor_count: usize,
}

impl<'a> QuestionBuilder<'a> {
  pub fn new(pool: &'a DistractorPool) -> Self {
    Self { selector: DistractorSelector::new(pool), distractor_count: DEFAULT_DISTRACTOR_COUNT }
  }

  /// Returns `None` for a poem without lines (or with a blank line); callers must
  /// treat that as "no question available" rather than an error.
  #[instrument(level = "debug", skip_all, fields(poem_id = poem.id))]
  pub fn prepare<R: Rng + ?Sized>(&self, poem: &Poem, rng: &mut R) -> Option<Question> {
    if !poem.is_well_formed() {
      warn!(target: "quiz", poem_id = poem.id, title = %poem.title, "Cannot build a question: invalid poem data");
      return None;
    }

    let masked_index = rng.gen_range(0..poem.content.len());
    let correct_line = poem.content[masked_index].clone();

    let distractors = self.selector.select(&correct_line, &poem.theme, self.distractor_count, rng);
    let mut options = Vec::with_capacity(distractors.len() + 1);
    options.push(correct_line.clone());
    options.extend(distractors);
    options.shuffle(rng);

    let display_lines = poem
      .content
      .iter()
      .enumerate()
      .map(|(i, line)| DisplayLine {
        text: if i == masked_index { MASK_PLACEHOLDER.to_string() } else { line.clone() },
        is_masked: i == masked_index,
      })
      .collect();

    debug!(target: "quiz", poem_id = poem.id, masked_index, options = options.len(), "Question prepared");
    Some(Question { poem: poem.clone(), masked_index, correct_line, options, display_lines })
  }
}

#[cfg(test)]
mod tests {
  use rand::rngs::StdRng;
  use rand::SeedableRng;

  use super::*;
  use crate::corpus::{fixture_repo, PoemRepository};
  use crate::domain::Difficulty;

  #[test]
  fn question_has_four_options_with_one_correct_line() {
    let repo = fixture_repo();
    let poem = repo.poem(1).expect("fixture poem").clone();
    let builder = QuestionBuilder::new(repo.distractors());
    for seed in 0..100 {
      let mut rng = StdRng::seed_from_u64(seed);
      let q = builder.prepare(&poem, &mut rng).expect("question");
      assert_eq!(q.options.len(), 4);
      assert_eq!(q.options.iter().filter(|o| **o == q.correct_line).count(), 1);
      assert_eq!(q.correct_line, poem.content[q.masked_index]);
      let mut uniq = q.options.clone();
      uniq.sort();
      uniq.dedup();
      assert_eq!(uniq.len(), 4);
    }
  }

  #[test]
  fn display_lines_mask_exactly_the_chosen_line() {
    let repo = fixture_repo();
    let poem = repo.poem(2).expect("fixture poem").clone();
    let mut rng = StdRng::seed_from_u64(5);
    let q = QuestionBuilder::new(repo.distractors()).prepare(&poem, &mut rng).expect("question");
    assert_eq!(q.display_lines.len(), poem.content.len());
    for (i, line) in q.display_lines.iter().enumerate() {
      if i == q.masked_index {
        assert!(line.is_masked);
        assert_eq!(line.text, MASK_PLACEHOLDER);
      } else {
        assert!(!line.is_masked);
        assert_eq!(line.text, poem.content[i]);
      }
    }
  }

  #[test]
  fn masked_index_covers_every_line() {
    let repo = fixture_repo();
    let poem = repo.poem(3).expect("fixture poem").clone();
    let builder = QuestionBuilder::new(repo.distractors());
    let mut rng = StdRng::seed_from_u64(99);
    let mut seen = [false; 4];
    for _ in 0..200 {
      seen[builder.prepare(&poem, &mut rng).expect("question").masked_index] = true;
    }
    assert!(seen.iter().all(|s| *s));
  }

  #[test]
  fn empty_poem_yields_no_question() {
    let repo = fixture_repo();
    let mut poem = repo.poem(1).expect("fixture poem").clone();
    poem.content.clear();
    let mut rng = StdRng::seed_from_u64(0);
    assert!(QuestionBuilder::new(repo.distractors()).prepare(&poem, &mut rng).is_none());
  }

  #[test]
  fn insufficient_distractors_shrink_the_option_set() {
    let repo = PoemRepository::builtin().expect("builtin corpus");
    let goose = repo
      .by_difficulty(Difficulty::Beginner)
      .iter()
      .find(|p| p.title == "咏鹅")
      .expect("咏鹅 in corpus")
      .clone();
    let builder = QuestionBuilder::new(repo.distractors());
    let mut rng = StdRng::seed_from_u64(0);
    loop {
      let q = builder.prepare(&goose, &mut rng).expect("question");
      if q.masked_index == 0 {
        // "鹅鹅鹅" has no 2–4 character candidates anywhere in the pool.
        assert_eq!(q.options, vec!["鹅鹅鹅".to_string()]);
        break;
      }
    }
  }
}
