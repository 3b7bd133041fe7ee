//! Answer state machine.
//!
//! Pure transitions: `apply` consumes the current `Game` and a `Command` and returns
//! the next `Game` together with the effects the runtime has to carry out (arm or
//! cancel the retry timer, record a completed run, ...). Nothing here touches
//! clocks, timers, storage or the network; time and randomness are passed in.
//!
//! Resting phases are `Idle`, `Presenting`, `CorrectFeedback`, `IncorrectFeedback`
//! and `Completed`. Evaluating, advancing and retrying happen inside a single
//! transition and are reported through effects.
//!
//! Run generations: `RunState::version` changes on start, restart and reset. A
//! scheduled retry carries the version it was armed for and is ignored once the
//! run has moved on.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::GameSettings;
use crate::corpus::PoemRepository;
use crate::domain::{Difficulty, Poem, Question};
use crate::ladder::{current_poem, initialize, ladder_for};
use crate::question::QuestionBuilder;
use crate::util::{accuracy_percent, format_play_time};

/// Points for a correct answer.
pub const SCORE_PER_CORRECT: u32 = 10;

/// Per-run progress and scoring.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunState {
  pub difficulty: Difficulty,
  pub ladder: Vec<Poem>,
  /// 1-based; greater than `ladder.len()` once the run is complete.
  pub current_level: usize,
  pub score: u32,
  pub correct_count: u32,
  pub total_attempts: u32,
  pub started_at: Option<DateTime<Utc>>,
  pub version: u64,
}

impl RunState {
  /// A run that has not been started yet.
  pub fn idle() -> Self {
    Self {
      difficulty: Difficulty::Beginner,
      ladder: Vec::new(),
      current_level: 1,
      score: 0,
      correct_count: 0,
      total_attempts: 0,
      started_at: None,
      version: 0,
    }
  }

  pub fn accuracy(&self) -> u32 {
    accuracy_percent(self.correct_count, self.total_attempts)
  }

  pub fn total_levels(&self) -> usize {
    self.ladder.len()
  }

  pub fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
    self.started_at.map(|s| (now - s).num_milliseconds().max(0)).unwrap_or(0)
  }

  /// Statistics block attached to feedback submissions.
  pub fn stats(&self, now: DateTime<Utc>, max_levels: usize) -> GameStats {
    GameStats {
      correct: self.correct_count,
      total: self.total_attempts,
      start_time: self.started_at,
      accuracy: self.accuracy(),
      play_time: self.elapsed_ms(now) / 1000,
      score: self.score,
      current_level: self.current_level,
      max_levels,
    }
  }
}

/// Snapshot of run statistics (`playTime` in seconds).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameStats {
  pub correct: u32,
  pub total: u32,
  pub start_time: Option<DateTime<Utc>>,
  pub accuracy: u32,
  pub play_time: i64,
  pub score: u32,
  pub current_level: usize,
  pub max_levels: usize,
}

/// Final result of a completed run.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
  pub difficulty: Difficulty,
  pub score: u32,
  pub accuracy: u32,
  pub correct_count: u32,
  pub total_attempts: u32,
  pub levels: usize,
  pub elapsed_ms: i64,
  pub play_time: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Phase {
  Idle,
  Presenting { question: Question },
  CorrectFeedback { question: Question, selected: String },
  IncorrectFeedback { question: Question, selected: String },
  Completed { summary: RunSummary },
}

impl Phase {
  pub fn name(&self) -> &'static str {
    match self {
      Phase::Idle => "idle",
      Phase::Presenting { .. } => "presenting",
      Phase::CorrectFeedback { .. } => "correct_feedback",
      Phase::IncorrectFeedback { .. } => "incorrect_feedback",
      Phase::Completed { .. } => "completed",
    }
  }

  pub fn question(&self) -> Option<&Question> {
    match self {
      Phase::Presenting { question }
      | Phase::CorrectFeedback { question, .. }
      | Phase::IncorrectFeedback { question, .. } => Some(question),
      Phase::Idle | Phase::Completed { .. } => None,
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Game {
  pub run: RunState,
  pub phase: Phase,
}

impl Default for Game {
  fn default() -> Self {
    Self { run: RunState::idle(), phase: Phase::Idle }
  }
}

/// Player actions plus the timer callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
  /// Choose a difficulty and begin a fresh run (score reset).
  Start { difficulty: Difficulty },
  /// Pick an option; evaluated immediately.
  SelectOption { line: String },
  /// Continue after correct feedback.
  Acknowledge,
  /// Close the feedback overlay.
  DismissFeedback,
  /// The retry delay for `version` elapsed.
  RetryElapsed { version: u64 },
  /// Replay the ladder from level 1, keeping the accumulated score.
  Restart,
  /// Zero everything and return to idle.
  Reset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HaltReason {
  /// The tier has no poems, so there is nothing to present.
  EmptyLadder,
  /// The poem for `level` could not be turned into a question.
  InvalidPoemData { level: usize },
}

/// Externally observable consequences of a transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
  QuestionPresented { level: usize, poem_id: u32, masked_index: usize },
  AnswerEvaluated { correct: bool, score_delta: u32 },
  /// Arm the auto-retry timer for this run version.
  ScheduleRetry { after: Duration, version: u64 },
  /// Drop any armed retry timer.
  CancelRetry,
  LevelAdvanced { level: usize },
  QuestionRegenerated { level: usize },
  /// Hand the summary to the leaderboard.
  RunCompleted { summary: RunSummary },
  /// A new question was needed but could not be built; progression stops in place.
  Halted { reason: HaltReason },
  /// The command does not apply to the current phase.
  Rejected { reason: &'static str },
}

#[derive(Clone, Debug)]
pub struct Step {
  pub game: Game,
  pub effects: Vec<Effect>,
}

impl Step {
  fn unchanged(game: Game, reason: &'static str) -> Self {
    debug!(target: "quiz", phase = game.phase.name(), reason, "Command rejected");
    Self { game, effects: vec![Effect::Rejected { reason }] }
  }

  fn halted(game: Game, reason: HaltReason) -> Self {
    warn!(target: "quiz", phase = game.phase.name(), ?reason, "No question available; progression halted");
    Self { game, effects: vec![Effect::Halted { reason }] }
  }
}

pub struct AnswerStateMachine<'a> {
  repo: &'a PoemRepository,
  max_levels: usize,
  retry_delay: Duration,
}

impl<'a> AnswerStateMachine<'a> {
  pub fn new(repo: &'a PoemRepository, settings: &GameSettings) -> Self {
    Self { repo, max_levels: settings.max_levels, retry_delay: settings.retry_delay() }
  }

  pub fn apply<R: Rng + ?Sized>(&self, game: Game, command: Command, now: DateTime<Utc>, rng: &mut R) -> Step {
    match command {
      Command::Start { difficulty } => {
        let mut run = RunState::idle();
        run.difficulty = difficulty;
        self.begin(game, run, now, rng)
      }
      Command::Restart => {
        let mut run = RunState::idle();
        run.difficulty = game.run.difficulty;
        run.score = game.run.score;
        self.begin(game, run, now, rng)
      }
      Command::Reset => {
        let mut run = RunState::idle();
        run.version = game.run.version + 1;
        info!(target: "quiz", version = run.version, "Run reset");
        Step { game: Game { run, phase: Phase::Idle }, effects: vec![Effect::CancelRetry] }
      }
      Command::SelectOption { line } => self.select(game, line),
      Command::Acknowledge => match game.phase {
        Phase::CorrectFeedback { .. } => self.advance(game, now, rng),
        Phase::IncorrectFeedback { .. } => Step::unchanged(game, "incorrect answers retry automatically"),
        _ => Step::unchanged(game, "no feedback to acknowledge"),
      },
      Command::DismissFeedback => match game.phase {
        Phase::CorrectFeedback { .. } => self.advance(game, now, rng),
        // Hides the overlay only; the armed retry still fires.
        Phase::IncorrectFeedback { .. } => Step { game, effects: Vec::new() },
        _ => Step::unchanged(game, "no feedback to dismiss"),
      },
      Command::RetryElapsed { version } => {
        if version != game.run.version {
          return Step::unchanged(game, "stale retry for a replaced run");
        }
        match game.phase {
          Phase::IncorrectFeedback { .. } => self.retry(game, rng),
          _ => Step::unchanged(game, "retry only follows an incorrect answer"),
        }
      }
    }
  }

  /// Shared by start and restart: fresh ladder, level 1, new generation.
  fn begin<R: Rng + ?Sized>(&self, game: Game, mut run: RunState, now: DateTime<Utc>, rng: &mut R) -> Step {
    run.ladder = match run.difficulty {
      Difficulty::Beginner => initialize(self.repo, self.max_levels),
      other => ladder_for(self.repo, other, self.max_levels),
    };
    run.current_level = 1;
    run.started_at = Some(now);
    run.version = game.run.version + 1;

    if run.ladder.is_empty() {
      return Step::halted(game, HaltReason::EmptyLadder);
    }
    let Some(question) = self.question_for(&run, rng) else {
      return Step::halted(game, HaltReason::InvalidPoemData { level: 1 });
    };
    info!(target: "quiz", difficulty = %run.difficulty, levels = run.total_levels(), score = run.score, version = run.version, "Run started");
    let presented = presented(&run, &question);
    Step {
      game: Game { run, phase: Phase::Presenting { question } },
      effects: vec![Effect::CancelRetry, presented],
    }
  }

  fn select(&self, game: Game, line: String) -> Step {
    let Game { mut run, phase } = game;
    let question = match phase {
      Phase::Presenting { question } => question,
      other => return Step::unchanged(Game { run, phase: other }, "no question awaiting an answer"),
    };
    if !question.has_option(&line) {
      return Step::unchanged(Game { run, phase: Phase::Presenting { question } }, "selection is not one of the options");
    }

    run.total_attempts += 1;
    let correct = question.is_correct(&line);
    debug!(target: "quiz", level = run.current_level, %correct, attempts = run.total_attempts, "Answer evaluated");
    if correct {
      run.score += SCORE_PER_CORRECT;
      run.correct_count += 1;
      Step {
        game: Game { run, phase: Phase::CorrectFeedback { question, selected: line } },
        effects: vec![Effect::AnswerEvaluated { correct: true, score_delta: SCORE_PER_CORRECT }],
      }
    } else {
      let version = run.version;
      Step {
        game: Game { run, phase: Phase::IncorrectFeedback { question, selected: line } },
        effects: vec![
          Effect::AnswerEvaluated { correct: false, score_delta: 0 },
          Effect::ScheduleRetry { after: self.retry_delay, version },
        ],
      }
    }
  }

  fn advance<R: Rng + ?Sized>(&self, game: Game, now: DateTime<Utc>, rng: &mut R) -> Step {
    let mut run = game.run.clone();
    run.current_level += 1;

    if run.current_level > run.total_levels() {
      let summary = summarize(&run, now);
      info!(target: "quiz", difficulty = %summary.difficulty, score = summary.score, accuracy = summary.accuracy, play_time = %summary.play_time, "Run completed");
      return Step {
        game: Game { run, phase: Phase::Completed { summary: summary.clone() } },
        effects: vec![Effect::RunCompleted { summary }],
      };
    }

    let Some(question) = self.question_for(&run, rng) else {
      return Step::halted(game, HaltReason::InvalidPoemData { level: run.current_level });
    };
    let level = run.current_level;
    let presented = presented(&run, &question);
    Step {
      game: Game { run, phase: Phase::Presenting { question } },
      effects: vec![Effect::LevelAdvanced { level }, presented],
    }
  }

  fn retry<R: Rng + ?Sized>(&self, game: Game, rng: &mut R) -> Step {
    let Some(question) = self.question_for(&game.run, rng) else {
      let level = game.run.current_level;
      return Step::halted(game, HaltReason::InvalidPoemData { level });
    };
    let level = game.run.current_level;
    let presented = presented(&game.run, &question);
    debug!(target: "quiz", level, masked_index = question.masked_index, "Question regenerated after incorrect answer");
    Step {
      game: Game { run: game.run, phase: Phase::Presenting { question } },
      effects: vec![Effect::QuestionRegenerated { level }, presented],
    }
  }

  fn question_for<R: Rng + ?Sized>(&self, run: &RunState, rng: &mut R) -> Option<Question> {
    let poem = current_poem(run)?;
    QuestionBuilder::new(self.repo.distractors()).prepare(poem, rng)
  }
}

fn presented(run: &RunState, question: &Question) -> Effect {
  Effect::QuestionPresented {
    level: run.current_level,
    poem_id: question.poem.id,
    masked_index: question.masked_index,
  }
}

fn summarize(run: &RunState, now: DateTime<Utc>) -> RunSummary {
  let elapsed_ms = run.elapsed_ms(now);
  RunSummary {
    difficulty: run.difficulty,
    score: run.score,
    accuracy: run.accuracy(),
    correct_count: run.correct_count,
    total_attempts: run.total_attempts,
    levels: run.total_levels(),
    elapsed_ms,
    play_time: format_play_time(elapsed_ms),
  }
}
