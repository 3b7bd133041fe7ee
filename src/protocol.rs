//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.
//!
//! Session snapshots hide the correct line while a question is being presented;
//! feedback phases reveal it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Difficulty, DisplayLine, LeaderboardEntry, Poem};
use crate::feedback::SubmitOutcome;
use crate::machine::{Effect, HaltReason, Phase, RunSummary};
use crate::session::Session;

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    StartGame {
        #[serde(default)]
        difficulty: Option<String>,
    },
    SelectOption {
        line: String,
    },
    Acknowledge,
    DismissFeedback,
    Restart,
    Reset,
    Leaderboard {
        #[serde(default)]
        difficulty: Option<String>,
    },
    SubmitFeedback(FeedbackIn),
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Session {
        session: SessionOut,
    },
    Leaderboard(LeaderboardOut),
    FeedbackResult {
        outcome: SubmitOutcome,
    },
    Error {
        message: String,
    },
}

/// Player-facing view of a session.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOut {
    pub session_id: Uuid,
    pub user_name: String,
    pub created_at: DateTime<Utc>,
    pub phase: &'static str,
    pub difficulty: Difficulty,
    pub current_level: usize,
    pub total_levels: usize,
    pub score: u32,
    pub correct_count: u32,
    pub total_attempts: u32,
    pub accuracy: u32,
    pub retry_pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<QuestionOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<AnswerFeedbackOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
    /// Why the last command did nothing (rejected or halted).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOut {
    pub poem_id: u32,
    pub title: String,
    pub author: String,
    pub dynasty: String,
    pub masked_index: usize,
    pub display_lines: Vec<DisplayLine>,
    pub options: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerFeedbackOut {
    pub correct: bool,
    pub selected: String,
    pub correct_line: String,
}

/// Snapshot of `session`, annotated with the outcome of the command that produced `effects`.
pub fn session_out(session: &Session, effects: &[Effect]) -> SessionOut {
    let game = &session.game;
    let question = game.phase.question().map(|q| QuestionOut {
        poem_id: q.poem.id,
        title: q.poem.title.clone(),
        author: q.poem.author.clone(),
        dynasty: q.poem.dynasty.clone(),
        masked_index: q.masked_index,
        display_lines: q.display_lines.clone(),
        options: q.options.clone(),
    });
    let feedback = match &game.phase {
        Phase::CorrectFeedback { question, selected } => Some(AnswerFeedbackOut {
            correct: true,
            selected: selected.clone(),
            correct_line: question.correct_line.clone(),
        }),
        Phase::IncorrectFeedback { question, selected } => Some(AnswerFeedbackOut {
            correct: false,
            selected: selected.clone(),
            correct_line: question.correct_line.clone(),
        }),
        _ => None,
    };
    let summary = match &game.phase {
        Phase::Completed { summary } => Some(summary.clone()),
        _ => None,
    };

    SessionOut {
        session_id: session.id,
        user_name: session.user_name.clone(),
        created_at: session.created_at,
        phase: game.phase.name(),
        difficulty: game.run.difficulty,
        current_level: game.run.current_level,
        total_levels: game.run.total_levels(),
        score: game.run.score,
        correct_count: game.run.correct_count,
        total_attempts: game.run.total_attempts,
        accuracy: game.run.accuracy(),
        retry_pending: session.retry_pending(),
        question,
        feedback,
        summary,
        notice: notice(effects),
    }
}

fn notice(effects: &[Effect]) -> Option<String> {
    effects.iter().find_map(|e| match e {
        Effect::Rejected { reason } => Some((*reason).to_string()),
        Effect::Halted { reason: HaltReason::EmptyLadder } => Some("no poems available for this difficulty".into()),
        Effect::Halted { reason: HaltReason::InvalidPoemData { level } } => {
            Some(format!("poem data for level {level} is unusable"))
        }
        _ => None,
    })
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
pub struct DifficultyQuery {
    pub difficulty: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StartIn {
    #[serde(default)]
    pub difficulty: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SelectIn {
    pub line: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackIn {
    /// Defaults to the session's guest name.
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub user_contact: String,
    pub user_feedback: String,
}

#[derive(Debug, Serialize)]
pub struct PoemsOut {
    pub difficulty: String,
    pub poems: Vec<PoemSummaryOut>,
}

/// Listing entry; the text itself stays server-side so the answers are not exposed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoemSummaryOut {
    pub id: u32,
    pub title: String,
    pub author: String,
    pub dynasty: String,
    pub theme: String,
    pub line_count: usize,
}

impl From<&Poem> for PoemSummaryOut {
    fn from(p: &Poem) -> Self {
        Self {
            id: p.id,
            title: p.title.clone(),
            author: p.author.clone(),
            dynasty: p.dynasty.clone(),
            theme: p.theme.clone(),
            line_count: p.content.len(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardOut {
    pub difficulty: Difficulty,
    /// Display name of the tier (初级, 中级, 高级).
    pub difficulty_label: &'static str,
    pub entries: Vec<LeaderboardEntry>,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}
