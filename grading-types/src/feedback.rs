//! Teacher-override learning signal (`spec.md` §3, §4.7).

use crate::ids::{FeedbackEventId, QuestionId, SubmissionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Captured when a teacher overrides an AI score. Immutable once written
/// (`spec.md` §8 invariant 5) — there is deliberately no setter, only the
/// constructor below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub id: FeedbackEventId,
    pub submission_id: SubmissionId,
    pub question_id: QuestionId,
    pub ai_score: f64,
    pub teacher_score: f64,
    pub delta: f64,
    pub ai_reasoning: String,
    pub teacher_reason: String,
    pub actor_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl FeedbackEvent {
    pub fn new(
        submission_id: SubmissionId,
        question_id: QuestionId,
        ai_score: f64,
        teacher_score: f64,
        ai_reasoning: impl Into<String>,
        teacher_reason: impl Into<String>,
        actor_id: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: FeedbackEventId::new(),
            submission_id,
            question_id,
            ai_score,
            teacher_score,
            delta: teacher_score - ai_score,
            ai_reasoning: ai_reasoning.into(),
            teacher_reason: teacher_reason.into(),
            actor_id,
            created_at,
        }
    }
}
