//! Per-evaluator and aggregated grading results (`spec.md` §3, §4.4).

use crate::ids::{QuestionId, SubmissionId, UserId};
use serde::{Deserialize, Serialize};

/// One evaluator's verdict on one `AnswerSegment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingResult {
    pub evaluator_id: String,
    /// The evaluator's self-reported score. `spec.md` §4.4 step 2: the
    /// engine never trusts this — it recomputes via the rubric enforcer.
    pub suggested_score: f64,
    pub confidence: f64,
    pub reasoning: String,
    pub criteria_met: Vec<String>,
    pub mistakes_found: Vec<String>,
}

/// Aggregated output over N `GradingResult`s (`spec.md` §3, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiEvalResult {
    pub mean_score: f64,
    pub variance: f64,
    pub consensus_score: f64,
    pub confidence: f64,
    pub reasoning: String,
    pub should_escalate: bool,
    /// Per-evaluator canonical (enforcer-recomputed) scores, kept for
    /// audit/debugging — not part of `spec.md`'s literal `MultiEvalResult`
    /// shape but needed to explain `consensus_score` after the fact.
    pub evaluations: Vec<GradingResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeStatus {
    Pending,
    AutoGraded,
    NeedsReview,
    Overridden,
    Final,
}

/// Persisted score for (submission, question). Unique on
/// `(submission_id, question_id)` — enforced by the orchestrator's upsert,
/// not by this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalGrade {
    pub submission_id: SubmissionId,
    pub question_id: QuestionId,
    pub final_score: f64,
    pub max_score: i64,
    pub ai_score: Option<f64>,
    pub override_score: Option<f64>,
    pub confidence: f64,
    pub reasoning: String,
    pub status: GradeStatus,
    pub graded_by: Option<UserId>,
}

impl FinalGrade {
    /// `spec.md` §8 invariant 2: `0 <= final_score <= max_score`.
    pub fn is_score_in_bounds(&self) -> bool {
        self.final_score >= 0.0 && self.final_score <= self.max_score as f64
    }
}
