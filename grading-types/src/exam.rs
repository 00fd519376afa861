//! Exam and Question (`spec.md` §3).

use crate::ids::{ExamId, QuestionId, TenantId};
use crate::rubric::Rubric;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerType {
    ShortAnswer,
    Essay,
    Mcq,
    Diagram,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub exam_id: ExamId,
    pub text: String,
    /// Authoritative max score for this question. `spec.md` §9 Open Question
    /// (a): this is the single source of truth for `K`, never re-derived.
    pub max_score: i64,
    pub answer_type: AnswerType,
    pub rubric: Rubric,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exam {
    pub id: ExamId,
    pub tenant_id: TenantId,
    pub name: String,
    /// Subject name, looked up against the subject registry
    /// (`grading-registry`) to contribute a prompt-bias fragment
    /// (`spec.md` §4.1). Not named in `spec.md` §3's Exam shape but required
    /// by the `(answer, rubric, question, subject)` tuple §4.4 grades — the
    /// natural owner is the Exam, since a Question doesn't otherwise carry
    /// one. Recorded as a supplement in DESIGN.md.
    pub subject: String,
    pub questions: Vec<Question>,
    /// Set by the orchestrator once any submission has been graded against
    /// this exam; the data layer itself does not enforce it (`spec.md` §3).
    pub questions_locked: bool,
}

impl Exam {
    pub fn question(&self, id: QuestionId) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }
}
