//! Feedback / learning loop (`spec.md` §4.7).
//!
//! Captures a teacher's override of an AI score as an immutable
//! `FeedbackEvent`, mines accumulated overrides for a question into a
//! pattern analysis, and (gated, non-destructively) folds the analysis'
//! recommendation into the rubric's `grading_notes`. True semantic rubric
//! edits — changing criteria or points — are deferred to human review,
//! per `spec.md` §4.7; this loop only ever appends text.

use async_trait::async_trait;
use chrono::Utc;
use grading_audit::AuditWriter;
use grading_llm::{AnalysisRequest, AnalysisResult, FeedbackRequest, LlmAdapter};
use grading_types::{
    FeedbackEvent, FinalGrade, GradeStatus, GradingError, QuestionId, Result, Rubric,
    SubmissionId, UserId,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Persistence boundary for immutable override records. A real backend is
/// Postgres (out of scope); this crate ships only the in-memory reference
/// implementation below.
#[async_trait]
pub trait FeedbackEventStore: Send + Sync {
    async fn append(&self, event: FeedbackEvent) -> Result<()>;

    async fn list_for_question(&self, question_id: QuestionId) -> Result<Vec<FeedbackEvent>>;
}

/// The narrow slice of `FinalGrade` persistence the loop needs: read the
/// current grade to capture `ai_score`, then flip it to `overridden`.
#[async_trait]
pub trait GradeOverrideStore: Send + Sync {
    async fn get(
        &self,
        submission_id: SubmissionId,
        question_id: QuestionId,
    ) -> Result<Option<FinalGrade>>;

    async fn apply_override(
        &self,
        submission_id: SubmissionId,
        question_id: QuestionId,
        override_score: f64,
        actor: UserId,
    ) -> Result<FinalGrade>;
}

/// The narrow slice of rubric persistence the loop needs: read the rubric
/// for a question, and append (never overwrite) a grading note.
#[async_trait]
pub trait RubricStore: Send + Sync {
    async fn get_rubric(&self, question_id: QuestionId) -> Result<Rubric>;

    async fn append_grading_note(&self, question_id: QuestionId, note: String) -> Result<()>;
}

pub struct FeedbackLoop {
    adapter: Arc<dyn LlmAdapter>,
    events: Arc<dyn FeedbackEventStore>,
    grades: Arc<dyn GradeOverrideStore>,
    rubrics: Arc<dyn RubricStore>,
    audit: Option<Arc<AuditWriter>>,
}

impl FeedbackLoop {
    pub fn new(
        adapter: Arc<dyn LlmAdapter>,
        events: Arc<dyn FeedbackEventStore>,
        grades: Arc<dyn GradeOverrideStore>,
        rubrics: Arc<dyn RubricStore>,
    ) -> Self {
        Self {
            adapter,
            events,
            grades,
            rubrics,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditWriter>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// **Override capture** (`spec.md` §4.7): load the current `FinalGrade`,
    /// compute `delta`, write the immutable `FeedbackEvent`, then flip the
    /// grade to `overridden`.
    pub async fn capture_override(
        &self,
        submission_id: SubmissionId,
        question_id: QuestionId,
        teacher_score: f64,
        teacher_reason: impl Into<String>,
        actor: UserId,
    ) -> Result<FeedbackEvent> {
        let teacher_reason = teacher_reason.into();
        let current = self
            .grades
            .get(submission_id, question_id)
            .await?
            .ok_or_else(|| {
                GradingError::not_found(format!(
                    "final grade for submission {submission_id} question {question_id}"
                ))
            })?;

        let ai_score = current.ai_score.unwrap_or(current.final_score);
        let event = FeedbackEvent::new(
            submission_id,
            question_id,
            ai_score,
            teacher_score,
            current.reasoning.clone(),
            teacher_reason,
            actor,
            Utc::now(),
        );
        self.events.append(event.clone()).await?;

        let updated = self
            .grades
            .apply_override(submission_id, question_id, teacher_score, actor)
            .await?;
        debug_assert_eq!(updated.status, GradeStatus::Overridden);

        if let Some(audit) = &self.audit {
            audit
                .record_best_effort(
                    "final_grade",
                    question_id.0,
                    "overridden",
                    Some(actor.0),
                    serde_json::json!({
                        "submission_id": submission_id.0,
                        "ai_score": ai_score,
                        "teacher_score": teacher_score,
                        "delta": event.delta,
                    }),
                )
                .await;
        }

        info!(
            submission_id = %submission_id,
            question_id = %question_id,
            delta = event.delta,
            "teacher override captured"
        );
        Ok(event)
    }

    /// Generate student-facing feedback for a persisted grade from its
    /// history of overrides (`spec.md` §4.3 `GenerateFeedback`).
    pub async fn generate_feedback(
        &self,
        grade: FinalGrade,
        submission_id: SubmissionId,
        question_id: QuestionId,
    ) -> Result<String> {
        let history = self.events.list_for_question(question_id).await?;
        let history: Vec<FeedbackEvent> = history
            .into_iter()
            .filter(|e| e.submission_id == submission_id)
            .collect();
        self.adapter
            .generate_feedback(FeedbackRequest { grade, history })
            .await
            .map_err(GradingError::dependency)
    }

    /// **Pattern analysis** (`spec.md` §4.7): requires at least one
    /// `FeedbackEvent` — no hallucinated analysis on empty input.
    pub async fn analyze_patterns(&self, question_id: QuestionId) -> Result<AnalysisResult> {
        let events = self.events.list_for_question(question_id).await?;
        if events.is_empty() {
            return Err(GradingError::validation(format!(
                "no feedback events recorded for question {question_id}"
            )));
        }
        let rubric = self.rubrics.get_rubric(question_id).await?;
        self.adapter
            .analyze_patterns(AnalysisRequest { rubric, events })
            .await
            .map_err(GradingError::dependency)
    }

    /// **Rubric adaptation** (`spec.md` §4.7): a gated operation. Appends
    /// the analysis' recommendation to `grading_notes` as a timestamped,
    /// attributable line, never overwriting prior notes — repeated calls
    /// accumulate, they never erase (`SPEC_FULL.md` §4.7; the original
    /// implementation's single-shot overwrite would lose history on a
    /// second call).
    pub async fn adapt_rubric(&self, question_id: QuestionId) -> Result<Option<String>> {
        let analysis = self.analyze_patterns(question_id).await?;
        if analysis.recommendation.trim().is_empty() {
            warn!(question_id = %question_id, "pattern analysis produced no recommendation, rubric left untouched");
            return Ok(None);
        }

        let note = format!(
            "[adopted {}] {}",
            Utc::now().format("%Y-%m-%d"),
            analysis.recommendation
        );
        self.rubrics
            .append_grading_note(question_id, note.clone())
            .await?;

        if let Some(audit) = &self.audit {
            audit
                .record_best_effort(
                    "rubric",
                    question_id.0,
                    "adapted",
                    None,
                    serde_json::json!({ "note": note }),
                )
                .await;
        }

        info!(question_id = %question_id, "rubric adaptation note appended");
        Ok(Some(note))
    }
}

/// Reference `FeedbackEventStore`. Good enough for tests and the CLI demo.
#[derive(Default)]
pub struct InMemoryFeedbackEventStore {
    events: parking_lot::Mutex<Vec<FeedbackEvent>>,
}

impl InMemoryFeedbackEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeedbackEventStore for InMemoryFeedbackEventStore {
    async fn append(&self, event: FeedbackEvent) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }

    async fn list_for_question(&self, question_id: QuestionId) -> Result<Vec<FeedbackEvent>> {
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|e| e.question_id == question_id)
            .cloned()
            .collect())
    }
}

/// Reference `GradeOverrideStore`, keyed the same way as the orchestrator's
/// `GradeStore`: `(submission_id, question_id)`.
#[derive(Default)]
pub struct InMemoryGradeOverrideStore {
    grades: parking_lot::Mutex<HashMap<(SubmissionId, QuestionId), FinalGrade>>,
}

impl InMemoryGradeOverrideStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, grade: FinalGrade) {
        self.grades
            .lock()
            .insert((grade.submission_id, grade.question_id), grade);
    }
}

#[async_trait]
impl GradeOverrideStore for InMemoryGradeOverrideStore {
    async fn get(
        &self,
        submission_id: SubmissionId,
        question_id: QuestionId,
    ) -> Result<Option<FinalGrade>> {
        Ok(self
            .grades
            .lock()
            .get(&(submission_id, question_id))
            .cloned())
    }

    async fn apply_override(
        &self,
        submission_id: SubmissionId,
        question_id: QuestionId,
        override_score: f64,
        actor: UserId,
    ) -> Result<FinalGrade> {
        let mut grades = self.grades.lock();
        let grade = grades
            .get_mut(&(submission_id, question_id))
            .ok_or_else(|| {
                GradingError::not_found(format!(
                    "final grade for submission {submission_id} question {question_id}"
                ))
            })?;
        grade.override_score = Some(override_score);
        grade.final_score = override_score;
        grade.status = GradeStatus::Overridden;
        grade.graded_by = Some(actor);
        Ok(grade.clone())
    }
}

/// Reference `RubricStore`. Seeded directly in tests with the rubric owned
/// by a `Question`; a real implementation would delegate to the same store
/// backing `ExamStore`.
#[derive(Default)]
pub struct InMemoryRubricStore {
    rubrics: parking_lot::Mutex<HashMap<QuestionId, Rubric>>,
}

impl InMemoryRubricStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, question_id: QuestionId, rubric: Rubric) {
        self.rubrics.lock().insert(question_id, rubric);
    }
}

#[async_trait]
impl RubricStore for InMemoryRubricStore {
    async fn get_rubric(&self, question_id: QuestionId) -> Result<Rubric> {
        self.rubrics
            .lock()
            .get(&question_id)
            .cloned()
            .ok_or_else(|| GradingError::not_found(format!("rubric for question {question_id}")))
    }

    async fn append_grading_note(&self, question_id: QuestionId, note: String) -> Result<()> {
        let mut rubrics = self.rubrics.lock();
        let rubric = rubrics
            .get_mut(&question_id)
            .ok_or_else(|| GradingError::not_found(format!("rubric for question {question_id}")))?;
        if !rubric.grading_notes.is_empty() {
            rubric.grading_notes.push('\n');
        }
        rubric.grading_notes.push_str(&note);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grading_llm::MockLlmAdapter;
    use grading_types::{Criterion, QuestionId as Qid};

    fn rubric() -> Rubric {
        Rubric {
            full_credit_criteria: vec![Criterion {
                id: "c1".to_string(),
                description: String::new(),
                points: 10.0,
                required: true,
                category: "content".to_string(),
            }],
            partial_credit_rules: vec![],
            common_mistakes: vec![],
            key_concepts: vec![],
            grading_notes: String::new(),
            strict_mode: false,
        }
    }

    fn final_grade(submission_id: SubmissionId, question_id: Qid) -> FinalGrade {
        FinalGrade {
            submission_id,
            question_id,
            final_score: 7.0,
            max_score: 10,
            ai_score: Some(7.0),
            override_score: None,
            confidence: 0.8,
            reasoning: "partial credit".to_string(),
            status: GradeStatus::AutoGraded,
            graded_by: None,
        }
    }

    fn build_loop(adapter: MockLlmAdapter) -> (FeedbackLoop, Arc<InMemoryGradeOverrideStore>, Arc<InMemoryRubricStore>) {
        let events: Arc<dyn FeedbackEventStore> = Arc::new(InMemoryFeedbackEventStore::new());
        let grades = Arc::new(InMemoryGradeOverrideStore::new());
        let rubrics = Arc::new(InMemoryRubricStore::new());
        let feedback_loop = FeedbackLoop::new(
            Arc::new(adapter),
            events,
            grades.clone() as Arc<dyn GradeOverrideStore>,
            rubrics.clone() as Arc<dyn RubricStore>,
        );
        (feedback_loop, grades, rubrics)
    }

    #[tokio::test]
    async fn capture_override_computes_delta_and_flips_status() {
        let (feedback_loop, grades, _rubrics) = build_loop(MockLlmAdapter::new());
        let submission_id = SubmissionId::new();
        let question_id = Qid::new();
        grades.seed(final_grade(submission_id, question_id));

        let actor = UserId::new();
        let event = feedback_loop
            .capture_override(submission_id, question_id, 9.0, "missed a valid proof step", actor)
            .await
            .unwrap();

        assert_eq!(event.ai_score, 7.0);
        assert_eq!(event.teacher_score, 9.0);
        assert_eq!(event.delta, 2.0);

        let updated = grades.get(submission_id, question_id).await.unwrap().unwrap();
        assert_eq!(updated.status, GradeStatus::Overridden);
        assert_eq!(updated.override_score, Some(9.0));
        assert_eq!(updated.graded_by, Some(actor));
    }

    #[tokio::test]
    async fn analyze_patterns_rejects_empty_history() {
        let (feedback_loop, _grades, rubrics) = build_loop(MockLlmAdapter::new());
        let question_id = Qid::new();
        rubrics.seed(question_id, rubric());

        let result = feedback_loop.analyze_patterns(question_id).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn adapt_rubric_appends_without_overwriting_prior_notes() {
        let analysis = AnalysisResult {
            patterns: vec!["students skip units".to_string()],
            common_reasons: vec!["partial credit underused".to_string()],
            recommendation: "award partial credit when units are omitted but magnitude is correct".to_string(),
        };
        let adapter = MockLlmAdapter::new().with_analysis(analysis);
        let (feedback_loop, grades, rubrics) = build_loop(adapter);

        let submission_id = SubmissionId::new();
        let question_id = Qid::new();
        grades.seed(final_grade(submission_id, question_id));
        let mut seeded_rubric = rubric();
        seeded_rubric.grading_notes = "initial note".to_string();
        rubrics.seed(question_id, seeded_rubric);

        feedback_loop
            .capture_override(submission_id, question_id, 9.0, "reason", UserId::new())
            .await
            .unwrap();

        feedback_loop.adapt_rubric(question_id).await.unwrap();
        feedback_loop.adapt_rubric(question_id).await.unwrap();

        let final_rubric = rubrics.get_rubric(question_id).await.unwrap();
        assert!(final_rubric.grading_notes.starts_with("initial note"));
        assert_eq!(final_rubric.grading_notes.matches("adopted").count(), 2);
    }

    #[tokio::test]
    async fn capture_override_fails_cleanly_when_no_grade_exists() {
        let (feedback_loop, _grades, _rubrics) = build_loop(MockLlmAdapter::new());
        let result = feedback_loop
            .capture_override(SubmissionId::new(), Qid::new(), 5.0, "reason", UserId::new())
            .await;
        assert!(matches!(result, Err(GradingError::NotFound(_))));
    }
}
