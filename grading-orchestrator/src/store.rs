//! Narrow persistence boundary the orchestrator depends on.
//!
//! Real Postgres/object-storage backends are out of scope; these traits
//! exist so the orchestrator never couples to a concrete store, and the
//! in-memory implementations below are the only ones this crate ships
//! (tests and the CLI demo).

use async_trait::async_trait;
use grading_types::{
    AnswerSegment, Exam, ExamId, FinalGrade, GradingError, OcrPageResult, ProcessingStatus,
    QuestionId, Submission, SubmissionId,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn create(&self, submission: Submission) -> Result<(), GradingError>;

    async fn get(&self, id: SubmissionId) -> Result<Submission, GradingError>;

    async fn update_status(
        &self,
        id: SubmissionId,
        status: ProcessingStatus,
        failure_reason: Option<String>,
    ) -> Result<(), GradingError>;

    async fn save_ocr_results(
        &self,
        id: SubmissionId,
        ocr_results: Vec<OcrPageResult>,
        answer_segments: Vec<AnswerSegment>,
    ) -> Result<(), GradingError>;

    /// Submissions stuck in `processing` — the query a restart uses to
    /// detect work abandoned by a cancelled worker and re-enqueue it.
    async fn stuck_processing(&self) -> Result<Vec<Submission>, GradingError>;
}

#[async_trait]
pub trait GradeStore: Send + Sync {
    /// Upsert on `(submission_id, question_id)`.
    async fn upsert(&self, grade: FinalGrade) -> Result<(), GradingError>;

    async fn get(
        &self,
        submission_id: SubmissionId,
        question_id: QuestionId,
    ) -> Result<Option<FinalGrade>, GradingError>;

    async fn list_for_submission(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Vec<FinalGrade>, GradingError>;
}

#[async_trait]
pub trait ExamStore: Send + Sync {
    async fn get(&self, id: ExamId) -> Result<Exam, GradingError>;

    async fn put(&self, exam: Exam) -> Result<(), GradingError>;
}

/// Reference `SubmissionStore`. Good enough for tests and the CLI demo;
/// never intended to back a real deployment.
#[derive(Default)]
pub struct InMemorySubmissionStore {
    submissions: Mutex<HashMap<SubmissionId, Submission>>,
}

impl InMemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubmissionStore for InMemorySubmissionStore {
    async fn create(&self, submission: Submission) -> Result<(), GradingError> {
        self.submissions.lock().insert(submission.id, submission);
        Ok(())
    }

    async fn get(&self, id: SubmissionId) -> Result<Submission, GradingError> {
        self.submissions
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| GradingError::not_found(format!("submission {id}")))
    }

    async fn update_status(
        &self,
        id: SubmissionId,
        status: ProcessingStatus,
        failure_reason: Option<String>,
    ) -> Result<(), GradingError> {
        let mut submissions = self.submissions.lock();
        let submission = submissions
            .get_mut(&id)
            .ok_or_else(|| GradingError::not_found(format!("submission {id}")))?;
        submission.processing_status = status;
        if status == ProcessingStatus::Failed {
            submission.failure_reason = failure_reason;
        }
        Ok(())
    }

    async fn save_ocr_results(
        &self,
        id: SubmissionId,
        ocr_results: Vec<OcrPageResult>,
        answer_segments: Vec<AnswerSegment>,
    ) -> Result<(), GradingError> {
        let mut submissions = self.submissions.lock();
        let submission = submissions
            .get_mut(&id)
            .ok_or_else(|| GradingError::not_found(format!("submission {id}")))?;
        submission.ocr_results = ocr_results;
        submission.answer_segments = answer_segments;
        Ok(())
    }

    async fn stuck_processing(&self) -> Result<Vec<Submission>, GradingError> {
        Ok(self
            .submissions
            .lock()
            .values()
            .filter(|s| s.processing_status == ProcessingStatus::Processing)
            .cloned()
            .collect())
    }
}

/// Reference `GradeStore`, keyed on `(submission_id, question_id)`.
#[derive(Default)]
pub struct InMemoryGradeStore {
    grades: Mutex<HashMap<(SubmissionId, QuestionId), FinalGrade>>,
}

impl InMemoryGradeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GradeStore for InMemoryGradeStore {
    async fn upsert(&self, grade: FinalGrade) -> Result<(), GradingError> {
        self.grades
            .lock()
            .insert((grade.submission_id, grade.question_id), grade);
        Ok(())
    }

    async fn get(
        &self,
        submission_id: SubmissionId,
        question_id: QuestionId,
    ) -> Result<Option<FinalGrade>, GradingError> {
        Ok(self
            .grades
            .lock()
            .get(&(submission_id, question_id))
            .cloned())
    }

    async fn list_for_submission(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Vec<FinalGrade>, GradingError> {
        Ok(self
            .grades
            .lock()
            .values()
            .filter(|g| g.submission_id == submission_id)
            .cloned()
            .collect())
    }
}

/// Reference `ExamStore`.
#[derive(Default)]
pub struct InMemoryExamStore {
    exams: Mutex<HashMap<ExamId, Exam>>,
}

impl InMemoryExamStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExamStore for InMemoryExamStore {
    async fn get(&self, id: ExamId) -> Result<Exam, GradingError> {
        self.exams
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| GradingError::not_found(format!("exam {id}")))
    }

    async fn put(&self, exam: Exam) -> Result<(), GradingError> {
        self.exams.lock().insert(exam.id, exam);
        Ok(())
    }
}

pub type SharedSubmissionStore = Arc<dyn SubmissionStore>;
pub type SharedGradeStore = Arc<dyn GradeStore>;
pub type SharedExamStore = Arc<dyn ExamStore>;
