//! Submission and AnswerSegment (`spec.md` §3, §4.6).

use crate::ids::{ExamId, QuestionId, SubmissionId, TenantId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    /// `spec.md` §8 invariant 6: `completed`/`failed` are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Valid direct transitions per the state machine in `spec.md` §4.6.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ProcessingStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrPageResult {
    pub page_index: u32,
    pub text: String,
    /// Opaque object-storage key for the source image (`spec.md` §6).
    pub image_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerSegment {
    pub submission_id: SubmissionId,
    pub question_id: QuestionId,
    pub text: String,
    pub diagram_image_keys: Vec<String>,
    pub source_pages: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub tenant_id: TenantId,
    pub exam_id: ExamId,
    pub processing_status: ProcessingStatus,
    pub ocr_results: Vec<OcrPageResult>,
    pub answer_segments: Vec<AnswerSegment>,
    /// Populated only when `processing_status == Failed`; a short reason,
    /// per `spec.md` §7's "user-visible failure appears only at submission
    /// status failed with a short reason".
    pub failure_reason: Option<String>,
}

impl Submission {
    pub fn new(tenant_id: TenantId, exam_id: ExamId) -> Self {
        Self {
            id: SubmissionId::new(),
            tenant_id,
            exam_id,
            processing_status: ProcessingStatus::Pending,
            ocr_results: Vec::new(),
            answer_segments: Vec::new(),
            failure_reason: None,
        }
    }
}
