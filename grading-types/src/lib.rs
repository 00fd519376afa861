//! Shared data model and error taxonomy for the exam grading core.
//!
//! Every other crate in this workspace depends on this one; it has no
//! dependencies on its siblings.

pub mod audit;
pub mod error;
pub mod exam;
pub mod feedback;
pub mod grading;
pub mod ids;
pub mod rubric;
pub mod submission;

pub use audit::AuditLog;
pub use error::{GradingError, Result};
pub use exam::{AnswerType, Exam, Question};
pub use feedback::FeedbackEvent;
pub use grading::{FinalGrade, GradeStatus, GradingResult, MultiEvalResult};
pub use ids::{
    AuditLogId, ExamId, FeedbackEventId, QuestionId, SubmissionId, TenantId, UserId,
};
pub use rubric::{Criterion, Mistake, Rubric, RubricWarning, Rule};
pub use submission::{AnswerSegment, OcrPageResult, ProcessingStatus, Submission};
