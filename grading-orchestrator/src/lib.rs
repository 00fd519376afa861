//! Pipeline orchestrator: the submission state machine, wired on top of the
//! worker pool and the consensus engine.
//!
//! ```text
//! pending --start--> processing --ocr_ok--> processing --grade_ok--> completed
//!    |                    |                      |
//!    |                    +--ocr_err--> failed   +--grade_err--> failed (partial grades retained)
//! ```
//!
//! The orchestrator enqueues the OCR job on submission creation; on OCR
//! completion it enqueues one grading job per answer segment, so questions
//! within a submission grade in parallel. A failed question is retried in
//! place (see `retry`) without blocking its siblings; `completed` is set
//! only once every question in the exam has a persisted grade.

pub mod ocr;
pub mod retry;
pub mod segment;
pub mod store;

use async_trait::async_trait;
use grading_engine::ConsensusEngine;
use grading_scheduler::{Job, JobError, SubmitError, WorkerPool};
use grading_types::{
    AnswerSegment, ExamId, GradingError, ProcessingStatus, QuestionId, Submission, SubmissionId,
    TenantId,
};
use ocr::OcrProvider;
use retry::RetryPolicy;
use segment::Segmenter;
use std::sync::Arc;
use store::{SharedExamStore, SharedGradeStore, SharedSubmissionStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct Inner {
    pool: WorkerPool,
    engine: ConsensusEngine,
    submissions: SharedSubmissionStore,
    grades: SharedGradeStore,
    exams: SharedExamStore,
    ocr: Arc<dyn OcrProvider>,
    segmenter: Arc<dyn Segmenter>,
    retry: RetryPolicy,
}

/// Cheap to clone: every job spawned off the pool shares the same `Inner`.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        pool: WorkerPool,
        engine: ConsensusEngine,
        submissions: SharedSubmissionStore,
        grades: SharedGradeStore,
        exams: SharedExamStore,
        ocr: Arc<dyn OcrProvider>,
        segmenter: Arc<dyn Segmenter>,
    ) -> Self {
        Self::with_retry_policy(
            pool,
            engine,
            submissions,
            grades,
            exams,
            ocr,
            segmenter,
            RetryPolicy::default(),
        )
    }

    pub fn with_retry_policy(
        pool: WorkerPool,
        engine: ConsensusEngine,
        submissions: SharedSubmissionStore,
        grades: SharedGradeStore,
        exams: SharedExamStore,
        ocr: Arc<dyn OcrProvider>,
        segmenter: Arc<dyn Segmenter>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                pool,
                engine,
                submissions,
                grades,
                exams,
                ocr,
                segmenter,
                retry,
            }),
        }
    }

    pub fn start(&self) {
        self.inner.pool.start();
    }

    pub async fn stop(&self) {
        self.inner.pool.stop().await;
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.pool.cancellation_token()
    }

    /// Creates a submission in `pending` and enqueues its OCR job. Returns
    /// the new submission id immediately — the pipeline runs on the worker
    /// pool from here on.
    pub async fn submit(
        &self,
        tenant_id: TenantId,
        exam_id: ExamId,
        page_image_keys: Vec<String>,
    ) -> Result<SubmissionId, GradingError> {
        let submission = Submission::new(tenant_id, exam_id);
        let submission_id = submission.id;
        self.inner.submissions.create(submission).await?;

        let job = OcrJob {
            inner: Arc::clone(&self.inner),
            submission_id,
            page_image_keys,
        };
        self.inner
            .pool
            .submit(Box::new(job))
            .await
            .map_err(|SubmitError::Closed| {
                GradingError::dependency(SubmitClosed { submission_id })
            })?;

        Ok(submission_id)
    }

    /// Re-enqueues submissions a prior process left stuck in `processing` —
    /// the recovery path for a worker cancelled mid-job.
    pub async fn recover_stuck(&self) -> Result<usize, GradingError> {
        let stuck = self.inner.submissions.stuck_processing().await?;
        let count = stuck.len();
        for submission in stuck {
            warn!(submission_id = %submission.id, "re-enqueuing stuck submission");
            if submission.answer_segments.is_empty() {
                let job = OcrJob {
                    inner: Arc::clone(&self.inner),
                    submission_id: submission.id,
                    page_image_keys: submission
                        .ocr_results
                        .iter()
                        .map(|p| p.image_key.clone())
                        .collect(),
                };
                let _ = self.inner.pool.submit(Box::new(job)).await;
            } else {
                for segment in submission.answer_segments {
                    let job = GradingJob {
                        inner: Arc::clone(&self.inner),
                        submission_id: submission.id,
                        question_id: segment.question_id,
                        segment,
                    };
                    let _ = self.inner.pool.submit(Box::new(job)).await;
                }
            }
        }
        Ok(count)
    }
}

#[derive(Debug)]
struct SubmitClosed {
    submission_id: SubmissionId,
}

impl std::fmt::Display for SubmitClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "worker pool closed, could not enqueue {}",
            self.submission_id
        )
    }
}

impl std::error::Error for SubmitClosed {}

struct OcrJob {
    inner: Arc<Inner>,
    submission_id: SubmissionId,
    page_image_keys: Vec<String>,
}

#[async_trait]
impl Job for OcrJob {
    fn id(&self) -> String {
        format!("ocr-{}", self.submission_id)
    }

    async fn execute(&self, cancel: CancellationToken) -> Result<(), JobError> {
        run_ocr(
            Arc::clone(&self.inner),
            self.submission_id,
            &self.page_image_keys,
            cancel,
        )
        .await
        .map_err(|err| JobError::from_source(self.id(), err))
    }
}

struct GradingJob {
    inner: Arc<Inner>,
    submission_id: SubmissionId,
    question_id: QuestionId,
    segment: AnswerSegment,
}

#[async_trait]
impl Job for GradingJob {
    fn id(&self) -> String {
        format!("grading-{}-{}", self.submission_id, self.question_id)
    }

    async fn execute(&self, cancel: CancellationToken) -> Result<(), JobError> {
        run_grading(
            Arc::clone(&self.inner),
            self.submission_id,
            self.question_id,
            &self.segment,
            cancel,
        )
        .await
        .map_err(|err| JobError::from_source(self.id(), err))
    }
}

async fn run_ocr(
    inner: Arc<Inner>,
    submission_id: SubmissionId,
    page_image_keys: &[String],
    cancel: CancellationToken,
) -> Result<(), GradingError> {
    inner
        .submissions
        .update_status(submission_id, ProcessingStatus::Processing, None)
        .await?;

    let ocr_result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GradingError::Cancelled),
        result = inner.ocr.recognize(page_image_keys) => result,
    };

    let ocr_results = match ocr_result {
        Ok(results) => results,
        Err(err) => {
            error!(submission_id = %submission_id, error = %err, "ocr failed");
            inner
                .submissions
                .update_status(submission_id, ProcessingStatus::Failed, Some(err.to_string()))
                .await?;
            return Err(err);
        }
    };

    let submission = inner.submissions.get(submission_id).await?;
    let exam = inner.exams.get(submission.exam_id).await?;
    let segments = inner.segmenter.segment(submission_id, &exam, &ocr_results);

    inner
        .submissions
        .save_ocr_results(submission_id, ocr_results, segments.clone())
        .await?;

    info!(
        submission_id = %submission_id,
        num_segments = segments.len(),
        "ocr complete, enqueueing grading jobs"
    );

    for segment in segments {
        let job = GradingJob {
            inner: Arc::clone(&inner),
            submission_id,
            question_id: segment.question_id,
            segment,
        };
        if let Err(SubmitError::Closed) = inner.pool.submit(Box::new(job)).await {
            warn!(submission_id = %submission_id, "pool closed before all grading jobs could be enqueued");
            break;
        }
    }

    Ok(())
}

async fn run_grading(
    inner: Arc<Inner>,
    submission_id: SubmissionId,
    question_id: QuestionId,
    segment: &AnswerSegment,
    cancel: CancellationToken,
) -> Result<(), GradingError> {
    let mut last_error = None;
    let attempts = inner.retry.max_retries() + 1;

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = inner
                .retry
                .delay_for_attempt(attempt - 1)
                .expect("attempt bounded by max_retries");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GradingError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        match try_grade_once(&inner, submission_id, question_id, segment, cancel.clone()).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                warn!(
                    submission_id = %submission_id,
                    question_id = %question_id,
                    attempt,
                    error = %err,
                    "grading attempt failed"
                );
                last_error = Some(err);
            }
        }
    }

    let err = last_error.expect("loop runs at least once");
    error!(
        submission_id = %submission_id,
        question_id = %question_id,
        error = %err,
        "grading retries exhausted, failing submission"
    );
    inner
        .submissions
        .update_status(
            submission_id,
            ProcessingStatus::Failed,
            Some(format!("question {question_id}: {err}")),
        )
        .await?;
    Err(err)
}

async fn try_grade_once(
    inner: &Inner,
    submission_id: SubmissionId,
    question_id: QuestionId,
    segment: &AnswerSegment,
    cancel: CancellationToken,
) -> Result<(), GradingError> {
    let submission = inner.submissions.get(submission_id).await?;
    let exam = inner.exams.get(submission.exam_id).await?;
    let question = exam
        .question(question_id)
        .ok_or_else(|| GradingError::not_found(format!("question {question_id}")))?;

    let (grade, _multi_eval) = inner
        .engine
        .grade_answer(question, &exam.subject, segment, cancel)
        .await?;

    inner.grades.upsert(grade).await?;
    maybe_complete(inner, submission_id).await?;
    Ok(())
}

/// Transitions the submission to `completed` once every question in its
/// exam has a persisted grade. A no-op if the submission is already
/// terminal — concurrent per-question jobs racing to finish last is
/// expected, not an error.
async fn maybe_complete(inner: &Inner, submission_id: SubmissionId) -> Result<(), GradingError> {
    let submission = inner.submissions.get(submission_id).await?;
    if submission.processing_status.is_terminal() {
        return Ok(());
    }

    let exam = inner.exams.get(submission.exam_id).await?;
    let existing = inner.grades.list_for_submission(submission_id).await?;
    let graded: std::collections::HashSet<QuestionId> =
        existing.iter().map(|g| g.question_id).collect();

    let all_graded = exam.questions.iter().all(|q| graded.contains(&q.id));
    if all_graded {
        info!(submission_id = %submission_id, "all questions graded, completing submission");
        inner
            .submissions
            .update_status(submission_id, ProcessingStatus::Completed, None)
            .await?;
    }
    Ok(())
}
