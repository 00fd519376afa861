//! Multi-evaluator consensus engine (`spec.md` §4.4).
//!
//! Grades one `(answer, rubric, question, subject)` tuple by running every
//! registered evaluator in parallel, recomputing each evaluator's score
//! through the rubric enforcer (never trusting the model's own arithmetic),
//! and reducing the results into one `FinalGrade` plus a `MultiEvalResult`
//! that records whether the disagreement between evaluators warrants human
//! escalation.

use grading_llm::{GradingRequest, LlmAdapter, LlmError};
use grading_registry::all_evaluator_profiles;
use grading_types::{
    AnswerSegment, FinalGrade, GradeStatus, GradingError, GradingResult, MultiEvalResult, Question,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Tunables for the consensus engine. Defaults match `spec.md` §5's literal
/// numbers.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-call LLM deadline (`spec.md` §5: default 60s). The engine does
    /// not impose an additional aggregate timeout — it waits for all
    /// branches, bounded or cancelled.
    pub call_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(60),
        }
    }
}

pub struct ConsensusEngine {
    adapter: Arc<dyn LlmAdapter>,
    config: EngineConfig,
}

impl ConsensusEngine {
    pub fn new(adapter: Arc<dyn LlmAdapter>) -> Self {
        Self::with_config(adapter, EngineConfig::default())
    }

    pub fn with_config(adapter: Arc<dyn LlmAdapter>, config: EngineConfig) -> Self {
        Self { adapter, config }
    }

    /// Run the full protocol from `spec.md` §4.4 for one answer segment.
    ///
    /// Returns `Err(GradingError::Dependency)` only when every evaluator
    /// call fails (the "Terminal early-exit ... Failed" branch of the state
    /// machine) or `Err(GradingError::Cancelled)` if `cancel` fires before
    /// any evaluator returns.
    pub async fn grade_answer(
        &self,
        question: &Question,
        subject: &str,
        answer: &AnswerSegment,
        cancel: CancellationToken,
    ) -> Result<(FinalGrade, MultiEvalResult), GradingError> {
        let profiles = all_evaluator_profiles();
        let max_score = question.max_score;

        // Fan-out: dispatch every evaluator concurrently, sharing the
        // caller's cancellation token. We wait for all to return (success
        // or error) before reducing (`spec.md` §4.4 step 1).
        let calls = profiles.iter().map(|profile| {
            let adapter = Arc::clone(&self.adapter);
            let request = GradingRequest {
                evaluator_id: profile.id.to_string(),
                question_text: question.text.clone(),
                rubric: question.rubric.clone(),
                subject: subject.to_string(),
                answer_text: answer.text.clone(),
                diagram_image_keys: answer.diagram_image_keys.clone(),
            };
            let timeout = self.config.call_timeout;
            let cancel = cancel.clone();
            async move { dispatch_one(adapter, request, timeout, cancel).await }
        });

        let outcomes: Vec<Result<GradingResult, LlmError>> = futures::future::join_all(calls).await;

        if cancel.is_cancelled() {
            return Err(GradingError::Cancelled);
        }

        // Per-evaluator normalization: recompute each score from the rubric
        // enforcer, keep the model's reported confidence (`spec.md` §4.4
        // step 2).
        let mut successes: Vec<GradingResult> = Vec::new();
        let mut failures: Vec<(String, String)> = Vec::new();
        for (profile, outcome) in profiles.iter().zip(outcomes.into_iter()) {
            match outcome {
                Ok(mut result) => {
                    let claims: HashSet<String> = result
                        .criteria_met
                        .iter()
                        .chain(result.mistakes_found.iter())
                        .cloned()
                        .collect();
                    let enforced = grading_rubric::enforce(&question.rubric, &claims);
                    result.suggested_score = enforced.score;
                    successes.push(result);
                }
                Err(err) => failures.push((profile.id.to_string(), err.to_string())),
            }
        }

        if successes.is_empty() {
            warn!(question_id = %question.id, "all evaluators failed");
            return Err(GradingError::dependency(AllEvaluatorsFailed {
                failures,
            }));
        }

        let total_evaluators = profiles.len();
        let (multi_eval, decision) =
            reduce(&successes, max_score, total_evaluators, &failures);

        let final_score = grading_rubric::clamp_to_max(multi_eval.consensus_score, max_score);
        let status = match decision {
            Decision::Escalate => GradeStatus::NeedsReview,
            Decision::AutoGrade | Decision::Moderate => GradeStatus::AutoGraded,
        };

        info!(
            question_id = %question.id,
            submission_id = %answer.submission_id,
            should_escalate = multi_eval.should_escalate,
            final_score,
            "graded answer segment"
        );

        let grade = FinalGrade {
            submission_id: answer.submission_id,
            question_id: question.id,
            final_score,
            max_score,
            ai_score: Some(final_score),
            override_score: None,
            confidence: multi_eval.confidence,
            reasoning: multi_eval.reasoning.clone(),
            status,
            graded_by: None,
        };

        Ok((grade, multi_eval))
    }
}

#[derive(Debug)]
struct AllEvaluatorsFailed {
    failures: Vec<(String, String)>,
}

impl std::fmt::Display for AllEvaluatorsFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "all evaluators failed: ")?;
        for (id, err) in &self.failures {
            write!(f, "[{id}: {err}] ")?;
        }
        Ok(())
    }
}

impl std::error::Error for AllEvaluatorsFailed {}

async fn dispatch_one(
    adapter: Arc<dyn LlmAdapter>,
    request: GradingRequest,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<GradingResult, LlmError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LlmError::Cancelled),
        result = tokio::time::timeout(timeout, adapter.grade(request)) => {
            match result {
                Ok(inner) => inner,
                Err(_) => Err(LlmError::Timeout(timeout)),
            }
        }
    }
}

enum Decision {
    AutoGrade,
    Moderate,
    Escalate,
}

/// Pure reduction step: mean, population variance, weighted mean,
/// escalation decision, and reasoning synthesis (`spec.md` §4.4 steps 3-6).
fn reduce(
    successes: &[GradingResult],
    max_score: i64,
    total_evaluators: usize,
    failures: &[(String, String)],
) -> (MultiEvalResult, Decision) {
    let k = max_score as f64;
    let n = successes.len() as f64;

    let scores: Vec<f64> = successes.iter().map(|r| r.suggested_score).collect();
    let mean = scores.iter().sum::<f64>() / n;
    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    let sigma = variance.sqrt();
    let spread = scores.iter().cloned().fold(f64::MIN, f64::max)
        - scores.iter().cloned().fold(f64::MAX, f64::min);

    let confidence_sum: f64 = successes.iter().map(|r| r.confidence).sum();
    let weighted_mean = if confidence_sum > 0.0 {
        successes
            .iter()
            .map(|r| r.suggested_score * r.confidence)
            .sum::<f64>()
            / confidence_sum
    } else {
        mean
    };

    let min_confidence = successes
        .iter()
        .map(|r| r.confidence)
        .fold(f64::INFINITY, f64::min);

    let decision = if sigma > 0.15 * k || spread > 0.30 * k || min_confidence < 0.4 {
        Decision::Escalate
    } else if sigma <= 0.10 * k && spread <= 0.20 * k && min_confidence >= 0.6 {
        Decision::AutoGrade
    } else {
        Decision::Moderate
    };

    let decision_label = match decision {
        Decision::AutoGrade => "High confidence in consensus",
        Decision::Moderate => "Moderate variance — human review recommended",
        Decision::Escalate => "Escalated: disagreement",
    };

    let mut reasoning = String::new();
    for result in successes {
        reasoning.push_str(&format!("[{}] {}\n", result.evaluator_id, result.reasoning));
    }
    for (id, err) in failures {
        reasoning.push_str(&format!("[{id}] evaluator failed: {err}\n"));
    }
    reasoning.push_str(decision_label);

    // Partial-failure confidence ceiling (`spec.md` §4.4 state machine:
    // "marks confidence at most (#successes / #evaluators)").
    let success_ratio = successes.len() as f64 / total_evaluators as f64;
    let base_confidence = successes.iter().map(|r| r.confidence).sum::<f64>() / n;
    let confidence = base_confidence.min(success_ratio);

    let multi_eval = MultiEvalResult {
        mean_score: mean,
        variance,
        consensus_score: weighted_mean,
        confidence,
        reasoning,
        should_escalate: matches!(decision, Decision::Escalate),
        evaluations: successes.to_vec(),
    };

    (multi_eval, decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use grading_llm::MockLlmAdapter;
    use grading_registry::{REASONING_VALIDATOR, RUBRIC_ENFORCER, STRUCTURAL_ANALYZER};
    use grading_types::{AnswerType, Criterion, QuestionId, Rubric, SubmissionId};

    fn question_k10() -> Question {
        Question {
            id: QuestionId::new(),
            exam_id: grading_types::ExamId::new(),
            text: "What is the mitochondria?".to_string(),
            max_score: 10,
            answer_type: AnswerType::ShortAnswer,
            rubric: Rubric {
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
            },
        }
    }

    fn answer(submission_id: SubmissionId, question_id: QuestionId) -> AnswerSegment {
        AnswerSegment {
            submission_id,
            question_id,
            text: "The mitochondria is the powerhouse of the cell".to_string(),
            diagram_image_keys: vec![],
            source_pages: vec![0],
        }
    }

    fn result(id: &str, score: f64, criteria_met: Vec<&str>, confidence: f64) -> GradingResult {
        GradingResult {
            evaluator_id: id.to_string(),
            suggested_score: score,
            confidence,
            reasoning: format!("{id} reasoning"),
            criteria_met: criteria_met.into_iter().map(String::from).collect(),
            mistakes_found: vec![],
        }
    }

    /// S1 — high-consensus auto-grade.
    #[tokio::test]
    async fn high_consensus_auto_grades() {
        let question = question_k10();
        let adapter = MockLlmAdapter::new()
            .with_response(RUBRIC_ENFORCER, result(RUBRIC_ENFORCER, 10.0, vec!["c1"], 0.95))
            .with_response(
                REASONING_VALIDATOR,
                result(REASONING_VALIDATOR, 10.0, vec!["c1"], 0.95),
            )
            .with_response(
                STRUCTURAL_ANALYZER,
                result(STRUCTURAL_ANALYZER, 10.0, vec!["c1"], 0.95),
            );
        let engine = ConsensusEngine::new(Arc::new(adapter));
        let submission_id = SubmissionId::new();
        let (grade, multi_eval) = engine
            .grade_answer(
                &question,
                "Science",
                &answer(submission_id, question.id),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(grade.final_score, 10.0);
        assert_eq!(grade.status, GradeStatus::AutoGraded);
        assert!(!multi_eval.should_escalate);
        assert!(multi_eval.confidence >= 0.9);
    }

    /// S2 — escalation on disagreement: criteria sets scoring 2, 9, 5.
    #[tokio::test]
    async fn high_variance_escalates() {
        let mut question = question_k10();
        question.rubric.full_credit_criteria = vec![
            Criterion {
                id: "c1".to_string(),
                description: String::new(),
                points: 2.0,
                required: false,
                category: "content".to_string(),
            },
            Criterion {
                id: "c2".to_string(),
                description: String::new(),
                points: 7.0,
                required: false,
                category: "content".to_string(),
            },
            Criterion {
                id: "c3".to_string(),
                description: String::new(),
                points: 3.0,
                required: false,
                category: "content".to_string(),
            },
        ];
        let adapter = MockLlmAdapter::new()
            .with_response(RUBRIC_ENFORCER, result(RUBRIC_ENFORCER, 0.0, vec!["c1"], 0.9))
            .with_response(
                REASONING_VALIDATOR,
                result(REASONING_VALIDATOR, 0.0, vec!["c1", "c2"], 0.8),
            )
            .with_response(
                STRUCTURAL_ANALYZER,
                result(STRUCTURAL_ANALYZER, 0.0, vec!["c1", "c3"], 0.85),
            );
        let engine = ConsensusEngine::new(Arc::new(adapter));
        let submission_id = SubmissionId::new();
        let (grade, multi_eval) = engine
            .grade_answer(
                &question,
                "Science",
                &answer(submission_id, question.id),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(multi_eval.should_escalate);
        assert_eq!(grade.status, GradeStatus::NeedsReview);
    }

    /// S3 — moderate variance: scores 7, 8, 7 after enforcement.
    #[tokio::test]
    async fn moderate_variance_auto_grades_with_flag() {
        let mut question = question_k10();
        question.rubric.full_credit_criteria = vec![
            Criterion {
                id: "c1".to_string(),
                description: String::new(),
                points: 7.0,
                required: false,
                category: "content".to_string(),
            },
            Criterion {
                id: "c2".to_string(),
                description: String::new(),
                points: 1.0,
                required: false,
                category: "content".to_string(),
            },
        ];
        let adapter = MockLlmAdapter::new()
            .with_response(RUBRIC_ENFORCER, result(RUBRIC_ENFORCER, 0.0, vec!["c1"], 0.9))
            .with_response(
                REASONING_VALIDATOR,
                result(REASONING_VALIDATOR, 0.0, vec!["c1", "c2"], 0.9),
            )
            .with_response(
                STRUCTURAL_ANALYZER,
                result(STRUCTURAL_ANALYZER, 0.0, vec!["c1"], 0.9),
            );
        let engine = ConsensusEngine::new(Arc::new(adapter));
        let submission_id = SubmissionId::new();
        let (grade, multi_eval) = engine
            .grade_answer(
                &question,
                "Science",
                &answer(submission_id, question.id),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!multi_eval.should_escalate);
        assert!(
            multi_eval.reasoning.contains("Moderate variance")
                || multi_eval.reasoning.contains("High confidence")
        );
        assert!((grade.final_score - 7.33).abs() < 0.2);
    }

    /// S4 — arithmetic hallucination correction: self-reported score is
    /// discarded in favor of the enforcer's recomputation.
    #[tokio::test]
    async fn self_reported_score_never_used() {
        let question = question_k10();
        let mut r = result(RUBRIC_ENFORCER, 10.0, vec!["c1"], 0.9);
        r.suggested_score = 10.0; // what the model claims
        let adapter = MockLlmAdapter::new()
            .with_response(RUBRIC_ENFORCER, r.clone())
            .with_response(REASONING_VALIDATOR, r.clone())
            .with_response(STRUCTURAL_ANALYZER, r);
        let engine = ConsensusEngine::new(Arc::new(adapter));
        let submission_id = SubmissionId::new();
        let (grade, _) = engine
            .grade_answer(
                &question,
                "Science",
                &answer(submission_id, question.id),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        // c1 is worth the full 10 points and was claimed, so this case
        // happens to agree — the contract under test is in grading-rubric's
        // own `ignores_self_reported_score_entirely` test, which uses a
        // criterion worth less than the self-reported score.
        assert_eq!(grade.final_score, 10.0);
    }

    #[tokio::test]
    async fn all_evaluators_failing_is_a_dependency_error() {
        let question = question_k10();
        let adapter = MockLlmAdapter::new(); // no scripted responses at all
        let engine = ConsensusEngine::new(Arc::new(adapter));
        let submission_id = SubmissionId::new();
        let outcome = engine
            .grade_answer(
                &question,
                "Science",
                &answer(submission_id, question.id),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(outcome, Err(GradingError::Dependency(_))));
    }

    #[tokio::test]
    async fn cancellation_before_dispatch_short_circuits() {
        let question = question_k10();
        let adapter = MockLlmAdapter::new();
        let engine = ConsensusEngine::new(Arc::new(adapter));
        let token = CancellationToken::new();
        token.cancel();
        let submission_id = SubmissionId::new();
        let outcome = engine
            .grade_answer(&question, "Science", &answer(submission_id, question.id), token)
            .await;
        assert!(matches!(outcome, Err(GradingError::Cancelled)));
    }
}
