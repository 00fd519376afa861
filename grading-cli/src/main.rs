//! Demonstration binary: wires the grading-core pipeline (rubric enforcer,
//! consensus engine, worker pool, orchestrator, audit chain, feedback loop)
//! into one end-to-end run against in-memory stores and the reference
//! `MockLlmAdapter`. Not a production entry point — no HTTP surface, no real
//! persistence, no real LLM/OCR provider (all out of scope, per `spec.md`
//! §1).

mod config;

use clap::{Parser, Subcommand};
use config::GradingConfig;
use grading_audit::{AuditWriter, InMemoryAuditStore};
use grading_engine::{ConsensusEngine, EngineConfig};
use grading_feedback::{
    FeedbackEventStore, FeedbackLoop, GradeOverrideStore, InMemoryFeedbackEventStore,
    InMemoryGradeOverrideStore, InMemoryRubricStore, RubricStore,
};
use grading_llm::{LlmAdapter, MockLlmAdapter};
use grading_orchestrator::ocr::EchoOcrProvider;
use grading_orchestrator::segment::MarkerSegmenter;
use grading_orchestrator::store::{
    ExamStore, GradeStore, InMemoryExamStore, InMemoryGradeStore, InMemorySubmissionStore,
    SubmissionStore,
};
use grading_orchestrator::Orchestrator;
use grading_scheduler::WorkerPool;
use grading_types::{
    AnswerType, Criterion, Exam, ExamId, GradingResult, Question, QuestionId, Rubric, TenantId,
    UserId,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "grading-cli", about = "Exam grading core demonstration CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the default process configuration as TOML.
    PrintConfig,
    /// Run one submission through the full pipeline against a mock LLM.
    Demo {
        /// Simulate evaluator disagreement severe enough to escalate.
        #[arg(long)]
        escalate: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn demo_exam(tenant_id: TenantId) -> Exam {
    let exam_id = ExamId::new();
    let question_id = QuestionId::new();
    let rubric = Rubric {
        full_credit_criteria: vec![
            Criterion {
                id: "c1".to_string(),
                description: "identifies the mitochondria as the site of ATP production".to_string(),
                points: 6.0,
                required: true,
                category: "content".to_string(),
            },
            Criterion {
                id: "c2".to_string(),
                description: "mentions the double membrane structure".to_string(),
                points: 4.0,
                required: false,
                category: "content".to_string(),
            },
        ],
        partial_credit_rules: vec![],
        common_mistakes: vec![],
        key_concepts: vec!["ATP".to_string(), "cellular respiration".to_string()],
        grading_notes: String::new(),
        strict_mode: false,
    };
    Exam {
        id: exam_id,
        tenant_id,
        name: "Biology Midterm".to_string(),
        subject: "science".to_string(),
        questions: vec![Question {
            id: question_id,
            exam_id,
            text: "Describe the function and structure of the mitochondria.".to_string(),
            max_score: 10,
            answer_type: AnswerType::ShortAnswer,
            rubric,
        }],
        questions_locked: false,
    }
}

fn scripted_adapter(escalate: bool) -> MockLlmAdapter {
    let mut adapter = MockLlmAdapter::new().with_feedback(
        "Solid explanation of ATP production; add a note on the double membrane next time.",
    );
    let (scores, criteria): (Vec<f64>, Vec<Vec<&str>>) = if escalate {
        (vec![10.0, 10.0, 10.0], vec![vec!["c1", "c2"], vec!["c1"], vec![]])
    } else {
        (vec![10.0, 10.0, 10.0], vec![vec!["c1", "c2"], vec!["c1", "c2"], vec!["c1", "c2"]])
    };

    for (profile, (_score, criteria_met)) in grading_registry::all_evaluator_profiles()
        .iter()
        .zip(scores.into_iter().zip(criteria))
    {
        adapter = adapter.with_response(
            profile.id,
            GradingResult {
                evaluator_id: profile.id.to_string(),
                suggested_score: 10.0, // discarded by the rubric enforcer; see grading-rubric
                confidence: 0.9,
                reasoning: format!("{} found criteria: {:?}", profile.id, criteria_met),
                criteria_met: criteria_met.into_iter().map(String::from).collect(),
                mistakes_found: vec![],
            },
        );
    }
    adapter
}

async fn run_demo(config: GradingConfig, escalate: bool) -> anyhow::Result<()> {
    let tenant_id = TenantId::new();
    let exam = demo_exam(tenant_id);
    let exam_id = exam.id;
    let question_id = exam.questions[0].id;

    let adapter: Arc<dyn LlmAdapter> = Arc::new(scripted_adapter(escalate));
    let engine = ConsensusEngine::with_config(
        Arc::clone(&adapter),
        EngineConfig {
            call_timeout: config.llm_call_timeout(),
        },
    );
    let pool = WorkerPool::new(config.worker_count, config.queue_capacity);

    let submissions = Arc::new(InMemorySubmissionStore::new());
    let grades = Arc::new(InMemoryGradeStore::new());
    let exams = Arc::new(InMemoryExamStore::new());
    exams.put(exam).await?;

    let orchestrator = Orchestrator::new(
        pool,
        engine,
        submissions.clone(),
        grades.clone(),
        exams.clone(),
        Arc::new(EchoOcrProvider),
        Arc::new(MarkerSegmenter),
    );
    orchestrator.start();

    let submission_id = orchestrator
        .submit(
            tenant_id,
            exam_id,
            vec!["Q1: The mitochondria produces ATP via cellular respiration and has a double membrane.".to_string()],
        )
        .await?;

    tokio::time::sleep(Duration::from_millis(200)).await;
    orchestrator.stop().await;

    let submission = submissions.get(submission_id).await?;
    let grade = grades.get(submission_id, question_id).await?;

    println!("submission status: {:?}", submission.processing_status);
    match &grade {
        Some(g) => println!(
            "question {question_id}: final_score={} status={:?} confidence={:.2}",
            g.final_score, g.status, g.confidence
        ),
        None => println!("question {question_id}: no grade persisted"),
    }

    // Audit chain: every write so far is attributable and tamper-evident.
    let audit_store = Arc::new(InMemoryAuditStore::new());
    let audit = Arc::new(AuditWriter::new(audit_store.clone()));
    audit
        .record(
            "submission",
            submission_id.0,
            "completed",
            None,
            serde_json::json!({ "status": format!("{:?}", submission.processing_status) }),
        )
        .await?;
    let chain = audit_store.all_ordered().await?;
    grading_audit::verify_chain(&chain)?;
    println!("audit chain verified ({} entr{})", chain.len(), if chain.len() == 1 { "y" } else { "ies" });

    // Feedback loop: simulate a teacher override and mine it for a pattern.
    if let Some(grade) = grade {
        let feedback_events: Arc<dyn FeedbackEventStore> = Arc::new(InMemoryFeedbackEventStore::new());
        let grade_overrides = Arc::new(InMemoryGradeOverrideStore::new());
        grade_overrides.seed(grade);
        let rubric_store = Arc::new(InMemoryRubricStore::new());
        rubric_store.seed(question_id, exams.get(exam_id).await?.questions[0].rubric.clone());

        let feedback_loop = FeedbackLoop::new(
            adapter,
            feedback_events,
            grade_overrides.clone() as Arc<dyn GradeOverrideStore>,
            rubric_store.clone() as Arc<dyn RubricStore>,
        )
        .with_audit(audit);

        let actor = UserId::new();
        let event = feedback_loop
            .capture_override(
                submission_id,
                question_id,
                9.0,
                "double membrane description was a touch thin but present",
                actor,
            )
            .await?;
        println!("teacher override captured: delta={}", event.delta);

        match feedback_loop.adapt_rubric(question_id).await {
            Ok(Some(note)) => println!("rubric adaptation proposed: {note}"),
            Ok(None) => println!("pattern analysis produced no actionable recommendation"),
            Err(err) => println!("pattern analysis unavailable: {err}"),
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::PrintConfig => {
            let config = GradingConfig::default();
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Command::Demo { escalate } => {
            run_demo(GradingConfig::default(), escalate).await?;
        }
    }
    Ok(())
}
