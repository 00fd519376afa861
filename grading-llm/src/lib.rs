//! The narrow contract the grading core calls through: `Grade`,
//! `GenerateFeedback`, `AnalyzePatterns` (`spec.md` §4.3, §6).
//!
//! Implementations (a real provider client) are out of scope for this
//! crate — it only defines the trait, the request/response shapes, the
//! response-parsing helper every implementation needs, and one reference
//! `MockLlmAdapter` used by tests and the CLI demo.

use async_trait::async_trait;
use grading_types::{FeedbackEvent, FinalGrade, GradingResult, Rubric};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("response parse error: {0}")]
    Parse(String),
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("operation cancelled")]
    Cancelled,
}

/// Request to grade one answer segment against one rubric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingRequest {
    /// Selects the evaluator persona (`spec.md` §4.1).
    pub evaluator_id: String,
    pub question_text: String,
    /// Canonical JSON serialization of the rubric, so every implementation
    /// embeds it into a prompt the same way.
    pub rubric: Rubric,
    pub subject: String,
    pub answer_text: String,
    pub diagram_image_keys: Vec<String>,
}

/// JSON schema for a `Grade` response (`spec.md` §6): `score`, `max_score`,
/// `confidence`, `reasoning`, `criteria_met`, `mistakes_found`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawGradingResponse {
    pub score: f64,
    pub max_score: i64,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub criteria_met: Vec<String>,
    #[serde(default)]
    pub mistakes_found: Vec<String>,
}

/// Request for 3-4 sentences of student-facing feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub grade: FinalGrade,
    pub history: Vec<FeedbackEvent>,
}

/// Request to mine feedback events for rubric-refinement signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub rubric: Rubric,
    pub events: Vec<FeedbackEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnalysisResult {
    pub patterns: Vec<String>,
    pub common_reasons: Vec<String>,
    pub recommendation: String,
}

/// The capability set the grading core depends on. Implementations never
/// panic and never partially mutate caller state on failure (`spec.md`
/// §4.3).
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    async fn grade(&self, request: GradingRequest) -> Result<GradingResult, LlmError>;

    async fn generate_feedback(&self, request: FeedbackRequest) -> Result<String, LlmError>;

    async fn analyze_patterns(
        &self,
        request: AnalysisRequest,
    ) -> Result<AnalysisResult, LlmError>;
}

/// Strip a leading/trailing ```` ```json ```` or ```` ``` ```` code fence and
/// surrounding whitespace before parsing — `spec.md` §6's parser-tolerance
/// requirement. Implementations should call this before `serde_json::from_str`.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_prefix = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed)
        .trim_start();
    without_prefix.strip_suffix("```").unwrap_or(without_prefix).trim()
}

/// Parse a raw LLM text response into a canonical `GradingResult`, tolerating
/// markdown code fences around the JSON body.
pub fn parse_grading_response(
    evaluator_id: &str,
    raw: &str,
) -> Result<GradingResult, LlmError> {
    let cleaned = strip_code_fence(raw);
    let parsed: RawGradingResponse =
        serde_json::from_str(cleaned).map_err(|e| LlmError::Parse(e.to_string()))?;
    Ok(GradingResult {
        evaluator_id: evaluator_id.to_string(),
        suggested_score: parsed.score,
        confidence: parsed.confidence,
        reasoning: parsed.reasoning,
        criteria_met: parsed.criteria_met,
        mistakes_found: parsed.mistakes_found,
    })
}

/// Deterministic, configurable stand-in adapter for tests and the CLI demo.
/// Never makes network calls. Scripted by evaluator id so multi-evaluator
/// tests can make each persona disagree on purpose.
pub struct MockLlmAdapter {
    responses: std::collections::HashMap<String, GradingResult>,
    feedback: String,
    analysis: AnalysisResult,
}

impl MockLlmAdapter {
    pub fn new() -> Self {
        Self {
            responses: std::collections::HashMap::new(),
            feedback: "Good work overall; review the steps you skipped.".to_string(),
            analysis: AnalysisResult::default(),
        }
    }

    pub fn with_response(mut self, evaluator_id: impl Into<String>, result: GradingResult) -> Self {
        self.responses.insert(evaluator_id.into(), result);
        self
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = feedback.into();
        self
    }

    pub fn with_analysis(mut self, analysis: AnalysisResult) -> Self {
        self.analysis = analysis;
        self
    }
}

impl Default for MockLlmAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmAdapter for MockLlmAdapter {
    async fn grade(&self, request: GradingRequest) -> Result<GradingResult, LlmError> {
        self.responses
            .get(&request.evaluator_id)
            .cloned()
            .ok_or_else(|| {
                LlmError::Transport(format!(
                    "no scripted response for evaluator {}",
                    request.evaluator_id
                ))
            })
    }

    async fn generate_feedback(&self, _request: FeedbackRequest) -> Result<String, LlmError> {
        Ok(self.feedback.clone())
    }

    async fn analyze_patterns(
        &self,
        request: AnalysisRequest,
    ) -> Result<AnalysisResult, LlmError> {
        if request.events.is_empty() {
            return Err(LlmError::Transport(
                "no feedback events to analyze".to_string(),
            ));
        }
        Ok(self.analysis.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_code_fence() {
        let raw = "```json\n{\"score\": 1}\n```";
        assert_eq!(strip_code_fence(raw), "{\"score\": 1}");
    }

    #[test]
    fn strips_bare_code_fence() {
        let raw = "```\n{\"score\": 1}\n```";
        assert_eq!(strip_code_fence(raw), "{\"score\": 1}");
    }

    #[test]
    fn passes_through_unfenced_json() {
        let raw = "  {\"score\": 1}  ";
        assert_eq!(strip_code_fence(raw), "{\"score\": 1}");
    }

    #[test]
    fn parses_fenced_grading_response() {
        let raw = r#"```json
{
  "score": 8,
  "max_score": 10,
  "confidence": 0.9,
  "reasoning": "solid answer",
  "criteria_met": ["c1", "c2"],
  "mistakes_found": []
}
```"#;
        let result = parse_grading_response("reasoning_validator", raw).unwrap();
        assert_eq!(result.evaluator_id, "reasoning_validator");
        assert_eq!(result.suggested_score, 8.0);
        assert_eq!(result.criteria_met, vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn mock_adapter_rejects_pattern_analysis_on_empty_input() {
        let adapter = MockLlmAdapter::new();
        let result = adapter
            .analyze_patterns(AnalysisRequest {
                rubric: grading_types::Rubric {
                    full_credit_criteria: vec![],
                    partial_credit_rules: vec![],
                    common_mistakes: vec![],
                    key_concepts: vec![],
                    grading_notes: String::new(),
                    strict_mode: false,
                },
                events: vec![],
            })
            .await;
        assert!(result.is_err());
    }
}
