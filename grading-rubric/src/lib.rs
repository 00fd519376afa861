//! Deterministic rubric-to-score arithmetic.
//!
//! LLM evaluators arithmetic-hallucinate. Given the set of rubric element
//! ids (or, as a fallback, descriptions) an evaluator claims an answer
//! satisfied, this crate recomputes the score from the rubric's own point
//! values — judgment stays with the model, arithmetic does not.
//!
//! `enforce` is pure: same `(Rubric, claims)` in, same `EnforcementOutcome`
//! out, always (`spec.md` §8 invariant 1).

use grading_types::{Rubric, RubricWarning};
use std::collections::HashSet;

/// Result of running the enforcer: the recomputed score plus which rubric
/// elements were actually applied, split by kind so callers (the engine, the
/// CLI demo) don't have to re-derive the split from a flat id list.
#[derive(Debug, Clone, PartialEq)]
pub struct EnforcementOutcome {
    /// Lower-clamped at 0. Upper-clamping to the question's `max_score` is
    /// the caller's job (`spec.md` §4.2 step 5) — this crate never sees
    /// `max_score`, only the `Rubric`.
    pub score: f64,
    pub applied_criteria: Vec<String>,
    pub applied_rules: Vec<String>,
    pub applied_mistakes: Vec<String>,
}

impl EnforcementOutcome {
    /// All applied element ids, in the order the enforcer walked them:
    /// criteria, then rules, then mistakes.
    pub fn applied_ids(&self) -> Vec<&str> {
        self.applied_criteria
            .iter()
            .chain(self.applied_rules.iter())
            .chain(self.applied_mistakes.iter())
            .map(String::as_str)
            .collect()
    }
}

fn matched(id: &str, description: &str, claims: &HashSet<String>) -> bool {
    claims.contains(id) || (!description.is_empty() && claims.contains(description))
}

/// Run the fixed-order algorithm from `spec.md` §4.2 against `claims` — the
/// union of an evaluator's `criteria_met` and `mistakes_found`.
pub fn enforce(rubric: &Rubric, claims: &HashSet<String>) -> EnforcementOutcome {
    let mut score = 0.0;
    let mut applied_criteria = Vec::new();
    let mut applied_rules = Vec::new();
    let mut applied_mistakes = Vec::new();

    for criterion in &rubric.full_credit_criteria {
        if matched(&criterion.id, &criterion.description, claims) {
            score += criterion.points;
            applied_criteria.push(criterion.id.clone());
        }
    }

    for rule in &rubric.partial_credit_rules {
        if matched(&rule.id, &rule.description, claims)
            && rule.dependencies.iter().all(|dep| claims.contains(dep))
        {
            score += rule.points;
            applied_rules.push(rule.id.clone());
        }
    }

    for mistake in &rubric.common_mistakes {
        if matched(&mistake.id, &mistake.description, claims) {
            score -= mistake.penalty;
            applied_mistakes.push(mistake.id.clone());
        }
    }

    score = score.max(0.0);

    EnforcementOutcome {
        score,
        applied_criteria,
        applied_rules,
        applied_mistakes,
    }
}

/// Convenience wrapper for callers that only need the number.
pub fn score_only(rubric: &Rubric, claims: &HashSet<String>) -> f64 {
    enforce(rubric, claims).score
}

/// Upper-clamp a raw enforcer score to a question's max score. Kept as a
/// free function (not folded into `enforce`) because the enforcer itself
/// never receives `max_score` — only the engine, which owns the `Question`,
/// does (`spec.md` §4.2 step 5).
pub fn clamp_to_max(score: f64, max_score: i64) -> f64 {
    score.min(max_score as f64).max(0.0)
}

/// Re-export so downstream crates that only need `Rubric::validate` don't
/// have to separately depend on `grading-types` for it.
pub fn validate(rubric: &Rubric, question_max_score: i64) -> grading_types::Result<Option<RubricWarning>> {
    rubric.validate(question_max_score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use grading_types::{Criterion, Mistake, Rule};

    fn criterion(id: &str, points: f64) -> Criterion {
        Criterion {
            id: id.to_string(),
            description: String::new(),
            points,
            required: false,
            category: "general".to_string(),
        }
    }

    fn rubric_with(
        criteria: Vec<Criterion>,
        rules: Vec<Rule>,
        mistakes: Vec<Mistake>,
    ) -> Rubric {
        Rubric {
            full_credit_criteria: criteria,
            partial_credit_rules: rules,
            common_mistakes: mistakes,
            key_concepts: vec![],
            grading_notes: String::new(),
            strict_mode: false,
        }
    }

    fn claims(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn full_credit_sums_all_matched_criteria() {
        let rubric = rubric_with(
            vec![criterion("c1", 4.0), criterion("c2", 6.0)],
            vec![],
            vec![],
        );
        let outcome = enforce(&rubric, &claims(&["c1", "c2"]));
        assert_eq!(outcome.score, 10.0);
        assert_eq!(outcome.applied_criteria, vec!["c1", "c2"]);
    }

    /// S4 — arithmetic hallucination correction: the evaluator's own
    /// self-reported score (10) is irrelevant; only `criteria_met` feeds the
    /// enforcer.
    #[test]
    fn ignores_self_reported_score_entirely() {
        let rubric = rubric_with(vec![criterion("c1", 2.0)], vec![], vec![]);
        let outcome = enforce(&rubric, &claims(&["c1"]));
        assert_eq!(outcome.score, 2.0);
    }

    /// S5 — a rule with an unmet dependency contributes nothing.
    #[test]
    fn rule_with_unmet_dependency_contributes_zero() {
        let rubric = rubric_with(
            vec![criterion("c1", 5.0)],
            vec![Rule {
                id: "r1".to_string(),
                description: String::new(),
                points: 1.0,
                dependencies: vec!["c1".to_string()],
            }],
            vec![],
        );
        let outcome = enforce(&rubric, &claims(&["r1"]));
        assert_eq!(outcome.score, 0.0);
        assert!(outcome.applied_rules.is_empty());
    }

    #[test]
    fn rule_with_met_dependency_applies() {
        let rubric = rubric_with(
            vec![criterion("c1", 5.0)],
            vec![Rule {
                id: "r1".to_string(),
                description: String::new(),
                points: 1.0,
                dependencies: vec!["c1".to_string()],
            }],
            vec![],
        );
        let outcome = enforce(&rubric, &claims(&["c1", "r1"]));
        assert_eq!(outcome.score, 6.0);
        assert_eq!(outcome.applied_rules, vec!["r1"]);
    }

    #[test]
    fn mistakes_subtract_penalty_and_clamp_at_zero() {
        let rubric = rubric_with(
            vec![criterion("c1", 2.0)],
            vec![],
            vec![Mistake {
                id: "m1".to_string(),
                description: String::new(),
                penalty: 5.0,
                category: "arithmetic".to_string(),
                frequency: 1,
            }],
        );
        let outcome = enforce(&rubric, &claims(&["c1", "m1"]));
        assert_eq!(outcome.score, 0.0);
        assert_eq!(outcome.applied_mistakes, vec!["m1"]);
    }

    #[test]
    fn description_fallback_matches_when_id_absent() {
        let mut c = criterion("c1", 3.0);
        c.description = "explains causality".to_string();
        let rubric = rubric_with(vec![c], vec![], vec![]);
        let outcome = enforce(&rubric, &claims(&["explains causality"]));
        assert_eq!(outcome.score, 3.0);
    }

    #[test]
    fn clamp_to_max_upper_bounds() {
        assert_eq!(clamp_to_max(15.0, 10), 10.0);
        assert_eq!(clamp_to_max(-1.0, 10), 0.0);
        assert_eq!(clamp_to_max(5.0, 10), 5.0);
    }

    proptest::proptest! {
        /// `spec.md` §8 invariant 1: enforce is pure and deterministic.
        #[test]
        fn enforce_is_deterministic(
            points in proptest::collection::vec(0.0f64..20.0, 1..6),
            claim_indices in proptest::collection::vec(0usize..6, 0..6),
        ) {
            let criteria: Vec<Criterion> = points
                .iter()
                .enumerate()
                .map(|(i, p)| criterion(&format!("c{i}"), *p))
                .collect();
            let rubric = rubric_with(criteria, vec![], vec![]);
            let claim_set: HashSet<String> = claim_indices
                .iter()
                .map(|i| format!("c{i}"))
                .collect();

            let first = enforce(&rubric, &claim_set);
            let second = enforce(&rubric, &claim_set);
            prop_assert_eq!(first, second);
        }
    }
}
