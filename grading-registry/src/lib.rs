//! Process-wide, read-only catalog of evaluator personas and subject
//! prompt-bias fragments (`spec.md` §4.1).
//!
//! Adding an evaluator is a code change, not runtime configuration — the
//! consensus math in `grading-engine` assumes a known N and stable ids
//! (`spec.md` §9 "Evaluator registry as closed set"). Both catalogs are
//! built once behind a `OnceLock` and are immutable afterwards.

use std::collections::HashMap;
use std::sync::OnceLock;

/// One LLM persona: id, temperature, prompt bias, role tag (`spec.md`
/// §4.1, GLOSSARY).
#[derive(Debug, Clone, Copy)]
pub struct EvaluatorProfile {
    pub id: &'static str,
    pub temperature: f64,
    pub prompt_bias: &'static str,
    pub role_tag: &'static str,
}

/// The three evaluator ids the engine addresses by stable id.
pub const RUBRIC_ENFORCER: &str = "rubric_enforcer";
pub const REASONING_VALIDATOR: &str = "reasoning_validator";
pub const STRUCTURAL_ANALYZER: &str = "structural_analyzer";

fn evaluator_profiles() -> &'static [EvaluatorProfile; 3] {
    static PROFILES: OnceLock<[EvaluatorProfile; 3]> = OnceLock::new();
    PROFILES.get_or_init(|| {
        [
            EvaluatorProfile {
                id: RUBRIC_ENFORCER,
                temperature: 0.1,
                prompt_bias: "Match the rubric literally. Do not award credit for intent, only for what is explicitly present in the answer.",
                role_tag: "strict",
            },
            EvaluatorProfile {
                id: REASONING_VALIDATOR,
                temperature: 0.3,
                prompt_bias: "Reward demonstrated reasoning even when the student's notation or phrasing differs from the rubric's wording.",
                role_tag: "lenient",
            },
            EvaluatorProfile {
                id: STRUCTURAL_ANALYZER,
                temperature: 0.2,
                prompt_bias: "Prioritize structural completeness: equation balance, steps shown, logical ordering of the argument.",
                role_tag: "structural",
            },
        ]
    })
}

/// Look up an evaluator profile by its stable id.
pub fn evaluator_profile(id: &str) -> Option<EvaluatorProfile> {
    evaluator_profiles().iter().find(|p| p.id == id).copied()
}

/// All registered evaluator profiles, in declaration order — declaration
/// order is the tie-break the engine uses (`spec.md` §4.4 "Tie-breaking").
pub fn all_evaluator_profiles() -> &'static [EvaluatorProfile; 3] {
    evaluator_profiles()
}

/// A subject's prompt-bias fragment, concatenated into the grading prompt
/// (`spec.md` §4.1).
#[derive(Debug, Clone, Copy)]
pub struct SubjectProfile {
    pub prompt_bias: &'static str,
}

fn subject_profiles() -> &'static HashMap<&'static str, SubjectProfile> {
    static SUBJECTS: OnceLock<HashMap<&'static str, SubjectProfile>> = OnceLock::new();
    SUBJECTS.get_or_init(|| {
        let mut map = HashMap::new();
        map.insert(
            "math",
            SubjectProfile {
                prompt_bias: "Accept equivalent algebraic forms; check units and significant figures.",
            },
        );
        map.insert(
            "science",
            SubjectProfile {
                prompt_bias: "Accept synonyms for technical terms; require causal, not just descriptive, explanations.",
            },
        );
        map.insert(
            "history",
            SubjectProfile {
                prompt_bias: "Weight cited evidence and chronological accuracy over prose style.",
            },
        );
        map.insert(
            "literature",
            SubjectProfile {
                prompt_bias: "Weight textual evidence and argument coherence over grammar.",
            },
        );
        map
    })
}

/// Look up a subject profile. Lookup is lowercase-normalized
/// (`spec.md` §9 Open Question (c)) so callers never have to normalize
/// themselves.
pub fn subject_profile(subject: &str) -> Option<SubjectProfile> {
    subject_profiles().get(subject.to_lowercase().as_str()).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_three_evaluator_profiles_ship() {
        assert_eq!(all_evaluator_profiles().len(), 3);
    }

    #[test]
    fn evaluator_ids_are_stable_and_known() {
        assert!(evaluator_profile(RUBRIC_ENFORCER).is_some());
        assert!(evaluator_profile(REASONING_VALIDATOR).is_some());
        assert!(evaluator_profile(STRUCTURAL_ANALYZER).is_some());
        assert!(evaluator_profile("unknown").is_none());
    }

    #[test]
    fn subject_lookup_is_case_insensitive() {
        assert!(subject_profile("Math").is_some());
        assert!(subject_profile("MATH").is_some());
        assert!(subject_profile("math").is_some());
        assert!(subject_profile("underwater basket weaving").is_none());
    }

    #[test]
    fn declaration_order_is_stable_for_tie_breaking() {
        let ids: Vec<&str> = all_evaluator_profiles().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![RUBRIC_ENFORCER, REASONING_VALIDATOR, STRUCTURAL_ANALYZER]);
    }
}
