//! The grading contract for one question (`spec.md` §3 "Rubric").
//!
//! Declared order of `full_credit_criteria` / `partial_credit_rules` /
//! `common_mistakes` is semantically load-bearing: the enforcer
//! (`grading-rubric`) walks each in declared order, so these are `Vec`, not
//! an unordered set, despite `spec.md` calling them "sets".

use crate::error::{GradingError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Criterion {
    pub id: String,
    pub description: String,
    pub points: f64,
    pub required: bool,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub description: String,
    /// May be negative.
    pub points: f64,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mistake {
    pub id: String,
    pub description: String,
    pub penalty: f64,
    pub category: String,
    pub frequency: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rubric {
    pub full_credit_criteria: Vec<Criterion>,
    pub partial_credit_rules: Vec<Rule>,
    pub common_mistakes: Vec<Mistake>,
    pub key_concepts: Vec<String>,
    pub grading_notes: String,
    pub strict_mode: bool,
}

/// A non-fatal observation surfaced alongside `Rubric::validate`'s success
/// path — `spec.md` §3's "warn, do not reject" on the points-sum invariant.
#[derive(Debug, Clone, PartialEq)]
pub struct RubricWarning(pub String);

impl Rubric {
    /// All declared ids, in the order criteria, then rules, then mistakes.
    fn all_ids(&self) -> Vec<&str> {
        self.full_credit_criteria
            .iter()
            .map(|c| c.id.as_str())
            .chain(self.partial_credit_rules.iter().map(|r| r.id.as_str()))
            .chain(self.common_mistakes.iter().map(|m| m.id.as_str()))
            .collect()
    }

    /// Structural validation: unique ids, dependencies resolve within the
    /// rubric, and a rule depending on another rule must be declared after
    /// it (`spec.md` §9 "Cyclic graphs" — the enforcer does not topologically
    /// sort, it trusts declaration order).
    ///
    /// Returns the non-fatal point-sum warning separately so a caller who
    /// only cares about hard errors can ignore it.
    pub fn validate(&self, question_max_score: i64) -> Result<Option<RubricWarning>> {
        let ids = self.all_ids();
        let mut seen = HashSet::with_capacity(ids.len());
        for id in &ids {
            if !seen.insert(*id) {
                return Err(GradingError::validation(format!(
                    "duplicate rubric element id: {id}"
                )));
            }
        }

        for rule in &self.partial_credit_rules {
            for dep in &rule.dependencies {
                if !seen.contains(dep.as_str()) {
                    return Err(GradingError::validation(format!(
                        "rule {} depends on unknown id {}",
                        rule.id, dep
                    )));
                }
            }
        }

        // A rule depending on another rule must appear after that rule in
        // declared order, or the enforcer's single forward pass will never
        // see the dependency satisfied.
        let rule_positions: std::collections::HashMap<&str, usize> = self
            .partial_credit_rules
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.as_str(), i))
            .collect();
        for (i, rule) in self.partial_credit_rules.iter().enumerate() {
            for dep in &rule.dependencies {
                if let Some(&dep_pos) = rule_positions.get(dep.as_str()) {
                    if dep_pos >= i {
                        return Err(GradingError::validation(format!(
                            "rule {} depends on rule {} which is declared at or after it",
                            rule.id, dep
                        )));
                    }
                }
            }
        }

        let points_sum: f64 = self.full_credit_criteria.iter().map(|c| c.points).sum();
        let warning = if (points_sum - question_max_score as f64).abs() > f64::EPSILON {
            Some(RubricWarning(format!(
                "full_credit_criteria points sum to {points_sum}, question max_score is {question_max_score}"
            )))
        } else {
            None
        };

        Ok(warning)
    }
}
