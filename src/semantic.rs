//! Semantic equivalence analyzer and similarity scoring
//!
//! Recognizes stylistic differences that leave the algorithm unchanged and
//! turns them into an additive score bonus. The bonus only ever feeds the
//! efficiency score; it never changes the comparator's pass/fail.

use crate::compare::return_statements;
use crate::config::PolicyConfig;
use crate::ir::{IntermediateProgram, OperationProfile};
use crate::structure::StructuralFeatures;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticAdjustment {
    pub equivalent: bool,
    pub reason: String,
    pub bonus_percent: f64,
}

impl SemanticAdjustment {
    fn equivalent(reason: impl Into<String>, policy: &PolicyConfig) -> Self {
        Self {
            equivalent: true,
            reason: reason.into(),
            bonus_percent: policy.semantic_bonus_percent,
        }
    }

    fn not_equivalent(reason: impl Into<String>) -> Self {
        Self {
            equivalent: false,
            reason: reason.into(),
            bonus_percent: 0.0,
        }
    }
}

/// A `name = expr` binding found in source.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Binding {
    name: String,
    expression: String,
}

fn binding_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    // Optional type/keyword prefix (`let mut`, `const`, `int`, `final long`),
    // the bound name, an optional `: Type` annotation, then `=` or `:=`.
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:[A-Za-z_][\w<>\[\],]*\s+)*([A-Za-z_]\w*)\s*(?::\s*[A-Za-z_][\w<>\[\]]*\s*)?:?=\s*(.+?)\s*;?\s*$",
        )
        .ok()
    })
    .as_ref()
}

fn bindings(source: &str) -> Vec<Binding> {
    let Some(re) = binding_regex() else {
        return Vec::new();
    };
    source
        .lines()
        .filter_map(|line| re.captures(line))
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str();
            let expression = caps.get(2)?.as_str();
            // `x == y` and friends are comparisons, not bindings
            if expression.starts_with('=') || name == "return" {
                return None;
            }
            Some(Binding {
                name: name.to_string(),
                expression: expression.to_string(),
            })
        })
        .collect()
}

/// Whole-identifier occurrences of `name` in `source`.
fn identifier_uses(source: &str, name: &str) -> usize {
    let bytes = source.as_bytes();
    let is_ident = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    source
        .match_indices(name)
        .filter(|(start, _)| {
            let end = start + name.len();
            let before_ok = *start == 0 || !is_ident(bytes[start - 1]);
            let after_ok = end >= bytes.len() || !is_ident(bytes[end]);
            before_ok && after_ok
        })
        .count()
}

fn normalize_expression(expr: &str) -> String {
    let mut e: String = expr.chars().filter(|c| !c.is_whitespace()).collect();
    while e.len() >= 2 && e.starts_with('(') && e.ends_with(')') {
        e = e[1..e.len() - 1].to_string();
    }
    e
}

/// Candidate declares exactly one binding the reference does not, binds the
/// reference's return expression to it, and only otherwise uses it in its
/// return. Returns the temporary's name.
fn intermediate_variable(
    reference_source: &str,
    candidate_source: &str,
    reference: &StructuralFeatures,
    candidate: &StructuralFeatures,
) -> Option<String> {
    let introduced: Vec<&String> = candidate
        .variable_names
        .difference(&reference.variable_names)
        .collect();
    let [name] = introduced.as_slice() else {
        return None;
    };

    let empty = IntermediateProgram::empty();
    let reference_returns: Vec<String> = return_statements(reference_source, &empty)
        .iter()
        .map(|r| normalize_expression(&r.expression))
        .collect();
    let returns_name = return_statements(candidate_source, &empty)
        .iter()
        .any(|r| normalize_expression(&r.expression) == **name);
    if !returns_name || identifier_uses(candidate_source, name) != 2 {
        return None;
    }

    bindings(candidate_source)
        .into_iter()
        .find(|binding| {
            binding.name == **name
                && reference_returns.contains(&normalize_expression(&binding.expression))
        })
        .map(|binding| binding.name)
}

/// Classify the candidate as stylistically different but logically
/// equivalent to the reference.
///
/// Both rules require identical control-flow counts, so nothing is
/// classified equivalent without structural features for both sides.
pub fn analyze(
    reference_source: &str,
    candidate_source: &str,
    reference: Option<&StructuralFeatures>,
    candidate: Option<&StructuralFeatures>,
    policy: &PolicyConfig,
) -> SemanticAdjustment {
    let (Some(reference), Some(candidate)) = (reference, candidate) else {
        return SemanticAdjustment::not_equivalent("structural features unavailable");
    };
    if !reference.same_control_flow(candidate) {
        return SemanticAdjustment::not_equivalent("control flow differs");
    }

    if let Some(name) =
        intermediate_variable(reference_source, candidate_source, reference, candidate)
    {
        return SemanticAdjustment::equivalent(
            format!(
                "intermediate variable `{}` holds the reference return expression",
                name
            ),
            policy,
        );
    }

    let reference_nodes = reference.total_nodes();
    if reference_nodes > 0 {
        let diff = (candidate.total_nodes() as f64 - reference_nodes as f64).abs();
        let ratio = diff / reference_nodes as f64;
        if (policy.node_ratio_min..=policy.node_ratio_max).contains(&ratio) {
            return SemanticAdjustment::equivalent(
                format!(
                    "node count differs by {:.0}% with identical control flow",
                    ratio * 100.0
                ),
                policy,
            );
        }
    }

    SemanticAdjustment::not_equivalent("no equivalence pattern matched")
}

fn ratio_score(reference: f64, candidate: f64) -> f64 {
    if candidate <= reference {
        100.0
    } else {
        (reference / candidate * 100.0).clamp(0.0, 100.0)
    }
}

/// Instruction-count similarity in [0, 100]: 100 when the candidate needs no
/// more instructions than the reference, shrinking proportionally otherwise.
/// `None` when either profile is empty.
pub fn instruction_similarity(
    reference: &OperationProfile,
    candidate: &OperationProfile,
) -> Option<f64> {
    if reference.is_empty() || candidate.is_empty() {
        return None;
    }
    Some(ratio_score(reference.total() as f64, candidate.total() as f64))
}

/// Wall-time similarity in [0, 100], same shape as `instruction_similarity`.
pub fn wall_time_similarity(reference_ms: u64, candidate_ms: u64) -> f64 {
    // Sub-millisecond runs are noise
    ratio_score(reference_ms.max(1) as f64, candidate_ms.max(1) as f64)
}

/// Add the semantic bonus to a raw score, capped at 100.
pub fn adjusted_score(raw: f64, adjustment: Option<&SemanticAdjustment>) -> f64 {
    let bonus = adjustment
        .filter(|a| a.equivalent)
        .map(|a| a.bonus_percent)
        .unwrap_or(0.0);
    (raw + bonus).clamp(0.0, 100.0)
}
