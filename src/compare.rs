//! Logic comparator
//!
//! Decides whether a candidate's operation profile plausibly implements the
//! same algorithm as the reference's. Only the critical opcode classes
//! (arithmetic, call, compare) take part; memory traffic and control flow vary
//! too much with style to be meaningful.
//!
//! The literal-return check looks for a bare literal return with no arithmetic
//! anywhere in the candidate. Constants computed through no-op arithmetic
//! chains (`return 8 * 1`) are not folded and go undetected.

use crate::ir::{IntermediateProgram, OpcodeClass, OperationProfile};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparatorStatus {
    Passed,
    Failed,
    /// Neither profile carried any information; never read as a pass.
    Undetermined,
}

impl ComparatorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparatorStatus::Passed => "passed",
            ComparatorStatus::Failed => "failed",
            ComparatorStatus::Undetermined => "undetermined",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicVerdict {
    pub status: ComparatorStatus,
    pub missing_ops: BTreeSet<OpcodeClass>,
    pub extra_ops: BTreeSet<OpcodeClass>,
    pub hardcoded_constant: Option<String>,
    pub reason: String,
}

impl LogicVerdict {
    /// No comparison was possible; the decision goes to judgment.
    pub fn undetermined(reason: impl Into<String>) -> Self {
        Self {
            status: ComparatorStatus::Undetermined,
            missing_ops: BTreeSet::new(),
            extra_ops: BTreeSet::new(),
            hardcoded_constant: None,
            reason: reason.into(),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == ComparatorStatus::Passed
    }
}

/// A return statement found in the candidate, with its literal value if the
/// returned expression is a bare literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnStatement {
    pub expression: String,
    pub literal: Option<String>,
}

impl ReturnStatement {
    pub fn new(expression: &str) -> Self {
        let expression = expression.trim().to_string();
        let literal = literal_value(&expression);
        Self {
            expression,
            literal,
        }
    }
}

fn source_return_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\breturn\b[ \t]*([^;\n}]*)").ok())
        .as_ref()
}

fn number_literal_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[-+]?(0[xX][0-9a-fA-F]+|\d+(\.\d+)?([eE][-+]?\d+)?)[lLuUfF]*$").ok()
    })
    .as_ref()
}

/// The literal text if `expression` is a bare literal, ignoring wrapping parens.
pub fn literal_value(expression: &str) -> Option<String> {
    let mut expr = expression.trim();
    while expr.len() >= 2 && expr.starts_with('(') && expr.ends_with(')') {
        expr = expr[1..expr.len() - 1].trim();
    }
    if expr.is_empty() {
        return None;
    }

    let quoted = expr.len() >= 2
        && ((expr.starts_with('"') && expr.ends_with('"'))
            || (expr.starts_with('\'') && expr.ends_with('\'')));
    let keyword = matches!(
        expr,
        "true" | "false" | "True" | "False" | "null" | "None" | "nil" | "undefined"
    );
    let numeric = number_literal_regex().is_some_and(|re| re.is_match(expr));
    if quoted || keyword || numeric {
        Some(expr.to_string())
    } else {
        None
    }
}

fn is_comment_line(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("//") || t.starts_with('#') || t.starts_with("/*") || t.starts_with('*')
}

/// Collect return statements from source text and from IR.
///
/// Source returns catch `return 8;` / `return 8`; IR returns catch literal
/// returns the extractor produced (`ret i32 8`, `RETURN_CONST 1 (8)`).
pub fn return_statements(source: &str, program: &IntermediateProgram) -> Vec<ReturnStatement> {
    let mut out = Vec::new();

    let source_lines = source.lines().filter(|line| !is_comment_line(line));
    if let Some(re) = source_return_regex() {
        for line in source_lines {
            for caps in re.captures_iter(line) {
                let expr = caps.get(1).map(|m| m.as_str()).unwrap_or("").trim();
                if !expr.is_empty() {
                    out.push(ReturnStatement::new(expr));
                }
            }
        }
    }

    for inst in program.instructions() {
        if inst.class != OpcodeClass::Return {
            continue;
        }
        let tokens: Vec<&str> = inst.text.split_whitespace().collect();
        let value = match inst.opcode.to_ascii_lowercase().as_str() {
            // `ret i32 8`
            "ret" if tokens.len() >= 3 => Some(tokens[2].trim_end_matches(',')),
            // `RETURN_CONST 1 (8)`
            "return_const" => inst
                .text
                .rsplit_once('(')
                .map(|(_, rest)| rest.trim_end_matches(')')),
            _ => None,
        };
        if let Some(value) = value {
            out.push(ReturnStatement::new(value));
        }
    }

    out
}

/// Compare candidate against reference.
pub fn compare(
    reference: &OperationProfile,
    candidate: &OperationProfile,
    candidate_returns: &[ReturnStatement],
) -> LogicVerdict {
    if reference.is_empty() && candidate.is_empty() {
        return LogicVerdict::undetermined("no operation profile available for either program");
    }

    let missing_ops: BTreeSet<OpcodeClass> = OpcodeClass::critical()
        .into_iter()
        .filter(|class| reference.count(*class) > 0 && candidate.count(*class) == 0)
        .collect();
    let extra_ops: BTreeSet<OpcodeClass> = OpcodeClass::critical()
        .into_iter()
        .filter(|class| candidate.count(*class) > 0 && reference.count(*class) == 0)
        .collect();

    let hardcoded_constant = if candidate.count(OpcodeClass::Arithmetic) == 0
        && reference.count(OpcodeClass::Arithmetic) > 0
    {
        candidate_returns.iter().find_map(|r| r.literal.clone())
    } else {
        None
    };

    let (status, reason) = if let Some(literal) = &hardcoded_constant {
        (
            ComparatorStatus::Failed,
            format!(
                "candidate returns literal {} without arithmetic while the reference computes its result",
                literal
            ),
        )
    } else if !missing_ops.is_empty() {
        (
            ComparatorStatus::Failed,
            format!("candidate is missing operations: {}", join_classes(&missing_ops)),
        )
    } else if !extra_ops.is_empty() {
        (
            ComparatorStatus::Passed,
            format!(
                "all reference operations present; candidate adds: {}",
                join_classes(&extra_ops)
            ),
        )
    } else {
        (
            ComparatorStatus::Passed,
            "operation profiles are consistent".to_string(),
        )
    };

    LogicVerdict {
        status,
        missing_ops,
        extra_ops,
        hardcoded_constant,
        reason,
    }
}

fn join_classes(classes: &BTreeSet<OpcodeClass>) -> String {
    classes
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
