//! Structural features of a program
//!
//! Feature vectors are read-only input to the semantic-equivalence rules and
//! to the informational similarity metrics. Parsing is best-effort: when no
//! parser is available the engine skips the structural rules.

pub mod parser;

pub use parser::TreeSitterParser;

use crate::types::Language;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Control-flow constructs tracked per program.
pub const CONTROL_FLOW_KINDS: [&str; 4] = ["if", "for", "while", "switch"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralFeatures {
    /// Named syntax node kinds and how often they occur.
    pub node_counts: BTreeMap<String, u32>,
    /// Maximum nesting depth of named nodes.
    pub depth: u32,
    /// Counts for each of `CONTROL_FLOW_KINDS` (always all four keys).
    pub control_flow_counts: BTreeMap<String, u32>,
    /// Operator tokens used in binary, comparison and compound-assignment expressions.
    pub operation_counts: BTreeMap<String, u32>,
    pub function_names: BTreeSet<String>,
    pub variable_names: BTreeSet<String>,
}

impl Default for StructuralFeatures {
    fn default() -> Self {
        Self {
            node_counts: BTreeMap::new(),
            depth: 0,
            control_flow_counts: CONTROL_FLOW_KINDS
                .iter()
                .map(|k| (k.to_string(), 0))
                .collect(),
            operation_counts: BTreeMap::new(),
            function_names: BTreeSet::new(),
            variable_names: BTreeSet::new(),
        }
    }
}

impl StructuralFeatures {
    pub fn total_nodes(&self) -> u32 {
        self.node_counts.values().sum()
    }

    pub fn control_flow(&self, kind: &str) -> u32 {
        self.control_flow_counts.get(kind).copied().unwrap_or(0)
    }

    /// Same number of if/for/while/switch constructs.
    pub fn same_control_flow(&self, other: &StructuralFeatures) -> bool {
        CONTROL_FLOW_KINDS
            .iter()
            .all(|kind| self.control_flow(kind) == other.control_flow(kind))
    }
}

/// Structural parser service seam.
pub trait StructuralParser: Send + Sync {
    fn parse<'a>(
        &'a self,
        language: Language,
        source: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<StructuralFeatures>>;
}

/// Parser that is never available; semantic rules are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStructuralParser;

impl StructuralParser for NoStructuralParser {
    fn parse<'a>(
        &'a self,
        language: Language,
        _source: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<StructuralFeatures>> {
        Box::pin(async move {
            Err(anyhow::anyhow!(
                "No structural parser configured for {}",
                language
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_flow(ifs: u32, fors: u32) -> StructuralFeatures {
        let mut f = StructuralFeatures::default();
        f.control_flow_counts.insert("if".to_string(), ifs);
        f.control_flow_counts.insert("for".to_string(), fors);
        f
    }

    #[test]
    fn test_default_has_all_control_flow_keys() {
        let f = StructuralFeatures::default();
        for kind in CONTROL_FLOW_KINDS {
            assert_eq!(f.control_flow(kind), 0);
        }
        assert_eq!(f.total_nodes(), 0);
    }

    #[test]
    fn test_same_control_flow_compares_every_kind() {
        assert!(with_flow(1, 2).same_control_flow(&with_flow(1, 2)));
        assert!(!with_flow(1, 2).same_control_flow(&with_flow(2, 2)));
        assert!(!with_flow(0, 1).same_control_flow(&with_flow(0, 0)));
    }

    #[tokio::test]
    async fn test_no_parser_is_unavailable() {
        assert!(NoStructuralParser
            .parse(Language::Python, "x = 1")
            .await
            .is_err());
    }
}
