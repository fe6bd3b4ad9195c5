//! Tree-sitter based structural feature extraction

use super::{StructuralFeatures, StructuralParser};
use crate::types::Language;
use futures::future::BoxFuture;
use std::cell::RefCell;
use tree_sitter::{Node, Parser};

// ═══════════════════════════════════════════════════════════════════════════
//  THREAD-LOCAL PARSER POOL
// ═══════════════════════════════════════════════════════════════════════════
//
// Parsers are expensive to create but reusable across sources of the same
// language, so each worker thread keeps its own pre-configured set.

thread_local! {
    static RUST_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        // Ignore error here - will be caught at parse time if language fails
        let _ = p.set_language(&tree_sitter_rust::LANGUAGE.into());
        p
    });

    static JS_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_javascript::LANGUAGE.into());
        p
    });

    static TS_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into());
        p
    });

    static PYTHON_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_python::LANGUAGE.into());
        p
    });

    static GO_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_go::LANGUAGE.into());
        p
    });
}

fn parse_with_pooled_parser(content: &str, language: Language) -> anyhow::Result<tree_sitter::Tree> {
    let parse_result = match language {
        Language::Rust => RUST_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::JavaScript => JS_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::TypeScript => TS_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::Python => PYTHON_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::Go => GO_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::C | Language::Cpp | Language::Java => {
            return Err(anyhow::anyhow!("No grammar bundled for {}", language))
        }
    };

    parse_result.ok_or_else(|| anyhow::anyhow!("Failed to parse {} source", language))
}

fn control_flow_kind(kind: &str) -> Option<&'static str> {
    match kind {
        "if_statement" | "if_expression" => Some("if"),
        "for_statement" | "for_in_statement" | "for_expression" => Some("for"),
        "while_statement" | "do_statement" | "while_expression" | "loop_expression" => {
            Some("while")
        }
        "switch_statement"
        | "match_expression"
        | "match_statement"
        | "expression_switch_statement"
        | "type_switch_statement" => Some("switch"),
        _ => None,
    }
}

fn is_operator_expression(kind: &str) -> bool {
    matches!(
        kind,
        "binary_expression"
            | "binary_operator"
            | "boolean_operator"
            | "comparison_operator"
            | "augmented_assignment"
            | "augmented_assignment_expression"
            | "compound_assignment_expr"
    )
}

fn is_function_definition(kind: &str) -> bool {
    matches!(
        kind,
        "function_definition"
            | "function_declaration"
            | "function_item"
            | "method_definition"
            | "method_declaration"
            | "generator_function_declaration"
    )
}

fn node_text<'a>(node: &Node, content: &'a str) -> &'a str {
    content.get(node.byte_range()).unwrap_or("")
}

/// Operator token of a binary-like node: the `operator` field when the grammar
/// has one, else the first anonymous child.
fn operator_token(node: &Node, content: &str) -> Option<String> {
    if let Some(op) = node.child_by_field_name("operator") {
        return Some(node_text(&op, content).to_string());
    }
    let mut cursor = node.walk();
    let token = node
        .children(&mut cursor)
        .find(|child| !child.is_named())
        .map(|child| child.kind().to_string());
    token
}

fn collect_identifiers(node: &Node, content: &str, out: &mut Vec<String>) {
    if node.kind() == "identifier" {
        out.push(node_text(node, content).to_string());
        return;
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_identifiers(&child, content, out);
    }
}

/// Names bound by a declaration/assignment node, per grammar.
fn declared_names(node: &Node, content: &str) -> Vec<String> {
    let target = match node.kind() {
        // python `x = ...`
        "assignment" => node.child_by_field_name("left"),
        // js/ts `let x = ...`
        "variable_declarator" => node.child_by_field_name("name"),
        // rust `let x = ...`
        "let_declaration" => node.child_by_field_name("pattern"),
        // go `x := ...`
        "short_var_declaration" => node.child_by_field_name("left"),
        // go `var x = ...`
        "var_spec" => node.child_by_field_name("name"),
        _ => None,
    };
    let mut names = Vec::new();
    if let Some(target) = target {
        collect_identifiers(&target, content, &mut names);
    }
    names
}

fn walk(node: &Node, content: &str, depth: u32, features: &mut StructuralFeatures) {
    if node.is_named() {
        let kind = node.kind();
        *features.node_counts.entry(kind.to_string()).or_insert(0) += 1;
        features.depth = features.depth.max(depth);

        if let Some(flow) = control_flow_kind(kind) {
            *features.control_flow_counts.entry(flow.to_string()).or_insert(0) += 1;
        }
        if is_operator_expression(kind) {
            if let Some(op) = operator_token(node, content) {
                *features.operation_counts.entry(op).or_insert(0) += 1;
            }
        }
        if is_function_definition(kind) {
            if let Some(name) = node.child_by_field_name("name") {
                features
                    .function_names
                    .insert(node_text(&name, content).to_string());
            }
        }
        features.variable_names.extend(declared_names(node, content));
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk(&child, content, depth + 1, features);
    }
}

/// Extract structural features from source text.
pub fn extract_features(content: &str, language: Language) -> anyhow::Result<StructuralFeatures> {
    let tree = parse_with_pooled_parser(content, language)?;
    let root = tree.root_node();
    if root.has_error() {
        return Err(anyhow::anyhow!("{} source has syntax errors", language));
    }

    let mut features = StructuralFeatures::default();
    walk(&root, content, 0, &mut features);
    Ok(features)
}

/// `StructuralParser` backed by the bundled tree-sitter grammars
/// (Rust, JavaScript, TypeScript, Python, Go).
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeSitterParser;

impl TreeSitterParser {
    pub fn supports(language: Language) -> bool {
        !matches!(language, Language::C | Language::Cpp | Language::Java)
    }
}

impl StructuralParser for TreeSitterParser {
    fn parse<'a>(
        &'a self,
        language: Language,
        source: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<StructuralFeatures>> {
        // Parsing is CPU-bound and fast for single solutions; run it inline.
        Box::pin(async move { extract_features(source, language) })
    }
}
