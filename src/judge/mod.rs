//! External judgment
//!
//! A language-model second opinion on ambiguous comparator outcomes. Every
//! failure mode comes back as a `JudgmentOutcome` variant; nothing in here
//! returns an error to the engine.

pub mod client;
pub mod parse;
pub mod prompts;

pub use client::OpenRouterJudge;

use crate::compare::{ComparatorStatus, LogicVerdict};
use crate::config::JudgmentConfig;
use crate::ir::{IntermediateProgram, OperationProfile};
use crate::types::{Language, Submission};
use crate::util::truncate_middle;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Payload describing one reference/candidate pair for the judgment service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgmentRequest {
    pub reference_source: String,
    pub candidate_source: String,
    pub language: Language,
    pub reference_ops: OperationProfile,
    pub candidate_ops: OperationProfile,
    #[serde(rename = "referenceIRExcerpt")]
    pub reference_ir_excerpt: Vec<String>,
    #[serde(rename = "candidateIRExcerpt")]
    pub candidate_ir_excerpt: Vec<String>,
    pub comparator_verdict: ComparatorStatus,
    pub comparator_reason: String,
}

/// IR and profile for one side of the request.
pub struct ProgramEvidence<'a> {
    pub submission: &'a Submission,
    pub program: &'a IntermediateProgram,
    pub profile: &'a OperationProfile,
}

impl JudgmentRequest {
    pub fn build(
        reference: ProgramEvidence<'_>,
        candidate: ProgramEvidence<'_>,
        verdict: &LogicVerdict,
        config: &JudgmentConfig,
    ) -> Self {
        Self {
            reference_source: truncate_middle(reference.submission.source(), config.max_source_chars),
            candidate_source: truncate_middle(candidate.submission.source(), config.max_source_chars),
            language: candidate.submission.language(),
            reference_ops: reference.profile.clone(),
            candidate_ops: candidate.profile.clone(),
            reference_ir_excerpt: reference.program.excerpt(config.ir_excerpt_lines),
            candidate_ir_excerpt: candidate.program.excerpt(config.ir_excerpt_lines),
            comparator_verdict: verdict.status,
            comparator_reason: verdict.reason.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Pass,
    Fail,
}

/// Response exactly as the service sends it, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgmentResponse {
    pub legitimate: bool,
    /// Signed and wide so out-of-range values reach validation instead of
    /// failing deserialization with a less useful message.
    pub confidence: i64,
    pub reason: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub indicators: Vec<String>,
    pub recommendation: Recommendation,
}

/// Validated judgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgmentResult {
    pub legitimate: bool,
    /// Always within 0..=100.
    pub confidence: u8,
    pub reason: String,
    pub rationale: String,
    pub indicators: Vec<String>,
    pub recommendation: Recommendation,
    /// Set when this result was guessed from an unparseable response.
    pub degraded: bool,
}

impl JudgmentResult {
    /// Best human-readable explanation: the rationale, else the reason.
    pub fn explanation(&self) -> &str {
        if self.rationale.trim().is_empty() {
            &self.reason
        } else {
            &self.rationale
        }
    }
}

/// Everything a judgment invocation can come back with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JudgmentOutcome {
    Ok(JudgmentResult),
    /// The service answered but the answer was not a valid judgment.
    ParseError { raw: String },
    /// No answer: missing credentials, timeout, unreachable, HTTP error.
    TransportError { cause: String },
}

impl JudgmentOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            JudgmentOutcome::Ok(_) => "ok",
            JudgmentOutcome::ParseError { .. } => "parse_error",
            JudgmentOutcome::TransportError { .. } => "transport_error",
        }
    }
}

/// Judgment service seam. Implementations make exactly one attempt.
pub trait Judge: Send + Sync {
    fn judge<'a>(&'a self, request: &'a JudgmentRequest) -> BoxFuture<'a, JudgmentOutcome>;
}

/// Judge used when judgment is turned off; always unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledJudge;

impl Judge for DisabledJudge {
    fn judge<'a>(&'a self, _request: &'a JudgmentRequest) -> BoxFuture<'a, JudgmentOutcome> {
        Box::pin(async {
            JudgmentOutcome::TransportError {
                cause: "judgment is disabled".to_string(),
            }
        })
    }
}
