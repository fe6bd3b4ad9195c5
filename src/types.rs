//! Request and result records shared across the engine
//!
//! Everything here is plain data. Results are assembled bottom-up from the
//! immutable records each stage produces and are never mutated once returned.

use crate::compare::{ComparatorStatus, LogicVerdict};
use crate::engine::policy::PolicyAction;
use crate::ir::OperationProfile;
use crate::judge::{JudgmentOutcome, JudgmentResult};
use crate::semantic::SemanticAdjustment;
use crate::structure::StructuralFeatures;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Source languages the engine knows how to route to collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Cpp,
    Java,
    Python,
    JavaScript,
    TypeScript,
    Rust,
    Go,
}

impl Language {
    pub fn all() -> [Language; 8] {
        [
            Language::C,
            Language::Cpp,
            Language::Java,
            Language::Python,
            Language::JavaScript,
            Language::TypeScript,
            Language::Rust,
            Language::Go,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Rust => "rust",
            Language::Go => "go",
        }
    }

    /// File extension used when a collaborator needs the source on disk.
    pub fn extension(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Python => "py",
            Language::JavaScript => "js",
            Language::TypeScript => "ts",
            Language::Rust => "rs",
            Language::Go => "go",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "c" | "h" => Some(Language::C),
            "cpp" | "cc" | "cxx" | "hpp" => Some(Language::Cpp),
            "java" => Some(Language::Java),
            "py" => Some(Language::Python),
            "js" | "mjs" | "cjs" => Some(Language::JavaScript),
            "ts" => Some(Language::TypeScript),
            "rs" => Some(Language::Rust),
            "go" => Some(Language::Go),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "c" => Ok(Language::C),
            "cpp" | "c++" | "cxx" => Ok(Language::Cpp),
            "java" => Ok(Language::Java),
            "python" | "py" | "python3" => Ok(Language::Python),
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            "typescript" | "ts" => Ok(Language::TypeScript),
            "rust" | "rs" => Ok(Language::Rust),
            "go" | "golang" => Ok(Language::Go),
            other => Err(anyhow::anyhow!("Unsupported language '{}'", other)),
        }
    }
}

/// A program submitted for grading. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    language: Language,
    source: String,
    stdin: String,
}

impl Submission {
    pub fn new(language: Language, source: impl Into<String>, stdin: impl Into<String>) -> Self {
        Self {
            language,
            source: source.into(),
            stdin: stdin.into(),
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn stdin(&self) -> &str {
        &self.stdin
    }
}

/// Outcome of one program run, as reported by the execution service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub wall_time_ms: u64,
}

/// Which of the two programs a record refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Reference,
    Candidate,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Reference => write!(f, "reference"),
            Side::Candidate => write!(f, "candidate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Correct,
    Incorrect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EfficiencyRating {
    Inefficient,
    Moderate,
    Good,
    Optimal,
}

impl EfficiencyRating {
    pub fn as_str(&self) -> &'static str {
        match self {
            EfficiencyRating::Inefficient => "INEFFICIENT",
            EfficiencyRating::Moderate => "MODERATE",
            EfficiencyRating::Good => "GOOD",
            EfficiencyRating::Optimal => "OPTIMAL",
        }
    }
}

/// Why the engine reached its verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonCode {
    Verified,
    JudgmentVerifiedCheating,
    LogicMismatch,
    OutputMismatch,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Verified => "verified",
            ReasonCode::JudgmentVerifiedCheating => "judgment-verified cheating",
            ReasonCode::LogicMismatch => "logic mismatch",
            ReasonCode::OutputMismatch => "output mismatch",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewOrigin {
    Early,
    Final,
}

/// Non-terminal marker asking a human to adjudicate a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewFlag {
    pub flagged: bool,
    pub reason: String,
    pub origin: ReviewOrigin,
}

impl ReviewFlag {
    pub fn raise(origin: ReviewOrigin, reason: impl Into<String>) -> Self {
        Self {
            flagged: true,
            reason: reason.into(),
            origin,
        }
    }
}

/// Comparator evidence, including any override applied by the early judgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparatorSignal {
    pub reference_profile: OperationProfile,
    pub candidate_profile: OperationProfile,
    pub reference_extraction_failed: bool,
    pub candidate_extraction_failed: bool,
    /// Verdict exactly as the comparator produced it.
    pub verdict: LogicVerdict,
    /// Status after the early judgment pass.
    pub effective_status: ComparatorStatus,
    pub overridden: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JudgmentPass {
    Early,
    Final,
}

/// One judgment invocation: what came back and what the engine did with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgmentSignal {
    pub pass: JudgmentPass,
    pub outcome: JudgmentOutcome,
    /// The result the policy was evaluated against (heuristic fallback for
    /// unparseable responses, `None` when the service was unavailable).
    pub effective: Option<JudgmentResult>,
    pub action: PolicyAction,
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralSignal {
    pub reference: Option<StructuralFeatures>,
    pub candidate: Option<StructuralFeatures>,
}

/// First run whose outputs differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMismatch {
    pub input_index: usize,
    pub stdout_matches: bool,
    pub reference_exit_code: i32,
    pub candidate_exit_code: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSignal {
    pub runs: usize,
    pub matched: bool,
    pub mismatch: Option<OutputMismatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    InstructionCount,
    WallTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSignal {
    pub reference_wall_time_ms: u64,
    pub candidate_wall_time_ms: u64,
    pub reference_instructions: u32,
    pub candidate_instructions: u32,
    pub raw_score: f64,
    pub adjusted_score: f64,
    pub score_source: ScoreSource,
}

/// Raw evidence behind a verdict, kept for auditability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Signals {
    pub comparator: Option<ComparatorSignal>,
    pub judgment: Option<JudgmentSignal>,
    pub output: Option<OutputSignal>,
    pub structural: Option<StructuralSignal>,
    pub semantic: Option<SemanticAdjustment>,
    pub performance: Option<PerformanceSignal>,
}

/// Final answer for one verification request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub verdict: Verdict,
    pub reason: ReasonCode,
    /// `None` when a terminal INCORRECT outcome skipped scoring.
    pub efficiency_rating: Option<EfficiencyRating>,
    pub flagged_for_review: bool,
    pub review_reason: Option<String>,
    pub review_origin: Option<ReviewOrigin>,
    pub signals: Signals,
}
