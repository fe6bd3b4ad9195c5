//! End-to-end verification scenarios with in-memory collaborators.

use arbiter::cache::ReferenceCache;
use arbiter::compare::ComparatorStatus;
use arbiter::config::Config;
use arbiter::engine::policy::PolicyAction;
use arbiter::exec::Executor;
use arbiter::ir::extract::IrExtractor;
use arbiter::judge::{
    DisabledJudge, Judge, JudgmentOutcome, JudgmentRequest, JudgmentResult, Recommendation,
};
use arbiter::structure::TreeSitterParser;
use arbiter::types::{
    EfficiencyRating, ExecutionResult, JudgmentPass, Language, ReasonCode, ReviewOrigin, Side,
    Verdict,
};
use arbiter::{Collaborators, Submission, Verifier, VerifyError};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════
//  FAKES
// ═══════════════════════════════════════════════════════════════════════════

type RunFn = dyn Fn(&str, &str) -> anyhow::Result<String> + Send + Sync;

/// Executes nothing; stdout comes from a closure over (source, stdin).
struct ScriptedExecutor {
    run: Box<RunFn>,
}

impl ScriptedExecutor {
    fn new(run: impl Fn(&str, &str) -> anyhow::Result<String> + Send + Sync + 'static) -> Self {
        Self { run: Box::new(run) }
    }

    /// Every program prints the sum of the two numbers on stdin.
    fn summing() -> Self {
        Self::new(|_, stdin| Ok(sum_of(stdin)))
    }
}

fn sum_of(stdin: &str) -> String {
    let total: i64 = stdin
        .split_whitespace()
        .filter_map(|n| n.parse::<i64>().ok())
        .sum();
    format!("{}\n", total)
}

impl Executor for ScriptedExecutor {
    fn execute<'a>(
        &'a self,
        _language: Language,
        source: &'a str,
        stdin: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<ExecutionResult>> {
        let result = (self.run)(source, stdin).map(|stdout| ExecutionResult {
            stdout,
            stderr: String::new(),
            exit_code: 0,
            wall_time_ms: 12,
        });
        Box::pin(async move { result })
    }
}

/// Returns canned IR per source and counts calls per source.
#[derive(Default)]
struct CountingExtractor {
    ir: HashMap<String, Vec<String>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl CountingExtractor {
    fn with(mut self, source: &str, ir: &str) -> Self {
        self.ir
            .insert(source.to_string(), ir.lines().map(str::to_string).collect());
        self
    }

    fn calls_for(&self, source: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(source)
            .copied()
            .unwrap_or(0)
    }
}

impl IrExtractor for CountingExtractor {
    fn extract<'a>(
        &'a self,
        _language: Language,
        source: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Vec<String>>> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(source.to_string())
            .or_insert(0) += 1;
        let result = self
            .ir
            .get(source)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("clang: error: unsupported program"));
        Box::pin(async move { result })
    }
}

struct ScriptedJudge {
    outcome: JudgmentOutcome,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedJudge {
    fn new(outcome: JudgmentOutcome) -> Self {
        Self {
            outcome,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn says(legitimate: bool, confidence: u8, rationale: &str) -> Self {
        Self::new(JudgmentOutcome::Ok(JudgmentResult {
            legitimate,
            confidence,
            reason: "scripted judgment".to_string(),
            rationale: rationale.to_string(),
            indicators: vec![],
            recommendation: if legitimate {
                Recommendation::Pass
            } else {
                Recommendation::Fail
            },
            degraded: false,
        }))
    }

    fn hanging(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::says(true, 100, "never delivered")
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Judge for ScriptedJudge {
    fn judge<'a>(&'a self, _request: &'a JudgmentRequest) -> BoxFuture<'a, JudgmentOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.outcome.clone()
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  PROGRAMS
// ═══════════════════════════════════════════════════════════════════════════

const REFERENCE: &str = "def solve(a, b):\n    return a + b\n";
const REFERENCE_IR: &str = "\
define i32 @solve(i32 %0, i32 %1) {
  %3 = alloca i32
  %4 = alloca i32
  store i32 %0, ptr %3
  store i32 %1, ptr %4
  %5 = load i32, ptr %3
  %6 = load i32, ptr %4
  %7 = add nsw i32 %5, %6
  ret i32 %7
}";

const TEMPORARY: &str = "def solve(a, b):\n    total = a + b\n    return total\n";
const TEMPORARY_IR: &str = "\
define i32 @solve(i32 %0, i32 %1) {
  %3 = alloca i32
  %4 = alloca i32
  %5 = alloca i32
  store i32 %0, ptr %3
  store i32 %1, ptr %4
  %6 = load i32, ptr %3
  %7 = load i32, ptr %4
  %8 = add nsw i32 %6, %7
  store i32 %8, ptr %5
  %9 = load i32, ptr %5
  ret i32 %9
}";

const CONSTANT: &str = "def solve(a, b):\n    return 8\n";
const CONSTANT_IR: &str = "\
define i32 @solve(i32 %0, i32 %1) {
  %3 = alloca i32
  %4 = alloca i32
  store i32 %0, ptr %3
  store i32 %1, ptr %4
  ret i32 8
}";

const SPECIAL_CASED: &str = "\
def solve(a, b):
    if a == 5 and b == 3:
        return 8
    return a + b
";
const SPECIAL_CASED_IR: &str = "\
define i32 @solve(i32 %0, i32 %1) {
entry:
  %3 = icmp eq i32 %0, 5
  %4 = icmp eq i32 %1, 3
  %5 = and i1 %3, %4
  br i1 %5, label %special, label %general
special:
  ret i32 8
general:
  %6 = add nsw i32 %0, %1
  ret i32 %6
}";

const MAX_REFERENCE: &str = "def solve(a, b):\n    return a if a > b else b\n";
const MAX_REFERENCE_IR: &str = "\
define i32 @solve(i32 %0, i32 %1) {
  %3 = icmp sgt i32 %0, %1
  %4 = select i1 %3, i32 %0, i32 %1
  ret i32 %4
}";
const FIRST_ONLY: &str = "def solve(a, b):\n    return a\n";
const FIRST_ONLY_IR: &str = "\
define i32 @solve(i32 %0, i32 %1) {
  ret i32 %0
}";

fn extractor() -> CountingExtractor {
    CountingExtractor::default()
        .with(REFERENCE, REFERENCE_IR)
        .with(TEMPORARY, TEMPORARY_IR)
        .with(CONSTANT, CONSTANT_IR)
        .with(SPECIAL_CASED, SPECIAL_CASED_IR)
        .with(MAX_REFERENCE, MAX_REFERENCE_IR)
        .with(FIRST_ONLY, FIRST_ONLY_IR)
}

fn submission(source: &str) -> Submission {
    Submission::new(Language::Python, source, "5 3\n")
}

struct Harness {
    verifier: Verifier,
    extractor: Arc<CountingExtractor>,
    judge: Arc<ScriptedJudge>,
    cache: Arc<ReferenceCache>,
}

fn harness_with(
    config: Config,
    executor: ScriptedExecutor,
    extractor: CountingExtractor,
    judge: ScriptedJudge,
) -> Harness {
    let extractor = Arc::new(extractor);
    let judge = Arc::new(judge);
    let cache = Arc::new(ReferenceCache::new());
    let services = Collaborators {
        executor: Arc::new(executor),
        extractor: extractor.clone(),
        parser: Arc::new(TreeSitterParser),
        judge: judge.clone(),
        cache: cache.clone(),
    };
    Harness {
        verifier: Verifier::new(config, services),
        extractor,
        judge,
        cache,
    }
}

fn harness(judge: ScriptedJudge) -> Harness {
    harness_with(Config::default(), ScriptedExecutor::summing(), extractor(), judge)
}

// ═══════════════════════════════════════════════════════════════════════════
//  PROPERTIES
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_identical_source_is_optimal_and_unflagged() {
    let h = harness(ScriptedJudge::says(true, 95, "same program"));
    let result = h
        .verifier
        .verify(&submission(REFERENCE), &submission(REFERENCE), None)
        .await
        .unwrap();

    assert_eq!(result.verdict, Verdict::Correct);
    assert_eq!(result.reason, ReasonCode::Verified);
    assert_eq!(result.efficiency_rating, Some(EfficiencyRating::Optimal));
    assert!(!result.flagged_for_review);
    assert_eq!(h.judge.calls(), 1);
    assert_eq!(
        result.signals.judgment.as_ref().unwrap().pass,
        JudgmentPass::Final
    );
}

#[tokio::test]
async fn test_identity_holds_without_judgment_service() {
    let services = Collaborators {
        executor: Arc::new(ScriptedExecutor::summing()),
        extractor: Arc::new(extractor()),
        parser: Arc::new(TreeSitterParser),
        judge: Arc::new(DisabledJudge),
        cache: Arc::new(ReferenceCache::new()),
    };
    let verifier = Verifier::new(Config::default(), services);
    let result = verifier
        .verify(&submission(REFERENCE), &submission(REFERENCE), None)
        .await
        .unwrap();
    assert_eq!(result.verdict, Verdict::Correct);
    assert_eq!(result.efficiency_rating, Some(EfficiencyRating::Optimal));
    assert!(!result.flagged_for_review);
    assert!(result.signals.judgment.unwrap().degraded);
}

#[tokio::test]
async fn test_missing_operation_fails_even_with_matching_output() {
    // Input where the first number is the larger one, so `return a` prints
    // the same thing as `max(a, b)`.
    let executor = ScriptedExecutor::new(|_, stdin| {
        let first = stdin.split_whitespace().next().unwrap_or("0");
        Ok(format!("{}\n", first))
    });
    let h = harness_with(
        Config::default(),
        executor,
        extractor(),
        ScriptedJudge::says(true, 40, "unsure"),
    );
    let result = h
        .verifier
        .verify(&submission(MAX_REFERENCE), &submission(FIRST_ONLY), None)
        .await
        .unwrap();

    assert_eq!(result.verdict, Verdict::Incorrect);
    assert_eq!(result.reason, ReasonCode::LogicMismatch);
    let comparator = result.signals.comparator.unwrap();
    assert_eq!(comparator.verdict.status, ComparatorStatus::Failed);
    assert!(comparator
        .verdict
        .missing_ops
        .contains(&arbiter::ir::OpcodeClass::Compare));
    assert!(result.signals.output.is_none());
}

#[tokio::test]
async fn test_verification_is_idempotent() {
    let h = harness(ScriptedJudge::says(false, 70, "special-cases the sample"));
    let reference = submission(REFERENCE);
    let candidate = submission(SPECIAL_CASED);

    let first = h.verifier.verify(&reference, &candidate, None).await.unwrap();
    let second = h.verifier.verify(&reference, &candidate, None).await.unwrap();
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[tokio::test]
async fn test_judgment_threshold_boundaries() {
    // A failed comparator sends every case through the early pass.
    let cases = [
        (85, ReasonCode::JudgmentVerifiedCheating, false, PolicyAction::AutoFail),
        (84, ReasonCode::LogicMismatch, true, PolicyAction::Flag),
        (59, ReasonCode::LogicMismatch, false, PolicyAction::NoAction),
    ];
    for (confidence, reason, flagged, action) in cases {
        let h = harness(ScriptedJudge::says(false, confidence, "gaming"));
        let result = h
            .verifier
            .verify(&submission(REFERENCE), &submission(CONSTANT), None)
            .await
            .unwrap();
        assert_eq!(result.verdict, Verdict::Incorrect, "confidence {}", confidence);
        assert_eq!(result.reason, reason, "confidence {}", confidence);
        assert_eq!(result.flagged_for_review, flagged, "confidence {}", confidence);
        let judgment = result.signals.judgment.unwrap();
        assert_eq!(judgment.pass, JudgmentPass::Early);
        assert_eq!(judgment.action, action, "confidence {}", confidence);
    }
}

#[tokio::test]
async fn test_reference_is_extracted_once_per_ttl_window() {
    let h = harness(ScriptedJudge::says(true, 90, "fine"));
    let reference = submission(REFERENCE);

    h.verifier
        .verify(&reference, &submission(TEMPORARY), None)
        .await
        .unwrap();
    h.verifier
        .verify(&reference, &submission(SPECIAL_CASED), None)
        .await
        .unwrap();

    assert_eq!(h.extractor.calls_for(REFERENCE), 1);
    assert_eq!(h.extractor.calls_for(TEMPORARY), 1);
    assert_eq!(h.extractor.calls_for(SPECIAL_CASED), 1);
    let stats = h.cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.entries, 1);
}

#[tokio::test]
async fn test_failed_reference_extraction_is_not_cached() {
    let h = harness_with(
        Config::default(),
        ScriptedExecutor::summing(),
        CountingExtractor::default(),
        ScriptedJudge::says(true, 30, "no idea"),
    );
    let reference = submission(REFERENCE);
    for _ in 0..2 {
        h.verifier
            .verify(&reference, &submission(TEMPORARY), None)
            .await
            .unwrap();
    }
    assert_eq!(h.extractor.calls_for(REFERENCE), 2);
    assert_eq!(h.cache.stats().entries, 0);
}

// ═══════════════════════════════════════════════════════════════════════════
//  GRADING CASES
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_temporary_variable_gets_semantic_bonus() {
    let h = harness(ScriptedJudge::says(true, 95, "stylistic change"));
    let result = h
        .verifier
        .verify(&submission(REFERENCE), &submission(TEMPORARY), None)
        .await
        .unwrap();

    assert_eq!(result.verdict, Verdict::Correct);
    assert!(result.efficiency_rating >= Some(EfficiencyRating::Good));
    let semantic = result.signals.semantic.unwrap();
    assert!(semantic.equivalent, "{}", semantic.reason);
    assert!(semantic.bonus_percent > 0.0);
    let performance = result.signals.performance.unwrap();
    assert!(performance.adjusted_score > performance.raw_score);
}

#[tokio::test]
async fn test_hardcoded_constant_is_logic_mismatch() {
    let h = harness_with(
        Config::default(),
        ScriptedExecutor::new(|source, stdin| {
            Ok(if source.contains("return 8") {
                "8\n".to_string()
            } else {
                sum_of(stdin)
            })
        }),
        extractor(),
        ScriptedJudge::new(JudgmentOutcome::TransportError {
            cause: "unavailable".to_string(),
        }),
    );
    let result = h
        .verifier
        .verify(&submission(REFERENCE), &submission(CONSTANT), None)
        .await
        .unwrap();

    assert_eq!(result.verdict, Verdict::Incorrect);
    assert_eq!(result.reason, ReasonCode::LogicMismatch);
    let comparator = result.signals.comparator.unwrap();
    assert_eq!(comparator.verdict.hardcoded_constant.as_deref(), Some("8"));
    assert_eq!(result.efficiency_rating, None);
}

#[tokio::test]
async fn test_special_cased_input_is_flagged_for_review() {
    let rationale = "The branch on a == 5 and b == 3 returns the expected answer directly.";
    let h = harness(ScriptedJudge::says(false, 70, rationale));
    let result = h
        .verifier
        .verify(&submission(REFERENCE), &submission(SPECIAL_CASED), None)
        .await
        .unwrap();

    assert_eq!(result.verdict, Verdict::Correct);
    assert!(result.flagged_for_review);
    assert_eq!(result.review_origin, Some(ReviewOrigin::Final));
    assert!(result.review_reason.unwrap().contains(rationale));
    assert_eq!(h.judge.calls(), 1);
}

#[tokio::test]
async fn test_judgment_timeout_degrades() {
    let mut config = Config::default();
    config.judgment.timeout_secs = 1;
    let h = harness_with(
        config,
        ScriptedExecutor::summing(),
        // No IR for anything: both profiles are empty.
        CountingExtractor::default(),
        ScriptedJudge::hanging(Duration::from_secs(30)),
    );
    let result = h
        .verifier
        .verify(&submission(REFERENCE), &submission(TEMPORARY), None)
        .await
        .unwrap();

    let comparator = result.signals.comparator.as_ref().unwrap();
    assert_eq!(comparator.verdict.status, ComparatorStatus::Undetermined);
    assert!(comparator.reference_extraction_failed);
    assert!(comparator.candidate_extraction_failed);
    let judgment = result.signals.judgment.as_ref().unwrap();
    assert!(judgment.degraded);
    assert!(matches!(
        judgment.outcome,
        JudgmentOutcome::TransportError { .. }
    ));
    assert_eq!(result.verdict, Verdict::Correct);
    assert!(result.flagged_for_review);
    assert_eq!(result.review_origin, Some(ReviewOrigin::Early));
}

#[tokio::test]
async fn test_failed_reference_extraction_escalates_to_judgment() {
    let h = harness_with(
        Config::default(),
        ScriptedExecutor::summing(),
        CountingExtractor::default().with(CONSTANT, CONSTANT_IR),
        ScriptedJudge::new(JudgmentOutcome::TransportError {
            cause: "unavailable".to_string(),
        }),
    );
    let result = h
        .verifier
        .verify(&submission(REFERENCE), &submission(CONSTANT), None)
        .await
        .unwrap();

    let comparator = result.signals.comparator.as_ref().unwrap();
    assert!(comparator.reference_extraction_failed);
    assert!(!comparator.candidate_extraction_failed);
    assert_eq!(comparator.verdict.status, ComparatorStatus::Undetermined);
    assert!(comparator.verdict.reason.contains("reference"));
    assert_eq!(
        result.signals.judgment.as_ref().unwrap().pass,
        JudgmentPass::Early
    );
    assert!(result.flagged_for_review);
    assert_eq!(result.review_origin, Some(ReviewOrigin::Early));
    assert_eq!(h.judge.calls(), 1);
}

#[tokio::test]
async fn test_failed_reference_extraction_lets_judgment_fail_hardcoding() {
    let h = harness_with(
        Config::default(),
        ScriptedExecutor::summing(),
        CountingExtractor::default().with(CONSTANT, CONSTANT_IR),
        ScriptedJudge::says(false, 92, "returns the sample answer"),
    );
    let result = h
        .verifier
        .verify(&submission(REFERENCE), &submission(CONSTANT), None)
        .await
        .unwrap();

    assert_eq!(result.verdict, Verdict::Incorrect);
    assert_eq!(result.reason, ReasonCode::JudgmentVerifiedCheating);
}

#[tokio::test]
async fn test_failed_candidate_extraction_is_not_a_logic_mismatch() {
    let h = harness_with(
        Config::default(),
        ScriptedExecutor::summing(),
        CountingExtractor::default().with(REFERENCE, REFERENCE_IR),
        ScriptedJudge::new(JudgmentOutcome::TransportError {
            cause: "unavailable".to_string(),
        }),
    );
    let result = h
        .verifier
        .verify(&submission(REFERENCE), &submission(TEMPORARY), None)
        .await
        .unwrap();

    let comparator = result.signals.comparator.as_ref().unwrap();
    assert!(!comparator.reference_extraction_failed);
    assert!(comparator.candidate_extraction_failed);
    assert_eq!(comparator.verdict.status, ComparatorStatus::Undetermined);
    assert!(comparator.verdict.reason.contains("candidate"));
    assert_eq!(result.verdict, Verdict::Correct);
    assert_eq!(result.reason, ReasonCode::Verified);
    assert!(result.flagged_for_review);
    assert_eq!(result.review_origin, Some(ReviewOrigin::Early));
    assert_eq!(
        result.signals.performance.unwrap().score_source,
        arbiter::types::ScoreSource::WallTime
    );
}

// ═══════════════════════════════════════════════════════════════════════════
//  INPUTS AND FAILURES
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_every_test_input_must_match() {
    let h = harness_with(
        Config::default(),
        ScriptedExecutor::new(|source, stdin| {
            Ok(if source.contains("return 8") {
                "8\n".to_string()
            } else {
                sum_of(stdin)
            })
        }),
        extractor(),
        // Confident override so the comparator failure does not end the run early.
        ScriptedJudge::says(true, 90, "looks fine"),
    );
    let inputs = vec!["5 3\n".to_string(), "1 1\n".to_string()];
    let result = h
        .verifier
        .verify(&submission(REFERENCE), &submission(CONSTANT), Some(inputs.as_slice()))
        .await
        .unwrap();

    assert_eq!(result.verdict, Verdict::Incorrect);
    assert_eq!(result.reason, ReasonCode::OutputMismatch);
    let output = result.signals.output.unwrap();
    assert_eq!(output.runs, 2);
    assert_eq!(output.mismatch.unwrap().input_index, 1);
}

#[tokio::test]
async fn test_candidate_execution_failure_is_an_error() {
    let h = harness_with(
        Config::default(),
        ScriptedExecutor::new(|source, stdin| {
            if source == TEMPORARY {
                Err(anyhow::anyhow!("SyntaxError: invalid syntax"))
            } else {
                Ok(sum_of(stdin))
            }
        }),
        extractor(),
        ScriptedJudge::says(true, 90, "fine"),
    );
    let err = h
        .verifier
        .verify(&submission(REFERENCE), &submission(TEMPORARY), None)
        .await
        .unwrap_err();
    match err {
        VerifyError::Execution { side, message } => {
            assert_eq!(side, Side::Candidate);
            assert!(message.contains("SyntaxError"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(h.judge.calls(), 0);
}
