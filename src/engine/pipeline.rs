//! Verification pipeline
//!
//! Compare -> (JudgeEarly) -> CheckOutput -> (JudgeFinal) -> Score. Each stage
//! takes the state by value and either hands it on or ends the run with a
//! result. Evidence (runs, IR, syntax features) is gathered up front, so the
//! only suspension points in here are the judgment calls.

use super::policy::{band_efficiency, threshold_policy, PolicyAction};
use crate::cache::ProfiledProgram;
use crate::compare::{compare, ComparatorStatus, LogicVerdict, ReturnStatement};
use crate::config::Config;
use crate::error::VerifyError;
use crate::judge::parse::heuristic_judgment;
use crate::judge::{Judge, JudgmentOutcome, JudgmentRequest, ProgramEvidence};
use crate::semantic::{adjusted_score, analyze, instruction_similarity, wall_time_similarity};
use crate::structure::StructuralFeatures;
use crate::types::{
    ComparatorSignal, EfficiencyRating, ExecutionResult, JudgmentPass, JudgmentSignal,
    OutputMismatch, OutputSignal, PerformanceSignal, ReasonCode, ReviewFlag, ReviewOrigin,
    ScoreSource, Signals, StructuralSignal, Submission, Verdict, VerificationResult,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// IR and syntax evidence for one program.
#[derive(Debug, Clone)]
pub struct SideEvidence {
    /// Empty when extraction failed.
    pub ir: Arc<ProfiledProgram>,
    pub extraction_failed: bool,
    pub features: Option<StructuralFeatures>,
}

/// Both programs run on the same input.
#[derive(Debug, Clone)]
pub struct RunPair {
    pub reference: ExecutionResult,
    pub candidate: ExecutionResult,
}

/// Everything collected from collaborators before the pipeline starts.
#[derive(Debug, Clone)]
pub struct Evidence {
    pub reference: SideEvidence,
    pub candidate: SideEvidence,
    pub candidate_returns: Vec<ReturnStatement>,
    pub runs: Vec<RunPair>,
}

pub struct Context<'a> {
    pub reference: &'a Submission,
    pub candidate: &'a Submission,
    pub evidence: &'a Evidence,
    pub judge: &'a dyn Judge,
    pub config: &'a Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Compare,
    JudgeEarly,
    CheckOutput,
    JudgeFinal,
    Score,
}

#[derive(Debug, Clone)]
pub struct PipelineState {
    pub stage: Stage,
    pub signals: Signals,
    pub early_judged: bool,
    pub review: Option<ReviewFlag>,
}

pub enum Step {
    Continue(PipelineState),
    Terminal(VerificationResult),
}

impl PipelineState {
    pub fn new(evidence: &Evidence) -> Self {
        let signals = Signals {
            structural: Some(StructuralSignal {
                reference: evidence.reference.features.clone(),
                candidate: evidence.candidate.features.clone(),
            }),
            ..Signals::default()
        };
        Self {
            stage: Stage::Compare,
            signals,
            early_judged: false,
            review: None,
        }
    }

    fn advance(mut self, stage: Stage) -> Step {
        self.stage = stage;
        Step::Continue(self)
    }

    fn finish(self, verdict: Verdict, reason: ReasonCode, rating: Option<EfficiencyRating>) -> Step {
        let (review_reason, review_origin) = match self.review {
            Some(flag) if flag.flagged => (Some(flag.reason), Some(flag.origin)),
            _ => (None, None),
        };
        Step::Terminal(VerificationResult {
            verdict,
            reason,
            efficiency_rating: rating,
            flagged_for_review: review_reason.is_some(),
            review_reason,
            review_origin,
            signals: self.signals,
        })
    }

    fn internal(self, message: impl Into<String>) -> VerifyError {
        VerifyError::Internal {
            message: message.into(),
            signals: Box::new(self.signals),
        }
    }

    /// Keep the first flag raised; early and final never both fire anyway.
    fn raise_review(&mut self, origin: ReviewOrigin, reason: String) {
        if self.review.is_none() {
            self.review = Some(ReviewFlag::raise(origin, reason));
        }
    }
}

/// Drive the stages until one produces a result.
pub async fn run(ctx: &Context<'_>) -> Result<VerificationResult, VerifyError> {
    let mut state = PipelineState::new(ctx.evidence);
    loop {
        let stage = state.stage;
        debug!(?stage, "pipeline stage");
        let step = match stage {
            Stage::Compare => compare_stage(ctx, state),
            Stage::JudgeEarly => judge_early_stage(ctx, state).await,
            Stage::CheckOutput => check_output_stage(ctx, state),
            Stage::JudgeFinal => judge_final_stage(ctx, state).await,
            Stage::Score => score_stage(ctx, state),
        }?;
        match step {
            Step::Continue(next) => state = next,
            Step::Terminal(result) => return Ok(result),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  STAGES
// ═══════════════════════════════════════════════════════════════════════════

pub fn compare_stage(ctx: &Context<'_>, mut state: PipelineState) -> Result<Step, VerifyError> {
    let evidence = ctx.evidence;
    // A profile from a failed extraction is all zeros, not evidence.
    let verdict = match (
        evidence.reference.extraction_failed,
        evidence.candidate.extraction_failed,
    ) {
        (false, false) => compare(
            &evidence.reference.ir.profile,
            &evidence.candidate.ir.profile,
            &evidence.candidate_returns,
        ),
        (true, true) => LogicVerdict::undetermined("IR extraction failed for both programs"),
        (true, false) => LogicVerdict::undetermined("IR extraction failed for the reference"),
        (false, true) => LogicVerdict::undetermined("IR extraction failed for the candidate"),
    };
    debug!(status = verdict.status.as_str(), reason = %verdict.reason, "comparator verdict");

    let next = if verdict.passed() {
        Stage::CheckOutput
    } else {
        Stage::JudgeEarly
    };
    state.signals.comparator = Some(ComparatorSignal {
        reference_profile: evidence.reference.ir.profile.clone(),
        candidate_profile: evidence.candidate.ir.profile.clone(),
        reference_extraction_failed: evidence.reference.extraction_failed,
        candidate_extraction_failed: evidence.candidate.extraction_failed,
        effective_status: verdict.status,
        overridden: false,
        verdict,
    });
    Ok(state.advance(next))
}

pub async fn judge_early_stage(
    ctx: &Context<'_>,
    mut state: PipelineState,
) -> Result<Step, VerifyError> {
    let Some(verdict) = state.signals.comparator.as_ref().map(|c| c.verdict.clone()) else {
        return Err(state.internal("early judgment reached before the comparator ran"));
    };

    let signal = consult(ctx, &verdict, JudgmentPass::Early).await;
    state.early_judged = true;

    let mut status = verdict.status;
    let mut overridden = false;
    match (signal.action, signal.effective.as_ref()) {
        (PolicyAction::AutoFail, _) => {
            status = ComparatorStatus::Failed;
            overridden = verdict.status != ComparatorStatus::Failed;
        }
        (PolicyAction::Flag, Some(result)) => {
            state.raise_review(
                ReviewOrigin::Early,
                format!("judgment suspects gaming: {}", result.explanation()),
            );
        }
        (PolicyAction::Override, _) => {
            status = ComparatorStatus::Passed;
            overridden = true;
        }
        _ => {}
    }
    let action = signal.action;
    let degraded = signal.degraded;
    state.signals.judgment = Some(signal);
    if let Some(comparator) = state.signals.comparator.as_mut() {
        comparator.effective_status = status;
        comparator.overridden = overridden;
    }

    if action == PolicyAction::AutoFail {
        info!("judgment verified cheating; failing candidate");
        return Ok(state.finish(Verdict::Incorrect, ReasonCode::JudgmentVerifiedCheating, None));
    }
    match status {
        ComparatorStatus::Failed => {
            Ok(state.finish(Verdict::Incorrect, ReasonCode::LogicMismatch, None))
        }
        ComparatorStatus::Undetermined => {
            // Unresolved: let the outputs decide, but never without a human look.
            let reason = if degraded {
                "operation profiles unavailable and judgment unavailable".to_string()
            } else {
                "operation profiles unavailable and judgment was not decisive".to_string()
            };
            warn!(%reason, "comparator undetermined");
            state.raise_review(ReviewOrigin::Early, reason);
            Ok(state.advance(Stage::CheckOutput))
        }
        ComparatorStatus::Passed => Ok(state.advance(Stage::CheckOutput)),
    }
}

pub fn check_output_stage(ctx: &Context<'_>, mut state: PipelineState) -> Result<Step, VerifyError> {
    let runs = &ctx.evidence.runs;
    if runs.is_empty() {
        return Err(state.internal("no program runs to compare"));
    }

    let mismatch = runs.iter().enumerate().find_map(|(input_index, run)| {
        let stdout_matches = run.reference.stdout == run.candidate.stdout;
        let exit_matches = run.reference.exit_code == run.candidate.exit_code;
        (!stdout_matches || !exit_matches).then(|| OutputMismatch {
            input_index,
            stdout_matches,
            reference_exit_code: run.reference.exit_code,
            candidate_exit_code: run.candidate.exit_code,
        })
    });
    let matched = mismatch.is_none();
    state.signals.output = Some(OutputSignal {
        runs: runs.len(),
        matched,
        mismatch,
    });

    if !matched {
        return Ok(state.finish(Verdict::Incorrect, ReasonCode::OutputMismatch, None));
    }
    let next = if state.early_judged {
        Stage::Score
    } else {
        Stage::JudgeFinal
    };
    Ok(state.advance(next))
}

pub async fn judge_final_stage(
    ctx: &Context<'_>,
    mut state: PipelineState,
) -> Result<Step, VerifyError> {
    if state.early_judged {
        return Err(state.internal("final judgment requested after an early judgment"));
    }
    let Some(verdict) = state.signals.comparator.as_ref().map(|c| c.verdict.clone()) else {
        return Err(state.internal("final judgment reached before the comparator ran"));
    };

    let signal = consult(ctx, &verdict, JudgmentPass::Final).await;
    if let (PolicyAction::Flag, Some(result)) = (signal.action, signal.effective.as_ref()) {
        state.raise_review(
            ReviewOrigin::Final,
            format!("judgment suspects gaming: {}", result.explanation()),
        );
    }
    state.signals.judgment = Some(signal);
    Ok(state.advance(Stage::Score))
}

pub fn score_stage(ctx: &Context<'_>, mut state: PipelineState) -> Result<Step, VerifyError> {
    let policy = &ctx.config.policy;
    let evidence = ctx.evidence;

    let semantic = analyze(
        ctx.reference.source(),
        ctx.candidate.source(),
        evidence.reference.features.as_ref(),
        evidence.candidate.features.as_ref(),
        policy,
    );

    let reference_wall: u64 = evidence.runs.iter().map(|r| r.reference.wall_time_ms).sum();
    let candidate_wall: u64 = evidence.runs.iter().map(|r| r.candidate.wall_time_ms).sum();
    let (raw_score, score_source) =
        match instruction_similarity(&evidence.reference.ir.profile, &evidence.candidate.ir.profile) {
            Some(score) => (score, ScoreSource::InstructionCount),
            None => (
                wall_time_similarity(reference_wall, candidate_wall),
                ScoreSource::WallTime,
            ),
        };
    let adjusted = adjusted_score(raw_score, Some(&semantic));
    if !adjusted.is_finite() {
        return Err(state.internal(format!("efficiency score is not finite ({})", adjusted)));
    }
    let rating = band_efficiency(adjusted, policy);
    debug!(
        raw_score,
        adjusted,
        equivalent = semantic.equivalent,
        rating = rating.as_str(),
        "efficiency scored"
    );

    state.signals.performance = Some(PerformanceSignal {
        reference_wall_time_ms: reference_wall,
        candidate_wall_time_ms: candidate_wall,
        reference_instructions: evidence.reference.ir.profile.total(),
        candidate_instructions: evidence.candidate.ir.profile.total(),
        raw_score,
        adjusted_score: adjusted,
        score_source,
    });
    state.signals.semantic = Some(semantic);
    Ok(state.finish(Verdict::Correct, ReasonCode::Verified, Some(rating)))
}

// ═══════════════════════════════════════════════════════════════════════════
//  JUDGMENT
// ═══════════════════════════════════════════════════════════════════════════

/// One judgment call, bounded by the configured timeout, turned into a signal.
async fn consult(ctx: &Context<'_>, verdict: &LogicVerdict, pass: JudgmentPass) -> JudgmentSignal {
    let config = &ctx.config.judgment;
    let evidence = ctx.evidence;
    let request = JudgmentRequest::build(
        ProgramEvidence {
            submission: ctx.reference,
            program: &evidence.reference.ir.program,
            profile: &evidence.reference.ir.profile,
        },
        ProgramEvidence {
            submission: ctx.candidate,
            program: &evidence.candidate.ir.program,
            profile: &evidence.candidate.ir.profile,
        },
        verdict,
        config,
    );

    let limit = Duration::from_secs(config.timeout_secs);
    let outcome = match tokio::time::timeout(limit, ctx.judge.judge(&request)).await {
        Ok(outcome) => outcome,
        Err(_) => JudgmentOutcome::TransportError {
            cause: format!("judgment timed out after {}s", config.timeout_secs),
        },
    };
    info!(pass = ?pass, outcome = outcome.label(), "judgment returned");

    evaluate(outcome, pass, &ctx.config.policy)
}

/// Apply the threshold policy to an outcome. Degraded results never act: an
/// unparseable answer is only kept for the audit trail.
pub fn evaluate(
    outcome: JudgmentOutcome,
    pass: JudgmentPass,
    policy: &crate::config::PolicyConfig,
) -> JudgmentSignal {
    let (effective, action, degraded) = match &outcome {
        JudgmentOutcome::Ok(result) => {
            let action = threshold_policy(result.confidence, result.legitimate, policy);
            (Some(result.clone()), action, false)
        }
        JudgmentOutcome::ParseError { raw } => {
            (Some(heuristic_judgment(raw)), PolicyAction::NoAction, true)
        }
        JudgmentOutcome::TransportError { cause } => {
            warn!(%cause, "judgment unavailable; continuing without it");
            (None, PolicyAction::NoAction, true)
        }
    };

    // The final pass runs on a CORRECT verdict and can only flag it.
    let action = match (pass, action) {
        (JudgmentPass::Final, PolicyAction::AutoFail | PolicyAction::Flag) => PolicyAction::Flag,
        (JudgmentPass::Final, _) => PolicyAction::NoAction,
        (JudgmentPass::Early, action) => action,
    };

    JudgmentSignal {
        pass,
        outcome,
        effective,
        action,
        degraded,
    }
}
