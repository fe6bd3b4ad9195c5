//! Decision engine
//!
//! `Verifier::verify` is the outward entry point. It collects evidence from
//! the collaborators (program runs, IR, syntax features), concurrently where
//! the two programs are independent, then hands everything to the pipeline.
//!
//! Only execution failures abort a request. A failed extraction yields an
//! empty profile and a failed parse yields no features; both are recorded in
//! the signals.

pub mod pipeline;
pub mod policy;

use crate::cache::{CacheKey, ProfileStore, ProfiledProgram, ReferenceCache};
use crate::compare::return_statements;
use crate::config::Config;
use crate::error::VerifyError;
use crate::exec::{Executor, LocalExecutor};
use crate::ir::extract::{CommandIrExtractor, IrExtractor};
use crate::ir::IntermediateProgram;
use crate::judge::{DisabledJudge, Judge, OpenRouterJudge};
use crate::structure::{StructuralFeatures, StructuralParser, TreeSitterParser};
use crate::types::{Side, Submission, VerificationResult};
use pipeline::{Context, Evidence, RunPair, SideEvidence};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// External services the engine depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub executor: Arc<dyn Executor>,
    pub extractor: Arc<dyn IrExtractor>,
    pub parser: Arc<dyn StructuralParser>,
    pub judge: Arc<dyn Judge>,
    pub cache: Arc<dyn ProfileStore>,
}

impl Collaborators {
    /// Local toolchains, tree-sitter, and the configured judgment service.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let judge: Arc<dyn Judge> = if config.judgment.enabled {
            let judge = OpenRouterJudge::new(config.judgment.clone())?;
            if !judge.has_credentials() {
                warn!("No judgment API key found; ambiguous cases will run degraded");
            }
            Arc::new(judge)
        } else {
            Arc::new(DisabledJudge)
        };

        Ok(Self {
            executor: Arc::new(LocalExecutor::new(config.exec.clone())),
            extractor: Arc::new(CommandIrExtractor::new(config.extract.clone())),
            parser: Arc::new(TreeSitterParser),
            judge,
            cache: Arc::new(ReferenceCache::new()),
        })
    }
}

pub struct Verifier {
    config: Config,
    services: Collaborators,
}

impl Verifier {
    pub fn new(config: Config, services: Collaborators) -> Self {
        Self { config, services }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Grade `candidate` against `reference` on `test_inputs` (default: the
    /// reference submission's stdin).
    pub async fn verify(
        &self,
        reference: &Submission,
        candidate: &Submission,
        test_inputs: Option<&[String]>,
    ) -> Result<VerificationResult, VerifyError> {
        let inputs: Vec<&str> = match test_inputs {
            Some(inputs) if !inputs.is_empty() => inputs.iter().map(String::as_str).collect(),
            _ => vec![reference.stdin()],
        };
        debug!(
            language = %candidate.language(),
            inputs = inputs.len(),
            "verification started"
        );

        let (runs, reference_ir, candidate_ir, reference_features, candidate_features) = tokio::join!(
            self.run_all(reference, candidate, &inputs),
            self.reference_ir(reference),
            self.extract_ir(candidate, Side::Candidate),
            self.features(reference, Side::Reference),
            self.features(candidate, Side::Candidate),
        );
        let runs = runs?;

        let (reference_ir, reference_failed) = reference_ir;
        let (candidate_ir, candidate_failed) = candidate_ir;
        let candidate_returns = return_statements(candidate.source(), &candidate_ir.program);
        let evidence = Evidence {
            reference: SideEvidence {
                ir: reference_ir,
                extraction_failed: reference_failed,
                features: reference_features,
            },
            candidate: SideEvidence {
                ir: candidate_ir,
                extraction_failed: candidate_failed,
                features: candidate_features,
            },
            candidate_returns,
            runs,
        };

        let ctx = Context {
            reference,
            candidate,
            evidence: &evidence,
            judge: self.services.judge.as_ref(),
            config: &self.config,
        };
        let result = pipeline::run(&ctx).await?;
        info!(
            verdict = ?result.verdict,
            reason = result.reason.as_str(),
            rating = ?result.efficiency_rating,
            flagged = result.flagged_for_review,
            "verification finished"
        );
        Ok(result)
    }

    /// Run both programs on every input; the two runs for one input overlap.
    async fn run_all(
        &self,
        reference: &Submission,
        candidate: &Submission,
        inputs: &[&str],
    ) -> Result<Vec<RunPair>, VerifyError> {
        let executor = &self.services.executor;
        let mut runs = Vec::with_capacity(inputs.len());
        for stdin in inputs {
            let (reference_run, candidate_run) = tokio::join!(
                executor.execute(reference.language(), reference.source(), stdin),
                executor.execute(candidate.language(), candidate.source(), stdin),
            );
            runs.push(RunPair {
                reference: reference_run.map_err(|e| VerifyError::execution(Side::Reference, &e))?,
                candidate: candidate_run.map_err(|e| VerifyError::execution(Side::Candidate, &e))?,
            });
        }
        Ok(runs)
    }

    /// Reference IR through the cache. Only successful extractions are cached.
    async fn reference_ir(&self, reference: &Submission) -> (Arc<ProfiledProgram>, bool) {
        let key = CacheKey::for_source(reference.source(), reference.language());
        if let Some(hit) = self.services.cache.get(&key) {
            return (hit, false);
        }

        let (ir, failed) = self.extract_ir(reference, Side::Reference).await;
        if !failed {
            self.services
                .cache
                .put(key, Arc::clone(&ir), self.config.cache.ttl());
        }
        (ir, failed)
    }

    /// Extract and profile; failure degrades to an empty program.
    async fn extract_ir(&self, submission: &Submission, side: Side) -> (Arc<ProfiledProgram>, bool) {
        let extracted = self
            .services
            .extractor
            .extract(submission.language(), submission.source())
            .await;
        let program = match extracted {
            Ok(lines) => IntermediateProgram::from_lines(&lines),
            Err(err) => {
                warn!(side = %side, "IR extraction failed: {:#}", err);
                return (Arc::new(ProfiledProgram::new(IntermediateProgram::empty())), true);
            }
        };
        if program.is_empty() {
            warn!(side = %side, "IR extraction produced no instructions");
            return (Arc::new(ProfiledProgram::new(program)), true);
        }
        (Arc::new(ProfiledProgram::new(program)), false)
    }

    async fn features(&self, submission: &Submission, side: Side) -> Option<StructuralFeatures> {
        match self
            .services
            .parser
            .parse(submission.language(), submission.source())
            .await
        {
            Ok(features) => Some(features),
            Err(err) => {
                debug!(side = %side, "structural parse unavailable: {:#}", err);
                None
            }
        }
    }
}
