//! Error taxonomy for the outward `verify()` call
//!
//! Only two things abort a verification: one of the programs failing to run,
//! and an unexpected failure inside the engine itself. Extraction, parsing and
//! judgment failures are absorbed at their call boundary and show up as
//! degraded signals instead.

use crate::types::{Side, Signals};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyError {
    /// The execution service could not run one of the programs. No verdict.
    #[error("{side} program failed to execute: {message}")]
    Execution { side: Side, message: String },

    /// Something unexpected went wrong inside the engine. Carries the signals
    /// collected before the failure so the run can be reconstructed.
    #[error("internal verification error: {message}")]
    Internal {
        message: String,
        signals: Box<Signals>,
    },
}

impl VerifyError {
    pub fn execution(side: Side, err: &anyhow::Error) -> Self {
        VerifyError::Execution {
            side,
            message: format!("{:#}", err),
        }
    }

    /// Partial signal trail, when the failure happened mid-pipeline.
    pub fn signals(&self) -> Option<&Signals> {
        match self {
            VerifyError::Internal { signals, .. } => Some(signals),
            VerifyError::Execution { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_message_names_side() {
        let err = VerifyError::execution(
            Side::Candidate,
            &anyhow::anyhow!("spawn failed").context("running python3"),
        );
        let msg = err.to_string();
        assert!(msg.starts_with("candidate program failed to execute"));
        assert!(msg.contains("running python3: spawn failed"));
        assert!(err.signals().is_none());
    }

    #[test]
    fn test_internal_error_keeps_partial_signals() {
        let err = VerifyError::Internal {
            message: "stage exploded".to_string(),
            signals: Box::new(Signals::default()),
        };
        assert!(err.signals().is_some());
        assert!(err.to_string().contains("stage exploded"));
    }
}
