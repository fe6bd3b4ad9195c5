//! Arbiter library crate
//!
//! Verification engine for grading a candidate program against a reference
//! solution. `engine::Verifier` is the entry point; everything else is either
//! a pure decision component or a collaborator seam with a local default.

pub mod cache;
pub mod compare;
pub mod config;
pub mod engine;
pub mod error;
pub mod exec;
pub mod ir;
pub mod judge;
pub mod process;
pub mod semantic;
pub mod structure;
pub mod types;
pub mod util;

pub use engine::{Collaborators, Verifier};
pub use error::VerifyError;
pub use types::{Language, Submission, VerificationResult};
