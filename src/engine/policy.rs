//! Pure decision policy: judgment thresholds and efficiency bands.

use crate::config::PolicyConfig;
use crate::types::EfficiencyRating;
use serde::{Deserialize, Serialize};

/// What a judgment asks the engine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    /// Not legitimate, high confidence: fail the candidate.
    AutoFail,
    /// Not legitimate, moderate confidence: ask for human review.
    Flag,
    /// Legitimate, high confidence: override a failed comparator.
    Override,
    NoAction,
}

/// Map a judgment onto an action.
///
/// With the default policy: not legitimate at >= 85 fails, at 60..=84 flags;
/// legitimate at >= 80 overrides; everything else leaves the comparator alone.
pub fn threshold_policy(confidence: u8, legitimate: bool, policy: &PolicyConfig) -> PolicyAction {
    match legitimate {
        false if confidence >= policy.auto_fail_confidence => PolicyAction::AutoFail,
        false if confidence >= policy.flag_confidence => PolicyAction::Flag,
        true if confidence >= policy.override_confidence => PolicyAction::Override,
        _ => PolicyAction::NoAction,
    }
}

/// Band an adjusted similarity score into a rating.
pub fn band_efficiency(score: f64, policy: &PolicyConfig) -> EfficiencyRating {
    if score >= policy.optimal_score {
        EfficiencyRating::Optimal
    } else if score >= policy.good_score {
        EfficiencyRating::Good
    } else if score >= policy.moderate_score {
        EfficiencyRating::Moderate
    } else {
        EfficiencyRating::Inefficient
    }
}
