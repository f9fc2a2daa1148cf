//! Decision reasons.
//!
//! Every layer of the decision pipeline explains itself through [`Reason`] codes collected in a
//! [`DecisionReasons`] accumulator. Reasons are two-tiered: errors are always reported, info
//! messages are only kept when the caller asked for them with
//! [`DecideOption::IncludeReasons`](crate::DecideOption::IncludeReasons).
use std::fmt::Display;

use derive_more::Display;

use crate::DecideOptions;

/// Reason codes produced by the decision pipeline.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum Reason {
    #[display(fmt = "Does not meet audience targeting conditions")]
    FailedAudienceTargeting,
    #[display(fmt = "Not in the experiment's mutually exclusive group")]
    NotInGroup,
    #[display(fmt = "Bucketed into variation")]
    BucketedIntoVariation,
    #[display(fmt = "Not bucketed into a variation")]
    NotBucketedIntoVariation,
    #[display(fmt = "Bucketed into rollout")]
    BucketedIntoRollout,
    #[display(fmt = "Not bucketed into rollout")]
    FailedRolloutBucketing,
    #[display(fmt = "Bucketed into holdout")]
    BucketedIntoHoldout,
    #[display(fmt = "Experiment is not running")]
    ExperimentNotRunning,
    #[display(fmt = "Whitelist variation assignment found")]
    WhitelistVariationAssignmentFound,
    #[display(fmt = "Invalid whitelist variation assignment")]
    InvalidWhitelistVariationAssignment,
    #[display(fmt = "No whitelist variation assignment")]
    NoWhitelistVariationAssignment,
    #[display(fmt = "Override variation assignment found")]
    OverrideVariationAssignmentFound,
    #[display(fmt = "Invalid override variation assignment")]
    InvalidOverrideVariationAssignment,
    #[display(fmt = "No override variation assignment")]
    NoOverrideVariationAssignment,
    #[display(fmt = "Forced decision found")]
    ForcedDecisionFound,
    #[display(fmt = "Invalid forced decision assignment")]
    InvalidForcedDecisionAssignment,
    #[display(fmt = "Returning previously activated variation from user profile")]
    UserProfileVariationFound,
    #[display(fmt = "Not in CMAB traffic allocation")]
    NotInCmabTrafficAllocation,
    #[display(fmt = "Assigned variation from CMAB service")]
    CmabVariationAssigned,
    #[display(fmt = "Used cached decision")]
    UsedCachedDecision,
    #[display(fmt = "Fetched new decision")]
    FetchedNewDecision,
    #[display(fmt = "Skipped rule of unknown type")]
    SkippedUnknownRuleType,
}

/// Accumulates reasons while a decision travels through the pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionReasons {
    include_info: bool,
    errors: Vec<String>,
    infos: Vec<String>,
}

impl DecisionReasons {
    /// Create an accumulator honoring `INCLUDE_REASONS` from `options`.
    pub fn new(options: &DecideOptions) -> DecisionReasons {
        DecisionReasons {
            include_info: options.include_reasons,
            ..Default::default()
        }
    }

    /// Create an accumulator that keeps info-level reasons.
    pub fn with_info() -> DecisionReasons {
        DecisionReasons {
            include_info: true,
            ..Default::default()
        }
    }

    /// Record an error. Errors are always reported.
    pub fn add_error(&mut self, message: impl Display) {
        self.errors.push(message.to_string());
    }

    /// Record an info message. Dropped unless info reasons were requested.
    pub fn add_info(&mut self, message: impl Display) {
        if self.include_info {
            self.infos.push(message.to_string());
        }
    }

    /// Messages that are always reported.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Messages reported only with [`crate::DecideOption::IncludeReasons`].
    pub fn infos(&self) -> &[String] {
        &self.infos
    }

    /// Return `true` if any recorded message (error or info) contains `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.errors
            .iter()
            .chain(self.infos.iter())
            .any(|it| it.contains(needle))
    }

    /// Errors followed by info messages, as reported to the caller.
    pub fn to_report(&self) -> Vec<String> {
        self.errors
            .iter()
            .chain(self.infos.iter())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{DecisionReasons, Reason};
    use crate::{DecideOption, DecideOptions};

    #[test]
    fn info_dropped_without_include_reasons() {
        let mut reasons = DecisionReasons::new(&DecideOptions::default());
        reasons.add_info(Reason::BucketedIntoVariation);
        reasons.add_error("boom");
        assert_eq!(reasons.to_report(), vec!["boom".to_owned()]);
    }

    #[test]
    fn info_kept_with_include_reasons() {
        let options: DecideOptions = [DecideOption::IncludeReasons].into_iter().collect();
        let mut reasons = DecisionReasons::new(&options);
        reasons.add_info(Reason::NotBucketedIntoVariation);
        reasons.add_error("boom");
        assert_eq!(
            reasons.to_report(),
            vec!["boom".to_owned(), "Not bucketed into a variation".to_owned()]
        );
        assert!(reasons.mentions("Not bucketed"));
    }
}
