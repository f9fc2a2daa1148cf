use crate::{
    reasons::{DecisionReasons, Reason},
    DecideOptions, Result, UserContext,
};

use super::{ExperimentDecision, ExperimentDecisionContext, ExperimentService};

/// Serves the datafile's per-experiment `forcedVariations` (user id to variation key).
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitelistService;

impl ExperimentService for WhitelistService {
    fn get_decision<'a>(
        &self,
        context: &ExperimentDecisionContext<'a>,
        user: &UserContext,
        _options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Result<ExperimentDecision<'a>> {
        let experiment = context.experiment;
        let Some(variation_key) = experiment.whitelist.get(user.user_id()) else {
            return Ok(ExperimentDecision::default());
        };

        match experiment.variation_by_key(variation_key) {
            Some(variation) => {
                reasons.add_info(Reason::WhitelistVariationAssignmentFound);
                Ok(ExperimentDecision::with_variation(variation))
            }
            None => {
                log::warn!(target: "optiflag",
                           experiment_key:% = experiment.key,
                           variation_key:% = variation_key;
                           "whitelist references an unknown variation");
                reasons.add_info(Reason::InvalidWhitelistVariationAssignment);
                Ok(ExperimentDecision::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::WhitelistService;
    use crate::{
        decision::{ExperimentDecisionContext, ExperimentService},
        project_config::tests::fixture,
        reasons::{DecisionReasons, Reason},
        DecideOptions, UserContext,
    };

    fn decide(user_id: &str) -> (Option<String>, DecisionReasons) {
        let config = fixture();
        let context = ExperimentDecisionContext {
            experiment: config.experiment_by_key("ab_test").unwrap(),
            config: &config,
        };
        let mut reasons = DecisionReasons::with_info();
        let decision = WhitelistService
            .get_decision(
                &context,
                &UserContext::new(user_id, HashMap::new()),
                &DecideOptions::default(),
                &mut reasons,
            )
            .unwrap();
        (decision.variation.map(|it| it.key.clone()), reasons)
    }

    #[test]
    fn whitelisted_user() {
        let (variation, reasons) = decide("whitelisted_user");
        assert_eq!(variation.as_deref(), Some("control"));
        assert!(reasons.mentions(&Reason::WhitelistVariationAssignmentFound.to_string()));
    }

    #[test]
    fn unknown_variation_is_reported() {
        let (variation, reasons) = decide("bad_whitelist_user");
        assert_eq!(variation, None);
        assert!(reasons.mentions(&Reason::InvalidWhitelistVariationAssignment.to_string()));
    }

    #[test]
    fn other_users_pass_through() {
        let (variation, reasons) = decide("someone");
        assert_eq!(variation, None);
        assert!(reasons.infos().is_empty());
    }
}
