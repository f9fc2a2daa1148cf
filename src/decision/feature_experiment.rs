use std::sync::Arc;

use crate::{
    cmab::CmabService,
    reasons::{DecisionReasons, Reason},
    user_context::DecisionContext,
    user_profile::UserProfileService,
    DecideOptions, Result, UserContext,
};

use super::{
    find_validated_forced_decision, CompositeExperimentService, DecisionSource,
    ExperimentDecisionContext, ExperimentService, FeatureDecision, FeatureDecisionContext,
    FeatureService, OverrideStore,
};

/// Runs a flag's feature tests in order. The first experiment that yields a variation decides the
/// flag.
pub struct FeatureExperimentService {
    experiments: CompositeExperimentService,
}

impl FeatureExperimentService {
    /// Build the experiment chain used for every feature test.
    pub fn new(
        overrides: Option<Arc<dyn OverrideStore>>,
        cmab: Option<Arc<dyn CmabService>>,
        profiles: Option<Arc<dyn UserProfileService>>,
    ) -> FeatureExperimentService {
        FeatureExperimentService {
            experiments: CompositeExperimentService::new(overrides, cmab, profiles),
        }
    }
}

impl FeatureService for FeatureExperimentService {
    fn get_decision<'a>(
        &self,
        context: &FeatureDecisionContext<'a>,
        user: &UserContext,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Result<FeatureDecision<'a>> {
        let feature = context.feature;
        for experiment in &feature.feature_experiments {
            if !experiment.has_supported_type() {
                reasons.add_info(format_args!(
                    "{} \"{}\": \"{}\".",
                    Reason::SkippedUnknownRuleType,
                    experiment.rule_type,
                    experiment.key
                ));
                continue;
            }

            let forced = find_validated_forced_decision(
                context.config,
                user,
                &DecisionContext::rule(feature.key.as_str(), experiment.key.as_str()),
                reasons,
            );
            if let Some(variation) = forced {
                return Ok(FeatureDecision {
                    rule: Some(experiment),
                    variation: Some(variation),
                    source: DecisionSource::FeatureTest,
                    cmab_uuid: None,
                });
            }

            let decision = self.experiments.get_decision(
                &ExperimentDecisionContext {
                    experiment,
                    config: context.config,
                },
                user,
                options,
                reasons,
            )?;
            if let Some(variation) = decision.variation {
                return Ok(FeatureDecision {
                    rule: Some(experiment),
                    variation: Some(variation),
                    source: DecisionSource::FeatureTest,
                    cmab_uuid: decision.cmab_uuid,
                });
            }
        }

        Ok(FeatureDecision::default())
    }
}
