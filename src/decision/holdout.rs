use std::sync::Arc;

use crate::{
    audience::check_audience,
    bucketer::{Bucketer, Murmur3Bucketer},
    reasons::{DecisionReasons, Reason},
    DecideOptions, Result, UserContext,
};

use super::{
    bucket_experiment, DecisionSource, FeatureDecision, FeatureDecisionContext, FeatureService,
};

/// Reserves holdout traffic before feature tests and rollouts run.
#[derive(Clone)]
pub struct HoldoutService {
    bucketer: Arc<dyn Bucketer>,
}

impl Default for HoldoutService {
    fn default() -> Self {
        HoldoutService::new(Arc::new(Murmur3Bucketer))
    }
}

impl HoldoutService {
    /// Create the service with a custom bucketer.
    pub fn new(bucketer: Arc<dyn Bucketer>) -> HoldoutService {
        HoldoutService { bucketer }
    }
}

impl FeatureService for HoldoutService {
    fn get_decision<'a>(
        &self,
        context: &FeatureDecisionContext<'a>,
        user: &UserContext,
        _options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Result<FeatureDecision<'a>> {
        let config = context.config;
        for holdout in config.holdouts_for_flag(&context.feature.id) {
            let rule = &holdout.rule;
            if !rule.is_running() {
                continue;
            }
            if !check_audience(
                rule.audience_conditions.as_ref(),
                config.audiences(),
                &rule.key,
                user,
                reasons,
            ) {
                continue;
            }

            let variation = bucket_experiment(
                self.bucketer.as_ref(),
                config,
                rule,
                user.bucketing_id(),
                reasons,
            );
            if let Some(variation) = variation {
                reasons.add_info(format_args!(
                    "{} \"{}\" for flag \"{}\".",
                    Reason::BucketedIntoHoldout,
                    rule.key,
                    context.feature.key
                ));
                return Ok(FeatureDecision {
                    rule: Some(rule),
                    variation: Some(variation),
                    source: DecisionSource::Holdout,
                    cmab_uuid: None,
                });
            }
        }

        Ok(FeatureDecision::default())
    }
}
