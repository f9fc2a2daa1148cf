use std::sync::Arc;

use crate::{
    cmab::CmabService, reasons::DecisionReasons, user_profile::UserProfileService, DecideOptions,
    Result, UserContext,
};

use super::{
    FeatureDecision, FeatureDecisionContext, FeatureExperimentService, FeatureService,
    HoldoutService, OverrideStore, RolloutService,
};

/// Decides a flag by consulting holdouts, then feature tests, then the rollout.
///
/// A CMAB error from any stage ends the evaluation: it is recorded as an error reason and returned
/// to the caller without consulting later stages. Other errors are logged and evaluation moves on
/// to the next stage.
pub struct CompositeFeatureService {
    stages: Vec<Box<dyn FeatureService>>,
}

impl CompositeFeatureService {
    /// Build the holdout, feature test, and rollout stages.
    pub fn new(
        overrides: Option<Arc<dyn OverrideStore>>,
        cmab: Option<Arc<dyn CmabService>>,
        profiles: Option<Arc<dyn UserProfileService>>,
    ) -> CompositeFeatureService {
        CompositeFeatureService::with_stages(vec![
            Box::new(HoldoutService::default()),
            Box::new(FeatureExperimentService::new(overrides, cmab, profiles)),
            Box::new(RolloutService::default()),
        ])
    }

    /// Build a pipeline from custom stages. Stages are consulted in order.
    pub fn with_stages(stages: Vec<Box<dyn FeatureService>>) -> CompositeFeatureService {
        CompositeFeatureService { stages }
    }
}

impl FeatureService for CompositeFeatureService {
    fn get_decision<'a>(
        &self,
        context: &FeatureDecisionContext<'a>,
        user: &UserContext,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Result<FeatureDecision<'a>> {
        let mut last = FeatureDecision::default();
        for stage in &self.stages {
            match stage.get_decision(context, user, options, reasons) {
                Ok(decision) if decision.variation.is_some() => return Ok(decision),
                Ok(decision) => last = decision,
                Err(err) if err.is_cmab() => {
                    reasons.add_error(&err);
                    return Err(err);
                }
                Err(err) => {
                    log::warn!(target: "optiflag", flag_key:% = context.feature.key;
                               "flag decision stage failed: {err}");
                }
            }
        }
        Ok(last)
    }
}
