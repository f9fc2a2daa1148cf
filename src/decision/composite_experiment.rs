use std::sync::Arc;

use crate::{
    cmab::CmabService,
    reasons::{DecisionReasons, Reason},
    user_profile::UserProfileService,
    DecideOptions, Result, UserContext,
};

use super::{
    ExperimentBucketerService, ExperimentCmabService, ExperimentDecision,
    ExperimentDecisionContext, ExperimentService, OverrideService, OverrideStore,
    PersistingExperimentService, WhitelistService,
};

/// Decides an experiment by consulting, in order: overrides, the datafile whitelist, the CMAB
/// adapter (CMAB experiments only), and sticky or plain bucketing.
///
/// The first layer producing a variation wins. Errors from non-CMAB layers are logged and the
/// chain moves on. CMAB errors end the chain and propagate.
pub struct CompositeExperimentService {
    overrides: Option<OverrideService>,
    whitelist: WhitelistService,
    cmab: ExperimentCmabService,
    bucketing: Box<dyn ExperimentService>,
}

impl CompositeExperimentService {
    /// Build the chain. Without `profiles` bucketing is not sticky.
    pub fn new(
        overrides: Option<Arc<dyn OverrideStore>>,
        cmab: Option<Arc<dyn CmabService>>,
        profiles: Option<Arc<dyn UserProfileService>>,
    ) -> CompositeExperimentService {
        let bucketer = ExperimentBucketerService::default();
        let bucketing: Box<dyn ExperimentService> = match profiles {
            Some(profiles) => Box::new(PersistingExperimentService::new(
                Box::new(bucketer),
                profiles,
            )),
            None => Box::new(bucketer),
        };
        CompositeExperimentService {
            overrides: overrides.map(OverrideService::new),
            whitelist: WhitelistService,
            cmab: ExperimentCmabService::new(cmab),
            bucketing,
        }
    }
}

impl ExperimentService for CompositeExperimentService {
    fn get_decision<'a>(
        &self,
        context: &ExperimentDecisionContext<'a>,
        user: &UserContext,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Result<ExperimentDecision<'a>> {
        let experiment = context.experiment;
        if !experiment.is_running() {
            reasons.add_info(format_args!(
                "{}: \"{}\".",
                Reason::ExperimentNotRunning,
                experiment.key
            ));
            return Ok(ExperimentDecision::default());
        }

        let static_layers = self
            .overrides
            .iter()
            .map(|it| it as &dyn ExperimentService)
            .chain([&self.whitelist as &dyn ExperimentService]);
        for layer in static_layers {
            match layer.get_decision(context, user, options, reasons) {
                Ok(decision) if decision.variation.is_some() => return Ok(decision),
                Ok(_) => {}
                Err(err) => {
                    log::warn!(target: "optiflag", experiment_key:% = experiment.key;
                               "experiment decision layer failed: {err}");
                }
            }
        }

        if experiment.is_cmab() {
            let decision = self.cmab.get_decision(context, user, options, reasons)?;
            if decision.variation.is_some() {
                return Ok(decision);
            }
        }

        match self.bucketing.get_decision(context, user, options, reasons) {
            Ok(decision) => Ok(decision),
            Err(err) => {
                log::warn!(target: "optiflag", experiment_key:% = experiment.key;
                           "experiment bucketing failed: {err}");
                Ok(ExperimentDecision::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use super::CompositeExperimentService;
    use crate::{
        cmab::CmabService,
        decision::{
            test_support::StaticCmabService, ExperimentDecisionContext, ExperimentService,
            MapOverrideStore, OverrideKey, OverrideStore,
        },
        project_config::{tests::fixture, TrafficRange},
        reasons::{DecisionReasons, Reason},
        user_profile::{InMemoryUserProfileService, UserProfileService},
        DecideOptions, Error, UserContext,
    };

    fn adult(user_id: &str) -> UserContext {
        let mut user = UserContext::new(user_id, HashMap::new());
        user.set_attribute("age", 30.0);
        user
    }

    #[test]
    fn whitelist_short_circuits_bucketing() {
        let config = fixture();
        let profiles = Arc::new(InMemoryUserProfileService::new());
        let service = CompositeExperimentService::new(None, None, Some(profiles.clone()));
        let mut reasons = DecisionReasons::with_info();
        let decision = service
            .get_decision(
                &ExperimentDecisionContext {
                    experiment: config.experiment_by_key("ab_test").unwrap(),
                    config: &config,
                },
                &adult("whitelisted_user"),
                &DecideOptions::default(),
                &mut reasons,
            )
            .unwrap();
        assert_eq!(decision.variation.unwrap().key, "control");
        assert!(reasons.mentions(&Reason::WhitelistVariationAssignmentFound.to_string()));
        assert!(!reasons.mentions(&Reason::BucketedIntoVariation.to_string()));
        // Bucketing (and its profile write) never ran.
        assert_eq!(profiles.lookup("whitelisted_user").unwrap(), None);
    }

    #[test]
    fn overrides_take_precedence_over_whitelist() {
        let config = fixture();
        let store = Arc::new(MapOverrideStore::new());
        store.set_variation(
            OverrideKey::new("ab_test", "whitelisted_user"),
            "treatment".into(),
        );
        let store: Arc<dyn OverrideStore> = store;
        let service = CompositeExperimentService::new(Some(store), None, None);
        let decision = service
            .get_decision(
                &ExperimentDecisionContext {
                    experiment: config.experiment_by_key("ab_test").unwrap(),
                    config: &config,
                },
                &adult("whitelisted_user"),
                &DecideOptions::default(),
                &mut DecisionReasons::default(),
            )
            .unwrap();
        assert_eq!(decision.variation.unwrap().key, "treatment");
    }

    #[test]
    fn paused_experiment_is_skipped() {
        let config = fixture();
        let service = CompositeExperimentService::new(None, None, None);
        let mut reasons = DecisionReasons::with_info();
        let decision = service
            .get_decision(
                &ExperimentDecisionContext {
                    experiment: config.experiment_by_key("paused_exp").unwrap(),
                    config: &config,
                },
                &adult("u1"),
                &DecideOptions::default(),
                &mut reasons,
            )
            .unwrap();
        assert!(decision.variation.is_none());
        assert!(reasons.mentions(&Reason::ExperimentNotRunning.to_string()));
    }

    #[test]
    fn cmab_errors_are_terminal() {
        let config = fixture();
        let cmab: Arc<dyn CmabService> = StaticCmabService::failing();
        let service = CompositeExperimentService::new(None, Some(cmab), None);
        let err = service
            .get_decision(
                &ExperimentDecisionContext {
                    experiment: config.experiment_by_key("cmab_exp").unwrap(),
                    config: &config,
                },
                &adult("u1"),
                &DecideOptions::default(),
                &mut DecisionReasons::default(),
            )
            .unwrap_err();
        assert!(err.is_cmab());
    }

    #[test]
    fn cmab_success_carries_uuid() {
        let config = fixture();
        let cmab: Arc<dyn CmabService> = StaticCmabService::variation("var_cmab_a");
        let service = CompositeExperimentService::new(None, Some(cmab), None);
        let decision = service
            .get_decision(
                &ExperimentDecisionContext {
                    experiment: config.experiment_by_key("cmab_exp").unwrap(),
                    config: &config,
                },
                &adult("u1"),
                &DecideOptions::default(),
                &mut DecisionReasons::default(),
            )
            .unwrap();
        assert_eq!(decision.variation.unwrap().key, "cmab_a");
        assert!(decision.cmab_uuid.is_some());
    }

    #[test]
    fn outside_cmab_slice_falls_through_to_bucketing() {
        let config = fixture();
        let mut experiment = config.experiment_by_key("cmab_exp").unwrap().clone();
        if let Some(cmab) = experiment.cmab.as_mut() {
            cmab.traffic_allocation = 0;
        }
        experiment.traffic_allocation = vec![TrafficRange {
            entity_id: "var_cmab_b".into(),
            end_of_range: 10_000,
        }];
        let cmab: Arc<dyn CmabService> = StaticCmabService::variation("var_cmab_a");
        let service = CompositeExperimentService::new(None, Some(cmab), None);
        let mut reasons = DecisionReasons::with_info();
        let decision = service
            .get_decision(
                &ExperimentDecisionContext {
                    experiment: &experiment,
                    config: &config,
                },
                &adult("u1"),
                &DecideOptions::default(),
                &mut reasons,
            )
            .unwrap();
        assert_eq!(decision.variation.unwrap().key, "cmab_b");
        assert!(decision.cmab_uuid.is_none());
        assert!(reasons.mentions(&Reason::NotInCmabTrafficAllocation.to_string()));
        assert!(reasons.mentions(&Reason::BucketedIntoVariation.to_string()));
    }

    #[test]
    fn missing_cmab_service() {
        let config = fixture();
        let service = CompositeExperimentService::new(None, None, None);
        let err = service
            .get_decision(
                &ExperimentDecisionContext {
                    experiment: config.experiment_by_key("cmab_exp").unwrap(),
                    config: &config,
                },
                &adult("u1"),
                &DecideOptions::default(),
                &mut DecisionReasons::default(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::CmabServiceUnavailable));
    }
}
