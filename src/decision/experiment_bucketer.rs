use std::sync::Arc;

use crate::{
    audience::check_audience,
    bucketer::{Bucketer, Murmur3Bucketer},
    project_config::{Experiment, GroupPolicy, ProjectConfig, Variation},
    reasons::{DecisionReasons, Reason},
    DecideOptions, Result, UserContext,
};

use super::{ExperimentDecision, ExperimentDecisionContext, ExperimentService};

/// Audience gate, group mutex, and bucketing. Never touches persistent state.
#[derive(Clone)]
pub struct ExperimentBucketerService {
    bucketer: Arc<dyn Bucketer>,
}

impl Default for ExperimentBucketerService {
    fn default() -> Self {
        ExperimentBucketerService::new(Arc::new(Murmur3Bucketer))
    }
}

impl ExperimentBucketerService {
    /// Create the service with a custom bucketer.
    pub fn new(bucketer: Arc<dyn Bucketer>) -> ExperimentBucketerService {
        ExperimentBucketerService { bucketer }
    }
}

impl ExperimentService for ExperimentBucketerService {
    fn get_decision<'a>(
        &self,
        context: &ExperimentDecisionContext<'a>,
        user: &UserContext,
        _options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Result<ExperimentDecision<'a>> {
        let experiment = context.experiment;

        if !check_audience(
            experiment.audience_conditions.as_ref(),
            context.config.audiences(),
            &experiment.key,
            user,
            reasons,
        ) {
            reasons.add_info(Reason::FailedAudienceTargeting);
            return Ok(ExperimentDecision::default());
        }

        let variation = bucket_experiment(
            self.bucketer.as_ref(),
            context.config,
            experiment,
            user.bucketing_id(),
            reasons,
        );
        match variation {
            Some(variation) => {
                reasons.add_info(Reason::BucketedIntoVariation);
                Ok(ExperimentDecision::with_variation(variation))
            }
            None => {
                reasons.add_info(Reason::NotBucketedIntoVariation);
                Ok(ExperimentDecision::default())
            }
        }
    }
}

/// Resolve group admission, then bucket into the experiment's traffic allocation.
///
/// Records [`Reason::NotInGroup`] when a mutually exclusive group admits a different experiment.
pub(crate) fn bucket_experiment<'a>(
    bucketer: &dyn Bucketer,
    config: &ProjectConfig,
    experiment: &'a Experiment,
    bucketing_id: &str,
    reasons: &mut DecisionReasons,
) -> Option<&'a Variation> {
    if !admitted_by_group(bucketer, config, experiment, bucketing_id, reasons) {
        return None;
    }

    let variation_id =
        bucketer.bucket_into(bucketing_id, &experiment.id, &experiment.traffic_allocation)?;
    let variation = experiment.variation(variation_id);
    if variation.is_none() {
        log::warn!(target: "optiflag", experiment_key:% = experiment.key, variation_id;
                   "traffic allocation targets an unknown variation");
    }
    variation
}

/// Return `true` unless the experiment is in a random-policy group that admits another
/// experiment for this bucketing id.
pub(crate) fn admitted_by_group(
    bucketer: &dyn Bucketer,
    config: &ProjectConfig,
    experiment: &Experiment,
    bucketing_id: &str,
    reasons: &mut DecisionReasons,
) -> bool {
    let Some(group_id) = &experiment.group_id else {
        return true;
    };
    let Some(group) = config.group(group_id) else {
        log::warn!(target: "optiflag", experiment_key:% = experiment.key, group_id:% = group_id;
                   "experiment references an unknown group");
        return true;
    };
    if group.policy == GroupPolicy::Overlapping {
        return true;
    }

    let admitted = bucketer.bucket_into(bucketing_id, &group.id, &group.traffic_allocation);
    if admitted == Some(experiment.id.as_str()) {
        true
    } else {
        reasons.add_info(Reason::NotInGroup);
        false
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::ExperimentBucketerService;
    use crate::{
        bucketer::{Bucketer, Murmur3Bucketer},
        decision::{ExperimentDecisionContext, ExperimentService},
        project_config::tests::fixture,
        reasons::{DecisionReasons, Reason},
        DecideOptions, UserContext,
    };

    fn decide_key(experiment_key: &str, user: &UserContext) -> (Option<String>, DecisionReasons) {
        let config = fixture();
        let experiment = config.experiment_by_key(experiment_key).unwrap();
        let mut reasons = DecisionReasons::with_info();
        let decision = ExperimentBucketerService::default()
            .get_decision(
                &ExperimentDecisionContext {
                    experiment,
                    config: &config,
                },
                user,
                &DecideOptions::default(),
                &mut reasons,
            )
            .unwrap();
        (decision.variation.map(|it| it.key.clone()), reasons)
    }

    #[test]
    fn audience_miss() {
        let mut user = UserContext::new("u1", HashMap::new());
        user.set_attribute("age", 10.0);
        let (variation, reasons) = decide_key("ab_test", &user);
        assert_eq!(variation, None);
        assert!(reasons.mentions(&Reason::FailedAudienceTargeting.to_string()));
    }

    #[test]
    fn invalid_audience_is_a_miss() {
        let user = UserContext::new("u1", HashMap::new());
        let (variation, reasons) = decide_key("ab_test", &user);
        assert_eq!(variation, None);
        assert!(reasons.mentions("could not be evaluated"));
        assert!(reasons.mentions(&Reason::FailedAudienceTargeting.to_string()));
    }

    #[test]
    fn bucketed_when_audience_matches() {
        let mut user = UserContext::new("u1", HashMap::new());
        user.set_attribute("age", 30.0);
        let (variation, reasons) = decide_key("ab_test", &user);
        assert_eq!(variation.as_deref(), Some("treatment"));
        assert!(reasons.mentions(&Reason::BucketedIntoVariation.to_string()));
    }

    #[test]
    fn group_admits_exactly_one_experiment() {
        for i in 0..50 {
            let user_id = format!("user-{i}");
            let user = UserContext::new(user_id.clone(), HashMap::new());
            let (first, _) = decide_key("group_exp_1", &user);
            let (second, second_reasons) = decide_key("group_exp_2", &user);

            let bucket = Murmur3Bucketer.bucket(&user_id, "group_1");
            if bucket < 5000 {
                assert_eq!(first.as_deref(), Some("group_1_on"));
                assert_eq!(second, None);
                assert!(second_reasons.mentions(&Reason::NotInGroup.to_string()));
            } else {
                assert_eq!(first, None);
                assert_eq!(second.as_deref(), Some("group_2_on"));
            }
        }
    }

    #[test]
    fn bucketing_id_attribute_overrides_user_id() {
        let mut a = UserContext::new("a", HashMap::new());
        a.set_attribute("$opt_bucketing_id", "shared");
        let mut b = UserContext::new("b", HashMap::new());
        b.set_attribute("$opt_bucketing_id", "shared");
        assert_eq!(decide_key("group_exp_1", &a).0, decide_key("group_exp_1", &b).0);
    }
}
