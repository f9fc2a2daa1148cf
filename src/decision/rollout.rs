use std::sync::Arc;

use crate::{
    audience::check_audience,
    bucketer::{Bucketer, Murmur3Bucketer},
    project_config::Experiment,
    reasons::{DecisionReasons, Reason},
    user_context::DecisionContext,
    DecideOptions, Result, UserContext,
};

use super::{
    bucket_experiment, find_validated_forced_decision, DecisionSource, FeatureDecision,
    FeatureDecisionContext, FeatureService,
};

/// Evaluates a flag's rollout: targeted rules in order, then the "everyone else" rule.
///
/// A user who matches a targeted rule's audience but misses its traffic allocation skips the
/// remaining targeted rules and goes straight to "everyone else".
#[derive(Clone)]
pub struct RolloutService {
    bucketer: Arc<dyn Bucketer>,
}

impl Default for RolloutService {
    fn default() -> Self {
        RolloutService::new(Arc::new(Murmur3Bucketer))
    }
}

enum RuleOutcome<'a> {
    AudienceMiss,
    Decided(FeatureDecision<'a>),
    NotBucketed,
}

impl RolloutService {
    /// Create the service with a custom bucketer.
    pub fn new(bucketer: Arc<dyn Bucketer>) -> RolloutService {
        RolloutService { bucketer }
    }

    fn evaluate_rule<'a>(
        &self,
        context: &FeatureDecisionContext<'a>,
        rule: &'a Experiment,
        user: &UserContext,
        reasons: &mut DecisionReasons,
    ) -> RuleOutcome<'a> {
        let config = context.config;
        let flag_key = &context.feature.key;

        if !check_audience(
            rule.audience_conditions.as_ref(),
            config.audiences(),
            &rule.key,
            user,
            reasons,
        ) {
            reasons.add_info(format_args!(
                "User \"{}\" does not meet audience conditions for targeting rule \"{}\".",
                user.user_id(),
                rule.key
            ));
            return RuleOutcome::AudienceMiss;
        }

        let forced = find_validated_forced_decision(
            config,
            user,
            &DecisionContext::rule(flag_key.as_str(), rule.key.as_str()),
            reasons,
        );
        if let Some(variation) = forced {
            return RuleOutcome::Decided(decision(rule, variation));
        }

        match bucket_experiment(
            self.bucketer.as_ref(),
            config,
            rule,
            user.bucketing_id(),
            reasons,
        ) {
            Some(variation) => {
                reasons.add_info(format_args!(
                    "{}: rule \"{}\".",
                    Reason::BucketedIntoRollout,
                    rule.key
                ));
                RuleOutcome::Decided(decision(rule, variation))
            }
            None => {
                reasons.add_info(format_args!(
                    "{}: rule \"{}\".",
                    Reason::FailedRolloutBucketing,
                    rule.key
                ));
                RuleOutcome::NotBucketed
            }
        }
    }
}

fn decision<'a>(
    rule: &'a Experiment,
    variation: &'a crate::project_config::Variation,
) -> FeatureDecision<'a> {
    FeatureDecision {
        rule: Some(rule),
        variation: Some(variation),
        source: DecisionSource::Rollout,
        cmab_uuid: None,
    }
}

impl FeatureService for RolloutService {
    fn get_decision<'a>(
        &self,
        context: &FeatureDecisionContext<'a>,
        user: &UserContext,
        _options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Result<FeatureDecision<'a>> {
        let Some((everyone_else, targeted)) = context
            .feature
            .rollout
            .as_ref()
            .and_then(|rollout| rollout.rules.split_last())
        else {
            return Ok(FeatureDecision::default());
        };

        for rule in targeted {
            match self.evaluate_rule(context, rule, user, reasons) {
                RuleOutcome::AudienceMiss => continue,
                RuleOutcome::Decided(decision) => return Ok(decision),
                RuleOutcome::NotBucketed => break,
            }
        }

        Ok(match self.evaluate_rule(context, everyone_else, user, reasons) {
            RuleOutcome::Decided(decision) => decision,
            RuleOutcome::AudienceMiss | RuleOutcome::NotBucketed => FeatureDecision::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use super::RolloutService;
    use crate::{
        bucketer::Bucketer,
        decision::{DecisionSource, FeatureDecisionContext, FeatureService},
        project_config::{tests::fixture, Feature, ProjectConfig},
        reasons::{DecisionReasons, Reason},
        user_context::DecisionContext,
        DecideOptions, UserContext,
    };

    struct FixedBucket(u32);

    impl Bucketer for FixedBucket {
        fn bucket(&self, _bucketing_id: &str, _parent_id: &str) -> u32 {
            self.0
        }
    }

    fn decide(
        service: &RolloutService,
        config: &ProjectConfig,
        feature: &Feature,
        user: &UserContext,
    ) -> (Option<String>, DecisionReasons) {
        let mut reasons = DecisionReasons::with_info();
        let decision = service
            .get_decision(
                &FeatureDecisionContext { feature, config },
                user,
                &DecideOptions::default(),
                &mut reasons,
            )
            .unwrap();
        if decision.variation.is_some() {
            assert_eq!(decision.source, DecisionSource::Rollout);
        }
        (decision.variation.map(|it| it.key.clone()), reasons)
    }

    #[test]
    fn targeted_rule_matches() {
        let config = fixture();
        let mut user = UserContext::new("u1", HashMap::new());
        user.set_attribute("country", "us");
        let (variation, reasons) = decide(
            &RolloutService::default(),
            &config,
            config.feature("checkout_flow").unwrap(),
            &user,
        );
        assert_eq!(variation.as_deref(), Some("rollout_on"));
        assert!(reasons.mentions(&Reason::BucketedIntoRollout.to_string()));
    }

    #[test]
    fn audience_miss_falls_to_everyone_else() {
        let config = fixture();
        let mut user = UserContext::new("u1", HashMap::new());
        user.set_attribute("country", "fr");
        let (variation, _) = decide(
            &RolloutService::default(),
            &config,
            config.feature("checkout_flow").unwrap(),
            &user,
        );
        assert_eq!(variation.as_deref(), Some("rollout_off"));
    }

    #[test]
    fn bucketing_miss_skips_to_everyone_else() {
        let config = fixture();
        let mut feature = config.feature("checkout_flow").unwrap().clone();
        let rollout = feature.rollout.as_mut().unwrap();
        // Targeted rules: [us_rule at 50%, us_rule copy at 100%], then everyone else at 100%.
        let mut half = rollout.rules[0].clone();
        half.traffic_allocation[0].end_of_range = 5_000;
        let mut second = rollout.rules[0].clone();
        second.key = "us_rule_2".into();
        rollout.rules.insert(0, half);
        rollout.rules[1] = second;

        let mut user = UserContext::new("u1", HashMap::new());
        user.set_attribute("country", "us");
        let service = RolloutService::new(Arc::new(FixedBucket(7_000)));
        let (variation, reasons) = decide(&service, &config, &feature, &user);
        assert_eq!(variation.as_deref(), Some("rollout_off"));
        assert!(reasons.mentions(&Reason::FailedRolloutBucketing.to_string()));
        assert!(!reasons.mentions("us_rule_2"));
    }

    #[test]
    fn everyone_else_miss_disables_flag() {
        let config = fixture();
        let mut feature = config.feature("banner").unwrap().clone();
        feature.rollout.as_mut().unwrap().rules[0].traffic_allocation[0].end_of_range = 100;
        let service = RolloutService::new(Arc::new(FixedBucket(9_000)));
        let (variation, reasons) =
            decide(&service, &config, &feature, &UserContext::new("u1", HashMap::new()));
        assert_eq!(variation, None);
        assert!(reasons.mentions(&Reason::FailedRolloutBucketing.to_string()));
    }

    #[test]
    fn forced_decision_on_rule() {
        let config = fixture();
        let mut user = UserContext::new("u1", HashMap::new());
        user.set_attribute("country", "fr");
        user.set_forced_decision(
            DecisionContext::rule("checkout_flow", "everyone_else"),
            "rollout_on",
        );
        let (variation, _) = decide(
            &RolloutService::default(),
            &config,
            config.feature("checkout_flow").unwrap(),
            &user,
        );
        assert_eq!(variation.as_deref(), Some("rollout_on"));
    }

    #[test]
    fn no_rollout() {
        let config = fixture();
        let (variation, _) = decide(
            &RolloutService::default(),
            &config,
            config.feature("group_flag").unwrap(),
            &UserContext::new("u1", HashMap::new()),
        );
        assert_eq!(variation, None);
    }
}
