//! The decision pipeline.
//!
//! Experiments are decided by an [`ExperimentService`] chain (overrides, whitelist, CMAB, sticky
//! bucketing, plain bucketing). Flags are decided by a [`FeatureService`] chain (holdouts, feature
//! tests, rollouts). Every layer explains itself through the shared [`DecisionReasons`].
//!
//! Decisions borrow from the [`ProjectConfig`] snapshot they were made against, so a single
//! decision always reflects exactly one configuration revision.
use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    project_config::{Experiment, Feature, ProjectConfig, Variable, Variation},
    reasons::DecisionReasons,
    DecideOptions, Result, UserContext,
};

mod composite_experiment;
mod composite_feature;
mod experiment_bucketer;
mod experiment_cmab;
mod feature_experiment;
mod forced_decision;
mod holdout;
mod overrides;
mod persisting;
mod rollout;
mod service;
mod whitelist;

pub use composite_experiment::CompositeExperimentService;
pub use composite_feature::CompositeFeatureService;
pub use experiment_bucketer::ExperimentBucketerService;
pub use experiment_cmab::ExperimentCmabService;
pub use feature_experiment::FeatureExperimentService;
pub use holdout::HoldoutService;
pub use overrides::{MapOverrideStore, OverrideKey, OverrideService, OverrideStore};
pub use persisting::PersistingExperimentService;
pub use rollout::RolloutService;
pub use service::{DecisionService, DecisionServiceOptions};
pub use whitelist::WhitelistService;

pub(crate) use experiment_bucketer::bucket_experiment;
pub(crate) use forced_decision::find_validated_forced_decision;

/// Where a flag decision came from.
#[derive(Debug, Display, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionSource {
    /// An experiment attached to the flag.
    #[display(fmt = "feature-test")]
    FeatureTest,
    /// A rollout rule, or no rule at all.
    #[default]
    #[display(fmt = "rollout")]
    Rollout,
    /// A holdout covering the flag.
    #[display(fmt = "holdout")]
    Holdout,
}

/// Outcome of deciding a single experiment.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExperimentDecision<'a> {
    /// The selected variation. `None` if the user is not in the experiment.
    pub variation: Option<&'a Variation>,
    /// Set when the variation came from the CMAB service.
    pub cmab_uuid: Option<Uuid>,
}

impl<'a> ExperimentDecision<'a> {
    pub(crate) fn with_variation(variation: &'a Variation) -> ExperimentDecision<'a> {
        ExperimentDecision {
            variation: Some(variation),
            cmab_uuid: None,
        }
    }
}

/// Outcome of deciding a flag.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FeatureDecision<'a> {
    /// The experiment, rollout rule, or holdout that produced the decision.
    pub rule: Option<&'a Experiment>,
    /// The selected variation. `None` means the flag is off for the user.
    pub variation: Option<&'a Variation>,
    /// Stage that produced the decision.
    pub source: DecisionSource,
    /// Set when the variation came from the CMAB service.
    pub cmab_uuid: Option<Uuid>,
}

impl<'a> FeatureDecision<'a> {
    /// Return `true` if the flag is on for the user.
    pub fn enabled(&self) -> bool {
        self.variation.is_some_and(|it| it.feature_enabled)
    }

    /// Typed value of `variable` under this decision.
    ///
    /// Disabled decisions and variations that do not set the variable yield the default value.
    /// Returns `None` if the raw value does not fit the variable type.
    pub fn variable_value(&self, variable: &Variable) -> Option<serde_json::Value> {
        let raw = self
            .variation
            .filter(|it| it.feature_enabled)
            .and_then(|it| it.variables.get(&variable.id))
            .unwrap_or(&variable.default_value);
        variable.typed_value(raw)
    }
}

/// Inputs for deciding an experiment.
#[derive(Debug, Clone, Copy)]
pub struct ExperimentDecisionContext<'a> {
    /// Experiment to decide.
    pub experiment: &'a Experiment,
    /// Snapshot the decision is made against.
    pub config: &'a ProjectConfig,
}

/// Inputs for deciding a flag.
#[derive(Debug, Clone, Copy)]
pub struct FeatureDecisionContext<'a> {
    /// Flag to decide.
    pub feature: &'a Feature,
    /// Snapshot the decision is made against.
    pub config: &'a ProjectConfig,
}

/// A layer that decides a single experiment.
///
/// Implementations record their reasons in `reasons`. Returning `Ok` with no variation means "no
/// opinion" and lets the caller consult the next layer.
pub trait ExperimentService: Send + Sync {
    /// Decide `context.experiment` for `user`.
    fn get_decision<'a>(
        &self,
        context: &ExperimentDecisionContext<'a>,
        user: &UserContext,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Result<ExperimentDecision<'a>>;
}

/// A layer that decides a flag.
pub trait FeatureService: Send + Sync {
    /// Decide `context.feature` for `user`.
    fn get_decision<'a>(
        &self,
        context: &FeatureDecisionContext<'a>,
        user: &UserContext,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Result<FeatureDecision<'a>>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::{
        cmab::{CmabDecision, CmabService},
        project_config::ProjectConfig,
        reasons::DecisionReasons,
        DecideOptions, Error, Result, UserContext,
    };

    /// A CMAB service that answers with a fixed result and never touches the network.
    pub(crate) struct StaticCmabService(pub Result<CmabDecision>);

    impl StaticCmabService {
        pub(crate) fn variation(variation_id: &str) -> Arc<StaticCmabService> {
            Arc::new(StaticCmabService(Ok(CmabDecision {
                variation_id: variation_id.to_owned(),
                cmab_uuid: uuid::Uuid::new_v4(),
            })))
        }

        pub(crate) fn failing() -> Arc<StaticCmabService> {
            Arc::new(StaticCmabService(Err(Error::CmabFetchFailed { retries: 1 })))
        }
    }

    impl CmabService for StaticCmabService {
        fn get_decision(
            &self,
            _config: &ProjectConfig,
            _user: &UserContext,
            _rule_id: &str,
            _options: &DecideOptions,
            _reasons: &mut DecisionReasons,
        ) -> Result<CmabDecision> {
            self.0.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{DecisionSource, FeatureDecision};
    use crate::project_config::tests::fixture;

    #[test]
    fn variable_values_follow_enabled_state() {
        let config = fixture();
        let feature = config.feature("checkout_flow").unwrap();
        let experiment = config.experiment_by_key("ab_test").unwrap();
        let layout = feature.variable("layout").unwrap();
        let discount = feature.variable("discount").unwrap();
        let title = feature.variable("title").unwrap();

        let treatment = FeatureDecision {
            rule: Some(experiment),
            variation: experiment.variation_by_key("treatment"),
            ..FeatureDecision::default()
        };
        assert_eq!(treatment.variable_value(layout), Some(json!({"columns": 2})));
        assert_eq!(treatment.variable_value(discount), Some(json!(5)));
        assert_eq!(treatment.variable_value(title), Some(json!("Checkout")));

        let control = FeatureDecision {
            variation: experiment.variation_by_key("control"),
            ..treatment
        };
        assert_eq!(control.variable_value(layout), Some(json!({"columns": 1})));
        assert_eq!(FeatureDecision::default().variable_value(discount), Some(json!(0)));
    }

    #[test]
    fn source_names() {
        assert_eq!(DecisionSource::FeatureTest.to_string(), "feature-test");
        assert_eq!(DecisionSource::Rollout.to_string(), "rollout");
        assert_eq!(
            serde_json::to_value(DecisionSource::Holdout).unwrap(),
            serde_json::json!("holdout")
        );
    }
}
