use std::sync::Arc;

use crate::{
    cmab::CmabService,
    config_manager::ProjectConfigManager,
    notification::{
        DecisionInfo, DecisionNotification, DecisionNotificationType, Notification,
        NotificationCenter,
    },
    project_config::ProjectConfig,
    reasons::DecisionReasons,
    user_context::DecisionContext,
    user_profile::UserProfileService,
    DecideOptions, Error, Result, UserContext,
};

use super::{
    find_validated_forced_decision, CompositeExperimentService, CompositeFeatureService,
    DecisionSource, ExperimentDecision, ExperimentDecisionContext, ExperimentService,
    FeatureDecision, FeatureDecisionContext, FeatureService, OverrideStore,
};

/// Optional collaborators of the [`DecisionService`].
#[derive(Default, Clone)]
pub struct DecisionServiceOptions {
    /// Backs [`crate::Client::set_forced_variation`].
    pub override_store: Option<Arc<dyn OverrideStore>>,
    /// Without a CMAB service every CMAB rule fails with [`Error::CmabServiceUnavailable`].
    pub cmab_service: Option<Arc<dyn CmabService>>,
    /// Makes bucketing sticky when set.
    pub user_profile_service: Option<Arc<dyn UserProfileService>>,
}

/// Entry point of the decision pipeline.
///
/// Resolves keys against the active snapshot, runs the flag or experiment pipeline, and announces
/// every decision to [`NotificationType::Decision`](crate::NotificationType::Decision) listeners.
pub struct DecisionService {
    config_manager: Arc<dyn ProjectConfigManager>,
    notifications: Arc<NotificationCenter>,
    features: CompositeFeatureService,
    experiments: CompositeExperimentService,
}

impl DecisionService {
    /// Create the service. Decisions are announced on `notifications`.
    pub fn new(
        config_manager: Arc<dyn ProjectConfigManager>,
        notifications: Arc<NotificationCenter>,
        options: DecisionServiceOptions,
    ) -> DecisionService {
        let DecisionServiceOptions {
            override_store,
            cmab_service,
            user_profile_service,
        } = options;
        DecisionService {
            config_manager,
            notifications,
            features: CompositeFeatureService::new(
                override_store.clone(),
                cmab_service.clone(),
                user_profile_service.clone(),
            ),
            experiments: CompositeExperimentService::new(
                override_store,
                cmab_service,
                user_profile_service,
            ),
        }
    }

    /// Get the active snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SdkNotReady`] (or the error that prevented the first datafile from being
    /// installed) if no snapshot is available.
    pub fn get_config(&self) -> Result<Arc<ProjectConfig>> {
        self.config_manager.get_config()
    }

    /// Decide `flag_key` for `user` against `config`.
    ///
    /// A flag-level forced decision on the user context wins over every rule.
    ///
    /// # Errors
    ///
    /// - [`Error::FlagKeyInvalid`] if the flag does not exist.
    /// - CMAB errors (see [`Error::is_cmab`]) if a CMAB rule could not be decided. No rollout
    ///   fallback happens in that case.
    pub fn get_feature_decision<'a>(
        &self,
        config: &'a ProjectConfig,
        flag_key: &str,
        user: &UserContext,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Result<FeatureDecision<'a>> {
        let result = self.decide_feature(config, flag_key, user, options, reasons);

        let decision = result.as_ref().copied().unwrap_or_default();
        self.notify(
            DecisionNotificationType::Feature,
            user,
            DecisionInfo {
                flag_key: Some(flag_key.to_owned()),
                rule_key: decision.rule.map(|it| it.key.clone()),
                variation_key: decision.variation.map(|it| it.key.clone()),
                enabled: Some(decision.enabled()),
                source: Some(decision.source),
                cmab_uuid: decision.cmab_uuid,
                ..DecisionInfo::default()
            },
        );
        result
    }

    /// Decide `flag_key` for `user` and return the typed value of `variable_key`.
    ///
    /// # Errors
    ///
    /// Same as [`DecisionService::get_feature_decision`], plus [`Error::VariableKeyInvalid`] if
    /// the flag has no such variable.
    pub fn get_feature_variable(
        &self,
        config: &ProjectConfig,
        flag_key: &str,
        variable_key: &str,
        user: &UserContext,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Result<serde_json::Value> {
        let Some(feature) = config.feature(flag_key) else {
            let err = Error::FlagKeyInvalid(flag_key.to_owned());
            reasons.add_error(&err);
            return Err(err);
        };
        let Some(variable) = feature.variable(variable_key) else {
            let err = Error::VariableKeyInvalid {
                flag_key: flag_key.to_owned(),
                variable_key: variable_key.to_owned(),
            };
            reasons.add_error(&err);
            return Err(err);
        };

        let decision = self.decide_feature(config, flag_key, user, options, reasons)?;
        let value = decision.variable_value(variable).unwrap_or_else(|| {
            log::warn!(target: "optiflag", flag_key, variable_key;
                       "variable value does not match its declared type");
            serde_json::Value::Null
        });

        self.notify(
            DecisionNotificationType::FeatureVariable,
            user,
            DecisionInfo {
                flag_key: Some(flag_key.to_owned()),
                rule_key: decision.rule.map(|it| it.key.clone()),
                variation_key: decision.variation.map(|it| it.key.clone()),
                enabled: Some(decision.enabled()),
                source: Some(decision.source),
                variable_key: Some(variable_key.to_owned()),
                variable_value: Some(value.clone()),
                cmab_uuid: decision.cmab_uuid,
                ..DecisionInfo::default()
            },
        );
        Ok(value)
    }

    fn decide_feature<'a>(
        &self,
        config: &'a ProjectConfig,
        flag_key: &str,
        user: &UserContext,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Result<FeatureDecision<'a>> {
        let Some(feature) = config.feature(flag_key) else {
            let err = Error::FlagKeyInvalid(flag_key.to_owned());
            reasons.add_error(&err);
            return Err(err);
        };

        let forced =
            find_validated_forced_decision(config, user, &DecisionContext::flag(flag_key), reasons);
        let decision = match forced {
            Some(variation) => FeatureDecision {
                rule: None,
                variation: Some(variation),
                source: DecisionSource::FeatureTest,
                cmab_uuid: None,
            },
            None => self.features.get_decision(
                &FeatureDecisionContext { feature, config },
                user,
                options,
                reasons,
            )?,
        };

        log::trace!(target: "optiflag",
                    flag_key,
                    user_id = user.user_id(),
                    variation_key = decision.variation.map(|it| it.key.as_str()),
                    source:% = decision.source;
                    "decided a flag");
        Ok(decision)
    }

    /// Decide the experiment `experiment_key` for `user` against `config`.
    ///
    /// # Errors
    ///
    /// - [`Error::ExperimentKeyInvalid`] if the experiment does not exist.
    /// - CMAB errors if the experiment is a CMAB experiment and could not be decided.
    pub fn get_experiment_decision<'a>(
        &self,
        config: &'a ProjectConfig,
        experiment_key: &str,
        user: &UserContext,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Result<ExperimentDecision<'a>> {
        let Some(experiment) = config.experiment_by_key(experiment_key) else {
            let err = Error::ExperimentKeyInvalid(experiment_key.to_owned());
            reasons.add_error(&err);
            return Err(err);
        };

        let result = self
            .experiments
            .get_decision(
                &ExperimentDecisionContext { experiment, config },
                user,
                options,
                reasons,
            )
            .inspect_err(|err| reasons.add_error(err));

        let decision = result.as_ref().copied().unwrap_or_default();
        self.notify(
            DecisionNotificationType::AbTest,
            user,
            DecisionInfo {
                experiment_key: Some(experiment_key.to_owned()),
                variation_key: decision.variation.map(|it| it.key.clone()),
                cmab_uuid: decision.cmab_uuid,
                ..DecisionInfo::default()
            },
        );
        result
    }

    fn notify(
        &self,
        decision_type: DecisionNotificationType,
        user: &UserContext,
        decision_info: DecisionInfo,
    ) {
        self.notifications
            .send(&Notification::Decision(DecisionNotification {
                decision_type,
                user_id: user.user_id().to_owned(),
                attributes: user.attributes().clone(),
                decision_info,
            }));
    }
}
