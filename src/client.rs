use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

#[cfg(doc)]
use crate::NotificationType;
use crate::{
    cmab::{CmabCache, CmabService, DefaultCmabService, HttpCmabClient},
    config_manager::{PollingConfigManager, ProjectConfigManager, StaticConfigManager},
    configuration_fetcher::ConfigurationFetcherConfig,
    decision::{
        DecisionService, DecisionServiceOptions, DecisionSource, FeatureDecision, OverrideKey,
        OverrideStore,
    },
    events::{ConversionEvent, EventContext, EventProcessor, ImpressionEvent, UserEvent},
    notification::{LogEventNotification, Notification, NotificationCenter, TrackNotification},
    project_config::ProjectConfig,
    reasons::DecisionReasons,
    ClientConfig, DecideOption, DecideOptions, Error, Result, UserContext,
};

/// Result of deciding a flag for a user.
///
/// Failed decisions are disabled, carry no variation, and list the failure in `reasons`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// Decided flag.
    pub flag_key: String,
    /// User the decision was made for.
    pub user_id: String,
    /// Selected variation. `None` if the user got no variation.
    pub variation_key: Option<String>,
    /// Whether the flag is on for the user.
    pub enabled: bool,
    /// Experiment, rollout rule, or holdout that produced the decision.
    pub rule_key: Option<String>,
    /// Provenance of the decision. `None` if the decision failed.
    pub source: Option<DecisionSource>,
    /// Typed variable values by variable key.
    pub variables: HashMap<String, serde_json::Value>,
    /// Set when the variation came from a CMAB prediction.
    pub cmab_uuid: Option<Uuid>,
    /// Errors, followed by info messages if [`DecideOption::IncludeReasons`] is set.
    pub reasons: Vec<String>,
}

impl Decision {
    fn failed(flag_key: &str, user: &UserContext, reasons: &DecisionReasons) -> Decision {
        Decision {
            flag_key: flag_key.to_owned(),
            user_id: user.user_id().to_owned(),
            variation_key: None,
            enabled: false,
            rule_key: None,
            source: None,
            variables: HashMap::new(),
            cmab_uuid: None,
            reasons: reasons.to_report(),
        }
    }
}

/// A client that decides flags and experiments for users.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// # Datafile
///
/// Unless a datafile is provided with [`ClientConfig::datafile`], the client starts a background
/// thread that downloads the datafile and polls for new revisions. Decisions made before the
/// first datafile arrives fail with [`Error::SdkNotReady`]. Call [`Client::wait_for_configuration`]
/// to block until it is available.
///
/// # Examples
/// ```no_run
/// # use optiflag::{Attributes, Client, ClientConfig, UserContext};
/// let client = Client::new(ClientConfig::from_sdk_key("sdk-key"));
/// client.wait_for_configuration().unwrap();
///
/// let mut user = UserContext::new("user-id", Attributes::new());
/// user.set_attribute("age", 42.0);
/// let decision = client.decide(&user, "checkout_flow", &[]);
/// if decision.enabled {
///     // ...
/// }
/// ```
pub struct Client {
    config_manager: Arc<dyn ProjectConfigManager>,
    decision_service: DecisionService,
    notifications: Arc<NotificationCenter>,
    event_processor: Arc<dyn EventProcessor>,
    override_store: Arc<dyn OverrideStore>,
    default_decide_options: DecideOptions,
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    ///
    /// ```
    /// # use optiflag::{ClientConfig, Client};
    /// let client = Client::new(ClientConfig::from_sdk_key("sdk-key").datafile("{}"));
    /// ```
    pub fn new(config: ClientConfig) -> Self {
        let notifications = Arc::new(NotificationCenter::new());

        let config_manager: Arc<dyn ProjectConfigManager> = match &config.datafile {
            Some(datafile) => Arc::new(StaticConfigManager::new(
                datafile.clone(),
                notifications.clone(),
            )),
            None => {
                let fetcher = ConfigurationFetcherConfig {
                    url: config.datafile_url(),
                    access_token: config.access_token.clone(),
                    request_timeout: config.request_timeout,
                };
                match PollingConfigManager::start(
                    fetcher,
                    config.poller.clone(),
                    notifications.clone(),
                ) {
                    Ok(manager) => Arc::new(manager),
                    Err(err) => {
                        log::error!(target: "optiflag", "failed to start datafile polling: {err}");
                        Arc::new(StaticConfigManager::failed(err, notifications.clone()))
                    }
                }
            }
        };

        let cmab_service: Option<Arc<dyn CmabService>> = match config.cmab_service {
            Some(service) => Some(service),
            None => match HttpCmabClient::new(&config.sdk_key, &config.cmab) {
                Ok(client) => Some(Arc::new(DefaultCmabService::new(
                    CmabCache::new(config.cmab.cache_ttl),
                    Arc::new(client),
                ))),
                Err(err) => {
                    log::error!(target: "optiflag", "failed to create CMAB client: {err}");
                    None
                }
            },
        };

        let decision_service = DecisionService::new(
            config_manager.clone(),
            notifications.clone(),
            DecisionServiceOptions {
                override_store: Some(config.override_store.clone()),
                cmab_service,
                user_profile_service: config.user_profile_service,
            },
        );

        Client {
            config_manager,
            decision_service,
            notifications,
            event_processor: config.event_processor,
            override_store: config.override_store,
            default_decide_options: config.default_decide_options,
        }
    }

    /// Decide `flag_key` for `user`.
    ///
    /// Never fails: errors are reported as a disabled [`Decision`] with the error in
    /// [`Decision::reasons`]. Use [`Client::decide_with_error`] to get the error itself.
    ///
    /// Unless [`DecideOption::DisableDecisionEvent`] is set, an impression is dispatched to the
    /// event processor for experiment decisions (and for every decision if the project sends flag
    /// decisions).
    ///
    /// # Examples
    ///
    /// ```
    /// # fn test(client: &optiflag::Client, user: &optiflag::UserContext) {
    /// use optiflag::DecideOption;
    ///
    /// let decision = client.decide(user, "checkout_flow", &[DecideOption::IncludeReasons]);
    /// let discount = decision
    ///     .variables
    ///     .get("discount")
    ///     .and_then(|it| it.as_i64())
    ///     // default value
    ///     .unwrap_or(0);
    /// # }
    /// ```
    pub fn decide(&self, user: &UserContext, flag_key: &str, options: &[DecideOption]) -> Decision {
        self.decide_with_error(user, flag_key, options).0
    }

    /// Same as [`Client::decide`], also returning the error that failed the decision, if any.
    pub fn decide_with_error(
        &self,
        user: &UserContext,
        flag_key: &str,
        options: &[DecideOption],
    ) -> (Decision, Option<Error>) {
        let options = self.options(options);
        match self.config_manager.get_config() {
            Ok(config) => self.decide_flag(&config, user, flag_key, &options),
            Err(err) => {
                log::warn!(target: "optiflag", flag_key; "failed to decide flag: {err}");
                let mut reasons = DecisionReasons::new(&options);
                reasons.add_error(&err);
                (Decision::failed(flag_key, user, &reasons), Some(err))
            }
        }
    }

    /// Decide several flags against the same datafile revision.
    ///
    /// Returns an empty map if no datafile is available. Disabled decisions are omitted when
    /// [`DecideOption::EnabledFlagsOnly`] is set.
    pub fn decide_for_keys<K: AsRef<str>>(
        &self,
        user: &UserContext,
        flag_keys: impl IntoIterator<Item = K>,
        options: &[DecideOption],
    ) -> HashMap<String, Decision> {
        let options = self.options(options);
        let config = match self.config_manager.get_config() {
            Ok(config) => config,
            Err(err) => {
                log::warn!(target: "optiflag", "failed to decide flags: {err}");
                return HashMap::new();
            }
        };
        self.decide_many(&config, user, flag_keys, &options)
    }

    /// Decide every flag in the datafile.
    ///
    /// See [`Client::decide_for_keys`].
    pub fn decide_all(
        &self,
        user: &UserContext,
        options: &[DecideOption],
    ) -> HashMap<String, Decision> {
        let options = self.options(options);
        let config = match self.config_manager.get_config() {
            Ok(config) => config,
            Err(err) => {
                log::warn!(target: "optiflag", "failed to decide flags: {err}");
                return HashMap::new();
            }
        };
        self.decide_many(&config, user, config.feature_keys(), &options)
    }

    /// Get the variation key of `experiment_key` for `user`.
    ///
    /// Returns `Ok(None)` if the user is not in the experiment. Emits an `ab-test`
    /// [`NotificationType::Decision`] notification. No impression is dispatched.
    ///
    /// # Errors
    ///
    /// - [`Error::SdkNotReady`] or the datafile error if no datafile is available.
    /// - [`Error::ExperimentKeyInvalid`] if the experiment does not exist.
    /// - CMAB errors if the experiment is a CMAB experiment and could not be decided.
    pub fn get_variation(&self, experiment_key: &str, user: &UserContext) -> Result<Option<String>> {
        let config = self.config_manager.get_config()?;
        let options = self.default_decide_options;
        let decision = self.decision_service.get_experiment_decision(
            &config,
            experiment_key,
            user,
            &options,
            &mut DecisionReasons::new(&options),
        )?;
        Ok(decision.variation.map(|it| it.key.clone()))
    }

    /// Decide `flag_key` for `user` and return the typed value of `variable_key`.
    ///
    /// Emits a `feature-variable` [`NotificationType::Decision`] notification.
    ///
    /// # Errors
    ///
    /// - [`Error::SdkNotReady`] or the datafile error if no datafile is available.
    /// - [`Error::FlagKeyInvalid`] or [`Error::VariableKeyInvalid`] for unknown keys.
    /// - CMAB errors if the flag could not be decided.
    pub fn get_feature_variable(
        &self,
        flag_key: &str,
        variable_key: &str,
        user: &UserContext,
    ) -> Result<serde_json::Value> {
        let config = self.config_manager.get_config()?;
        let options = self.default_decide_options;
        self.decision_service.get_feature_variable(
            &config,
            flag_key,
            variable_key,
            user,
            &options,
            &mut DecisionReasons::new(&options),
        )
    }

    /// Track a conversion of `event_key` for `user`.
    ///
    /// Dispatches a conversion event and emits [`NotificationType::LogEvent`] and
    /// [`NotificationType::Track`] notifications.
    ///
    /// # Errors
    ///
    /// - [`Error::SdkNotReady`] or the datafile error if no datafile is available.
    /// - [`Error::EventKeyInvalid`] if the event does not exist.
    pub fn track(
        &self,
        event_key: &str,
        user: &UserContext,
        tags: HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let config = self.config_manager.get_config()?;
        let Some(event) = config.event(event_key) else {
            log::warn!(target: "optiflag", event_key; "tracked event is not in the datafile");
            return Err(Error::EventKeyInvalid(event_key.to_owned()));
        };

        self.dispatch(UserEvent::Conversion(ConversionEvent {
            uuid: Uuid::new_v4(),
            timestamp: Utc::now(),
            context: event_context(&config),
            user_id: user.user_id().to_owned(),
            attributes: user.attributes().clone(),
            event_key: event.key.clone(),
            event_id: event.id.clone(),
            tags: tags.clone(),
        }));

        self.notifications
            .send(&Notification::Track(TrackNotification {
                event_key: event_key.to_owned(),
                user_id: user.user_id().to_owned(),
                attributes: user.attributes().clone(),
                event_tags: tags,
            }));
        Ok(())
    }

    /// Force `user_id` into `variation_key` of `experiment_key`, or drop the override if
    /// `variation_key` is `None`.
    ///
    /// Overrides are validated when used: an override naming a variation the experiment does not
    /// have is ignored.
    pub fn set_forced_variation(
        &self,
        experiment_key: &str,
        user_id: &str,
        variation_key: Option<&str>,
    ) {
        let key = OverrideKey::new(experiment_key, user_id);
        match variation_key {
            Some(variation_key) => self
                .override_store
                .set_variation(key, variation_key.to_owned()),
            None => {
                self.override_store.remove_variation(&key);
            }
        }
    }

    /// Variation key forced with [`Client::set_forced_variation`].
    pub fn get_forced_variation(&self, experiment_key: &str, user_id: &str) -> Option<String> {
        self.override_store
            .get_variation(&OverrideKey::new(experiment_key, user_id))
    }

    /// Listener registry for decision, config update, track, and event notifications.
    pub fn notification_center(&self) -> &NotificationCenter {
        &self.notifications
    }

    /// Block until the first datafile is available or the first attempt to get one has failed.
    ///
    /// # Errors
    ///
    /// Returns the error that prevented the datafile from being installed.
    pub fn wait_for_configuration(&self) -> Result<()> {
        self.config_manager.wait_for_configuration()
    }

    /// The active datafile snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SdkNotReady`] or the datafile error if no datafile is available.
    pub fn get_project_config(&self) -> Result<Arc<ProjectConfig>> {
        self.config_manager.get_config()
    }

    /// Error from the most recent failed datafile update, for example [`Error::Forbidden`].
    ///
    /// A failed update keeps the previous snapshot active, so decisions keep working.
    pub fn last_error(&self) -> Option<Error> {
        self.config_manager.last_error()
    }

    /// Stop datafile polling. Decisions keep using the last snapshot.
    pub fn close(&self) {
        self.config_manager.close();
    }

    fn options(&self, options: &[DecideOption]) -> DecideOptions {
        self.default_decide_options.merge(options.into())
    }

    fn decide_many<K: AsRef<str>>(
        &self,
        config: &ProjectConfig,
        user: &UserContext,
        flag_keys: impl IntoIterator<Item = K>,
        options: &DecideOptions,
    ) -> HashMap<String, Decision> {
        flag_keys
            .into_iter()
            .map(|flag_key| self.decide_flag(config, user, flag_key.as_ref(), options).0)
            .filter(|decision| decision.enabled || !options.enabled_flags_only)
            .map(|decision| (decision.flag_key.clone(), decision))
            .collect()
    }

    fn decide_flag(
        &self,
        config: &ProjectConfig,
        user: &UserContext,
        flag_key: &str,
        options: &DecideOptions,
    ) -> (Decision, Option<Error>) {
        let mut reasons = DecisionReasons::new(options);
        let decision = match self.decision_service.get_feature_decision(
            config,
            flag_key,
            user,
            options,
            &mut reasons,
        ) {
            Ok(decision) => decision,
            Err(err) => {
                log::warn!(target: "optiflag", flag_key, user_id = user.user_id();
                           "failed to decide flag: {err}");
                return (Decision::failed(flag_key, user, &reasons), Some(err));
            }
        };

        let variables = match config.feature(flag_key) {
            Some(feature) if !options.exclude_variables => feature
                .variables
                .iter()
                .map(|variable| {
                    let value = decision.variable_value(variable).unwrap_or_else(|| {
                        log::warn!(target: "optiflag", flag_key, variable_key:% = variable.key;
                                   "variable value does not match its declared type");
                        serde_json::Value::Null
                    });
                    (variable.key.clone(), value)
                })
                .collect(),
            _ => HashMap::new(),
        };

        if !options.disable_decision_event {
            self.send_impression(config, flag_key, user, &decision);
        }

        let result = Decision {
            flag_key: flag_key.to_owned(),
            user_id: user.user_id().to_owned(),
            variation_key: decision.variation.map(|it| it.key.clone()),
            enabled: decision.enabled(),
            rule_key: decision.rule.map(|it| it.key.clone()),
            source: Some(decision.source),
            variables,
            cmab_uuid: decision.cmab_uuid,
            reasons: reasons.to_report(),
        };
        (result, None)
    }

    fn send_impression(
        &self,
        config: &ProjectConfig,
        flag_key: &str,
        user: &UserContext,
        decision: &FeatureDecision,
    ) {
        let Some(variation) = decision.variation else {
            return;
        };
        if decision.source == DecisionSource::Rollout && !config.send_flag_decisions() {
            return;
        }

        self.dispatch(UserEvent::Impression(ImpressionEvent {
            uuid: Uuid::new_v4(),
            timestamp: Utc::now(),
            context: event_context(config),
            user_id: user.user_id().to_owned(),
            attributes: user.attributes().clone(),
            flag_key: flag_key.to_owned(),
            rule_key: decision.rule.map(|it| it.key.clone()).unwrap_or_default(),
            rule_type: decision.source,
            experiment_id: decision.rule.map(|it| it.id.clone()).unwrap_or_default(),
            variation_key: variation.key.clone(),
            variation_id: variation.id.clone(),
            enabled: variation.feature_enabled,
            cmab_uuid: decision.cmab_uuid,
        }));
    }

    fn dispatch(&self, event: UserEvent) {
        self.event_processor.process(event.clone());
        self.notifications
            .send(&Notification::LogEvent(LogEventNotification { event }));
    }
}

fn event_context(config: &ProjectConfig) -> EventContext {
    EventContext {
        account_id: config.account_id().to_owned(),
        project_id: config.project_id().to_owned(),
        revision: config.revision().to_owned(),
        anonymize_ip: config.anonymize_ip(),
    }
}
