//! Project configuration snapshots.
//!
//! A [`ProjectConfig`] is an immutable view of one datafile revision. Snapshots are shared by
//! reference (`Arc<ProjectConfig>`) between all readers and replaced as a whole when a new
//! revision arrives.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    audience::{Audience, ConditionTree},
    Error, Result,
};

mod datafile;

use datafile::{DatafileWire, ExperimentWire, TrafficRangeWire};

const MIN_SUPPORTED_DATAFILE_VERSION: u32 = 4;
const RUNNING_STATUS: &str = "Running";

/// A variation of an experiment, rollout rule, or holdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variation {
    /// Datafile id.
    pub id: String,
    /// Human-readable key reported in decisions.
    pub key: String,
    /// Whether the flag is on for users in this variation.
    pub feature_enabled: bool,
    /// Variable id to raw (string-encoded) value.
    pub variables: HashMap<String, String>,
}

/// A half-open `[previous end, end_of_range)` slice of the bucketing line assigned to an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficRange {
    /// Variation id, or experiment id for group allocations.
    pub entity_id: String,
    /// Exclusive upper bound of the slice.
    pub end_of_range: u32,
}

/// Contextual multi-armed bandit settings of an experiment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmab {
    /// Ids of the attributes sent to the prediction endpoint.
    pub attribute_ids: Vec<String>,
    /// Share of traffic (out of 10000) that enters the bandit.
    pub traffic_allocation: u32,
}

/// An experiment, a rollout rule, or a holdout rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Experiment {
    /// Datafile id. Also the bucketing seed.
    pub id: String,
    /// Rule key reported in decisions.
    pub key: String,
    /// Only `Running` experiments are evaluated.
    pub status: String,
    /// Campaign id, reported in impressions.
    pub layer_id: String,
    /// `a/b`, `mab`, or empty. Other values are rule types this SDK does not understand.
    pub rule_type: String,
    /// `None` admits everyone.
    pub audience_conditions: Option<ConditionTree>,
    /// Variations by id.
    pub variations: HashMap<String, Variation>,
    /// Variation key to variation id.
    pub variation_key_to_id: HashMap<String, String>,
    /// Ranges target variation ids.
    pub traffic_allocation: Vec<TrafficRange>,
    /// Id of the enclosing mutual exclusion group.
    pub group_id: Option<String>,
    /// User id to variation key.
    pub whitelist: HashMap<String, String>,
    /// Set for experiments decided by the prediction service.
    pub cmab: Option<Cmab>,
}

impl Experiment {
    /// Return `true` if the experiment is live.
    pub fn is_running(&self) -> bool {
        self.status == RUNNING_STATUS
    }

    /// Return `true` if the experiment is a contextual bandit.
    pub fn is_cmab(&self) -> bool {
        self.cmab.is_some()
    }

    /// Return `true` if the decision pipeline knows how to evaluate this rule type.
    pub fn has_supported_type(&self) -> bool {
        matches!(self.rule_type.as_str(), "a/b" | "mab" | "")
    }

    /// Look up a variation by id.
    pub fn variation(&self, id: &str) -> Option<&Variation> {
        self.variations.get(id)
    }

    /// Look up a variation by key.
    pub fn variation_by_key(&self, key: &str) -> Option<&Variation> {
        self.variation_key_to_id
            .get(key)
            .and_then(|id| self.variations.get(id))
    }
}

/// Mutual exclusion policy of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupPolicy {
    /// At most one experiment of the group admits a user.
    Random,
    /// Experiments may share users.
    Overlapping,
}

/// A group of experiments.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    /// Datafile id. Also the bucketing seed for admission.
    pub id: String,
    /// How the group's experiments share users.
    pub policy: GroupPolicy,
    /// Ranges target experiment ids.
    pub traffic_allocation: Vec<TrafficRange>,
}

/// Ordered targeting rules of a flag. The last rule is the "everyone else" rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Rollout {
    /// Datafile id.
    pub id: String,
    /// Targeting rules in evaluation order.
    pub rules: Vec<Experiment>,
}

/// Type of a flag variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    /// `true` or `false`.
    Boolean,
    /// A signed 64-bit integer.
    Integer,
    /// A floating point number.
    Double,
    /// Any string, passed through unchanged.
    String,
    /// A JSON document.
    Json,
}

/// A flag variable definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// Datafile id, referenced by variation values.
    pub id: String,
    /// Key used by [`crate::Client::get_feature_variable`].
    pub key: String,
    /// Declared value type.
    pub variable_type: VariableType,
    /// Raw value used when the variation does not override it.
    pub default_value: String,
}

impl Variable {
    /// Convert a raw string value to a typed JSON value. Returns `None` if the raw value does not
    /// fit the variable type.
    pub fn typed_value(&self, raw: &str) -> Option<serde_json::Value> {
        Some(match self.variable_type {
            VariableType::Boolean => serde_json::Value::Bool(raw.parse().ok()?),
            VariableType::Integer => serde_json::Value::from(raw.parse::<i64>().ok()?),
            VariableType::Double => {
                serde_json::Number::from_f64(raw.parse().ok()?).map(serde_json::Value::Number)?
            }
            VariableType::String => serde_json::Value::String(raw.to_owned()),
            VariableType::Json => serde_json::from_str(raw).ok()?,
        })
    }
}

/// A feature flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Datafile id.
    pub id: String,
    /// Flag key used by decide calls.
    pub key: String,
    /// Declared variables.
    pub variables: Vec<Variable>,
    /// Experiments attached to the flag, in evaluation order.
    pub feature_experiments: Vec<Experiment>,
    /// Targeted delivery rules evaluated after the experiments.
    pub rollout: Option<Rollout>,
}

impl Feature {
    /// Look up a variable by key.
    pub fn variable(&self, key: &str) -> Option<&Variable> {
        self.variables.iter().find(|it| it.key == key)
    }
}

/// A holdout: a globally reserved slice of traffic excluded from feature tests and rollouts.
#[derive(Debug, Clone, PartialEq)]
pub struct Holdout {
    /// The holdout rule. Structurally an experiment.
    pub rule: Experiment,
    /// Flag ids the holdout applies to. Empty means every flag.
    pub included_flags: Vec<String>,
    /// Flag ids the holdout never applies to.
    pub excluded_flags: Vec<String>,
}

impl Holdout {
    fn applies_to(&self, flag_id: &str) -> bool {
        if self.excluded_flags.iter().any(|it| it == flag_id) {
            return false;
        }
        self.included_flags.is_empty() || self.included_flags.iter().any(|it| it == flag_id)
    }
}

/// A user attribute declared in the datafile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDefinition {
    /// Datafile id.
    pub id: String,
    /// Attribute name on the user context.
    pub key: String,
}

/// A conversion event declared in the datafile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDefinition {
    /// Datafile id.
    pub id: String,
    /// Key passed to [`crate::Client::track`].
    pub key: String,
    /// Experiments measuring this event.
    pub experiment_ids: Vec<String>,
}

/// A third-party integration declared in the datafile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Integration {
    /// Integration name, for example `odp`.
    pub key: String,
    /// Service host, if the integration has one.
    pub host: Option<String>,
    /// Public API key, if the integration has one.
    pub public_key: Option<String>,
}

/// Immutable view of one datafile revision.
#[derive(Debug)]
pub struct ProjectConfig {
    account_id: String,
    project_id: String,
    revision: String,
    sdk_key: String,
    environment_key: String,
    anonymize_ip: bool,
    bot_filtering: bool,
    send_flag_decisions: bool,
    attributes: HashMap<String, AttributeDefinition>,
    attribute_key_to_id: HashMap<String, String>,
    audiences: HashMap<String, Audience>,
    events: HashMap<String, EventDefinition>,
    experiments: HashMap<String, Experiment>,
    experiment_key_to_id: HashMap<String, String>,
    features: HashMap<String, Feature>,
    /// Flag keys in datafile order.
    feature_keys: Vec<String>,
    groups: HashMap<String, Group>,
    holdouts: Vec<Holdout>,
    /// Flag key -> variation key -> variation, across all rules of the flag.
    flag_variations: HashMap<String, HashMap<String, Variation>>,
    integrations: Vec<Integration>,
    datafile: Vec<u8>,
}

impl ProjectConfig {
    /// Parse a datafile into a snapshot.
    ///
    /// # Errors
    ///
    /// - [`Error::DatafileParse`] if the JSON is malformed.
    /// - [`Error::UnsupportedDatafileVersion`] for datafile versions below 4.
    pub fn from_datafile(datafile: impl Into<Vec<u8>>) -> Result<ProjectConfig> {
        let datafile = datafile.into();
        let wire: DatafileWire = serde_json::from_slice(&datafile)?;

        match wire.version.parse::<u32>() {
            Ok(version) if version >= MIN_SUPPORTED_DATAFILE_VERSION => {}
            _ => return Err(Error::UnsupportedDatafileVersion(wire.version)),
        }

        let mut audiences = HashMap::new();
        for audience in wire.audiences {
            let conditions = serde_json::from_str::<serde_json::Value>(&audience.conditions)
                .map_err(|err| err.to_string())
                .and_then(|value| ConditionTree::from_json(&value));
            match conditions {
                Ok(conditions) => {
                    audiences.insert(
                        audience.id.clone(),
                        Audience {
                            id: audience.id,
                            name: audience.name,
                            conditions,
                        },
                    );
                }
                Err(err) => {
                    // A broken legacy audience only disables rules that reference it.
                    log::warn!(target: "optiflag", audience_id:% = audience.id;
                               "skipping audience: {err}");
                }
            }
        }
        // Typed audiences take precedence over legacy audiences with the same id.
        for audience in wire.typed_audiences {
            audiences.insert(
                audience.id.clone(),
                Audience {
                    id: audience.id,
                    name: audience.name,
                    conditions: audience.conditions,
                },
            );
        }

        let mut experiments = HashMap::new();
        for experiment in wire.experiments {
            let experiment = build_experiment(experiment, None);
            experiments.insert(experiment.id.clone(), experiment);
        }

        let mut groups = HashMap::new();
        for group in wire.groups {
            let policy = match group.policy.as_str() {
                "overlapping" => GroupPolicy::Overlapping,
                _ => GroupPolicy::Random,
            };
            for experiment in group.experiments {
                let experiment = build_experiment(experiment, Some(group.id.clone()));
                experiments.insert(experiment.id.clone(), experiment);
            }
            groups.insert(
                group.id.clone(),
                Group {
                    id: group.id,
                    policy,
                    traffic_allocation: build_traffic(group.traffic_allocation),
                },
            );
        }

        let rollouts: HashMap<String, Rollout> = wire
            .rollouts
            .into_iter()
            .map(|rollout| {
                let rollout = Rollout {
                    id: rollout.id,
                    rules: rollout
                        .experiments
                        .into_iter()
                        .map(|rule| build_experiment(rule, None))
                        .collect(),
                };
                (rollout.id.clone(), rollout)
            })
            .collect();

        let mut features = HashMap::new();
        let mut feature_keys = Vec::new();
        let mut flag_variations = HashMap::new();
        for flag in wire.feature_flags {
            let feature_experiments: Vec<Experiment> = flag
                .experiment_ids
                .iter()
                .filter_map(|id| {
                    let experiment = experiments.get(id).cloned();
                    if experiment.is_none() {
                        log::warn!(target: "optiflag", flag_key:% = flag.key, experiment_id:% = id;
                                   "flag references an unknown experiment");
                    }
                    experiment
                })
                .collect();
            let rollout = rollouts.get(&flag.rollout_id).cloned();

            let mut variations: HashMap<String, Variation> = HashMap::new();
            let rules = feature_experiments
                .iter()
                .chain(rollout.iter().flat_map(|rollout| rollout.rules.iter()));
            for rule in rules {
                for variation in rule.variations.values() {
                    variations
                        .entry(variation.key.clone())
                        .or_insert_with(|| variation.clone());
                }
            }
            flag_variations.insert(flag.key.clone(), variations);

            let variables = flag
                .variables
                .into_iter()
                .filter_map(|variable| {
                    let variable_type = match (
                        variable.variable_type.as_str(),
                        variable.sub_type.as_deref(),
                    ) {
                        ("string", Some("json")) | ("json", _) => VariableType::Json,
                        ("string", _) => VariableType::String,
                        ("boolean", _) => VariableType::Boolean,
                        ("integer", _) => VariableType::Integer,
                        ("double", _) => VariableType::Double,
                        (other, _) => {
                            log::warn!(target: "optiflag", variable_key:% = variable.key;
                                       "unknown variable type {other:?}");
                            return None;
                        }
                    };
                    Some(Variable {
                        id: variable.id,
                        key: variable.key,
                        variable_type,
                        default_value: variable.default_value,
                    })
                })
                .collect();

            feature_keys.push(flag.key.clone());
            features.insert(
                flag.key.clone(),
                Feature {
                    id: flag.id,
                    key: flag.key,
                    variables,
                    feature_experiments,
                    rollout,
                },
            );
        }

        let holdouts = wire
            .holdouts
            .into_iter()
            .map(|holdout| Holdout {
                rule: build_experiment(holdout.rule, None),
                included_flags: holdout.included_flags,
                excluded_flags: holdout.excluded_flags,
            })
            .collect();

        let attributes: HashMap<String, AttributeDefinition> = wire
            .attributes
            .into_iter()
            .map(|it| {
                (
                    it.id.clone(),
                    AttributeDefinition {
                        id: it.id,
                        key: it.key,
                    },
                )
            })
            .collect();
        let attribute_key_to_id = attributes
            .values()
            .map(|it| (it.key.clone(), it.id.clone()))
            .collect();

        let experiment_key_to_id = experiments
            .values()
            .map(|it| (it.key.clone(), it.id.clone()))
            .collect();

        let events = wire
            .events
            .into_iter()
            .map(|it| {
                (
                    it.key.clone(),
                    EventDefinition {
                        id: it.id,
                        key: it.key,
                        experiment_ids: it.experiment_ids,
                    },
                )
            })
            .collect();

        let integrations = wire
            .integrations
            .into_iter()
            .map(|it| Integration {
                key: it.key,
                host: it.host,
                public_key: it.public_key,
            })
            .collect();

        Ok(ProjectConfig {
            account_id: wire.account_id,
            project_id: wire.project_id,
            revision: wire.revision,
            sdk_key: wire.sdk_key,
            environment_key: wire.environment_key,
            anonymize_ip: wire.anonymize_ip,
            bot_filtering: wire.bot_filtering,
            send_flag_decisions: wire.send_flag_decisions,
            attributes,
            attribute_key_to_id,
            audiences,
            events,
            experiments,
            experiment_key_to_id,
            features,
            feature_keys,
            groups,
            holdouts,
            flag_variations,
            integrations,
            datafile,
        })
    }

    /// Account the project belongs to.
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Project id.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Datafile revision.
    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// SDK key the datafile was published for.
    pub fn sdk_key(&self) -> &str {
        &self.sdk_key
    }

    /// Environment the datafile was published for.
    pub fn environment_key(&self) -> &str {
        &self.environment_key
    }

    /// Whether events should drop the user IP.
    pub fn anonymize_ip(&self) -> bool {
        self.anonymize_ip
    }

    /// Whether bot traffic is excluded from results.
    pub fn bot_filtering(&self) -> bool {
        self.bot_filtering
    }

    /// Whether impressions are sent for decisions that did not come from an experiment.
    pub fn send_flag_decisions(&self) -> bool {
        self.send_flag_decisions
    }

    /// Raw datafile bytes this snapshot was built from.
    pub fn datafile(&self) -> &[u8] {
        &self.datafile
    }

    /// Audiences by id. Typed audiences replace legacy ones.
    pub fn audiences(&self) -> &HashMap<String, Audience> {
        &self.audiences
    }

    /// Look up a flag by key.
    pub fn feature(&self, key: &str) -> Option<&Feature> {
        self.features.get(key)
    }

    /// All flag keys in datafile order.
    pub fn feature_keys(&self) -> &[String] {
        &self.feature_keys
    }

    /// Look up an experiment by id. Rollout and holdout rules are not indexed.
    pub fn experiment_by_id(&self, id: &str) -> Option<&Experiment> {
        self.experiments.get(id)
    }

    /// Look up an experiment by key.
    pub fn experiment_by_key(&self, key: &str) -> Option<&Experiment> {
        self.experiment_key_to_id
            .get(key)
            .and_then(|id| self.experiments.get(id))
    }

    /// Look up a group by id.
    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.get(id)
    }

    /// Look up an event definition by key.
    pub fn event(&self, key: &str) -> Option<&EventDefinition> {
        self.events.get(key)
    }

    /// Attribute name for a datafile attribute id.
    pub fn attribute_key(&self, id: &str) -> Option<&str> {
        self.attributes.get(id).map(|it| it.key.as_str())
    }

    /// Datafile attribute id for an attribute name.
    pub fn attribute_id(&self, key: &str) -> Option<&str> {
        self.attribute_key_to_id.get(key).map(String::as_str)
    }

    /// Integrations declared in the datafile.
    pub fn integrations(&self) -> &[Integration] {
        &self.integrations
    }

    /// Holdouts that apply to the flag, in declaration order.
    pub fn holdouts_for_flag<'a>(&'a self, flag_id: &'a str) -> impl Iterator<Item = &'a Holdout> {
        self.holdouts
            .iter()
            .filter(move |holdout| holdout.applies_to(flag_id))
    }

    /// Look up a variation by key among every rule of a flag.
    pub fn flag_variation(&self, flag_key: &str, variation_key: &str) -> Option<&Variation> {
        self.flag_variations.get(flag_key)?.get(variation_key)
    }
}

fn build_traffic(ranges: Vec<TrafficRangeWire>) -> Vec<TrafficRange> {
    ranges
        .into_iter()
        .map(|it| TrafficRange {
            entity_id: it.entity_id,
            end_of_range: it.end_of_range,
        })
        .collect()
}

fn build_experiment(wire: ExperimentWire, group_id: Option<String>) -> Experiment {
    // An empty condition list means "no conditions", not "nobody".
    let audience_conditions = match wire.audience_conditions {
        Some(conditions) if !conditions.is_empty() => Some(conditions),
        _ if !wire.audience_ids.is_empty() => {
            Some(ConditionTree::any_of_audiences(&wire.audience_ids))
        }
        _ => None,
    };

    let mut variations = HashMap::new();
    let mut variation_key_to_id = HashMap::new();
    for variation in wire.variations {
        variation_key_to_id.insert(variation.key.clone(), variation.id.clone());
        variations.insert(
            variation.id.clone(),
            Variation {
                id: variation.id,
                key: variation.key,
                feature_enabled: variation.feature_enabled,
                variables: variation
                    .variables
                    .into_iter()
                    .map(|it| (it.id, it.value))
                    .collect(),
            },
        );
    }

    Experiment {
        id: wire.id,
        key: wire.key,
        status: wire.status,
        layer_id: wire.layer_id,
        rule_type: wire.rule_type.unwrap_or_default(),
        audience_conditions,
        variations,
        variation_key_to_id,
        traffic_allocation: build_traffic(wire.traffic_allocation),
        group_id,
        whitelist: wire.forced_variations,
        cmab: wire.cmab.map(|cmab| Cmab {
            attribute_ids: cmab.attribute_ids,
            traffic_allocation: cmab.traffic_allocation,
        }),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{GroupPolicy, ProjectConfig, VariableType};
    use crate::{audience::ConditionTree, Error};

    pub(crate) fn fixture() -> ProjectConfig {
        ProjectConfig::from_datafile(
            std::fs::read("tests/data/datafile.json").expect("fixture should be readable"),
        )
        .expect("fixture should parse")
    }

    /// Raw fixture datafile with its revision replaced.
    pub(crate) fn datafile_with_revision(revision: &str) -> Vec<u8> {
        std::fs::read_to_string("tests/data/datafile.json")
            .expect("fixture should be readable")
            .replace(
                "\"revision\": \"42\"",
                &format!("\"revision\": \"{revision}\""),
            )
            .into_bytes()
    }

    #[test]
    fn parses_fixture() {
        let config = fixture();
        assert_eq!(config.revision(), "42");
        assert_eq!(config.account_id(), "12001");
        assert!(config.feature("checkout_flow").is_some());
        assert_eq!(config.attribute_key("attr_age"), Some("age"));
        assert_eq!(config.attribute_id("country"), Some("attr_country"));
        assert!(!config.datafile().is_empty());
    }

    #[test]
    fn stamps_group_on_group_experiments() {
        let config = fixture();
        let experiment = config.experiment_by_key("group_exp_1").unwrap();
        assert_eq!(experiment.group_id.as_deref(), Some("group_1"));
        assert_eq!(
            config.group("group_1").unwrap().policy,
            GroupPolicy::Random
        );
    }

    #[test]
    fn typed_audiences_override_legacy() {
        let config = fixture();
        let audience = &config.audiences()["aud_adult"];
        assert!(matches!(audience.conditions, ConditionTree::And(_)));
    }

    #[test]
    fn audience_ids_become_implicit_or() {
        let config = fixture();
        let experiment = config.experiment_by_key("ab_test").unwrap();
        assert_eq!(
            experiment.audience_conditions,
            Some(ConditionTree::Or(vec![ConditionTree::AudienceId(
                "aud_adult".into()
            )]))
        );
    }

    #[test]
    fn empty_audience_conditions_admit_everyone() {
        let datafile = std::fs::read_to_string("tests/data/datafile.json")
            .unwrap()
            .replace(r#""audienceIds": []"#, r#""audienceIds": [], "audienceConditions": []"#);
        let config = ProjectConfig::from_datafile(datafile).unwrap();
        let experiment = config.experiment_by_key("cmab_exp").unwrap();
        assert_eq!(experiment.audience_conditions, None);
    }

    #[test]
    fn empty_audience_conditions_fall_back_to_audience_ids() {
        let datafile = std::fs::read_to_string("tests/data/datafile.json")
            .unwrap()
            .replace(
                r#""audienceIds": ["aud_adult"]"#,
                r#""audienceIds": ["aud_adult"], "audienceConditions": []"#,
            );
        let config = ProjectConfig::from_datafile(datafile).unwrap();
        let experiment = config.experiment_by_key("ab_test").unwrap();
        assert_eq!(
            experiment.audience_conditions,
            Some(ConditionTree::any_of_audiences(&["aud_adult".into()]))
        );
    }

    #[test]
    fn flag_variations_cover_all_rules() {
        let config = fixture();
        assert!(config.flag_variation("checkout_flow", "treatment").is_some());
        assert!(config.flag_variation("checkout_flow", "rollout_on").is_some());
        assert!(config.flag_variation("checkout_flow", "missing").is_none());
    }

    #[test]
    fn variable_types() {
        let config = fixture();
        let feature = config.feature("checkout_flow").unwrap();
        assert_eq!(
            feature.variable("layout").unwrap().variable_type,
            VariableType::Json
        );
        assert_eq!(
            feature.variable("discount").unwrap().typed_value("5"),
            Some(serde_json::json!(5))
        );
    }

    #[test]
    fn holdouts_respect_included_and_excluded_flags() {
        let config = fixture();
        let checkout = config.feature("checkout_flow").unwrap();
        let banner = config.feature("banner").unwrap();
        assert_eq!(config.holdouts_for_flag(&checkout.id).count(), 1);
        assert_eq!(config.holdouts_for_flag(&banner.id).count(), 0);
    }

    #[test]
    fn rejects_old_versions() {
        let err = ProjectConfig::from_datafile(r#"{"version": "3", "revision": "1"}"#).unwrap_err();
        assert!(matches!(err, Error::UnsupportedDatafileVersion(v) if v == "3"));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = ProjectConfig::from_datafile("{not json").unwrap_err();
        assert!(matches!(err, Error::DatafileParse(_)));
    }

    #[test]
    fn minimal_datafile() {
        let config =
            ProjectConfig::from_datafile(r#"{"version": "4", "revision": "7"}"#).unwrap();
        assert_eq!(config.revision(), "7");
        assert!(config.feature_keys().is_empty());
    }
}
