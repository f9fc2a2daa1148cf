//! Wire format of the datafile.
use std::collections::HashMap;

use serde::Deserialize;

use crate::audience::ConditionTree;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DatafileWire {
    pub version: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub project_id: String,
    pub revision: String,
    #[serde(default)]
    pub sdk_key: String,
    #[serde(default)]
    pub environment_key: String,
    #[serde(default, rename = "anonymizeIP")]
    pub anonymize_ip: bool,
    #[serde(default)]
    pub bot_filtering: bool,
    #[serde(default)]
    pub send_flag_decisions: bool,
    #[serde(default)]
    pub attributes: Vec<AttributeWire>,
    #[serde(default)]
    pub audiences: Vec<AudienceWire>,
    #[serde(default)]
    pub typed_audiences: Vec<TypedAudienceWire>,
    #[serde(default)]
    pub events: Vec<EventWire>,
    #[serde(default)]
    pub experiments: Vec<ExperimentWire>,
    #[serde(default)]
    pub feature_flags: Vec<FeatureFlagWire>,
    #[serde(default)]
    pub rollouts: Vec<RolloutWire>,
    #[serde(default)]
    pub groups: Vec<GroupWire>,
    #[serde(default)]
    pub holdouts: Vec<HoldoutWire>,
    #[serde(default)]
    pub integrations: Vec<IntegrationWire>,
}

#[derive(Debug, Deserialize)]
pub(super) struct AttributeWire {
    pub id: String,
    pub key: String,
}

/// Legacy audiences carry their conditions as a JSON-encoded string.
#[derive(Debug, Deserialize)]
pub(super) struct AudienceWire {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub conditions: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct TypedAudienceWire {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub conditions: ConditionTree,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct EventWire {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub experiment_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ExperimentWire {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub layer_id: String,
    #[serde(default, rename = "type")]
    pub rule_type: Option<String>,
    #[serde(default)]
    pub audience_ids: Vec<String>,
    #[serde(default)]
    pub audience_conditions: Option<ConditionTree>,
    #[serde(default)]
    pub variations: Vec<VariationWire>,
    #[serde(default)]
    pub traffic_allocation: Vec<TrafficRangeWire>,
    #[serde(default)]
    pub forced_variations: HashMap<String, String>,
    #[serde(default)]
    pub cmab: Option<CmabWire>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct VariationWire {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub feature_enabled: bool,
    #[serde(default)]
    pub variables: Vec<VariableValueWire>,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct VariableValueWire {
    pub id: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TrafficRangeWire {
    pub entity_id: String,
    pub end_of_range: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CmabWire {
    #[serde(default)]
    pub attribute_ids: Vec<String>,
    #[serde(default = "default_cmab_traffic_allocation")]
    pub traffic_allocation: u32,
}

fn default_cmab_traffic_allocation() -> u32 {
    10_000
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct FeatureFlagWire {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub rollout_id: String,
    #[serde(default)]
    pub experiment_ids: Vec<String>,
    #[serde(default)]
    pub variables: Vec<VariableWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct VariableWire {
    pub id: String,
    pub key: String,
    #[serde(rename = "type")]
    pub variable_type: String,
    #[serde(default)]
    pub sub_type: Option<String>,
    #[serde(default)]
    pub default_value: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct RolloutWire {
    pub id: String,
    #[serde(default)]
    pub experiments: Vec<ExperimentWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GroupWire {
    pub id: String,
    pub policy: String,
    #[serde(default)]
    pub traffic_allocation: Vec<TrafficRangeWire>,
    #[serde(default)]
    pub experiments: Vec<ExperimentWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct HoldoutWire {
    #[serde(flatten)]
    pub rule: ExperimentWire,
    #[serde(default)]
    pub included_flags: Vec<String>,
    #[serde(default)]
    pub excluded_flags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct IntegrationWire {
    pub key: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
}
