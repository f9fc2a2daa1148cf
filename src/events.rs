//! Impression and conversion events handed to the host's [`EventProcessor`].
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{decision::DecisionSource, Attributes};

/// Project-level context shared by every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventContext {
    /// Account of the project.
    pub account_id: String,
    /// Project the datafile belongs to.
    pub project_id: String,
    /// Datafile revision the event was produced with.
    pub revision: String,
    /// Whether the collector should drop the user IP.
    pub anonymize_ip: bool,
}

/// Records that a user was exposed to a variation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpressionEvent {
    /// Unique event id.
    pub uuid: Uuid,
    /// When the decision was made.
    pub timestamp: DateTime<Utc>,
    /// Project context.
    pub context: EventContext,
    /// Exposed user.
    pub user_id: String,
    /// User attributes at decision time.
    pub attributes: Attributes,
    /// Decided flag.
    pub flag_key: String,
    /// Rule that produced the variation.
    pub rule_key: String,
    /// Stage that produced the decision.
    pub rule_type: DecisionSource,
    /// Id of the rule.
    pub experiment_id: String,
    /// Selected variation.
    pub variation_key: String,
    /// Id of the selected variation.
    pub variation_id: String,
    /// Whether the flag is on.
    pub enabled: bool,
    /// Correlates the impression with the CMAB prediction that produced it.
    #[serde(rename = "cmabUUID", skip_serializing_if = "Option::is_none", default)]
    pub cmab_uuid: Option<Uuid>,
}

/// Records a tracked conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionEvent {
    /// Unique event id.
    pub uuid: Uuid,
    /// When the conversion was tracked.
    pub timestamp: DateTime<Utc>,
    /// Project context.
    pub context: EventContext,
    /// Converting user.
    pub user_id: String,
    /// User attributes at tracking time.
    pub attributes: Attributes,
    /// Tracked event key.
    pub event_key: String,
    /// Datafile id of the event.
    pub event_id: String,
    /// Tags passed by the caller, for example `revenue`.
    pub tags: HashMap<String, serde_json::Value>,
}

/// An event dispatched to the [`EventProcessor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserEvent {
    /// A user was exposed to a variation.
    Impression(ImpressionEvent),
    /// A user converted.
    Conversion(ConversionEvent),
}

/// Receives events to forward to your analytics pipeline.
///
/// Any `Fn(UserEvent)` closure is an event processor.
pub trait EventProcessor: Send + Sync {
    /// Handle one event. Called on the deciding thread.
    fn process(&self, event: UserEvent);
}

pub(crate) struct NoopEventProcessor;

impl EventProcessor for NoopEventProcessor {
    fn process(&self, _event: UserEvent) {}
}

impl<T: Fn(UserEvent) + Send + Sync> EventProcessor for T {
    fn process(&self, event: UserEvent) {
        self(event);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;
    use uuid::Uuid;

    use super::{EventContext, ImpressionEvent, UserEvent};
    use crate::decision::DecisionSource;

    #[test]
    fn impression_wire_shape() {
        let cmab_uuid = Uuid::new_v4();
        let event = UserEvent::Impression(ImpressionEvent {
            uuid: Uuid::new_v4(),
            timestamp: Utc::now(),
            context: EventContext {
                account_id: "1".into(),
                project_id: "2".into(),
                revision: "3".into(),
                anonymize_ip: true,
            },
            user_id: "u1".into(),
            attributes: HashMap::new(),
            flag_key: "flag".into(),
            rule_key: "rule".into(),
            rule_type: DecisionSource::FeatureTest,
            experiment_id: "exp".into(),
            variation_key: "on".into(),
            variation_id: "var_on".into(),
            enabled: true,
            cmab_uuid: Some(cmab_uuid),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "impression");
        assert_eq!(json["ruleType"], "feature-test");
        assert_eq!(json["cmabUUID"], cmab_uuid.to_string());
        assert_eq!(json["context"]["accountId"], "1");
    }
}
