use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use crate::{attributes::BUCKETING_ID_ATTRIBUTE, AttributeValue, Attributes};

/// A user being decided for: an id, a bag of attributes, the audience segments the user qualifies
/// for, and the caller-scoped forced decisions.
///
/// ```
/// # use optiflag::UserContext;
/// let user = UserContext::new("user-1", [("age".to_owned(), 42.0.into())].into_iter().collect());
/// assert_eq!(user.bucketing_id(), "user-1");
/// ```
#[derive(Debug)]
pub struct UserContext {
    user_id: String,
    attributes: Attributes,
    qualified_segments: Vec<String>,
    forced_decisions: ForcedDecisionStore,
}

impl UserContext {
    /// Create a user context with the given id and attributes.
    pub fn new(user_id: impl Into<String>, attributes: Attributes) -> UserContext {
        UserContext {
            user_id: user_id.into(),
            attributes,
            qualified_segments: Vec::new(),
            forced_decisions: ForcedDecisionStore::default(),
        }
    }

    /// Replace the list of segments the user qualifies for.
    pub fn with_qualified_segments(mut self, segments: Vec<String>) -> UserContext {
        self.qualified_segments = segments;
        self
    }

    /// User id.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// All attributes.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Get a single attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Set (or replace) a single attribute.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Segments the user qualifies for.
    pub fn qualified_segments(&self) -> &[String] {
        &self.qualified_segments
    }

    /// Return `true` if the user belongs to `segment`.
    pub fn is_qualified_for(&self, segment: &str) -> bool {
        self.qualified_segments.iter().any(|s| s == segment)
    }

    /// The string hashed to place the user on the bucketing line.
    ///
    /// This is the `$opt_bucketing_id` attribute if it is set to a string, and the user id
    /// otherwise.
    pub fn bucketing_id(&self) -> &str {
        match self.attributes.get(BUCKETING_ID_ATTRIBUTE) {
            Some(AttributeValue::String(id)) => id,
            Some(_) => {
                log::warn!(target: "optiflag", user_id:% = self.user_id;
                           "bucketing id attribute is not a string, falling back to user id");
                &self.user_id
            }
            None => &self.user_id,
        }
    }

    /// Force `variation_key` for the given flag (and optionally rule).
    pub fn set_forced_decision(&self, context: DecisionContext, variation_key: impl Into<String>) {
        self.forced_decisions.set(context, variation_key.into());
    }

    /// Return the forced variation key for the context, if any.
    pub fn forced_decision(&self, context: &DecisionContext) -> Option<String> {
        self.forced_decisions.get(context)
    }

    /// Remove a forced decision. Returns `true` if one was present.
    pub fn remove_forced_decision(&self, context: &DecisionContext) -> bool {
        self.forced_decisions.remove(context)
    }

    /// Remove all forced decisions for this user.
    pub fn remove_all_forced_decisions(&self) {
        self.forced_decisions.clear();
    }
}

impl Clone for UserContext {
    fn clone(&self) -> UserContext {
        UserContext {
            user_id: self.user_id.clone(),
            attributes: self.attributes.clone(),
            qualified_segments: self.qualified_segments.clone(),
            forced_decisions: self.forced_decisions.clone(),
        }
    }
}

/// Addresses a forced decision: a whole flag (`rule_key == None`) or a single rule of a flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecisionContext {
    /// Flag key.
    pub flag_key: String,
    /// Experiment or rollout rule key. `None` forces the whole flag.
    pub rule_key: Option<String>,
}

impl DecisionContext {
    /// Context covering a whole flag.
    pub fn flag(flag_key: impl Into<String>) -> DecisionContext {
        DecisionContext {
            flag_key: flag_key.into(),
            rule_key: None,
        }
    }

    /// Context covering a single rule of a flag.
    pub fn rule(flag_key: impl Into<String>, rule_key: impl Into<String>) -> DecisionContext {
        DecisionContext {
            flag_key: flag_key.into(),
            rule_key: Some(rule_key.into()),
        }
    }
}

/// Per-user forced decisions. Safe for concurrent `get`/`set`/`remove`.
#[derive(Debug, Default)]
struct ForcedDecisionStore {
    decisions: RwLock<HashMap<DecisionContext, String>>,
}

impl ForcedDecisionStore {
    fn set(&self, context: DecisionContext, variation_key: String) {
        self.decisions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(context, variation_key);
    }

    fn get(&self, context: &DecisionContext) -> Option<String> {
        self.decisions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(context)
            .cloned()
    }

    fn remove(&self, context: &DecisionContext) -> bool {
        self.decisions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(context)
            .is_some()
    }

    fn clear(&self) {
        self.decisions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Clone for ForcedDecisionStore {
    fn clone(&self) -> ForcedDecisionStore {
        let decisions = self
            .decisions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        ForcedDecisionStore {
            decisions: RwLock::new(decisions),
        }
    }
}
