//! Audience targeting.
//!
//! Audiences are boolean trees of conditions evaluated with three-valued logic: every node
//! evaluates to `Some(true)`, `Some(false)`, or `None` when it cannot be evaluated (unknown matcher,
//! missing attribute, type mismatch). `None` bubbles up through `and`/`or`/`not` and is treated as
//! a miss at the decision level.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{reasons::DecisionReasons, UserContext};

mod matchers;
mod semver;

/// Audience trees may reference audiences that reference other audiences. Anything deeper than
/// this is treated as a malformed datafile.
const MAX_AUDIENCE_DEPTH: usize = 16;

/// A named audience from the datafile.
#[derive(Debug, Clone, PartialEq)]
pub struct Audience {
    /// Datafile id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Conditions a user must satisfy to be part of the audience.
    pub conditions: ConditionTree,
}

/// A boolean tree of conditions.
///
/// Serialized as nested JSON arrays whose first element is the operator, for example
/// `["and", ["or", {"type": "custom_attribute", "name": "age", "match": "gt", "value": 18}]]`.
/// Plain strings are audience ids that resolve through the configuration's audience map.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "serde_json::Value")]
pub enum ConditionTree {
    /// All children must evaluate to `true`.
    And(Vec<ConditionTree>),
    /// At least one child must evaluate to `true`.
    Or(Vec<ConditionTree>),
    /// Negates the first child.
    Not(Vec<ConditionTree>),
    /// A single attribute condition.
    Leaf(Condition),
    /// Reference to an audience by id.
    AudienceId(String),
}

/// A leaf condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// `custom_attribute` or `third_party_dimension`.
    #[serde(rename = "type", default)]
    pub condition_type: String,
    /// Matcher name. Defaults to `exact` when absent.
    #[serde(rename = "match", default)]
    pub match_type: Option<String>,
    /// Attribute name.
    #[serde(default)]
    pub name: String,
    /// Value to compare against.
    #[serde(default)]
    pub value: serde_json::Value,
}

impl TryFrom<serde_json::Value> for ConditionTree {
    type Error = String;

    fn try_from(value: serde_json::Value) -> Result<ConditionTree, String> {
        ConditionTree::from_json(&value)
    }
}

impl ConditionTree {
    /// Parse a condition tree from its JSON representation.
    pub fn from_json(value: &serde_json::Value) -> Result<ConditionTree, String> {
        match value {
            serde_json::Value::Array(items) => {
                let (operator, rest) = match items.first() {
                    Some(serde_json::Value::String(op)) if is_operator(op) => {
                        (op.as_str(), &items[1..])
                    }
                    // An array without a leading operator is an implicit "or".
                    _ => ("or", &items[..]),
                };
                let children = rest
                    .iter()
                    .map(ConditionTree::from_json)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(match operator {
                    "and" => ConditionTree::And(children),
                    "not" => ConditionTree::Not(children),
                    _ => ConditionTree::Or(children),
                })
            }
            serde_json::Value::Object(_) => serde_json::from_value(value.clone())
                .map(ConditionTree::Leaf)
                .map_err(|err| err.to_string()),
            serde_json::Value::String(id) => Ok(ConditionTree::AudienceId(id.clone())),
            other => Err(format!("unexpected condition node: {other}")),
        }
    }

    /// Build the implicit "or" over a list of audience ids.
    pub fn any_of_audiences(ids: &[String]) -> ConditionTree {
        ConditionTree::Or(
            ids.iter()
                .map(|id| ConditionTree::AudienceId(id.clone()))
                .collect(),
        )
    }

    /// Return `true` for an operator node without children, such as `[]` or `["or"]`.
    pub fn is_empty(&self) -> bool {
        match self {
            ConditionTree::And(children)
            | ConditionTree::Or(children)
            | ConditionTree::Not(children) => children.is_empty(),
            ConditionTree::Leaf(_) | ConditionTree::AudienceId(_) => false,
        }
    }

    /// Evaluate the tree for `user`. Returns `None` if the tree cannot be evaluated.
    pub fn evaluate(
        &self,
        user: &UserContext,
        audiences: &HashMap<String, Audience>,
    ) -> Option<bool> {
        self.evaluate_at_depth(user, audiences, 0)
    }

    fn evaluate_at_depth(
        &self,
        user: &UserContext,
        audiences: &HashMap<String, Audience>,
        depth: usize,
    ) -> Option<bool> {
        let eval = |child: &ConditionTree| child.evaluate_at_depth(user, audiences, depth);
        match self {
            ConditionTree::And(children) => {
                let mut saw_invalid = false;
                for child in children {
                    match eval(child) {
                        Some(false) => return Some(false),
                        None => saw_invalid = true,
                        Some(true) => {}
                    }
                }
                if saw_invalid {
                    None
                } else {
                    Some(true)
                }
            }
            ConditionTree::Or(children) => {
                let mut saw_invalid = false;
                for child in children {
                    match eval(child) {
                        Some(true) => return Some(true),
                        None => saw_invalid = true,
                        Some(false) => {}
                    }
                }
                if saw_invalid {
                    None
                } else {
                    Some(false)
                }
            }
            ConditionTree::Not(children) => children.first().and_then(eval).map(|it| !it),
            ConditionTree::Leaf(condition) => condition.evaluate(user),
            ConditionTree::AudienceId(id) => {
                if depth >= MAX_AUDIENCE_DEPTH {
                    log::warn!(target: "optiflag", audience_id:% = id;
                               "audience nesting is too deep");
                    return None;
                }
                let Some(audience) = audiences.get(id) else {
                    log::debug!(target: "optiflag", audience_id:% = id;
                                "audience not found in configuration");
                    return None;
                };
                let result = audience
                    .conditions
                    .evaluate_at_depth(user, audiences, depth + 1);
                log::trace!(target: "optiflag", audience_id:% = id, result:? = result;
                            "evaluated audience");
                result
            }
        }
    }
}

fn is_operator(s: &str) -> bool {
    matches!(s, "and" | "or" | "not")
}

/// Gate a rule on its audience conditions.
///
/// Rules without conditions admit everyone. An invalid tree is a miss, reported as an info reason.
pub(crate) fn check_audience(
    conditions: Option<&ConditionTree>,
    audiences: &HashMap<String, Audience>,
    rule_key: &str,
    user: &UserContext,
    reasons: &mut DecisionReasons,
) -> bool {
    let Some(conditions) = conditions else {
        return true;
    };
    match conditions.evaluate(user, audiences) {
        Some(result) => {
            reasons.add_info(format_args!(
                "Audiences for rule \"{rule_key}\" collectively evaluated to {result}."
            ));
            result
        }
        None => {
            reasons.add_info(format_args!(
                "Audiences for rule \"{rule_key}\" could not be evaluated for user \"{}\".",
                user.user_id()
            ));
            false
        }
    }
}
