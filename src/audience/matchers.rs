use std::cmp::Ordering;

use crate::{audience::Condition, AttributeValue, UserContext};

use super::semver::compare_versions;

const CUSTOM_ATTRIBUTE: &str = "custom_attribute";
const THIRD_PARTY_DIMENSION: &str = "third_party_dimension";

/// Largest magnitude at which floats still represent every integer exactly.
const MAX_SAFE_NUMBER: f64 = 9_007_199_254_740_992.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchType {
    Exact,
    Substring,
    Exists,
    Gt,
    Ge,
    Lt,
    Le,
    SemverEq,
    SemverGt,
    SemverGe,
    SemverLt,
    SemverLe,
    Qualified,
}

impl MatchType {
    fn parse(s: &str) -> Option<MatchType> {
        Some(match s {
            "exact" => MatchType::Exact,
            "substring" => MatchType::Substring,
            "exists" => MatchType::Exists,
            "gt" => MatchType::Gt,
            "ge" => MatchType::Ge,
            "lt" => MatchType::Lt,
            "le" => MatchType::Le,
            "semver_eq" => MatchType::SemverEq,
            "semver_gt" => MatchType::SemverGt,
            "semver_ge" => MatchType::SemverGe,
            "semver_lt" => MatchType::SemverLt,
            "semver_le" => MatchType::SemverLe,
            "qualified" => MatchType::Qualified,
            _ => return None,
        })
    }
}

impl Condition {
    /// Evaluate the condition for `user`, returning `None` if the condition cannot be applied.
    pub(crate) fn evaluate(&self, user: &UserContext) -> Option<bool> {
        if self.condition_type != CUSTOM_ATTRIBUTE && self.condition_type != THIRD_PARTY_DIMENSION {
            log::warn!(target: "optiflag", condition_type:% = self.condition_type;
                       "unknown condition type");
            return None;
        }

        let match_type = self.match_type.as_deref().unwrap_or("exact");
        let Some(match_type) = MatchType::parse(match_type) else {
            log::warn!(target: "optiflag", match_type:% = match_type;
                       "unknown match type");
            return None;
        };

        if match_type == MatchType::Qualified {
            let segment = self.value.as_str()?;
            return Some(user.is_qualified_for(segment));
        }

        let attribute = user.attribute(&self.name);

        if match_type == MatchType::Exists {
            return Some(attribute.is_some_and(|it| !it.is_null()));
        }

        // Absent (or null) attributes make every other matcher invalid, not false.
        let attribute = attribute.filter(|it| !it.is_null())?;

        match match_type {
            MatchType::Exact => exact(attribute, &self.value),
            MatchType::Substring => {
                let needle = self.value.as_str()?;
                let haystack = attribute.as_str()?;
                Some(haystack.contains(needle))
            }
            MatchType::Gt | MatchType::Ge | MatchType::Lt | MatchType::Le => {
                let condition_value = safe_number(self.value.as_f64()?)?;
                let attribute_value = safe_number(attribute.as_number()?)?;
                let ordering = attribute_value.partial_cmp(&condition_value)?;
                Some(accepts(match_type, ordering))
            }
            MatchType::SemverEq
            | MatchType::SemverGt
            | MatchType::SemverGe
            | MatchType::SemverLt
            | MatchType::SemverLe => {
                let target = self.value.as_str()?;
                let version = attribute.as_str()?;
                let ordering = compare_versions(target, version)?;
                Some(accepts(match_type, ordering))
            }
            MatchType::Exists | MatchType::Qualified => None,
        }
    }
}

/// Exact match requires both sides to be of the same comparable type. Strings are never
/// coerced to numbers.
fn exact(attribute: &AttributeValue, condition_value: &serde_json::Value) -> Option<bool> {
    match (condition_value, attribute) {
        (serde_json::Value::String(expected), AttributeValue::String(actual)) => {
            Some(expected == actual)
        }
        (serde_json::Value::Bool(expected), AttributeValue::Boolean(actual)) => {
            Some(expected == actual)
        }
        (serde_json::Value::Number(expected), AttributeValue::Number(actual)) => {
            let expected = safe_number(expected.as_f64()?)?;
            let actual = safe_number(*actual)?;
            Some(expected == actual)
        }
        _ => None,
    }
}

fn safe_number(n: f64) -> Option<f64> {
    (n.is_finite() && n.abs() <= MAX_SAFE_NUMBER).then_some(n)
}

/// `ordering` is the attribute compared to the condition value.
fn accepts(match_type: MatchType, ordering: Ordering) -> bool {
    match match_type {
        MatchType::Gt | MatchType::SemverGt => ordering == Ordering::Greater,
        MatchType::Ge | MatchType::SemverGe => ordering != Ordering::Less,
        MatchType::Lt | MatchType::SemverLt => ordering == Ordering::Less,
        MatchType::Le | MatchType::SemverLe => ordering != Ordering::Greater,
        MatchType::SemverEq => ordering == Ordering::Equal,
        _ => false,
    }
}
