use std::{
    collections::HashMap,
    fmt::{self, Display},
    sync::{PoisonError, RwLock},
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use super::CmabAttribute;

/// Fingerprint of a CMAB lookup: the rule, the user, and a stable hash of the attributes the rule
/// declares as relevant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    rule_id: String,
    user_id: String,
    attributes_hash: String,
}

impl CacheKey {
    /// Build a key. Attribute order does not matter.
    pub fn new(rule_id: &str, user_id: &str, attributes: &[CmabAttribute]) -> CacheKey {
        let mut sorted: Vec<&CmabAttribute> = attributes.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let mut canonical = String::new();
        for attribute in sorted {
            canonical.push_str(&attribute.id);
            canonical.push('=');
            canonical.push_str(&attribute.value.to_string());
            canonical.push(';');
        }

        CacheKey {
            rule_id: rule_id.to_owned(),
            user_id: user_id.to_owned(),
            attributes_hash: format!("{:x}", md5::compute(canonical)),
        }
    }

    /// User the entry belongs to.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Experiment the entry belongs to.
    pub fn rule_id(&self) -> &str {
        &self.rule_id
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.rule_id, self.user_id, self.attributes_hash)
    }
}

/// A cached CMAB decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Predicted variation id.
    pub variation_id: String,
    /// UUID minted for the fetch that produced this entry.
    pub cmab_uuid: Uuid,
    /// When the prediction was fetched.
    pub created_at: DateTime<Utc>,
}

/// Decision cache with a fixed time-to-live.
#[derive(Debug)]
pub struct CmabCache {
    ttl: Option<TimeDelta>,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl CmabCache {
    /// Create a cache whose entries expire once they are `ttl` old.
    pub fn new(ttl: Duration) -> CmabCache {
        CmabCache {
            // A TTL too large to represent never expires.
            ttl: TimeDelta::from_std(ttl).ok(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return the entry for `key` unless it is missing or expired.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(key)?;
        if self.is_expired(entry, Utc::now()) {
            log::debug!(target: "optiflag", cache_key:% = key; "CMAB cache entry expired");
            return None;
        }
        Some(entry.clone())
    }

    /// Store `entry`, dropping expired entries first.
    pub fn insert(&self, key: CacheKey, entry: CacheEntry) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now();
        entries.retain(|_, it| !self.is_expired(it, now));
        entries.insert(key, entry);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Drop every entry whose key belongs to `user_id`.
    pub fn invalidate_user(&self, user_id: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|key, _| key.user_id != user_id);
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Return `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        self.ttl.is_some_and(|ttl| now - entry.created_at >= ttl)
    }
}
