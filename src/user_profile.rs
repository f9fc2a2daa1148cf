//! Sticky bucketing through a pluggable user-profile store.
use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};

/// Error type returned by user-profile stores. Store errors are logged by the SDK and never
/// surface to callers.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Saved experiment assignments of a single user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// User the profile belongs to.
    pub user_id: String,
    /// Experiment id to variation id.
    pub experiment_bucket_map: HashMap<String, String>,
}

impl UserProfile {
    /// Create an empty profile.
    pub fn new(user_id: impl Into<String>) -> UserProfile {
        UserProfile {
            user_id: user_id.into(),
            experiment_bucket_map: HashMap::new(),
        }
    }

    /// Saved variation id for the experiment, if any.
    pub fn variation_for(&self, experiment_id: &str) -> Option<&str> {
        self.experiment_bucket_map
            .get(experiment_id)
            .map(String::as_str)
    }
}

/// A store of [`UserProfile`]s.
///
/// Thread safety is the implementation's concern: the SDK may call `lookup` and `save` from many
/// threads at once.
pub trait UserProfileService: Send + Sync {
    /// Load the profile for `user_id`. `Ok(None)` means the user has no profile yet.
    fn lookup(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError>;

    /// Persist a full profile record, replacing the previous one.
    fn save(&self, profile: UserProfile) -> Result<(), StoreError>;
}

/// A process-local [`UserProfileService`].
#[derive(Debug, Default)]
pub struct InMemoryUserProfileService {
    profiles: RwLock<HashMap<String, UserProfile>>,
}

impl InMemoryUserProfileService {
    /// Create an empty store.
    pub fn new() -> InMemoryUserProfileService {
        InMemoryUserProfileService::default()
    }
}

impl UserProfileService for InMemoryUserProfileService {
    fn lookup(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self
            .profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned())
    }

    fn save(&self, profile: UserProfile) -> Result<(), StoreError> {
        self.profiles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(profile.user_id.clone(), profile);
        Ok(())
    }
}
