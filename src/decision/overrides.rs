use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use crate::{
    reasons::{DecisionReasons, Reason},
    DecideOptions, Result, UserContext,
};

use super::{ExperimentDecision, ExperimentDecisionContext, ExperimentService};

/// Addresses an override: one user in one experiment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OverrideKey {
    /// Experiment the override applies to.
    pub experiment_key: String,
    /// User the override applies to.
    pub user_id: String,
}

impl OverrideKey {
    /// Key for `user_id` in `experiment_key`.
    pub fn new(experiment_key: impl Into<String>, user_id: impl Into<String>) -> OverrideKey {
        OverrideKey {
            experiment_key: experiment_key.into(),
            user_id: user_id.into(),
        }
    }
}

/// Process-wide, caller-installed experiment overrides.
pub trait OverrideStore: Send + Sync {
    /// Variation key forced for the user in the experiment.
    fn get_variation(&self, key: &OverrideKey) -> Option<String>;

    /// Force a variation key for the user in the experiment.
    fn set_variation(&self, key: OverrideKey, variation_key: String);

    /// Drop an override. Returns `true` if one existed.
    fn remove_variation(&self, key: &OverrideKey) -> bool;
}

/// [`OverrideStore`] backed by a map.
#[derive(Debug, Default)]
pub struct MapOverrideStore {
    overrides: RwLock<HashMap<OverrideKey, String>>,
}

impl MapOverrideStore {
    /// Create an empty store.
    pub fn new() -> MapOverrideStore {
        MapOverrideStore::default()
    }
}

impl OverrideStore for MapOverrideStore {
    fn get_variation(&self, key: &OverrideKey) -> Option<String> {
        self.overrides
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set_variation(&self, key: OverrideKey, variation_key: String) {
        self.overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, variation_key);
    }

    fn remove_variation(&self, key: &OverrideKey) -> bool {
        self.overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }
}

/// Serves variations from an [`OverrideStore`].
#[derive(Clone)]
pub struct OverrideService {
    store: Arc<dyn OverrideStore>,
}

impl OverrideService {
    /// Serve overrides from `store`.
    pub fn new(store: Arc<dyn OverrideStore>) -> OverrideService {
        OverrideService { store }
    }
}

impl ExperimentService for OverrideService {
    fn get_decision<'a>(
        &self,
        context: &ExperimentDecisionContext<'a>,
        user: &UserContext,
        _options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Result<ExperimentDecision<'a>> {
        let experiment = context.experiment;
        let key = OverrideKey::new(experiment.key.as_str(), user.user_id());
        let Some(variation_key) = self.store.get_variation(&key) else {
            return Ok(ExperimentDecision::default());
        };

        match experiment.variation_by_key(&variation_key) {
            Some(variation) => {
                reasons.add_info(Reason::OverrideVariationAssignmentFound);
                Ok(ExperimentDecision::with_variation(variation))
            }
            None => {
                reasons.add_info(Reason::InvalidOverrideVariationAssignment);
                Ok(ExperimentDecision::default())
            }
        }
    }
}
