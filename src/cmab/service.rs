use std::{
    collections::HashMap,
    sync::{Arc, Condvar, Mutex, PoisonError},
};

use chrono::Utc;
use uuid::Uuid;

use crate::{
    project_config::ProjectConfig,
    reasons::{DecisionReasons, Reason},
    DecideOptions, Result, UserContext,
};

use super::{CacheEntry, CacheKey, CmabAttribute, CmabCache, CmabClient};

/// A CMAB decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmabDecision {
    /// Predicted variation id.
    pub variation_id: String,
    /// Correlates the impression with the prediction that produced it.
    pub cmab_uuid: Uuid,
}

impl From<CacheEntry> for CmabDecision {
    fn from(entry: CacheEntry) -> Self {
        CmabDecision {
            variation_id: entry.variation_id,
            cmab_uuid: entry.cmab_uuid,
        }
    }
}

/// Decides CMAB rules.
pub trait CmabService: Send + Sync {
    /// Decide the CMAB rule `rule_id` for `user`, honoring the CMAB cache options.
    fn get_decision(
        &self,
        config: &ProjectConfig,
        user: &UserContext,
        rule_id: &str,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Result<CmabDecision>;
}

#[derive(Debug)]
enum FlightState {
    Running,
    Done(Result<CmabDecision>),
    /// The leader went away without a result. Waiters elect a new leader.
    Abandoned,
}

#[derive(Debug)]
struct Flight {
    state: Mutex<FlightState>,
    done: Condvar,
}

impl Flight {
    fn new() -> Flight {
        Flight {
            state: Mutex::new(FlightState::Running),
            done: Condvar::new(),
        }
    }

    fn complete(&self, state: FlightState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
        self.done.notify_all();
    }

    /// Block until the flight leaves the `Running` state. Returns `None` if it was abandoned.
    fn wait(&self) -> Option<Result<CmabDecision>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match &*state {
                FlightState::Running => {
                    state = self
                        .done
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                FlightState::Done(result) => return Some(result.clone()),
                FlightState::Abandoned => return None,
            }
        }
    }
}

/// Removes the in-flight marker and wakes waiters if the leader unwinds before finishing.
struct LeaderGuard<'a> {
    service: &'a DefaultCmabService,
    key: &'a CacheKey,
    flight: Arc<Flight>,
    finished: bool,
}

impl LeaderGuard<'_> {
    fn finish(mut self, result: &Result<CmabDecision>) {
        self.service.remove_flight(self.key);
        self.flight.complete(FlightState::Done(result.clone()));
        self.finished = true;
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            log::warn!(target: "optiflag", cache_key:% = self.key;
                       "CMAB fetch abandoned, re-electing a waiter");
            self.service.remove_flight(self.key);
            self.flight.complete(FlightState::Abandoned);
        }
    }
}

enum Outcome {
    Cached(CmabDecision),
    Fetched(CmabDecision),
}

/// [`CmabService`] with a TTL cache and per-key single-flight fetches.
pub struct DefaultCmabService {
    cache: CmabCache,
    client: Arc<dyn CmabClient>,
    in_flight: Mutex<HashMap<CacheKey, Arc<Flight>>>,
}

impl DefaultCmabService {
    /// Create a service that fetches through `client` and caches in `cache`.
    pub fn new(cache: CmabCache, client: Arc<dyn CmabClient>) -> DefaultCmabService {
        DefaultCmabService {
            cache,
            client,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying cache.
    pub fn cache(&self) -> &CmabCache {
        &self.cache
    }

    fn remove_flight(&self, key: &CacheKey) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    fn fetch(
        &self,
        rule_id: &str,
        user_id: &str,
        attributes: &[CmabAttribute],
    ) -> Result<CmabDecision> {
        let cmab_uuid = Uuid::new_v4();
        let variation_id = self
            .client
            .fetch_decision(rule_id, user_id, attributes, &cmab_uuid)?;
        Ok(CmabDecision {
            variation_id,
            cmab_uuid,
        })
    }

    /// Fetch through the single-flight gate. The first caller for a key fetches and populates the
    /// cache; concurrent callers wait for its result.
    fn fetch_shared(
        &self,
        key: &CacheKey,
        rule_id: &str,
        user_id: &str,
        attributes: &[CmabAttribute],
    ) -> Result<Outcome> {
        loop {
            let (flight, leader) = {
                let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
                match in_flight.get(key) {
                    Some(flight) => (Arc::clone(flight), false),
                    None => {
                        // A flight for this key may have completed since the caller's lookup.
                        if let Some(entry) = self.cache.get(key) {
                            return Ok(Outcome::Cached(entry.into()));
                        }
                        let flight = Arc::new(Flight::new());
                        in_flight.insert(key.clone(), Arc::clone(&flight));
                        (flight, true)
                    }
                }
            };

            if !leader {
                log::debug!(target: "optiflag", cache_key:% = key;
                            "waiting for in-flight CMAB fetch");
                match flight.wait() {
                    Some(result) => return result.map(Outcome::Fetched),
                    None => continue,
                }
            }

            let guard = LeaderGuard {
                service: self,
                key,
                flight,
                finished: false,
            };
            let result = self.fetch(rule_id, user_id, attributes);
            if let Ok(decision) = &result {
                self.cache.insert(
                    key.clone(),
                    CacheEntry {
                        variation_id: decision.variation_id.clone(),
                        cmab_uuid: decision.cmab_uuid,
                        created_at: Utc::now(),
                    },
                );
            }
            guard.finish(&result);
            return result.map(Outcome::Fetched);
        }
    }
}

impl CmabService for DefaultCmabService {
    fn get_decision(
        &self,
        config: &ProjectConfig,
        user: &UserContext,
        rule_id: &str,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Result<CmabDecision> {
        let user_id = user.user_id();
        let attributes = relevant_attributes(config, user, rule_id);

        if options.reset_cmab_cache {
            log::debug!(target: "optiflag", "resetting CMAB cache");
            self.cache.clear();
        }
        if options.invalidate_user_cmab_cache {
            log::debug!(target: "optiflag", user_id; "invalidating CMAB cache for user");
            self.cache.invalidate_user(user_id);
        }

        if options.ignore_cmab_cache {
            let decision = self.fetch(rule_id, user_id, &attributes)?;
            reasons.add_info(format_args!(
                "{} for rule \"{rule_id}\" and user \"{user_id}\".",
                Reason::FetchedNewDecision
            ));
            return Ok(decision);
        }

        let key = CacheKey::new(rule_id, user_id, &attributes);
        let outcome = match self.cache.get(&key) {
            Some(entry) => Outcome::Cached(entry.into()),
            None => self.fetch_shared(&key, rule_id, user_id, &attributes)?,
        };

        Ok(match outcome {
            Outcome::Cached(decision) => {
                log::trace!(target: "optiflag", cache_key:% = key; "CMAB cache hit");
                reasons.add_info(format_args!(
                    "{} for rule \"{rule_id}\" and user \"{user_id}\".",
                    Reason::UsedCachedDecision
                ));
                decision
            }
            Outcome::Fetched(decision) => {
                reasons.add_info(format_args!(
                    "{} for rule \"{rule_id}\" and user \"{user_id}\".",
                    Reason::FetchedNewDecision
                ));
                decision
            }
        })
    }
}

/// The attributes the rule declares as relevant, in the order the rule declares them. Attributes
/// the user does not have (or that are null) are left out.
fn relevant_attributes(
    config: &ProjectConfig,
    user: &UserContext,
    rule_id: &str,
) -> Vec<CmabAttribute> {
    let Some(cmab) = config
        .experiment_by_id(rule_id)
        .and_then(|experiment| experiment.cmab.as_ref())
    else {
        return Vec::new();
    };

    cmab.attribute_ids
        .iter()
        .filter_map(|id| {
            let name = config.attribute_key(id)?;
            let value = user.attribute(name)?;
            (!value.is_null()).then(|| CmabAttribute {
                id: id.clone(),
                value: value.to_json(),
            })
        })
        .collect()
}
