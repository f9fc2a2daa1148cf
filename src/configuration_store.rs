//! Thread-safe holder of the active [`ProjectConfig`] snapshot. Decision calls read it
//! concurrently while the poller (or a static datafile) replaces it.
use std::sync::{Arc, PoisonError, RwLock};

use crate::{
    notification::{Notification, NotificationCenter, ProjectConfigUpdateNotification},
    project_config::ProjectConfig,
    Error,
};

#[derive(Default)]
struct State {
    config: Option<Arc<ProjectConfig>>,
    /// Error from the most recent failed update. Cleared by the next successful one.
    last_error: Option<Error>,
}

/// `ConfigurationStore` holds at most one snapshot. Snapshots are immutable and can only be
/// replaced completely, so readers never observe a partially updated configuration.
pub struct ConfigurationStore {
    state: RwLock<State>,
    notifications: Arc<NotificationCenter>,
}

impl ConfigurationStore {
    /// Create an empty store that announces new revisions on `notifications`.
    pub fn new(notifications: Arc<NotificationCenter>) -> Self {
        ConfigurationStore {
            state: RwLock::default(),
            notifications,
        }
    }

    /// Get the active snapshot. Returns `None` until the first datafile has been installed.
    pub fn get_config(&self) -> Option<Arc<ProjectConfig>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.config.clone()
    }

    /// Error from the most recent failed update, if the store has not been updated since.
    pub fn last_error(&self) -> Option<Error> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.last_error.clone()
    }

    /// Install `config` unless it has the same revision as the active snapshot.
    ///
    /// Returns `true` if the snapshot was replaced. Listeners are notified after the lock is
    /// released.
    pub fn set_config(&self, config: ProjectConfig) -> bool {
        // Constructing new value before requesting the lock to minimize lock span.
        let config = Arc::new(config);
        let revision = config.revision().to_owned();
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.last_error = None;
            if state
                .config
                .as_ref()
                .is_some_and(|current| current.revision() == revision)
            {
                log::debug!(target: "optiflag", revision; "datafile revision unchanged");
                return false;
            }
            state.config = Some(config);
        }

        log::info!(target: "optiflag", revision; "installed new project configuration");
        self.notifications
            .send(&Notification::ProjectConfigUpdate(
                ProjectConfigUpdateNotification { revision },
            ));
        true
    }

    /// Record a failed update. The active snapshot, if any, stays in place.
    pub fn set_error(&self, error: Error) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.last_error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::ConfigurationStore;
    use crate::{
        notification::{NotificationCenter, NotificationType},
        project_config::{
            tests::{datafile_with_revision, fixture},
            ProjectConfig,
        },
        Error,
    };

    fn counting_store() -> (ConfigurationStore, Arc<AtomicUsize>) {
        let notifications = Arc::new(NotificationCenter::new());
        let updates = Arc::new(AtomicUsize::new(0));
        {
            let updates = updates.clone();
            notifications.add_handler(NotificationType::ProjectConfigUpdate, move |_| {
                updates.fetch_add(1, Ordering::SeqCst);
            });
        }
        (ConfigurationStore::new(notifications), updates)
    }

    #[test]
    fn can_set_configuration_from_another_thread() {
        let store = Arc::new(ConfigurationStore::new(Arc::new(NotificationCenter::new())));

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || {
                store.set_config(fixture());
            })
            .join();
        }

        assert_eq!(store.get_config().unwrap().revision(), "42");
    }

    #[test]
    fn same_revision_is_not_reinstalled() {
        let (store, updates) = counting_store();

        assert!(store.set_config(fixture()));
        let first = store.get_config().unwrap();
        assert!(!store.set_config(fixture()));
        assert!(Arc::ptr_eq(&first, &store.get_config().unwrap()));
        assert_eq!(updates.load(Ordering::SeqCst), 1);

        let next = ProjectConfig::from_datafile(datafile_with_revision("43")).unwrap();
        assert!(store.set_config(next));
        assert_eq!(store.get_config().unwrap().revision(), "43");
        assert_eq!(updates.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn errors_keep_previous_snapshot() {
        let (store, _) = counting_store();
        store.set_config(fixture());
        store.set_error(Error::Forbidden);

        assert_eq!(store.get_config().unwrap().revision(), "42");
        assert!(matches!(store.last_error(), Some(Error::Forbidden)));

        store.set_config(fixture());
        assert!(store.last_error().is_none());
    }
}
