//! Project config managers own the active snapshot and keep it up to date.
use std::sync::{Arc, Mutex, PoisonError};

use crate::{
    configuration_fetcher::{ConfigurationFetcher, ConfigurationFetcherConfig},
    configuration_store::ConfigurationStore,
    notification::NotificationCenter,
    poller_thread::{PollerThread, PollerThreadConfig},
    project_config::ProjectConfig,
    Error, Result,
};

/// Source of [`ProjectConfig`] snapshots for the decision service.
pub trait ProjectConfigManager: Send + Sync {
    /// Get the active snapshot.
    ///
    /// # Errors
    ///
    /// Fails if no datafile has been installed yet. The error is the one that prevented the
    /// installation, or [`Error::SdkNotReady`] if no attempt has completed.
    fn get_config(&self) -> Result<Arc<ProjectConfig>>;

    /// Error from the most recent failed update. A failed update never removes the active
    /// snapshot, so this is how hosts learn about it.
    fn last_error(&self) -> Option<Error>;

    /// Block until the first datafile is available or the first attempt to get one has failed.
    ///
    /// # Errors
    ///
    /// Returns the error of the latest failed attempt.
    fn wait_for_configuration(&self) -> Result<()> {
        self.get_config().map(|_| ())
    }

    /// Stop background work. The active snapshot stays available.
    fn close(&self) {}
}

fn config_or_error(store: &ConfigurationStore) -> Result<Arc<ProjectConfig>> {
    store
        .get_config()
        .ok_or_else(|| store.last_error().unwrap_or(Error::SdkNotReady))
}

/// Serves a single datafile provided up front.
pub struct StaticConfigManager {
    store: ConfigurationStore,
}

impl StaticConfigManager {
    /// Parse `datafile` and install it. A parse failure is kept and reported by
    /// [`ProjectConfigManager::get_config`].
    pub fn new(datafile: impl Into<Vec<u8>>, notifications: Arc<NotificationCenter>) -> Self {
        let store = ConfigurationStore::new(notifications);
        match ProjectConfig::from_datafile(datafile) {
            Ok(config) => {
                store.set_config(config);
            }
            Err(err) => {
                log::warn!(target: "optiflag", "failed to parse datafile: {err}");
                store.set_error(err);
            }
        }
        StaticConfigManager { store }
    }

    /// A manager that never serves a snapshot and reports `error` instead.
    pub(crate) fn failed(error: Error, notifications: Arc<NotificationCenter>) -> Self {
        let store = ConfigurationStore::new(notifications);
        store.set_error(error);
        StaticConfigManager { store }
    }
}

impl ProjectConfigManager for StaticConfigManager {
    fn get_config(&self) -> Result<Arc<ProjectConfig>> {
        config_or_error(&self.store)
    }

    fn last_error(&self) -> Option<Error> {
        self.store.last_error()
    }
}

/// Polls the datafile URL on a background thread.
pub struct PollingConfigManager {
    store: Arc<ConfigurationStore>,
    poller: Mutex<Option<PollerThread>>,
}

impl PollingConfigManager {
    /// Start polling.
    ///
    /// # Errors
    ///
    /// Fails if the fetcher cannot be created (for example, on an invalid URL) or the poller
    /// thread cannot be spawned.
    pub fn start(
        fetcher: ConfigurationFetcherConfig,
        poller: PollerThreadConfig,
        notifications: Arc<NotificationCenter>,
    ) -> Result<Self> {
        let store = Arc::new(ConfigurationStore::new(notifications));
        let fetcher = ConfigurationFetcher::new(fetcher)?;
        let poller = PollerThread::start(fetcher, store.clone(), poller)?;
        Ok(PollingConfigManager {
            store,
            poller: Mutex::new(Some(poller)),
        })
    }
}

impl ProjectConfigManager for PollingConfigManager {
    fn get_config(&self) -> Result<Arc<ProjectConfig>> {
        config_or_error(&self.store)
    }

    fn last_error(&self) -> Option<Error> {
        self.store.last_error()
    }

    fn wait_for_configuration(&self) -> Result<()> {
        let poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        match poller.as_ref() {
            Some(poller) => poller.wait_for_configuration(),
            None => self.get_config().map(|_| ()),
        }
    }

    fn close(&self) {
        let poller = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(poller) = poller {
            if let Err(err) = poller.shutdown() {
                log::warn!(target: "optiflag", "failed to shut down poller thread: {err}");
            }
        }
    }
}

impl Drop for PollingConfigManager {
    fn drop(&mut self) {
        let poller = self.poller.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(poller) = poller.as_ref() {
            poller.stop();
        }
    }
}
