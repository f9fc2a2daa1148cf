//! A background poller thread that periodically requests the datafile and installs new revisions
//! in a configuration store.
use std::{
    sync::{mpsc::RecvTimeoutError, Arc, Condvar, Mutex, PoisonError},
    time::Duration,
};

use rand::{thread_rng, Rng};

use crate::configuration_fetcher::ConfigurationFetcher;
use crate::configuration_store::ConfigurationStore;
use crate::project_config::ProjectConfig;
use crate::{Error, Result};

/// Configuration for [`PollerThread`].
// Not implementing `Copy` as we may add non-copyable fields in the future.
#[derive(Debug, Clone)]
pub struct PollerThreadConfig {
    /// Interval to wait between requests for the datafile. Zero disables polling: the datafile is
    /// fetched once and the thread exits.
    ///
    /// Defaults to [`PollerThreadConfig::DEFAULT_POLL_INTERVAL`].
    pub interval: Duration,
    /// Jitter applies a randomized duration to wait between requests. This helps to avoid multiple
    /// server instances synchronizing and producing spiky network load.
    ///
    /// Defaults to [`PollerThreadConfig::DEFAULT_POLL_JITTER`].
    pub jitter: Duration,
}

impl PollerThreadConfig {
    /// Default value for [`PollerThreadConfig::interval`].
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);
    /// Default value for [`PollerThreadConfig::jitter`].
    pub const DEFAULT_POLL_JITTER: Duration = Duration::from_secs(30);

    /// Create a new `PollerThreadConfig` using default configuration.
    pub fn new() -> PollerThreadConfig {
        PollerThreadConfig::default()
    }

    /// Update poll interval with `interval`.
    pub fn with_interval(mut self, interval: Duration) -> PollerThreadConfig {
        self.interval = interval;
        self
    }

    /// Update poll interval jitter with `jitter`.
    pub fn with_jitter(mut self, jitter: Duration) -> PollerThreadConfig {
        self.jitter = jitter;
        self
    }
}

impl Default for PollerThreadConfig {
    fn default() -> PollerThreadConfig {
        PollerThreadConfig {
            interval: PollerThreadConfig::DEFAULT_POLL_INTERVAL,
            jitter: PollerThreadConfig::DEFAULT_POLL_JITTER,
        }
    }
}

/// A datafile poller thread.
///
/// Every successful download is parsed and handed to [`ConfigurationStore::set_config`], which
/// skips revisions that are already installed. Failures are recorded with
/// [`ConfigurationStore::set_error`] and the previous snapshot stays active.
pub struct PollerThread {
    join_handle: std::thread::JoinHandle<()>,

    /// Used to send a stop command to the poller thread.
    stop_sender: std::sync::mpsc::SyncSender<()>,

    /// Holds `None` until the first fetch attempt completes, then the outcome of the latest
    /// attempt.
    result: Arc<(Mutex<Option<Result<()>>>, Condvar)>,
}

impl PollerThread {
    /// Starts the poller thread with the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the thread fails to start.
    pub fn start(
        mut fetcher: ConfigurationFetcher,
        store: Arc<ConfigurationStore>,
        config: PollerThreadConfig,
    ) -> std::io::Result<PollerThread> {
        // Using `sync_channel` here as it makes `stop_sender` `Sync` (shareable between
        // threads). Buffer size of 1 is enough as we only ever send a stop command.
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);

        let result = Arc::new((Mutex::new(None), Condvar::new()));

        let join_handle = {
            let result = Arc::clone(&result);
            let update_result = move |value| {
                *result.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
                result.1.notify_all();
            };

            std::thread::Builder::new()
                .name("optiflag-poller".to_owned())
                .spawn(move || {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| loop {
                        log::debug!(target: "optiflag", "polling for a new datafile");
                        match poll_once(&mut fetcher, &store) {
                            Ok(()) => update_result(Ok(())),
                            Err(err @ Error::InvalidUrl(_)) => {
                                // Unrecoverable.
                                store.set_error(err.clone());
                                update_result(Err(err));
                                return;
                            }
                            Err(err) => {
                                store.set_error(err.clone());
                                update_result(Err(err));
                            }
                        }

                        if config.interval.is_zero() {
                            log::debug!(target: "optiflag", "polling is disabled, poller thread exits");
                            return;
                        }

                        let timeout = jitter(config.interval, config.jitter);
                        match stop_receiver.recv_timeout(timeout) {
                            Err(RecvTimeoutError::Timeout) => {}
                            Ok(()) => {
                                log::debug!(target: "optiflag", "poller thread received stop command");
                                return;
                            }
                            Err(RecvTimeoutError::Disconnected) => {
                                log::debug!(target: "optiflag", "poller thread received disconnected");
                                return;
                            }
                        }
                    }));

                    if result.is_err() {
                        update_result(Err(Error::PollerThreadPanicked));
                    }
                })?
        };

        Ok(PollerThread {
            join_handle,
            stop_sender,
            result,
        })
    }

    /// Block until the first fetch attempt completes.
    ///
    /// # Errors
    ///
    /// Returns the error of the latest fetch attempt, for example [`Error::Forbidden`] or
    /// [`Error::DatafileParse`], or [`Error::PollerThreadPanicked`].
    pub fn wait_for_configuration(&self) -> Result<()> {
        let mut lock = self
            .result
            .0
            .lock()
            .map_err(|_| Error::PollerThreadPanicked)?;
        loop {
            match &*lock {
                Some(result) => return result.clone(),
                None => {
                    lock = self
                        .result
                        .1
                        .wait(lock)
                        .map_err(|_| Error::PollerThreadPanicked)?;
                }
            }
        }
    }

    /// Stop the poller thread.
    ///
    /// This function does not wait for the thread to actually stop.
    pub fn stop(&self) {
        // Error means that the receiver was dropped (thread exited) or another thread already
        // sent a stop command. Both are fine.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the poller thread and block waiting for it to exit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PollerThreadPanicked`] if the thread has panicked.
    pub fn shutdown(self) -> Result<()> {
        self.stop();

        self.join_handle
            .join()
            .map_err(|_| Error::PollerThreadPanicked)?;

        Ok(())
    }
}

fn poll_once(fetcher: &mut ConfigurationFetcher, store: &ConfigurationStore) -> Result<()> {
    let Some(datafile) = fetcher.fetch_datafile()? else {
        return match store.get_config() {
            Some(_) => Ok(()),
            // 304 before anything was installed. Nothing to serve.
            None => Err(Error::SdkNotReady),
        };
    };
    let config = ProjectConfig::from_datafile(datafile).inspect_err(|err| {
        log::warn!(target: "optiflag", "failed to parse datafile: {err}");
    })?;
    store.set_config(config);
    Ok(())
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}
