use std::{sync::Arc, time::Duration};

use crate::{
    cmab::CmabService,
    decision::{MapOverrideStore, OverrideStore},
    events::{EventProcessor, NoopEventProcessor},
    poller_thread::PollerThreadConfig,
    user_profile::UserProfileService,
    Client, DecideOption, DecideOptions,
};

/// Configuration for [`Client`].
///
/// # Examples
/// ```
/// # use std::time::Duration;
/// # use optiflag::{ClientConfig, DecideOption};
/// let config = ClientConfig::from_sdk_key("sdk-key")
///     .polling_interval(Duration::from_secs(60))
///     .default_decide_options([DecideOption::IncludeReasons])
///     .event_processor(|event| {
///         println!("{:?}", event);
///     });
/// ```
pub struct ClientConfig {
    pub(crate) sdk_key: String,
    pub(crate) datafile: Option<Vec<u8>>,
    pub(crate) datafile_url_template: Option<String>,
    pub(crate) access_token: Option<String>,
    pub(crate) poller: PollerThreadConfig,
    pub(crate) request_timeout: Duration,
    pub(crate) cmab: CmabConfig,
    pub(crate) cmab_service: Option<Arc<dyn CmabService>>,
    pub(crate) user_profile_service: Option<Arc<dyn UserProfileService>>,
    pub(crate) event_processor: Arc<dyn EventProcessor>,
    pub(crate) override_store: Arc<dyn OverrideStore>,
    pub(crate) default_decide_options: DecideOptions,
}

impl ClientConfig {
    /// Default datafile URL template. `{sdk_key}` is replaced with the SDK key.
    pub const DEFAULT_DATAFILE_URL_TEMPLATE: &'static str =
        "https://cdn.optiflag.dev/datafiles/{sdk_key}.json";

    /// Default datafile URL template used when an access token is configured.
    pub const DEFAULT_AUTH_DATAFILE_URL_TEMPLATE: &'static str =
        "https://config.optiflag.dev/datafiles/auth/{sdk_key}.json";

    /// Default timeout for datafile requests.
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a default configuration for the project identified by `sdk_key`.
    ///
    /// ```
    /// # use optiflag::ClientConfig;
    /// ClientConfig::from_sdk_key("sdk-key");
    /// ```
    pub fn from_sdk_key(sdk_key: impl Into<String>) -> Self {
        ClientConfig {
            sdk_key: sdk_key.into(),
            datafile: None,
            datafile_url_template: None,
            access_token: None,
            poller: PollerThreadConfig::default(),
            request_timeout: ClientConfig::DEFAULT_REQUEST_TIMEOUT,
            cmab: CmabConfig::default(),
            cmab_service: None,
            user_profile_service: None,
            event_processor: Arc::new(NoopEventProcessor),
            override_store: Arc::new(MapOverrideStore::new()),
            default_decide_options: DecideOptions::default(),
        }
    }

    /// Use a fixed datafile instead of polling for one.
    ///
    /// The datafile is parsed when the client is created. No background thread is started.
    pub fn datafile(mut self, datafile: impl Into<Vec<u8>>) -> Self {
        self.datafile = Some(datafile.into());
        self
    }

    /// Override the datafile URL template. `{sdk_key}` is replaced with the SDK key.
    pub fn datafile_url_template(mut self, template: impl Into<String>) -> Self {
        self.datafile_url_template = Some(template.into());
        self
    }

    /// Fetch authenticated datafiles with a bearer `token`.
    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Interval between datafile requests. Zero disables polling after the initial fetch.
    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.poller = self.poller.with_interval(interval);
        self
    }

    /// Randomized amount subtracted from each polling interval.
    pub fn poll_jitter(mut self, jitter: Duration) -> Self {
        self.poller = self.poller.with_jitter(jitter);
        self
    }

    /// Timeout of a single datafile request.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Configure the built-in CMAB prediction client and cache.
    pub fn cmab(mut self, cmab: CmabConfig) -> Self {
        self.cmab = cmab;
        self
    }

    /// Replace the built-in CMAB service. [`ClientConfig::cmab`] is ignored when this is set.
    pub fn cmab_service(mut self, service: Arc<dyn CmabService>) -> Self {
        self.cmab_service = Some(service);
        self
    }

    /// Make experiment assignments sticky by persisting them in `service`.
    pub fn user_profile_service(mut self, service: Arc<dyn UserProfileService>) -> Self {
        self.user_profile_service = Some(service);
        self
    }

    /// Set the event processor that receives impression and conversion events.
    ///
    /// ```
    /// # use optiflag::ClientConfig;
    /// let config = ClientConfig::from_sdk_key("sdk-key").event_processor(|event| {
    ///   println!("{:?}", event);
    /// });
    /// ```
    pub fn event_processor(mut self, processor: impl EventProcessor + 'static) -> Self {
        self.event_processor = Arc::new(processor);
        self
    }

    /// Replace the store behind [`Client::set_forced_variation`].
    pub fn override_store(mut self, store: Arc<dyn OverrideStore>) -> Self {
        self.override_store = store;
        self
    }

    /// Options applied to every decide call, in addition to the per-call options.
    pub fn default_decide_options(
        mut self,
        options: impl IntoIterator<Item = DecideOption>,
    ) -> Self {
        self.default_decide_options = options.into_iter().collect();
        self
    }

    /// The datafile URL for this configuration.
    pub(crate) fn datafile_url(&self) -> String {
        let template = match (&self.datafile_url_template, &self.access_token) {
            (Some(template), _) => template.as_str(),
            (None, Some(_)) => ClientConfig::DEFAULT_AUTH_DATAFILE_URL_TEMPLATE,
            (None, None) => ClientConfig::DEFAULT_DATAFILE_URL_TEMPLATE,
        };
        template.replace("{sdk_key}", &self.sdk_key)
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// ```
    /// # use optiflag::{ClientConfig, Client};
    /// let client: Client = ClientConfig::from_sdk_key("sdk-key")
    ///     .polling_interval(std::time::Duration::ZERO)
    ///     .datafile_url_template("http://localhost:1/{sdk_key}")
    ///     .to_client();
    /// ```
    pub fn to_client(self) -> Client {
        Client::new(self)
    }
}

/// Configuration of the CMAB prediction client and its decision cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CmabConfig {
    /// Prediction endpoint. `{sdk_key}` is replaced with the SDK key.
    pub prediction_endpoint_template: String,
    /// Retry policy of prediction requests.
    pub retry: RetryConfig,
    /// How long a cached prediction stays valid.
    pub cache_ttl: Duration,
    /// Timeout of a single prediction request.
    pub timeout: Duration,
}

impl CmabConfig {
    /// Default value for [`CmabConfig::prediction_endpoint_template`].
    pub const DEFAULT_PREDICTION_ENDPOINT_TEMPLATE: &'static str =
        "https://prediction.optiflag.dev/predict/{sdk_key}";
    /// Default value for [`CmabConfig::cache_ttl`].
    pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);
    /// Default value for [`CmabConfig::timeout`].
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Update the prediction endpoint template.
    pub fn with_prediction_endpoint_template(mut self, template: impl Into<String>) -> Self {
        self.prediction_endpoint_template = template.into();
        self
    }

    /// Update the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Update the cache time-to-live.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Update the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for CmabConfig {
    fn default() -> Self {
        CmabConfig {
            prediction_endpoint_template: CmabConfig::DEFAULT_PREDICTION_ENDPOINT_TEMPLATE
                .to_owned(),
            retry: RetryConfig::default(),
            cache_ttl: CmabConfig::DEFAULT_CACHE_TTL,
            timeout: CmabConfig::DEFAULT_TIMEOUT,
        }
    }
}

/// Exponential backoff policy for prediction requests.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt. A value of `k` allows `k + 1` requests in total.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

impl RetryConfig {
    /// Delay before retry number `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.initial_backoff.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 1,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ClientConfig, RetryConfig};

    #[test]
    fn backoff_grows_and_is_capped() {
        let retry = RetryConfig {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            multiplier: 2.0,
        };
        assert_eq!(retry.backoff(0), Duration::from_millis(100));
        assert_eq!(retry.backoff(1), Duration::from_millis(200));
        assert_eq!(retry.backoff(2), Duration::from_millis(350));
        assert_eq!(retry.backoff(u32::MAX), Duration::from_millis(350));
    }

    #[test]
    fn datafile_url_templates() {
        assert_eq!(
            ClientConfig::from_sdk_key("abc").datafile_url(),
            "https://cdn.optiflag.dev/datafiles/abc.json"
        );
        assert_eq!(
            ClientConfig::from_sdk_key("abc")
                .access_token("token")
                .datafile_url(),
            "https://config.optiflag.dev/datafiles/auth/abc.json"
        );
        assert_eq!(
            ClientConfig::from_sdk_key("abc")
                .datafile_url_template("http://localhost/{sdk_key}")
                .datafile_url(),
            "http://localhost/abc"
        );
    }
}
