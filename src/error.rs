use std::sync::Arc;

/// Represents a result type for operations in the SDK.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the SDK.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// No project configuration is available yet.
    #[error("SDK not ready: project configuration is not available")]
    SdkNotReady,

    /// The requested flag does not exist in the current configuration.
    #[error("no flag was found for key \"{0}\"")]
    FlagKeyInvalid(String),

    /// The requested experiment does not exist in the current configuration.
    #[error("no experiment was found for key \"{0}\"")]
    ExperimentKeyInvalid(String),

    /// The tracked event does not exist in the current configuration.
    #[error("no event was found for key \"{0}\"")]
    EventKeyInvalid(String),

    /// The requested variable does not exist on the flag.
    #[error("no variable \"{variable_key}\" was found on flag \"{flag_key}\"")]
    VariableKeyInvalid {
        /// Flag the variable was looked up on.
        flag_key: String,
        /// Missing variable key.
        variable_key: String,
    },

    /// The datafile could not be parsed.
    #[error("failed to parse datafile: {0}")]
    DatafileParse(Arc<serde_json::Error>),

    /// The datafile version is not supported.
    #[error("unsupported datafile version \"{0}\"")]
    UnsupportedDatafileVersion(String),

    /// The datafile endpoint answered with 403 Forbidden. The SDK key is likely invalid.
    #[error("forbidden (403) while fetching datafile, sdk_key is likely invalid")]
    Forbidden,

    /// The configured URL template could not be turned into a valid URL.
    #[error("invalid url configuration")]
    InvalidUrl(#[source] url::ParseError),

    /// The server answered with a status the SDK cannot handle.
    #[error("unexpected response status {0}")]
    UnexpectedStatus(u16),

    /// Indicates that the poller thread panicked. This should normally never happen.
    #[error("poller thread panicked")]
    PollerThreadPanicked,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// A CMAB rule was evaluated but no CMAB service is installed.
    #[error("CMAB service is not available")]
    CmabServiceUnavailable,

    /// The prediction endpoint kept failing until retries were exhausted.
    #[error("failed to fetch CMAB decision after {retries} attempts")]
    CmabFetchFailed {
        /// Number of retries that were configured.
        retries: u32,
    },

    /// The prediction endpoint answered with a non-retryable status.
    #[error("CMAB request failed with status {status}")]
    CmabRequest {
        /// HTTP status code.
        status: u16,
    },

    /// The prediction endpoint answered 2xx but the body is unusable.
    #[error("invalid CMAB response: {0}")]
    CmabInvalidResponse(String),

    /// The prediction refers to a variation the experiment does not have.
    #[error("variation with ID {variation_id} not found in experiment {experiment_key}")]
    CmabVariationNotFound {
        /// Variation id returned by the prediction endpoint.
        variation_id: String,
        /// Experiment being decided.
        experiment_key: String,
    },
}

impl Error {
    /// Return `true` for errors raised by the CMAB path. These errors are terminal for a flag
    /// decision: no rollout fallback happens after them.
    pub fn is_cmab(&self) -> bool {
        matches!(
            self,
            Error::CmabServiceUnavailable
                | Error::CmabFetchFailed { .. }
                | Error::CmabRequest { .. }
                | Error::CmabInvalidResponse(_)
                | Error::CmabVariationNotFound { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::DatafileParse(Arc::new(value))
    }
}
