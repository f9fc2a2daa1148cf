//! An HTTP client that fetches datafiles from the CDN.
use std::time::Duration;

use reqwest::{
    header::{ACCEPT, IF_MODIFIED_SINCE, LAST_MODIFIED},
    StatusCode, Url,
};

use crate::{Error, Result};

/// Settings for [`ConfigurationFetcher`].
pub struct ConfigurationFetcherConfig {
    /// Fully resolved datafile URL.
    pub url: String,
    /// Bearer token for authenticated datafiles.
    pub access_token: Option<String>,
    /// Timeout of a single request.
    pub request_timeout: Duration,
}

/// A client that fetches datafiles, skipping the download when the server reports no change.
pub struct ConfigurationFetcher {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
    url: Url,
    access_token: Option<String>,
    /// `Last-Modified` of the most recently downloaded datafile.
    last_modified: Option<String>,
}

impl ConfigurationFetcher {
    /// Create a fetcher.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidUrl`] if the URL cannot be parsed and with [`Error::Network`] if
    /// the HTTP client cannot be initialized.
    pub fn new(config: ConfigurationFetcherConfig) -> Result<ConfigurationFetcher> {
        let url = Url::parse(&config.url).map_err(Error::InvalidUrl)?;
        let client = reqwest::blocking::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(ConfigurationFetcher {
            client,
            url,
            access_token: config.access_token,
            last_modified: None,
        })
    }

    /// Download the datafile. Returns `Ok(None)` if it has not changed since the last download.
    ///
    /// # Errors
    ///
    /// - [`Error::Forbidden`] on `403`, which usually means the SDK key is wrong.
    /// - [`Error::UnexpectedStatus`] on any other non-success status.
    /// - [`Error::Network`] on transport errors.
    pub fn fetch_datafile(&mut self) -> Result<Option<Vec<u8>>> {
        let mut request = self.client.get(self.url.clone());
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token).header(ACCEPT, "application/json");
        }
        if let Some(last_modified) = &self.last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }

        log::debug!(target: "optiflag", url:% = self.url; "fetching datafile");
        let response = request.send()?;

        match response.status() {
            StatusCode::NOT_MODIFIED => {
                log::debug!(target: "optiflag", "datafile not modified");
                return Ok(None);
            }
            StatusCode::FORBIDDEN => {
                log::warn!(target: "optiflag", "datafile request is forbidden. Check your SDK key");
                return Err(Error::Forbidden);
            }
            status if !status.is_success() => {
                log::warn!(target: "optiflag", status:% = status;
                           "received non-200 response while fetching datafile");
                return Err(Error::UnexpectedStatus(status.as_u16()));
            }
            _ => {}
        }

        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let datafile = response.bytes()?.to_vec();
        if last_modified.is_some() {
            self.last_modified = last_modified;
        }

        log::debug!(target: "optiflag", "successfully fetched datafile");
        Ok(Some(datafile))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httpmock::prelude::*;

    use super::{ConfigurationFetcher, ConfigurationFetcherConfig};
    use crate::Error;

    const LAST_MODIFIED: &str = "Wed, 21 Oct 2015 07:28:00 GMT";

    fn fetcher(server: &MockServer, access_token: Option<&str>) -> ConfigurationFetcher {
        ConfigurationFetcher::new(ConfigurationFetcherConfig {
            url: server.url("/datafiles/key.json"),
            access_token: access_token.map(str::to_owned),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn sends_if_modified_since_after_first_download() {
        let server = MockServer::start();
        let mut initial = server.mock(|when, then| {
            when.method(GET).path("/datafiles/key.json");
            then.status(200)
                .header("Last-Modified", LAST_MODIFIED)
                .body("{}");
        });

        let mut fetcher = fetcher(&server, None);
        assert_eq!(fetcher.fetch_datafile().unwrap().as_deref(), Some(&b"{}"[..]));
        initial.assert();
        initial.delete();

        let conditional = server.mock(|when, then| {
            when.method(GET)
                .path("/datafiles/key.json")
                .header("If-Modified-Since", LAST_MODIFIED);
            then.status(304);
        });
        assert_eq!(fetcher.fetch_datafile().unwrap(), None);
        conditional.assert();
    }

    #[test]
    fn forbidden() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/datafiles/key.json");
            then.status(403);
        });

        let err = fetcher(&server, None).fetch_datafile().unwrap_err();
        assert!(matches!(err, Error::Forbidden));
    }

    #[test]
    fn server_errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/datafiles/key.json");
            then.status(502);
        });

        let err = fetcher(&server, None).fetch_datafile().unwrap_err();
        assert!(matches!(err, Error::UnexpectedStatus(502)));
    }

    #[test]
    fn authenticated_requests_carry_token() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/datafiles/key.json")
                .header("Authorization", "Bearer secret")
                .header("Accept", "application/json");
            then.status(200).body("{}");
        });

        fetcher(&server, Some("secret")).fetch_datafile().unwrap();
        mock.assert();
    }

    #[test]
    fn invalid_url() {
        let result = ConfigurationFetcher::new(ConfigurationFetcherConfig {
            url: "not a url".to_owned(),
            access_token: None,
            request_timeout: Duration::from_secs(5),
        });
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }
}
