//! HTTP client for the prediction endpoint.
use std::{thread, time::Duration};

use reqwest::Url;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::{CmabConfig, RetryConfig},
    Error, Result,
};

const ATTRIBUTE_TYPE: &str = "custom_attribute";

/// A user attribute sent to the prediction endpoint, identified by its datafile id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CmabAttribute {
    /// Datafile attribute id.
    pub id: String,
    /// Attribute value of the user.
    pub value: serde_json::Value,
}

/// Fetches a variation id for a CMAB rule.
pub trait CmabClient: Send + Sync {
    /// Ask the prediction endpoint which variation `user_id` should see in `rule_id`.
    fn fetch_decision(
        &self,
        rule_id: &str,
        user_id: &str,
        attributes: &[CmabAttribute],
        cmab_uuid: &Uuid,
    ) -> Result<String>;
}

#[derive(Serialize)]
struct PredictionRequest<'a> {
    instances: [Instance<'a>; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Instance<'a> {
    visitor_id: &'a str,
    experiment_id: &'a str,
    #[serde(rename = "cmabUUID")]
    cmab_uuid: String,
    attributes: Vec<AttributePayload<'a>>,
}

#[derive(Serialize)]
struct AttributePayload<'a> {
    id: &'a str,
    value: &'a serde_json::Value,
    #[serde(rename = "type")]
    attribute_type: &'static str,
}

#[derive(Deserialize)]
struct PredictionResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Deserialize)]
struct Prediction {
    #[serde(default)]
    variation_id: Option<String>,
}

/// Outcome of a single failed request.
enum AttemptError {
    /// Transport failures and 5xx responses.
    Retryable(Error),
    Fatal(Error),
}

/// Blocking [`CmabClient`] with exponential backoff.
pub struct HttpCmabClient {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
    endpoint: Url,
    retry: RetryConfig,
}

impl HttpCmabClient {
    /// Create a client for the project identified by `sdk_key`.
    ///
    /// # Errors
    ///
    /// Fails if the endpoint template does not produce a valid URL or the HTTP client cannot be
    /// initialized.
    pub fn new(sdk_key: &str, config: &CmabConfig) -> Result<HttpCmabClient> {
        let endpoint = Url::parse(
            &config
                .prediction_endpoint_template
                .replace("{sdk_key}", sdk_key),
        )
        .map_err(Error::InvalidUrl)?;
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(HttpCmabClient {
            client,
            endpoint,
            retry: config.retry.clone(),
        })
    }

    fn send(&self, body: &PredictionRequest) -> std::result::Result<String, AttemptError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(body)
            .send()
            .map_err(|err| AttemptError::Retryable(err.into()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AttemptError::Retryable(Error::CmabRequest {
                status: status.as_u16(),
            }));
        }
        if !status.is_success() {
            return Err(AttemptError::Fatal(Error::CmabRequest {
                status: status.as_u16(),
            }));
        }

        let response: PredictionResponse = response.json().map_err(|err| {
            AttemptError::Fatal(Error::CmabInvalidResponse(format!(
                "failed to parse body: {err}"
            )))
        })?;
        response
            .predictions
            .into_iter()
            .next()
            .and_then(|it| it.variation_id)
            .filter(|it| !it.is_empty())
            .ok_or_else(|| {
                AttemptError::Fatal(Error::CmabInvalidResponse(
                    "missing predictions[0].variation_id".to_owned(),
                ))
            })
    }
}

impl CmabClient for HttpCmabClient {
    fn fetch_decision(
        &self,
        rule_id: &str,
        user_id: &str,
        attributes: &[CmabAttribute],
        cmab_uuid: &Uuid,
    ) -> Result<String> {
        let body = PredictionRequest {
            instances: [Instance {
                visitor_id: user_id,
                experiment_id: rule_id,
                cmab_uuid: cmab_uuid.to_string(),
                attributes: attributes
                    .iter()
                    .map(|it| AttributePayload {
                        id: &it.id,
                        value: &it.value,
                        attribute_type: ATTRIBUTE_TYPE,
                    })
                    .collect(),
            }],
        };

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let backoff = self.retry.backoff(attempt - 1);
                log::debug!(target: "optiflag", rule_id, attempt, backoff:? = backoff;
                            "retrying CMAB prediction request");
                if backoff > Duration::ZERO {
                    thread::sleep(backoff);
                }
            }

            match self.send(&body) {
                Ok(variation_id) => {
                    log::debug!(target: "optiflag", rule_id, user_id, variation_id:% = variation_id;
                                "fetched CMAB decision");
                    return Ok(variation_id);
                }
                Err(AttemptError::Retryable(err)) => {
                    log::warn!(target: "optiflag", rule_id, attempt;
                               "CMAB prediction request failed: {err}");
                }
                Err(AttemptError::Fatal(err)) => {
                    log::warn!(target: "optiflag", rule_id; "CMAB prediction request failed: {err}");
                    return Err(err);
                }
            }
        }

        Err(Error::CmabFetchFailed {
            retries: self.retry.max_retries,
        })
    }
}
