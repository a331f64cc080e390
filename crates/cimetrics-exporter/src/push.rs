//! Pushing registry snapshots to a push gateway.

use std::{fmt, str, time::Duration};

use http_body_util::BodyExt as _;
use hyper::{body::Incoming, header, http::uri::InvalidUri, Method, Request, Response, StatusCode, Uri};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;

use cimetrics::{Format, Registry};

/// Error creating a [`GroupingKey`] or a [`PushGateway`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GroupingKeyError {
    /// A grouping key label value is empty or contains a `/`.
    #[error("invalid `{label}` grouping label value {value:?}: must be non-empty and must not contain '/'")]
    InvalidLabelValue {
        /// Grouping label name.
        label: &'static str,
        /// Offending value.
        value: String,
    },
    /// The resulting push endpoint is not a valid URI.
    #[error("invalid push gateway endpoint `{endpoint}`: {source}")]
    InvalidEndpoint {
        /// Endpoint that failed to parse.
        endpoint: String,
        /// Parsing error.
        #[source]
        source: InvalidUri,
    },
}

/// Grouping key under which pushed metrics replace the previously pushed ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupingKey {
    job: String,
    instance: Option<String>,
}

impl GroupingKey {
    /// Creates a grouping key with the specified job label.
    ///
    /// # Errors
    ///
    /// Returns an error if `job` is empty or contains a `/`.
    pub fn new(job: impl Into<String>) -> Result<Self, GroupingKeyError> {
        let job = job.into();
        Self::check_value("job", &job)?;
        Ok(Self {
            job,
            instance: None,
        })
    }

    /// Adds the `instance` label to this key.
    ///
    /// # Errors
    ///
    /// Returns an error if `instance` is empty or contains a `/`.
    pub fn with_instance(mut self, instance: impl Into<String>) -> Result<Self, GroupingKeyError> {
        let instance = instance.into();
        Self::check_value("instance", &instance)?;
        self.instance = Some(instance);
        Ok(self)
    }

    fn check_value(label: &'static str, value: &str) -> Result<(), GroupingKeyError> {
        if value.is_empty() || value.contains('/') {
            Err(GroupingKeyError::InvalidLabelValue {
                label,
                value: value.to_owned(),
            })
        } else {
            Ok(())
        }
    }

    fn endpoint(&self, gateway_url: &str) -> String {
        let gateway_url = gateway_url.trim_end_matches('/');
        let mut endpoint = format!("{gateway_url}/metrics/job/{}", self.job);
        if let Some(instance) = &self.instance {
            endpoint.push_str("/instance/");
            endpoint.push_str(instance);
        }
        endpoint
    }
}

/// Error pushing metrics to a gateway. The pushed snapshot is lost; there is no retry.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PublishError {
    /// The gateway responded with a non-success status.
    #[error("push gateway `{endpoint}` responded with {status}: {body}")]
    Status {
        /// Push endpoint.
        endpoint: Uri,
        /// Response status.
        status: StatusCode,
        /// Response body (or a description of it if it cannot be read).
        body: String,
    },
    /// The request could not be sent, or the response could not be received.
    #[error("error submitting metrics to push gateway `{endpoint}`: {source}")]
    Request {
        /// Push endpoint.
        endpoint: Uri,
        /// Underlying client error.
        #[source]
        source: hyper_util::client::legacy::Error,
    },
    /// The gateway did not respond in time.
    #[error("push to gateway `{endpoint}` timed out after {timeout:?}")]
    Timeout {
        /// Push endpoint.
        endpoint: Uri,
        /// Configured timeout.
        timeout: Duration,
    },
}

/// Client pushing whole registries to a push gateway.
///
/// Each [push](Self::push()) is a `PUT` to `<gateway>/metrics/job/<job>[/instance/<instance>]`,
/// so the gateway replaces all metrics previously pushed under the same grouping key.
/// An [update](Self::update()) is a `POST` to the same endpoint.
pub struct PushGateway {
    client: Client<HttpConnector, String>,
    endpoint: Uri,
    timeout: Duration,
}

impl fmt::Debug for PushGateway {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PushGateway")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl PushGateway {
    /// Default timeout for a single push.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Creates a client for the gateway at `gateway_url` (e.g., `http://pushgateway:9091`).
    ///
    /// # Errors
    ///
    /// Returns an error if the push endpoint derived from `gateway_url` and `grouping_key` is not a valid URI.
    pub fn new(gateway_url: &str, grouping_key: &GroupingKey) -> Result<Self, GroupingKeyError> {
        let endpoint = grouping_key.endpoint(gateway_url);
        let endpoint = endpoint
            .parse()
            .map_err(|source| GroupingKeyError::InvalidEndpoint { endpoint, source })?;
        Ok(Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            endpoint,
            timeout: Self::DEFAULT_TIMEOUT,
        })
    }

    /// Sets the timeout for a single push.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the push endpoint.
    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }

    /// Pushes all metrics in `registry` to the gateway, replacing everything previously pushed
    /// under the grouping key.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, times out or the gateway responds with a non-success status.
    /// Failures are logged.
    pub async fn push(&self, registry: &Registry) -> Result<(), PublishError> {
        self.send(Method::PUT, registry).await
    }

    /// Pushes metrics in `registry` to the gateway, replacing only previously pushed metrics
    /// with the same names. Other metrics under the grouping key are retained.
    ///
    /// # Errors
    ///
    /// Fails in the same cases as [`Self::push()`].
    pub async fn update(&self, registry: &Registry) -> Result<(), PublishError> {
        self.send(Method::POST, registry).await
    }

    async fn send(&self, method: Method, registry: &Registry) -> Result<(), PublishError> {
        let endpoint = &self.endpoint;
        let mut body = String::with_capacity(1_024);
        registry.encode(&mut body, Format::Prometheus).unwrap();
        // ^ `unwrap()` is safe; writing to a string never fails.
        let pushed_size = body.len();

        let request = Request::builder()
            .method(method.clone())
            .uri(endpoint.clone())
            .header(header::CONTENT_TYPE, Format::PROMETHEUS_CONTENT_TYPE)
            .body(body)
            .expect("Failed creating push gateway request");

        // The timeout covers reading the body of an erroneous response as well.
        let exchange = async {
            let response = match self.client.request(request).await {
                Ok(response) => response,
                Err(err) => {
                    tracing::error!(%err, %method, %endpoint, "Error submitting metrics to push gateway");
                    return Err(PublishError::Request {
                        endpoint: endpoint.clone(),
                        source: err,
                    });
                }
            };
            if response.status().is_success() {
                tracing::debug!(pushed_size, %method, %endpoint, "Pushed metrics to push gateway");
                Ok(())
            } else {
                Err(report_erroneous_response(endpoint, response).await)
            }
        };

        if let Ok(result) = tokio::time::timeout(self.timeout, exchange).await {
            result
        } else {
            tracing::error!(
                timeout = ?self.timeout,
                %method,
                %endpoint,
                "Timed out submitting metrics to push gateway"
            );
            Err(PublishError::Timeout {
                endpoint: endpoint.clone(),
                timeout: self.timeout,
            })
        }
    }
}

async fn report_erroneous_response(endpoint: &Uri, response: Response<Incoming>) -> PublishError {
    let status = response.status();

    let body = match response.into_body().collect().await {
        Ok(body) => body.to_bytes(),
        Err(err) => {
            tracing::error!(
                %err,
                %status,
                %endpoint,
                "Failed reading erroneous response from push gateway"
            );
            return PublishError::Status {
                endpoint: endpoint.clone(),
                status,
                body: format!("(failed reading body: {err})"),
            };
        }
    };

    let body = match str::from_utf8(&body) {
        Ok(body) => body.to_owned(),
        Err(err) => {
            let body_length = body.len();
            format!("(Non UTF-8 body with length {body_length}B: {err})")
        }
    };
    tracing::warn!(
        %status,
        %body,
        %endpoint,
        "Error pushing metrics to push gateway"
    );
    PublishError::Status {
        endpoint: endpoint.clone(),
        status,
        body,
    }
}
