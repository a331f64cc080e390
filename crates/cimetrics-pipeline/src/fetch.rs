//! Authenticated JSON fetches from the upstream API.

use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use thiserror::Error;

use std::{fmt, time::Duration};

/// Error fetching a document from the upstream API. The current cycle is skipped.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FetchError {
    /// The upstream API responded with a non-success status.
    #[error("upstream `{url}` responded with {status}")]
    Status {
        /// Requested URL (without query).
        url: Url,
        /// Response status.
        status: StatusCode,
    },
    /// The request did not complete within the configured timeout.
    #[error("request to upstream `{url}` timed out after {timeout:?}")]
    Timeout {
        /// Requested URL (without query).
        url: Url,
        /// Configured timeout.
        timeout: Duration,
    },
    /// The request failed (e.g., connection refused or DNS failure).
    #[error("request to upstream `{url}` failed: {source}")]
    Request {
        /// Requested URL (without query).
        url: Url,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },
    /// The response body is not valid JSON.
    #[error("cannot decode response from upstream `{url}` as JSON: {source}")]
    Decode {
        /// Requested URL (without query).
        url: Url,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },
}

/// Credentials for the upstream API.
#[derive(Clone)]
pub enum Credentials {
    /// HTTP basic authentication. Token-based APIs commonly accept a token as the username
    /// with an empty password.
    Basic {
        /// Username or API token.
        username: String,
        /// Password; `None` sends an empty password.
        password: Option<String>,
    },
    /// Bearer token authentication.
    Bearer(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { username, .. } => formatter
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::Bearer(_) => formatter.debug_tuple("Bearer").field(&"_").finish(),
        }
    }
}

/// Fetcher of JSON documents from an upstream API with a fixed base URL.
///
/// Each [`fetch()`](Self::fetch()) issues exactly one GET request. There are no retries;
/// a failed fetch is retried by the next poll cycle.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    base_url: Url,
    credentials: Option<Credentials>,
    timeout: Duration,
}

impl Fetcher {
    /// Creates a fetcher for the API at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized (e.g., TLS backend failure).
    pub fn new(
        base_url: Url,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url,
            credentials,
            timeout,
        })
    }

    /// Returns the base URL of the upstream API.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let full_path = format!(
            "{}/{}",
            self.base_url.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        url.set_path(&full_path);
        url.set_query(None);
        url
    }

    /// Fetches the JSON document at `path` (relative to the base URL) with the specified query params.
    ///
    /// # Errors
    ///
    /// Returns an error on connection failure, timeout, non-success status or an undecodable body.
    pub async fn fetch(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, FetchError> {
        let url = self.url(path);
        let mut request = self.client.get(url.clone()).query(query);
        request = match &self.credentials {
            Some(Credentials::Basic { username, password }) => {
                request.basic_auth(username, Some(password.as_deref().unwrap_or_default()))
            }
            Some(Credentials::Bearer(token)) => request.bearer_auth(token),
            None => request,
        };

        tracing::debug!(%url, ?query, "Fetching upstream document");
        let response = request.send().await.map_err(|source| {
            if source.is_timeout() {
                FetchError::Timeout {
                    url: url.clone(),
                    timeout: self.timeout,
                }
            } else {
                FetchError::Request {
                    url: url.clone(),
                    source,
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { url, status });
        }
        response.json().await.map_err(|source| {
            if source.is_timeout() {
                FetchError::Timeout {
                    url: url.clone(),
                    timeout: self.timeout,
                }
            } else {
                FetchError::Decode {
                    url: url.clone(),
                    source,
                }
            }
        })
    }
}
