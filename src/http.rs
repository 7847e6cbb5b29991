//! Thin HTTP client
//!
//! Wraps a `reqwest::Client` with a base URL and a set of default headers,
//! and implements [`Fetch`] so it can feed the endpoint cache.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use thiserror::Error;

use crate::cache::FetchError;

/// Default timeout applied to every request
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Performs one round trip for an endpoint path and returns the raw body
#[async_trait]
pub trait Fetch: Send + Sync + 'static {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError>;
}

/// Errors that can occur when building a [`Client`]
#[derive(Debug, Error)]
pub enum ClientError {
    /// Header name is not a valid HTTP header name
    #[error("invalid header name: {0}")]
    InvalidHeaderName(String),

    /// Header value contains characters not allowed in HTTP headers
    #[error("invalid value for header {0}")]
    InvalidHeaderValue(String),

    /// The underlying HTTP client could not be constructed
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// HTTP client bound to a base URL
#[derive(Debug, Clone)]
pub struct Client {
    client: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
}

/// Builder for [`Client`]
#[derive(Debug)]
pub struct ClientBuilder {
    base_url: String,
    timeout: Duration,
    headers: Vec<(String, String)>,
}

impl ClientBuilder {
    /// Sets the per-request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Adds a header sent with every request
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn build(self) -> Result<Client, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ClientError::InvalidHeaderName(name.clone()))?;
            let header_value =
                HeaderValue::from_str(&value).map_err(|_| ClientError::InvalidHeaderValue(name))?;
            headers.insert(header_name, header_value);
        }

        let client = reqwest::Client::builder().timeout(self.timeout).build()?;
        Ok(Client {
            client,
            base_url: self.base_url,
            headers,
        })
    }
}

impl Client {
    /// Creates a client with the default timeout and headers.
    ///
    /// Use [`Client::builder`] to see TLS backend failures as errors; here
    /// they are logged and a client without the default timeout is used.
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "failed to build HTTP client, falling back to defaults");
                reqwest::Client::new()
            });
        Self::with_client(client, base_url)
    }

    /// Starts building a client with custom timeout and headers
    pub fn builder(base_url: impl Into<String>) -> ClientBuilder {
        ClientBuilder {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            headers: Vec::new(),
        }
    }

    /// Creates a client around an existing `reqwest::Client`
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            client,
            base_url: base_url.into(),
            headers,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Starts a request for `path` with the default headers applied.
    ///
    /// Per-request headers can be added to the returned builder.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .headers(self.headers.clone())
    }

    /// Performs a GET request
    pub async fn get(&self, path: &str) -> reqwest::Result<Response> {
        self.request(Method::GET, path).send().await
    }

    /// Performs a POST request with a JSON body
    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> reqwest::Result<Response> {
        self.request(Method::POST, path).json(body).send().await
    }

    /// Performs a PUT request with a JSON body
    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> reqwest::Result<Response> {
        self.request(Method::PUT, path).json(body).send().await
    }

    /// Performs a DELETE request
    pub async fn delete(&self, path: &str) -> reqwest::Result<Response> {
        self.request(Method::DELETE, path).send().await
    }
}

#[async_trait]
impl Fetch for Client {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.get(path).await?;
        if response.status() != StatusCode::OK {
            return Err(FetchError::Status(response.status()));
        }
        let body = response.bytes().await?;
        Ok(body.to_vec())
    }
}
