//! Network transport used by the strategies.
//!
//! `HttpFetcher` is the production implementation over `reqwest`. Any HTTP
//! status, including 4xx/5xx, is a successful fetch; only transport failures
//! (DNS, connect, TLS, timeout) are errors.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

use crate::http::{Request, Response, ResponseSource};

/// Default transport-level timeout.
/// 30s allows for slow responses while failing fast enough to fall back to cache.
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// Fetch with an optional upper bound on the total time.
///
/// Without a bound the transport's own timeout applies.
pub async fn fetch_with_timeout(
    fetcher: &dyn Fetcher,
    request: &Request,
    timeout: Option<Duration>,
) -> Result<Response, FetchError> {
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, fetcher.fetch(request)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(limit)),
        },
        None => fetcher.fetch(request).await,
    }
}

/// HTTP transport.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(Response {
            status,
            headers,
            body,
            source: ResponseSource::Network,
        })
    }
}
