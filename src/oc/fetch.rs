//! oc::fetch
//!
//! Downloading release artifacts.
//!
//! # Architecture
//!
//! [`Fetcher`] is synchronous because the start pipeline is. [`HttpFetcher`]
//! drives `reqwest` on a private current-thread tokio runtime for the
//! duration of one request, so it must not be called from inside another
//! runtime.

use std::time::Duration;

use reqwest::header::USER_AGENT;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

/// User agent sent with downloads.
const CLIENT_USER_AGENT: &str = concat!("minicluster/", env!("CARGO_PKG_VERSION"));

/// Errors from a download.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("failed to start HTTP runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Fetches a URL's body.
pub trait Fetcher: Send + Sync {
    /// The body, or `None` if the server answers 404.
    fn get(&self, url: &str) -> Result<Option<Vec<u8>>, FetchError>;
}

/// HTTP(S) fetcher backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }

    async fn get_async(&self, url: &str) -> Result<Option<Vec<u8>>, FetchError> {
        let network = |e: reqwest::Error| FetchError::Network {
            url: url.to_string(),
            message: e.to_string(),
        };

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(network)?;

        let status = response.status();
        debug!(url, status = status.as_u16(), "fetched");
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(network)?;
        Ok(Some(body.to_vec()))
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl Fetcher for HttpFetcher {
    fn get(&self, url: &str) -> Result<Option<Vec<u8>>, FetchError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.get_async(url))
    }
}
