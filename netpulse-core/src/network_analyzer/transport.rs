//! HTTP transport used by every probe
//!
//! Probes only need "perform a request, observe elapsed time and/or bytes".
//! `Transport` is that seam; `HttpTransport` is the reqwest implementation.
//! Timeouts and cancellation are applied by callers through [`bounded`], not
//! by the transport.

use super::error::{EngineError, ProbeError};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use log::debug;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use reqwest::Client;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Response body delivered chunk by chunk
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProbeError>> + Send>>;

/// Connect timeout for the shared client. Whole-request limits are per probe.
const CONNECT_TIMEOUT_SECS: u64 = 10;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Lightweight round trip; any HTTP response counts as success
    async fn head(&self, url: &str) -> Result<(), ProbeError>;

    /// GET whose body is consumed incrementally. Non-success status is an error.
    async fn get_stream(&self, url: &str) -> Result<ByteStream, ProbeError>;

    /// POST an opaque body. Non-success status is an error.
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<(), ProbeError>;

    /// GET and decode a JSON document
    async fn get_json(&self, url: &str) -> Result<serde_json::Value, ProbeError>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, EngineError> {
        let client = Client::builder()
            .user_agent(concat!("NetPulse/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| EngineError::Client(e.to_string()))?;

        Ok(Self { client })
    }
}

fn network_error(e: reqwest::Error) -> ProbeError {
    ProbeError::Network(e.to_string())
}

#[async_trait]
impl Transport for HttpTransport {
    async fn head(&self, url: &str) -> Result<(), ProbeError> {
        self.client
            .head(url)
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(network_error)?;
        Ok(())
    }

    async fn get_stream(&self, url: &str) -> Result<ByteStream, ProbeError> {
        let response = self
            .client
            .get(url)
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            debug!("GET {} returned {}", url, response.status());
            return Err(ProbeError::Status(response.status().as_u16()));
        }

        Ok(Box::pin(response.bytes_stream().map(|chunk| chunk.map_err(network_error))))
    }

    async fn post(&self, url: &str, body: Vec<u8>) -> Result<(), ProbeError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            debug!("POST {} returned {}", url, response.status());
            return Err(ProbeError::Status(response.status().as_u16()));
        }
        Ok(())
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value, ProbeError> {
        let response = self.client.get(url).send().await.map_err(network_error)?;

        if !response.status().is_success() {
            return Err(ProbeError::Status(response.status().as_u16()));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ProbeError::Decode(e.to_string()))
    }
}

/// Run `fut` under its own timeout while honouring the run's cancellation.
///
/// Cancellation wins ties so an aborted run never waits on a timer.
pub async fn bounded<T, F>(
    cancel: &CancellationToken,
    limit: Duration,
    fut: F,
) -> Result<T, ProbeError>
where
    F: Future<Output = Result<T, ProbeError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProbeError::Cancelled),
        res = tokio::time::timeout(limit, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(ProbeError::Timeout(limit)),
        },
    }
}
