//! Scripted in-memory transport for unit tests

use super::error::ProbeError;
use super::transport::{ByteStream, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub(crate) struct FakeTransport {
    pub head_delay: Duration,
    /// Per-URL overrides of `head_delay`
    pub head_delays: HashMap<String, Duration>,
    pub head_fails: bool,
    pub chunk_count: usize,
    pub chunk_size: usize,
    pub chunk_delay: Duration,
    pub get_status: Option<u16>,
    pub get_fails: bool,
    pub post_delay: Duration,
    pub post_fails: bool,
    pub post_status: Option<u16>,
    /// Transfers panic, as a crashed load generator would
    pub transfers_panic: bool,
    pub geo: Option<serde_json::Value>,
    pub head_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
    pub post_calls: AtomicUsize,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            head_delay: Duration::from_millis(20),
            head_delays: HashMap::new(),
            head_fails: false,
            // 1.25 MB over 1s = 10 Mbps
            chunk_count: 10,
            chunk_size: 125_000,
            chunk_delay: Duration::from_millis(100),
            get_status: None,
            get_fails: false,
            post_delay: Duration::from_millis(200),
            post_fails: false,
            post_status: None,
            transfers_panic: false,
            geo: Some(serde_json::json!({
                "city": "Lisbon",
                "country_name": "Portugal",
                "ip": "203.0.113.7"
            })),
            head_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            post_calls: AtomicUsize::new(0),
        }
    }
}

impl FakeTransport {
    /// Every request fails immediately
    pub fn outage() -> Self {
        Self {
            head_fails: true,
            get_fails: true,
            post_fails: true,
            geo: None,
            ..Self::default()
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn head(&self, url: &str) -> Result<(), ProbeError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        if self.head_fails {
            return Err(ProbeError::Network("connection refused".to_string()));
        }
        let delay = self.head_delays.get(url).copied().unwrap_or(self.head_delay);
        tokio::time::sleep(delay).await;
        Ok(())
    }

    async fn get_stream(&self, _url: &str) -> Result<ByteStream, ProbeError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.transfers_panic {
            panic!("download transfer crashed");
        }
        if self.get_fails {
            return Err(ProbeError::Network("connection reset".to_string()));
        }
        if let Some(status) = self.get_status {
            return Err(ProbeError::Status(status));
        }
        let (count, size, delay) = (self.chunk_count, self.chunk_size, self.chunk_delay);
        let stream = futures_util::stream::unfold(0usize, move |i| async move {
            if i >= count {
                return None;
            }
            tokio::time::sleep(delay).await;
            Some((Ok(Bytes::from(vec![0u8; size])), i + 1))
        });
        Ok(Box::pin(stream))
    }

    async fn post(&self, _url: &str, _body: Vec<u8>) -> Result<(), ProbeError> {
        self.post_calls.fetch_add(1, Ordering::SeqCst);
        if self.transfers_panic {
            panic!("upload transfer crashed");
        }
        if self.post_fails {
            return Err(ProbeError::Network("broken pipe".to_string()));
        }
        if let Some(status) = self.post_status {
            return Err(ProbeError::Status(status));
        }
        tokio::time::sleep(self.post_delay).await;
        Ok(())
    }

    async fn get_json(&self, _url: &str) -> Result<serde_json::Value, ProbeError> {
        self.geo
            .clone()
            .ok_or_else(|| ProbeError::Network("lookup failed".to_string()))
    }
}
