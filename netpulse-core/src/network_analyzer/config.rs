//! Run configuration and endpoint addresses

use super::error::ConfigError;
use super::types::ServerCandidate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parameters for one run. Immutable once the engine is built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Upper bound for each throughput transfer, in seconds
    #[serde(default = "default_duration_secs")]
    pub duration_secs: f64,
    /// Concurrent download connections (upload is capped at 2)
    #[serde(default = "default_parallel_connections")]
    pub parallel_connections: usize,
    #[serde(default = "default_enable_bufferbloat")]
    pub enable_bufferbloat: bool,
    /// Run real download/upload load while sampling bufferbloat latency
    #[serde(default)]
    pub enable_stress_test: bool,
}

fn default_duration_secs() -> f64 {
    10.0
}

fn default_parallel_connections() -> usize {
    4
}

fn default_enable_bufferbloat() -> bool {
    true
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_duration_secs(),
            parallel_connections: default_parallel_connections(),
            enable_bufferbloat: default_enable_bufferbloat(),
            enable_stress_test: false,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.duration_secs.is_finite()
            || self.duration_secs <= 0.0
            || Duration::try_from_secs_f64(self.duration_secs).is_err()
        {
            return Err(ConfigError::InvalidDuration(self.duration_secs));
        }
        if self.parallel_connections == 0 {
            return Err(ConfigError::InvalidConnections);
        }
        Ok(())
    }

    /// Per-transfer timeout. Values `validate()` rejects saturate rather
    /// than panic.
    pub fn duration(&self) -> Duration {
        match Duration::try_from_secs_f64(self.duration_secs) {
            Ok(d) => d,
            Err(_) if self.duration_secs > 0.0 => Duration::MAX,
            Err(_) => Duration::ZERO,
        }
    }
}

/// Endpoint addresses. Probes depend only on "request with timeout", so any
/// server speaking plain HTTP works here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Endpoints {
    /// Server pool; the selector probes the first two
    #[serde(default = "default_candidates")]
    pub candidates: Vec<ServerCandidate>,
    /// HEAD target for latency probes
    #[serde(default = "default_ping_url")]
    pub ping_url: String,
    /// `?bytes=N` is appended per connection
    #[serde(default = "default_download_url")]
    pub download_url: String,
    #[serde(default = "default_upload_url")]
    pub upload_url: String,
    /// JSON geolocation-by-IP service
    #[serde(default = "default_geolocation_url")]
    pub geolocation_url: String,
}

fn default_candidates() -> Vec<ServerCandidate> {
    vec![
        ServerCandidate::new("1", "Cloudflare", "Global CDN", "https://speed.cloudflare.com"),
        ServerCandidate::new("2", "Google", "Global", "https://www.google.com"),
        ServerCandidate::new("3", "GitHub", "Global CDN", "https://github.com"),
        ServerCandidate::new("4", "Fast.com", "Netflix CDN", "https://fast.com"),
    ]
}

fn default_ping_url() -> String {
    "https://www.google.com/favicon.ico".to_string()
}

fn default_download_url() -> String {
    "https://speed.cloudflare.com/__down".to_string()
}

fn default_upload_url() -> String {
    "https://speed.cloudflare.com/__up".to_string()
}

fn default_geolocation_url() -> String {
    "https://ipapi.co/json/".to_string()
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            candidates: default_candidates(),
            ping_url: default_ping_url(),
            download_url: default_download_url(),
            upload_url: default_upload_url(),
            geolocation_url: default_geolocation_url(),
        }
    }
}

impl Endpoints {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.candidates.len() < 2 {
            return Err(ConfigError::TooFewCandidates(self.candidates.len()));
        }
        Ok(())
    }

    pub fn download_url_for(&self, bytes: u64) -> String {
        format!("{}?bytes={}", self.download_url, bytes)
    }
}
