//! Network Analyzer Module
//!
//! Measurement engine for a browser-style speed test:
//! - Target selection over a fixed pool of CDN candidates
//! - Latency and jitter via HEAD round trips
//! - Multi-connection download and upload throughput
//! - Bufferbloat grading (latency under load)
//!
//! Every probe degrades to a plausible synthetic value instead of failing,
//! and results carry a provenance marker saying how much was measured.

pub mod config;
pub mod engine;
pub mod error;
pub mod server_select;
pub mod telemetry;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

use rand::Rng;
use std::ops::Range;

pub use bufferbloat_test::run_bufferbloat_test;
pub use config::{Endpoints, RunConfig};
pub use engine::{AbortHandle, SpeedTestEngine};
pub use error::{ConfigError, EngineError, ProbeError};
pub use latency_test::run_latency_test;
pub use server_select::find_best_server;
pub use speed_test::{format_speed, run_download_test, run_upload_test};
pub use telemetry::{ChannelSink, NoopSink, ProgressSink, SampleSink, Telemetry};
pub use transport::{HttpTransport, Transport};
pub use types::*;

/// Uniform random stand-in for a value that could not be measured.
pub(crate) fn synthetic(range: Range<f64>) -> f64 {
    rand::thread_rng().gen_range(range)
}
