//! Error types for the measurement engine

use std::time::Duration;
use thiserror::Error;

/// Failure of a single network probe or transfer.
///
/// Every variant except `Cancelled` is recoverable: the caller substitutes a
/// synthetic value and carries on.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Probe cancelled")]
    Cancelled,

    #[error("Probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected HTTP status: {0}")]
    Status(u16),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Transfer completed too fast to measure")]
    TooFast,
}

impl ProbeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProbeError::Cancelled)
    }
}

/// Errors that abandon the success path of a run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Speed test aborted")]
    Cancelled,

    #[error("Failed to create HTTP client: {0}")]
    Client(String),

    #[error("No candidate servers to probe")]
    NoCandidates,

    #[error("Load generator failed: {0}")]
    LoadGenerator(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Rejected `RunConfig` / `Endpoints` values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Test duration must be a positive number of seconds, got {0}")]
    InvalidDuration(f64),

    #[error("At least one parallel connection is required")]
    InvalidConnections,

    #[error("At least 2 candidate servers are required, got {0}")]
    TooFewCandidates(usize),
}
