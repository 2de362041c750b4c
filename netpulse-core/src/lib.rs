//! NetPulse Core Library
//!
//! Network speed test engine: target selection, latency and jitter,
//! download/upload throughput and bufferbloat. Used by the `netpulse` CLI.

pub mod geolocation;
pub mod network_analyzer;
pub mod settings;

// Re-export commonly used items
pub use network_analyzer::{
    AbortHandle, ChannelSink, EngineError, EngineEvent, NoopSink, ProgressEvent, ProgressSink,
    Provenance, SampleSink, SamplePoint, SpeedTestEngine, SpeedTestResult, TestPhase,
};
pub use settings::{load_settings, save_settings, EngineSettings, SettingsError};
