//! Network Analyzer Types
//!
//! Phases, telemetry payloads, measurement outcomes and the final result

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
//  PHASES & TELEMETRY
// ═══════════════════════════════════════════════════════════════════════════════

/// Phase of a speed test run, entered in declaration order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestPhase {
    Idle,
    Ping,
    Download,
    Upload,
    Bufferbloat,
    Complete,
}

impl TestPhase {
    pub fn label(&self) -> &'static str {
        match self {
            TestPhase::Idle => "Ready",
            TestPhase::Ping => "Testing Latency",
            TestPhase::Download => "Testing Download",
            TestPhase::Upload => "Testing Upload",
            TestPhase::Bufferbloat => "Testing Bufferbloat",
            TestPhase::Complete => "Complete",
        }
    }
}

/// Progress update pushed to observers during a run
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub phase: TestPhase,
    /// 0.0 - 100.0, non-decreasing within a phase
    pub progress_percent: f64,
    /// Instantaneous speed in Mbps (0 outside throughput phases)
    pub speed_mbps: f64,
    /// Milliseconds since the run started
    pub elapsed_ms: f64,
}

/// One point of the run's time series
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SamplePoint {
    /// Milliseconds since the run started
    pub time_offset_ms: f64,
    pub speed_mbps: f64,
    pub phase: TestPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_ms: Option<f64>,
}

/// Message carried by [`super::telemetry::ChannelSink`]
#[derive(Clone, Debug)]
pub enum EngineEvent {
    Progress(ProgressEvent),
    /// Full accumulated series, not a delta
    Samples(Vec<SamplePoint>),
}

// ═══════════════════════════════════════════════════════════════════════════════
//  MEASUREMENT OUTCOMES
// ═══════════════════════════════════════════════════════════════════════════════

/// Total result of a fallible measurement.
///
/// `Synthetic` carries a bounded stand-in value used because the real probe
/// failed or timed out.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Outcome<T> {
    Measured(T),
    Synthetic(T),
}

impl<T> Outcome<T> {
    pub fn value(&self) -> &T {
        match self {
            Outcome::Measured(v) | Outcome::Synthetic(v) => v,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Outcome::Measured(v) | Outcome::Synthetic(v) => v,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, Outcome::Synthetic(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Measured(v) => Outcome::Measured(f(v)),
            Outcome::Synthetic(v) => Outcome::Synthetic(f(v)),
        }
    }
}

/// Where the numbers in a [`SpeedTestResult`] came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Every metric was measured
    Measured,
    /// At least one metric used a synthetic stand-in
    Partial,
    /// The run failed and the whole result was synthesized
    Synthetic,
}

impl Provenance {
    pub fn from_degraded(any_synthetic: bool) -> Self {
        if any_synthetic {
            Provenance::Partial
        } else {
            Provenance::Measured
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
//  TARGETS & LOCATION
// ═══════════════════════════════════════════════════════════════════════════════

/// A known endpoint the selector may probe
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerCandidate {
    pub id: String,
    pub name: String,
    /// Display label, e.g. "Global CDN"
    pub location: String,
    /// URL probed with a HEAD request
    pub host: String,
}

impl ServerCandidate {
    pub fn new(id: &str, name: &str, location: &str, host: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            location: location.to_string(),
            host: host.to_string(),
        }
    }
}

/// A probed candidate
#[derive(Clone, Debug, PartialEq)]
pub struct Target {
    pub candidate: ServerCandidate,
    pub latency_ms: f64,
    /// Probe failed and `latency_ms` is the penalty sentinel
    pub penalized: bool,
}

/// Approximate client origin
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginLocation {
    pub city: String,
    pub country: String,
    pub ip: String,
}

impl OriginLocation {
    /// Used when the lookup fails outright
    pub fn placeholder() -> Self {
        Self {
            city: "Your City".to_string(),
            country: "Your Country".to_string(),
            ip: "127.0.0.1".to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
//  BUFFERBLOAT
// ═══════════════════════════════════════════════════════════════════════════════

/// Bufferbloat grade by latency increase under load
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferbloatGrade {
    A, // < 20ms
    B, // < 50ms
    C, // < 100ms
    D, // < 200ms
    F, // everything else
}

impl BufferbloatGrade {
    pub fn from_increase_ms(increase_ms: f64) -> Self {
        if increase_ms < 20.0 {
            BufferbloatGrade::A
        } else if increase_ms < 50.0 {
            BufferbloatGrade::B
        } else if increase_ms < 100.0 {
            BufferbloatGrade::C
        } else if increase_ms < 200.0 {
            BufferbloatGrade::D
        } else {
            BufferbloatGrade::F
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BufferbloatGrade::A => "A",
            BufferbloatGrade::B => "B",
            BufferbloatGrade::C => "C",
            BufferbloatGrade::D => "D",
            BufferbloatGrade::F => "F",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BufferbloatResult {
    pub grade: BufferbloatGrade,
    pub latency_increase_ms: f64,
}

impl BufferbloatResult {
    pub fn from_increase_ms(latency_increase_ms: f64) -> Self {
        Self {
            grade: BufferbloatGrade::from_increase_ms(latency_increase_ms),
            latency_increase_ms,
        }
    }

    /// Result reported when the analyzer is disabled
    pub fn unloaded() -> Self {
        Self {
            grade: BufferbloatGrade::A,
            latency_increase_ms: 0.0,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
//  RESULT
// ═══════════════════════════════════════════════════════════════════════════════

/// Final result of a run. Numeric fields are finite, non-negative and
/// rounded to one decimal place.
#[derive(Clone, Debug, Serialize)]
pub struct SpeedTestResult {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub ping_ms: f64,
    pub jitter_ms: f64,
    pub target_location: String,
    pub origin: OriginLocation,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bufferbloat: Option<BufferbloatResult>,
    pub provenance: Provenance,
}

impl SpeedTestResult {
    pub fn is_synthetic(&self) -> bool {
        self.provenance == Provenance::Synthetic
    }
}

/// Round to one decimal place, mapping non-finite or negative input to 0.
pub fn round_tenth(value: f64) -> f64 {
    if !value.is_finite() || value <= 0.0 {
        return 0.0;
    }
    (value * 10.0).round() / 10.0
}
