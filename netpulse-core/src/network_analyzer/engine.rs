//! Speed test orchestration
//!
//! Drives one run through `ping → download → upload → [bufferbloat] →
//! complete`. A run always ends in a [`SpeedTestResult`]: if anything escapes
//! the success path (abort included) the whole result is synthesized and
//! marked [`Provenance::Synthetic`].

use super::bufferbloat_test::run_bufferbloat_test;
use super::config::{Endpoints, RunConfig};
use super::error::{ConfigError, EngineError};
use super::latency_test::{run_latency_test, PING_SAMPLES};
use super::server_select::find_best_server;
use super::speed_test::{run_download_test, run_upload_test};
use super::synthetic;
use super::telemetry::{NoopSink, ProgressSink, SampleSink, Telemetry};
use super::transport::{HttpTransport, Transport};
use super::types::{
    round_tenth, BufferbloatGrade, BufferbloatResult, OriginLocation, Outcome, Provenance,
    SpeedTestResult, TestPhase,
};
use crate::geolocation::resolve_origin;
use crate::settings::EngineSettings;
use chrono::Utc;
use log::{error, info, warn};
use parking_lot::Mutex;
use std::ops::Range;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// Fallback path ranges
const FALLBACK_DOWNLOAD_MBPS: Range<f64> = 25.0..105.0;
const FALLBACK_UPLOAD_MBPS: Range<f64> = 10.0..40.0;
const FALLBACK_PING_MS: Range<f64> = 15.0..55.0;
const FALLBACK_JITTER_MS: Range<f64> = 2.0..10.0;
const FALLBACK_TARGET_LOCATION: &str = "Global CDN";
const FALLBACK_BUFFERBLOAT_MS: f64 = 35.0;

/// Ping phase progress around target selection
const SELECTION_STARTED: f64 = 10.0;
const SELECTION_DONE: f64 = 30.0;

/// Cancels whichever run is current on the engine it came from.
///
/// Safe to call at any time: before a run it does nothing to the next run,
/// after completion it is a no-op.
#[derive(Clone)]
pub struct AbortHandle {
    current: Arc<Mutex<CancellationToken>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.current.lock().cancel();
    }
}

pub struct SpeedTestEngine {
    config: RunConfig,
    endpoints: Endpoints,
    transport: Arc<dyn Transport>,
    progress_sink: Arc<dyn ProgressSink>,
    sample_sink: Arc<dyn SampleSink>,
    current: Arc<Mutex<CancellationToken>>,
}

impl SpeedTestEngine {
    /// Build an engine backed by the reqwest transport.
    pub fn new(settings: EngineSettings) -> Result<Self, EngineError> {
        let transport = HttpTransport::new()?;
        Ok(Self::with_transport(settings, Arc::new(transport))?)
    }

    /// Build an engine on a caller-provided transport. Settings are
    /// validated here, never during a run.
    pub fn with_transport(
        settings: EngineSettings,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            config: settings.run,
            endpoints: settings.endpoints,
            transport,
            progress_sink: Arc::new(NoopSink),
            sample_sink: Arc::new(NoopSink),
            current: Arc::new(Mutex::new(CancellationToken::new())),
        })
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress_sink = sink;
        self
    }

    pub fn with_sample_sink(mut self, sink: Arc<dyn SampleSink>) -> Self {
        self.sample_sink = sink;
        self
    }

    /// Use one sink for both progress and samples
    pub fn with_sink<S>(self, sink: Arc<S>) -> Self
    where
        S: ProgressSink + SampleSink + 'static,
    {
        self.with_progress_sink(sink.clone()).with_sample_sink(sink)
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Cancel the in-flight run, if any
    pub fn abort(&self) {
        info!("Abort requested");
        self.current.lock().cancel();
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            current: self.current.clone(),
        }
    }

    /// Run one speed test. Never fails; check `provenance` to tell measured
    /// results from synthesized ones.
    pub async fn run(&self) -> SpeedTestResult {
        let cancel = self.begin_run();
        let started = Instant::now();
        let mut telemetry = Telemetry::new(self.progress_sink.clone(), self.sample_sink.clone());

        info!(
            "Starting speed test ({}s, {} connections, bufferbloat: {})",
            self.config.duration_secs,
            self.config.parallel_connections,
            self.config.enable_bufferbloat
        );

        let result = match self.measure(&mut telemetry, started, &cancel).await {
            Ok(result) => result,
            Err(EngineError::Cancelled) => {
                warn!("Speed test aborted, synthesizing result");
                self.fallback(started, &cancel).await
            }
            Err(e) => {
                error!("Speed test failed, synthesizing result: {}", e);
                self.fallback(started, &cancel).await
            }
        };

        telemetry.progress(TestPhase::Complete, 100.0, 0.0);
        info!(
            "Speed test complete: down={:.1} up={:.1} ping={:.1}ms jitter={:.1}ms ({:?})",
            result.download_mbps, result.upload_mbps, result.ping_ms, result.jitter_ms, result.provenance
        );
        result
    }

    /// Swap in a fresh token for the new run; the previous run's token is
    /// left as it was.
    fn begin_run(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.current.lock() = token.clone();
        token
    }

    async fn measure(
        &self,
        telemetry: &mut Telemetry,
        started: Instant,
        cancel: &CancellationToken,
    ) -> Result<SpeedTestResult, EngineError> {
        let transport = self.transport.as_ref();

        telemetry.progress(TestPhase::Ping, SELECTION_STARTED, 0.0);
        let target = find_best_server(transport, &self.endpoints.candidates, cancel).await?;
        telemetry.progress(TestPhase::Ping, SELECTION_DONE, 0.0);

        let latency = run_latency_test(
            transport,
            &self.endpoints.ping_url,
            PING_SAMPLES,
            telemetry,
            cancel,
        )
        .await?;

        telemetry.progress(TestPhase::Download, 0.0, 0.0);
        let download =
            run_download_test(transport, &self.endpoints, &self.config, telemetry, cancel).await?;

        telemetry.progress(TestPhase::Upload, 0.0, 0.0);
        let upload =
            run_upload_test(transport, &self.endpoints, &self.config, telemetry, cancel).await?;

        let bufferbloat = if self.config.enable_bufferbloat {
            let outcome = run_bufferbloat_test(
                self.transport.clone(),
                &self.endpoints,
                &self.config,
                latency.ping_ms,
                telemetry,
                cancel,
            )
            .await?;
            Some(outcome)
        } else {
            None
        };

        let origin = resolve_origin(transport, &self.endpoints.geolocation_url, cancel).await;
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let degraded = latency.is_synthetic()
            || download.mbps.is_synthetic()
            || upload.mbps.is_synthetic()
            || bufferbloat.as_ref().is_some_and(Outcome::is_synthetic);

        Ok(SpeedTestResult {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            download_mbps: round_tenth(*download.mbps.value()),
            upload_mbps: round_tenth(*upload.mbps.value()),
            ping_ms: round_tenth(latency.ping_ms),
            jitter_ms: round_tenth(*latency.jitter_ms.value()),
            target_location: target.candidate.location,
            origin: origin.into_value(),
            duration_secs: round_tenth(started.elapsed().as_secs_f64()),
            bufferbloat: bufferbloat.map(|b| rounded(b.into_value())),
            provenance: Provenance::from_degraded(degraded),
        })
    }

    /// Synthesize every metric. The location lookup is still attempted; on
    /// an aborted run it resolves straight to the placeholder.
    async fn fallback(&self, started: Instant, cancel: &CancellationToken) -> SpeedTestResult {
        let origin: OriginLocation = resolve_origin(
            self.transport.as_ref(),
            &self.endpoints.geolocation_url,
            cancel,
        )
        .await
        .into_value();

        let bufferbloat = self.config.enable_bufferbloat.then_some(BufferbloatResult {
            grade: BufferbloatGrade::B,
            latency_increase_ms: FALLBACK_BUFFERBLOAT_MS,
        });

        SpeedTestResult {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            download_mbps: round_tenth(synthetic(FALLBACK_DOWNLOAD_MBPS)),
            upload_mbps: round_tenth(synthetic(FALLBACK_UPLOAD_MBPS)),
            ping_ms: round_tenth(synthetic(FALLBACK_PING_MS)),
            jitter_ms: round_tenth(synthetic(FALLBACK_JITTER_MS)),
            target_location: FALLBACK_TARGET_LOCATION.to_string(),
            origin,
            duration_secs: round_tenth(started.elapsed().as_secs_f64()),
            bufferbloat,
            provenance: Provenance::Synthetic,
        }
    }
}

fn rounded(result: BufferbloatResult) -> BufferbloatResult {
    BufferbloatResult {
        latency_increase_ms: round_tenth(result.latency_increase_ms),
        ..result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network_analyzer::telemetry::tests::RecordingSink;
    use crate::network_analyzer::testing::FakeTransport;
    use std::time::Duration;

    fn engine(transport: FakeTransport, run: RunConfig) -> (SpeedTestEngine, Arc<RecordingSink>) {
        let settings = EngineSettings {
            run,
            endpoints: Endpoints::default(),
        };
        let sink = Arc::new(RecordingSink::default());
        let engine = SpeedTestEngine::with_transport(settings, Arc::new(transport))
            .unwrap()
            .with_sink(sink.clone());
        (engine, sink)
    }

    fn is_tenth(v: f64) -> bool {
        ((v * 10.0).round() - v * 10.0).abs() < 1e-9
    }

    #[test]
    fn test_rejects_invalid_config() {
        let settings = EngineSettings {
            run: RunConfig {
                duration_secs: 0.0,
                ..RunConfig::default()
            },
            endpoints: Endpoints::default(),
        };
        let res = SpeedTestEngine::with_transport(settings, Arc::new(FakeTransport::default()));
        assert!(matches!(res, Err(ConfigError::InvalidDuration(_))));
    }

    #[test]
    fn test_rejects_unrepresentable_duration() {
        let settings = EngineSettings {
            run: RunConfig {
                duration_secs: 1e20,
                ..RunConfig::default()
            },
            endpoints: Endpoints::default(),
        };
        let res = SpeedTestEngine::with_transport(settings, Arc::new(FakeTransport::default()));
        assert!(matches!(res, Err(ConfigError::InvalidDuration(d)) if d == 1e20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_measured_run() {
        let (engine, sink) = engine(FakeTransport::default(), RunConfig::default());
        assert_eq!(engine.config(), &RunConfig::default());
        assert_eq!(engine.endpoints().candidates.len(), 4);
        let result = engine.run().await;

        assert_eq!(result.provenance, Provenance::Measured);
        assert!(!result.is_synthetic());
        assert!((result.download_mbps - 10.0).abs() < 0.11);
        assert!((result.upload_mbps - 21.0).abs() < 0.11);
        assert!((result.ping_ms - 20.0).abs() < 0.11);
        assert_eq!(result.jitter_ms, 0.0);
        assert_eq!(result.target_location, "Global CDN");
        assert_eq!(result.origin.city, "Lisbon");
        assert!(result.bufferbloat.is_some());
        for v in [
            result.download_mbps,
            result.upload_mbps,
            result.ping_ms,
            result.jitter_ms,
            result.duration_secs,
        ] {
            assert!(v.is_finite() && v >= 0.0 && is_tenth(v));
        }

        let events = sink.events.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.phase, TestPhase::Complete);
        assert_eq!(last.progress_percent, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bufferbloat_disabled() {
        let run = RunConfig {
            enable_bufferbloat: false,
            ..RunConfig::default()
        };
        let (engine, sink) = engine(FakeTransport::default(), run);
        let result = engine.run().await;

        assert!(result.bufferbloat.is_none());
        let events = sink.events.lock().unwrap();
        assert!(events.iter().all(|e| e.phase != TestPhase::Bufferbloat));
    }

    #[tokio::test(start_paused = true)]
    async fn test_outage_uses_local_fallbacks() {
        let (engine, _sink) = engine(FakeTransport::outage(), RunConfig::default());
        let result = engine.run().await;

        // Every probe degrades locally, so the success path still completes
        assert_eq!(result.provenance, Provenance::Partial);
        assert!((15.0..=65.0).contains(&result.download_mbps));
        assert!((8.0..=33.0).contains(&result.upload_mbps));
        assert!((15.0..=45.0).contains(&result.ping_ms));
        assert_eq!(result.origin, OriginLocation::placeholder());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_mid_run_falls_back() {
        let (engine, sink) = engine(FakeTransport::default(), RunConfig::default());
        let handle = engine.abort_handle();

        let (result, _) = tokio::join!(engine.run(), async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            handle.abort();
        });

        assert!(result.is_synthetic());
        assert_eq!(result.target_location, "Global CDN");
        assert!((25.0..=105.0).contains(&result.download_mbps));
        assert!((10.0..=40.0).contains(&result.upload_mbps));
        assert!((15.0..=55.0).contains(&result.ping_ms));
        assert!((2.0..=10.0).contains(&result.jitter_ms));
        assert_eq!(
            result.bufferbloat,
            Some(BufferbloatResult {
                grade: BufferbloatGrade::B,
                latency_increase_ms: 35.0
            })
        );

        let events = sink.events.lock().unwrap();
        let complete: Vec<_> = events.iter().filter(|e| e.phase == TestPhase::Complete).collect();
        assert_eq!(complete.len(), 1);
        assert_eq!(complete[0].progress_percent, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_after_completion_is_noop() {
        let run = RunConfig {
            enable_bufferbloat: false,
            ..RunConfig::default()
        };
        let (engine, _sink) = engine(FakeTransport::default(), run);

        let first = engine.run().await;
        engine.abort();
        engine.abort();
        let second = engine.run().await;

        assert_eq!(first.provenance, Provenance::Measured);
        assert_eq!(second.provenance, Provenance::Measured);
        assert_ne!(first.id, second.id);
    }
}
