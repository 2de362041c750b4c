//! Progress and time-series telemetry
//!
//! A run owns exactly one [`Telemetry`]. Phases run one after another, so the
//! sample sequence has a single writer at any time; inside a throughput phase
//! only the connection holding [`ConnectionRole::Reporter`] can reach it.

use super::types::{EngineEvent, ProgressEvent, SamplePoint, TestPhase};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use tokio::time::Instant;

/// Receives progress updates. Must not block for long.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

/// Receives the full sample sequence every time it grows.
pub trait SampleSink: Send + Sync {
    fn on_samples(&self, samples: &[SamplePoint]);
}

/// Discards everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

impl SampleSink for NoopSink {
    fn on_samples(&self, _samples: &[SamplePoint]) {}
}

/// Forwards telemetry over a channel; send errors (receiver gone) are ignored.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: Sender<EngineEvent>,
}

impl ChannelSink {
    pub fn new(tx: Sender<EngineEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelSink {
    fn on_progress(&self, event: &ProgressEvent) {
        let _ = self.tx.send(EngineEvent::Progress(event.clone()));
    }
}

impl SampleSink for ChannelSink {
    fn on_samples(&self, samples: &[SamplePoint]) {
        let _ = self.tx.send(EngineEvent::Samples(samples.to_vec()));
    }
}

/// Run-scoped telemetry state: latest progress plus the growing time series.
pub struct Telemetry {
    progress_sink: Arc<dyn ProgressSink>,
    sample_sink: Arc<dyn SampleSink>,
    started: Instant,
    samples: Vec<SamplePoint>,
    latest: Option<ProgressEvent>,
}

impl Telemetry {
    pub fn new(progress_sink: Arc<dyn ProgressSink>, sample_sink: Arc<dyn SampleSink>) -> Self {
        Self {
            progress_sink,
            sample_sink,
            started: Instant::now(),
            samples: Vec::new(),
            latest: None,
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    /// Emit a progress update. Percent is clamped to 0..=100 and never goes
    /// backwards within a phase.
    pub fn progress(&mut self, phase: TestPhase, percent: f64, speed_mbps: f64) {
        let mut percent = if percent.is_finite() {
            percent.clamp(0.0, 100.0)
        } else {
            0.0
        };
        if let Some(last) = &self.latest {
            if last.phase == phase && percent < last.progress_percent {
                percent = last.progress_percent;
            }
        }

        let event = ProgressEvent {
            phase,
            progress_percent: percent,
            speed_mbps: non_negative(speed_mbps),
            elapsed_ms: self.elapsed_ms(),
        };
        self.progress_sink.on_progress(&event);
        self.latest = Some(event);
    }

    /// Append a point to the time series and hand the sink a snapshot.
    pub fn sample(&mut self, phase: TestPhase, speed_mbps: f64, ping_ms: Option<f64>) {
        let mut offset = self.elapsed_ms();
        if let Some(last) = self.samples.last() {
            offset = offset.max(last.time_offset_ms);
        }

        self.samples.push(SamplePoint {
            time_offset_ms: offset,
            speed_mbps: non_negative(speed_mbps),
            phase,
            ping_ms,
        });
        self.sample_sink.on_samples(&self.samples);
    }

    pub fn samples(&self) -> &[SamplePoint] {
        &self.samples
    }

    pub fn latest(&self) -> Option<&ProgressEvent> {
        self.latest.as_ref()
    }
}

fn non_negative(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 {
        v
    } else {
        0.0
    }
}

/// Role of one connection in a throughput phase. The first role handed out
/// is always the reporter and is the only path to the run's telemetry.
pub enum ConnectionRole<'a> {
    Reporter(&'a mut Telemetry),
    Silent,
}

impl<'a> ConnectionRole<'a> {
    /// One role per connection, reporter first.
    pub fn assign(telemetry: &'a mut Telemetry, connections: usize) -> Vec<ConnectionRole<'a>> {
        let mut roles = Vec::with_capacity(connections.max(1));
        roles.push(ConnectionRole::Reporter(telemetry));
        roles.extend((1..connections).map(|_| ConnectionRole::Silent));
        roles
    }

    pub fn is_reporter(&self) -> bool {
        matches!(self, ConnectionRole::Reporter(_))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records everything it is sent
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub events: Mutex<Vec<ProgressEvent>>,
        pub snapshots: Mutex<Vec<Vec<SamplePoint>>>,
    }

    impl ProgressSink for RecordingSink {
        fn on_progress(&self, event: &ProgressEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    impl SampleSink for RecordingSink {
        fn on_samples(&self, samples: &[SamplePoint]) {
            self.snapshots.lock().unwrap().push(samples.to_vec());
        }
    }

    pub(crate) fn recording_telemetry() -> (Telemetry, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let telemetry = Telemetry::new(sink.clone(), sink.clone());
        (telemetry, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_monotonic_within_phase() {
        let (mut telemetry, sink) = recording_telemetry();
        telemetry.progress(TestPhase::Download, 40.0, 10.0);
        telemetry.progress(TestPhase::Download, 20.0, 12.0);
        telemetry.progress(TestPhase::Upload, 0.0, 0.0);

        let events = sink.events.lock().unwrap();
        assert_eq!(events[0].progress_percent, 40.0);
        assert_eq!(events[1].progress_percent, 40.0);
        assert_eq!(events[1].speed_mbps, 12.0);
        // New phase starts fresh
        assert_eq!(events[2].progress_percent, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_clamped() {
        let (mut telemetry, sink) = recording_telemetry();
        telemetry.progress(TestPhase::Ping, 140.0, -3.0);
        telemetry.progress(TestPhase::Bufferbloat, f64::NAN, f64::INFINITY);

        let events = sink.events.lock().unwrap();
        assert_eq!(events[0].progress_percent, 100.0);
        assert_eq!(events[0].speed_mbps, 0.0);
        assert_eq!(events[1].progress_percent, 0.0);
        assert_eq!(events[1].speed_mbps, 0.0);
        assert_eq!(telemetry.latest().unwrap().phase, TestPhase::Bufferbloat);
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_grow_and_are_ordered() {
        let (mut telemetry, sink) = recording_telemetry();
        telemetry.sample(TestPhase::Download, 50.0, None);
        tokio::time::sleep(Duration::from_millis(150)).await;
        telemetry.sample(TestPhase::Upload, 20.0, None);
        telemetry.sample(TestPhase::Bufferbloat, 0.0, Some(31.5));

        let snapshots = sink.snapshots.lock().unwrap();
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[0].len(), 1);
        assert_eq!(snapshots[2].len(), 3);
        assert!((snapshots[2][1].time_offset_ms - 150.0).abs() < 1e-6);
        assert_eq!(snapshots[2][2].ping_ms, Some(31.5));

        let offsets: Vec<f64> = telemetry.samples().iter().map(|s| s.time_offset_ms).collect();
        assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_sink_forwards_events() {
        let (tx, rx) = mpsc::channel();
        let sink = Arc::new(ChannelSink::new(tx));
        let mut telemetry = Telemetry::new(sink.clone(), sink);
        telemetry.progress(TestPhase::Ping, 10.0, 0.0);
        telemetry.sample(TestPhase::Ping, 0.0, Some(21.0));

        assert!(matches!(rx.recv().unwrap(), EngineEvent::Progress(e) if e.phase == TestPhase::Ping));
        assert!(matches!(rx.recv().unwrap(), EngineEvent::Samples(s) if s.len() == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_sink_ignores_dropped_receiver() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let sink = Arc::new(ChannelSink::new(tx));
        let mut telemetry = Telemetry::new(sink.clone(), sink);
        telemetry.progress(TestPhase::Complete, 100.0, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_assign_roles_reporter_first() {
        let (mut telemetry, _sink) = recording_telemetry();
        let roles = ConnectionRole::assign(&mut telemetry, 4);
        assert_eq!(roles.len(), 4);
        assert!(roles[0].is_reporter());
        assert!(roles[1..].iter().all(|r| !r.is_reporter()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_assign_single_connection() {
        let (mut telemetry, _sink) = recording_telemetry();
        let roles = ConnectionRole::assign(&mut telemetry, 1);
        assert_eq!(roles.len(), 1);
        assert!(roles[0].is_reporter());
    }
}
