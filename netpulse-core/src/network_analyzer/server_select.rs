//! Target selection
//!
//! Probes the head of the candidate pool concurrently and keeps the fastest.
//! A failed probe is penalized rather than dropped, so a target is always
//! chosen from the real candidates.

use super::error::{EngineError, ProbeError};
use super::latency_test::probe_latency;
use super::transport::Transport;
use super::types::{ServerCandidate, Target};
use futures_util::future::join_all;
use log::{debug, info};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How many candidates from the front of the pool are probed
pub const PROBED_CANDIDATES: usize = 2;

/// Timeout for each selection probe
pub const SELECTION_TIMEOUT: Duration = Duration::from_secs(2);

/// Latency assigned to a candidate whose probe failed
pub const PENALTY_LATENCY_MS: f64 = 999.0;

/// Probe the first [`PROBED_CANDIDATES`] candidates once each and return the
/// lowest-latency one. Ties keep pool order.
pub async fn find_best_server(
    transport: &dyn Transport,
    candidates: &[ServerCandidate],
    cancel: &CancellationToken,
) -> Result<Target, EngineError> {
    let probes = candidates.iter().take(PROBED_CANDIDATES).map(|candidate| async move {
        let latency = probe_latency(transport, &candidate.host, SELECTION_TIMEOUT, cancel).await;
        (candidate, latency)
    });

    let mut targets = Vec::with_capacity(PROBED_CANDIDATES);
    for (candidate, latency) in join_all(probes).await {
        let target = match latency {
            Ok(ms) => Target {
                candidate: candidate.clone(),
                latency_ms: ms,
                penalized: false,
            },
            Err(ProbeError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => {
                debug!("Selection probe to {} failed: {}", candidate.name, e);
                Target {
                    candidate: candidate.clone(),
                    latency_ms: PENALTY_LATENCY_MS,
                    penalized: true,
                }
            }
        };
        targets.push(target);
    }

    let best = pick_lowest(targets).ok_or(EngineError::NoCandidates)?;
    info!(
        "Selected server {} ({}) at {:.1}ms",
        best.candidate.name, best.candidate.location, best.latency_ms
    );
    Ok(best)
}

/// Lowest latency wins; the current best is only replaced by a strictly
/// lower value.
pub fn pick_lowest(targets: Vec<Target>) -> Option<Target> {
    targets.into_iter().reduce(|best, current| {
        if current.latency_ms < best.latency_ms {
            current
        } else {
            best
        }
    })
}
