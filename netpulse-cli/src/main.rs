//! NetPulse Speed Test
//!
//! Measures latency, jitter, download/upload throughput and bufferbloat
//! against public CDN endpoints.
//!
//! Usage:
//!   netpulse                      # Full test with saved settings
//!   netpulse --duration 5 -c 8    # Shorter test, more connections
//!   netpulse --stress             # Real load during bufferbloat sampling
//!   netpulse --json               # Machine-readable result on stdout
//!
//! Ctrl-C aborts the run; a (synthesized) result is still printed.

use std::io::Write;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use netpulse_core::network_analyzer::format_speed;
use netpulse_core::{
    load_settings, save_settings, ChannelSink, EngineEvent, Provenance, SpeedTestEngine,
    SpeedTestResult, TestPhase,
};

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "netpulse", version)]
#[command(about = "NetPulse - measure latency, throughput and bufferbloat")]
struct Args {
    /// Upper bound for each transfer, in seconds
    #[arg(short, long)]
    duration: Option<f64>,

    /// Parallel download connections
    #[arg(short, long)]
    connections: Option<usize>,

    /// Skip the bufferbloat phase
    #[arg(long)]
    no_bufferbloat: bool,

    /// Generate real load while measuring bufferbloat
    #[arg(long)]
    stress: bool,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Persist the effective settings before running
    #[arg(long)]
    save_settings: bool,
}

fn init_logging(verbose: bool) {
    let log_level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp_millis()
        .init();
}

// ============================================================================
// OUTPUT
// ============================================================================

/// Live progress line on stderr, one per phase
fn print_progress(rx: mpsc::Receiver<EngineEvent>) {
    let mut phase = TestPhase::Idle;
    let mut stderr = std::io::stderr();

    for event in rx {
        let EngineEvent::Progress(progress) = event else {
            continue;
        };
        if progress.phase != phase {
            if phase != TestPhase::Idle {
                let _ = writeln!(stderr);
            }
            phase = progress.phase;
        }
        if phase == TestPhase::Complete {
            continue;
        }
        let _ = write!(
            stderr,
            "\r  {:<12} {:>5.1}%  {:<12}",
            phase.label(),
            progress.progress_percent,
            format_speed(progress.speed_mbps)
        );
        let _ = stderr.flush();
    }
}

fn print_summary(result: &SpeedTestResult) {
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Results Summary");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");

    println!("  Download:   {}", format_speed(result.download_mbps));
    println!("  Upload:     {}", format_speed(result.upload_mbps));
    println!("  Latency:    {:.1} ms (jitter: {:.1} ms)", result.ping_ms, result.jitter_ms);
    if let Some(bloat) = &result.bufferbloat {
        println!(
            "  Bufferbloat: {} (+{:.1} ms under load)",
            bloat.grade.label(),
            bloat.latency_increase_ms
        );
    }
    println!("  Server:     {}", result.target_location);
    println!(
        "  Origin:     {}, {} ({})",
        result.origin.city, result.origin.country, result.origin.ip
    );
    println!("  Duration:   {:.1}s", result.duration_secs);

    match result.provenance {
        Provenance::Measured => {}
        Provenance::Partial => {
            println!("\n  Note: some probes failed; those values are estimates.")
        }
        Provenance::Synthetic => {
            println!("\n  Note: the test did not complete; all values are estimates.")
        }
    }
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

// ============================================================================
// MAIN
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut settings = load_settings();
    if let Some(duration) = args.duration {
        settings.run.duration_secs = duration;
    }
    if let Some(connections) = args.connections {
        settings.run.parallel_connections = connections;
    }
    if args.no_bufferbloat {
        settings.run.enable_bufferbloat = false;
    }
    if args.stress {
        settings.run.enable_stress_test = true;
    }
    settings.validate().context("Invalid settings")?;

    if args.save_settings {
        let path = save_settings(&settings).context("Failed to save settings")?;
        info!("Settings saved to {}", path.display());
    }

    let (tx, rx) = mpsc::channel();
    let printer = if args.json {
        drop(rx);
        None
    } else {
        Some(thread::spawn(move || print_progress(rx)))
    };

    let engine = SpeedTestEngine::new(settings)
        .context("Failed to create speed test engine")?
        .with_sink(Arc::new(ChannelSink::new(tx)));

    info!(
        "Testing {} candidates, {:.1}s per transfer, {} connections",
        engine.endpoints().candidates.len(),
        engine.config().duration_secs,
        engine.config().parallel_connections
    );

    let abort = engine.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, aborting speed test");
            abort.abort();
        }
    });

    let result = engine.run().await;

    // Dropping the engine closes the channel and ends the printer
    drop(engine);
    if let Some(printer) = printer {
        let _ = printer.join();
    }

    if result.is_synthetic() {
        warn!("Speed test did not complete, result {} is synthesized", result.id);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }

    Ok(())
}
