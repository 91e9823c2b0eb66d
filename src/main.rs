//! Synth Surface
//!
//! Runs the control surface: MIDI in, panel controls, outboard frames and the
//! LED matrix, with a console when attached to a terminal.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use synth_surface::config::AppConfig;
use synth_surface::console::Console;
use synth_surface::context::HardwareContext;
use synth_surface::midi::ports;
use synth_surface::voices;

/// Synth Surface - keep MIDI, panel controls, the sound unit and the LEDs in sync
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,

    /// Software-only mode: debug transport, simulated LED matrix and panel
    #[arg(long)]
    simulator: bool,

    /// Print every parameter and the effective configuration, then exit
    #[arg(long)]
    dump: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level)?;

    info!("Starting Synth Surface v{}...", env!("CARGO_PKG_VERSION"));

    if args.list_ports {
        ports::print_ports();
        return Ok(());
    }

    let config = load_config(&args.config).await?;

    if args.dump {
        let rack = voices::standard_rack().context("Failed to declare voice sections")?;
        for line in rack.dump() {
            println!("{}", line);
        }
        println!("\n{}", config.to_yaml()?);
        return Ok(());
    }

    let context = Arc::new(
        HardwareContext::build(&config, args.simulator).context("Failed to build hardware context")?,
    );
    for degraded in context.degraded() {
        warn!("⚠️  Running without {}: {}", degraded.subsystem, degraded.reason);
    }

    run_app(context, &config).await?;

    info!("Synth Surface shutdown complete");
    Ok(())
}

async fn run_app(context: Arc<HardwareContext>, config: &AppConfig) -> Result<()> {
    let (events_tx, events_rx) = crossbeam::channel::unbounded();
    let scan = context
        .controls()
        .clone()
        .spawn_scan_loop(events_rx)
        .context("Failed to start control scan loop")?;

    let mut midi_in = if config.midi.input_port.is_empty() {
        info!("No MIDI input configured");
        None
    } else {
        Some(context.router().connect(&config.midi.input_port))
    };

    let panel = match context.take_scanner() {
        Some(scanner) => Some(
            scanner
                .spawn(
                    events_tx.clone(),
                    Duration::from_millis(config.scanner.poll_interval_ms),
                )
                .context("Failed to start control scanner")?,
        ),
        None => None,
    };

    // The console and the panel scanner each own a sender
    let console_done = if std::io::stdin().is_terminal() {
        let (done_tx, done_rx) = oneshot::channel();
        let console = Console::new(context.clone(), events_tx.clone());
        std::thread::Builder::new()
            .name("console".to_string())
            .spawn(move || {
                let _ = done_tx.send(console.run());
            })
            .context("Failed to start console")?;
        Some(done_rx)
    } else {
        None
    };
    drop(events_tx);

    info!("✅ Surface running");

    let console_finished = match console_done {
        Some(done_rx) => tokio::select! {
            _ = shutdown_signal() => false,
            result = done_rx => {
                match result {
                    Ok(Ok(())) => info!("Console closed"),
                    Ok(Err(e)) => warn!("⚠️  Console failed: {}", e),
                    Err(_) => warn!("⚠️  Console thread ended unexpectedly"),
                }
                true
            }
        },
        None => {
            shutdown_signal().await;
            true
        }
    };

    // Orderly shutdown: stop inputs first, then the outputs they feed
    if let Some(source) = midi_in.as_mut() {
        source.close();
    }
    if let Some(panel) = panel {
        if tokio::task::spawn_blocking(move || panel.stop()).await.is_err() {
            warn!("⚠️  Control scanner did not stop cleanly");
        }
    }
    if console_finished {
        // every sender is gone, the scan loop drains and exits
        if !matches!(tokio::task::spawn_blocking(move || scan.join()).await, Ok(Ok(()))) {
            warn!("⚠️  Control scan loop did not stop cleanly");
        }
    }
    context.shutdown();

    Ok(())
}

async fn load_config(path: &str) -> Result<AppConfig> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        let config = AppConfig::load(path).await?;
        info!("Configuration loaded from {}", path);
        Ok(config)
    } else {
        warn!("⚠️  Config file {} not found, using defaults", path);
        Ok(AppConfig::default())
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("⚠️  Failed to install CTRL+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
