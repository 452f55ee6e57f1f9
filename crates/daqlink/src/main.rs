// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! daqlink CLI
//!
//! # Usage
//!
//! ```bash
//! # Write a default configuration file
//! daqlink gen-config --output daqlink.toml
//!
//! # Check a configuration file
//! daqlink validate --config daqlink.toml
//!
//! # Run a simulated process against an in-memory broker and server
//! daqlink simulate --config daqlink.toml --duration-secs 30 --rate 500
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, TryRecvError};
use daqlink::codec::{self, ConfigurationStatus, RequestEnvelope, RequestType};
use daqlink::config::EXAMPLE_CONFIG;
use daqlink::{
    BoundedInboundQueue, DaqSession, Destination, LinkConfig, MemoryBroker, Priority, Quality,
    QualityCode, SourceUpdate, Subscription, TimeToLive, Transport, TransportError, UpdateBatch,
    UpdateHandler,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// DAQ telemetry transport
#[derive(Parser, Debug)]
#[command(name = "daqlink")]
#[command(about = "DAQ telemetry transport - batching, handshakes and inbound delivery")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "daqlink.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Run a process against an in-memory broker and server
    Simulate {
        /// Configuration file path (defaults are used without one)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Stop after this many seconds (0 runs until Ctrl+C)
        #[arg(long, default_value = "10")]
        duration_secs: u64,

        /// Values generated per second
        #[arg(long, default_value = "200")]
        rate: u32,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match args.command {
        Commands::GenConfig { output } => cmd_gen_config(output),
        Commands::Validate { config } => cmd_validate(config),
        Commands::Simulate {
            config,
            duration_secs,
            rate,
        } => cmd_simulate(config, duration_secs, rate),
    }
}

fn cmd_gen_config(output: PathBuf) -> Result<()> {
    std::fs::write(&output, EXAMPLE_CONFIG)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<()> {
    match LinkConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!(
                "Process:  {} (alive tag {})",
                config.process.name, config.process.alive_tag_id
            );
            println!("Requests: {}", config.transport.request_destination);
            println!("Updates:  {}", config.transport.update_destination);
            println!(
                "Batches:  {} values, {} bytes max",
                config.outbound.max_batch_size, config.outbound.max_message_bytes
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_simulate(config_path: Option<PathBuf>, duration_secs: u64, rate: u32) -> Result<()> {
    let config = match config_path {
        Some(path) => LinkConfig::from_file(&path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => LinkConfig::default(),
    };

    let broker = Arc::new(MemoryBroker::new());
    broker.connect()?;

    let (stop_tx, stop_rx) = channel::bounded::<()>(0);
    let (interrupt_tx, interrupt_rx) = channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        tracing::info!("Received Ctrl+C, shutting down...");
        let _ = interrupt_tx.try_send(());
    })
    .context("Failed to install Ctrl+C handler")?;

    // Server side: lifecycle responder and update consumer.
    let responder = {
        let broker = broker.clone();
        let destination = Destination::new(&config.transport.request_destination);
        let stop_rx = stop_rx.clone();
        std::thread::Builder::new()
            .name("daqlink-server".into())
            .spawn(move || serve_requests(broker.as_ref(), &destination, &stop_rx))
            .context("Failed to spawn server thread")?
    };

    let counter = Arc::new(UpdateCounter::default());
    let queue = Arc::new(
        BoundedInboundQueue::new("server-updates", counter.clone(), config.inbound.queue_capacity)
            .with_poll_interval(config.poll_interval())
            .with_warning_threshold(config.slow_consumer_warning()),
    );
    queue.start()?;
    let subscription = Subscription::spawn(
        broker.clone(),
        Destination::new(&config.transport.update_destination),
        queue.clone(),
        config.poll_interval(),
    )?;

    // Process side.
    let session = DaqSession::new(config, broker.clone())?;
    session.start().context("Process startup failed")?;

    println!("daqlink simulation v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!("Process: {}", session.config().process.name);
    println!("Rate:    {} values/s", rate);
    println!("Press Ctrl+C to stop...");
    println!();

    let started = Instant::now();
    let deadline = (duration_secs > 0).then(|| started + Duration::from_secs(duration_secs));
    let period = Duration::from_secs(1) / rate.max(1);
    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        match interrupt_rx.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => session.add_value(random_update()),
            _ => break,
        }
    }

    session.shutdown();
    // Let the subscription drain what the final flush published.
    std::thread::sleep(session.config().poll_interval().min(Duration::from_millis(500)));
    subscription.stop();
    queue.stop();
    drop(stop_tx);
    if responder.join().is_err() {
        tracing::error!("server thread panicked");
    }

    let stats = session.dispatcher().stats();
    let (best_effort, guaranteed) = session.dispatcher().buffer_stats();
    println!();
    println!("--- Simulation Statistics ({:.1} s) ---", started.elapsed().as_secs_f64());
    println!(
        "  Dispatcher: {} accepted, {} expired, {} units sent, {} send failures",
        stats.values_accepted, stats.values_expired, stats.units_distributed, stats.send_failures
    );
    println!(
        "  Best-effort buffer: {} pushed, {} flushes",
        best_effort.pushed, best_effort.flushes
    );
    println!(
        "  Guaranteed buffer:  {} pushed, {} flushes",
        guaranteed.pushed, guaranteed.flushes
    );
    println!(
        "  Server: {} batches, {} values received, {} undecodable, {} expired on broker",
        counter.batches.load(Ordering::Relaxed),
        counter.values.load(Ordering::Relaxed),
        queue.dropped_count(),
        broker.expired_count()
    );

    Ok(())
}

fn random_update() -> SourceUpdate {
    let tag_id = fastrand::i64(1..=50);
    let update = SourceUpdate::new(
        tag_id,
        format!("SIM.TAG.{:02}", tag_id),
        fastrand::f64() * 100.0,
    );
    match fastrand::u8(0..100) {
        0..=4 => update.with_priority(Priority::High),
        5..=6 => update.with_quality(Quality::invalid(
            QualityCode::DataUnavailable,
            "simulated sensor dropout",
        )),
        7..=34 => update.with_guaranteed_delivery(true),
        _ => update.with_ttl(TimeToLive::Millis(10_000)),
    }
}

/// Counts what reaches the server.
#[derive(Default)]
struct UpdateCounter {
    batches: AtomicU64,
    values: AtomicU64,
}

impl UpdateHandler for UpdateCounter {
    type Update = UpdateBatch;

    fn decode(&self, raw: &[u8]) -> anyhow::Result<UpdateBatch> {
        Ok(codec::decode_batch(raw)?)
    }

    fn describe(&self, batch: &UpdateBatch) -> String {
        format!("batch of {} values from process {:?}", batch.len(), batch.process_id)
    }

    fn notify(&self, batch: UpdateBatch) -> anyhow::Result<()> {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.values.fetch_add(batch.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

/// Answer lifecycle requests until `stop_rx` disconnects.
fn serve_requests(broker: &MemoryBroker, destination: &Destination, stop_rx: &Receiver<()>) {
    let mut next_process_id = 1;
    while let Err(TryRecvError::Empty) = stop_rx.try_recv() {
        let raw = match broker.receive(destination, Duration::from_millis(100)) {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("server receive failed: {}", e);
                continue;
            }
        };
        let request: RequestEnvelope = match codec::decode(&raw) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("server got malformed request: {}", e);
                continue;
            }
        };

        let reply = match request.request_type {
            RequestType::Connect => {
                let mut reply = request.reply(serde_json::Value::Null);
                reply.process_id = Some(next_process_id);
                reply.identification_token = Some(fastrand::i64(1_000..1_000_000));
                next_process_id += 1;
                reply
            }
            RequestType::Configuration => request.reply(serde_json::json!({
                "status": ConfigurationStatus::Ok,
                "configuration": format!("<ProcessConfiguration name=\"{}\"/>", request.process_name),
            })),
            RequestType::Disconnect => {
                tracing::info!("server: {} disconnected", request.process_name);
                continue;
            }
        };

        let Some(reply_to) = &request.reply_to else {
            continue;
        };
        let sent = codec::encode(&reply)
            .map_err(TransportError::from)
            .and_then(|bytes| broker.send(reply_to, &bytes, None));
        if let Err(e) = sent {
            tracing::warn!("server reply to {:?} failed: {}", request.request_type, e);
        }
    }
}
