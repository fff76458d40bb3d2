// SPDX-License-Identifier: MIT
//
// Geiger RNG: Radiation-Sourced Entropy over TCP
// Copyright (c) 2025 Valer Bocan, PhD, CSSLP
// Email: valer.bocan@upt.ro
//
// Department of Computer and Information Technology
// Politehnica University of Timisoara
//
// https://github.com/vbocan/qrng-data-diode

//! Geiger RNG Server - Radiation-Sourced Entropy over TCP
//!
//! Samples a radiation detector on a dedicated thread and serves the
//! resulting 4-bit random values to one TCP client at a time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ADC    ┌──────────────┐   queue   ┌──────────────┐    TCP
//! │ Geiger tube  │ ───────> │   Sampler    │ ────────> │   Server     │ ────────> client
//! │              │          │  (OS thread) │           │   (tokio)    │  :6666
//! └──────────────┘          └──────────────┘           └──────────────┘
//! ```
//!
//! # Features
//!
//! - Busy-polling pulse detector with debounce, isolated from network I/O
//! - Bounded drop-oldest sample queue
//! - Serial single-client service with a minimal text protocol
//! - Listener bring-up with bounded retries, rebinding after failures

use anyhow::{Context, Result};
use clap::Parser;
use geiger_core::{
    config::ServerConfig,
    metrics::Metrics,
    retry::RetryPolicy,
    sampler::{EntropySampler, SamplerSettings},
    sensor,
    server::{ProtocolServer, ServerSettings},
    EntropyQueue,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "geiger-server")]
#[command(about = "Geiger RNG Server - Serves radiation-sourced random samples over TCP", long_about = None)]
struct Args {
    /// Path to a YAML configuration file (environment variables are used if omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the TCP port
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Pause before a new bring-up round once all retries are exhausted
const ROUND_BACKOFF: Duration = Duration::from_secs(10);

/// Bind the listener and serve until the listener fails, forever
async fn service_loop(config: &ServerConfig, queue: EntropyQueue, metrics: Metrics) -> Result<()> {
    let settings = ServerSettings::from_config(config)?;
    let policy = RetryPolicy::new(config.bind_max_retries, config.bind_retry_backoff());

    loop {
        info!("Starting server on {}", settings.address);

        let bound = policy
            .execute(|| ProtocolServer::bind(settings, queue.clone(), metrics.clone()))
            .await;

        match bound {
            Ok(server) => {
                server.serve().await;
                warn!("Service loop exited, rebinding");
            }
            Err(e) => {
                error!("Network bring-up failed: {}", e);
                sleep(ROUND_BACKOFF).await;
            }
        }
    }
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use futures::stream::StreamExt;
        use signal_hook::consts::signal::*;
        use signal_hook_tokio::Signals;

        let mut signals =
            Signals::new([SIGINT, SIGTERM]).context("Failed to register signal handlers")?;

        if let Some(signal) = signals.next().await {
            info!("Received signal: {:?}", signal);
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C signal");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Initialize tracing
    let log_level = args
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .json()
        .init();

    info!("Geiger RNG Server v{}", geiger_core::VERSION);

    // Load configuration
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from file: {:?}", path);
            ServerConfig::from_file(path).context("Failed to load configuration from file")?
        }
        None => {
            info!("Loading configuration from environment variables");
            ServerConfig::from_env().context("Failed to load configuration from environment")?
        }
    };
    if let Some(port) = args.port {
        config.port = port;
        config.validate().context("Invalid port override")?;
    }

    info!("Queue capacity: {} samples", config.queue_capacity);
    info!(
        "Pulse threshold: {}, reset threshold: {}",
        config.pulse_threshold, config.reset_threshold
    );

    // Start the producer on its own thread
    let queue = EntropyQueue::new(config.queue_capacity);
    let input = sensor::from_config(&config).context("Failed to open sensor")?;
    let sampler = EntropySampler::new(input, queue.clone(), SamplerSettings::from(&config));
    let sampler_stats = sampler.stats();
    sampler.spawn().context("Failed to start sampler thread")?;

    // Give the detector time to settle before bringing the network up
    sleep(config.warmup()).await;
    info!(
        "Warm-up complete: {} pulses in {} polls, {} samples queued",
        sampler_stats.detections(),
        sampler_stats.polls(),
        queue.size()
    );

    let metrics = Metrics::new();

    tokio::select! {
        result = service_loop(&config, queue.clone(), metrics.clone()) => result?,
        result = wait_for_shutdown() => result?,
    }

    let queue_stats = queue.stats();
    info!(
        "Shutting down: {} samples detected, {} evicted, {} queued",
        sampler_stats.detections(),
        queue_stats.evictions_overflow,
        queue.size()
    );
    info!("Final metrics:\n{}", metrics.prometheus_format());
    Ok(())
}
