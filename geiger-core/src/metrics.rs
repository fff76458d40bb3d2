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

//! Metrics collection and reporting

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Service-wide counters, shared by the server and each connection
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    start_time: Instant,

    // Connection metrics
    connections_accepted: AtomicU64,
    connections_closed: AtomicU64,
    connections_aborted: AtomicU64,
    transport_errors: AtomicU64,

    // Request metrics
    requests_served: AtomicU64,
    empty_responses: AtomicU64,
    malformed_commands: AtomicU64,
    bytes_sent: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                start_time: Instant::now(),
                connections_accepted: AtomicU64::new(0),
                connections_closed: AtomicU64::new(0),
                connections_aborted: AtomicU64::new(0),
                transport_errors: AtomicU64::new(0),
                requests_served: AtomicU64::new(0),
                empty_responses: AtomicU64::new(0),
                malformed_commands: AtomicU64::new(0),
                bytes_sent: AtomicU64::new(0),
            }),
        }
    }

    // Connection metrics
    pub fn record_accept(&self) {
        self.inner.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_close(&self) {
        self.inner.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abort(&self) {
        self.inner.connections_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_error(&self) {
        self.inner.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connections_accepted(&self) -> u64 {
        self.inner.connections_accepted.load(Ordering::Relaxed)
    }

    pub fn connections_closed(&self) -> u64 {
        self.inner.connections_closed.load(Ordering::Relaxed)
    }

    pub fn connections_aborted(&self) -> u64 {
        self.inner.connections_aborted.load(Ordering::Relaxed)
    }

    pub fn transport_errors(&self) -> u64 {
        self.inner.transport_errors.load(Ordering::Relaxed)
    }

    // Request metrics
    /// Record one answered `req`; `valid` is false when the queue was empty
    pub fn record_request(&self, valid: bool) {
        self.inner.requests_served.fetch_add(1, Ordering::Relaxed);
        if !valid {
            self.inner.empty_responses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_malformed(&self) {
        self.inner.malformed_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes_sent(&self, bytes: usize) {
        self.inner.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn requests_served(&self) -> u64 {
        self.inner.requests_served.load(Ordering::Relaxed)
    }

    pub fn empty_responses(&self) -> u64 {
        self.inner.empty_responses.load(Ordering::Relaxed)
    }

    pub fn malformed_commands(&self) -> u64 {
        self.inner.malformed_commands.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.inner.bytes_sent.load(Ordering::Relaxed)
    }

    // Derived metrics
    pub fn uptime_seconds(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }

    /// Log a one-line snapshot of all counters
    pub fn log_summary(&self) {
        info!(
            connections_accepted = self.connections_accepted(),
            connections_closed = self.connections_closed(),
            connections_aborted = self.connections_aborted(),
            transport_errors = self.transport_errors(),
            requests_served = self.requests_served(),
            empty_responses = self.empty_responses(),
            malformed_commands = self.malformed_commands(),
            bytes_sent = self.bytes_sent(),
            uptime_seconds = self.uptime_seconds(),
            "Service metrics"
        );
    }

    /// Generate Prometheus-compatible metrics output
    pub fn prometheus_format(&self) -> String {
        let counters = [
            ("connections_accepted", "Total accepted client connections", self.connections_accepted()),
            ("connections_closed", "Connections closed gracefully", self.connections_closed()),
            ("connections_aborted", "Connections force-aborted", self.connections_aborted()),
            ("transport_errors", "Transport errors observed", self.transport_errors()),
            ("requests_served", "Answered sample requests", self.requests_served()),
            ("empty_responses", "Requests answered with the invalid sample", self.empty_responses()),
            ("malformed_commands", "Malformed client commands", self.malformed_commands()),
            ("bytes_sent", "Total bytes written to clients", self.bytes_sent()),
        ];

        let mut output = String::new();
        for (name, help, value) in counters {
            let _ = writeln!(output, "# HELP geiger_{} {}", name, help);
            let _ = writeln!(output, "# TYPE geiger_{} counter", name);
            let _ = writeln!(output, "geiger_{} {}", name, value);
        }

        let _ = writeln!(output, "# HELP geiger_uptime_seconds Service uptime in seconds");
        let _ = writeln!(output, "# TYPE geiger_uptime_seconds gauge");
        let _ = writeln!(output, "geiger_uptime_seconds {}", self.uptime_seconds());

        output
    }
}
