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

//! Geiger RNG Core Library
//!
//! This crate turns detector pulses sampled through an analog input into a
//! stream of 4-bit random samples and serves them to a single TCP client over
//! a line-oriented text protocol.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  read   ┌───────────┐  push   ┌──────────┐  pop   ┌───────────┐
//! │  Sensor  │ ──────> │  Sampler  │ ──────> │  Queue   │ ─────> │  Server   │ ──> client
//! │  (ADC)   │         │ (thread)  │         │ (mutex)  │        │  (tokio)  │
//! └──────────┘         └───────────┘         └──────────┘        └───────────┘
//! ```
//!
//! The library is organized into modules representing core concerns:
//! - `sample`: The random sample type and its invalid sentinel
//! - `queue`: Bounded FIFO shared between the sampler and the server
//! - `sensor`: Analog input abstraction plus simulated and sysfs backends
//! - `sampler`: Pulse detection loop running on a dedicated thread
//! - `protocol`: Wire format (greeting, commands, responses)
//! - `connection`: Per-client state machine driven by typed events
//! - `server`: Serial single-client TCP service
//! - `config`: Configuration management with validation
//! - `metrics`: Service counters
//! - `retry`: Bring-up retries with exponential backoff
//! - `error`: Unified error types

pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod queue;
pub mod retry;
pub mod sample;
pub mod sampler;
pub mod sensor;
pub mod server;

pub use error::{Error, Result};
pub use queue::EntropyQueue;
pub use sample::RandomSample;

/// Library version reported at startup
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default TCP port of the entropy service
pub const DEFAULT_PORT: u16 = 6666;

/// Default queue capacity in samples
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_240;
