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

//! Error types for the Geiger RNG service
//!
//! Provides a unified error taxonomy using `thiserror` for ergonomic error handling.

use std::net::SocketAddr;

pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Geiger RNG operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Listener could not be created on the requested address
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Client violated the wire protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Sensor backend could not be opened
    #[error("Sensor error: {0}")]
    Sensor(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is transient and retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Bind { .. })
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<envy::Error> for Error {
    fn from(e: envy::Error) -> Self {
        Error::Config(format!("Failed to parse environment variables: {}", e))
    }
}
