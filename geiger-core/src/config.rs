//! Configuration management for the Geiger RNG service

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Analog input backend
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Software model of a Geiger tube, for hosts without a detector
    #[default]
    Simulated,
    /// Linux IIO ADC channel exposed through sysfs
    Iio,
}

/// Entropy service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// IP address the listener binds to
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// TCP port of the entropy service
    #[serde(default = "default_port")]
    pub port: u16,

    /// Kernel accept backlog
    #[serde(default = "default_listen_backlog")]
    pub listen_backlog: u32,

    /// Maximum number of buffered samples
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Amplitude above which a reading is a pulse
    #[serde(default = "default_pulse_threshold")]
    pub pulse_threshold: u16,

    /// Amplitude the signal must fall to before polling resumes
    #[serde(default = "default_reset_threshold")]
    pub reset_threshold: u16,

    /// Wait between debounce polls in microseconds
    #[serde(default = "default_debounce_poll_us")]
    pub debounce_poll_us: u64,

    /// Guard delay after a pulse in microseconds
    #[serde(default = "default_guard_delay_us")]
    pub guard_delay_us: u64,

    /// Pause between accept re-registrations in milliseconds
    #[serde(default = "default_accept_pacing_ms")]
    pub accept_pacing_ms: u64,

    /// Delay between sampler start and network bring-up in milliseconds
    #[serde(default = "default_warmup_ms")]
    pub warmup_ms: u64,

    /// Bring-up attempts per round
    #[serde(default = "default_bind_max_retries")]
    pub bind_max_retries: u32,

    /// Initial backoff between bring-up attempts in milliseconds
    #[serde(default = "default_bind_retry_backoff_ms")]
    pub bind_retry_backoff_ms: u64,

    /// Analog input backend
    #[serde(default)]
    pub sensor: SensorKind,

    /// Raw channel file for the IIO backend
    #[serde(default)]
    pub sensor_path: Option<PathBuf>,

    /// Per-poll pulse probability of the simulated sensor
    #[serde(default = "default_simulated_pulse_rate")]
    pub simulated_pulse_rate: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            port: default_port(),
            listen_backlog: default_listen_backlog(),
            queue_capacity: default_queue_capacity(),
            pulse_threshold: default_pulse_threshold(),
            reset_threshold: default_reset_threshold(),
            debounce_poll_us: default_debounce_poll_us(),
            guard_delay_us: default_guard_delay_us(),
            accept_pacing_ms: default_accept_pacing_ms(),
            warmup_ms: default_warmup_ms(),
            bind_max_retries: default_bind_max_retries(),
            bind_retry_backoff_ms: default_bind_retry_backoff_ms(),
            sensor: SensorKind::default(),
            sensor_path: None,
            simulated_pulse_rate: default_simulated_pulse_rate(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config: Self = envy::prefixed("GEIGER_").from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, with `GEIGER_*` variables taking precedence
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("GEIGER").try_parsing(true))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.listen_ip()?;

        if self.port == 0 {
            return Err(Error::Config("port must be > 0".to_string()));
        }

        if self.listen_backlog == 0 {
            return Err(Error::Config("listen_backlog must be > 0".to_string()));
        }

        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be > 0".to_string()));
        }

        // Debounce can only terminate if the reset level sits below the pulse level
        if self.reset_threshold >= self.pulse_threshold {
            return Err(Error::Config(format!(
                "reset_threshold ({}) must be lower than pulse_threshold ({})",
                self.reset_threshold, self.pulse_threshold
            )));
        }

        if self.bind_max_retries == 0 {
            return Err(Error::Config("bind_max_retries must be > 0".to_string()));
        }

        match self.sensor {
            SensorKind::Iio if self.sensor_path.is_none() => {
                return Err(Error::Config(
                    "sensor 'iio' requires sensor_path".to_string(),
                ));
            }
            SensorKind::Simulated
                if !(self.simulated_pulse_rate > 0.0 && self.simulated_pulse_rate <= 1.0) =>
            {
                return Err(Error::Config(format!(
                    "simulated_pulse_rate must be in (0, 1], got {}",
                    self.simulated_pulse_rate
                )));
            }
            _ => {}
        }

        Ok(())
    }

    fn listen_ip(&self) -> Result<IpAddr> {
        self.listen_address.parse().map_err(|e| {
            Error::Config(format!(
                "Invalid listen_address '{}': {}",
                self.listen_address, e
            ))
        })
    }

    /// Socket address of the listener
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::new(self.listen_ip()?, self.port))
    }

    pub fn debounce_poll(&self) -> Duration {
        Duration::from_micros(self.debounce_poll_us)
    }

    pub fn guard_delay(&self) -> Duration {
        Duration::from_micros(self.guard_delay_us)
    }

    pub fn accept_pacing(&self) -> Duration {
        Duration::from_millis(self.accept_pacing_ms)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn bind_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.bind_retry_backoff_ms)
    }
}

// Default value functions
fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    crate::DEFAULT_PORT
}

fn default_listen_backlog() -> u32 {
    1 // one pending client while another is served
}

fn default_queue_capacity() -> usize {
    crate::DEFAULT_QUEUE_CAPACITY
}

fn default_pulse_threshold() -> u16 {
    2500
}

fn default_reset_threshold() -> u16 {
    100
}

fn default_debounce_poll_us() -> u64 {
    10
}

fn default_guard_delay_us() -> u64 {
    100
}

fn default_accept_pacing_ms() -> u64 {
    50
}

fn default_warmup_ms() -> u64 {
    5000
}

fn default_bind_max_retries() -> u32 {
    3
}

fn default_bind_retry_backoff_ms() -> u64 {
    1000
}

fn default_simulated_pulse_rate() -> f64 {
    0.001
}
