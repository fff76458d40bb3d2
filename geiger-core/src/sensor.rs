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

//! Analog input abstraction for the pulse detector
//!
//! The sampler only needs one primitive: read the current amplitude. Reads
//! never fail from the sampler's point of view; backends that can fault
//! report a zero amplitude instead and keep their own fault counter.

use crate::config::{SensorKind, ServerConfig};
use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Source of digitized amplitudes
pub trait AnalogInput: Send {
    /// Sample the input once
    fn read(&mut self) -> u16;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

impl AnalogInput for Box<dyn AnalogInput> {
    fn read(&mut self) -> u16 {
        (**self).read()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Build the sensor backend selected in the configuration
pub fn from_config(config: &ServerConfig) -> Result<Box<dyn AnalogInput>> {
    let sensor: Box<dyn AnalogInput> = match config.sensor {
        SensorKind::Simulated => Box::new(SimulatedDetector::new(
            config.simulated_pulse_rate,
            config.pulse_threshold,
            config.reset_threshold,
        )),
        SensorKind::Iio => {
            let path = config
                .sensor_path
                .as_ref()
                .ok_or_else(|| Error::Config("sensor 'iio' requires sensor_path".to_string()))?;
            Box::new(IioAdc::open(path)?)
        }
    };
    info!("Using {} sensor", sensor.name());
    Ok(sensor)
}

/// Software model of a Geiger tube behind a 12-bit ADC
///
/// Idles on low-level noise. A pulse jumps to near full scale and decays
/// geometrically, spending a few reads above the reset level before
/// returning to baseline, like the real tube output.
pub struct SimulatedDetector {
    rng: StdRng,
    pulse_rate: f64,
    peak: u16,
    noise_ceiling: u16,
    level: f64,
}

impl SimulatedDetector {
    const FULL_SCALE: u16 = 4095;
    const DECAY: f64 = 0.5;

    pub fn new(pulse_rate: f64, pulse_threshold: u16, reset_threshold: u16) -> Self {
        Self::with_rng(StdRng::from_entropy(), pulse_rate, pulse_threshold, reset_threshold)
    }

    /// Deterministic detector for tests
    pub fn seeded(seed: u64, pulse_rate: f64, pulse_threshold: u16, reset_threshold: u16) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), pulse_rate, pulse_threshold, reset_threshold)
    }

    fn with_rng(rng: StdRng, pulse_rate: f64, pulse_threshold: u16, reset_threshold: u16) -> Self {
        Self {
            rng,
            pulse_rate: pulse_rate.clamp(0.0, 1.0),
            peak: pulse_threshold.saturating_add(1).max(Self::FULL_SCALE),
            noise_ceiling: reset_threshold / 2,
            level: 0.0,
        }
    }
}

impl AnalogInput for SimulatedDetector {
    fn read(&mut self) -> u16 {
        if self.level >= 1.0 {
            self.level *= Self::DECAY;
        } else if self.rng.gen_bool(self.pulse_rate) {
            self.level = self.peak as f64;
        } else {
            self.level = 0.0;
        }

        let noise = self.rng.gen_range(0..=self.noise_ceiling);
        (self.level as u16).saturating_add(noise)
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

/// Linux Industrial I/O ADC channel (`in_voltageN_raw`)
pub struct IioAdc {
    path: PathBuf,
    file: File,
    scratch: String,
    faults: u64,
}

impl IioAdc {
    /// Open the raw channel file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .map_err(|e| Error::Sensor(format!("Failed to open {}: {}", path.display(), e)))?;

        Ok(Self {
            path,
            file,
            scratch: String::with_capacity(8),
            faults: 0,
        })
    }

    /// Number of reads that produced no usable value
    pub fn faults(&self) -> u64 {
        self.faults
    }

    fn try_read(&mut self) -> std::io::Result<u16> {
        self.scratch.clear();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_string(&mut self.scratch)?;
        self.scratch
            .trim()
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

impl AnalogInput for IioAdc {
    fn read(&mut self) -> u16 {
        match self.try_read() {
            Ok(value) => value,
            Err(e) => {
                if self.faults == 0 {
                    warn!("Sensor read from {} failed: {}", self.path.display(), e);
                }
                self.faults += 1;
                0
            }
        }
    }

    fn name(&self) -> &'static str {
        "iio"
    }
}
