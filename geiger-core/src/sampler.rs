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

//! Pulse detection loop
//!
//! The sampler polls the analog input as fast as it can. A free-running
//! counter advances once per poll whether or not anything is detected; when a
//! reading crosses the pulse threshold the low four bits of the counter become
//! a random sample. Because the counter runs far faster than the pulse rate,
//! the arrival time of each decay maps to an unpredictable residue mod 16.
//!
//! The loop never suspends and never touches the network, so it lives on a
//! dedicated OS thread rather than on the async runtime.

use crate::config::ServerConfig;
use crate::queue::EntropyQueue;
use crate::sample::RandomSample;
use crate::sensor::AnalogInput;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, trace};

/// Detection and debounce parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerSettings {
    /// Amplitude strictly above which a reading is a pulse
    pub pulse_threshold: u16,
    /// Amplitude at or below which the pulse is over
    pub reset_threshold: u16,
    /// Wait between polls while the pulse is still high
    pub debounce_poll: Duration,
    /// Pause after the pulse has fallen, before normal polling resumes
    pub guard_delay: Duration,
}

impl From<&ServerConfig> for SamplerSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            pulse_threshold: config.pulse_threshold,
            reset_threshold: config.reset_threshold,
            debounce_poll: config.debounce_poll(),
            guard_delay: config.guard_delay(),
        }
    }
}

/// Counters published by the sampler thread
#[derive(Clone, Default)]
pub struct SamplerStats {
    inner: Arc<SamplerStatsInner>,
}

#[derive(Default)]
struct SamplerStatsInner {
    polls: AtomicU64,
    detections: AtomicU64,
}

impl SamplerStats {
    /// Outer poll iterations so far
    pub fn polls(&self) -> u64 {
        self.inner.polls.load(Ordering::Relaxed)
    }

    /// Pulses detected so far
    pub fn detections(&self) -> u64 {
        self.inner.detections.load(Ordering::Relaxed)
    }
}

/// Producer turning sensor pulses into queued samples
pub struct EntropySampler<I: AnalogInput> {
    input: I,
    queue: EntropyQueue,
    settings: SamplerSettings,
    counter: u64,
    stats: SamplerStats,
}

impl<I: AnalogInput + 'static> EntropySampler<I> {
    pub fn new(input: I, queue: EntropyQueue, settings: SamplerSettings) -> Self {
        Self {
            input,
            queue,
            settings,
            counter: 0,
            stats: SamplerStats::default(),
        }
    }

    /// Handle on the sampler counters, valid after the sampler moves to its thread
    pub fn stats(&self) -> SamplerStats {
        self.stats.clone()
    }

    /// Current value of the free-running counter
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Run one poll iteration
    ///
    /// Returns the sample pushed to the queue if this poll saw a pulse. The
    /// call only returns after the pulse has been debounced.
    pub fn poll_once(&mut self) -> Option<RandomSample> {
        let amplitude = self.input.read();

        let detected = if amplitude > self.settings.pulse_threshold {
            let sample = RandomSample::from_counter(self.counter);
            self.queue.push(sample);
            self.stats.inner.detections.fetch_add(1, Ordering::Relaxed);
            trace!(amplitude, sequence = sample.sequence, value = sample.value, "pulse");

            self.debounce();
            Some(sample)
        } else {
            None
        };

        self.counter = self.counter.wrapping_add(1);
        self.stats.inner.polls.fetch_add(1, Ordering::Relaxed);
        detected
    }

    /// Wait for the current pulse to fall below the reset level, then hold off
    fn debounce(&mut self) {
        while self.input.read() > self.settings.reset_threshold {
            thread::sleep(self.settings.debounce_poll);
        }
        thread::sleep(self.settings.guard_delay);
    }

    /// Poll forever
    pub fn run(mut self) -> ! {
        info!(
            "Sampler started on {} sensor (pulse > {}, reset <= {})",
            self.input.name(),
            self.settings.pulse_threshold,
            self.settings.reset_threshold
        );
        loop {
            self.poll_once();
        }
    }

    /// Move the sampler onto its own named OS thread
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("geiger-sampler".to_string())
            .spawn(move || {
                self.run();
            })
    }
}
