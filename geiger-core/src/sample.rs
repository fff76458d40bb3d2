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

//! Random sample type produced by the sampler and served to clients

use std::fmt;

/// One detected physical event reduced to a 4-bit value
///
/// `value` is always `sequence mod 16` for samples produced by the sampler.
/// The only exception is [`RandomSample::INVALID`], returned when the queue
/// has nothing to hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RandomSample {
    /// Random value in `[MIN_VALUE, MAX_VALUE]`, or `INVALID_VALUE`
    pub value: u8,
    /// Free-running sampler counter at detection time
    pub sequence: u64,
}

impl RandomSample {
    pub const MIN_VALUE: u8 = 0;
    pub const MAX_VALUE: u8 = 15;
    /// Value reported when no sample is available
    pub const INVALID_VALUE: u8 = Self::MAX_VALUE + 1;

    /// Sentinel returned by an empty queue
    pub const INVALID: Self = Self {
        value: Self::INVALID_VALUE,
        sequence: 0,
    };

    /// Derive a sample from the sampler counter
    pub fn from_counter(counter: u64) -> Self {
        Self {
            value: (counter % (Self::MAX_VALUE as u64 + 1)) as u8,
            sequence: counter,
        }
    }

    /// Check whether this sample carries a usable random value
    pub fn is_valid(&self) -> bool {
        self.value <= Self::MAX_VALUE
    }
}

impl fmt::Display for RandomSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.value, self.sequence)
    }
}
