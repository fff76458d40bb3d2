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

//! Wire protocol between the entropy service and its client
//!
//! Plain text, byte exact:
//!
//! | Direction | Payload | Meaning |
//! |---|---|---|
//! | server → client | `ready\n` | greeting after accept |
//! | client → server | `req` | request one sample |
//! | client → server | `end` | graceful disconnect |
//! | server → client | `<value>:<sequence>:<available>\n` | reply to `req` |
//!
//! Commands are fixed 3-byte tokens without terminator. Anything else is
//! malformed and closes the connection without a reply.

use crate::sample::RandomSample;
use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Greeting written as soon as a client is accepted
pub const GREETING: &[u8] = b"ready\n";

/// Length of every client command
pub const COMMAND_LEN: usize = 3;

/// Size of the per-connection send and receive buffers
pub const BUFFER_SIZE: usize = 2048;

const REQUEST_TOKEN: &[u8; COMMAND_LEN] = b"req";
const END_TOKEN: &[u8; COMMAND_LEN] = b"end";

/// Parsed client request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Pop one sample and reply with it
    Request,
    /// Close the connection
    End,
    /// Unknown or truncated token
    Malformed,
}

impl Command {
    /// Classify one token
    pub fn parse(token: &[u8]) -> Self {
        match token {
            t if t == REQUEST_TOKEN => Self::Request,
            t if t == END_TOKEN => Self::End,
            _ => Self::Malformed,
        }
    }

    /// Wire encoding, `None` for `Malformed`
    pub fn token(&self) -> Option<&'static [u8]> {
        match self {
            Self::Request => Some(&REQUEST_TOKEN[..]),
            Self::End => Some(&END_TOKEN[..]),
            Self::Malformed => None,
        }
    }
}

/// Split one delivery into commands
///
/// Strides are non-overlapping and start at offset 0 of `data`. A trailing
/// stride shorter than [`COMMAND_LEN`] is reported as `Malformed`; nothing
/// is carried over to the next delivery.
pub fn parse_commands(data: &[u8]) -> impl Iterator<Item = Command> + '_ {
    data.chunks(COMMAND_LEN).map(Command::parse)
}

/// Reply line for a `req` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleResponse {
    /// Sample popped from the queue (possibly the invalid sentinel)
    pub sample: RandomSample,
    /// Queue length observed right after the pop
    pub available: usize,
}

impl SampleResponse {
    pub fn new(sample: RandomSample, available: usize) -> Self {
        Self { sample, available }
    }
}

impl fmt::Display for SampleResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}:{}:{}",
            self.sample.value, self.sample.sequence, self.available
        )
    }
}

impl FromStr for SampleResponse {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let line = s.strip_suffix('\n').unwrap_or(s);
        let mut fields = line.split(':');

        let mut next = |name: &str| {
            fields
                .next()
                .ok_or_else(|| Error::Protocol(format!("Missing {} in response '{}'", name, line)))
        };
        let value = next("value")?;
        let sequence = next("sequence")?;
        let available = next("available")?;

        if fields.next().is_some() {
            return Err(Error::Protocol(format!("Trailing fields in response '{}'", line)));
        }

        let parse_err = |name: &str, e: std::num::ParseIntError| {
            Error::Protocol(format!("Invalid {} in response '{}': {}", name, line, e))
        };
        let value: u8 = value.parse().map_err(|e| parse_err("value", e))?;
        if value > RandomSample::INVALID_VALUE {
            return Err(Error::Protocol(format!("Value {} out of range", value)));
        }

        Ok(Self {
            sample: RandomSample {
                value,
                sequence: sequence.parse().map_err(|e| parse_err("sequence", e))?,
            },
            available: available.parse().map_err(|e| parse_err("available", e))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse(b"req"), Command::Request);
        assert_eq!(Command::parse(b"end"), Command::End);
        assert_eq!(Command::parse(b"xyz"), Command::Malformed);
        assert_eq!(Command::parse(b"REQ"), Command::Malformed);
        assert_eq!(Command::parse(b"re"), Command::Malformed);
    }

    #[test]
    fn test_parse_commands_strides() {
        let commands: Vec<_> = parse_commands(b"reqreqend").collect();
        assert_eq!(commands, vec![Command::Request, Command::Request, Command::End]);

        // Misaligned input is not resynchronised
        let commands: Vec<_> = parse_commands(b"xreqend").collect();
        assert_eq!(commands[0], Command::Malformed);

        let commands: Vec<_> = parse_commands(b"reqre").collect();
        assert_eq!(commands, vec![Command::Request, Command::Malformed]);

        assert_eq!(parse_commands(b"").count(), 0);
    }

    #[test]
    fn test_response_format() {
        let response = SampleResponse::new(RandomSample::from_counter(1234), 17);
        assert_eq!(response.to_string(), "2:1234:17\n");

        let empty = SampleResponse::new(RandomSample::INVALID, 0);
        assert_eq!(empty.to_string(), "16:0:0\n");
    }

    #[test]
    fn test_response_parse() {
        let response: SampleResponse = "9:41:10239\n".parse().unwrap();
        assert_eq!(response.sample, RandomSample { value: 9, sequence: 41 });
        assert_eq!(response.available, 10239);

        assert!("9:41".parse::<SampleResponse>().is_err());
        assert!("9:41:1:2".parse::<SampleResponse>().is_err());
        assert!("a:41:1".parse::<SampleResponse>().is_err());
        assert!("17:41:1".parse::<SampleResponse>().is_err());
    }

    #[test]
    fn test_command_tokens() {
        assert_eq!(Command::Request.token(), Some(&b"req"[..]));
        assert_eq!(Command::End.token(), Some(&b"end"[..]));
        assert_eq!(Command::Malformed.token(), None);
    }
}
