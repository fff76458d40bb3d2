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

//! Geiger RNG Client
//!
//! Connects to a Geiger RNG server, waits for the greeting, requests samples
//! one `req` at a time and disconnects with `end`.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use geiger_core::protocol::{Command, SampleResponse, GREETING};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    /// Raw response lines (value:sequence:available)
    Lines,
    /// One 4-bit value per line
    Values,
    /// Values packed pairwise into bytes, hex-encoded
    Bytes,
}

#[derive(Parser)]
#[command(about = "Fetch radiation-sourced random samples from a Geiger RNG server")]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value_t = geiger_core::DEFAULT_PORT)]
    port: u16,

    /// Number of samples to request
    #[arg(short, long, default_value = "10")]
    count: usize,

    #[arg(short, long, value_enum, default_value = "lines")]
    format: OutputFormat,
}

/// Pack 4-bit values into bytes, first value in the high nibble
///
/// A trailing odd value is dropped.
fn pack_nibbles(values: &[u8]) -> Vec<u8> {
    values
        .chunks_exact(2)
        .map(|pair| (pair[0] << 4) | (pair[1] & 0x0f))
        .collect()
}

async fn fetch(args: &Args) -> Result<Vec<SampleResponse>> {
    let stream = TcpStream::connect((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("Failed to connect to {}:{}", args.host, args.port))?;
    let mut stream = BufReader::new(stream);

    let mut greeting = [0u8; GREETING.len()];
    stream
        .read_exact(&mut greeting)
        .await
        .context("Server closed before greeting")?;
    if greeting != GREETING {
        bail!("Unexpected greeting {:?}", String::from_utf8_lossy(&greeting));
    }

    let request = Command::Request.token().context("request token")?;
    let end = Command::End.token().context("end token")?;

    let mut responses = Vec::with_capacity(args.count);
    let mut line = String::new();
    for _ in 0..args.count {
        stream.get_mut().write_all(request).await?;

        line.clear();
        if stream.read_line(&mut line).await? == 0 {
            bail!("Server closed the connection");
        }
        debug!("Response: {}", line.trim_end());
        responses.push(line.parse::<SampleResponse>()?);
    }

    stream.get_mut().write_all(end).await?;
    Ok(responses)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();
    let responses = fetch(&args).await?;

    let values: Vec<u8> = responses
        .iter()
        .filter(|r| {
            let valid = r.sample.is_valid();
            if !valid {
                warn!("Server queue empty, sample skipped");
            }
            valid
        })
        .map(|r| r.sample.value)
        .collect();

    match args.format {
        OutputFormat::Lines => {
            for response in &responses {
                print!("{}", response);
            }
        }
        OutputFormat::Values => {
            for value in &values {
                println!("{}", value);
            }
        }
        OutputFormat::Bytes => println!("{}", hex::encode(pack_nibbles(&values))),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_nibbles() {
        assert_eq!(pack_nibbles(&[0xa, 0x5, 0x1, 0xf]), vec![0xa5, 0x1f]);
        assert_eq!(pack_nibbles(&[0x3, 0x4, 0x7]), vec![0x34]);
        assert!(pack_nibbles(&[]).is_empty());
    }
}
