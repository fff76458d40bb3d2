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

//! Serial single-client TCP service
//!
//! The server accepts one client, serves it until the connection is torn
//! down, pauses briefly and accepts the next one. While a client is being
//! served nobody else is accepted; further clients wait in the kernel backlog.
//!
//! # States
//!
//! ```text
//!   ┌───────────┐  accept   ┌───────────┐
//!   │ LISTENING │ ────────> │ CONNECTED │ ── req → reply, loop
//!   └───────────┘           └───────────┘
//!         ^                       │ end / malformed / EOF / error
//!         └──── pacing delay ─────┘
//! ```

use crate::config::ServerConfig;
use crate::connection::{
    Action, CloseReason, Connection, ConnectionEvent, ConnectionId, TransportError,
};
use crate::metrics::Metrics;
use crate::protocol::BUFFER_SIZE;
use crate::queue::EntropyQueue;
use crate::{Error, Result};
use bytes::Bytes;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Listener parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Address to bind
    pub address: SocketAddr,
    /// Kernel accept backlog
    pub backlog: u32,
    /// Pause after each teardown before accepting again
    pub accept_pacing: Duration,
}

impl ServerSettings {
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        Ok(Self {
            address: config.socket_addr()?,
            backlog: config.listen_backlog,
            accept_pacing: config.accept_pacing(),
        })
    }
}

/// Entropy service serving one client at a time
pub struct ProtocolServer {
    listener: TcpListener,
    settings: ServerSettings,
    queue: EntropyQueue,
    metrics: Metrics,
    next_id: u64,
}

impl ProtocolServer {
    /// Create the listening socket
    pub async fn bind(settings: ServerSettings, queue: EntropyQueue, metrics: Metrics) -> Result<Self> {
        let address = settings.address;
        let bind_err = |source| Error::Bind { address, source };

        let socket = if address.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_err)?;
        socket.set_reuseaddr(true).map_err(bind_err)?;
        socket.bind(address).map_err(bind_err)?;
        let listener = socket.listen(settings.backlog).map_err(bind_err)?;

        info!("Entropy service listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            settings,
            queue,
            metrics,
            next_id: 0,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve clients forever
    ///
    /// Every failure is handled by tearing down the current connection and
    /// returning to the accept loop; nothing propagates out.
    pub async fn serve(mut self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => self.serve_client(stream, peer).await,
                Err(e) => {
                    error!("Accept failed: {}", e);
                    self.metrics.record_transport_error();
                }
            }

            sleep(self.settings.accept_pacing).await;
        }
    }

    async fn serve_client(&mut self, mut stream: TcpStream, peer: SocketAddr) {
        self.next_id += 1;
        let id = ConnectionId(self.next_id);
        self.metrics.record_accept();

        if let Err(e) = stream.set_nodelay(true) {
            debug!(connection = %id, "Failed to disable Nagle: {}", e);
        }

        let mut conn = Connection::new(id, peer, self.queue.clone(), self.metrics.clone());
        let mut recv = vec![0u8; BUFFER_SIZE];
        let mut actions = conn.handle(ConnectionEvent::Accepted);

        loop {
            if let Some(reason) = self.perform(&mut stream, &mut conn, actions).await {
                self.close(stream, &mut conn, reason).await;
                break;
            }
            if conn.is_closed() {
                debug!(connection = %id, "Connection released without close");
                break;
            }

            let event = match stream.read(&mut recv).await {
                Ok(0) => ConnectionEvent::PeerClosed,
                Ok(n) => ConnectionEvent::DataReceived(Bytes::copy_from_slice(&recv[..n])),
                Err(e) => ConnectionEvent::Error(TransportError::from(&e)),
            };
            actions = conn.handle(event);
        }

        self.metrics.log_summary();
    }

    /// Carry out actions in order, stopping at the first close
    async fn perform(
        &self,
        stream: &mut TcpStream,
        conn: &mut Connection,
        actions: Vec<Action>,
    ) -> Option<CloseReason> {
        let mut pending = VecDeque::from(actions);

        while let Some(action) = pending.pop_front() {
            match action {
                Action::Send(payload) => {
                    debug!(connection = %conn.id(), "Writing {} bytes", payload.len());
                    let event = match stream.write_all(&payload).await {
                        Ok(()) => {
                            self.metrics.record_bytes_sent(payload.len());
                            ConnectionEvent::SendCompleted(payload.len())
                        }
                        Err(e) => {
                            warn!(connection = %conn.id(), "Write failed: {}", e);
                            ConnectionEvent::Error(TransportError::from(&e))
                        }
                    };

                    // A failed write closes before anything still queued
                    for follow_up in conn.handle(event).into_iter().rev() {
                        pending.push_front(follow_up);
                    }
                    if conn.is_closed() {
                        return None;
                    }
                }
                Action::Close(reason) => return Some(reason),
            }
        }

        None
    }

    /// Graceful close, falling back to abort
    async fn close(&self, mut stream: TcpStream, conn: &mut Connection, reason: CloseReason) {
        match stream.shutdown().await {
            Ok(()) => {
                self.metrics.record_close();
                info!(connection = %conn.id(), "Connection closed ({})", reason);
            }
            Err(e) => {
                warn!(connection = %conn.id(), "Graceful close failed: {}, aborting", e);
                abort(stream);
                self.metrics.record_abort();
            }
        }
        conn.mark_closed();
    }
}

/// Drop the connection with a reset instead of a FIN
#[allow(deprecated)]
fn abort(stream: TcpStream) {
    if let Err(e) = stream.set_linger(Some(Duration::ZERO)) {
        debug!("Failed to set zero linger: {}", e);
    }
    drop(stream);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::RandomSample;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    async fn start(queue: EntropyQueue) -> (SocketAddr, Metrics, JoinHandle<()>) {
        let settings = ServerSettings {
            address: "127.0.0.1:0".parse().unwrap(),
            backlog: 1,
            accept_pacing: Duration::from_millis(10),
        };
        let metrics = Metrics::new();
        let server = ProtocolServer::bind(settings, queue, metrics.clone()).await.unwrap();
        let addr = server.local_addr().unwrap();
        (addr, metrics, tokio::spawn(server.serve()))
    }

    fn filled_queue(n: u64) -> EntropyQueue {
        let queue = EntropyQueue::new(64);
        for counter in 1..=n {
            queue.push(RandomSample::from_counter(counter * 7));
        }
        queue
    }

    async fn connect(addr: SocketAddr) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut greeting = [0u8; 6];
        timeout(WAIT, stream.read_exact(&mut greeting)).await.unwrap().unwrap();
        assert_eq!(&greeting, b"ready\n");
        stream
    }

    async fn read_line(stream: &mut TcpStream) -> String {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = timeout(WAIT, stream.read(&mut byte)).await.unwrap().unwrap();
            assert_eq!(n, 1, "connection closed mid-line");
            line.push(byte[0]);
            if byte[0] == b'\n' {
                return String::from_utf8(line).unwrap();
            }
        }
    }

    async fn assert_closed_silently(stream: &mut TcpStream) {
        let mut rest = Vec::new();
        timeout(WAIT, stream.read_to_end(&mut rest)).await.unwrap().unwrap();
        assert!(rest.is_empty(), "unexpected bytes: {:?}", rest);
    }

    fn assert_response_shape(line: &str) -> (u8, u64, usize) {
        let body = line.strip_suffix('\n').unwrap();
        let fields: Vec<&str> = body.split(':').collect();
        assert_eq!(fields.len(), 3, "bad response {:?}", line);
        assert!(fields.iter().all(|f| !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit())));
        assert!(fields[0].len() <= 2);

        let value: u8 = fields[0].parse().unwrap();
        assert!(value <= 15);
        (value, fields[1].parse().unwrap(), fields[2].parse().unwrap())
    }

    #[tokio::test]
    async fn test_request_happy_path() {
        let (addr, metrics, server) = start(filled_queue(3)).await;
        let mut client = connect(addr).await;

        client.write_all(b"req").await.unwrap();
        let (value, sequence, available) = assert_response_shape(&read_line(&mut client).await);
        assert_eq!(sequence, 7);
        assert_eq!(value, 7);
        assert_eq!(available, 2);

        client.write_all(b"end").await.unwrap();
        assert_closed_silently(&mut client).await;
        assert_eq!(metrics.requests_served(), 1);

        server.abort();
    }

    #[tokio::test]
    async fn test_end_closes_without_reply() {
        let (addr, _, server) = start(filled_queue(1)).await;
        let mut client = connect(addr).await;

        client.write_all(b"end").await.unwrap();
        assert_closed_silently(&mut client).await;

        server.abort();
    }

    #[tokio::test]
    async fn test_malformed_closes_without_reply() {
        let (addr, metrics, server) = start(filled_queue(1)).await;
        let mut client = connect(addr).await;

        client.write_all(b"xyz").await.unwrap();
        assert_closed_silently(&mut client).await;

        // Teardown completes before the next accept
        let mut next = connect(addr).await;
        next.write_all(b"end").await.unwrap();
        assert_closed_silently(&mut next).await;
        assert_eq!(metrics.malformed_commands(), 1);
        assert_eq!(metrics.connections_accepted(), 2);

        server.abort();
    }

    #[tokio::test]
    async fn test_pipelined_requests() {
        let (addr, _, server) = start(filled_queue(2)).await;
        let mut client = connect(addr).await;

        client.write_all(b"reqreq").await.unwrap();
        let first = assert_response_shape(&read_line(&mut client).await);
        let second = assert_response_shape(&read_line(&mut client).await);
        assert_eq!((first.1, first.2), (7, 1));
        assert_eq!((second.1, second.2), (14, 0));

        // Queue drained: the invalid sample is reported verbatim
        client.write_all(b"req").await.unwrap();
        assert_eq!(read_line(&mut client).await, "16:0:0\n");

        server.abort();
    }

    #[tokio::test]
    async fn test_peer_close_returns_to_listening() {
        let (addr, metrics, server) = start(filled_queue(1)).await;

        let client = connect(addr).await;
        drop(client);

        let mut next = connect(addr).await;
        next.write_all(b"req").await.unwrap();
        assert_response_shape(&read_line(&mut next).await);
        assert_eq!(metrics.connections_accepted(), 2);

        server.abort();
    }

    #[tokio::test]
    async fn test_single_client_exclusivity() {
        let (addr, _, server) = start(filled_queue(4)).await;
        let mut first = connect(addr).await;

        // The second client sits in the backlog without a greeting
        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut greeting = [0u8; 6];
        assert!(
            timeout(Duration::from_millis(300), second.read_exact(&mut greeting))
                .await
                .is_err()
        );

        // First client is still served normally
        first.write_all(b"req").await.unwrap();
        assert_response_shape(&read_line(&mut first).await);

        first.write_all(b"end").await.unwrap();
        assert_closed_silently(&mut first).await;

        timeout(WAIT, second.read_exact(&mut greeting)).await.unwrap().unwrap();
        assert_eq!(&greeting, b"ready\n");

        server.abort();
    }

    #[tokio::test]
    async fn test_bind_conflict_reports_address() {
        let (addr, _, server) = start(EntropyQueue::new(4)).await;

        // A second listener on the same port fails while the first is listening
        let settings = ServerSettings {
            address: addr,
            backlog: 1,
            accept_pacing: Duration::from_millis(10),
        };
        match ProtocolServer::bind(settings, EntropyQueue::new(4), Metrics::new()).await {
            Err(e @ Error::Bind { .. }) => assert!(e.is_retryable()),
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("second bind succeeded"),
        }

        server.abort();
    }
}
