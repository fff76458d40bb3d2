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

//! Per-client connection state machine
//!
//! The transport driver turns socket activity into [`ConnectionEvent`]s and
//! feeds them through [`Connection::handle`]. The connection answers with
//! [`Action`]s for the driver to carry out, in order. No I/O happens here,
//! which keeps the protocol logic testable without sockets.

use crate::metrics::Metrics;
use crate::protocol::{parse_commands, Command, SampleResponse, BUFFER_SIZE, GREETING};
use crate::queue::EntropyQueue;
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use tracing::{debug, info, warn};

/// Identity of an accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Transport failure reported to a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The connection was already aborted; teardown has happened
    Aborted,
    /// Any other socket failure
    Io(io::ErrorKind),
}

impl From<&io::Error> for TransportError {
    fn from(e: &io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionAborted => Self::Aborted,
            kind => Self::Io(kind),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aborted => write!(f, "connection aborted"),
            Self::Io(kind) => write!(f, "{}", kind),
        }
    }
}

/// Events delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The client was accepted
    Accepted,
    /// One delivery of client bytes
    DataReceived(Bytes),
    /// The transport flushed this many bytes of the pending write
    SendCompleted(usize),
    /// The transport failed
    Error(TransportError),
    /// The client closed its side
    PeerClosed,
}

/// Why a connection is being closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent `end`
    ClientEnd,
    /// Client sent an unknown or truncated command
    Malformed,
    /// Client closed its side
    PeerClosed,
    /// Socket failure
    Transport(TransportError),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientEnd => write!(f, "client end"),
            Self::Malformed => write!(f, "malformed command"),
            Self::PeerClosed => write!(f, "peer closed"),
            Self::Transport(e) => write!(f, "transport error: {}", e),
        }
    }
}

/// Work the driver must perform for the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write these bytes to the client as one buffered send
    Send(Bytes),
    /// Close the connection (graceful first, abort on failure)
    Close(CloseReason),
}

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Created, greeting not yet sent
    Pending,
    /// Greeted and serving commands
    Connected,
    /// A close was requested; only send completions are still accounted
    Closing(CloseReason),
    /// Torn down
    Closed,
}

/// Session state of the single active client
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    phase: ConnectionPhase,
    queue: EntropyQueue,
    metrics: Metrics,
    send_buffer: BytesMut,
    recv_buffer: BytesMut,
    to_send_len: usize,
    sent_len: usize,
    recv_len: usize,
}

impl Connection {
    pub fn new(id: ConnectionId, peer: SocketAddr, queue: EntropyQueue, metrics: Metrics) -> Self {
        Self {
            id,
            peer,
            phase: ConnectionPhase::Pending,
            queue,
            metrics,
            send_buffer: BytesMut::with_capacity(BUFFER_SIZE),
            recv_buffer: BytesMut::with_capacity(BUFFER_SIZE),
            to_send_len: 0,
            sent_len: 0,
            recv_len: 0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Check if the connection has been fully torn down
    pub fn is_closed(&self) -> bool {
        self.phase == ConnectionPhase::Closed
    }

    /// Length of the last staged write
    pub fn to_send_len(&self) -> usize {
        self.to_send_len
    }

    /// Bytes of the last staged write reported as flushed
    pub fn sent_len(&self) -> usize {
        self.sent_len
    }

    /// Length of the last delivery
    pub fn recv_len(&self) -> usize {
        self.recv_len
    }

    /// Dispatch one transport event
    pub fn handle(&mut self, event: ConnectionEvent) -> Vec<Action> {
        match event {
            ConnectionEvent::Accepted => self.on_accepted(),
            ConnectionEvent::DataReceived(data) => self.on_data(&data),
            ConnectionEvent::SendCompleted(len) => {
                self.sent_len += len;
                debug!(connection = %self.id, len, sent = self.sent_len, "Send completed");
                Vec::new()
            }
            ConnectionEvent::Error(TransportError::Aborted) => {
                // Already torn down by the transport, no second close
                debug!(connection = %self.id, "Ignoring error on aborted connection");
                self.phase = ConnectionPhase::Closed;
                Vec::new()
            }
            ConnectionEvent::Error(e) => {
                warn!(connection = %self.id, "Transport error: {}", e);
                self.metrics.record_transport_error();
                self.close(CloseReason::Transport(e))
            }
            ConnectionEvent::PeerClosed => self.close(CloseReason::PeerClosed),
        }
    }

    /// Mark the connection torn down once the driver has closed or aborted it
    pub fn mark_closed(&mut self) {
        self.phase = ConnectionPhase::Closed;
    }

    fn on_accepted(&mut self) -> Vec<Action> {
        if self.phase != ConnectionPhase::Pending {
            return Vec::new();
        }
        info!(connection = %self.id, peer = %self.peer, "Client connected");
        self.phase = ConnectionPhase::Connected;
        vec![self.stage_send(GREETING)]
    }

    fn on_data(&mut self, data: &[u8]) -> Vec<Action> {
        if self.phase != ConnectionPhase::Connected {
            return Vec::new();
        }

        self.recv_len = data.len().min(BUFFER_SIZE);
        if self.recv_len < data.len() {
            warn!(
                connection = %self.id,
                "Delivery of {} bytes truncated to {}", data.len(), self.recv_len
            );
        }
        self.recv_buffer.clear();
        self.recv_buffer.extend_from_slice(&data[..self.recv_len]);
        let received = self.recv_buffer.split().freeze();

        let mut actions = Vec::new();
        for command in parse_commands(&received) {
            debug!(connection = %self.id, ?command, "Command");
            match command {
                Command::Request => {
                    let sample = self.queue.pop();
                    let response = SampleResponse::new(sample, self.queue.size());
                    self.metrics.record_request(sample.is_valid());
                    actions.push(self.stage_send(response.to_string().as_bytes()));
                }
                Command::End => {
                    actions.extend(self.close(CloseReason::ClientEnd));
                    break;
                }
                Command::Malformed => {
                    self.metrics.record_malformed();
                    actions.extend(self.close(CloseReason::Malformed));
                    break;
                }
            }
        }
        actions
    }

    /// Copy a message into the send buffer and hand it to the driver
    fn stage_send(&mut self, message: &[u8]) -> Action {
        self.to_send_len = message.len().min(BUFFER_SIZE);
        self.sent_len = 0;
        self.send_buffer.clear();
        self.send_buffer.extend_from_slice(&message[..self.to_send_len]);
        Action::Send(self.send_buffer.split().freeze())
    }

    fn close(&mut self, reason: CloseReason) -> Vec<Action> {
        match self.phase {
            ConnectionPhase::Closing(_) | ConnectionPhase::Closed => Vec::new(),
            _ => {
                info!(connection = %self.id, "Closing connection: {}", reason);
                self.phase = ConnectionPhase::Closing(reason);
                vec![Action::Close(reason)]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::RandomSample;

    fn connection(queue: &EntropyQueue) -> (Connection, Metrics) {
        let metrics = Metrics::new();
        let conn = Connection::new(
            ConnectionId(1),
            "127.0.0.1:40000".parse().unwrap(),
            queue.clone(),
            metrics.clone(),
        );
        (conn, metrics)
    }

    fn connected(queue: &EntropyQueue) -> (Connection, Metrics) {
        let (mut conn, metrics) = connection(queue);
        conn.handle(ConnectionEvent::Accepted);
        (conn, metrics)
    }

    fn data(bytes: &'static [u8]) -> ConnectionEvent {
        ConnectionEvent::DataReceived(Bytes::from_static(bytes))
    }

    #[test]
    fn test_accept_sends_greeting() {
        let queue = EntropyQueue::new(4);
        let (mut conn, _) = connection(&queue);

        let actions = conn.handle(ConnectionEvent::Accepted);
        assert_eq!(actions, vec![Action::Send(Bytes::from_static(b"ready\n"))]);
        assert_eq!(conn.phase(), ConnectionPhase::Connected);
        assert_eq!(conn.to_send_len(), 6);

        // A duplicate accept does not greet twice
        assert!(conn.handle(ConnectionEvent::Accepted).is_empty());
    }

    #[test]
    fn test_request_pops_sample() {
        let queue = EntropyQueue::new(4);
        queue.push(RandomSample::from_counter(41));
        queue.push(RandomSample::from_counter(77));
        let (mut conn, metrics) = connected(&queue);

        let actions = conn.handle(data(b"req"));
        assert_eq!(actions, vec![Action::Send(Bytes::from_static(b"9:41:1\n"))]);
        assert_eq!(queue.size(), 1);
        assert_eq!(metrics.requests_served(), 1);
        assert_eq!(conn.recv_len(), 3);
    }

    #[test]
    fn test_request_on_empty_queue() {
        let queue = EntropyQueue::new(4);
        let (mut conn, metrics) = connected(&queue);

        let actions = conn.handle(data(b"req"));
        assert_eq!(actions, vec![Action::Send(Bytes::from_static(b"16:0:0\n"))]);
        assert_eq!(metrics.empty_responses(), 1);
    }

    #[test]
    fn test_multiple_commands_in_one_delivery() {
        let queue = EntropyQueue::new(4);
        for counter in [1, 2, 3] {
            queue.push(RandomSample::from_counter(counter));
        }
        let (mut conn, _) = connected(&queue);

        let actions = conn.handle(data(b"reqreqendreq"));
        assert_eq!(
            actions,
            vec![
                Action::Send(Bytes::from_static(b"1:1:2\n")),
                Action::Send(Bytes::from_static(b"2:2:1\n")),
                Action::Close(CloseReason::ClientEnd),
            ]
        );
        // The trailing request after end is discarded
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn test_end_closes_without_reply() {
        let queue = EntropyQueue::new(4);
        let (mut conn, _) = connected(&queue);

        let actions = conn.handle(data(b"end"));
        assert_eq!(actions, vec![Action::Close(CloseReason::ClientEnd)]);
        assert_eq!(conn.phase(), ConnectionPhase::Closing(CloseReason::ClientEnd));

        // Nothing is served once closing
        assert!(conn.handle(data(b"req")).is_empty());
    }

    #[test]
    fn test_malformed_closes_without_reply() {
        let queue = EntropyQueue::new(4);
        let (mut conn, metrics) = connected(&queue);

        let actions = conn.handle(data(b"xyz"));
        assert_eq!(actions, vec![Action::Close(CloseReason::Malformed)]);
        assert_eq!(metrics.malformed_commands(), 1);
    }

    #[test]
    fn test_split_command_is_malformed() {
        let queue = EntropyQueue::new(4);
        queue.push(RandomSample::from_counter(5));
        let (mut conn, _) = connected(&queue);

        // "re" + "q" across two deliveries is not reassembled
        let actions = conn.handle(data(b"re"));
        assert_eq!(actions, vec![Action::Close(CloseReason::Malformed)]);
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn test_send_completion_accounting() {
        let queue = EntropyQueue::new(4);
        let (mut conn, _) = connected(&queue);

        assert!(conn.handle(ConnectionEvent::SendCompleted(4)).is_empty());
        assert!(conn.handle(ConnectionEvent::SendCompleted(2)).is_empty());
        assert_eq!(conn.sent_len(), 6);

        // A new send resets the counter
        conn.handle(data(b"req"));
        assert_eq!(conn.sent_len(), 0);
    }

    #[test]
    fn test_transport_error_closes() {
        let queue = EntropyQueue::new(4);
        let (mut conn, metrics) = connected(&queue);

        let error = TransportError::Io(io::ErrorKind::ConnectionReset);
        let actions = conn.handle(ConnectionEvent::Error(error));
        assert_eq!(actions, vec![Action::Close(CloseReason::Transport(error))]);
        assert_eq!(metrics.transport_errors(), 1);

        // A second error does not close twice
        assert!(conn.handle(ConnectionEvent::Error(error)).is_empty());
    }

    #[test]
    fn test_aborted_error_is_ignored() {
        let queue = EntropyQueue::new(4);
        let (mut conn, metrics) = connected(&queue);

        let actions = conn.handle(ConnectionEvent::Error(TransportError::Aborted));
        assert!(actions.is_empty());
        assert!(conn.is_closed());
        assert_eq!(metrics.transport_errors(), 0);
    }

    #[test]
    fn test_peer_closed() {
        let queue = EntropyQueue::new(4);
        let (mut conn, _) = connected(&queue);

        let actions = conn.handle(ConnectionEvent::PeerClosed);
        assert_eq!(actions, vec![Action::Close(CloseReason::PeerClosed)]);
        conn.mark_closed();
        assert!(conn.is_closed());
    }

    #[test]
    fn test_transport_error_classification() {
        let aborted = io::Error::new(io::ErrorKind::ConnectionAborted, "abrt");
        assert_eq!(TransportError::from(&aborted), TransportError::Aborted);

        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "rst");
        assert_eq!(
            TransportError::from(&reset),
            TransportError::Io(io::ErrorKind::ConnectionReset)
        );
    }
}
