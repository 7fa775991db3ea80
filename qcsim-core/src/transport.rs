// SPDX-License-Identifier: MIT
//
// QC HL7 Simulator: Analyzer-to-Middleware Quality Control Feed
// Copyright (c) 2026 QC Simulator Contributors

//! Single-shot MLLP client
//!
//! Every message gets its own TCP connection, the way bench analyzers talk to laboratory
//! middleware:
//!
//! ```text
//! Idle ─> Connecting ─> Connected ─> Sending ─> AwaitingResponse ─> Closed
//!              │                        │              │
//!              └────────── failure ─────┴──────────────┴──────────> Closed
//! ```
//!
//! Connections are never pooled or reused. Connect and response waits are bounded.

use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument, trace};

use crate::error::TransportError;
use crate::mllp;

/// Lifecycle of one MLLP session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Sending,
    AwaitingResponse,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Sending => "sending",
            Self::AwaitingResponse => "awaiting response",
            Self::Closed => "closed",
        })
    }
}

/// Client timeouts and read sizing
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
    /// Size of the single response read
    pub read_buffer_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(10),
            read_buffer_size: 4096,
        }
    }
}

/// What came back from the receiver
#[derive(Debug, Clone)]
pub struct Response {
    /// Raw bytes of the first read, framing included
    pub bytes: Bytes,
    /// Connect to first response byte
    pub elapsed: Duration,
}

impl Response {
    /// Response payload with MLLP framing removed when it is a single complete frame
    pub fn payload(&self) -> &[u8] {
        mllp::unwrap(&self.bytes).unwrap_or(&self.bytes)
    }
}

/// MLLP sender opening one connection per message
#[derive(Debug, Clone, Default)]
pub struct MllpClient {
    config: TransportConfig,
}

impl MllpClient {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Frame `message`, deliver it over a fresh connection and return the first response
    #[instrument(skip(self, message), fields(bytes = message.len()))]
    pub async fn send(
        &self,
        message: &str,
        host: &str,
        port: u16,
    ) -> std::result::Result<Response, TransportError> {
        let frame = mllp::wrap(message.as_bytes());
        let mut session = Session::new(&self.config);
        let result = session.exchange(&frame, host, port).await;
        session.transition(SessionState::Closed);
        result
    }
}

/// State tracking for one connection
struct Session<'a> {
    config: &'a TransportConfig,
    state: SessionState,
}

impl<'a> Session<'a> {
    fn new(config: &'a TransportConfig) -> Self {
        Self {
            config,
            state: SessionState::Idle,
        }
    }

    fn transition(&mut self, next: SessionState) {
        trace!("MLLP session {} -> {}", self.state, next);
        self.state = next;
    }

    async fn exchange(
        &mut self,
        frame: &[u8],
        host: &str,
        port: u16,
    ) -> std::result::Result<Response, TransportError> {
        let started = Instant::now();

        self.transition(SessionState::Connecting);
        let addr = format!("{}:{}", host, port);
        let mut stream =
            match timeout(self.config.connect_timeout, TcpStream::connect(&addr)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(source)) => return Err(TransportError::Connect { addr, source }),
                Err(_) => {
                    return Err(TransportError::Timeout {
                        phase: SessionState::Connecting,
                        after: self.config.connect_timeout,
                    })
                }
            };
        self.transition(SessionState::Connected);
        debug!("Connected to {}", addr);

        let result = self.converse(&mut stream, frame).await;

        // The connection never outlives its message.
        if let Err(e) = stream.shutdown().await {
            trace!("Ignoring shutdown error: {}", e);
        }

        result.map(|bytes| Response {
            bytes,
            elapsed: started.elapsed(),
        })
    }

    async fn converse(
        &mut self,
        stream: &mut TcpStream,
        frame: &[u8],
    ) -> std::result::Result<Bytes, TransportError> {
        self.transition(SessionState::Sending);
        stream.write_all(frame).await.map_err(TransportError::Write)?;
        stream.flush().await.map_err(TransportError::Write)?;

        self.transition(SessionState::AwaitingResponse);
        let mut buf = vec![0u8; self.config.read_buffer_size.max(1)];
        let read = match timeout(self.config.response_timeout, stream.read(&mut buf)).await {
            Ok(Ok(0)) => return Err(TransportError::NoResponse),
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(TransportError::Read(e)),
            Err(_) => {
                return Err(TransportError::Timeout {
                    phase: SessionState::AwaitingResponse,
                    after: self.config.response_timeout,
                })
            }
        };
        buf.truncate(read);

        debug!("Received {} response bytes", read);
        Ok(Bytes::from(buf))
    }
}
