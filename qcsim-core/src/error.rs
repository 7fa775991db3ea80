// SPDX-License-Identifier: MIT
//
// QC HL7 Simulator: Analyzer-to-Middleware Quality Control Feed
// Copyright (c) 2026 QC Simulator Contributors

//! Error types for the QC simulator
//!
//! Provides a unified error taxonomy using `thiserror`. Generation and encoding errors are
//! programmer errors and abort a run; transport errors are expected at runtime and are
//! recorded per message.

use std::time::Duration;

use crate::transport::SessionState;

pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for simulator operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid statistical parameters for value generation
    #[error("Generation error: {0}")]
    Generation(String),

    /// HL7 rendering received a malformed identifier
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Per-message MLLP transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// MLLP stream framing violated
    #[error("Framing error: {0}")]
    Framing(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of one MLLP session
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("timed out after {after:?} while {phase}")]
    Timeout { phase: SessionState, after: Duration },

    #[error("peer closed the connection without responding")]
    NoResponse,
}

impl TransportError {
    /// Session phase in which the failure happened
    pub fn phase(&self) -> SessionState {
        match self {
            TransportError::Connect { .. } => SessionState::Connecting,
            TransportError::Write(_) => SessionState::Sending,
            TransportError::Read(_) | TransportError::NoResponse => {
                SessionState::AwaitingResponse
            }
            TransportError::Timeout { phase, .. } => *phase,
        }
    }
}

// Conversions for common error types
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
