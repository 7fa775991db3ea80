// SPDX-License-Identifier: MIT
//
// QC HL7 Simulator: Analyzer-to-Middleware Quality Control Feed
// Copyright (c) 2026 QC Simulator Contributors

//! QC Simulator Core Library
//!
//! Emulates a clinical chemistry analyzer pushing internal quality-control results to a
//! laboratory middleware. Values are drawn around each control level's target, rendered as
//! HL7 v2.5.1 OUL^R22 observations and delivered over MLLP, one connection per message.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐  value   ┌─────────────┐  text   ┌─────────────┐  MLLP/TCP  ┌────────────┐
//! │  Generator  │ ────────>│    HL7      │ ───────>│  Transport  │ ──────────>│ Middleware │
//! │ (per level) │          │  (OUL^R22)  │         │ (1 conn/msg)│ <───────── │ / receiver │
//! └─────────────┘          └─────────────┘         └─────────────┘    ACK     └────────────┘
//! ```
//!
//! Modules:
//! - `level`: control levels and Westgard-style bands
//! - `generator`: seeded three-tier value generator
//! - `hl7`: OUL^R22 rendering, field extraction and ACKs
//! - `mllp`: framing helpers and the tokio-util codec
//! - `transport`: single-shot MLLP client session
//! - `timeline`: live and backfilled timestamps
//! - `feeder`: the generate → encode → send pipeline
//! - `export`: backfilled raw QC result rows as JSON lines
//! - `receiver`: local MLLP endpoint for exercising the feeder
//! - `config`, `metrics`, `error`: ambient plumbing

pub mod config;
pub mod error;
pub mod export;
pub mod feeder;
pub mod generator;
pub mod hl7;
pub mod level;
pub mod metrics;
pub mod mllp;
pub mod receiver;
pub mod timeline;
pub mod transport;

pub use error::{Error, Result, TransportError};
pub use feeder::{Feeder, RunReport};
pub use level::{ControlBand, ControlLevel, Measurement};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
