// SPDX-License-Identifier: MIT
//
// QC HL7 Simulator: Analyzer-to-Middleware Quality Control Feed
// Copyright (c) 2026 QC Simulator Contributors

//! Local MLLP receiver standing in for the middleware
//!
//! Accepts any number of connections, decodes frames with [`MllpCodec`] and answers each
//! one with an HL7 ACK or an unchanged echo.

use std::future::Future;
use std::net::SocketAddr;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::config::{ReceiverConfig, ReplyMode};
use crate::hl7::{self, Hl7Timestamp, ObservationFields};
use crate::metrics::Metrics;
use crate::mllp::MllpCodec;
use crate::Result;

pub struct Receiver {
    listener: TcpListener,
    config: ReceiverConfig,
    metrics: Metrics,
}

impl Receiver {
    /// Validate `config` and bind the listener
    pub async fn bind(config: ReceiverConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(&config.listen_address).await?;
        info!(
            "MLLP receiver listening on {} ({:?} mode)",
            listener.local_addr()?,
            config.reply_mode
        );

        Ok(Self {
            listener,
            config,
            metrics: Metrics::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Serve until `shutdown` completes; in-flight connections finish on their own
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(
                        "Receiver stopping: {} frames received, {} rejected",
                        self.metrics.frames_received(),
                        self.metrics.frames_rejected()
                    );
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let codec = MllpCodec::with_max_frame_size(self.config.max_frame_size);
                        let mode = self.config.reply_mode;
                        let metrics = self.metrics.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, peer, codec, mode, metrics).await;
                        });
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                },
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    codec: MllpCodec,
    mode: ReplyMode,
    metrics: Metrics,
) {
    debug!("Connection from {}", peer);
    let mut framed = Framed::new(stream, codec);

    while let Some(frame) = framed.next().await {
        let payload = match frame {
            Ok(payload) => payload,
            Err(e) => {
                metrics.record_frame_rejected();
                warn!("Dropping connection from {}: {}", peer, e);
                break;
            }
        };
        metrics.record_frame();

        let text = String::from_utf8_lossy(&payload);
        match ObservationFields::extract(&text) {
            Some(fields) => info!(
                control_id = %fields.control_id,
                "Received {} = {:.2} at {}",
                fields.sample_id,
                fields.value,
                fields.timestamp
            ),
            None => warn!("Received {} bytes from {} without an observation", payload.len(), peer),
        }

        let reply = match mode {
            ReplyMode::Echo => payload.clone(),
            ReplyMode::Ack => Bytes::from(hl7::encode_ack(&text, &Hl7Timestamp::now())),
        };
        if let Err(e) = framed.send(reply).await {
            warn!("Reply to {} failed: {}", peer, e);
            break;
        }
    }

    debug!("Connection from {} closed", peer);
}
