// SPDX-License-Identifier: MIT
//
// QC HL7 Simulator: Analyzer-to-Middleware Quality Control Feed
// Copyright (c) 2026 QC Simulator Contributors

//! QC Receiver - Middleware Stand-in for the QC Simulator
//!
//! Listens for MLLP connections, logs every QC observation it decodes and answers with an
//! HL7 ACK (or echoes the frame back), so the feeder can be exercised without a real
//! laboratory middleware.

use anyhow::{Context, Result};
use clap::Parser;
use qcsim_core::{
    config::{ReceiverConfig, ReplyMode},
    receiver::Receiver,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "qcsim-receiver")]
#[command(about = "QC Receiver - Acknowledges HL7 QC messages over MLLP", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, default_value = "false")]
    json: bool,

    /// Bind address (overrides QCSIM_LISTEN_ADDRESS)
    #[arg(long)]
    listen: Option<String>,

    /// Reply mode: ack or echo (overrides QCSIM_REPLY_MODE)
    #[arg(long)]
    reply: Option<String>,
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use futures::stream::StreamExt;
        use signal_hook::consts::signal::*;
        use signal_hook_tokio::Signals;

        match Signals::new([SIGINT, SIGTERM]) {
            Ok(mut signals) => {
                if let Some(signal) = signals.next().await {
                    info!("Received signal: {:?}", signal);
                }
            }
            Err(e) => {
                tracing::error!("Failed to register signal handlers: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }

    #[cfg(windows)]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C signal");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let log_level = args
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true);
    if args.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("QC Receiver v{}", qcsim_core::VERSION);

    info!("Loading configuration from environment variables");
    let mut config =
        ReceiverConfig::from_env().context("Failed to load configuration from environment")?;
    if let Some(listen) = args.listen {
        config.listen_address = listen;
    }
    if let Some(reply) = args.reply.as_deref() {
        config.reply_mode = ReplyMode::parse(reply)
            .with_context(|| format!("Unknown reply mode '{}', expected ack or echo", reply))?;
    }

    let receiver = Receiver::bind(config)
        .await
        .context("Failed to start MLLP receiver")?;
    receiver.run_until(wait_for_shutdown()).await?;

    info!("Receiver stopped");
    Ok(())
}
