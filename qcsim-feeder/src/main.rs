// SPDX-License-Identifier: MIT
//
// QC HL7 Simulator: Analyzer-to-Middleware Quality Control Feed
// Copyright (c) 2026 QC Simulator Contributors

//! QC Feeder - Analyzer-side Component of the QC Simulator
//!
//! Plays the part of a chemistry analyzer running daily quality control. For each control
//! level it draws a series of measurements, renders every one as an HL7 OUL^R22 message and
//! delivers it to the middleware over MLLP.
//!
//! # Commands
//!
//! - `send`: live feed, one connection per message, paced
//! - `export`: the same values as backfilled raw QC result rows (JSON lines)
//!
//! Configuration comes from a YAML file (`--config`) or from `QCSIM_*` environment
//! variables, with command-line overrides on top.

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use qcsim_core::{
    config::FeederConfig,
    export::{backfill_records, write_json_lines},
    timeline::Timeline,
    Feeder,
};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "qcsim-feeder")]
#[command(about = "QC Feeder - Sends simulated analyzer QC results over HL7/MLLP", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, default_value = "false", global = true)]
    json: bool,

    /// Path to a YAML configuration file (environment variables are used otherwise)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send the QC feed to the middleware
    Send,

    /// Write backfilled QC result rows as JSON lines
    Export {
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Days the backfill reaches into the past
        #[arg(long)]
        days: Option<u32>,
    },
}

#[derive(ClapArgs, Debug)]
struct Overrides {
    /// Middleware host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Middleware MLLP port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// RNG seed
    #[arg(long, global = true, conflicts_with = "random_seed")]
    seed: Option<u64>,

    /// Draw a fresh seed instead of the configured one
    #[arg(long, global = true)]
    random_seed: bool,

    /// Measurements per control level
    #[arg(long, global = true)]
    count: Option<usize>,

    /// Delay between messages in milliseconds
    #[arg(long, global = true)]
    pacing_ms: Option<u64>,

    /// Run control levels concurrently
    #[arg(long, global = true)]
    parallel: bool,
}

impl Overrides {
    fn apply(&self, config: &mut FeederConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.random_seed {
            config.seed = None;
        } else if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(count) = self.count {
            config.count_per_level = count;
        }
        if let Some(pacing_ms) = self.pacing_ms {
            config.pacing_ms = pacing_ms;
        }
        if self.parallel {
            config.parallel_levels = true;
        }
    }
}

fn load_config(args: &Args) -> Result<FeederConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from file: {:?}", path);
            FeederConfig::from_file(path).context("Failed to load configuration from file")?
        }
        None => {
            info!("Loading configuration from environment variables");
            FeederConfig::from_env().context("Failed to load configuration from environment")?
        }
    };

    args.overrides.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn send(config: FeederConfig) -> Result<()> {
    let feeder = Feeder::new(&config).context("Failed to initialise feeder")?;
    info!("Seed: {}", feeder.seed());

    let cancel = CancellationToken::new();
    let feeder = feeder.with_cancellation(cancel.clone());
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received, stopping after the current message");
            cancel.cancel();
        }
    });

    let report = feeder.run().await.context("QC feed aborted");
    interrupt.abort();
    let report = report?;

    for level in &report.levels {
        println!("QC {}", level.level);
        for outcome in &level.outcomes {
            println!("  {}", outcome);
        }
    }
    println!("{}", report);

    if report.interrupted {
        warn!("Run interrupted before every message was sent");
    }
    if !report.is_clean() {
        warn!("{} message(s) were not delivered", report.total_failed());
    }
    Ok(())
}

fn export(config: FeederConfig, output: Option<PathBuf>, days: Option<u32>) -> Result<()> {
    let seed = config.seed.unwrap_or_else(rand::random);
    let days = days.unwrap_or(config.backfill_days);
    let levels = config.levels()?;
    let timeline = Timeline::backfill_days_ago(days);

    info!("Backfilling {} day(s) per level with seed {}", days, seed);
    let records = backfill_records(&levels, seed, config.count_per_level, &timeline)
        .context("Failed to generate QC records")?;

    let written = match output {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            write_json_lines(&records, BufWriter::new(file))?
        }
        None => write_json_lines(&records, io::stdout().lock())?,
    };

    info!("Wrote {} record(s)", written);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Initialize tracing; logs go to stderr so exports on stdout stay clean
    let log_level = args
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(io::stderr);
    if args.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("QC Feeder v{}", qcsim_core::VERSION);

    let config = load_config(&args)?;
    match args.command {
        Command::Send => send(config).await,
        Command::Export { output, days } => export(config, output, days),
    }
}
