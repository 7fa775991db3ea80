// SPDX-License-Identifier: MIT
//
// QC HL7 Simulator: Analyzer-to-Middleware Quality Control Feed
// Copyright (c) 2026 QC Simulator Contributors

//! QC feed pipeline: generate → encode → send, one message at a time
//!
//! Generation and encoding failures abort the run. Transport failures are recorded against
//! the message index and the run moves on, since every message is independent. Cancelling
//! the feeder's token stops the run between messages and still yields a report.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::FeederConfig;
use crate::error::TransportError;
use crate::generator::ValueGenerator;
use crate::hl7;
use crate::level::{ControlBand, ControlLevel, Measurement};
use crate::metrics::Metrics;
use crate::timeline::Timeline;
use crate::transport::{MllpClient, Response};
use crate::Result;

/// Spaces out successive sends
#[derive(Debug)]
pub struct Pacer {
    delay: Duration,
    primed: bool,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            primed: false,
        }
    }

    /// Returns immediately the first time, then sleeps `delay` before each later send
    pub async fn wait(&mut self) {
        if self.primed && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.primed = true;
    }
}

/// Result of one message
#[derive(Debug)]
pub struct MessageOutcome {
    pub measurement: Measurement,
    pub control_id: Uuid,
    /// Number of messages in this level's stream
    pub total: usize,
    pub delivery: std::result::Result<Response, TransportError>,
}

impl MessageOutcome {
    pub fn is_delivered(&self) -> bool {
        self.delivery.is_ok()
    }

    pub fn band(&self) -> ControlBand {
        self.measurement.band()
    }
}

impl fmt::Display for MessageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message {:2}/{} - Value: {:6.2} - Error: {:+5.2} SD - {}",
            self.measurement.index + 1,
            self.total,
            self.measurement.value,
            self.measurement.deviation(),
            self.band(),
        )?;
        match &self.delivery {
            Ok(response) => write!(
                f,
                " - sent ({} response bytes in {} ms)",
                response.bytes.len(),
                response.elapsed.as_millis()
            ),
            Err(e) => write!(f, " - FAILED: {}", e),
        }
    }
}

/// Outcomes for one control level
#[derive(Debug)]
pub struct LevelReport {
    pub level: Arc<ControlLevel>,
    pub outcomes: Vec<MessageOutcome>,
}

impl LevelReport {
    pub fn sent(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_delivered()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.sent()
    }

    /// 0-based indices whose delivery failed
    pub fn failed_indices(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter(|o| !o.is_delivered())
            .map(|o| o.measurement.index)
            .collect()
    }

    pub fn band_count(&self, band: ControlBand) -> usize {
        self.outcomes.iter().filter(|o| o.band() == band).count()
    }
}

/// Whole-run summary
#[derive(Debug)]
pub struct RunReport {
    pub seed: u64,
    pub levels: Vec<LevelReport>,
    /// Response latency percentiles in microseconds
    pub latency_p50: Option<u64>,
    pub latency_p95: Option<u64>,
    /// Stopped by cancellation before every message was sent
    pub interrupted: bool,
}

impl RunReport {
    pub fn total_sent(&self) -> usize {
        self.levels.iter().map(LevelReport::sent).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.levels.iter().map(LevelReport::failed).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.total_failed() == 0
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Run summary (seed {})", self.seed)?;
        if self.interrupted {
            write!(f, " - interrupted")?;
        }
        writeln!(f)?;
        for report in &self.levels {
            write!(
                f,
                "  Level {} (Lot: {}): {} sent, {} failed [{} in control, {} warning, {} reject]",
                report.level.tag(),
                report.level.lot_number(),
                report.sent(),
                report.failed(),
                report.band_count(ControlBand::InControl),
                report.band_count(ControlBand::Warning),
                report.band_count(ControlBand::Reject),
            )?;
            let failed = report.failed_indices();
            if !failed.is_empty() {
                let list: Vec<String> = failed.iter().map(|i| (i + 1).to_string()).collect();
                write!(f, " - failed messages: {}", list.join(", "))?;
            }
            writeln!(f)?;
        }
        write!(f, "  Total: {} sent, {} failed", self.total_sent(), self.total_failed())?;
        if let (Some(p50), Some(p95)) = (self.latency_p50, self.latency_p95) {
            write!(f, " - latency p50 {} µs, p95 {} µs", p50, p95)?;
        }
        Ok(())
    }
}

/// Drives the QC feed against one MLLP endpoint
pub struct Feeder {
    host: String,
    port: u16,
    levels: Vec<Arc<ControlLevel>>,
    count_per_level: usize,
    seed: u64,
    pacing: Duration,
    parallel_levels: bool,
    client: MllpClient,
    metrics: Metrics,
    cancel: CancellationToken,
}

impl Feeder {
    /// Build a feeder, drawing a seed when none is configured
    pub fn new(config: &FeederConfig) -> Result<Self> {
        config.validate()?;
        let seed = config.seed.unwrap_or_else(rand::random);

        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            levels: config.levels()?,
            count_per_level: config.count_per_level,
            seed,
            pacing: config.pacing(),
            parallel_levels: config.parallel_levels,
            client: MllpClient::new(config.transport()),
            metrics: Metrics::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Stop between messages once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Send every level's stream and collect the outcomes
    pub async fn run(&self) -> Result<RunReport> {
        info!(
            "Feeding {} message(s) per level to {}:{} (seed {})",
            self.count_per_level, self.host, self.port, self.seed
        );

        let levels = if self.parallel_levels {
            let streams = self.levels.iter().enumerate().map(|(position, level)| {
                let level = Arc::clone(level);
                async move {
                    let mut pacer = Pacer::new(self.pacing);
                    self.run_level(position as u64, level, &mut pacer).await
                }
            });
            try_join_all(streams).await?
        } else {
            let mut pacer = Pacer::new(self.pacing);
            let mut reports = Vec::with_capacity(self.levels.len());
            for (position, level) in self.levels.iter().enumerate() {
                reports.push(
                    self.run_level(position as u64, Arc::clone(level), &mut pacer)
                        .await?,
                );
            }
            reports
        };

        let interrupted = levels
            .iter()
            .any(|report| report.outcomes.len() < self.count_per_level);

        Ok(RunReport {
            seed: self.seed,
            levels,
            latency_p50: self.metrics.latency_p50(),
            latency_p95: self.metrics.latency_p95(),
            interrupted,
        })
    }

    async fn run_level(
        &self,
        stream: u64,
        level: Arc<ControlLevel>,
        pacer: &mut Pacer,
    ) -> Result<LevelReport> {
        info!("Sending QC {} - {} measurements", level, self.count_per_level);

        let mut generator = ValueGenerator::for_stream(self.seed, stream);
        let mut outcomes = Vec::with_capacity(self.count_per_level);

        for index in 0..self.count_per_level {
            let value = generator.generate(level.mean(), level.sd())?;
            let measurement = Measurement {
                index,
                value,
                level: Arc::clone(&level),
            };

            let cancelled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => true,
                _ = pacer.wait() => false,
            };
            if cancelled {
                info!("QC {} stopped after {} message(s)", level.tag(), outcomes.len());
                break;
            }

            let timestamp = Timeline::Live.timestamp_for(index);
            let message = hl7::encode_measurement(&measurement, &timestamp);
            let delivery = self.client.send(message.text(), &self.host, self.port).await;

            match &delivery {
                Ok(response) => self
                    .metrics
                    .record_send(message.as_bytes().len(), response.elapsed.as_micros() as u64),
                Err(_) => self.metrics.record_send_failure(),
            }

            let outcome = MessageOutcome {
                measurement,
                control_id: message.control_id(),
                total: self.count_per_level,
                delivery,
            };
            if outcome.is_delivered() {
                info!(level = %level.tag(), control_id = %outcome.control_id, "{}", outcome);
            } else {
                warn!(level = %level.tag(), control_id = %outcome.control_id, "{}", outcome);
            }
            outcomes.push(outcome);
        }

        Ok(LevelReport { level, outcomes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_pacer_skips_first_wait() {
        let mut pacer = Pacer::new(Duration::from_millis(40));
        let started = Instant::now();
        pacer.wait().await;
        assert!(started.elapsed() < Duration::from_millis(40));
        pacer.wait().await;
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_configured_seed_is_used() {
        let feeder = Feeder::new(&FeederConfig::default()).unwrap();
        assert_eq!(feeder.seed(), 42);
    }

    #[tokio::test]
    async fn test_cancelled_run_sends_nothing_and_reports() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let feeder = Feeder::new(&FeederConfig::default())
            .unwrap()
            .with_cancellation(cancel);

        let report = feeder.run().await.unwrap();
        assert!(report.interrupted);
        assert_eq!(report.levels.len(), 2);
        assert!(report.levels.iter().all(|level| level.outcomes.is_empty()));
        assert_eq!(feeder.metrics().messages_failed(), 0);
        assert!(report.to_string().starts_with("Run summary (seed 42) - interrupted"));
    }

    #[test]
    fn test_invalid_levels_abort_construction() {
        let config = FeederConfig {
            level1_sd: -1.0,
            ..Default::default()
        };
        assert!(Feeder::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_records_every_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = FeederConfig {
            host: "127.0.0.1".to_string(),
            port,
            count_per_level: 3,
            pacing_ms: 0,
            ..Default::default()
        };
        let feeder = Feeder::new(&config).unwrap();
        let report = feeder.run().await.unwrap();

        assert_eq!(report.total_sent(), 0);
        assert_eq!(report.total_failed(), 6);
        assert_eq!(report.levels[0].failed_indices(), vec![0, 1, 2]);
        assert_eq!(feeder.metrics().messages_failed(), 6);
        assert!(report.to_string().contains("failed messages: 1, 2, 3"));
    }
}
