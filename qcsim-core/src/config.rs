//! Configuration management for the feeder and the receiver

use crate::level::ControlLevel;
use crate::transport::TransportConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// How the local receiver answers each message
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReplyMode {
    /// HL7 ACK carrying the message control id
    Ack,
    /// Send the received frame back unchanged
    Echo,
}

impl Default for ReplyMode {
    fn default() -> Self {
        Self::Ack
    }
}

impl ReplyMode {
    /// Parse from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ack" => Some(Self::Ack),
            "echo" => Some(Self::Echo),
            _ => None,
        }
    }
}

/// QC feeder configuration
///
/// Every knob is a flat scalar so the whole thing maps onto `QCSIM_*` variables.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeederConfig {
    /// Middleware host
    #[serde(default = "default_host")]
    pub host: String,

    /// Middleware MLLP port
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_level1_tag")]
    pub level1_tag: String,
    #[serde(default = "default_level1_mean")]
    pub level1_mean: f64,
    #[serde(default = "default_level1_sd")]
    pub level1_sd: f64,
    #[serde(default = "default_level1_lot")]
    pub level1_lot: String,

    #[serde(default = "default_level2_tag")]
    pub level2_tag: String,
    #[serde(default = "default_level2_mean")]
    pub level2_mean: f64,
    #[serde(default = "default_level2_sd")]
    pub level2_sd: f64,
    #[serde(default = "default_level2_lot")]
    pub level2_lot: String,

    /// RNG seed; `None` draws a fresh one per run
    #[serde(default = "default_seed")]
    pub seed: Option<u64>,

    /// Measurements generated per level
    #[serde(default = "default_count_per_level")]
    pub count_per_level: usize,

    /// Delay between successive sends in milliseconds
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Run each level's stream concurrently
    #[serde(default)]
    pub parallel_levels: bool,

    /// How far back an export's timeline starts
    #[serde(default = "default_backfill_days")]
    pub backfill_days: u32,
}

impl Default for FeederConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            level1_tag: default_level1_tag(),
            level1_mean: default_level1_mean(),
            level1_sd: default_level1_sd(),
            level1_lot: default_level1_lot(),
            level2_tag: default_level2_tag(),
            level2_mean: default_level2_mean(),
            level2_sd: default_level2_sd(),
            level2_lot: default_level2_lot(),
            seed: default_seed(),
            count_per_level: default_count_per_level(),
            pacing_ms: default_pacing_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            parallel_levels: false,
            backfill_days: default_backfill_days(),
        }
    }
}

impl FeederConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config: Self = envy::prefixed("QCSIM_")
            .from_env()
            .map_err(|e| Error::Config(format!("Failed to parse environment variables: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host cannot be empty".to_string()));
        }

        if self.port == 0 {
            return Err(Error::Config("port must be > 0".to_string()));
        }

        if self.count_per_level == 0 {
            return Err(Error::Config("count_per_level must be > 0".to_string()));
        }

        if self.connect_timeout_ms == 0 || self.response_timeout_ms == 0 {
            return Err(Error::Config("timeouts must be > 0".to_string()));
        }

        if self.level1_tag == self.level2_tag {
            return Err(Error::Config(format!(
                "level tags must differ, both are '{}'",
                self.level1_tag
            )));
        }

        // Statistical parameters fail as generation errors.
        self.levels()?;
        Ok(())
    }

    /// Control levels in configuration order
    pub fn levels(&self) -> Result<Vec<Arc<ControlLevel>>> {
        Ok(vec![
            Arc::new(ControlLevel::new(
                self.level1_tag.clone(),
                self.level1_mean,
                self.level1_sd,
                self.level1_lot.clone(),
            )?),
            Arc::new(ControlLevel::new(
                self.level2_tag.clone(),
                self.level2_mean,
                self.level2_sd,
                self.level2_lot.clone(),
            )?),
        ])
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            response_timeout: Duration::from_millis(self.response_timeout_ms),
            ..TransportConfig::default()
        }
    }
}

/// Local MLLP receiver configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReceiverConfig {
    /// Bind address for the MLLP listener
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    #[serde(default)]
    pub reply_mode: ReplyMode,

    /// Largest accepted payload in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            reply_mode: ReplyMode::default(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl ReceiverConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config: Self = envy::prefixed("QCSIM_")
            .from_env()
            .map_err(|e| Error::Config(format!("Failed to parse environment variables: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.listen_address
            .parse::<SocketAddr>()
            .map_err(|e| Error::Config(format!("Invalid listen_address: {}", e)))?;

        if self.max_frame_size == 0 {
            return Err(Error::Config("max_frame_size must be > 0".to_string()));
        }
        Ok(())
    }
}

// Default value functions
fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5335
}

fn default_level1_tag() -> String {
    "I".to_string()
}

fn default_level1_mean() -> f64 {
    9.70
}

fn default_level1_sd() -> f64 {
    0.39
}

fn default_level1_lot() -> String {
    "003980".to_string()
}

fn default_level2_tag() -> String {
    "II".to_string()
}

fn default_level2_mean() -> f64 {
    13.90
}

fn default_level2_sd() -> f64 {
    0.60
}

fn default_level2_lot() -> String {
    "004057".to_string()
}

fn default_seed() -> Option<u64> {
    Some(42)
}

fn default_count_per_level() -> usize {
    20
}

fn default_pacing_ms() -> u64 {
    1000 // one message per second
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_response_timeout_ms() -> u64 {
    10_000
}

fn default_backfill_days() -> u32 {
    crate::timeline::DEFAULT_BACKFILL_DAYS
}

fn default_listen_address() -> String {
    "127.0.0.1:5335".to_string()
}

fn default_max_frame_size() -> usize {
    crate::mllp::DEFAULT_MAX_FRAME_SIZE
}
