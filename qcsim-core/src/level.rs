// SPDX-License-Identifier: MIT
//
// QC HL7 Simulator: Analyzer-to-Middleware Quality Control Feed
// Copyright (c) 2026 QC Simulator Contributors

//! Control levels, control bands and generated measurements

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Slack applied to band limits so that values sitting exactly on `mean ± k·sd` classify
/// into the lower band despite floating-point noise in the deviation.
const BAND_LIMIT_TOLERANCE: f64 = 1e-9;

/// Farthest a generated value may land from the mean, in SDs
pub const MAX_EXCURSION_SD: f64 = 4.0;

/// Reject targets the generator cannot draw from without leaving the finite range
pub fn check_target(mean: f64, sd: f64) -> Result<()> {
    if !mean.is_finite() {
        return Err(Error::Generation(format!("target mean must be finite, got {}", mean)));
    }
    if !sd.is_finite() || sd <= 0.0 {
        return Err(Error::Generation(format!(
            "target SD must be a positive finite number, got {}",
            sd
        )));
    }
    let reach = MAX_EXCURSION_SD * sd;
    if !(mean - reach).is_finite() || !(mean + reach).is_finite() {
        return Err(Error::Generation(format!(
            "target {} ± {} SD of {} overflows",
            mean, MAX_EXCURSION_SD, sd
        )));
    }
    Ok(())
}

/// One control material with its own target and lot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlLevel {
    tag: String,
    mean: f64,
    sd: f64,
    lot_number: String,
}

impl ControlLevel {
    /// Create a control level, rejecting parameters that cannot drive the generator
    pub fn new(
        tag: impl Into<String>,
        mean: f64,
        sd: f64,
        lot_number: impl Into<String>,
    ) -> Result<Self> {
        check_target(mean, sd)?;

        Ok(Self {
            tag: tag.into(),
            mean,
            sd,
            lot_number: lot_number.into(),
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn sd(&self) -> f64 {
        self.sd
    }

    pub fn lot_number(&self) -> &str {
        &self.lot_number
    }

    /// Signed distance from the target mean in SD units
    pub fn deviation(&self, value: f64) -> f64 {
        (value - self.mean) / self.sd
    }

    /// Westgard band of a value measured against this level
    pub fn classify(&self, value: f64) -> ControlBand {
        ControlBand::from_deviation(self.deviation(value))
    }
}

impl fmt::Display for ControlLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Level {} (Lot: {}) target {:.2} ± {:.2} SD",
            self.tag, self.lot_number, self.mean, self.sd
        )
    }
}

/// Westgard-style control band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlBand {
    /// Within ±2 SD
    InControl,
    /// Beyond ±2 SD up to ±3 SD
    Warning,
    /// Beyond ±3 SD
    Reject,
}

impl ControlBand {
    /// Classify a signed deviation expressed in SD units
    pub fn from_deviation(deviation: f64) -> Self {
        let distance = deviation.abs();
        if distance <= 2.0 + BAND_LIMIT_TOLERANCE {
            Self::InControl
        } else if distance <= 3.0 + BAND_LIMIT_TOLERANCE {
            Self::Warning
        } else {
            Self::Reject
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InControl => "In Control",
            Self::Warning => "Warning",
            Self::Reject => "Reject",
        }
    }
}

impl fmt::Display for ControlBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single generated QC value
#[derive(Debug, Clone)]
pub struct Measurement {
    /// Position in the level's sequence, starting at 0
    pub index: usize,
    /// Value rounded to 2 decimals
    pub value: f64,
    pub level: Arc<ControlLevel>,
}

impl Measurement {
    pub fn deviation(&self) -> f64 {
        self.level.deviation(self.value)
    }

    pub fn band(&self) -> ControlBand {
        self.level.classify(self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level_one() -> ControlLevel {
        ControlLevel::new("I", 9.70, 0.39, "003980").unwrap()
    }

    #[test]
    fn test_rejects_non_positive_sd() {
        assert!(matches!(
            ControlLevel::new("I", 9.70, 0.0, "003980"),
            Err(Error::Generation(_))
        ));
        assert!(ControlLevel::new("I", 9.70, -0.39, "003980").is_err());
        assert!(ControlLevel::new("I", 9.70, f64::NAN, "003980").is_err());
        assert!(ControlLevel::new("I", f64::INFINITY, 0.39, "003980").is_err());
    }

    #[test]
    fn test_rejects_target_whose_excursion_overflows() {
        assert!(matches!(
            ControlLevel::new("I", 0.0, 1.0e308, "003980"),
            Err(Error::Generation(_))
        ));
        assert!(ControlLevel::new("I", 1.0e6, 1.0e-12, "003980").is_ok());
    }

    #[test]
    fn test_band_boundaries_are_inclusive() {
        let level = level_one();
        assert_eq!(level.classify(level.mean() + 2.0 * level.sd()), ControlBand::InControl);
        assert_eq!(level.classify(level.mean() - 2.0 * level.sd()), ControlBand::InControl);
        assert_eq!(level.classify(level.mean() + 3.0 * level.sd()), ControlBand::Warning);
        assert_eq!(level.classify(level.mean() - 3.0 * level.sd()), ControlBand::Warning);
        assert_eq!(level.classify(level.mean() + 3.01 * level.sd()), ControlBand::Reject);
    }

    #[test]
    fn test_exact_binary_boundaries() {
        let level = ControlLevel::new("II", 10.0, 0.5, "004057").unwrap();
        assert_eq!(level.classify(11.0), ControlBand::InControl);
        assert_eq!(level.classify(11.01), ControlBand::Warning);
        assert_eq!(level.classify(8.5), ControlBand::Warning);
        assert_eq!(level.classify(8.49), ControlBand::Reject);
    }

    #[test]
    fn test_deviation_is_signed() {
        let level = level_one();
        assert!(level.deviation(9.31) < 0.0);
        assert!((level.deviation(10.09) - 1.0).abs() < 1e-9);
    }
}
