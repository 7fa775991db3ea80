// SPDX-License-Identifier: MIT
//
// QC HL7 Simulator: Analyzer-to-Middleware Quality Control Feed
// Copyright (c) 2026 QC Simulator Contributors

//! Tiered QC value generator
//!
//! Values follow a three-part mixture so that a control chart built from them shows
//! realistic Westgard base rates:
//!
//! | draw `u`          | share | value                                         |
//! |-------------------|-------|-----------------------------------------------|
//! | `u < 0.85`        | 85 %  | Gaussian(mean, 0.6·sd)                        |
//! | `0.85 ≤ u < 0.95` | 10 %  | uniform in the 2–3 SD band, side by coin flip |
//! | `u ≥ 0.95`        | 5 %   | uniform in the 3–4 SD band, side by coin flip |
//!
//! All randomness flows through an injected RNG. The default is a seeded ChaCha8 stream so
//! that a seed reproduces the exact sequence, and every control level draws from its own
//! stream of the same seed.

use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use crate::level::{check_target, ControlLevel, Measurement, MAX_EXCURSION_SD};
use crate::{Error, Result};

/// Upper bound of the in-control tier on the selector draw
pub const IN_CONTROL_SHARE: f64 = 0.85;

/// Upper bound of the warning tier on the selector draw
pub const WARNING_CUTOFF: f64 = 0.95;

/// Spread of the in-control Gaussian relative to the nominal SD
pub const IN_CONTROL_SPREAD: f64 = 0.6;

/// Draw one QC value for `mean`/`sd`, rounded to 2 decimals
pub fn generate_value<R: Rng + ?Sized>(rng: &mut R, mean: f64, sd: f64) -> Result<f64> {
    check_target(mean, sd)?;

    let selector: f64 = rng.gen();
    let value = if selector < IN_CONTROL_SHARE {
        let normal = Normal::new(mean, sd * IN_CONTROL_SPREAD)
            .map_err(|e| Error::Generation(e.to_string()))?;
        normal.sample(rng)
    } else if selector < WARNING_CUTOFF {
        outer_band(rng, mean, sd, 2.0, 3.0)
    } else {
        outer_band(rng, mean, sd, 3.0, MAX_EXCURSION_SD)
    };

    Ok(round_to_hundredths(value))
}

/// Uniform draw between `inner` and `outer` SDs away from the mean on a random side
///
/// The offset is drawn in SD units so the range stays non-empty even when `sd` vanishes
/// next to `mean`.
fn outer_band<R: Rng + ?Sized>(rng: &mut R, mean: f64, sd: f64, inner: f64, outer: f64) -> f64 {
    let low_side = rng.gen::<f64>() < 0.5;
    let offset = rng.gen_range(inner..outer) * sd;
    if low_side {
        mean - offset
    } else {
        mean + offset
    }
}

pub fn round_to_hundredths(value: f64) -> f64 {
    let scaled = value * 100.0;
    if scaled.is_finite() {
        scaled.round() / 100.0
    } else {
        // Already past the precision where hundredths exist.
        value
    }
}

/// Stateful generator owning its RNG
#[derive(Debug, Clone)]
pub struct ValueGenerator<R = ChaCha8Rng> {
    rng: R,
}

impl ValueGenerator<ChaCha8Rng> {
    /// Generator seeded on stream 0
    pub fn seeded(seed: u64) -> Self {
        Self::for_stream(seed, 0)
    }

    /// Generator on an independent stream of `seed`
    ///
    /// Used to give each control level its own reproducible sequence.
    pub fn for_stream(seed: u64, stream: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(stream);
        Self { rng }
    }
}

impl<R: Rng> ValueGenerator<R> {
    /// Wrap an existing RNG
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Draw the next value for `mean`/`sd`
    pub fn generate(&mut self, mean: f64, sd: f64) -> Result<f64> {
        generate_value(&mut self.rng, mean, sd)
    }

    /// Draw `count` consecutive measurements for a control level
    pub fn measurements(
        &mut self,
        level: &Arc<ControlLevel>,
        count: usize,
    ) -> Result<Vec<Measurement>> {
        (0..count)
            .map(|index| {
                let value = self.generate(level.mean(), level.sd())?;
                Ok(Measurement {
                    index,
                    value,
                    level: Arc::clone(level),
                })
            })
            .collect()
    }
}
