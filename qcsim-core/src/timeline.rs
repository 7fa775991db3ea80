// SPDX-License-Identifier: MIT
//
// QC HL7 Simulator: Analyzer-to-Middleware Quality Control Feed
// Copyright (c) 2026 QC Simulator Contributors

//! Timestamps attached to measurements
//!
//! Two independent sources exist. Live feeds stamp each message with the wall clock at
//! send time. Backfills place measurement `i` of a level exactly `i` days after a start
//! date, which reproduces a run of daily QC without waiting for it.

use chrono::{Duration, Local, NaiveDateTime};

use crate::hl7::Hl7Timestamp;

/// Days a backfill reaches into the past by default
pub const DEFAULT_BACKFILL_DAYS: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timeline {
    /// Wall-clock time when the message is encoded
    Live,
    /// `start + index` days
    Backfill { start: NaiveDateTime },
}

impl Timeline {
    /// Backfill beginning `days` before now
    pub fn backfill_days_ago(days: u32) -> Self {
        Self::backfill_from(Local::now().naive_local(), days)
    }

    /// Backfill beginning `days` before `now`
    pub fn backfill_from(now: NaiveDateTime, days: u32) -> Self {
        Self::Backfill {
            start: now - Duration::days(i64::from(days)),
        }
    }

    /// Moment for the measurement at `index`
    pub fn datetime_for(&self, index: usize) -> NaiveDateTime {
        match self {
            Self::Live => Local::now().naive_local(),
            Self::Backfill { start } => *start + Duration::days(index as i64),
        }
    }

    pub fn timestamp_for(&self, index: usize) -> Hl7Timestamp {
        Hl7Timestamp::from_datetime(&self.datetime_for(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_backfill_is_one_day_spaced() {
        let timeline = Timeline::backfill_from(noon(), 20);
        let stamps: Vec<NaiveDateTime> = (0..20).map(|i| timeline.datetime_for(i)).collect();
        assert_eq!(stamps[0], noon() - Duration::days(20));
        for pair in stamps.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::days(1));
        }
        assert_eq!(timeline.timestamp_for(0).as_str(), "20260929120000");
        assert_eq!(timeline.timestamp_for(19).as_str(), "20261018120000");
    }

    #[test]
    fn test_live_timestamps_are_well_formed() {
        let stamp = Timeline::Live.timestamp_for(7);
        assert!(Hl7Timestamp::parse(stamp.as_str()).is_ok());
    }
}
