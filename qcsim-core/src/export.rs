// SPDX-License-Identifier: MIT
//
// QC HL7 Simulator: Analyzer-to-Middleware Quality Control Feed
// Copyright (c) 2026 QC Simulator Contributors

//! Backfill export of raw QC result rows as JSON lines
//!
//! Each level draws from the same RNG stream the feeder uses, so an export and a send with
//! the same seed carry identical values. Statistics columns are left to the ingesting side.

use std::io::Write;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::generator::ValueGenerator;
use crate::level::{ControlLevel, Measurement};
use crate::timeline::Timeline;
use crate::Result;

pub const RESULT_RAW: &str = "Raw";
pub const METHOD_RAW: &str = "raw";
pub const DEFAULT_OPERATOR: &str = "SYSTEM";

/// One raw QC result, shaped for a downstream `qc_results` ingester
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcResultRecord {
    pub index: usize,
    pub qc_level: String,
    pub lot_number: String,
    pub measured_value: f64,
    pub created_at: NaiveDateTime,
    pub result: String,
    pub method: String,
    pub operator: String,
}

impl QcResultRecord {
    pub fn from_measurement(measurement: &Measurement, created_at: NaiveDateTime) -> Self {
        Self {
            index: measurement.index,
            qc_level: measurement.level.tag().to_string(),
            lot_number: measurement.level.lot_number().to_string(),
            measured_value: measurement.value,
            created_at,
            result: RESULT_RAW.to_string(),
            method: METHOD_RAW.to_string(),
            operator: DEFAULT_OPERATOR.to_string(),
        }
    }
}

/// Generate `count` records per level on `timeline`, levels in order
pub fn backfill_records(
    levels: &[Arc<ControlLevel>],
    seed: u64,
    count: usize,
    timeline: &Timeline,
) -> Result<Vec<QcResultRecord>> {
    let mut records = Vec::with_capacity(levels.len() * count);

    for (position, level) in levels.iter().enumerate() {
        let mut generator = ValueGenerator::for_stream(seed, position as u64);
        for measurement in generator.measurements(level, count)? {
            let created_at = timeline.datetime_for(measurement.index);
            records.push(QcResultRecord::from_measurement(&measurement, created_at));
        }
        debug!("Generated {} backfill records for {}", count, level);
    }

    Ok(records)
}

/// Write one JSON object per line, returning the number written
pub fn write_json_lines<W: Write>(records: &[QcResultRecord], mut writer: W) -> Result<usize> {
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    info!("Exported {} QC result records", records.len());
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn levels() -> Vec<Arc<ControlLevel>> {
        vec![
            Arc::new(ControlLevel::new("I", 9.70, 0.39, "003980").unwrap()),
            Arc::new(ControlLevel::new("II", 13.90, 0.60, "004057").unwrap()),
        ]
    }

    fn timeline() -> Timeline {
        let now = NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        Timeline::backfill_from(now, 20)
    }

    #[test]
    fn test_records_follow_level_streams() {
        let records = backfill_records(&levels(), 42, 20, &timeline()).unwrap();
        assert_eq!(records.len(), 40);

        let mut generator = ValueGenerator::for_stream(42, 1);
        let expected = generator.generate(13.90, 0.60).unwrap();
        assert_eq!(records[20].qc_level, "II");
        assert_eq!(records[20].measured_value.to_bits(), expected.to_bits());
    }

    #[test]
    fn test_records_are_one_day_apart() {
        let records = backfill_records(&levels(), 7, 5, &timeline()).unwrap();
        let level_one: Vec<_> = records.iter().filter(|r| r.qc_level == "I").collect();
        for pair in level_one.windows(2) {
            assert_eq!(pair[1].created_at - pair[0].created_at, Duration::days(1));
        }
        assert_eq!(level_one[0].result, "Raw");
        assert_eq!(level_one[0].method, "raw");
        assert_eq!(level_one[0].operator, "SYSTEM");
    }

    #[test]
    fn test_json_lines_output() {
        let records = backfill_records(&levels(), 42, 3, &timeline()).unwrap();
        let mut out = Vec::new();
        assert_eq!(write_json_lines(&records, &mut out).unwrap(), 6);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 6);

        let first: QcResultRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first, records[0]);
        assert!(lines[0].contains("\"created_at\":\"2026-09-29T08:30:00\""));
    }
}
