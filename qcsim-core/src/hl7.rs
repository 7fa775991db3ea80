// SPDX-License-Identifier: MIT
//
// QC HL7 Simulator: Analyzer-to-Middleware Quality Control Feed
// Copyright (c) 2026 QC Simulator Contributors

//! HL7 v2.5.1 OUL^R22 rendering for QC observations
//!
//! Every message has the same six segments, in this order:
//!
//! ```text
//! MSH  header             sender BA400/Biosystems, fresh control id, timestamp
//! SPM  specimen           "QC HUMAN <level> <lot>"
//! INV  inventory          sample id, lot
//! OBR  test order         fixed test code
//! ORC  results request    timestamp
//! OBX  observation        value, units, reference range, timestamp, final status
//! ```
//!
//! Only level tag, lot number, value and timestamp vary. Everything else is a constant of
//! the BA400 interface profile the receiving middleware expects.

use std::fmt;

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::level::Measurement;
use crate::{Error, Result};

/// Terminates every segment
pub const SEGMENT_TERMINATOR: char = '\r';

pub const FIELD_SEPARATOR: char = '|';

/// MSH-2
pub const ENCODING_CHARACTERS: &str = "^~\\&";

pub const SENDING_APPLICATION: &str = "BA400";
pub const SENDING_FACILITY: &str = "Biosystems";
pub const RECEIVING_APPLICATION: &str = "Host";
pub const RECEIVING_FACILITY: &str = "Host provider";
pub const MESSAGE_TYPE: &str = "OUL^R22^OUL_R22";
pub const PROCESSING_ID: &str = "P";
pub const VERSION_ID: &str = "2.5.1";
pub const ACCEPT_ACK_TYPE: &str = "ER";
pub const APPLICATION_ACK_TYPE: &str = "AL";
pub const CHARACTER_SET: &str = "UNICODE UTF-8";
pub const MESSAGE_PROFILE: &str = "LAB-29^IHE";

pub const TEST_CODE: &str = "CHOLESTEROL^CHOLESTEROL^A400";
pub const UNITS: &str = "mg/dL^mg/dL^A400";
/// Assay datasheet range, independent of the per-level targets
pub const REFERENCE_RANGE: &str = "8.5 - 10.8199997";
pub const RESPONSIBLE_OBSERVER: &str = "ADMIN";
pub const EQUIPMENT_ID: &str = "A400^Biosystems~834000240^Biosystems";
pub const INVENTORY_EXPIRATION: &str = "20260203022259";
pub const LOT_SUFFIX: &str = "XA";

/// Timestamp rendered as `YYYYMMDDHHMMSS`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Hl7Timestamp(String);

impl Hl7Timestamp {
    pub const FORMAT: &'static str = "%Y%m%d%H%M%S";

    pub fn from_datetime(datetime: &NaiveDateTime) -> Self {
        Self(datetime.format(Self::FORMAT).to_string())
    }

    /// Local wall-clock time, as an analyzer stamps its results
    pub fn now() -> Self {
        Self::from_datetime(&Local::now().naive_local())
    }

    /// Parse a 14-digit timestamp
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.len() != 14 || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::Encoding(format!(
                "timestamp must be 14 digits (YYYYMMDDHHMMSS), got '{}'",
                raw
            )));
        }
        NaiveDateTime::parse_from_str(raw, Self::FORMAT)
            .map_err(|e| Error::Encoding(format!("invalid timestamp '{}': {}", raw, e)))?;
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Hl7Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Hl7Timestamp {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Hl7Timestamp> for String {
    fn from(value: Hl7Timestamp) -> Self {
        value.0
    }
}

/// Positional segment builder
///
/// Fields are addressed by their HL7 field number. For `MSH` numbering starts at 2 because
/// MSH-1 is the field separator itself and MSH-2 sits right after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    id: &'static str,
    fields: Vec<String>,
}

impl Segment {
    /// Segment with empty fields up to and including `last_field`
    pub fn new(id: &'static str, last_field: usize) -> Self {
        let slots = slot_of(id, last_field) + 1;
        Self {
            id,
            fields: vec![String::new(); slots],
        }
    }

    /// Set field number `field`, growing the segment if needed
    pub fn field(mut self, field: usize, value: impl Into<String>) -> Self {
        let slot = slot_of(self.id, field);
        if slot >= self.fields.len() {
            self.fields.resize(slot + 1, String::new());
        }
        self.fields[slot] = value.into();
        self
    }

    /// Field by HL7 number, empty when never set
    pub fn get(&self, field: usize) -> &str {
        self.fields
            .get(slot_of(self.id, field))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Append the segment and its terminator to `out`
    pub fn render_into(&self, out: &mut String) {
        out.push_str(self.id);
        for value in &self.fields {
            out.push(FIELD_SEPARATOR);
            out.push_str(value);
        }
        out.push(SEGMENT_TERMINATOR);
    }
}

fn slot_of(id: &str, field: usize) -> usize {
    let first = if id == "MSH" { 2 } else { 1 };
    debug_assert!(field >= first, "{} has no field {}", id, field);
    field.saturating_sub(first)
}

/// Rendered HL7 payload ready for framing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMessage {
    control_id: Uuid,
    timestamp: Hl7Timestamp,
    text: String,
}

impl EncodedMessage {
    /// MSH-10 message control id
    pub fn control_id(&self) -> Uuid {
        self.control_id
    }

    pub fn timestamp(&self) -> &Hl7Timestamp {
        &self.timestamp
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }
}

/// `QC HUMAN <level> <lot>`, shared by SPM-2 and INV-1
pub fn sample_id(level_tag: &str, lot_number: &str) -> String {
    format!("QC HUMAN {} {}", level_tag, lot_number)
}

/// Render one QC observation with a fresh control id
pub fn encode(
    level_tag: &str,
    lot_number: &str,
    value: f64,
    timestamp: &Hl7Timestamp,
) -> EncodedMessage {
    let control_id = Uuid::new_v4();
    let text = render(control_id, level_tag, lot_number, value, timestamp);
    EncodedMessage {
        control_id,
        timestamp: timestamp.clone(),
        text,
    }
}

/// Render a generated measurement
pub fn encode_measurement(measurement: &Measurement, timestamp: &Hl7Timestamp) -> EncodedMessage {
    encode(
        measurement.level.tag(),
        measurement.level.lot_number(),
        measurement.value,
        timestamp,
    )
}

fn render(
    control_id: Uuid,
    level_tag: &str,
    lot_number: &str,
    value: f64,
    timestamp: &Hl7Timestamp,
) -> String {
    let sample = sample_id(level_tag, lot_number);
    let ts = timestamp.as_str();

    let segments = [
        Segment::new("MSH", 21)
            .field(2, ENCODING_CHARACTERS)
            .field(3, SENDING_APPLICATION)
            .field(4, SENDING_FACILITY)
            .field(5, RECEIVING_APPLICATION)
            .field(6, RECEIVING_FACILITY)
            .field(7, ts)
            .field(9, MESSAGE_TYPE)
            .field(10, control_id.to_string())
            .field(11, PROCESSING_ID)
            .field(12, VERSION_ID)
            .field(15, ACCEPT_ACK_TYPE)
            .field(16, APPLICATION_ACK_TYPE)
            .field(18, CHARACTER_SET)
            .field(21, MESSAGE_PROFILE),
        Segment::new("SPM", 18)
            .field(1, "1")
            .field(2, sample.as_str())
            .field(4, "NULL")
            .field(11, "Q"),
        Segment::new("INV", 16)
            .field(1, sample.as_str())
            .field(2, "OK")
            .field(3, "CO")
            .field(12, INVENTORY_EXPIRATION)
            .field(16, format!("{}{}", lot_number, LOT_SUFFIX)),
        Segment::new("OBR", 29).field(2, "\"\"").field(4, TEST_CODE),
        Segment::new("ORC", 9).field(1, "OK").field(5, "CM").field(9, ts),
        Segment::new("OBX", 19)
            .field(1, "1")
            .field(2, "NM")
            .field(3, TEST_CODE)
            .field(5, format_value(value))
            .field(6, UNITS)
            .field(7, REFERENCE_RANGE)
            .field(8, "NONE")
            .field(11, "F")
            .field(16, RESPONSIBLE_OBSERVER)
            .field(18, EQUIPMENT_ID)
            .field(19, ts),
    ];

    let mut text = String::with_capacity(512);
    for segment in &segments {
        segment.render_into(&mut text);
    }
    text
}

/// OBX-5 rendering: always two decimals
///
/// Trailing zeros are kept, so a value of 9.7 goes out as `9.70` rather than the shortest
/// form `9.7` some BA400 senders emit. Receivers parse both identically.
pub fn format_value(value: f64) -> String {
    format!("{:.2}", value)
}

/// MSH-10 of an HL7 text, if it has a header
pub fn message_control_id(text: &str) -> Option<&str> {
    let header = text
        .split(SEGMENT_TERMINATOR)
        .find(|segment| segment.starts_with("MSH"))?;
    // Split index equals the field number minus one for MSH.
    header.split(FIELD_SEPARATOR).nth(9).filter(|id| !id.is_empty())
}

/// Fields read back from a rendered observation message
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationFields {
    pub control_id: String,
    pub sample_id: String,
    pub value: f64,
    pub timestamp: String,
}

impl ObservationFields {
    /// Pull MSH-10, SPM-2, OBX-5 and OBX-19 out of an OUL^R22 text
    pub fn extract(text: &str) -> Option<Self> {
        let mut control_id = None;
        let mut sample_id = None;
        let mut observation = None;

        for segment in text.split(SEGMENT_TERMINATOR).filter(|s| !s.is_empty()) {
            let fields: Vec<&str> = segment.split(FIELD_SEPARATOR).collect();
            match fields[0] {
                "MSH" => control_id = message_control_id(segment).map(str::to_string),
                "SPM" => sample_id = fields.get(2).map(|s| s.to_string()),
                "OBX" if observation.is_none() => {
                    let value = fields.get(5)?.parse::<f64>().ok()?;
                    let timestamp = fields.get(19)?.to_string();
                    observation = Some((value, timestamp));
                }
                _ => {}
            }
        }

        let (value, timestamp) = observation?;
        Some(Self {
            control_id: control_id?,
            sample_id: sample_id.unwrap_or_default(),
            value,
            timestamp,
        })
    }
}

pub const ACK_MESSAGE_TYPE: &str = "ACK^R22^ACK";

/// MSA-1 acknowledgment codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckCode {
    /// Application Accept
    Accept,
    /// Application Error
    Error,
}

impl AckCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckCode::Accept => "AA",
            AckCode::Error => "AE",
        }
    }
}

/// Build the middleware-side acknowledgment for a received message
///
/// Headers are mirrored: the ACK travels from Host back to the analyzer. A message without a
/// readable MSH-10 is answered with `AE`.
pub fn encode_ack(received: &str, timestamp: &Hl7Timestamp) -> String {
    let acknowledged = message_control_id(received);
    let code = if acknowledged.is_some() {
        AckCode::Accept
    } else {
        AckCode::Error
    };

    let segments = [
        Segment::new("MSH", 12)
            .field(2, ENCODING_CHARACTERS)
            .field(3, RECEIVING_APPLICATION)
            .field(4, RECEIVING_FACILITY)
            .field(5, SENDING_APPLICATION)
            .field(6, SENDING_FACILITY)
            .field(7, timestamp.as_str())
            .field(9, ACK_MESSAGE_TYPE)
            .field(10, Uuid::new_v4().to_string())
            .field(11, PROCESSING_ID)
            .field(12, VERSION_ID),
        Segment::new("MSA", 2)
            .field(1, code.as_str())
            .field(2, acknowledged.unwrap_or_default()),
    ];

    let mut text = String::with_capacity(128);
    for segment in &segments {
        segment.render_into(&mut text);
    }
    text
}

/// MSA-1 and MSA-2 of an acknowledgment
pub fn ack_status(text: &str) -> Option<(&str, &str)> {
    let msa = text
        .split(SEGMENT_TERMINATOR)
        .find(|segment| segment.starts_with("MSA"))?;
    let mut fields = msa.split(FIELD_SEPARATOR).skip(1);
    Some((fields.next()?, fields.next().unwrap_or("")))
}
