//! Sample records and their text rendering.

use std::fmt;
use std::fmt::Write as _;

use serde::Serialize;

use super::clock::CalendarTimestamp;

/// One set of environmental readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    /// Temperature in °C.
    pub temperature: f32,
    /// Pressure in mBar.
    pub pressure: f32,
    /// Light-dependent resistor voltage in volts.
    pub light: f32,
}

impl Reading {
    /// Bundle one set of readings.
    pub fn new(temperature: f32, pressure: f32, light: f32) -> Self {
        Self {
            temperature,
            pressure,
            light,
        }
    }
}

/// A reading stamped with the calendar time it was taken.
///
/// Immutable once built; the buffer copies it into drain snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SampleRecord {
    reading: Reading,
    timestamp: CalendarTimestamp,
}

impl SampleRecord {
    /// Stamp a reading.
    pub fn new(reading: Reading, timestamp: CalendarTimestamp) -> Self {
        Self { reading, timestamp }
    }

    /// Sensor values.
    pub fn reading(&self) -> Reading {
        self.reading
    }

    /// Time the reading was taken.
    pub fn timestamp(&self) -> CalendarTimestamp {
        self.timestamp
    }
}

impl fmt::Display for SampleRecord {
    /// `[YYYY-MM-DD HH:MM:SS] Temp: 21.50C | Pressure: 1013.25mBar | Light: 2.3456V`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] Temp: {:.2}C | Pressure: {:.2}mBar | Light: {:.4}V",
            self.timestamp, self.reading.temperature, self.reading.pressure, self.reading.light
        )
    }
}

/// Text produced by reading records back out of the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    /// One line per record, each terminated by `\n`.
    Records {
        /// Rendered lines.
        text: String,
        /// Number of records rendered.
        count: usize,
    },
    /// The buffer held no records when the snapshot was taken.
    NoRecords,
}

impl Rendered {
    /// Sentinel text for an empty buffer.
    pub const NO_RECORDS: &'static str = "NO RECORDS";

    /// Render `records` as persisted-file lines.
    pub fn from_records(records: &[SampleRecord]) -> Self {
        let mut text = String::with_capacity(records.len() * 80);
        for record in records {
            // Writing into a String cannot fail.
            let _ = writeln!(text, "{record}");
        }
        Rendered::Records {
            text,
            count: records.len(),
        }
    }

    /// Number of records rendered.
    pub fn count(&self) -> usize {
        match self {
            Rendered::Records { count, .. } => *count,
            Rendered::NoRecords => 0,
        }
    }

    /// Whether this is the empty-buffer sentinel.
    pub fn is_no_records(&self) -> bool {
        matches!(self, Rendered::NoRecords)
    }
}

impl fmt::Display for Rendered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rendered::Records { text, .. } => f.write_str(text),
            Rendered::NoRecords => f.write_str(Self::NO_RECORDS),
        }
    }
}
