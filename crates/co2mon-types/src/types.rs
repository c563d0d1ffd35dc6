//! Core types for CO2 monitor data.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Size of a single HID input report from the monitor.
pub const REPORT_LEN: usize = 8;

/// Byte terminating every well-formed frame.
pub const FRAME_TERMINATOR: u8 = 0x0D;

/// Offset between Kelvin and degrees Celsius.
const KELVIN_OFFSET: f32 = 273.15;

/// A complete measurement from the monitor.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// CO2 concentration in ppm.
    pub co2: u16,
    /// Temperature in degrees Celsius.
    pub temperature: f32,
    /// Timestamp when the reading was captured (if known).
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub captured_at: Option<time::OffsetDateTime>,
}

impl Reading {
    /// Create a reading without a capture timestamp.
    #[must_use]
    pub fn new(co2: u16, temperature: f32) -> Self {
        Self {
            co2,
            temperature,
            captured_at: None,
        }
    }

    /// Stamp the reading with its capture time.
    #[must_use]
    pub fn with_captured_at(mut self, now: time::OffsetDateTime) -> Self {
        self.captured_at = Some(now);
        self
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CO2: {:4} TMP: {:3.1}", self.co2, self.temperature)
    }
}

/// Outcome of a single sensor poll.
///
/// Callers must handle each case; a fatal result means the transport is gone
/// and the sequence of reads has ended.
#[derive(Debug)]
#[must_use = "a sensor read may carry a fatal transport error"]
pub enum SensorRead<E> {
    /// Both CO2 and temperature are known.
    Valid(Reading),
    /// The transport answered but a complete reading is not available yet.
    TransientEmpty,
    /// The transport is gone.
    Fatal(E),
}

impl<E> SensorRead<E> {
    /// Returns the reading when the poll produced one.
    pub fn valid(&self) -> Option<&Reading> {
        match self {
            SensorRead::Valid(reading) => Some(reading),
            _ => None,
        }
    }

    /// Returns `true` if the poll ended the sequence.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SensorRead::Fatal(_))
    }
}

/// Measurement carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
pub enum FrameOp {
    /// CO2 concentration in ppm (`0x50`).
    Co2,
    /// Temperature in 1/16 Kelvin (`0x42`).
    Temperature,
    /// Relative humidity in 1/100 percent (`0x41`), only on some models.
    Humidity,
    /// Any other item the monitor reports.
    Other(u8),
}

impl From<u8> for FrameOp {
    fn from(value: u8) -> Self {
        match value {
            0x50 => FrameOp::Co2,
            0x42 => FrameOp::Temperature,
            0x41 => FrameOp::Humidity,
            other => FrameOp::Other(other),
        }
    }
}

impl fmt::Display for FrameOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameOp::Co2 => write!(f, "CO2"),
            FrameOp::Temperature => write!(f, "Temperature"),
            FrameOp::Humidity => write!(f, "Humidity"),
            FrameOp::Other(op) => write!(f, "0x{op:02X}"),
        }
    }
}

/// A decoded plaintext HID report.
///
/// The byte format is:
/// - byte 0: item (operation code)
/// - bytes 1-2: value (u16 BE)
/// - byte 3: checksum (sum of bytes 0-2, truncated to u8)
/// - byte 4: terminator (`0x0D`)
/// - bytes 5-7: unused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// What the value measures.
    pub op: FrameOp,
    /// Raw 16-bit value.
    pub value: u16,
}

impl Frame {
    /// Decode a frame from a raw report.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InsufficientBytes`] for short reports,
    /// [`ParseError::MissingTerminator`] when byte 4 is not `0x0D`, and
    /// [`ParseError::Checksum`] when the checksum does not match.
    pub fn decode(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < REPORT_LEN {
            return Err(ParseError::InsufficientBytes {
                expected: REPORT_LEN,
                actual: data.len(),
            });
        }

        if data[4] != FRAME_TERMINATOR {
            return Err(ParseError::MissingTerminator(data[4]));
        }

        let expected = data[0].wrapping_add(data[1]).wrapping_add(data[2]);
        if data[3] != expected {
            return Err(ParseError::Checksum {
                expected,
                actual: data[3],
            });
        }

        Ok(Self {
            op: FrameOp::from(data[0]),
            value: u16::from_be_bytes([data[1], data[2]]),
        })
    }

    /// Temperature in degrees Celsius, for temperature frames.
    pub fn celsius(&self) -> Option<f32> {
        (self.op == FrameOp::Temperature).then(|| f32::from(self.value) / 16.0 - KELVIN_OFFSET)
    }
}

/// Latest values seen on the wire, merged frame by frame.
///
/// The monitor reports one item per frame, so a complete [`Reading`] is only
/// available once both CO2 and temperature have been seen at least once.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PartialReading {
    /// Last CO2 value in ppm.
    pub co2: Option<u16>,
    /// Last temperature in degrees Celsius.
    pub temperature: Option<f32>,
}

impl PartialReading {
    /// Merge one frame into the latest values.
    pub fn apply(&mut self, frame: &Frame) {
        match frame.op {
            FrameOp::Co2 => self.co2 = Some(frame.value),
            FrameOp::Temperature => self.temperature = frame.celsius(),
            _ => {}
        }
    }

    /// The complete reading, if both fields are known.
    pub fn complete(&self) -> Option<Reading> {
        Some(Reading::new(self.co2?, self.temperature?))
    }
}
