//! Error types for data parsing in co2mon-types.

use thiserror::Error;

/// Errors that can occur when decoding monitor reports.
///
/// This error type is platform-agnostic and does not include
/// transport errors (those belong in co2mon-service).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// The report is shorter than a full frame.
    #[error("Report requires {expected} bytes, got {actual}")]
    InsufficientBytes { expected: usize, actual: usize },

    /// Byte 4 of the report is not the frame terminator.
    #[error("Missing frame terminator (found 0x{0:02X})")]
    MissingTerminator(u8),

    /// The checksum byte does not match the payload.
    #[error("Checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    Checksum { expected: u8, actual: u8 },
}

/// Result type alias using co2mon-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
