//! Platform-agnostic types for USB CO2 monitors.
//!
//! This crate provides the shared vocabulary of the co2mon daemon:
//! readings, the tagged result of a sensor poll, and decoding of the
//! 8-byte HID reports the monitor emits.
//!
//! # Example
//!
//! ```
//! use co2mon_types::{Frame, FrameOp, PartialReading};
//!
//! let mut latest = PartialReading::default();
//! let frame = Frame::decode(&[0x50, 0x01, 0xC2, 0x13, 0x0D, 0, 0, 0])?;
//! assert_eq!(frame.op, FrameOp::Co2);
//!
//! latest.apply(&frame);
//! assert!(latest.complete().is_none()); // temperature not seen yet
//! # Ok::<(), co2mon_types::ParseError>(())
//! ```

pub mod error;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use types::{FRAME_TERMINATOR, Frame, FrameOp, PartialReading, REPORT_LEN, Reading, SensorRead};
