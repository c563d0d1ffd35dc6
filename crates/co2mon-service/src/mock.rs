//! Scripted sensor for testing.
//!
//! [`MockSensor`] replays a fixed sequence of [`SensorRead`] values and then
//! reports the device as gone, so a scheduler driven by it always terminates.

use std::collections::VecDeque;

use async_trait::async_trait;

use co2mon_types::{Reading, SensorRead};

use crate::error::SensorError;
use crate::sensor::SensorSource;

/// A sensor that replays a script.
///
/// # Example
///
/// ```
/// use co2mon_service::{MockSensor, SensorSource};
///
/// #[tokio::main]
/// async fn main() {
///     let mut sensor = MockSensor::new().transient(2).valid(450, 21.0, 1);
///
///     assert!(sensor.read().await.valid().is_none());
///     assert!(sensor.read().await.valid().is_none());
///     assert_eq!(sensor.read().await.valid().map(|r| r.co2), Some(450));
///     assert!(sensor.read().await.is_fatal()); // script exhausted
/// }
/// ```
#[derive(Debug, Default)]
pub struct MockSensor {
    script: VecDeque<SensorRead<SensorError>>,
    reads: usize,
}

impl MockSensor {
    /// An empty script; the first read is fatal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `polls` transient empty reads.
    pub fn transient(mut self, polls: usize) -> Self {
        self.script
            .extend(std::iter::repeat_with(|| SensorRead::TransientEmpty).take(polls));
        self
    }

    /// Append `polls` identical valid reads.
    pub fn valid(mut self, co2: u16, temperature: f32, polls: usize) -> Self {
        let reading = Reading::new(co2, temperature);
        self.script
            .extend(std::iter::repeat_n(reading, polls).map(SensorRead::Valid));
        self
    }

    /// Append a fatal read; nothing after it is ever replayed.
    pub fn fatal(mut self, error: SensorError) -> Self {
        self.script.push_back(SensorRead::Fatal(error));
        self
    }

    /// Number of reads served so far.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Reads left in the script.
    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

#[async_trait]
impl SensorSource for MockSensor {
    async fn read(&mut self) -> SensorRead<SensorError> {
        self.reads += 1;
        match self.script.pop_front() {
            Some(SensorRead::Fatal(e)) => {
                self.script.clear();
                SensorRead::Fatal(e)
            }
            Some(read) => read,
            None => SensorRead::Fatal(SensorError::EndOfStream),
        }
    }
}
