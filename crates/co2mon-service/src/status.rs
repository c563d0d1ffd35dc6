//! Live status output.

use std::io::Write;

use tracing::debug;

use co2mon_types::Reading;

use crate::thresholds::Co2Thresholds;

/// Receives every valid reading and every persist notice.
pub trait StatusSink: Send {
    /// Show the latest reading, replacing the previous one.
    fn reading(&mut self, reading: &Reading);

    /// Announce that a reading is being persisted.
    fn persisted(&mut self, reading: &Reading);
}

/// Status line rewritten in place on a terminal.
///
/// ```
/// use co2mon_service::{StatusSink, TerminalStatus};
/// use co2mon_types::Reading;
///
/// let mut status = TerminalStatus::new(Vec::new());
/// status.reading(&Reading::new(450, 21.0));
/// assert_eq!(status.get_ref().as_slice(), b"CO2:  450 TMP: 21.0 [OK]    \r");
/// ```
#[derive(Debug)]
pub struct TerminalStatus<W> {
    out: W,
    thresholds: Co2Thresholds,
}

impl<W: Write> TerminalStatus<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            thresholds: Co2Thresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: Co2Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, line: std::fmt::Arguments<'_>) {
        // A closed stdout must not stop sampling.
        if let Err(e) = self.out.write_fmt(line).and_then(|()| self.out.flush()) {
            debug!("Failed to write status: {}", e);
        }
    }
}

impl<W: Write + Send> StatusSink for TerminalStatus<W> {
    fn reading(&mut self, reading: &Reading) {
        let band = self.thresholds.evaluate(reading.co2);
        self.emit(format_args!("{} [{}]    \r", reading, band));
    }

    fn persisted(&mut self, reading: &Reading) {
        self.emit(format_args!(
            ">>> sending dataset CO2: {:4} TMP: {:3.1} ..\n",
            reading.co2, reading.temperature
        ));
    }
}
