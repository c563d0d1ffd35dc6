//! The sampling loop.
//!
//! The sensor is polled every [`POLL_INTERVAL`]; every valid reading goes to
//! the status sink, and at most one reading per [`MIN_PERSIST_INTERVAL`] is
//! appended to the store. Each successful append triggers a graph redraw.
//!
//! ```text
//! Polling --valid--> Reporting --due--> Persisting --ok--> Rendering --> Polling
//!    ^                   |                   |
//!    +----not due--------+------failed-------+
//! ```
//!
//! A fatal sensor read is the only way out.

use std::time::Duration;

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use co2mon_store::Store;
use co2mon_types::{Reading, SensorRead};

use crate::clock::Clock;
use crate::error::SensorError;
use crate::render::Snapshots;
use crate::sensor::SensorSource;
use crate::status::StatusSink;

/// Sleep before every sensor read.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A sample is persisted only once more than this has passed since the last one.
pub const MIN_PERSIST_INTERVAL: Duration = Duration::from_secs(60);

/// Where persisted samples go.
pub trait SampleStore: Send {
    fn append(&mut self, at: OffsetDateTime, reading: &Reading) -> co2mon_store::Result<()>;
}

impl SampleStore for Store {
    fn append(&mut self, at: OffsetDateTime, reading: &Reading) -> co2mon_store::Result<()> {
        let values = [
            Some(f64::from(reading.co2)),
            Some(f64::from(reading.temperature)),
        ];
        Store::append(self, at, &values).map(|_| ())
    }
}

/// Rate-limit state carried between iterations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerState {
    /// Start of the current rate-limit interval: the last persist attempt,
    /// snapped back to the minute grid when it landed within one poll of it.
    pub last_persist: OffsetDateTime,
}

impl SchedulerState {
    pub fn new(now: OffsetDateTime) -> Self {
        Self { last_persist: now }
    }

    /// Whether more than [`MIN_PERSIST_INTERVAL`] has passed.
    pub fn persist_due(&self, now: OffsetDateTime) -> bool {
        now - self.last_persist > MIN_PERSIST_INTERVAL
    }

    /// Record a persist made at `now`.
    ///
    /// A persist landing within one poll of the interval boundary keeps the
    /// minute grid, so poll granularity does not add up over long runs. A
    /// later one (first sample after a stall) restarts the grid at `now`.
    pub fn record_persist(&mut self, now: OffsetDateTime) {
        let boundary = self.last_persist + MIN_PERSIST_INTERVAL;
        self.last_persist = if now - boundary <= POLL_INTERVAL {
            boundary
        } else {
            now
        };
    }
}

/// Counters over the life of the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub polls: u64,
    pub transient: u64,
    pub persisted: u64,
    pub append_failures: u64,
    pub render_failures: u64,
}

/// What one iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// No complete reading yet.
    Skipped,
    /// Reading shown, nothing persisted.
    Reported,
    /// Reading appended and graphs redrawn.
    Persisted,
    /// The append failed; the loop carries on.
    AppendFailed,
}

/// Drives sensor, status, store and renderer.
pub struct Scheduler<S, P, R, O, C> {
    sensor: S,
    store: P,
    renderer: R,
    status: O,
    clock: C,
    state: SchedulerState,
    stats: SchedulerStats,
}

impl<S, P, R, O, C> Scheduler<S, P, R, O, C>
where
    S: SensorSource,
    P: SampleStore,
    R: Snapshots,
    O: StatusSink,
    C: Clock,
{
    /// The rate limit starts counting now, so nothing is persisted in the
    /// first minute.
    pub fn new(sensor: S, store: P, renderer: R, status: O, clock: C) -> Self {
        let state = SchedulerState::new(clock.now());
        Self {
            sensor,
            store,
            renderer,
            status,
            clock,
            state,
            stats: SchedulerStats::default(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn status(&self) -> &O {
        &self.status
    }

    /// Run one poll.
    ///
    /// Returns the sensor error if the device is gone; the loop must stop.
    pub async fn step(&mut self) -> Result<Transition, SensorError> {
        self.clock.sleep(POLL_INTERVAL).await;
        self.stats.polls += 1;

        let reading = match self.sensor.read().await {
            SensorRead::Valid(reading) => reading,
            SensorRead::TransientEmpty => {
                self.stats.transient += 1;
                return Ok(Transition::Skipped);
            }
            SensorRead::Fatal(e) => return Err(e),
        };

        self.status.reading(&reading);

        let now = self.clock.now();
        if !self.state.persist_due(now) {
            return Ok(Transition::Reported);
        }

        self.status.persisted(&reading);
        // Advanced even when the append fails, so store errors cannot make
        // persists come faster than the rate limit.
        self.state.record_persist(now);

        match self.store.append(now, &reading) {
            Ok(()) => {
                self.stats.persisted += 1;
                debug!("Persisted {}", reading);
            }
            Err(e) => {
                self.stats.append_failures += 1;
                warn!("Failed to persist {}: {}", reading, e);
                return Ok(Transition::AppendFailed);
            }
        }

        let report = self.renderer.render(now);
        self.stats.render_failures += report.failures.len() as u64;
        Ok(Transition::Persisted)
    }

    /// Poll until the sensor fails, then return its error.
    pub async fn run(&mut self) -> SensorError {
        info!(
            "Sampling every {:?}, persisting at most once per {:?}",
            POLL_INTERVAL, MIN_PERSIST_INTERVAL
        );
        loop {
            if let Err(e) = self.step().await {
                info!("Sensor lost, stopped after {:?}", self.stats);
                return e;
            }
        }
    }
}
