//! Single-instance CO2/temperature sampling daemon.
//!
//! The daemon polls a USB CO2 monitor four times a second, shows the latest
//! reading on a status line, persists at most one sample a minute into a
//! round-robin store and redraws graphs for several time windows after every
//! persisted sample.
//!
//! - [`InstanceGuard`] keeps a second instance from starting.
//! - [`SensorSource`] yields tagged reads from [`HidrawSensor`] or [`MockSensor`].
//! - [`Scheduler`] is the sampling loop with an injectable [`Clock`].
//! - [`SnapshotRenderer`] writes `co2-<window>-graph.png` and `temp-<window>-graph.png`.
//!
//! # Configuration
//!
//! Read from `/etc/co2mon/co2mon.toml` when present:
//!
//! ```toml
//! [storage]
//! path = "/var/local/monitor/co2-temp.rrd"
//!
//! [graphs]
//! output_dir = "/usr/share/nginx/html/images"
//! windows = ["8h", "24h", "7d", "1m", "1y"]
//! width = 600
//! height = 200
//!
//! [sensor]
//! device = "/dev/hidraw0"
//!
//! [guard]
//! name = "co2mon.lock"
//! ```

pub mod clock;
pub mod config;
pub mod daemon;
pub mod error;
pub mod guard;
pub mod mock;
pub mod render;
pub mod scheduler;
pub mod sensor;
pub mod status;
pub mod thresholds;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    Config, ConfigError, GraphsConfig, GuardConfig, SensorConfig, StorageConfig, ValidationError,
};
pub use error::{DaemonError, GuardError, RenderError, SensorError};
pub use guard::InstanceGuard;
pub use mock::MockSensor;
pub use render::{GraphWindow, RenderReport, SnapshotRenderer, Snapshots, WindowUnit};
pub use scheduler::{
    MIN_PERSIST_INTERVAL, POLL_INTERVAL, SampleStore, Scheduler, SchedulerState, SchedulerStats,
    Transition,
};
pub use sensor::{HidrawSensor, SensorSource};
pub use status::{StatusSink, TerminalStatus};
pub use thresholds::{Co2Band, Co2Thresholds};
