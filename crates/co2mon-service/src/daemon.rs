//! Daemon startup.

use std::path::Path;

use tracing::info;

use co2mon_store::{RetentionSchedule, Store};

use crate::clock::SystemClock;
use crate::config::Config;
use crate::error::DaemonError;
use crate::guard::InstanceGuard;
use crate::render::SnapshotRenderer;
use crate::scheduler::Scheduler;
use crate::sensor::HidrawSensor;
use crate::status::TerminalStatus;

/// Open the store at `path`, creating it first if there is none.
///
/// Returns the store and whether it was created.
pub fn open_or_create_store(path: &Path) -> Result<(Store, bool), DaemonError> {
    if Store::exists(path) {
        let store = Store::open(path).map_err(|e| DaemonError::StoreOpen {
            path: path.to_path_buf(),
            source: e,
        })?;
        return Ok((store, false));
    }

    info!("Store not found, creating it at {}", path.display());
    let store = Store::create(path, &RetentionSchedule::co2_temperature()).map_err(|e| {
        DaemonError::StoreCreation {
            path: path.to_path_buf(),
            source: e,
        }
    })?;
    Ok((store, true))
}

/// Run the daemon until the sensor goes away.
///
/// The instance guard is taken before the store or sensor is touched, so a
/// second instance returns [`DaemonError::AlreadyRunning`] without side
/// effects. The guard is held until this returns.
pub async fn run(config: &Config) -> Result<(), DaemonError> {
    let _guard = InstanceGuard::acquire(&config.guard.name)?;

    let (store, _) = open_or_create_store(&config.storage.path)?;
    let sensor = HidrawSensor::open(&config.sensor.device)
        .await
        .map_err(DaemonError::SensorOpen)?;
    let renderer = SnapshotRenderer::from_config(config);
    let status = TerminalStatus::new(std::io::stdout());

    let mut scheduler = Scheduler::new(sensor, store, renderer, status, SystemClock);
    Err(DaemonError::SensorFatal(scheduler.run().await))
}
