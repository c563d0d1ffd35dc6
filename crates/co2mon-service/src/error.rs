//! Error types for the daemon.

use std::path::PathBuf;

pub use crate::config::ConfigError;

/// Sensor transport errors.
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    /// The device node could not be opened.
    #[error("Failed to open sensor {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The key feature report could not be sent.
    #[error("Failed to initialise sensor {path}: {source}")]
    Init {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Reading from an open device failed (usually unplugged).
    #[error("CO2 monitor no longer available: {0}")]
    Disconnected(#[source] std::io::Error),

    /// The device stopped producing reports.
    #[error("CO2 monitor closed the report stream")]
    EndOfStream,
}

/// Single-instance guard errors.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// Another process already holds the guard.
    #[error("Another instance is already running ({0})")]
    AlreadyRunning(String),

    /// The guard could not be set up for another reason.
    #[error("Failed to acquire instance guard {name}: {source}")]
    Io {
        name: String,
        source: std::io::Error,
    },
}

/// Graph rendering errors.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Invalid graph window '{0}': expected <n>h, <n>d, <n>w, <n>m or <n>y")]
    InvalidWindow(String),

    #[error("Graph window '{0}' reaches back more than 100 years")]
    WindowTooLong(String),

    #[error("Failed to read store: {0}")]
    Store(#[from] co2mon_store::Error),

    #[error("Failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors that end the daemon.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// Another instance holds the guard. Not a failure.
    #[error("Already running")]
    AlreadyRunning,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Guard(GuardError),

    #[error("Failed to create store at {path}: {source}")]
    StoreCreation {
        path: PathBuf,
        source: co2mon_store::Error,
    },

    #[error("Failed to open store at {path}: {source}")]
    StoreOpen {
        path: PathBuf,
        source: co2mon_store::Error,
    },

    #[error(transparent)]
    SensorOpen(SensorError),

    #[error(transparent)]
    SensorFatal(SensorError),
}

impl From<GuardError> for DaemonError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::AlreadyRunning(_) => DaemonError::AlreadyRunning,
            other => DaemonError::Guard(other),
        }
    }
}

impl DaemonError {
    /// Process exit status for this error.
    ///
    /// A second instance exits 0 so the daemon can be launched unconditionally
    /// from cron; everything else is fatal.
    pub fn exit_code(&self) -> i32 {
        match self {
            DaemonError::AlreadyRunning => 0,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(DaemonError::AlreadyRunning.exit_code(), 0);
        assert_eq!(
            DaemonError::SensorFatal(SensorError::EndOfStream).exit_code(),
            1
        );
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(
            DaemonError::SensorOpen(SensorError::Open {
                path: "/dev/hidraw9".into(),
                source: io,
            })
            .exit_code(),
            1
        );
    }

    #[test]
    fn test_guard_conflict_maps_to_already_running() {
        let err: DaemonError = GuardError::AlreadyRunning("co2mon.lock".into()).into();
        assert!(matches!(err, DaemonError::AlreadyRunning));

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: DaemonError = GuardError::Io {
            name: "co2mon.lock".into(),
            source: io,
        }
        .into();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_disconnect_message() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe");
        let err = SensorError::Disconnected(io);
        assert!(err.to_string().contains("no longer available"));
    }
}
