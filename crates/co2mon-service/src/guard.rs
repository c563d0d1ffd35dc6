//! Single-instance guard.
//!
//! The guard is released by the kernel when the process exits, however it
//! exits, so there is never a stale lock to clean up. On Linux it is a Unix
//! socket bound in the abstract namespace; elsewhere an exclusive lock on a
//! file in the temp directory.

use tracing::debug;

use crate::error::GuardError;

/// Proof that this process is the only running instance.
///
/// Dropping the guard releases it.
#[derive(Debug)]
pub struct InstanceGuard {
    name: String,
    #[cfg(target_os = "linux")]
    _socket: std::os::unix::net::UnixListener,
    #[cfg(not(target_os = "linux"))]
    _file: std::fs::File,
}

impl InstanceGuard {
    /// Acquire the guard called `name`.
    ///
    /// Returns [`GuardError::AlreadyRunning`] if another live process holds it.
    pub fn acquire(name: &str) -> Result<Self, GuardError> {
        let guard = Self::acquire_platform(name)?;
        debug!("Acquired instance guard {}", name);
        Ok(guard)
    }

    /// Name the guard was acquired under.
    pub fn name(&self) -> &str {
        &self.name
    }

    #[cfg(target_os = "linux")]
    fn acquire_platform(name: &str) -> Result<Self, GuardError> {
        use std::os::linux::net::SocketAddrExt;
        use std::os::unix::net::{SocketAddr, UnixListener};

        let io_err = |source| GuardError::Io {
            name: name.to_string(),
            source,
        };

        let addr = SocketAddr::from_abstract_name(name.as_bytes()).map_err(io_err)?;
        match UnixListener::bind_addr(&addr) {
            Ok(socket) => Ok(Self {
                name: name.to_string(),
                _socket: socket,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                Err(GuardError::AlreadyRunning(name.to_string()))
            }
            Err(e) => Err(io_err(e)),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn acquire_platform(name: &str) -> Result<Self, GuardError> {
        let path = std::env::temp_dir().join(name);
        let io_err = |source| GuardError::Io {
            name: name.to_string(),
            source,
        };

        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(io_err)?;
        match file.try_lock() {
            Ok(()) => Ok(Self {
                name: name.to_string(),
                _file: file,
            }),
            Err(std::fs::TryLockError::WouldBlock) => {
                Err(GuardError::AlreadyRunning(name.to_string()))
            }
            Err(std::fs::TryLockError::Error(e)) => Err(io_err(e)),
        }
    }
}
