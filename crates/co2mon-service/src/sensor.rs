//! Sensor sources.
//!
//! [`SensorSource`] abstracts over the USB monitor and the scripted
//! [`MockSensor`](crate::MockSensor) used in tests. Every poll yields a tagged
//! [`SensorRead`]; nothing is thrown.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use co2mon_types::{Frame, PartialReading, REPORT_LEN, SensorRead};

use crate::error::SensorError;

/// A lazy, non-restartable sequence of sensor reads.
///
/// Once a read returns [`SensorRead::Fatal`] the source is finished.
#[async_trait]
pub trait SensorSource: Send {
    /// Read the next value.
    async fn read(&mut self) -> SensorRead<SensorError>;
}

/// `HIDIOCSFEATURE(9)`: report id byte plus the 8-byte key.
#[cfg(target_os = "linux")]
const HIDIOCSFEATURE_9: u32 = (3 << 30) | (9 << 16) | ((b'H' as u32) << 8) | 0x06;

/// The monitor streams plaintext frames after receiving an all-zero key.
const ZERO_KEY: [u8; 9] = [0; 9];

/// USB CO2 monitor behind a Linux hidraw node.
///
/// The monitor sends one measurement per 8-byte report; values are merged
/// until both CO2 and temperature are known.
#[derive(Debug)]
pub struct HidrawSensor {
    path: PathBuf,
    file: tokio::fs::File,
    latest: PartialReading,
}

impl HidrawSensor {
    /// Open the device and send the key feature report.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, SensorError> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| SensorError::Open {
                path: path.clone(),
                source: e,
            })?;

        send_key(&file).map_err(|e| SensorError::Init {
            path: path.clone(),
            source: e,
        })?;

        info!("Opened CO2 monitor at {}", path.display());
        Ok(Self::from_file(path, tokio::fs::File::from_std(file)))
    }

    /// Wrap an already initialised report stream.
    pub(crate) fn from_file(path: PathBuf, file: tokio::fs::File) -> Self {
        Self {
            path,
            file,
            latest: PartialReading::default(),
        }
    }

    /// Device node this sensor reads from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SensorSource for HidrawSensor {
    async fn read(&mut self) -> SensorRead<SensorError> {
        let mut report = [0u8; REPORT_LEN];
        match self.file.read_exact(&mut report).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return SensorRead::Fatal(SensorError::EndOfStream);
            }
            Err(e) => return SensorRead::Fatal(SensorError::Disconnected(e)),
        }

        match Frame::decode(&report) {
            Ok(frame) => self.latest.apply(&frame),
            Err(e) => {
                debug!("Skipping report {:02X?}: {}", report, e);
                return SensorRead::TransientEmpty;
            }
        }

        match self.latest.complete() {
            Some(reading) => {
                SensorRead::Valid(reading.with_captured_at(time::OffsetDateTime::now_utc()))
            }
            None => SensorRead::TransientEmpty,
        }
    }
}

#[cfg(target_os = "linux")]
fn send_key(file: &std::fs::File) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    // SAFETY: the fd is open for the lifetime of `file` and the buffer
    // matches the size encoded in the request.
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), HIDIOCSFEATURE_9 as _, ZERO_KEY.as_ptr()) };
    if ret < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
fn send_key(_file: &std::fs::File) -> std::io::Result<()> {
    let _ = ZERO_KEY;
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "hidraw devices are only available on Linux",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use co2mon_types::FRAME_TERMINATOR;

    fn report(op: u8, value: u16) -> [u8; 8] {
        let [hi, lo] = value.to_be_bytes();
        let checksum = op.wrapping_add(hi).wrapping_add(lo);
        [op, hi, lo, checksum, FRAME_TERMINATOR, 0, 0, 0]
    }

    async fn sensor_over(reports: &[[u8; 8]]) -> (tempfile::TempDir, HidrawSensor) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hidraw");
        std::fs::write(&path, reports.concat()).unwrap();
        let file = tokio::fs::File::open(&path).await.unwrap();
        (dir, HidrawSensor::from_file(path, file))
    }

    #[test]
    fn test_feature_request_number() {
        #[cfg(target_os = "linux")]
        assert_eq!(HIDIOCSFEATURE_9, 0xC009_4806);
    }

    #[tokio::test]
    async fn test_open_missing_device() {
        let err = HidrawSensor::open("/nonexistent/hidraw7").await.unwrap_err();
        assert!(matches!(err, SensorError::Open { .. }));
    }

    #[tokio::test]
    async fn test_open_regular_file_fails_init() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-device");
        std::fs::write(&path, b"").unwrap();
        let err = HidrawSensor::open(&path).await.unwrap_err();
        assert!(matches!(err, SensorError::Init { .. }));
    }

    #[tokio::test]
    async fn test_transient_until_both_values_seen() {
        let (_dir, mut sensor) = sensor_over(&[
            report(0x41, 4000), // humidity only
            report(0x50, 612),
            report(0x42, 4706),
        ])
        .await;

        assert!(matches!(sensor.read().await, SensorRead::TransientEmpty));
        assert!(matches!(sensor.read().await, SensorRead::TransientEmpty));

        let read = sensor.read().await;
        let reading = read.valid().unwrap();
        assert_eq!(reading.co2, 612);
        assert!((reading.temperature - 20.975).abs() < 0.01);
        assert!(reading.captured_at.is_some());
    }

    #[tokio::test]
    async fn test_corrupt_report_is_skipped() {
        let mut bad = report(0x50, 900);
        bad[3] ^= 0xFF;
        let (_dir, mut sensor) =
            sensor_over(&[report(0x50, 500), report(0x42, 4706), bad]).await;

        let _ = sensor.read().await;
        assert_eq!(sensor.read().await.valid().map(|r| r.co2), Some(500));
        assert!(matches!(sensor.read().await, SensorRead::TransientEmpty));
    }

    #[tokio::test]
    async fn test_end_of_stream_is_fatal() {
        let (_dir, mut sensor) = sensor_over(&[report(0x50, 500)]).await;
        let _ = sensor.read().await;

        let read = sensor.read().await;
        assert!(read.is_fatal());
        assert!(matches!(read, SensorRead::Fatal(SensorError::EndOfStream)));
    }
}
