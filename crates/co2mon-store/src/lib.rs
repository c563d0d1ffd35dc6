//! Round-robin time-series storage for CO2 monitor samples.
//!
//! A store has a fixed footprint decided at creation by its
//! [`RetentionSchedule`]: samples are consolidated into primary data points
//! once per step and folded into archives of different resolutions, each a
//! ring of rows overwritten in place. The data lives in a single SQLite file.
//!
//! # Example
//!
//! ```no_run
//! use co2mon_store::{RetentionSchedule, Store, default_store_path};
//! use time::OffsetDateTime;
//!
//! let path = default_store_path();
//! let mut store = if Store::exists(&path) {
//!     Store::open(&path)?
//! } else {
//!     Store::create(&path, &RetentionSchedule::co2_temperature())?
//! };
//!
//! store.append(OffsetDateTime::now_utc(), &[Some(612.0), Some(21.4)])?;
//! # Ok::<(), co2mon_store::Error>(())
//! ```

mod consolidate;
mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{
    Archive, CO2, Consolidation, DataSource, DataSourceKind, FetchResult, RetentionSchedule,
    SeriesPoint, SeriesSummary, StoreInfo, TEMP,
};
pub use queries::FetchQuery;
pub use store::Store;

/// Default location of the store file.
pub fn default_store_path() -> std::path::PathBuf {
    std::path::PathBuf::from("/var/local/monitor/co2-temp.rrd")
}
