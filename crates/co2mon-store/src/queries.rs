//! Fetch query builder.
//!
//! [`FetchQuery`] describes a time range and a consolidation function; the
//! store answers it from the finest archive that still covers the range.
//!
//! # Example
//!
//! ```
//! use co2mon_store::{Consolidation, FetchQuery, RetentionSchedule, Store};
//! use time::{Duration, OffsetDateTime, PrimitiveDateTime};
//!
//! let now = OffsetDateTime::now_utc();
//! let store = Store::open_in_memory(&RetentionSchedule::co2_temperature(), now)?;
//!
//! // Last 8 hours of averages
//! let query = FetchQuery::new(Consolidation::Average).window(now, Duration::hours(8));
//! let result = store.fetch(&query)?;
//! assert_eq!(result.resolution, 300);
//! # Ok::<(), co2mon_store::Error>(())
//! ```

use time::{Duration, OffsetDateTime, PrimitiveDateTime};

use crate::error::{Error, Result};
use crate::models::{Consolidation, RetentionSchedule};

/// Range used when a query gives no start.
const DEFAULT_RANGE_SECS: i64 = 86_400;

/// Fluent query builder for [`Store::fetch`](crate::Store::fetch).
///
/// Without explicit bounds a query covers the day before the last update.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchQuery {
    /// Consolidation function of the archive to read.
    pub consolidation: Consolidation,
    /// Exclusive start of the range.
    pub since: Option<OffsetDateTime>,
    /// Inclusive end of the range.
    pub until: Option<OffsetDateTime>,
    /// Coarsest acceptable resolution, in seconds.
    pub resolution: Option<i64>,
}

impl FetchQuery {
    pub fn new(consolidation: Consolidation) -> Self {
        Self {
            consolidation,
            since: None,
            until: None,
            resolution: None,
        }
    }

    /// Read rows ending after this time.
    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    /// Read rows ending at or before this time.
    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    /// Read the `length` of time ending at `end`.
    ///
    /// A window reaching past the earliest representable date starts there.
    pub fn window(self, end: OffsetDateTime, length: Duration) -> Self {
        let start = end
            .checked_sub(length)
            .unwrap_or_else(|| PrimitiveDateTime::MIN.assume_utc());
        self.since(start).until(end)
    }

    /// Prefer archives at least this coarse.
    pub fn resolution(mut self, seconds: i64) -> Self {
        self.resolution = Some(seconds);
        self
    }

    /// Resolve the range against the store's last update, as unix seconds.
    pub(crate) fn range(&self, last_update: i64) -> (i64, i64) {
        let end = self
            .until
            .map_or(last_update, OffsetDateTime::unix_timestamp)
            .min(last_update);
        let start = self
            .since
            .map_or(end - DEFAULT_RANGE_SECS, OffsetDateTime::unix_timestamp);
        (start, end)
    }

    /// Pick the archive answering this query.
    ///
    /// The finest archive of the requested function whose ring still reaches
    /// back to `start` wins; if none does, the one reaching furthest back.
    pub(crate) fn select_archive(
        &self,
        schedule: &RetentionSchedule,
        start: i64,
        last_update: i64,
    ) -> Result<usize> {
        let mut candidates: Vec<(usize, i64, i64)> = schedule
            .archives
            .iter()
            .enumerate()
            .filter(|(_, a)| a.consolidation == self.consolidation)
            .map(|(i, a)| (i, a.resolution(schedule.step), a.span(schedule.step)))
            .collect();

        if candidates.is_empty() {
            return Err(Error::NoArchive(self.consolidation));
        }

        candidates.sort_by_key(|&(_, resolution, span)| (resolution, span));

        let covering = candidates.iter().find(|&&(_, resolution, span)| {
            let newest = last_update.div_euclid(resolution) * resolution;
            newest - span <= start && self.resolution.is_none_or(|r| resolution >= r)
        });

        let chosen = match covering {
            Some(&(idx, _, _)) => idx,
            None => {
                candidates
                    .iter()
                    .max_by_key(|&&(_, _, span)| span)
                    .map(|&(idx, _, _)| idx)
                    .ok_or(Error::NoArchive(self.consolidation))?
            }
        };

        Ok(chosen)
    }
}
