//! Main store implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::consolidate::{ConsolidationState, RowWrite};
use crate::error::{Error, Result};
use crate::models::{Archive, DataSource, FetchResult, RetentionSchedule, SeriesPoint, StoreInfo};
use crate::queries::FetchQuery;
use crate::schema;

/// How long a writer waits for another process holding the write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Offset of the initial update time before creation, so the first append
/// at creation time is already after it.
const START_OFFSET_SECS: i64 = 10;

/// Round-robin time-series store backed by a single SQLite file.
///
/// The footprint is fixed by the [`RetentionSchedule`] chosen at creation:
/// every archive is a ring of rows that is overwritten in place.
pub struct Store {
    conn: Connection,
    schedule: RetentionSchedule,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("step", &self.schedule.step)
            .field("archives", &self.schedule.archives.len())
            .finish()
    }
}

impl Store {
    /// Whether a store file exists at `path`.
    pub fn exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().is_file()
    }

    /// Create a new store at `path`, starting just before now.
    ///
    /// Fails with [`Error::AlreadyExists`] if anything is already there.
    pub fn create<P: AsRef<Path>>(path: P, schedule: &RetentionSchedule) -> Result<Self> {
        let start = OffsetDateTime::now_utc() - time::Duration::seconds(START_OFFSET_SECS);
        Self::create_at(path, schedule, start)
    }

    /// Create a new store at `path` whose first append must be after `start`.
    pub fn create_at<P: AsRef<Path>>(
        path: P,
        schedule: &RetentionSchedule,
        start: OffsetDateTime,
    ) -> Result<Self> {
        let path = path.as_ref();
        schedule.validate()?;

        if path.exists() {
            return Err(Error::AlreadyExists(path.to_path_buf()));
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Creating retention store at {}", path.display());
        let mut conn = Connection::open(path)?;
        configure(&conn)?;

        let result = write_layout(&mut conn, schedule, start);
        if let Err(e) = result {
            // Leave nothing half-created behind.
            drop(conn);
            let _ = std::fs::remove_file(path);
            return Err(e);
        }

        Ok(Self {
            conn,
            schedule: schedule.clone(),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an existing store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !Self::exists(path) {
            return Err(Error::NotFound(path.to_path_buf()));
        }

        debug!("Opening retention store at {}", path.display());
        let conn = Connection::open(path)?;
        configure(&conn)?;
        schema::check(&conn)?;
        let schedule = load_schedule(&conn)?;

        Ok(Self {
            conn,
            schedule,
            path: Some(path.to_path_buf()),
        })
    }

    /// Create a store in memory (for testing).
    pub fn open_in_memory(schedule: &RetentionSchedule, start: OffsetDateTime) -> Result<Self> {
        schedule.validate()?;
        let mut conn = Connection::open_in_memory()?;
        write_layout(&mut conn, schedule, start)?;
        Ok(Self {
            conn,
            schedule: schedule.clone(),
            path: None,
        })
    }

    /// Location of the store file, if on disk.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The immutable layout of this store.
    pub fn schedule(&self) -> &RetentionSchedule {
        &self.schedule
    }

    /// Store metadata.
    pub fn info(&self) -> Result<StoreInfo> {
        let (created_at, last_update): (i64, i64) = self
            .conn
            .query_row(
                "SELECT created_at, last_update FROM store_meta WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or(Error::NotInitialized)?;

        Ok(StoreInfo {
            schedule: self.schedule.clone(),
            created_at: timestamp(created_at)?,
            last_update: timestamp(last_update)?,
        })
    }

    /// Timestamp of the most recent append.
    pub fn last_update(&self) -> Result<OffsetDateTime> {
        let ts: i64 = self
            .conn
            .query_row("SELECT last_update FROM store_meta WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or(Error::NotInitialized)?;
        timestamp(ts)
    }

    /// Append one value per data source at `at`.
    ///
    /// `at` must be after the previous append. Values are given in data
    /// source order; `None` marks a value as unknown. The whole update runs
    /// in one immediate transaction, so concurrent writers are serialized
    /// and a failed append leaves the store unchanged.
    ///
    /// Returns the number of archive rows written.
    pub fn append(&mut self, at: OffsetDateTime, values: &[Option<f64>]) -> Result<usize> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let raw: String =
            tx.query_row("SELECT state FROM store_meta WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or(Error::NotInitialized)?;
        let mut state: ConsolidationState = serde_json::from_str(&raw)?;

        let rows = state.update(&self.schedule, at.unix_timestamp(), values)?;
        write_rows(&tx, &rows)?;

        tx.execute(
            "UPDATE store_meta SET last_update = ?1, state = ?2 WHERE id = 1",
            rusqlite::params![state.last_update, serde_json::to_string(&state)?],
        )?;
        tx.commit()?;

        debug!("Appended {:?} at {} ({} rows)", values, at.unix_timestamp(), rows.len());
        Ok(rows.len())
    }

    /// Read a regular series from the archive best matching `query`.
    pub fn fetch(&self, query: &FetchQuery) -> Result<FetchResult> {
        let last_update = self.last_update()?.unix_timestamp();
        let (start, end) = query.range(last_update);
        let idx = query.select_archive(&self.schedule, start, last_update)?;
        let archive = &self.schedule.archives[idx];

        let resolution = archive.resolution(self.schedule.step);
        let newest = end.div_euclid(resolution) * resolution;
        let oldest_kept = last_update.div_euclid(resolution) * resolution
            - (i64::from(archive.rows) - 1) * resolution;
        let first = ((start.div_euclid(resolution) + 1) * resolution).max(oldest_kept);

        let mut stmt = self.conn.prepare(
            "SELECT ends_at, ds, value FROM archive_rows
             WHERE archive = ?1 AND ends_at BETWEEN ?2 AND ?3",
        )?;
        let stored: HashMap<(i64, usize), Option<f64>> = stmt
            .query_map(rusqlite::params![idx as i64, first, newest], |row| {
                Ok((
                    (row.get::<_, i64>(0)?, row.get::<_, i64>(1)? as usize),
                    row.get::<_, Option<f64>>(2)?,
                ))
            })?
            .collect::<std::result::Result<_, _>>()?;

        let sources = self.schedule.data_sources.len();
        let mut points = Vec::new();
        let mut ends_at = first;
        while ends_at <= newest {
            let values = (0..sources)
                .map(|ds| stored.get(&(ends_at, ds)).copied().flatten())
                .collect();
            points.push(SeriesPoint {
                at: timestamp(ends_at)?,
                values,
            });
            ends_at += resolution;
        }

        debug!(
            "Fetched {} points from archive {} ({}s resolution)",
            points.len(),
            idx,
            resolution
        );

        Ok(FetchResult {
            consolidation: archive.consolidation,
            resolution,
            data_sources: self
                .schedule
                .data_sources
                .iter()
                .map(|ds| ds.name.clone())
                .collect(),
            points,
        })
    }
}

fn configure(conn: &Connection) -> Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}

fn timestamp(ts: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(ts).map_err(|e| Error::InvalidTimestamp(e.to_string()))
}

/// Write schema, schedule and initial state in one transaction.
fn write_layout(
    conn: &mut Connection,
    schedule: &RetentionSchedule,
    start: OffsetDateTime,
) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
    schema::initialize(&tx)?;

    for (idx, ds) in schedule.data_sources.iter().enumerate() {
        tx.execute(
            "INSERT INTO data_sources (idx, name, kind, heartbeat, min, max)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                idx as i64,
                ds.name,
                ds.kind.as_str(),
                ds.heartbeat,
                ds.min,
                ds.max
            ],
        )?;
    }

    for (idx, archive) in schedule.archives.iter().enumerate() {
        tx.execute(
            "INSERT INTO archives (idx, consolidation, xff, steps, rows)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                idx as i64,
                archive.consolidation.as_str(),
                archive.xff,
                archive.steps,
                archive.rows
            ],
        )?;
    }

    let start = start.unix_timestamp();
    let state = ConsolidationState::new(schedule, start);
    tx.execute(
        "INSERT INTO store_meta (id, step, created_at, last_update, state)
         VALUES (1, ?1, ?2, ?3, ?4)",
        rusqlite::params![
            schedule.step,
            OffsetDateTime::now_utc().unix_timestamp(),
            start,
            serde_json::to_string(&state)?
        ],
    )?;

    tx.commit()?;
    Ok(())
}

fn load_schedule(conn: &Connection) -> Result<RetentionSchedule> {
    let step: u32 = conn
        .query_row("SELECT step FROM store_meta WHERE id = 1", [], |row| row.get(0))
        .optional()?
        .ok_or(Error::NotInitialized)?;

    let mut stmt = conn
        .prepare("SELECT name, kind, heartbeat, min, max FROM data_sources ORDER BY idx")?;
    let data_sources = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, Option<f64>>(3)?,
                row.get::<_, Option<f64>>(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?
        .into_iter()
        .map(|(name, kind, heartbeat, min, max)| {
            Ok(DataSource {
                name,
                kind: kind.parse()?,
                heartbeat,
                min,
                max,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut stmt =
        conn.prepare("SELECT consolidation, xff, steps, rows FROM archives ORDER BY idx")?;
    let archives = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, u32>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?
        .into_iter()
        .map(|(cf, xff, steps, rows)| Ok(Archive::new(cf.parse()?, xff, steps, rows)))
        .collect::<Result<Vec<_>>>()?;

    let schedule = RetentionSchedule {
        step,
        data_sources,
        archives,
    };
    schedule
        .validate()
        .map_err(|e| Error::CorruptState(e.to_string()))?;
    Ok(schedule)
}

fn write_rows(conn: &Connection, rows: &[RowWrite]) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR REPLACE INTO archive_rows (archive, slot, ds, ends_at, value)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for row in rows {
        stmt.execute(rusqlite::params![
            row.archive as i64,
            row.slot,
            row.ds as i64,
            row.ends_at,
            row.value
        ])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CO2, Consolidation, TEMP};

    const START: i64 = 1_700_000_000;

    fn at(ts: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(ts).unwrap()
    }

    fn memory_store() -> Store {
        Store::open_in_memory(&RetentionSchedule::co2_temperature(), at(START)).unwrap()
    }

    #[test]
    fn test_open_in_memory() {
        let store = memory_store();
        let info = store.info().unwrap();
        assert_eq!(info.last_update, at(START));
        assert_eq!(info.schedule, RetentionSchedule::co2_temperature());
        assert!(store.path().is_none());
    }

    #[test]
    fn test_append_advances_last_update() {
        let mut store = memory_store();
        store.append(at(START + 60), &[Some(450.0), Some(21.0)]).unwrap();
        assert_eq!(store.last_update().unwrap(), at(START + 60));
    }

    #[test]
    fn test_append_rejects_stale_timestamp() {
        let mut store = memory_store();
        store.append(at(START + 60), &[Some(450.0), Some(21.0)]).unwrap();

        let err = store
            .append(at(START + 60), &[Some(500.0), Some(22.0)])
            .unwrap_err();
        assert!(matches!(err, Error::NonMonotonic { .. }));
        assert_eq!(store.last_update().unwrap(), at(START + 60));
    }

    #[test]
    fn test_append_rejects_wrong_value_count() {
        let mut store = memory_store();
        assert!(matches!(
            store.append(at(START + 60), &[Some(450.0)]),
            Err(Error::ValueCount { .. })
        ));
        assert_eq!(store.last_update().unwrap(), at(START));
    }

    #[test]
    fn test_fetch_after_minute_appends() {
        let mut store = memory_store();
        let mut t = START;
        for _ in 0..60 {
            t += 60;
            store.append(at(t), &[Some(450.0), Some(21.0)]).unwrap();
        }

        let query = FetchQuery::new(Consolidation::Average).window(at(t), time::Duration::hours(1));
        let result = store.fetch(&query).unwrap();
        assert_eq!(result.resolution, 300);
        assert_eq!(result.data_sources, vec![CO2.to_string(), TEMP.to_string()]);

        let co2 = result.summary(CO2).unwrap();
        assert_eq!(co2.min, Some(450.0));
        assert_eq!(co2.max, Some(450.0));
        // Every full step of the last hour is known.
        assert!(co2.count >= 11);

        let temp = result.summary(TEMP).unwrap();
        assert_eq!(temp.last, Some(21.0));
    }

    #[test]
    fn test_fetch_points_are_regular() {
        let mut store = memory_store();
        store.append(at(START + 600), &[Some(450.0), Some(21.0)]).unwrap();

        let query = FetchQuery::new(Consolidation::Average)
            .window(at(START + 600), time::Duration::hours(2));
        let result = store.fetch(&query).unwrap();
        for pair in result.points.windows(2) {
            assert_eq!((pair[1].at - pair[0].at).whole_seconds(), 300);
        }
        // Nothing was known before the store existed.
        assert!(result.points.first().unwrap().values.iter().all(Option::is_none));
    }

    #[test]
    fn test_fetch_missing_archive() {
        let store = memory_store();
        assert!(matches!(
            store.fetch(&FetchQuery::new(Consolidation::Last)),
            Err(Error::NoArchive(Consolidation::Last))
        ));
    }

    #[test]
    fn test_footprint_is_bounded() {
        let schedule = RetentionSchedule {
            step: 60,
            data_sources: vec![DataSource::gauge("X", 120)],
            archives: vec![Archive::new(Consolidation::Average, 0.5, 1, 5)],
        };
        let mut store = Store::open_in_memory(&schedule, at(START)).unwrap();
        let mut t = START;
        for i in 0..50 {
            t += 60;
            store.append(at(t), &[Some(f64::from(i))]).unwrap();
        }

        let rows: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM archive_rows", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 5);
    }
}
