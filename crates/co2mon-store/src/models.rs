//! Retention schedule and fetch result models.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{Error, Result};

/// Name of the CO2 data source.
pub const CO2: &str = "CO2";
/// Name of the temperature data source.
pub const TEMP: &str = "TEMP";

/// How a data source interprets appended values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DataSourceKind {
    /// Each value is an instantaneous measurement.
    Gauge,
}

impl DataSourceKind {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            DataSourceKind::Gauge => "GAUGE",
        }
    }
}

impl FromStr for DataSourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "GAUGE" => Ok(DataSourceKind::Gauge),
            other => Err(Error::InvalidSchedule(format!(
                "unknown data source kind '{other}'"
            ))),
        }
    }
}

/// A numeric series stored in every archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    /// Series name, unique within the store.
    pub name: String,
    /// Interpretation of appended values.
    pub kind: DataSourceKind,
    /// Longest gap between appends, in seconds, before the interval is unknown.
    pub heartbeat: u32,
    /// Values below this are stored as unknown.
    pub min: Option<f64>,
    /// Values above this are stored as unknown.
    pub max: Option<f64>,
}

impl DataSource {
    /// An unbounded gauge.
    pub fn gauge(name: impl Into<String>, heartbeat: u32) -> Self {
        Self {
            name: name.into(),
            kind: DataSourceKind::Gauge,
            heartbeat,
            min: None,
            max: None,
        }
    }

    /// Whether `value` falls inside the accepted range.
    pub fn accepts(&self, value: f64) -> bool {
        value.is_finite()
            && self.min.is_none_or(|min| value >= min)
            && self.max.is_none_or(|max| value <= max)
    }
}

/// Function combining several primary data points into one archive row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Consolidation {
    Average,
    Min,
    Max,
    Last,
}

impl Consolidation {
    /// Canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Consolidation::Average => "AVERAGE",
            Consolidation::Min => "MIN",
            Consolidation::Max => "MAX",
            Consolidation::Last => "LAST",
        }
    }
}

impl fmt::Display for Consolidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Consolidation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "AVERAGE" => Ok(Consolidation::Average),
            "MIN" => Ok(Consolidation::Min),
            "MAX" => Ok(Consolidation::Max),
            "LAST" => Ok(Consolidation::Last),
            _ => Err(Error::InvalidSchedule(format!(
                "unknown consolidation function '{s}'"
            ))),
        }
    }
}

/// A ring of rows at one resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Archive {
    /// How primary data points are combined.
    pub consolidation: Consolidation,
    /// Fraction of a row that may be unknown while the row stays known.
    pub xff: f64,
    /// Primary data points per row.
    pub steps: u32,
    /// Number of rows kept.
    pub rows: u32,
}

impl Archive {
    pub fn new(consolidation: Consolidation, xff: f64, steps: u32, rows: u32) -> Self {
        Self {
            consolidation,
            xff,
            steps,
            rows,
        }
    }

    /// Seconds covered by one row.
    pub fn resolution(&self, step: u32) -> i64 {
        i64::from(step) * i64::from(self.steps)
    }

    /// Seconds covered by the whole ring.
    pub fn span(&self, step: u32) -> i64 {
        self.resolution(step) * i64::from(self.rows)
    }
}

/// Fixed layout of a store: base step, data sources and archives.
///
/// A schedule is written once when the store is created and never changes
/// afterwards; a different schedule requires a new store file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionSchedule {
    /// Base step in seconds (width of one primary data point).
    pub step: u32,
    pub data_sources: Vec<DataSource>,
    pub archives: Vec<Archive>,
}

impl RetentionSchedule {
    /// Layout used for the CO2 monitor.
    ///
    /// Five-minute step with `CO2` and `TEMP` gauges (heartbeat 600 s) and
    /// AVERAGE, MIN and MAX archives keeping:
    /// - 1 day at 5-minute resolution (288 rows)
    /// - 1 week at 15-minute resolution (672 rows)
    /// - 31 days at 1-hour resolution (744 rows)
    /// - ~7 years at 1-hour resolution (61320 rows)
    pub fn co2_temperature() -> Self {
        let layout = [(1, 288), (3, 672), (12, 744), (12, 61_320)];
        let archives = [
            Consolidation::Average,
            Consolidation::Min,
            Consolidation::Max,
        ]
        .into_iter()
        .flat_map(|cf| {
            layout
                .iter()
                .map(move |&(steps, rows)| Archive::new(cf, 0.5, steps, rows))
        })
        .collect();

        Self {
            step: 300,
            data_sources: vec![DataSource::gauge(CO2, 600), DataSource::gauge(TEMP, 600)],
            archives,
        }
    }

    /// Check the schedule for values the consolidation engine cannot handle.
    pub fn validate(&self) -> Result<()> {
        if self.step == 0 {
            return Err(Error::InvalidSchedule("step must be positive".into()));
        }
        if self.data_sources.is_empty() {
            return Err(Error::InvalidSchedule(
                "at least one data source is required".into(),
            ));
        }
        if self.archives.is_empty() {
            return Err(Error::InvalidSchedule(
                "at least one archive is required".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for ds in &self.data_sources {
            if ds.name.is_empty() {
                return Err(Error::InvalidSchedule(
                    "data source name cannot be empty".into(),
                ));
            }
            if !seen.insert(ds.name.as_str()) {
                return Err(Error::InvalidSchedule(format!(
                    "duplicate data source '{}'",
                    ds.name
                )));
            }
            if ds.heartbeat == 0 {
                return Err(Error::InvalidSchedule(format!(
                    "data source '{}' needs a positive heartbeat",
                    ds.name
                )));
            }
        }

        for (i, archive) in self.archives.iter().enumerate() {
            if archive.steps == 0 || archive.rows == 0 {
                return Err(Error::InvalidSchedule(format!(
                    "archive {i} needs positive steps and rows"
                )));
            }
            if !(0.0..1.0).contains(&archive.xff) {
                return Err(Error::InvalidSchedule(format!(
                    "archive {i} xff {} is outside [0, 1)",
                    archive.xff
                )));
            }
        }

        Ok(())
    }

    /// Position of a data source by name.
    pub fn data_source_index(&self, name: &str) -> Option<usize> {
        self.data_sources.iter().position(|ds| ds.name == name)
    }

    /// Longest span covered by any archive, in seconds.
    pub fn longest_span(&self) -> i64 {
        self.archives
            .iter()
            .map(|a| a.span(self.step))
            .max()
            .unwrap_or(0)
    }
}

/// Metadata about an open store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreInfo {
    pub schedule: RetentionSchedule,
    /// When the store was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Timestamp of the most recent append (the start time for a fresh store).
    #[serde(with = "time::serde::rfc3339")]
    pub last_update: OffsetDateTime,
}

/// One row of fetched values.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    /// End of the interval the row covers.
    pub at: OffsetDateTime,
    /// One value per data source, `None` when unknown.
    pub values: Vec<Option<f64>>,
}

/// A regular series read from one archive.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub consolidation: Consolidation,
    /// Seconds between consecutive points.
    pub resolution: i64,
    /// Data source names, in the order of [`SeriesPoint::values`].
    pub data_sources: Vec<String>,
    pub points: Vec<SeriesPoint>,
}

impl FetchResult {
    /// Values of a single data source.
    pub fn series(&self, name: &str) -> Option<Vec<(OffsetDateTime, Option<f64>)>> {
        let idx = self.data_sources.iter().position(|ds| ds == name)?;
        Some(
            self.points
                .iter()
                .map(|p| (p.at, p.values.get(idx).copied().flatten()))
                .collect(),
        )
    }

    /// Legend values (last/min/avg/max) of a single data source.
    pub fn summary(&self, name: &str) -> Option<SeriesSummary> {
        let series = self.series(name)?;
        Some(SeriesSummary::from_values(
            series.iter().filter_map(|(_, v)| *v),
        ))
    }
}

/// Aggregate of the known values of a series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SeriesSummary {
    pub last: Option<f64>,
    pub min: Option<f64>,
    pub avg: Option<f64>,
    pub max: Option<f64>,
    /// Number of known values.
    pub count: usize,
}

impl SeriesSummary {
    /// Summarize values in chronological order.
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let mut summary = Self::default();
        let mut sum = 0.0;
        for v in values {
            summary.last = Some(v);
            summary.min = Some(summary.min.map_or(v, |m| m.min(v)));
            summary.max = Some(summary.max.map_or(v, |m| m.max(v)));
            sum += v;
            summary.count += 1;
        }
        if summary.count > 0 {
            summary.avg = Some(sum / summary.count as f64);
        }
        summary
    }
}
