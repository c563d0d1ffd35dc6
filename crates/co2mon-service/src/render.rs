//! Graph snapshots.
//!
//! After every persisted sample the renderer redraws one CO2 and one
//! temperature graph per configured window from the store's AVERAGE archives.
//! Images are written next to their final name and renamed into place, so a
//! web server never serves a half-written file.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::{ImageFormat, Rgb, RgbImage};
use time::OffsetDateTime;
use tracing::{debug, warn};

use co2mon_store::{CO2, Consolidation, FetchQuery, FetchResult, SeriesSummary, Store, TEMP};

use crate::config::Config;
use crate::error::RenderError;
use crate::thresholds::Co2Thresholds;

const BACKGROUND: Rgb<u8> = Rgb([0xFF, 0xFF, 0xFF]);
const FRAME: Rgb<u8> = Rgb([0x80, 0x80, 0x80]);
const GRID: Rgb<u8> = Rgb([0xE0, 0xE0, 0xE0]);
const CO2_LINE: Rgb<u8> = Rgb([0x00, 0x00, 0xFF]);
const TEMP_LINE: Rgb<u8> = Rgb([0x00, 0xFF, 0x00]);

/// Blank border around the plot area, in pixels.
const MARGIN: u32 = 10;
/// Horizontal grid lines.
const GRID_LINES: u32 = 4;

/// Longest window a graph may cover.
pub const MAX_WINDOW_YEARS: u32 = 100;

/// Unit of a graph window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowUnit {
    Hours,
    Days,
    Weeks,
    /// 30 days.
    Months,
    /// 365 days.
    Years,
}

impl WindowUnit {
    fn suffix(&self) -> char {
        match self {
            WindowUnit::Hours => 'h',
            WindowUnit::Days => 'd',
            WindowUnit::Weeks => 'w',
            WindowUnit::Months => 'm',
            WindowUnit::Years => 'y',
        }
    }

    fn hours(&self) -> i64 {
        match self {
            WindowUnit::Hours => 1,
            WindowUnit::Days => 24,
            WindowUnit::Weeks => 7 * 24,
            WindowUnit::Months => 30 * 24,
            WindowUnit::Years => 365 * 24,
        }
    }
}

/// A time window ending now, written like `8h`, `7d` or `1y`.
///
/// ```
/// use co2mon_service::GraphWindow;
///
/// let window: GraphWindow = "1m".parse()?;
/// assert_eq!(window.duration(), time::Duration::days(30));
/// assert_eq!(window.to_string(), "1m");
/// # Ok::<(), co2mon_service::RenderError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphWindow {
    count: u32,
    unit: WindowUnit,
}

impl GraphWindow {
    pub fn new(count: u32, unit: WindowUnit) -> Self {
        Self { count, unit }
    }

    /// Label used in file names.
    pub fn label(&self) -> String {
        self.to_string()
    }

    pub fn duration(&self) -> time::Duration {
        time::Duration::hours(self.hours())
    }

    /// Start of the window ending at `end`, if that is a representable date.
    pub fn start(&self, end: OffsetDateTime) -> Option<OffsetDateTime> {
        end.checked_sub(self.duration())
    }

    fn hours(&self) -> i64 {
        i64::from(self.count) * self.unit.hours()
    }

    /// Windows drawn when nothing is configured.
    pub fn defaults() -> Vec<GraphWindow> {
        vec![
            GraphWindow::new(8, WindowUnit::Hours),
            GraphWindow::new(24, WindowUnit::Hours),
            GraphWindow::new(7, WindowUnit::Days),
            GraphWindow::new(1, WindowUnit::Months),
            GraphWindow::new(1, WindowUnit::Years),
        ]
    }
}

impl fmt::Display for GraphWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, self.unit.suffix())
    }
}

impl FromStr for GraphWindow {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RenderError::InvalidWindow(s.to_string());
        let split = s.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
        let (digits, suffix) = s.split_at(split);

        let count: u32 = digits.parse().map_err(|_| invalid())?;
        let unit = match suffix {
            "h" => WindowUnit::Hours,
            "d" => WindowUnit::Days,
            "w" => WindowUnit::Weeks,
            "m" => WindowUnit::Months,
            "y" => WindowUnit::Years,
            _ => return Err(invalid()),
        };
        if count == 0 {
            return Err(invalid());
        }
        let window = Self::new(count, unit);
        if window.hours() > i64::from(MAX_WINDOW_YEARS) * WindowUnit::Years.hours() {
            return Err(RenderError::WindowTooLong(s.to_string()));
        }
        Ok(window)
    }
}

/// Outcome of one render pass.
#[derive(Debug, Default)]
pub struct RenderReport {
    /// Images written.
    pub rendered: Vec<PathBuf>,
    /// Images that could not be produced, keyed by their target path.
    pub failures: Vec<(PathBuf, RenderError)>,
}

impl RenderReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Anything that can redraw the snapshots after a persisted sample.
pub trait Snapshots: Send {
    /// Redraw every graph as of `now`. Never fails; problems are reported.
    fn render(&mut self, now: OffsetDateTime) -> RenderReport;
}

/// Draws the graphs from the store file.
#[derive(Debug, Clone)]
pub struct SnapshotRenderer {
    store_path: PathBuf,
    output_dir: PathBuf,
    windows: Vec<GraphWindow>,
    width: u32,
    height: u32,
    thresholds: Co2Thresholds,
}

impl SnapshotRenderer {
    pub fn new(store_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
            output_dir: output_dir.into(),
            windows: GraphWindow::defaults(),
            width: 600,
            height: 200,
            thresholds: Co2Thresholds::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.storage.path, &config.graphs.output_dir)
            .with_windows(config.graphs.parsed_windows())
            .with_size(config.graphs.width, config.graphs.height)
    }

    pub fn with_windows(mut self, windows: Vec<GraphWindow>) -> Self {
        self.windows = windows;
        self
    }

    /// Plot area size in pixels.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn windows(&self) -> &[GraphWindow] {
        &self.windows
    }

    /// Target file of a series graph.
    pub fn output_path(&self, series: &str, window: &GraphWindow) -> PathBuf {
        self.output_dir
            .join(format!("{}-{}-graph.png", series.to_lowercase(), window))
    }

    /// Draw every window from an open store.
    pub fn render_from(&self, store: &Store, now: OffsetDateTime) -> RenderReport {
        let mut report = RenderReport::default();

        if let Err(e) = std::fs::create_dir_all(&self.output_dir) {
            let err = RenderError::Write {
                path: self.output_dir.clone(),
                source: e,
            };
            warn!("{}", err);
            report.failures.push((self.output_dir.clone(), err));
            return report;
        }

        for window in &self.windows {
            let co2_path = self.output_path(CO2, window);
            let temp_path = self.output_path(TEMP, window);

            let Some(start) = window.start(now) else {
                let err = RenderError::WindowTooLong(window.label());
                warn!("{}", err);
                report.failures.push((co2_path, err));
                continue;
            };

            let query = FetchQuery::new(Consolidation::Average).window(now, window.duration());
            let data = match store.fetch(&query) {
                Ok(data) => data,
                Err(e) => {
                    warn!("Failed to read {} window: {}", window, e);
                    report.failures.push((co2_path, RenderError::Store(e)));
                    continue;
                }
            };

            let jobs = [
                (co2_path, self.co2_graph(&data, start, now)),
                (temp_path, self.temp_graph(&data, start, now)),
            ];
            for (path, image) in jobs {
                match write_png(&image, &path) {
                    Ok(()) => report.rendered.push(path),
                    Err(e) => {
                        warn!("Failed to render {}: {}", path.display(), e);
                        report.failures.push((path, e));
                    }
                }
            }
        }

        debug!(
            "Rendered {} graphs ({} failed)",
            report.rendered.len(),
            report.failures.len()
        );
        report
    }

    fn co2_graph(
        &self,
        data: &FetchResult,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> RgbImage {
        let series = data.series(CO2).unwrap_or_default();
        let summary = data.summary(CO2).unwrap_or_default();
        log_summary(CO2, &summary);

        let critical = f64::from(self.thresholds.critical);
        let top = summary.max.unwrap_or(critical).max(critical) * 1.1;
        let mut plot = Plot::new(self.width, self.height, start, end, 0.0, top);
        for (ppm, band) in self.thresholds.reference_lines() {
            plot.hrule(f64::from(ppm), Rgb(band.color()));
        }
        plot.series(&series, CO2_LINE);
        plot.finish()
    }

    fn temp_graph(
        &self,
        data: &FetchResult,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> RgbImage {
        let series = data.series(TEMP).unwrap_or_default();
        let summary = data.summary(TEMP).unwrap_or_default();
        log_summary(TEMP, &summary);

        let (bottom, top) = match (summary.min, summary.max) {
            (Some(min), Some(max)) => (min - 0.5, max + 0.5),
            _ => (0.0, 1.0),
        };
        let mut plot = Plot::new(self.width, self.height, start, end, bottom, top);
        plot.series(&series, TEMP_LINE);
        plot.finish()
    }
}

impl Snapshots for SnapshotRenderer {
    fn render(&mut self, now: OffsetDateTime) -> RenderReport {
        match Store::open(&self.store_path) {
            Ok(store) => self.render_from(&store, now),
            Err(e) => {
                warn!("Cannot open store for rendering: {}", e);
                let mut report = RenderReport::default();
                report
                    .failures
                    .push((self.store_path.clone(), RenderError::Store(e)));
                report
            }
        }
    }
}

fn log_summary(name: &str, summary: &SeriesSummary) {
    let fmt = |v: Option<f64>| v.map_or_else(|| "nan".to_string(), |v| format!("{:8.2}", v));
    debug!(
        "{} Last:{} Min:{} Avg:{} Max:{}",
        name,
        fmt(summary.last),
        fmt(summary.min),
        fmt(summary.avg),
        fmt(summary.max)
    );
}

fn write_png(img: &RgbImage, path: &Path) -> Result<(), RenderError> {
    let tmp = path.with_extension("png.tmp");
    img.save_with_format(&tmp, ImageFormat::Png)
        .map_err(|e| RenderError::Encode {
            path: path.to_path_buf(),
            source: e,
        })?;
    std::fs::rename(&tmp, path).map_err(|e| RenderError::Write {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Plot area mapping time and value onto pixels.
struct Plot {
    img: RgbImage,
    width: u32,
    height: u32,
    start: i64,
    end: i64,
    bottom: f64,
    top: f64,
}

impl Plot {
    fn new(
        width: u32,
        height: u32,
        start: OffsetDateTime,
        end: OffsetDateTime,
        bottom: f64,
        top: f64,
    ) -> Self {
        let img = RgbImage::from_pixel(width + 2 * MARGIN, height + 2 * MARGIN, BACKGROUND);
        let start = start.unix_timestamp();
        let mut plot = Self {
            img,
            width,
            height,
            start,
            end: end.unix_timestamp().max(start + 1),
            bottom,
            top: if top > bottom { top } else { bottom + 1.0 },
        };
        plot.grid();
        plot
    }

    fn grid(&mut self) {
        let (left, right) = (MARGIN as i64, (MARGIN + self.width - 1) as i64);
        let (upper, lower) = (MARGIN as i64, (MARGIN + self.height - 1) as i64);
        for i in 1..GRID_LINES {
            let y = upper + (lower - upper) * i64::from(i) / i64::from(GRID_LINES);
            self.line((left, y), (right, y), GRID);
        }
        self.line((left, upper), (right, upper), FRAME);
        self.line((left, lower), (right, lower), FRAME);
        self.line((left, upper), (left, lower), FRAME);
        self.line((right, upper), (right, lower), FRAME);
    }

    fn x(&self, at: OffsetDateTime) -> i64 {
        let offset = (at.unix_timestamp() - self.start) as f64 / (self.end - self.start) as f64;
        MARGIN as i64 + (offset * f64::from(self.width - 1)).round() as i64
    }

    fn y(&self, value: f64) -> i64 {
        let offset = (value - self.bottom) / (self.top - self.bottom);
        (MARGIN + self.height - 1) as i64 - (offset * f64::from(self.height - 1)).round() as i64
    }

    /// Horizontal reference line, if inside the value range.
    fn hrule(&mut self, value: f64, color: Rgb<u8>) {
        if value < self.bottom || value > self.top {
            return;
        }
        let y = self.y(value);
        let right = (MARGIN + self.width - 1) as i64;
        self.line((MARGIN as i64, y), (right, y), color);
    }

    /// Connect consecutive known points; unknown points break the line.
    fn series(&mut self, points: &[(OffsetDateTime, Option<f64>)], color: Rgb<u8>) {
        let mut prev: Option<(i64, i64)> = None;
        for (at, value) in points {
            let Some(value) = value else {
                prev = None;
                continue;
            };
            let point = (self.x(*at), self.y(*value));
            self.line(prev.unwrap_or(point), point, color);
            prev = Some(point);
        }
    }

    /// Bresenham line, clipped to the plot area.
    fn line(&mut self, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
        let (mut x, mut y) = from;
        let dx = (to.0 - x).abs();
        let dy = -(to.1 - y).abs();
        let sx = if x < to.0 { 1 } else { -1 };
        let sy = if y < to.1 { 1 } else { -1 };
        let mut err = dx + dy;

        loop {
            self.put(x, y, color);
            if x == to.0 && y == to.1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    fn put(&mut self, x: i64, y: i64, color: Rgb<u8>) {
        let inside_x = x >= MARGIN as i64 && x < (MARGIN + self.width) as i64;
        let inside_y = y >= MARGIN as i64 && y < (MARGIN + self.height) as i64;
        if inside_x && inside_y {
            self.img.put_pixel(x as u32, y as u32, color);
        }
    }

    fn finish(self) -> RgbImage {
        self.img
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use co2mon_store::RetentionSchedule;

    const START: i64 = 1_700_000_000;

    fn at(ts: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(ts).unwrap()
    }

    fn filled_store(minutes: i64) -> (Store, OffsetDateTime) {
        let mut store =
            Store::open_in_memory(&RetentionSchedule::co2_temperature(), at(START)).unwrap();
        let mut t = START;
        for i in 0..minutes {
            t += 60;
            let co2 = 450.0 + (i % 30) as f64 * 20.0;
            store.append(at(t), &[Some(co2), Some(21.0)]).unwrap();
        }
        (store, at(t))
    }

    #[test]
    fn test_parse_windows() {
        let parse = |s: &str| s.parse::<GraphWindow>();
        assert_eq!(parse("8h").unwrap().duration(), time::Duration::hours(8));
        assert_eq!(parse("24h").unwrap().label(), "24h");
        assert_eq!(parse("7d").unwrap().duration(), time::Duration::days(7));
        assert_eq!(parse("2w").unwrap().duration(), time::Duration::days(14));
        assert_eq!(parse("1y").unwrap().duration(), time::Duration::days(365));
        assert!(parse("").is_err());
        assert!(parse("h").is_err());
        assert!(parse("0d").is_err());
        assert!(parse("12").is_err());
        assert!(parse("3x").is_err());
        assert!(parse("1hh").is_err());
    }

    #[test]
    fn test_windows_are_bounded() {
        let parse = |s: &str| s.parse::<GraphWindow>();
        assert_eq!(parse("100y").unwrap().duration(), time::Duration::days(36_500));
        assert!(matches!(parse("101y"), Err(RenderError::WindowTooLong(_))));
        assert!(matches!(parse("20000y"), Err(RenderError::WindowTooLong(_))));
        assert!(matches!(parse("5000000d"), Err(RenderError::WindowTooLong(_))));
    }

    #[test]
    fn test_unrepresentable_window_is_reported() {
        let (store, now) = filled_store(10);
        let dir = tempfile::tempdir().unwrap();
        let renderer = SnapshotRenderer::new("unused", dir.path()).with_windows(vec![
            GraphWindow::new(20_000, WindowUnit::Years),
            "8h".parse().unwrap(),
        ]);

        let report = renderer.render_from(&store, now);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0].1, RenderError::WindowTooLong(_)));
        // The other windows still render.
        assert_eq!(report.rendered.len(), 2);
    }

    #[test]
    fn test_default_windows() {
        let labels: Vec<String> = GraphWindow::defaults().iter().map(|w| w.label()).collect();
        assert_eq!(labels, vec!["8h", "24h", "7d", "1m", "1y"]);
    }

    #[test]
    fn test_output_names() {
        let renderer = SnapshotRenderer::new("/tmp/x.rrd", "/srv/images");
        let window: GraphWindow = "8h".parse().unwrap();
        assert_eq!(
            renderer.output_path(CO2, &window),
            PathBuf::from("/srv/images/co2-8h-graph.png")
        );
        assert_eq!(
            renderer.output_path(TEMP, &window),
            PathBuf::from("/srv/images/temp-8h-graph.png")
        );
    }

    #[test]
    fn test_render_writes_two_images_per_window() {
        let (store, now) = filled_store(120);
        let dir = tempfile::tempdir().unwrap();
        let renderer = SnapshotRenderer::new("unused", dir.path().join("images"))
            .with_size(300, 100);

        let report = renderer.render_from(&store, now);
        assert!(report.is_complete(), "{:?}", report.failures);
        assert_eq!(report.rendered.len(), 10);

        for name in ["co2-8h-graph.png", "temp-1y-graph.png"] {
            let img = image::open(dir.path().join("images").join(name))
                .unwrap()
                .into_rgb8();
            assert_eq!(img.dimensions(), (300 + 2 * MARGIN, 100 + 2 * MARGIN));
        }
        // No temp files left behind.
        let leftovers = std::fs::read_dir(dir.path().join("images"))
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".tmp")
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_co2_graph_draws_series_and_reference_lines() {
        let (store, now) = filled_store(120);
        let renderer = SnapshotRenderer::new("unused", "unused");
        let window: GraphWindow = "8h".parse().unwrap();
        let data = store
            .fetch(&FetchQuery::new(Consolidation::Average).window(now, window.duration()))
            .unwrap();

        let img = renderer.co2_graph(&data, now - window.duration(), now);
        let has = |color: Rgb<u8>| img.pixels().any(|p| *p == color);
        assert!(has(CO2_LINE));
        assert!(has(Rgb([0x16, 0xF5, 0x0F])));
        assert!(has(Rgb([0xDE, 0x2C, 0x2F])));
    }

    #[test]
    fn test_empty_store_renders_blank_graphs() {
        let store =
            Store::open_in_memory(&RetentionSchedule::co2_temperature(), at(START)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let renderer = SnapshotRenderer::new("unused", dir.path())
            .with_windows(vec!["8h".parse().unwrap()]);

        let report = renderer.render_from(&store, at(START + 60));
        assert_eq!(report.rendered.len(), 2);

        let img = image::open(dir.path().join("temp-8h-graph.png"))
            .unwrap()
            .into_rgb8();
        assert!(!img.pixels().any(|p| *p == TEMP_LINE));
    }

    #[test]
    fn test_missing_store_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut renderer =
            SnapshotRenderer::new(dir.path().join("missing.rrd"), dir.path().join("images"));

        let report = renderer.render(at(START));
        assert!(!report.is_complete());
        assert!(report.rendered.is_empty());
    }

    #[test]
    fn test_unwritable_output_is_reported() {
        let (store, now) = filled_store(10);
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();

        let renderer = SnapshotRenderer::new("unused", blocker.join("images"));
        let report = renderer.render_from(&store, now);
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn test_line_is_clipped() {
        let mut plot = Plot::new(10, 10, at(START), at(START + 10), 0.0, 1.0);
        plot.line((-50, -50), (100, 100), CO2_LINE);
        let img = plot.finish();
        assert!(img.get_pixel(0, 0) == &BACKGROUND);
        assert!(img.pixels().any(|p| *p == CO2_LINE));
    }
}
