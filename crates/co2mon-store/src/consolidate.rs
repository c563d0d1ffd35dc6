//! Consolidation engine.
//!
//! Turns irregular appends into primary data points (one per step) and
//! folds those into archive rows. The engine is pure: it only mutates its
//! own state and returns the rows that must be written, so the store can
//! apply everything inside one transaction.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{Archive, Consolidation, RetentionSchedule};

/// Partial primary data point of one data source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct PdpPrep {
    /// Seconds of the current step covered by known values.
    pub known_secs: i64,
    /// Time-weighted sum of the known values.
    pub sum: f64,
}

impl PdpPrep {
    /// Close the step. Unknown when more than half of it is unknown.
    fn take(&mut self, step: i64) -> Option<f64> {
        let prep = std::mem::take(self);
        let unknown = step - prep.known_secs;
        if prep.known_secs == 0 || unknown * 2 > step {
            None
        } else {
            Some(prep.sum / prep.known_secs as f64)
        }
    }
}

/// Partial row of one archive and data source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct CdpPrep {
    /// Primary data points folded in so far.
    pub fed: u32,
    /// How many of those were unknown.
    pub unknown: u32,
    pub sum: f64,
    /// Running min/max/last.
    pub value: Option<f64>,
}

impl CdpPrep {
    fn feed(&mut self, cf: Consolidation, pdp: Option<f64>) {
        self.fed += 1;
        let Some(v) = pdp else {
            self.unknown += 1;
            return;
        };
        self.sum += v;
        self.value = Some(match (cf, self.value) {
            (Consolidation::Min, Some(cur)) => cur.min(v),
            (Consolidation::Max, Some(cur)) => cur.max(v),
            _ => v,
        });
    }

    /// Close the row. Steps never fed (before the store existed) count as unknown.
    fn take(&mut self, archive: &Archive) -> Option<f64> {
        let prep = std::mem::take(self);
        let unknown = prep.unknown + archive.steps.saturating_sub(prep.fed);
        let known = archive.steps.saturating_sub(unknown);
        if known == 0 || f64::from(unknown) > archive.xff * f64::from(archive.steps) {
            return None;
        }
        match archive.consolidation {
            Consolidation::Average => Some(prep.sum / f64::from(known)),
            _ => prep.value,
        }
    }
}

/// A row the store must (over)write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RowWrite {
    pub archive: usize,
    pub slot: u32,
    pub ds: usize,
    /// Unix time at which the row's interval ends.
    pub ends_at: i64,
    pub value: Option<f64>,
}

/// Everything the engine needs between appends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ConsolidationState {
    /// Unix time of the last append.
    pub last_update: i64,
    /// Indexed by data source.
    pub pdp: Vec<PdpPrep>,
    /// Indexed by archive, then data source.
    pub cdp: Vec<Vec<CdpPrep>>,
}

impl ConsolidationState {
    pub fn new(schedule: &RetentionSchedule, start: i64) -> Self {
        let sources = schedule.data_sources.len();
        Self {
            last_update: start,
            pdp: vec![PdpPrep::default(); sources],
            cdp: vec![vec![CdpPrep::default(); sources]; schedule.archives.len()],
        }
    }

    /// Apply one append and return the rows it completes.
    ///
    /// On error the state is left untouched.
    pub fn update(
        &mut self,
        schedule: &RetentionSchedule,
        at: i64,
        values: &[Option<f64>],
    ) -> Result<Vec<RowWrite>> {
        if at <= self.last_update {
            return Err(Error::NonMonotonic {
                last: self.last_update,
                attempted: at,
            });
        }
        if values.len() != schedule.data_sources.len() {
            return Err(Error::ValueCount {
                expected: schedule.data_sources.len(),
                actual: values.len(),
            });
        }
        if self.pdp.len() != schedule.data_sources.len()
            || self.cdp.len() != schedule.archives.len()
        {
            return Err(Error::CorruptState(
                "consolidation state does not match the schedule".into(),
            ));
        }

        let interval = at - self.last_update;
        let known: Vec<Option<f64>> = schedule
            .data_sources
            .iter()
            .zip(values)
            .map(|(ds, v)| {
                v.filter(|v| ds.accepts(*v) && interval <= i64::from(ds.heartbeat))
            })
            .collect();

        let step = i64::from(schedule.step);
        let mut rows = Vec::new();
        let mut t = self.last_update;

        if known.iter().all(Option::is_none) {
            let first_end = (t.div_euclid(step) + 1) * step;
            let last_end = at.div_euclid(step) * step;
            if last_end > first_end {
                self.close_step(schedule, first_end, &mut rows);
                self.close_unknown_steps(schedule, first_end, last_end, &mut rows);
                t = last_end;
            }
        }

        while t < at {
            let step_end = (t.div_euclid(step) + 1) * step;
            let seg_end = step_end.min(at);
            let secs = seg_end - t;

            for (prep, value) in self.pdp.iter_mut().zip(&known) {
                if let Some(v) = value {
                    prep.sum += v * secs as f64;
                    prep.known_secs += secs;
                }
            }

            if seg_end == step_end {
                self.close_step(schedule, step_end, &mut rows);
            }
            t = seg_end;
        }

        self.last_update = at;
        Ok(rows)
    }

    /// Close every step in `(from, to]` with an unknown primary data point.
    ///
    /// Both bounds are step-aligned. Rows that a later row of the same ring
    /// would overwrite are not emitted, so the work is bounded by the
    /// archive sizes rather than by the length of the gap.
    fn close_unknown_steps(
        &mut self,
        schedule: &RetentionSchedule,
        from: i64,
        to: i64,
        rows: &mut Vec<RowWrite>,
    ) {
        let step = i64::from(schedule.step);
        tracing::debug!("Closing {} unknown steps", (to - from) / step);

        for (a, archive) in schedule.archives.iter().enumerate() {
            let resolution = archive.resolution(schedule.step);
            let ring = i64::from(archive.rows);
            let preps = &mut self.cdp[a];

            let first_row_end = (from.div_euclid(resolution) + 1) * resolution;
            if first_row_end > to {
                let n = ((to - from) / step) as u32;
                for prep in preps.iter_mut() {
                    prep.fed += n;
                    prep.unknown += n;
                }
                continue;
            }

            let last_row_end = to.div_euclid(resolution) * resolution;
            let oldest_kept = last_row_end - (ring - 1) * resolution;
            let slot_of = |end: i64| end.div_euclid(resolution).rem_euclid(ring) as u32;

            // The row in progress may still be known if enough of it was.
            let n = ((first_row_end - from) / step) as u32;
            for (ds, prep) in preps.iter_mut().enumerate() {
                prep.fed += n;
                prep.unknown += n;
                let value = prep.take(archive);
                if first_row_end >= oldest_kept {
                    rows.push(RowWrite {
                        archive: a,
                        slot: slot_of(first_row_end),
                        ds,
                        ends_at: first_row_end,
                        value,
                    });
                }
            }

            let mut end = oldest_kept.max(first_row_end + resolution);
            while end <= last_row_end {
                for ds in 0..preps.len() {
                    rows.push(RowWrite {
                        archive: a,
                        slot: slot_of(end),
                        ds,
                        ends_at: end,
                        value: None,
                    });
                }
                end += resolution;
            }

            let tail = ((to - last_row_end) / step) as u32;
            for prep in preps.iter_mut() {
                prep.fed = tail;
                prep.unknown = tail;
            }
        }

        self.pdp.iter_mut().for_each(|p| *p = PdpPrep::default());
    }

    fn close_step(&mut self, schedule: &RetentionSchedule, step_end: i64, rows: &mut Vec<RowWrite>) {
        let step = i64::from(schedule.step);
        let pdps: Vec<Option<f64>> = self.pdp.iter_mut().map(|p| p.take(step)).collect();

        for (a, archive) in schedule.archives.iter().enumerate() {
            let preps = &mut self.cdp[a];
            for (prep, pdp) in preps.iter_mut().zip(&pdps) {
                prep.feed(archive.consolidation, *pdp);
            }

            let resolution = archive.resolution(schedule.step);
            if step_end.rem_euclid(resolution) != 0 {
                continue;
            }

            let slot = step_end.div_euclid(resolution).rem_euclid(i64::from(archive.rows)) as u32;
            for (ds, prep) in preps.iter_mut().enumerate() {
                rows.push(RowWrite {
                    archive: a,
                    slot,
                    ds,
                    ends_at: step_end,
                    value: prep.take(archive),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Archive, DataSource};
    use proptest::prelude::*;

    /// One source, 60 s step, a fine and a coarse AVERAGE archive plus MIN/MAX.
    fn small_schedule() -> RetentionSchedule {
        RetentionSchedule {
            step: 60,
            data_sources: vec![DataSource::gauge("X", 120)],
            archives: vec![
                Archive::new(Consolidation::Average, 0.5, 1, 10),
                Archive::new(Consolidation::Average, 0.5, 5, 4),
                Archive::new(Consolidation::Min, 0.5, 5, 4),
                Archive::new(Consolidation::Max, 0.5, 5, 4),
            ],
        }
    }

    fn rows_for(rows: &[RowWrite], archive: usize) -> Vec<(i64, Option<f64>)> {
        rows.iter()
            .filter(|r| r.archive == archive)
            .map(|r| (r.ends_at, r.value))
            .collect()
    }

    #[test]
    fn test_rejects_non_monotonic_timestamps() {
        let schedule = small_schedule();
        let mut state = ConsolidationState::new(&schedule, 1_000);

        assert!(matches!(
            state.update(&schedule, 1_000, &[Some(1.0)]),
            Err(Error::NonMonotonic { .. })
        ));
        assert!(matches!(
            state.update(&schedule, 900, &[Some(1.0)]),
            Err(Error::NonMonotonic { .. })
        ));
        assert_eq!(state, ConsolidationState::new(&schedule, 1_000));
    }

    #[test]
    fn test_rejects_wrong_value_count() {
        let schedule = small_schedule();
        let mut state = ConsolidationState::new(&schedule, 0);
        assert!(matches!(
            state.update(&schedule, 60, &[Some(1.0), Some(2.0)]),
            Err(Error::ValueCount {
                expected: 1,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_gauge_fills_steps_with_appended_value() {
        let schedule = small_schedule();
        let mut state = ConsolidationState::new(&schedule, 0);

        let rows = state.update(&schedule, 60, &[Some(10.0)]).unwrap();
        assert_eq!(rows_for(&rows, 0), vec![(60, Some(10.0))]);

        let rows = state.update(&schedule, 120, &[Some(20.0)]).unwrap();
        assert_eq!(rows_for(&rows, 0), vec![(120, Some(20.0))]);
    }

    #[test]
    fn test_time_weighted_primary_point() {
        let schedule = small_schedule();
        let mut state = ConsolidationState::new(&schedule, 0);

        // 0..30 at 10, 30..60 at 40
        assert!(state.update(&schedule, 30, &[Some(10.0)]).unwrap().is_empty());
        let rows = state.update(&schedule, 60, &[Some(40.0)]).unwrap();
        assert_eq!(rows_for(&rows, 0), vec![(60, Some(25.0))]);
    }

    #[test]
    fn test_heartbeat_gap_is_unknown() {
        let schedule = small_schedule();
        let mut state = ConsolidationState::new(&schedule, 0);

        state.update(&schedule, 60, &[Some(10.0)]).unwrap();
        // 240 s gap > 120 s heartbeat
        let rows = state.update(&schedule, 300, &[Some(10.0)]).unwrap();
        let fine = rows_for(&rows, 0);
        assert_eq!(fine.len(), 4);
        assert!(fine.iter().all(|(_, v)| v.is_none()));
    }

    #[test]
    fn test_consolidated_rows() {
        let schedule = small_schedule();
        let mut state = ConsolidationState::new(&schedule, 0);

        let mut rows = Vec::new();
        for (i, v) in [10.0, 20.0, 30.0, 40.0, 50.0].into_iter().enumerate() {
            let at = (i as i64 + 1) * 60;
            rows.extend(state.update(&schedule, at, &[Some(v)]).unwrap());
        }

        assert_eq!(rows_for(&rows, 1), vec![(300, Some(30.0))]);
        assert_eq!(rows_for(&rows, 2), vec![(300, Some(10.0))]);
        assert_eq!(rows_for(&rows, 3), vec![(300, Some(50.0))]);
    }

    #[test]
    fn test_xff_marks_mostly_unknown_rows() {
        let schedule = small_schedule();
        // Store created mid-row: only 2 of 5 steps can be known.
        let mut state = ConsolidationState::new(&schedule, 180);
        state.update(&schedule, 240, &[Some(10.0)]).unwrap();
        let rows = state.update(&schedule, 300, &[Some(10.0)]).unwrap();
        assert_eq!(rows_for(&rows, 1), vec![(300, None)]);
    }

    #[test]
    fn test_missing_value_is_unknown() {
        let schedule = small_schedule();
        let mut state = ConsolidationState::new(&schedule, 0);
        let rows = state.update(&schedule, 60, &[None]).unwrap();
        assert_eq!(rows_for(&rows, 0), vec![(60, None)]);
    }

    #[test]
    fn test_unknown_gap_rewrites_every_slot() {
        let schedule = small_schedule();
        let mut state = ConsolidationState::new(&schedule, 0);
        let rows = state.update(&schedule, 60 * 12, &[None]).unwrap();

        let fine: Vec<&RowWrite> = rows.iter().filter(|r| r.archive == 0).collect();
        let mut slots: Vec<u32> = fine.iter().map(|r| r.slot).collect();
        slots.sort_unstable();
        slots.dedup();
        assert_eq!(slots, (0..10).collect::<Vec<_>>());

        let last = fine.last().unwrap();
        assert_eq!(last.ends_at, 720);
        assert_eq!(last.slot, 2);
        assert!(fine.iter().all(|r| r.value.is_none()));
    }

    #[test]
    fn test_long_gap_is_bounded_by_ring_sizes() {
        let schedule = RetentionSchedule::co2_temperature();
        let start = 1_700_000_000;
        let mut state = ConsolidationState::new(&schedule, start);

        // 20 years later
        let at = start + 20 * 365 * 86_400;
        let rows = state.update(&schedule, at, &[Some(450.0), Some(21.0)]).unwrap();

        // Every slot of every archive is rewritten as unknown, nothing more.
        let expected: usize = schedule
            .archives
            .iter()
            .map(|a| a.rows as usize * 2)
            .sum();
        assert!(rows.len() >= expected);
        assert!(rows.len() < expected * 2);
        assert!(rows.iter().all(|r| r.value.is_none()));
        assert_eq!(state.last_update, at);
    }

    proptest! {
        #[test]
        fn prop_constant_input_consolidates_to_constant(
            value in -50.0f64..5000.0,
            cadence in 1i64..=60,
            count in 1usize..200,
        ) {
            let schedule = small_schedule();
            let mut state = ConsolidationState::new(&schedule, 0);
            let mut t = 0;
            for _ in 0..count {
                t += cadence;
                for row in state.update(&schedule, t, &[Some(value)]).unwrap() {
                    if let Some(v) = row.value {
                        prop_assert!((v - value).abs() < 1e-6);
                    }
                }
            }
        }

        #[test]
        fn prop_min_never_exceeds_max(values in prop::collection::vec(0.0f64..2000.0, 5..60)) {
            let schedule = small_schedule();
            let mut state = ConsolidationState::new(&schedule, 0);
            let mut rows = Vec::new();
            for (i, v) in values.iter().enumerate() {
                rows.extend(state.update(&schedule, (i as i64 + 1) * 60, &[Some(*v)]).unwrap());
            }
            let mins = rows_for(&rows, 2);
            let maxs = rows_for(&rows, 3);
            let avgs = rows_for(&rows, 1);
            prop_assert_eq!(mins.len(), maxs.len());
            for ((lo, hi), avg) in mins.iter().zip(&maxs).zip(&avgs) {
                if let (Some(lo), Some(hi), Some(avg)) = (lo.1, hi.1, avg.1) {
                    prop_assert!(lo <= avg + 1e-9 && avg <= hi + 1e-9);
                }
            }
        }
    }
}
