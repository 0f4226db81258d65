//! Date-range partitioning into per-day work units

use crate::{RegionFilter, WorkUnit};
use chrono::NaiveDate;
use std::collections::BTreeSet;

/// Expand `[start, end]` into one unit per calendar day, ascending, skipping
/// every date in `already_done`.
///
/// `start > end` yields an empty plan rather than an error.
pub fn plan(
    start: NaiveDate,
    end: NaiveDate,
    already_done: &BTreeSet<NaiveDate>,
    region: &RegionFilter,
) -> Vec<WorkUnit> {
    if start > end {
        return Vec::new();
    }

    start
        .iter_days()
        .take_while(|date| *date <= end)
        .filter(|date| !already_done.contains(date))
        .map(|date| WorkUnit::new(date, region.clone()))
        .collect()
}

/// Count the dates of `already_done` that fall inside `[start, end]`.
pub fn already_done_in_range(
    start: NaiveDate,
    end: NaiveDate,
    already_done: &BTreeSet<NaiveDate>,
) -> usize {
    if start > end {
        return 0;
    }
    already_done.range(start..=end).count()
}
