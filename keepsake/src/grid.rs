//! Calendar heatmap layout math.
//!
//! Maps an arbitrary contiguous day range onto a 7-row, week-per-column grid
//! (row 0 = Sunday .. row 6 = Saturday) with short month labels placed at
//! month starts. Pure and deterministic; renderers own all pixel geometry and
//! derive it from `weeks` alone.

use chrono::{Datelike, Days, NaiveDate};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use crate::config::GridConfig;

pub const DAYS_PER_WEEK: usize = 7;

const MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Layout of one calendar window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarGrid {
    /// Inclusive day sequence from the normalized start to the normalized end.
    pub days: Vec<NaiveDate>,
    /// Number of week columns; always `days.len() / 7`.
    pub weeks: usize,
    /// `grid[row][col]` = `days[col*7 + row]`, `None` past the range.
    pub grid: Vec<Vec<Option<NaiveDate>>>,
    /// Per-column short month name, set only on the column that starts a month.
    pub month_labels: Vec<Option<&'static str>>,
}

/// Compute the grid for the inclusive range `range_start..=range_end`.
///
/// The start is normalized backward to the most recent Sunday on or before
/// it; the end is normalized to the most recent Saturday on or before
/// `range_end + 7 days`, so the produced sequence is always whole weeks.
/// An inverted range yields the empty grid.
pub fn compute_grid(range_start: NaiveDate, range_end: NaiveDate) -> CalendarGrid {
    if range_start > range_end {
        return CalendarGrid {
            days: Vec::new(),
            weeks: 0,
            grid: vec![Vec::new(); DAYS_PER_WEEK],
            month_labels: Vec::new(),
        };
    }

    let start = opening_sunday(range_start);
    let end = closing_saturday(range_end);

    let days: Vec<NaiveDate> = start.iter_days().take_while(|day| *day <= end).collect();
    let weeks = days.len().div_ceil(DAYS_PER_WEEK);

    let mut grid = vec![vec![None; weeks]; DAYS_PER_WEEK];
    for (i, day) in days.iter().enumerate() {
        grid[i % DAYS_PER_WEEK][i / DAYS_PER_WEEK] = Some(*day);
    }

    // A column is labeled only when its Sunday falls in the first week of a
    // month and the column does not straddle a month boundary. Heuristic
    // placement for visual parity, not a general labeling algorithm.
    let mut month_labels = vec![None; weeks];
    for (col, label) in month_labels.iter_mut().enumerate() {
        if let (Some(first), Some(last)) = (grid[0][col], grid[DAYS_PER_WEEK - 1][col]) {
            if first.day() <= 7 && first.month() == last.month() {
                *label = Some(MONTH_NAMES[first.month0() as usize]);
            }
        }
    }

    CalendarGrid {
        days,
        weeks,
        grid,
        month_labels,
    }
}

/// The grid for the configured journal window.
pub fn window_grid(config: &GridConfig) -> CalendarGrid {
    compute_grid(config.window_start, config.window_end)
}

/// Most recent Sunday on or before `date`.
fn opening_sunday(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.weekday().num_days_from_sunday()))
}

/// Most recent Saturday on or before `date + 7 days`.
fn closing_saturday(date: NaiveDate) -> NaiveDate {
    let padded = date + Days::new(7);
    let back = (padded.weekday().num_days_from_sunday() + 1) % 7;
    padded - Days::new(u64::from(back))
}

/// Thread-safe LRU cache of computed grids, keyed by the raw requested range.
///
/// Uses the Arc<Mutex<>> pattern for safe concurrent access across threads;
/// grids are shared as `Arc<CalendarGrid>` so hits are cheap.
#[derive(Clone)]
pub struct GridCache {
    cache: Arc<Mutex<LruCache<(NaiveDate, NaiveDate), Arc<CalendarGrid>>>>,
}

impl GridCache {
    /// Create a cache holding up to `capacity` grids (at least one).
    pub fn new(capacity: usize) -> Self {
        let cache = LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN));
        Self {
            cache: Arc::new(Mutex::new(cache)),
        }
    }

    /// Return the cached grid for the range, computing and storing it on miss.
    pub fn get_or_compute(&self, range_start: NaiveDate, range_end: NaiveDate) -> Arc<CalendarGrid> {
        let mut cache = self.cache.lock().unwrap();
        if let Some(grid) = cache.get(&(range_start, range_end)) {
            return Arc::clone(grid);
        }
        let grid = Arc::new(compute_grid(range_start, range_end));
        cache.put((range_start, range_end), Arc::clone(&grid));
        grid
    }
}
