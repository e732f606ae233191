//! Projects the memory collection onto the calendar grid for rendering.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::grid::CalendarGrid;
use crate::models::{Memory, MAX_INTENSITY};

/// One dated grid cell with the memories recorded on that day.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedCell {
    pub date: NaiveDate,
    /// Same-day memories, id ascending (earliest-created first).
    pub memories: Vec<Memory>,
    /// Heatmap level 0..=4: the memory count, clamped to the top of the
    /// intensity scale.
    pub heat: u8,
}

impl ProjectedCell {
    /// The earliest-created memory on this day, the one a cell click opens.
    pub fn earliest(&self) -> Option<&Memory> {
        self.memories.first()
    }
}

/// The full grid with memories attached, shaped exactly like
/// [`CalendarGrid::grid`]: 7 weekday rows of week columns.
#[derive(Debug, Clone, PartialEq)]
pub struct GridProjection {
    pub cells: Vec<Vec<Option<ProjectedCell>>>,
}

impl GridProjection {
    pub fn cell(&self, row: usize, col: usize) -> Option<&ProjectedCell> {
        self.cells.get(row)?.get(col)?.as_ref()
    }
}

/// Attach each memory to the grid cell whose day matches its date exactly.
/// Memories outside the grid's day range are dropped from the projection.
/// Pure; recomputed from scratch on every collection change.
pub fn project(grid: &CalendarGrid, memories: &[Memory]) -> GridProjection {
    let mut by_date: HashMap<NaiveDate, Vec<Memory>> = HashMap::new();
    for memory in memories {
        by_date.entry(memory.date).or_default().push(memory.clone());
    }
    for bucket in by_date.values_mut() {
        bucket.sort_by(|a, b| a.id.cmp(&b.id));
    }

    let mut cells = Vec::with_capacity(grid.grid.len());
    for row in &grid.grid {
        let mut projected = Vec::with_capacity(row.len());
        for slot in row {
            projected.push(slot.map(|date| {
                let memories = by_date.remove(&date).unwrap_or_default();
                let heat = memories.len().min(usize::from(MAX_INTENSITY)) as u8;
                ProjectedCell {
                    date,
                    memories,
                    heat,
                }
            }));
        }
        cells.push(projected);
    }

    GridProjection { cells }
}
