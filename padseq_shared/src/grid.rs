use serde::{Deserialize, Serialize};

use crate::{CategoryId, CATEGORY_COUNT, STEPS_PER_PATTERN, TRACKS_PER_CATEGORY};

/// On/off matrix for one category: `TRACKS_PER_CATEGORY` rows by
/// `STEPS_PER_PATTERN` columns. `true` means "trigger on this step".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepGrid {
    cells: [[bool; STEPS_PER_PATTERN]; TRACKS_PER_CATEGORY],
}

impl StepGrid {
    pub const fn new() -> Self {
        Self {
            cells: [[false; STEPS_PER_PATTERN]; TRACKS_PER_CATEGORY],
        }
    }

    /// Cell state; out-of-range coordinates read as inactive.
    pub fn get(&self, track: usize, step: usize) -> bool {
        self.cells
            .get(track)
            .and_then(|row| row.get(step))
            .copied()
            .unwrap_or(false)
    }

    /// Sets one cell; out-of-range coordinates are ignored.
    pub fn set(&mut self, track: usize, step: usize, on: bool) {
        if let Some(row) = self.cells.get_mut(track) {
            if let Some(cell) = row.get_mut(step) {
                *cell = on;
            }
        }
    }

    pub fn toggle(&mut self, track: usize, step: usize) {
        let current = self.get(track, step);
        self.set(track, step, !current);
    }

    pub fn clear(&mut self) {
        self.cells = [[false; STEPS_PER_PATTERN]; TRACKS_PER_CATEGORY];
    }

    /// True when no cell of this grid is active.
    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(|row| row.iter().all(|cell| !cell))
    }
}

impl Default for StepGrid {
    fn default() -> Self {
        Self::new()
    }
}

/// Complete activation state of the pad surface: one `StepGrid` per
/// category, indexed in declaration order.
///
/// Snapshots are cheap to clone (a few KB of booleans) and are always
/// published to the engine as whole replacements, never mutated in place
/// under a concurrent reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSnapshot {
    grids: [StepGrid; CATEGORY_COUNT],
}

impl GridSnapshot {
    pub const fn new() -> Self {
        Self {
            grids: [StepGrid::new(); CATEGORY_COUNT],
        }
    }

    pub fn grid(&self, category: CategoryId) -> &StepGrid {
        &self.grids[category.index()]
    }

    pub fn grid_mut(&mut self, category: CategoryId) -> &mut StepGrid {
        &mut self.grids[category.index()]
    }

    /// Convenience for building patterns in code and tests.
    pub fn set(&mut self, category: CategoryId, track: usize, step: usize, on: bool) {
        self.grid_mut(category).set(track, step, on);
    }

    pub fn is_empty(&self) -> bool {
        self.grids.iter().all(StepGrid::is_empty)
    }
}

impl Default for GridSnapshot {
    fn default() -> Self {
        Self::new()
    }
}
