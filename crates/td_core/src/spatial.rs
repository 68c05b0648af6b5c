//! Uniform-cell spatial index.
//!
//! Turns O(n²) proximity checks into lookups over the handful of cells a
//! query touches. Each entity is registered in every cell its bounding
//! circle overlaps, so a query only needs to scan the cells under its own
//! footprint and then filter candidates by exact distance.
//!
//! ## Cell Size Choice
//!
//! Smaller cells mean tighter candidate sets but more cells touched by
//! large entities and wide queries. Tune `cell_size` so the mean
//! occupancy reported by [`SpatialGrid::occupancy`] stays around 1–4.
//!
//! ## Out-of-world positions
//!
//! Cell indices are clamped to the grid. An entity whose circle misses the
//! world entirely is registered in the boundary cell nearest its center, so
//! it still participates in queries.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::math::{Rect, Vec2};

/// Grid cell coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellCoord {
    /// Column index.
    pub col: u32,
    /// Row index.
    pub row: u32,
}

impl CellCoord {
    /// Create a cell coordinate.
    #[must_use]
    pub const fn new(col: u32, row: u32) -> Self {
        Self { col, row }
    }

    /// Pack into a single integer key.
    #[must_use]
    pub const fn pack(self) -> u64 {
        ((self.col as u64) << 32) | self.row as u64
    }
}

/// World extent and cell size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// World width; the world spans `0..width`.
    pub width: f32,
    /// World height; the world spans `0..height`.
    pub height: f32,
    /// Edge length of one square cell.
    pub cell_size: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            width: 1_000.0,
            height: 1_000.0,
            cell_size: 50.0,
        }
    }
}

impl GridConfig {
    /// Check values are in range.
    pub fn validate(&self) -> Result<()> {
        let finite = self.width.is_finite() && self.height.is_finite() && self.cell_size.is_finite();
        if !finite || self.width <= 0.0 || self.height <= 0.0 || self.cell_size <= 0.0 {
            return Err(SimError::InvalidConfig(format!(
                "grid dimensions must be positive, got {}x{} with cell size {}",
                self.width, self.height, self.cell_size
            )));
        }
        Ok(())
    }

    /// Center of the world rectangle.
    #[must_use]
    pub fn center(&self) -> Vec2 {
        Vec2::new(self.width * 0.5, self.height * 0.5)
    }
}

/// Cell occupancy summary, for tuning `cell_size`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GridOccupancy {
    /// Entities currently indexed.
    pub entities: usize,
    /// Cells holding at least one entity.
    pub occupied_cells: usize,
    /// Largest number of entities in a single cell.
    pub max_per_cell: usize,
    /// Mean entities per occupied cell.
    pub mean_per_occupied_cell: f32,
}

#[derive(Debug, Clone, Copy)]
struct CellEntry<K> {
    key: K,
    position: Vec2,
    radius: f32,
}

#[derive(Debug, Clone)]
struct Membership {
    position: Vec2,
    radius: f32,
    cells: Vec<u32>,
}

/// Inclusive cell index range.
#[derive(Debug, Clone, Copy)]
struct CellRange {
    min_col: u32,
    max_col: u32,
    min_row: u32,
    max_row: u32,
}

/// Uniform grid over `0..width × 0..height`, keyed by entity reference `K`.
#[derive(Debug, Clone)]
pub struct SpatialGrid<K> {
    config: GridConfig,
    cols: u32,
    rows: u32,
    cells: Vec<Vec<CellEntry<K>>>,
    members: HashMap<K, Membership>,
}

impl<K: Copy + Eq + Hash> SpatialGrid<K> {
    /// Create an empty grid.
    pub fn new(config: GridConfig) -> Result<Self> {
        config.validate()?;
        let cols = ((config.width / config.cell_size).ceil() as u32).max(1);
        let rows = ((config.height / config.cell_size).ceil() as u32).max(1);
        let cells = (0..cols * rows).map(|_| Vec::new()).collect();
        Ok(Self {
            config,
            cols,
            rows,
            cells,
            members: HashMap::new(),
        })
    }

    /// Grid configuration.
    #[must_use]
    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Number of columns.
    #[must_use]
    pub const fn cols(&self) -> u32 {
        self.cols
    }

    /// Number of rows.
    #[must_use]
    pub const fn rows(&self) -> u32 {
        self.rows
    }

    /// Number of indexed entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True when nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// True when `key` is indexed.
    #[must_use]
    pub fn contains(&self, key: K) -> bool {
        self.members.contains_key(&key)
    }

    /// Clamp in float space so huge or infinite coordinates never reach
    /// integer arithmetic. NaN maps to 0.
    fn clamp_index(index: f32, count: u32) -> u32 {
        index.clamp(0.0, count.saturating_sub(1) as f32) as u32
    }

    fn clamp_col(&self, x: f32) -> u32 {
        Self::clamp_index((x / self.config.cell_size).floor(), self.cols)
    }

    fn clamp_row(&self, y: f32) -> u32 {
        Self::clamp_index((y / self.config.cell_size).floor(), self.rows)
    }

    /// Cell containing `pos`, clamped to the grid.
    #[must_use]
    pub fn cell_of(&self, pos: Vec2) -> CellCoord {
        CellCoord::new(self.clamp_col(pos.x), self.clamp_row(pos.y))
    }

    /// World rectangle covered by a cell.
    #[must_use]
    pub fn cell_rect(&self, cell: CellCoord) -> Rect {
        let size = self.config.cell_size;
        let min = Vec2::new(cell.col as f32 * size, cell.row as f32 * size);
        Rect::from_corners(min, Vec2::new(min.x + size, min.y + size))
    }

    fn index_of(&self, cell: CellCoord) -> u32 {
        cell.row * self.cols + cell.col
    }

    fn coord_of(&self, index: u32) -> CellCoord {
        CellCoord::new(index % self.cols, index / self.cols)
    }

    /// Lower bound that also includes a cell whose far edge `v` touches.
    fn touching_min(&self, v: f32, count: u32) -> u32 {
        Self::clamp_index((v / self.config.cell_size).ceil() - 1.0, count)
    }

    fn range_for(&self, min: Vec2, max: Vec2) -> CellRange {
        CellRange {
            min_col: self.touching_min(min.x, self.cols),
            max_col: self.clamp_col(max.x),
            min_row: self.touching_min(min.y, self.rows),
            max_row: self.clamp_row(max.y),
        }
    }

    /// Cells a circle overlaps, in row-major order.
    ///
    /// Falls back to the clamped center cell when the circle misses the
    /// world entirely.
    #[must_use]
    pub fn overlapping_cells(&self, pos: Vec2, radius: f32) -> Vec<CellCoord> {
        let radius = if radius.is_finite() { radius.max(0.0) } else { 0.0 };
        let range = self.range_for(
            Vec2::new(pos.x - radius, pos.y - radius),
            Vec2::new(pos.x + radius, pos.y + radius),
        );

        let mut cells = Vec::new();
        for row in range.min_row..=range.max_row {
            for col in range.min_col..=range.max_col {
                let cell = CellCoord::new(col, row);
                if self.cell_rect(cell).intersects_circle(pos, radius) {
                    cells.push(cell);
                }
            }
        }

        if cells.is_empty() {
            cells.push(self.cell_of(pos));
        }
        cells
    }

    /// Index an entity in every cell its circle overlaps.
    ///
    /// Re-inserting an indexed key moves it.
    pub fn insert(&mut self, key: K, pos: Vec2, radius: f32) {
        if self.members.contains_key(&key) {
            self.remove(key);
        }

        let cells: Vec<u32> = self
            .overlapping_cells(pos, radius)
            .into_iter()
            .map(|cell| self.index_of(cell))
            .collect();

        let entry = CellEntry {
            key,
            position: pos,
            radius: radius.max(0.0),
        };
        for &index in &cells {
            self.cells[index as usize].push(entry);
        }

        self.members.insert(
            key,
            Membership {
                position: pos,
                radius: entry.radius,
                cells,
            },
        );
    }

    /// Remove an entity from every cell it was registered in.
    pub fn remove(&mut self, key: K) -> bool {
        let Some(membership) = self.members.remove(&key) else {
            return false;
        };
        for index in membership.cells {
            self.cells[index as usize].retain(|entry| entry.key != key);
        }
        true
    }

    /// Move an entity: remove followed by insert.
    pub fn update(&mut self, key: K, pos: Vec2, radius: f32) {
        self.remove(key);
        self.insert(key, pos, radius);
    }

    /// Drop every entity, keeping cell allocations.
    pub fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.clear();
        }
        self.members.clear();
    }

    /// Cells an indexed entity is registered in.
    #[must_use]
    pub fn cells_of(&self, key: K) -> Option<Vec<CellCoord>> {
        self.members.get(&key).map(|membership| {
            membership
                .cells
                .iter()
                .map(|&index| self.coord_of(index))
                .collect()
        })
    }

    /// Indexed position and radius of an entity.
    #[must_use]
    pub fn bounds_of(&self, key: K) -> Option<(Vec2, f32)> {
        self.members
            .get(&key)
            .map(|membership| (membership.position, membership.radius))
    }

    /// True when `key` is registered in `cell`.
    #[must_use]
    pub fn cell_contains(&self, cell: CellCoord, key: K) -> bool {
        if cell.col >= self.cols || cell.row >= self.rows {
            return false;
        }
        self.cells[self.index_of(cell) as usize]
            .iter()
            .any(|entry| entry.key == key)
    }

    fn scan<F>(&self, range: CellRange, mut accept: F) -> Vec<K>
    where
        F: FnMut(&CellEntry<K>) -> bool,
    {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for row in range.min_row..=range.max_row {
            for col in range.min_col..=range.max_col {
                let index = self.index_of(CellCoord::new(col, row));
                for entry in &self.cells[index as usize] {
                    if accept(entry) && seen.insert(entry.key) {
                        found.push(entry.key);
                    }
                }
            }
        }
        found
    }

    /// Entities whose center lies within `radius` of `point`.
    ///
    /// Non-positive radii return an empty set.
    #[must_use]
    pub fn query_radius(&self, point: Vec2, radius: f32) -> Vec<K> {
        if !(radius > 0.0) || !point.is_finite() {
            return Vec::new();
        }
        let range = self.range_for(
            Vec2::new(point.x - radius, point.y - radius),
            Vec2::new(point.x + radius, point.y + radius),
        );
        let radius_sq = radius * radius;
        self.scan(range, |entry| {
            entry.position.distance_squared(point) <= radius_sq
        })
    }

    /// Entities whose circle touches the circle of `radius` around `point`.
    ///
    /// A zero radius is a point query; negative radii return an empty set.
    #[must_use]
    pub fn query_overlapping(&self, point: Vec2, radius: f32) -> Vec<K> {
        if !(radius >= 0.0) || !point.is_finite() {
            return Vec::new();
        }
        let range = self.range_for(
            Vec2::new(point.x - radius, point.y - radius),
            Vec2::new(point.x + radius, point.y + radius),
        );
        self.scan(range, |entry| {
            let reach = radius + entry.radius;
            entry.position.distance_squared(point) <= reach * reach
        })
    }

    /// Entities whose circle intersects `bounds`, for viewport-style culling.
    #[must_use]
    pub fn query_bounds(&self, bounds: Rect) -> Vec<K> {
        if !bounds.min.is_finite() || !bounds.max.is_finite() {
            return Vec::new();
        }
        let range = self.range_for(bounds.min, bounds.max);
        self.scan(range, |entry| {
            bounds.intersects_circle(entry.position, entry.radius)
        })
    }

    /// Number of entities within `radius` of `point`, not counting `exclude`.
    #[must_use]
    pub fn count_within(&self, point: Vec2, radius: f32, exclude: Option<K>) -> usize {
        self.query_radius(point, radius)
            .into_iter()
            .filter(|&key| Some(key) != exclude)
            .count()
    }

    /// Occupancy summary.
    #[must_use]
    pub fn occupancy(&self) -> GridOccupancy {
        let mut occupied_cells = 0;
        let mut max_per_cell = 0;
        let mut total = 0;
        for cell in &self.cells {
            if !cell.is_empty() {
                occupied_cells += 1;
                total += cell.len();
                max_per_cell = max_per_cell.max(cell.len());
            }
        }
        GridOccupancy {
            entities: self.members.len(),
            occupied_cells,
            max_per_cell,
            mean_per_occupied_cell: if occupied_cells == 0 {
                0.0
            } else {
                total as f32 / occupied_cells as f32
            },
        }
    }
}
