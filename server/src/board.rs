//! Shared panel grid and its concurrency discipline
//!
//! This module owns the canvas state: a fixed sequence of panels, each a
//! 128×128 matrix of cells carrying the last accepted color and the
//! timestamp of the write that set it. All access goes through a single
//! reader/writer lock over the whole grid:
//! - bulk reads (panel export, snapshot raster) take the shared lock
//! - cell writes take the exclusive lock for an O(1) critical section
//!
//! Conflicts between concurrent painters are resolved by timestamp, not
//! arrival order: a write is applied only when its timestamp is strictly
//! greater than the cell's current one, so on an exact tie the earliest
//! writer keeps the cell.

use shared::{Color, PANEL_SIZE, PANEL_PIXEL_BYTES};
use thiserror::Error;
use tokio::sync::RwLock;

/// One pixel's current color plus the timestamp of its last accepted
/// write, in milliseconds since the epoch.
#[derive(Debug, Clone, Copy)]
pub struct Cell {
    pub color: Color,
    pub timestamp: u64,
}

impl Cell {
    fn blank() -> Self {
        Self {
            color: Color::new(0, 0, 0),
            timestamp: 0,
        }
    }
}

/// Outcome of a single-cell write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The cell now carries the given color and timestamp.
    Applied,
    /// A write with an equal or newer timestamp was already present;
    /// nothing changed.
    Stale,
    /// Panel or coordinate out of range; nothing changed.
    OutOfRange,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("grid tiling {cols}x{rows} does not cover {panels} panels")]
    BadTiling {
        cols: usize,
        rows: usize,
        panels: usize,
    },
    #[error("raster is {actual} bytes, expected {expected}")]
    BadRasterLength { expected: usize, actual: usize },
}

/// The process-wide canvas store. Constructed once at startup and passed
/// around behind an `Arc`; tests instantiate their own isolated stores.
pub struct PanelStore {
    /// Panels in index order; each panel is a flat row-major cell buffer.
    panels: RwLock<Vec<Vec<Cell>>>,
    num_panels: usize,
    cols: usize,
    rows: usize,
}

impl PanelStore {
    /// Creates an empty (all-black, timestamp 0) grid. The persistence
    /// tiling must cover the panel count exactly.
    pub fn new(num_panels: usize, cols: usize, rows: usize) -> Result<Self, StoreError> {
        if cols * rows != num_panels || num_panels == 0 {
            return Err(StoreError::BadTiling {
                cols,
                rows,
                panels: num_panels,
            });
        }

        let panels = (0..num_panels)
            .map(|_| vec![Cell::blank(); PANEL_SIZE * PANEL_SIZE])
            .collect();

        Ok(Self {
            panels: RwLock::new(panels),
            num_panels,
            cols,
            rows,
        })
    }

    pub fn num_panels(&self) -> usize {
        self.num_panels
    }

    /// Full-grid raster dimensions in pixels: `(cols·128, rows·128)`.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.cols * PANEL_SIZE, self.rows * PANEL_SIZE)
    }

    /// Applies a last-write-wins cell update. Range violations are
    /// rejected before the lock is taken and never mutate state.
    pub async fn write_cell(
        &self,
        panel: usize,
        x: usize,
        y: usize,
        color: Color,
        timestamp: u64,
    ) -> WriteOutcome {
        if panel >= self.num_panels || x >= PANEL_SIZE || y >= PANEL_SIZE {
            return WriteOutcome::OutOfRange;
        }

        let mut panels = self.panels.write().await;
        let cell = &mut panels[panel][y * PANEL_SIZE + x];
        if timestamp > cell.timestamp {
            cell.color = color;
            cell.timestamp = timestamp;
            WriteOutcome::Applied
        } else {
            WriteOutcome::Stale
        }
    }

    /// Exports one panel as `PANEL_SIZE²·3` raw RGB bytes, row-major.
    /// The shared lock guarantees a self-consistent snapshot with no torn
    /// pixels. Returns `None` for an out-of-range index.
    pub async fn read_panel(&self, panel: usize) -> Option<Vec<u8>> {
        if panel >= self.num_panels {
            return None;
        }

        let panels = self.panels.read().await;
        let mut raw = Vec::with_capacity(PANEL_PIXEL_BYTES);
        for cell in &panels[panel] {
            raw.push(cell.color.r);
            raw.push(cell.color.g);
            raw.push(cell.color.b);
        }
        Some(raw)
    }

    /// Tiles every panel into one `cols·128 × rows·128` RGB raster under
    /// a single read lock, so no panel is torn relative to another.
    /// Panel `i` lands at tile `(i % cols, i / cols)`.
    pub async fn snapshot_raster(&self) -> Vec<u8> {
        let (width, height) = self.dimensions();
        let mut raster = vec![0u8; width * height * 3];

        let panels = self.panels.read().await;
        for (i, panel) in panels.iter().enumerate() {
            let x_offset = (i % self.cols) * PANEL_SIZE;
            let y_offset = (i / self.cols) * PANEL_SIZE;
            for y in 0..PANEL_SIZE {
                for x in 0..PANEL_SIZE {
                    let cell = &panel[y * PANEL_SIZE + x];
                    let out = ((y_offset + y) * width + x_offset + x) * 3;
                    raster[out] = cell.color.r;
                    raster[out + 1] = cell.color.g;
                    raster[out + 2] = cell.color.b;
                }
            }
        }
        raster
    }

    /// Overwrites every cell's color from a full-grid raster (the inverse
    /// of [`snapshot_raster`](Self::snapshot_raster)) and resets every
    /// timestamp to 0, so the first subsequent update on any pixel wins.
    pub async fn restore_raster(&self, raster: &[u8]) -> Result<(), StoreError> {
        let (width, height) = self.dimensions();
        let expected = width * height * 3;
        if raster.len() != expected {
            return Err(StoreError::BadRasterLength {
                expected,
                actual: raster.len(),
            });
        }

        let mut panels = self.panels.write().await;
        for (i, panel) in panels.iter_mut().enumerate() {
            let x_offset = (i % self.cols) * PANEL_SIZE;
            let y_offset = (i / self.cols) * PANEL_SIZE;
            for y in 0..PANEL_SIZE {
                for x in 0..PANEL_SIZE {
                    let src = ((y_offset + y) * width + x_offset + x) * 3;
                    panel[y * PANEL_SIZE + x] = Cell {
                        color: Color::new(raster[src], raster[src + 1], raster[src + 2]),
                        timestamp: 0,
                    };
                }
            }
        }
        Ok(())
    }
}
