//! Spatial grid over the road network's bounding box.
//!
//! # Sizing
//!
//! The grid starts at `n × n` cells for `n` workers.  Rows grow while a
//! cell is taller than `max_cell_size_m`, columns while it is wider, so a
//! single cell never dominates a worker's share on a large map.
//!
//! # Cell contents
//!
//! Every node falls into exactly one cell (the upper bounds of the last row
//! and column are inclusive).  A cell's lane length is the summed lane
//! length of the edges *entering* it, i.e. edges whose end node lies inside.
//! That matches edge ownership: an edge belongs to whoever owns its end node.

use dt_core::{BoundingBox, NodeId};
use dt_spatial::RoadNetwork;

use crate::{PartitionError, PartitionResult};

/// Largest grid `build` will lay out.
pub const MAX_GRID_CELLS: u64 = 1 << 20;

/// One grid cell.  Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct GridCell {
    pub row: u32,
    pub col: u32,
    pub bbox: BoundingBox,
    /// Nodes inside the cell, ascending.
    pub nodes: Vec<NodeId>,
    /// Summed lane length of edges ending in this cell, metres.
    pub lane_length: f64,
}

/// Row-major grid of cells.  Rebuilt whenever the map changes.
#[derive(Clone, Debug)]
pub struct Grid {
    pub rows: u32,
    pub cols: u32,
    pub bbox: BoundingBox,
    /// Row-major: cell `(r, c)` is at `r * cols + c`.
    pub cells: Vec<GridCell>,
    /// Cell index of every node.  Indexed by `NodeId`.
    node_cell: Vec<usize>,
}

impl Grid {
    /// Lay a grid over `net` sized for `num_workers` workers.
    pub fn build(net: &RoadNetwork, num_workers: usize, max_cell_size_m: f32) -> PartitionResult<Grid> {
        let bbox = net.bounding_box().ok_or(PartitionError::EmptyNetwork)?;
        let n = num_workers.max(1) as u64;
        let max = max_cell_size_m.max(1.0);

        let rows = cells_along(bbox.height_m(), n, max);
        let cols = cells_along(bbox.width_m(), n, max);
        if rows.saturating_mul(cols) > MAX_GRID_CELLS {
            return Err(PartitionError::GridTooLarge { rows, cols, max: MAX_GRID_CELLS });
        }
        let (rows, cols) = (rows as u32, cols as u32);

        let cell_lat = bbox.lat_span() / rows as f32;
        let cell_lon = bbox.lon_span() / cols as f32;

        let mut cells: Vec<GridCell> = (0..rows * cols)
            .map(|i| {
                let (row, col) = (i / cols, i % cols);
                let min_lat = bbox.min_lat + row as f32 * cell_lat;
                let min_lon = bbox.min_lon + col as f32 * cell_lon;
                GridCell {
                    row,
                    col,
                    bbox: BoundingBox::new(min_lat, min_lon, min_lat + cell_lat, min_lon + cell_lon),
                    nodes: Vec::new(),
                    lane_length: 0.0,
                }
            })
            .collect();

        let index = |span: f32, offset: f32, count: u32| -> u32 {
            if span <= 0.0 {
                return 0;
            }
            ((offset / span) as u32).min(count - 1)
        };

        let mut node_cell = Vec::with_capacity(net.node_count());
        for (i, pos) in net.node_pos.iter().enumerate() {
            let r = index(cell_lat, pos.lat - bbox.min_lat, rows);
            let c = index(cell_lon, pos.lon - bbox.min_lon, cols);
            let cell = (r * cols + c) as usize;
            cells[cell].nodes.push(NodeId(i as u32));
            node_cell.push(cell);
        }

        for e in net.edges() {
            let cell = node_cell[net.edge_to[e.index()].index()];
            cells[cell].lane_length += net.lane_length(e) as f64;
        }

        Ok(Grid { rows, cols, bbox, cells, node_cell })
    }

    /// A grid with explicit per-cell lane lengths and no nodes.  Lets the
    /// partitioner be driven without a road network.
    pub fn from_lane_lengths(rows: u32, cols: u32, lane_lengths: &[f64]) -> Grid {
        let bbox = BoundingBox::new(0.0, 0.0, rows as f32, cols as f32);
        let cells = lane_lengths
            .iter()
            .take((rows * cols) as usize)
            .enumerate()
            .map(|(i, &lane_length)| {
                let (row, col) = (i as u32 / cols, i as u32 % cols);
                GridCell {
                    row,
                    col,
                    bbox: BoundingBox::new(row as f32, col as f32, (row + 1) as f32, (col + 1) as f32),
                    nodes: Vec::new(),
                    lane_length,
                }
            })
            .collect();
        Grid { rows, cols, bbox, cells, node_cell: Vec::new() }
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Index of the cell containing `node`.
    #[inline]
    pub fn cell_of(&self, node: NodeId) -> Option<usize> {
        self.node_cell.get(node.index()).copied()
    }

    pub fn total_lane_length(&self) -> f64 {
        self.cells.iter().map(|c| c.lane_length).sum()
    }
}

/// Cells needed along a side of `span_m` so none exceeds `max_cell_m`, at
/// least `start`.  Stops counting past [`MAX_GRID_CELLS`].
fn cells_along(span_m: f32, start: u64, max_cell_m: f32) -> u64 {
    let mut k = start;
    while k <= MAX_GRID_CELLS && span_m / k as f32 > max_cell_m {
        k += 1;
    }
    k
}
