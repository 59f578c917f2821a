//! Grid partitioner: assigns every grid cell to exactly one worker.
//!
//! # Algorithm
//!
//! Cells are walked in row-major order and accumulated into the current
//! worker's bucket.  With `share = total_lane_length / n`:
//!
//! | Situation                                   | Cell goes to                      |
//! |---------------------------------------------|-----------------------------------|
//! | current worker is the last one              | current                           |
//! | bucket already holds `share` or more        | next worker                       |
//! | bucket + cell exceeds `share`               | coin flip: current (then close) or next |
//! | otherwise                                   | current                           |
//!
//! An empty bucket always takes the cell, and a bucket closes early when the
//! remaining cells are only just enough for the remaining workers, so every
//! worker ends up with at least one cell whenever `n ≤ cells`.

use dt_core::{EdgeId, NodeId, SimRng, WorkerIndex};
use dt_spatial::RoadNetwork;

use crate::grid::Grid;
use crate::{PartitionError, PartitionResult};

// ── WorkArea ──────────────────────────────────────────────────────────────────

/// The cells one worker is responsible for simulating.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkArea {
    pub worker: WorkerIndex,
    /// Indices into `Grid::cells`, ascending.
    pub cells: Vec<usize>,
    /// Summed lane length of the area's cells, metres.
    pub lane_length: f64,
}

impl WorkArea {
    /// Fraction of `total` this area carries (0 if `total` is 0).
    pub fn lane_length_ratio(&self, total: f64) -> f64 {
        if total > 0.0 { self.lane_length / total } else { 0.0 }
    }
}

// ── Ownership ─────────────────────────────────────────────────────────────────

/// Which worker owns each node, and through end nodes, each edge.
///
/// Shipped to every worker inside `Setup`; each worker derives its own
/// border topology from it.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Ownership {
    node_owner: Vec<WorkerIndex>,
}

impl Ownership {
    /// Wrap a per-node owner table received over the wire.
    pub fn from_node_owners(net: &RoadNetwork, node_owner: Vec<WorkerIndex>) -> PartitionResult<Self> {
        if node_owner.len() != net.node_count() {
            return Err(PartitionError::OwnershipMismatch {
                expected: net.node_count(),
                got:      node_owner.len(),
            });
        }
        Ok(Self { node_owner })
    }

    /// Everything owned by worker 0.  Used for single-worker runs.
    pub fn single(net: &RoadNetwork) -> Self {
        Self { node_owner: vec![WorkerIndex(0); net.node_count()] }
    }

    pub fn node_owners(&self) -> &[WorkerIndex] {
        &self.node_owner
    }

    #[inline]
    pub fn node_owner(&self, node: NodeId) -> WorkerIndex {
        self.node_owner.get(node.index()).copied().unwrap_or(WorkerIndex::INVALID)
    }

    /// Owner of `edge`: the owner of its end node.
    #[inline]
    pub fn edge_owner(&self, net: &RoadNetwork, edge: EdgeId) -> WorkerIndex {
        match net.edge_to.get(edge.index()) {
            Some(&to) => self.node_owner(to),
            None      => WorkerIndex::INVALID,
        }
    }

    /// All edges owned by `worker`, ascending.
    pub fn owned_edges(&self, net: &RoadNetwork, worker: WorkerIndex) -> Vec<EdgeId> {
        net.edges().filter(|&e| self.edge_owner(net, e) == worker).collect()
    }
}

// ── Partition ─────────────────────────────────────────────────────────────────

/// Result of partitioning: the grid, one work area per worker, and the
/// derived node ownership.
#[derive(Clone, Debug)]
pub struct Partition {
    pub grid: Grid,
    /// Indexed by `WorkerIndex`.
    pub areas: Vec<WorkArea>,
    pub ownership: Ownership,
}

impl Partition {
    pub fn worker_count(&self) -> usize {
        self.areas.len()
    }

    /// Lane-length share of each worker, in worker order.
    pub fn lane_length_ratios(&self) -> Vec<f64> {
        let total = self.grid.total_lane_length();
        self.areas.iter().map(|a| a.lane_length_ratio(total)).collect()
    }

    /// Owner of grid cell `cell`.
    pub fn cell_owner(&self, cell: usize) -> Option<WorkerIndex> {
        self.areas.iter().find(|a| a.cells.binary_search(&cell).is_ok()).map(|a| a.worker)
    }
}

/// Partition `net` among `num_workers` workers.
pub fn partition(
    net: &RoadNetwork,
    num_workers: usize,
    max_cell_size_m: f32,
    rng: &mut SimRng,
) -> PartitionResult<Partition> {
    let grid = Grid::build(net, num_workers, max_cell_size_m)?;
    let areas = partition_grid(&grid, num_workers, rng)?;

    let mut node_owner = vec![WorkerIndex::INVALID; net.node_count()];
    for area in &areas {
        for &cell in &area.cells {
            for &node in &grid.cells[cell].nodes {
                node_owner[node.index()] = area.worker;
            }
        }
    }
    Ok(Partition { grid, areas, ownership: Ownership { node_owner } })
}

/// Assign the cells of `grid` to `num_workers` work areas.
pub fn partition_grid(grid: &Grid, num_workers: usize, rng: &mut SimRng) -> PartitionResult<Vec<WorkArea>> {
    let cells = grid.cell_count();
    if num_workers == 0 || num_workers > cells {
        return Err(PartitionError::TooManyWorkers { workers: num_workers, cells });
    }

    let share = grid.total_lane_length() / num_workers as f64;
    let last = num_workers - 1;

    let mut areas: Vec<WorkArea> = (0..num_workers)
        .map(|w| WorkArea { worker: WorkerIndex(w as u16), cells: Vec::new(), lane_length: 0.0 })
        .collect();

    let mut w = 0usize;
    for (i, cell) in grid.cells.iter().enumerate() {
        if w < last && !areas[w].cells.is_empty() {
            let cells_left = cells - i;
            let workers_after = last - w;
            let bucket = areas[w].lane_length;

            if cells_left <= workers_after || bucket >= share {
                w += 1;
            } else if bucket + cell.lane_length > share {
                if rng.coin() {
                    push(&mut areas[w], i, cell.lane_length);
                    w += 1;
                    continue;
                }
                w += 1;
            }
        }
        push(&mut areas[w], i, cell.lane_length);
    }

    Ok(areas)
}

#[inline]
fn push(area: &mut WorkArea, cell: usize, lane_length: f64) {
    area.cells.push(cell);
    area.lane_length += lane_length;
}
