//! Partitioning error type.

use thiserror::Error;

use dt_core::EdgeId;

/// Configuration errors detected while building work areas.  Each one is
/// fatal to the setup attempt that triggered it, never to the process.
#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("road network has no nodes to partition")]
    EmptyNetwork,

    #[error("{workers} workers cannot share {cells} grid cells")]
    TooManyWorkers { workers: usize, cells: usize },

    #[error("a {rows} x {cols} grid exceeds {max} cells; raise max_cell_size_m")]
    GridTooLarge { rows: u64, cols: u64, max: u64 },

    #[error("no grid cell intersects any spatial window")]
    WindowsOutsideMap,

    #[error("external route {id:?} has no legs")]
    EmptyRoute { id: String },

    #[error("external route {id:?} uses unknown edge {edge}")]
    UnknownEdge { id: String, edge: EdgeId },

    #[error("ownership table covers {got} nodes, network has {expected}")]
    OwnershipMismatch { expected: usize, got: usize },
}

pub type PartitionResult<T> = Result<T, PartitionError>;
