//! `dt-partition` — splitting the road network into balanced work areas.
//!
//! # Crate layout
//!
//! | Module        | Contents                                                   |
//! |---------------|------------------------------------------------------------|
//! | [`grid`]      | `Grid`, `GridCell`                                         |
//! | [`partition`] | `partition`, `partition_grid`, `WorkArea`, `Ownership`     |
//! | [`balance`]   | `assign_quotas`, `apportion`, `WorkloadAssignment`         |
//! | [`topology`]  | `BorderTopology`, `FellowLink`                             |
//! | [`error`]     | `PartitionError`, `PartitionResult<T>`                     |
//!
//! Pipeline: `Grid::build` → `partition_grid` → `assign_quotas` →
//! `BorderTopology::compute` (on every worker).

pub mod balance;
pub mod error;
pub mod grid;
pub mod partition;
pub mod topology;

#[cfg(test)]
mod tests;

pub use balance::{apportion, assign_quotas, quota_weights, WorkloadAssignment};
pub use error::{PartitionError, PartitionResult};
pub use grid::{Grid, GridCell, MAX_GRID_CELLS};
pub use partition::{partition, partition_grid, Ownership, Partition, WorkArea};
pub use topology::{BorderTopology, FellowLink};
