//! Workload balancer: splits global vehicle quotas and external routes
//! among finalized work areas.
//!
//! | Mode                     | Weight of worker `w`                              |
//! |--------------------------|---------------------------------------------------|
//! | no spatial windows       | `w`'s lane-length share                           |
//! | windows configured       | number of `w`'s cells intersecting any window     |
//!
//! Each class is apportioned by flooring `global × weight / Σweight`; the
//! remainder goes to the last worker with a positive weight, so per-class
//! sums always equal the global target.

use dt_core::{ExternalRoute, SpatialWindows, VehicleClass, VehicleQuotas, WorkerIndex};
use dt_spatial::RoadNetwork;

use crate::partition::Partition;
use crate::{PartitionError, PartitionResult};

/// Guards `floor` against `0.3 × 100 = 29.999…`.
const FLOOR_EPSILON: f64 = 1e-9;

/// Per-worker share of the run's workload.  Indexed by `WorkerIndex`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkloadAssignment {
    pub quotas: Vec<VehicleQuotas>,
    pub routes: Vec<Vec<ExternalRoute>>,
}

impl WorkloadAssignment {
    pub fn for_worker(&self, w: WorkerIndex) -> (VehicleQuotas, &[ExternalRoute]) {
        (
            self.quotas.get(w.index()).copied().unwrap_or_default(),
            self.routes.get(w.index()).map(Vec::as_slice).unwrap_or(&[]),
        )
    }
}

/// Split `total` in proportion to `weights`.
///
/// Returns all zeros when no weight is positive.
pub fn apportion(total: u64, weights: &[f64]) -> Vec<u64> {
    let sum: f64 = weights.iter().filter(|w| **w > 0.0).sum();
    let mut out = vec![0u64; weights.len()];
    let Some(last) = weights.iter().rposition(|w| *w > 0.0) else {
        return out;
    };
    let mut given = 0u64;
    for (i, &w) in weights.iter().enumerate() {
        if i == last || w <= 0.0 {
            continue;
        }
        let n = ((total as f64 * w / sum) + FLOOR_EPSILON).floor() as u64;
        let n = n.min(total - given);
        out[i] = n;
        given += n;
    }
    out[last] = total - given;
    out
}

/// Weight of each worker for quota apportionment.
pub fn quota_weights(partition: &Partition, windows: &SpatialWindows) -> PartitionResult<Vec<f64>> {
    if windows.is_empty() {
        return Ok(partition.lane_length_ratios());
    }
    let weights: Vec<f64> = partition
        .areas
        .iter()
        .map(|area| {
            area.cells
                .iter()
                .filter(|&&c| {
                    let bbox = &partition.grid.cells[c].bbox;
                    windows.all().any(|win| win.intersects(bbox))
                })
                .count() as f64
        })
        .collect();
    if weights.iter().all(|w| *w == 0.0) {
        return Err(PartitionError::WindowsOutsideMap);
    }
    Ok(weights)
}

/// Apportion `global` quotas and hand each external route to the owner of
/// its first edge.
pub fn assign_quotas(
    partition: &Partition,
    net: &RoadNetwork,
    global: VehicleQuotas,
    windows: &SpatialWindows,
    routes: &[ExternalRoute],
) -> PartitionResult<WorkloadAssignment> {
    let n = partition.worker_count();
    let weights = quota_weights(partition, windows)?;

    let mut quotas = vec![VehicleQuotas::ZERO; n];
    for class in VehicleClass::ALL {
        for (w, count) in apportion(global.get(class), &weights).into_iter().enumerate() {
            *quotas[w].get_mut(class) = count;
        }
    }

    let mut per_worker: Vec<Vec<ExternalRoute>> = vec![Vec::new(); n];
    for route in routes {
        let edge = route
            .first_edge()
            .ok_or_else(|| PartitionError::EmptyRoute { id: route.id.clone() })?;
        for leg in &route.legs {
            if net.check_edge(leg.edge).is_err() {
                return Err(PartitionError::UnknownEdge { id: route.id.clone(), edge: leg.edge });
            }
        }
        let owner = partition.ownership.edge_owner(net, edge);
        if let Some(bucket) = per_worker.get_mut(owner.index()) {
            bucket.push(route.clone());
        }
    }

    Ok(WorkloadAssignment { quotas, routes: per_worker })
}
