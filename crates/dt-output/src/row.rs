//! Plain data row types written by output backends.

use dt_coord::AggregatedStep;
use dt_proto::FinishedVehicle;

/// Merged totals for one completed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSummaryRow {
    pub step:              u64,
    pub active_vehicles:   u64,
    /// Vehicles that finished since the previous row.
    pub finished_vehicles: u64,
    /// Active random vehicles by class.
    pub private:           u64,
    pub tram:              u64,
    pub bus:               u64,
}

impl From<&AggregatedStep> for StepSummaryRow {
    fn from(agg: &AggregatedStep) -> Self {
        StepSummaryRow {
            step:              agg.step.0,
            active_vehicles:   agg.active_vehicles,
            finished_vehicles: agg.finished.len() as u64,
            private:           agg.counts.private,
            tram:              agg.counts.tram,
            bus:               agg.counts.bus,
        }
    }
}

/// One vehicle that reached its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishedVehicleRow {
    pub vehicle_id:  u64,
    /// Index of the worker that created the vehicle.
    pub origin:      u16,
    pub class:       &'static str,
    pub created_at:  u64,
    pub finished_at: u64,
}

impl From<&FinishedVehicle> for FinishedVehicleRow {
    fn from(f: &FinishedVehicle) -> Self {
        FinishedVehicleRow {
            vehicle_id:  f.id.0,
            origin:      f.id.origin().0,
            class:       f.class.as_str(),
            created_at:  f.created_at.0,
            finished_at: f.finished_at.0,
        }
    }
}
