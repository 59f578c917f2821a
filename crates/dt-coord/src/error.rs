use dt_core::{DtError, EdgeId, Step, VehicleId, WorkerIndex};
use dt_mobility::MobilityError;
use dt_partition::PartitionError;
use dt_spatial::SpatialError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordError {
    #[error("{machine}: no transition from {from} on {event}")]
    IllegalTransition {
        machine: &'static str,
        from:    String,
        event:   String,
    },

    #[error("unknown worker {0:?}")]
    UnknownWorker(String),

    #[error("{0} is not a connected fellow")]
    UnknownFellow(WorkerIndex),

    #[error("no fellow owns {edge}, the next edge of vehicle {vehicle}")]
    NoHandoverTarget { vehicle: VehicleId, edge: EdgeId },

    #[error("border payload for {got} does not match the current exchange at {expected}")]
    StepMismatch { expected: Step, got: Step },

    #[error("command {command} is not valid while {phase}")]
    InvalidCommand { command: &'static str, phase: &'static str },

    #[error("{have} of {need} workers have joined")]
    NotEnoughWorkers { have: usize, need: usize },

    #[error("worker has not been set up")]
    NotSetUp,

    #[error("setup names no road graph and none was loaded before")]
    NoRoadGraph,

    #[error(transparent)]
    Config(#[from] DtError),

    #[error(transparent)]
    Partition(#[from] PartitionError),

    #[error(transparent)]
    Spatial(#[from] SpatialError),

    #[error(transparent)]
    Mobility(#[from] MobilityError),
}

pub type CoordResult<T> = Result<T, CoordError>;
