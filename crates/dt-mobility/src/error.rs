use dt_core::{EdgeId, VehicleId};
use dt_spatial::SpatialError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MobilityError {
    #[error("local simulation used before configure()")]
    NotConfigured,

    #[error("vehicle {0} arrived without a current edge")]
    NoCurrentEdge(VehicleId),

    #[error("vehicle {vehicle} arrived on {edge}, which this worker does not own")]
    NotOwned { vehicle: VehicleId, edge: EdgeId },

    #[error("vehicle {0} is already active here")]
    Duplicate(VehicleId),

    #[error("routing failed: {0}")]
    Routing(#[from] SpatialError),
}

pub type MobilityResult<T> = Result<T, MobilityError>;
