//! `dt-core` — foundational types for the distributed traffic simulator.
//!
//! This crate is a dependency of every other `dt-*` crate.  It intentionally
//! has no `dt-*` dependencies and minimal external ones (only `rand` and
//! `thiserror`, plus optional `serde`).
//!
//! # What lives here
//!
//! | Module          | Contents                                                   |
//! |-----------------|------------------------------------------------------------|
//! | [`ids`]         | `NodeId`, `EdgeId`, `VehicleId`, `WorkerIndex`             |
//! | [`geo`]         | `GeoPoint`, `BoundingBox`, haversine distance              |
//! | [`time`]        | `Step`, `StepClock`                                        |
//! | [`vehicle`]     | `VehicleClass`, `DriverProfile`, `VehicleQuotas`, routes   |
//! | [`config`]      | `SimConfig` and the enums it is built from                 |
//! | [`rng`]         | `SimRng` (seeded, per-worker derivable)                    |
//! | [`error`]       | `DtError`, `DtResult`                                      |
//!
//! # Feature flags
//!
//! | Flag    | Effect                                                     |
//! |---------|------------------------------------------------------------|
//! | `serde` | Adds `Serialize`/`Deserialize` to all public types.        |

pub mod config;
pub mod error;
pub mod geo;
pub mod ids;
pub mod rng;
pub mod time;
pub mod vehicle;

#[cfg(test)]
mod tests;

// ── Re-exports ────────────────────────────────────────────────────────────────

pub use config::{
    DriverProfileShare, RoadGraphSource, RoadGraphSpec, RoadSpec, RoutingAlgorithm, SimConfig,
    SpatialWindows, SyncMode, TrafficLightTiming,
};
pub use error::{DtError, DtResult};
pub use geo::{BoundingBox, GeoPoint};
pub use ids::{EdgeId, NodeId, VehicleId, WorkerIndex};
pub use rng::SimRng;
pub use time::{Step, StepClock};
pub use vehicle::{DriverProfile, ExternalRoute, RouteLeg, VehicleClass, VehicleQuotas};
