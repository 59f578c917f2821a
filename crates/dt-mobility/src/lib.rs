//! `dt-mobility` — the local stepping collaborator of a worker.
//!
//! # Crate layout
//!
//! | Module      | Contents                                                          |
//! |-------------|-------------------------------------------------------------------|
//! | [`local`]   | `LocalSimulation` trait, `LocalSetup`, `StepOutcome`              |
//! | [`engine`]  | `LaneEngine` — the reference kinematic lane model                 |
//! | [`vehicle`] | `Vehicle` — per-vehicle travel state                              |
//! | [`lanes`]   | `LaneIndex` — per-step `(edge, lane)` occupancy, front to back    |
//! | [`lights`]  | `LightController` — two-phase signals, fixed or dynamic timing    |
//! | [`error`]   | `MobilityError`, `MobilityResult<T>`                              |
//!
//! # Ownership of vehicles
//!
//! A vehicle lives on exactly one worker: the owner of the edge it drives
//! on.  When its next leg is an edge owned elsewhere the engine removes it
//! and returns it in [`StepOutcome::departed`]; the coordination layer ships
//! it to the fellow, whose engine adopts it through
//! [`LocalSimulation::insert_border_vehicle`].
//!
//! # Feature flags
//!
//! | Flag       | Effect                                                   |
//! |------------|----------------------------------------------------------|
//! | `parallel` | Speeds are computed on the Rayon pool.                   |
//! | `fx-hash`  | The lane index hashes with FxHash instead of SipHash.    |

pub mod engine;
pub mod error;
pub mod lanes;
pub mod lights;
pub mod local;
pub mod vehicle;

#[cfg(test)]
mod tests;

pub use engine::LaneEngine;
pub use error::{MobilityError, MobilityResult};
pub use lanes::LaneIndex;
pub use lights::LightController;
pub use local::{LocalSetup, LocalSimulation, StepOutcome};
pub use vehicle::Vehicle;
