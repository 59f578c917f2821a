//! `dt-spatial` — read-only road network, spatial indexing, and routing.
//!
//! # Crate layout
//!
//! | Module      | Contents                                                      |
//! |-------------|---------------------------------------------------------------|
//! | [`network`] | `RoadNetwork` (CSR + lanes + R-tree), `RoadNetworkBuilder`    |
//! | [`router`]  | `Router` trait, `Route`, `DijkstraRouter`, `RandomAStarRouter` |
//! | [`error`]   | `SpatialError`, `SpatialResult<T>`                            |
//!
//! # Feature flags
//!
//! | Flag    | Effect                                                       |
//! |---------|--------------------------------------------------------------|
//! | `serde` | Derives `Serialize`/`Deserialize` on `Route`.                |

pub mod error;
pub mod network;
pub mod router;

#[cfg(test)]
mod tests;

pub use error::{SpatialError, SpatialResult};
pub use network::{RoadNetwork, RoadNetworkBuilder, DEFAULT_SPEED_MPS};
pub use router::{router_for, DijkstraRouter, RandomAStarRouter, Route, Router};
