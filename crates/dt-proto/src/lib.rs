//! `dt-proto` — message contracts shared by the server, workers and peers.
//!
//! # Crate layout
//!
//! | Module      | Contents                                                      |
//! |-------------|---------------------------------------------------------------|
//! | [`message`] | `Message` envelope, `SetupPayload`, `TrafficReport`, permits   |
//! | [`border`]  | `BorderVehicle`, `LaneTail`, `WwTraffic`                       |
//! | [`wire`]    | `MAGIC ‖ VERSION ‖ LENGTH ‖ CBOR` framing                      |
//! | [`error`]   | `ProtoError`, `ProtoResult<T>`                                 |

pub mod border;
pub mod error;
pub mod message;
pub mod wire;


pub use border::{BorderVehicle, LaneTail, WwTraffic};
pub use error::{ProtoError, ProtoResult};
pub use message::{
    CreationPermits, FinishedVehicle, LaneDirectionChange, LightState, Message, NewRoute,
    SetupPayload, TrafficReport, VehicleSnapshot, WorkerMeta,
};
pub use wire::{decode_frame, encode_frame};
