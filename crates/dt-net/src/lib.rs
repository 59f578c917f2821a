//! `dt-net` — TCP transport for the distributed traffic simulator.
//!
//! | Module     | Contents                                                       |
//! |------------|----------------------------------------------------------------|
//! | [`frame`]  | `read_frame` / `write_frame` over tokio streams                |
//! | [`server`] | `Server`, `ServerHandle` — hub task owning the `Coordinator`   |
//! | [`worker`] | `run_worker`, `spawn_local_worker` — worker process loop       |
//! | [`error`]  | `NetError`, `NetResult<T>`                                     |
//!
//! Both ends keep the sans-IO drivers of `dt-coord` on a single task and
//! feed it from per-connection reader tasks over an mpsc channel, so the
//! drivers never see concurrent calls.  Each connection has its own writer
//! task, which keeps per-peer FIFO order.

pub mod error;
pub mod frame;
pub mod server;
pub mod worker;

#[cfg(test)]
mod tests;

pub use error::{NetError, NetResult};
pub use frame::{read_frame, spawn_writer, write_frame};
pub use server::{Server, ServerHandle, ServerStatus, DEFAULT_PORT};
pub use worker::{run_worker, spawn_local_worker, WorkerExit};
