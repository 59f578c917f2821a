//! `dt-coord` — step coordination for the distributed traffic simulator.
//!
//! # Crate layout
//!
//! | Module          | Contents                                                        |
//! |-----------------|-----------------------------------------------------------------|
//! | [`state`]       | `WorkerState` and `FellowState` machines (pure transitions)     |
//! | [`registry`]    | `WorkerRegistry`, `WorkerRecord`, admission                     |
//! | [`fellow`]      | `FellowRecord` — one connected fellow's exchange progress       |
//! | [`border`]      | `BorderExchange` — per-step vehicle and lane-tail hand-off      |
//! | [`cache`]       | `StepCache` — payloads held until their step comes up           |
//! | [`aggregator`]  | `ReportAggregator`, `TerminationPolicy`                         |
//! | [`observer`]    | `ReportObserver`, `NoopObserver`, `RunSummary`                  |
//! | [`coordinator`] | `Coordinator` — server driver (BSP step cycle, PSP control)     |
//! | [`worker`]      | `WorkerNode` — worker driver for both protocols                 |
//! | [`outbound`]    | `Outbound` — addressed messages returned by the drivers         |
//! | [`cluster`]     | `LocalCluster` — in-memory transport for whole-run tests        |
//! | [`error`]       | `CoordError`, `CoordResult<T>`                                  |
//!
//! # Driving a run in-process
//!
//! ```rust,ignore
//! use dt_coord::{LocalCluster, NoopObserver};
//! use dt_mobility::LaneEngine;
//!
//! let sims = (0..config.num_workers).map(|_| LaneEngine::new()).collect();
//! let mut cluster = LocalCluster::new(config, sims)?;
//! let summary = cluster.run_to_end(&mut NoopObserver)?;
//! ```
//!
//! # Feature flags
//!
//! | Flag       | Effect                                            |
//! |------------|---------------------------------------------------|
//! | `parallel` | Forwarded to `dt-mobility`.                       |
//! | `fx-hash`  | Forwarded to `dt-mobility`.                       |

pub mod aggregator;
pub mod border;
pub mod cache;
pub mod cluster;
pub mod coordinator;
pub mod error;
pub mod fellow;
pub mod observer;
pub mod outbound;
pub mod registry;
pub mod state;
pub mod worker;


pub use aggregator::{AggregatedStep, ReportAggregator, Termination, TerminationPolicy};
pub use border::BorderExchange;
pub use cache::{Admit, StepCache};
pub use cluster::{Delivery, Endpoint, LocalCluster};
pub use coordinator::{Coordinator, Phase, ServerCommand};
pub use error::{CoordError, CoordResult};
pub use fellow::FellowRecord;
pub use observer::{NoopObserver, ReportObserver, RunSummary};
pub use outbound::Outbound;
pub use registry::{Admission, WorkerRecord, WorkerRegistry};
pub use state::{FellowEvent, FellowState, WorkerEvent, WorkerState};
pub use worker::WorkerNode;
