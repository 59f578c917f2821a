//! The message envelope.
//!
//! Every message travelling between processes is one variant of
//! [`Message`].  Receivers dispatch with an exhaustive `match`; adding a
//! variant breaks every handler that forgot it at compile time.
//!
//! | Variant                 | Direction        | Protocol |
//! |-------------------------|------------------|----------|
//! | `Join`                  | worker → server  | both     |
//! | `Setup`                 | server → worker  | both     |
//! | `SetupCreatingVehicles` | worker → server  | both     |
//! | `SetupDone`             | worker → server  | both     |
//! | `ShareTraffic`          | server → worker  | BSP      |
//! | `SharedWithNeighbor`    | worker → server  | BSP      |
//! | `Simulate`              | server → worker  | BSP      |
//! | `TrafficReport`         | worker → server  | both     |
//! | `WwTraffic`             | worker → worker  | both     |
//! | `VehiclesRetired`       | server → worker  | both     |
//! | `Serverless*`           | server ↔ worker  | PSP      |
//! | `KillWorker`            | server → worker  | both     |

use serde::{Deserialize, Serialize};

use dt_core::{
    DriverProfileShare, EdgeId, ExternalRoute, NodeId, RoadGraphSource, RoutingAlgorithm,
    SpatialWindows, Step, SyncMode, TrafficLightTiming, VehicleClass, VehicleId, VehicleQuotas,
    WorkerIndex,
};

use crate::border::WwTraffic;

// ── Setup ─────────────────────────────────────────────────────────────────────

/// Identity and peer address of one admitted worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerMeta {
    pub index: WorkerIndex,
    pub name: String,
    pub address: String,
    pub port: u16,
}

/// Everything a worker needs to take part in a run.  Sent to each worker
/// individually, since quotas and external routes differ per worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SetupPayload {
    /// The road graph changed; rebuild the network and all fellow records.
    pub is_new_environment: bool,
    pub num_workers: usize,
    pub sync_mode: SyncMode,
    pub start_step: Step,
    pub max_steps: Step,
    pub steps_per_second: u32,
    pub driver_profiles: Vec<DriverProfileShare>,
    pub look_ahead_distance_m: f32,
    pub traffic_light_timing: TrafficLightTiming,
    /// This worker's share of the global random-vehicle quotas.
    pub quotas: VehicleQuotas,
    /// Predefined routes starting in this worker's area.
    pub external_routes: Vec<ExternalRoute>,
    pub workers: Vec<WorkerMeta>,
    pub road_graph: RoadGraphSource,
    /// Owner of every node, indexed by `NodeId`.
    pub node_owner: Vec<WorkerIndex>,
    pub routing_algorithm: RoutingAlgorithm,
    pub light_nodes_to_add: Vec<NodeId>,
    pub light_nodes_to_remove: Vec<NodeId>,
    pub reroute: bool,
    pub tram_stop_rule: bool,
    pub drive_on_left: bool,
    pub windows: SpatialWindows,
    pub report_interval_steps: u64,
    pub report_vehicles: bool,
    pub seed: u64,
}

impl SetupPayload {
    /// Metadata of the worker called `name`.
    pub fn worker(&self, name: &str) -> Option<&WorkerMeta> {
        self.workers.iter().find(|w| w.name == name)
    }
}

// ── BSP ───────────────────────────────────────────────────────────────────────

/// Which vehicle classes a worker may create new random vehicles of during
/// one step.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationPermits {
    pub private: bool,
    pub tram: bool,
    pub bus: bool,
}

impl CreationPermits {
    pub const ALL: CreationPermits = CreationPermits { private: true, tram: true, bus: true };
    pub const NONE: CreationPermits = CreationPermits { private: false, tram: false, bus: false };

    #[inline]
    pub fn allows(&self, class: VehicleClass) -> bool {
        match class {
            VehicleClass::Private => self.private,
            VehicleClass::Tram    => self.tram,
            VehicleClass::Bus     => self.bus,
        }
    }
}

// ── Reports ───────────────────────────────────────────────────────────────────

/// Position of one vehicle, for visualization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VehicleSnapshot {
    pub id: VehicleId,
    pub class: VehicleClass,
    pub edge: EdgeId,
    pub lane: u8,
    pub head_position_m: f32,
    pub speed_mps: f32,
    pub foreground: bool,
}

/// A vehicle that reached its destination.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishedVehicle {
    pub id: VehicleId,
    pub class: VehicleClass,
    pub created_at: Step,
    pub finished_at: Step,
}

/// A route generated this step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRoute {
    pub vehicle: VehicleId,
    pub class: VehicleClass,
    pub edges: Vec<EdgeId>,
}

/// Traffic-light phase at one node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightState {
    pub node: NodeId,
    pub phase: u8,
}

/// Lane whose permitted direction changed this step.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneDirectionChange {
    pub edge: EdgeId,
    pub lane: u8,
    /// Turn directions allowed after the change, as a bit set.
    pub directions: u8,
}

/// One worker's report for one local step.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficReport {
    pub worker_name: String,
    pub step: Step,
    pub vehicles: Vec<VehicleSnapshot>,
    pub lights: Vec<LightState>,
    pub new_routes: Vec<NewRoute>,
    pub finished: Vec<FinishedVehicle>,
    pub lane_directions: Vec<LaneDirectionChange>,
    /// Random vehicles this worker created that are still on the road, by class.
    pub counts: VehicleQuotas,
    /// All active vehicles owned by this worker.
    pub active_vehicles: u64,
    /// External routes not yet released.
    pub pending_routes: u64,
}

// ── Envelope ──────────────────────────────────────────────────────────────────

/// Every message exchanged by servers and workers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Join {
        name: String,
        address: String,
        port: u16,
    },
    Setup(Box<SetupPayload>),
    SetupCreatingVehicles {
        worker_name: String,
        count: u64,
    },
    SetupDone {
        worker_name: String,
        num_fellows: usize,
    },
    ShareTraffic {
        step: Step,
    },
    SharedWithNeighbor {
        worker_name: String,
        step: Step,
    },
    Simulate {
        permits: CreationPermits,
        request_id: u64,
    },
    TrafficReport(Box<TrafficReport>),
    WwTraffic(Box<WwTraffic>),
    /// Vehicles created by the receiving worker that finished in another
    /// worker's area.  They no longer count against its quota.
    VehiclesRetired {
        vehicles: Vec<VehicleId>,
    },
    ServerlessStart {
        step: Step,
        max_steps: Step,
    },
    ServerlessPause {
        step: Step,
    },
    ServerlessResume {
        step: Step,
        max_steps: Step,
    },
    ServerlessStop {
        step: Step,
    },
    ServerlessComplete {
        worker_name: String,
        step: Step,
        vehicle_count: u64,
    },
    KillWorker {
        is_shared_process_space: bool,
    },
}

impl Message {
    /// Short tag for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Join { .. }                  => "join",
            Message::Setup(_)                     => "setup",
            Message::SetupCreatingVehicles { .. } => "setup_creating_vehicles",
            Message::SetupDone { .. }             => "setup_done",
            Message::ShareTraffic { .. }          => "share_traffic",
            Message::SharedWithNeighbor { .. }    => "shared_with_neighbor",
            Message::Simulate { .. }              => "simulate",
            Message::TrafficReport(_)             => "traffic_report",
            Message::WwTraffic(_)                 => "ww_traffic",
            Message::VehiclesRetired { .. }       => "vehicles_retired",
            Message::ServerlessStart { .. }       => "serverless_start",
            Message::ServerlessPause { .. }       => "serverless_pause",
            Message::ServerlessResume { .. }      => "serverless_resume",
            Message::ServerlessStop { .. }        => "serverless_stop",
            Message::ServerlessComplete { .. }    => "serverless_complete",
            Message::KillWorker { .. }            => "kill_worker",
        }
    }

    /// Name of the sending worker, for worker → server messages.
    pub fn worker_name(&self) -> Option<&str> {
        match self {
            Message::Join { name, .. } => Some(name),
            Message::SetupCreatingVehicles { worker_name, .. }
            | Message::SetupDone { worker_name, .. }
            | Message::SharedWithNeighbor { worker_name, .. }
            | Message::ServerlessComplete { worker_name, .. } => Some(worker_name),
            Message::TrafficReport(r) => Some(&r.worker_name),
            Message::WwTraffic(w) => Some(&w.sender_name),
            _ => None,
        }
    }
}
