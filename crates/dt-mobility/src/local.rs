//! The seam between coordination and physics.
//!
//! Coordination code never moves a vehicle itself.  It hands the simulation a
//! [`LocalSetup`], then drives it one step at a time through
//! [`LocalSimulation`], feeding in vehicles and lane tails received from
//! fellows and shipping out whatever the step produced.

use std::sync::Arc;

use dt_core::{
    DriverProfileShare, EdgeId, ExternalRoute, NodeId, RoutingAlgorithm, SpatialWindows, Step,
    TrafficLightTiming, VehicleId, VehicleQuotas, WorkerIndex,
};
use dt_proto::{
    BorderVehicle, CreationPermits, FinishedVehicle, LaneDirectionChange, LaneTail, LightState,
    NewRoute, VehicleSnapshot,
};
use dt_spatial::RoadNetwork;

use crate::MobilityResult;

/// Everything the local simulation needs for one run.
#[derive(Clone)]
pub struct LocalSetup {
    pub network: Arc<RoadNetwork>,
    pub worker: WorkerIndex,
    /// `true` at `EdgeId` index when this worker owns the edge.
    pub owned_edges: Vec<bool>,
    /// This worker's share of the random-vehicle quotas.
    pub quotas: VehicleQuotas,
    pub external_routes: Vec<ExternalRoute>,
    pub driver_profiles: Vec<DriverProfileShare>,
    pub steps_per_second: u32,
    pub start_step: Step,
    pub look_ahead_distance_m: f32,
    pub routing_algorithm: RoutingAlgorithm,
    pub traffic_light_timing: TrafficLightTiming,
    pub light_nodes_to_add: Vec<NodeId>,
    pub light_nodes_to_remove: Vec<NodeId>,
    pub reroute: bool,
    pub tram_stop_rule: bool,
    pub drive_on_left: bool,
    pub windows: SpatialWindows,
    /// Report every vehicle's position, not just foreground ones.
    pub report_vehicles: bool,
    pub seed: u64,
}

impl LocalSetup {
    /// A setup owning every edge of `network`, with defaults elsewhere.
    pub fn whole_network(network: Arc<RoadNetwork>, seed: u64) -> Self {
        let owned_edges = vec![true; network.edge_count()];
        LocalSetup {
            network,
            worker: WorkerIndex(0),
            owned_edges,
            quotas: VehicleQuotas::ZERO,
            external_routes: Vec::new(),
            driver_profiles: Vec::new(),
            steps_per_second: 1,
            start_step: Step::ZERO,
            look_ahead_distance_m: 50.0,
            routing_algorithm: RoutingAlgorithm::Dijkstra,
            traffic_light_timing: TrafficLightTiming::None,
            light_nodes_to_add: Vec::new(),
            light_nodes_to_remove: Vec::new(),
            reroute: false,
            tram_stop_rule: false,
            drive_on_left: false,
            windows: SpatialWindows::default(),
            report_vehicles: false,
            seed,
        }
    }

    #[inline]
    pub fn owns(&self, edge: EdgeId) -> bool {
        self.owned_edges.get(edge.index()).copied().unwrap_or(false)
    }
}

/// What one local step produced.
#[derive(Clone, Debug, Default)]
pub struct StepOutcome {
    /// Vehicles that left this worker's area during the step, already
    /// removed locally.  Their `current_edge()` is the edge they enter next,
    /// owned by some fellow.
    pub departed: Vec<BorderVehicle>,
    pub finished: Vec<FinishedVehicle>,
    pub snapshots: Vec<VehicleSnapshot>,
    pub new_routes: Vec<NewRoute>,
    pub lights: Vec<LightState>,
    pub lane_directions: Vec<LaneDirectionChange>,
    /// Random vehicles this worker created that are still on the road
    /// anywhere, by class.  Vehicles adopted from fellows are not counted.
    pub counts: VehicleQuotas,
    /// Vehicles created this step, random and external.
    pub created: u64,
}

/// A worker's local traffic model.
///
/// Implementations own their vehicles outright.  A vehicle handed out in
/// [`StepOutcome::departed`] must already be gone locally, and a vehicle
/// passed to [`insert_border_vehicle`](Self::insert_border_vehicle) becomes
/// active here immediately.
pub trait LocalSimulation: Send {
    /// Load a run.  Drops any state left from a previous run.
    fn configure(&mut self, setup: LocalSetup) -> MobilityResult<()>;

    /// Populate the area before the first step; returns how many vehicles
    /// were created.
    fn create_initial_vehicles(&mut self) -> MobilityResult<usize>;

    /// Advance the local model by one step.
    fn step(&mut self, step: Step, permits: &CreationPermits) -> MobilityResult<StepOutcome>;

    /// Adopt a vehicle received from a fellow.
    fn insert_border_vehicle(&mut self, vehicle: BorderVehicle) -> MobilityResult<()>;

    /// Vehicles created here finished in another area; stop counting them
    /// against the quota.  Unknown ids are ignored.  Returns how many were
    /// still counted.
    fn retire_vehicles(&mut self, vehicles: &[VehicleId]) -> usize;

    /// Rear-most vehicle on every lane of `edges`.  Lanes without vehicles
    /// are omitted.
    fn rear_vehicles(&self, edges: &[EdgeId]) -> Vec<LaneTail>;

    /// Replace the virtual leaders on `edges` with `tails`.
    fn set_border_tails(&mut self, edges: &[EdgeId], tails: &[LaneTail]);

    fn active_vehicle_count(&self) -> usize;

    /// External routes not yet released.
    fn pending_route_count(&self) -> usize;
}
