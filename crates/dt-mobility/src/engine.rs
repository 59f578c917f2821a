//! Reference lane engine: a kinematic car-following model over the shared
//! road network.
//!
//! Each step runs four phases:
//!
//! 1. release due external routes and create random vehicles;
//! 2. index lanes and advance the traffic signals;
//! 3. pick every vehicle's speed from the gap to whatever is ahead (a
//!    leader, a red light, a stopover, or a fellow's lane tail);
//! 4. move, hand vehicles to the next leg, and sort out who finished or
//!    left the area.
//!
//! Phase 3 only reads state, so with the `parallel` feature it fans out on
//! the Rayon pool.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use dt_core::{
    DriverProfile, EdgeId, ExternalRoute, NodeId, RouteLeg, SimRng, Step, VehicleClass, VehicleId,
    VehicleQuotas,
};
use dt_proto::{BorderVehicle, CreationPermits, FinishedVehicle, LaneTail, NewRoute};
use dt_spatial::{RandomAStarRouter, RoadNetwork, Router, SpatialError, router_for};

use crate::lanes::{LaneIndex, LaneMap};
use crate::lights::{DEMAND_DISTANCE_M, LightController};
use crate::local::{LocalSetup, LocalSimulation, StepOutcome};
use crate::vehicle::{Vehicle, class_accel_mps2, class_max_speed_mps};
use crate::{MobilityError, MobilityResult};

/// Vehicles stop this far short of a signal or stopover.
pub const STOP_LINE_M: f32 = 0.5;
/// Random vehicles created per class and step, at most.
pub const MAX_SPAWN_PER_STEP: u64 = 4;
/// Buses and trams stop at the end of every this-many-th leg.
pub const TRANSIT_STOP_EVERY: usize = 4;
pub const TRANSIT_STOPOVER_SECS: f32 = 20.0;
/// A vehicle stationary this long looks for another way when rerouting is on.
pub const REROUTE_AFTER_SECS: f32 = 30.0;
/// Below this a vehicle counts as stationary.
const STOPPED_MPS: f32 = 0.1;

/// What happened to a vehicle during the move phase.
#[derive(Copy, Clone, PartialEq, Eq)]
enum Fate {
    Stays,
    Finished,
    Departed,
}

/// State of one configured run.
struct Run {
    setup: LocalSetup,
    net: Arc<RoadNetwork>,
    router: Box<dyn Router>,
    rng: SimRng,
    vehicles: Vec<Vehicle>,
    /// External routes not yet released, earliest first.
    pending: VecDeque<ExternalRoute>,
    /// Virtual leaders on lanes owned by fellows.
    tails: LaneMap<LaneTail>,
    lights: LightController,
    source_edges: Vec<EdgeId>,
    destinations: Vec<NodeId>,
    profiles: (Vec<DriverProfile>, Vec<f64>),
    /// Random vehicles created here and not yet known to have finished,
    /// wherever they drive now.
    own_random: BTreeMap<VehicleId, VehicleClass>,
    next_seq: u64,
    /// Step reported for vehicles created before the first step.
    now: Step,
}

/// The reference [`LocalSimulation`].
#[derive(Default)]
pub struct LaneEngine {
    run: Option<Run>,
}

impl LaneEngine {
    pub fn new() -> Self {
        LaneEngine::default()
    }

    fn run(&self) -> MobilityResult<&Run> {
        self.run.as_ref().ok_or(MobilityError::NotConfigured)
    }

    fn run_mut(&mut self) -> MobilityResult<&mut Run> {
        self.run.as_mut().ok_or(MobilityError::NotConfigured)
    }

    /// Active vehicles, for inspection.
    pub fn vehicles(&self) -> &[Vehicle] {
        self.run.as_ref().map(|r| r.vehicles.as_slice()).unwrap_or(&[])
    }

    /// Signalised nodes managed here.
    pub fn light_count(&self) -> usize {
        self.run.as_ref().map_or(0, |r| r.lights.len())
    }
}

impl LocalSimulation for LaneEngine {
    fn configure(&mut self, setup: LocalSetup) -> MobilityResult<()> {
        let net = Arc::clone(&setup.network);
        let owned = |e: EdgeId| setup.owns(e);

        let source_nodes = window_nodes(&net, &setup.windows.sources);
        let source_edges = net
            .edges()
            .filter(|&e| owned(e))
            .filter(|&e| source_nodes.as_ref().is_none_or(|s| s.contains(&net.edge_from[e.index()])))
            .collect();
        let destinations = match window_nodes(&net, &setup.windows.destinations) {
            Some(nodes) => nodes.into_iter().collect(),
            None => (0..net.node_count() as u32).map(NodeId).collect(),
        };

        let lights = LightController::new(
            &net,
            owned,
            setup.traffic_light_timing,
            &setup.light_nodes_to_add,
            &setup.light_nodes_to_remove,
            setup.steps_per_second,
        );

        let mut pending: Vec<ExternalRoute> =
            setup.external_routes.iter().filter(|r| !r.legs.is_empty()).cloned().collect();
        pending.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));

        let profiles = if setup.driver_profiles.is_empty() {
            (vec![DriverProfile::Normal], vec![1.0])
        } else {
            setup.driver_profiles.iter().map(|s| (s.profile, s.weight)).unzip()
        };

        let mut rng = SimRng::for_worker(setup.seed, setup.worker);
        let router = router_for(setup.routing_algorithm, rng.random());

        self.run = Some(Run {
            now: setup.start_step,
            router,
            rng,
            vehicles: Vec::new(),
            pending: pending.into(),
            tails: LaneMap::default(),
            lights,
            source_edges,
            destinations,
            profiles,
            own_random: BTreeMap::new(),
            next_seq: 0,
            net,
            setup,
        });
        Ok(())
    }

    fn create_initial_vehicles(&mut self) -> MobilityResult<usize> {
        let run = self.run_mut()?;
        let mut created = 0;
        for class in VehicleClass::ALL {
            let quota = run.setup.quotas.get(class);
            let mut attempts = quota.saturating_mul(3);
            let mut made = 0;
            while made < quota && attempts > 0 {
                attempts -= 1;
                if run.spawn_random(class, true, None)?.is_some() {
                    made += 1;
                }
            }
            created += made as usize;
        }
        Ok(created)
    }

    fn step(&mut self, step: Step, permits: &CreationPermits) -> MobilityResult<StepOutcome> {
        let run = self.run_mut()?;
        run.now = step;
        let mut out = StepOutcome::default();

        run.release_external(step, &mut out)?;
        run.create_random(permits, &mut out)?;

        let index = LaneIndex::build(&run.vehicles);
        {
            let net = &run.net;
            let vehicles = &run.vehicles;
            out.lights = run.lights.advance(|e| {
                index.approaching(vehicles, e, net.edge_lanes[e.index()], net.edge_length_m[e.index()], DEMAND_DISTANCE_M)
            });
        }

        let speeds = run.plan_speeds(&index);
        run.move_vehicles(step, &speeds, &mut out);
        run.reroute_stuck(step, &mut out)?;

        for v in &run.vehicles {
            if run.setup.report_vehicles || v.foreground {
                out.snapshots.push(v.snapshot(run.reported_lane(v)));
            }
        }
        out.counts = run.random_counts();
        Ok(out)
    }

    fn insert_border_vehicle(&mut self, vehicle: BorderVehicle) -> MobilityResult<()> {
        let run = self.run_mut()?;
        let id = vehicle.id;
        let mut v = Vehicle::from_border(vehicle).ok_or(MobilityError::NoCurrentEdge(id))?;
        let edge = v.current_edge();
        if !run.setup.owns(edge) {
            return Err(MobilityError::NotOwned { vehicle: id, edge });
        }
        if run.vehicles.iter().any(|o| o.id == id) {
            return Err(MobilityError::Duplicate(id));
        }
        let lanes = run.net.edge_lanes[edge.index()].max(1);
        v.lane = v.lane.min(lanes - 1);
        v.head_m = v.head_m.min(run.net.edge_length_m[edge.index()]);
        run.vehicles.push(v);
        Ok(())
    }

    fn retire_vehicles(&mut self, vehicles: &[VehicleId]) -> usize {
        let Some(run) = self.run.as_mut() else {
            return 0;
        };
        vehicles.iter().filter(|&id| run.own_random.remove(id).is_some()).count()
    }

    fn rear_vehicles(&self, edges: &[EdgeId]) -> Vec<LaneTail> {
        let Ok(run) = self.run() else {
            return Vec::new();
        };
        let wanted: BTreeSet<EdgeId> = edges.iter().copied().collect();
        let mut rear: BTreeMap<(EdgeId, u8), &Vehicle> = BTreeMap::new();
        for v in &run.vehicles {
            let key = (v.current_edge(), v.lane);
            if !wanted.contains(&key.0) {
                continue;
            }
            rear.entry(key)
                .and_modify(|r| {
                    if (v.rear_m(), v.id) < (r.rear_m(), r.id) {
                        *r = v;
                    }
                })
                .or_insert(v);
        }
        rear.into_iter()
            .map(|((edge, lane), v)| LaneTail {
                edge,
                lane,
                rear_position_m: v.rear_m(),
                speed_mps: v.speed_mps,
            })
            .collect()
    }

    fn set_border_tails(&mut self, edges: &[EdgeId], tails: &[LaneTail]) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        run.tails.retain(|(e, _), _| !edges.contains(e));
        for t in tails {
            run.tails.insert((t.edge, t.lane), *t);
        }
    }

    fn active_vehicle_count(&self) -> usize {
        self.vehicles().len()
    }

    fn pending_route_count(&self) -> usize {
        self.run.as_ref().map_or(0, |r| r.pending.len())
    }
}

/// Nodes inside any of `windows`; `None` when there are no windows.
fn window_nodes(net: &RoadNetwork, windows: &[dt_core::BoundingBox]) -> Option<BTreeSet<NodeId>> {
    if windows.is_empty() {
        return None;
    }
    Some(windows.iter().flat_map(|b| net.nodes_in_box(b)).collect())
}

impl Run {
    fn dt(&self) -> f32 {
        1.0 / self.setup.steps_per_second.max(1) as f32
    }

    fn reported_lane(&self, v: &Vehicle) -> u8 {
        if self.setup.drive_on_left {
            let lanes = self.net.edge_lanes[v.current_edge().index()].max(1);
            lanes - 1 - v.lane.min(lanes - 1)
        } else {
            v.lane
        }
    }

    fn random_counts(&self) -> VehicleQuotas {
        let mut c = VehicleQuotas::ZERO;
        for &class in self.own_random.values() {
            *c.get_mut(class) += 1;
        }
        c
    }

    fn next_id(&mut self) -> VehicleId {
        let id = VehicleId::compose(self.setup.worker, self.next_seq);
        self.next_seq += 1;
        id
    }

    /// Whether a vehicle of `length` fits with its head at `head_m`.
    fn has_room(&self, edge: EdgeId, lane: u8, head_m: f32, length: f32) -> bool {
        const CLEARANCE_M: f32 = 2.0;
        let lo = head_m - length - CLEARANCE_M;
        let hi = head_m + CLEARANCE_M;
        !self
            .vehicles
            .iter()
            .any(|v| v.current_edge() == edge && v.lane == lane && v.rear_m() < hi && v.head_m > lo)
    }

    // ── Creation ──────────────────────────────────────────────────────────

    fn release_external(&mut self, step: Step, out: &mut StepOutcome) -> MobilityResult<()> {
        while self.pending.front().is_some_and(|r| r.start <= step) {
            let Some(route) = self.pending.pop_front() else { break };
            let Some(edge) = route.first_edge() else { continue };
            let length = route.class.length_m();
            let head = length.min(self.net.edge_length_m[edge.index()]);
            let owned = self.setup.owns(edge);
            if owned && !self.has_room(edge, 0, head, length) {
                // Entry blocked; retry next step.
                self.pending.push_front(route);
                break;
            }
            let id = self.next_id();
            let v = Vehicle {
                id,
                class: route.class,
                driver: route.driver,
                legs: route.legs.clone(),
                leg: 0,
                lane: 0,
                head_m: head,
                speed_mps: 0.0,
                created_at: step,
                external: true,
                foreground: route.foreground,
                dwell_steps: 0,
                dwelled: false,
                stuck_steps: 0,
            };
            if !owned {
                out.departed.push(v.into_border());
                out.created += 1;
                continue;
            }
            out.new_routes.push(NewRoute {
                vehicle: id,
                class: route.class,
                edges: route.legs.iter().map(|l| l.edge).collect(),
            });
            self.vehicles.push(v);
            out.created += 1;
        }
        Ok(())
    }

    fn create_random(&mut self, permits: &CreationPermits, out: &mut StepOutcome) -> MobilityResult<()> {
        let counts = self.random_counts();
        for class in VehicleClass::ALL {
            if !permits.allows(class) {
                continue;
            }
            let deficit = self.setup.quotas.get(class).saturating_sub(counts.get(class));
            for _ in 0..deficit.min(MAX_SPAWN_PER_STEP) {
                if self.spawn_random(class, false, Some(&mut *out))?.is_some() {
                    out.created += 1;
                }
            }
        }
        Ok(())
    }

    /// Try to create one random vehicle.  `anywhere` places it at a random
    /// point of its first edge instead of the edge start.
    fn spawn_random(
        &mut self,
        class: VehicleClass,
        anywhere: bool,
        out: Option<&mut StepOutcome>,
    ) -> MobilityResult<Option<VehicleId>> {
        let Some(&edge) = self.rng.choose(&self.source_edges) else {
            return Ok(None);
        };
        let Some(&dest) = self.rng.choose(&self.destinations) else {
            return Ok(None);
        };
        let start = self.net.edge_to[edge.index()];
        let tail = if start == dest {
            Vec::new()
        } else {
            match self.router.route(&self.net, start, dest, class) {
                Ok(route) => route.edges,
                Err(SpatialError::NoRoute { .. }) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        };

        let transit = matches!(class, VehicleClass::Bus | VehicleClass::Tram);
        let legs: Vec<RouteLeg> = std::iter::once(edge)
            .chain(tail)
            .enumerate()
            .map(|(i, e)| RouteLeg {
                edge: e,
                stopover_secs: if transit && i % TRANSIT_STOP_EVERY == TRANSIT_STOP_EVERY - 1 {
                    TRANSIT_STOPOVER_SECS
                } else {
                    0.0
                },
            })
            .collect();

        let length = class.length_m();
        let edge_len = self.net.edge_length_m[edge.index()];
        let lanes = self.net.edge_lanes[edge.index()].max(1);
        let lane = self.rng.gen_range(0..lanes);
        let head = if anywhere && edge_len > length {
            self.rng.gen_range(length..=edge_len)
        } else {
            length.min(edge_len)
        };
        if !self.has_room(edge, lane, head, length) {
            return Ok(None);
        }

        let (profiles, weights) = &self.profiles;
        let driver = self
            .rng
            .weighted_index(weights)
            .map_or(DriverProfile::Normal, |i| profiles[i]);
        let id = self.next_id();
        if let Some(out) = out {
            out.new_routes.push(NewRoute { vehicle: id, class, edges: legs.iter().map(|l| l.edge).collect() });
        }
        self.own_random.insert(id, class);
        self.vehicles.push(Vehicle {
            id,
            class,
            driver,
            legs,
            leg: 0,
            lane,
            head_m: head,
            speed_mps: 0.0,
            created_at: self.now,
            external: false,
            foreground: false,
            dwell_steps: 0,
            dwelled: false,
            stuck_steps: 0,
        });
        Ok(Some(id))
    }

    // ── Speeds ────────────────────────────────────────────────────────────

    fn plan_speeds(&self, index: &LaneIndex) -> Vec<f32> {
        let ctx = SpeedContext {
            net: &self.net,
            setup: &self.setup,
            vehicles: &self.vehicles,
            index,
            tails: &self.tails,
            lights: &self.lights,
            dt: self.dt(),
        };

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            (0..self.vehicles.len()).into_par_iter().map(|i| ctx.target_speed(i)).collect()
        }

        #[cfg(not(feature = "parallel"))]
        {
            (0..self.vehicles.len()).map(|i| ctx.target_speed(i)).collect()
        }
    }

    // ── Movement ──────────────────────────────────────────────────────────

    fn move_vehicles(&mut self, step: Step, speeds: &[f32], out: &mut StepOutcome) {
        let dt = self.dt();
        let sps = self.setup.steps_per_second.max(1) as f32;
        let mut fates = Vec::with_capacity(self.vehicles.len());

        for (v, &speed) in self.vehicles.iter_mut().zip(speeds) {
            if v.dwell_steps > 0 {
                v.dwell_steps -= 1;
                v.speed_mps = 0.0;
                if v.dwell_steps == 0 {
                    v.dwelled = true;
                }
                fates.push(Fate::Stays);
                continue;
            }
            v.speed_mps = speed;
            v.head_m += speed * dt;
            if speed < STOPPED_MPS {
                v.stuck_steps += 1;
            } else {
                v.stuck_steps = 0;
            }

            let fate = loop {
                let edge = v.current_edge();
                let len = self.net.edge_length_m[edge.index()];
                if v.owes_stopover() && v.head_m >= len - STOP_LINE_M - 1e-3 {
                    let secs = v.legs[v.leg as usize].stopover_secs;
                    v.head_m = v.head_m.min(len);
                    v.speed_mps = 0.0;
                    v.dwell_steps = ((secs * sps).ceil() as u32).max(1);
                    break Fate::Stays;
                }
                if v.head_m < len {
                    break Fate::Stays;
                }
                if v.on_last_leg() {
                    break Fate::Finished;
                }
                let overshoot = v.head_m - len;
                v.leg += 1;
                v.dwelled = false;
                v.head_m = overshoot;
                let next = v.current_edge();
                let lanes = self.net.edge_lanes[next.index()].max(1);
                v.lane = v.lane.min(lanes - 1);
                if !self.setup.owns(next) {
                    break Fate::Departed;
                }
            };
            fates.push(fate);
        }

        let vehicles = std::mem::take(&mut self.vehicles);
        self.vehicles.reserve(vehicles.len());
        for (v, fate) in vehicles.into_iter().zip(fates) {
            match fate {
                Fate::Stays => self.vehicles.push(v),
                Fate::Finished => {
                    self.own_random.remove(&v.id);
                    out.finished.push(FinishedVehicle {
                        id: v.id,
                        class: v.class,
                        created_at: v.created_at,
                        finished_at: step,
                    });
                }
                Fate::Departed => out.departed.push(v.into_border()),
            }
        }
    }

    /// Give long-stationary vehicles a fresh, jittered route from the end of
    /// their current edge.
    fn reroute_stuck(&mut self, step: Step, out: &mut StepOutcome) -> MobilityResult<()> {
        if !self.setup.reroute {
            return Ok(());
        }
        let limit = (REROUTE_AFTER_SECS * self.setup.steps_per_second.max(1) as f32) as u32;
        for v in self.vehicles.iter_mut() {
            if v.stuck_steps < limit || v.on_last_leg() || v.dwell_steps > 0 {
                continue;
            }
            v.stuck_steps = 0;
            let from = self.net.edge_to[v.current_edge().index()];
            let Some(last) = v.legs.last() else { continue };
            let dest = self.net.edge_to[last.edge.index()];
            let router = RandomAStarRouter::new(self.setup.seed ^ v.id.0 ^ step.0);
            let route = match router.route(&self.net, from, dest, v.class) {
                Ok(r) => r,
                Err(SpatialError::NoRoute { .. }) => continue,
                Err(e) => return Err(e.into()),
            };
            let keep = v.leg as usize + 1;
            if v.legs[keep..].iter().map(|l| l.edge).eq(route.edges.iter().copied()) {
                continue;
            }
            v.legs.truncate(keep);
            v.legs.extend(route.edges.iter().map(|&e| RouteLeg::through(e)));
            out.new_routes.push(NewRoute {
                vehicle: v.id,
                class: v.class,
                edges: v.legs.iter().map(|l| l.edge).collect(),
            });
        }
        Ok(())
    }
}

/// Read-only view used to pick speeds.
struct SpeedContext<'a> {
    net: &'a RoadNetwork,
    setup: &'a LocalSetup,
    vehicles: &'a [Vehicle],
    index: &'a LaneIndex,
    tails: &'a LaneMap<LaneTail>,
    lights: &'a LightController,
    dt: f32,
}

impl SpeedContext<'_> {
    fn target_speed(&self, i: usize) -> f32 {
        let v = &self.vehicles[i];
        if v.dwell_steps > 0 {
            return 0.0;
        }
        let edge = v.current_edge();
        let len = self.net.edge_length_m[edge.index()];
        let desired = (self.net.edge_speed_mps(edge) * v.driver.speed_factor()).min(class_max_speed_mps(v.class));
        let min_gap = v.driver.min_gap_m();

        let gap = match self.index.leader_of(self.vehicles, i) {
            Some(l) => self.vehicles[l].rear_m() - v.head_m - min_gap,
            None => self.gap_to_edge_end(v, len, min_gap),
        };
        let gap = gap.min(self.gap_to_dwelling_tram(v, edge, min_gap));

        let reachable = gap.max(0.0) / self.dt;
        (v.speed_mps + class_accel_mps2(v.class) * self.dt)
            .min(desired)
            .min(reachable)
            .max(0.0)
    }

    /// Free road ahead of a vehicle leading its lane.
    fn gap_to_edge_end(&self, v: &Vehicle, len: f32, min_gap: f32) -> f32 {
        let to_end = len - v.head_m;
        if v.owes_stopover() || self.lights.is_red(self.net, v.current_edge()) {
            return to_end - STOP_LINE_M;
        }
        let Some(next) = v.next_edge() else {
            return f32::INFINITY;
        };
        if to_end > self.setup.look_ahead_distance_m {
            return f32::INFINITY;
        }
        let lanes = self.net.edge_lanes[next.index()].max(1);
        let lane = v.lane.min(lanes - 1);
        let rear = if self.setup.owns(next) {
            self.index.rearmost(next, lane).map(|r| self.vehicles[r].rear_m())
        } else {
            self.tails.get(&(next, lane)).map(|t| t.rear_position_m)
        };
        rear.map_or(f32::INFINITY, |r| to_end + r - min_gap)
    }

    /// With the tram stop rule, traffic behind a tram standing at a stop
    /// waits in every lane of the edge.
    fn gap_to_dwelling_tram(&self, v: &Vehicle, edge: EdgeId, min_gap: f32) -> f32 {
        if !self.setup.tram_stop_rule || v.class == VehicleClass::Tram {
            return f32::INFINITY;
        }
        let lanes = self.net.edge_lanes[edge.index()].max(1);
        (0..lanes)
            .flat_map(|l| self.index.lane(edge, l).iter())
            .map(|&t| &self.vehicles[t])
            .filter(|t| t.class == VehicleClass::Tram && t.dwell_steps > 0 && t.head_m > v.head_m)
            .map(|t| t.rear_m() - v.head_m - min_gap)
            .fold(f32::INFINITY, f32::min)
    }
}
