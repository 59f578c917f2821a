//! The worker-side driver.
//!
//! `WorkerNode` wraps one [`LocalSimulation`] and runs it under either
//! protocol.  Per step the order is always the same:
//!
//! 1. **Share** step `s`: flush the vehicles that left during step `s - 1`
//!    (plus lane tails) to every connected fellow, and adopt the fellows'
//!    payloads for `s`, early ones from the [`StepCache`].
//! 2. **Simulate** step `s` once every fellow is synced: in BSP on the
//!    server's `Simulate`, in PSP immediately.  Vehicles leaving during the
//!    step are queued for the share of `s + 1`.
//!
//! Like [`Coordinator`](crate::Coordinator) it performs no I/O.

use std::sync::Arc;

use dt_core::{Step, SyncMode, WorkerIndex};
use dt_mobility::{LocalSetup, LocalSimulation, StepOutcome};
use dt_partition::{BorderTopology, Ownership};
use dt_proto::{
    CreationPermits, FinishedVehicle, Message, SetupPayload, TrafficReport, WorkerMeta, WwTraffic,
};
use dt_spatial::RoadNetwork;
use tracing::{debug, info, trace, warn};

use crate::border::BorderExchange;
use crate::cache::{Admit, StepCache};
use crate::outbound::Outbound;
use crate::{CoordError, CoordResult};

/// Steps a PSP worker runs per call before yielding with [`Outbound::Wake`],
/// so pause and stop get a chance to arrive.
pub const STEP_BURST: u32 = 64;

/// State of one run, rebuilt by every `Setup`.
struct WorkerRun {
    mode: SyncMode,
    workers: Vec<WorkerMeta>,
    exchange: BorderExchange,
    cache: StepCache,
    /// Next step to share and simulate.
    step: Step,
    /// Step whose exchange has started.
    sharing: Option<Step>,
    max_steps: Step,
    report_interval: u64,
    /// BSP: the server is waiting for `SharedWithNeighbor` for `sharing`.
    reply_due: bool,
    /// BSP: last `Simulate` request served and its report.
    last_request: Option<(u64, TrafficReport)>,
    /// Finished since the last report sent.
    unreported: Vec<FinishedVehicle>,
    // PSP
    running: bool,
    paused: bool,
    completed: bool,
}

pub struct WorkerNode<S: LocalSimulation> {
    name: String,
    address: String,
    port: u16,
    sim: S,
    /// Kept across runs for setups that reuse the road graph.
    network: Option<Arc<RoadNetwork>>,
    run: Option<WorkerRun>,
    killed: bool,
}

impl<S: LocalSimulation> WorkerNode<S> {
    /// `address` and `port` are where fellows reach this worker.
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16, sim: S) -> Self {
        WorkerNode {
            name: name.into(),
            address: address.into(),
            port,
            sim,
            network: None,
            run: None,
            killed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sim(&self) -> &S {
        &self.sim
    }

    pub fn is_killed(&self) -> bool {
        self.killed
    }

    /// Index assigned by the last setup.
    pub fn index(&self) -> Option<WorkerIndex> {
        self.run.as_ref().map(|r| r.exchange.me())
    }

    /// Address card of any worker of the current run.
    pub fn fellow_meta(&self, index: WorkerIndex) -> Option<&WorkerMeta> {
        self.run.as_ref()?.workers.iter().find(|w| w.index == index)
    }

    /// Connected fellows of the current run.
    pub fn fellows(&self) -> Vec<WorkerIndex> {
        self.run.as_ref().map(|r| r.exchange.fellows().map(|f| f.meta.index).collect()).unwrap_or_default()
    }

    /// Next step this worker will simulate.
    pub fn current_step(&self) -> Option<Step> {
        self.run.as_ref().map(|r| r.step)
    }

    /// PSP run reached its bound.
    pub fn is_complete(&self) -> bool {
        self.run.as_ref().is_some_and(|r| r.completed)
    }

    pub fn join_message(&self) -> Message {
        Message::Join { name: self.name.clone(), address: self.address.clone(), port: self.port }
    }

    /// Dispatch one message from the server or a fellow.
    pub fn handle(&mut self, msg: Message) -> Vec<Outbound> {
        let kind = msg.kind();
        let result = match msg {
            Message::Setup(payload) => self.on_setup(*payload),
            Message::ShareTraffic { step } => self.on_share(step),
            Message::Simulate { permits, request_id } => self.on_simulate(permits, request_id),
            Message::WwTraffic(traffic) => self.on_traffic(*traffic),
            Message::VehiclesRetired { vehicles } => {
                let retired = self.sim.retire_vehicles(&vehicles);
                trace!(worker = %self.name, retired, "own vehicles finished elsewhere");
                Ok(Vec::new())
            }
            Message::ServerlessStart { step, max_steps } => self.on_serverless_run(Some(step), max_steps),
            Message::ServerlessResume { max_steps, .. } => self.on_serverless_run(None, max_steps),
            Message::ServerlessPause { step } => {
                if let Some(run) = self.run.as_mut() {
                    run.paused = true;
                }
                debug!(worker = %self.name, %step, "paused");
                Ok(Vec::new())
            }
            Message::ServerlessStop { step } => {
                if let Some(run) = self.run.as_mut() {
                    run.running = false;
                }
                info!(worker = %self.name, %step, "run stopped");
                Ok(Vec::new())
            }
            Message::KillWorker { is_shared_process_space } => {
                info!(worker = %self.name, shared = is_shared_process_space, "killed");
                self.killed = true;
                self.run = None;
                Ok(Vec::new())
            }
            other => {
                warn!(worker = %self.name, kind = other.kind(), "message not meant for a worker");
                Ok(Vec::new())
            }
        };
        result.unwrap_or_else(|e| {
            warn!(worker = %self.name, kind, error = %e, "message failed");
            Vec::new()
        })
    }

    /// Continue a PSP run after yielding with [`Outbound::Wake`].
    pub fn wake(&mut self) -> Vec<Outbound> {
        self.pump().unwrap_or_else(|e| {
            warn!(worker = %self.name, error = %e, "step loop failed");
            Vec::new()
        })
    }

    // ── Setup ─────────────────────────────────────────────────────────────

    fn on_setup(&mut self, p: SetupPayload) -> CoordResult<Vec<Outbound>> {
        self.run = None;
        let network = match RoadNetwork::from_source(&p.road_graph)? {
            Some(net) => Arc::new(net),
            None => self.network.clone().ok_or(CoordError::NoRoadGraph)?,
        };
        let me = p.worker(&self.name).ok_or_else(|| CoordError::UnknownWorker(self.name.clone()))?.index;
        let ownership = Ownership::from_node_owners(&network, p.node_owner.clone())?;
        let topology = BorderTopology::compute(&network, &ownership, me);

        let mut owned_edges = vec![false; network.edge_count()];
        for e in ownership.owned_edges(&network, me) {
            owned_edges[e.index()] = true;
        }
        let expected = p.quotas.total() + p.external_routes.len() as u64;
        self.sim.configure(LocalSetup {
            network: Arc::clone(&network),
            worker: me,
            owned_edges,
            quotas: p.quotas,
            external_routes: p.external_routes,
            driver_profiles: p.driver_profiles,
            steps_per_second: p.steps_per_second,
            start_step: p.start_step,
            look_ahead_distance_m: p.look_ahead_distance_m,
            routing_algorithm: p.routing_algorithm,
            traffic_light_timing: p.traffic_light_timing,
            light_nodes_to_add: p.light_nodes_to_add,
            light_nodes_to_remove: p.light_nodes_to_remove,
            reroute: p.reroute,
            tram_stop_rule: p.tram_stop_rule,
            drive_on_left: p.drive_on_left,
            windows: p.windows,
            report_vehicles: p.report_vehicles,
            seed: p.seed,
        })?;

        let mut out = vec![Outbound::ToServer(Message::SetupCreatingVehicles {
            worker_name: self.name.clone(),
            count: expected,
        })];
        let created = self.sim.create_initial_vehicles()?;
        let exchange = BorderExchange::new(self.name.clone(), topology, &p.workers);
        let num_fellows = exchange.fellow_count();
        info!(worker = %self.name, index = me.0, fellows = num_fellows, created,
              new_environment = p.is_new_environment, "set up");

        self.network = Some(network);
        self.run = Some(WorkerRun {
            mode: p.sync_mode,
            workers: p.workers,
            exchange,
            cache: StepCache::new(),
            step: p.start_step,
            sharing: None,
            max_steps: p.max_steps,
            report_interval: p.report_interval_steps.max(1),
            reply_due: false,
            last_request: None,
            unreported: Vec::new(),
            running: false,
            paused: false,
            completed: false,
        });
        out.push(Outbound::ToServer(Message::SetupDone { worker_name: self.name.clone(), num_fellows }));
        Ok(out)
    }

    // ── Border exchange ───────────────────────────────────────────────────

    /// Open the exchange for `step`: send to every fellow, then adopt
    /// payloads that arrived early.
    fn begin_exchange(&mut self, step: Step) -> CoordResult<Vec<Outbound>> {
        let run = self.run.as_mut().ok_or(CoordError::NotSetUp)?;
        run.sharing = Some(step);
        let dropped = run.cache.drop_before(step);
        if dropped > 0 {
            debug!(worker = %self.name, %step, dropped, "stale cached payloads dropped");
        }
        let out = run
            .exchange
            .flush(step, &self.sim)?
            .into_iter()
            .map(|(fellow, traffic)| Outbound::ToFellow { fellow, msg: Message::WwTraffic(Box::new(traffic)) })
            .collect();
        for traffic in run.cache.take(step) {
            if let Err(e) = run.exchange.receive(&mut self.sim, traffic) {
                warn!(worker = %self.name, %step, error = %e, "cached payload rejected");
            }
        }
        Ok(out)
    }

    fn on_traffic(&mut self, traffic: WwTraffic) -> CoordResult<Vec<Outbound>> {
        let run = self.run.as_mut().ok_or(CoordError::NotSetUp)?;
        let (sender, step) = (traffic.sender_name.clone(), traffic.step);
        match run.cache.admit(run.sharing, traffic) {
            Admit::Apply(traffic) => {
                run.exchange.receive(&mut self.sim, traffic)?;
            }
            Admit::Deferred => {
                trace!(worker = %self.name, %sender, %step, "payload cached");
                return Ok(Vec::new());
            }
            Admit::Stale => {
                debug!(worker = %self.name, %sender, %step, "stale payload dropped");
                return Ok(Vec::new());
            }
        }
        let mode = run.mode;
        match mode {
            SyncMode::Bsp => Ok(self.reply_if_synced()),
            SyncMode::Psp => self.pump(),
        }
    }

    // ── BSP ───────────────────────────────────────────────────────────────

    fn on_share(&mut self, step: Step) -> CoordResult<Vec<Outbound>> {
        let run = self.run.as_mut().ok_or(CoordError::NotSetUp)?;
        let mut out = Vec::new();
        let sharing = run.sharing;
        match sharing {
            Some(s) if s == step => debug!(worker = %self.name, %step, "share re-requested"),
            Some(s) if s > step => {
                debug!(worker = %self.name, %step, current = %s, "stale share request");
                return Ok(out);
            }
            _ => {
                run.step = step;
                out = self.begin_exchange(step)?;
            }
        }
        if let Some(run) = self.run.as_mut() {
            run.reply_due = true;
        }
        out.extend(self.reply_if_synced());
        Ok(out)
    }

    fn reply_if_synced(&mut self) -> Vec<Outbound> {
        let Some(run) = self.run.as_mut() else { return Vec::new() };
        let Some(step) = run.sharing else { return Vec::new() };
        if !run.reply_due || !run.exchange.all_synced(step) {
            return Vec::new();
        }
        run.reply_due = false;
        debug!(worker = %self.name, %step, "shared with all fellows");
        vec![Outbound::ToServer(Message::SharedWithNeighbor { worker_name: self.name.clone(), step })]
    }

    fn on_simulate(&mut self, permits: CreationPermits, request_id: u64) -> CoordResult<Vec<Outbound>> {
        let run = self.run.as_mut().ok_or(CoordError::NotSetUp)?;
        if let Some((id, report)) = &run.last_request {
            if *id == request_id {
                debug!(worker = %self.name, request_id, "simulate repeated, report resent");
                return Ok(vec![Outbound::ToServer(Message::TrafficReport(Box::new(report.clone())))]);
            }
        }
        let step = run.sharing.ok_or(CoordError::NotSetUp)?;
        if !run.exchange.all_synced(step) {
            return Err(CoordError::InvalidCommand { command: "simulate", phase: "sharing" });
        }
        let mut report = self.simulate(step, &permits)?;
        if let Some(run) = self.run.as_mut() {
            report.finished = std::mem::take(&mut run.unreported);
            run.step = step.next();
            run.last_request = Some((request_id, report.clone()));
        }
        Ok(vec![Outbound::ToServer(Message::TrafficReport(Box::new(report)))])
    }

    /// Run one local step and queue whatever left the area.  Finished
    /// vehicles are held back until a report goes out.
    fn simulate(&mut self, step: Step, permits: &CreationPermits) -> CoordResult<TrafficReport> {
        let run = self.run.as_mut().ok_or(CoordError::NotSetUp)?;
        let mut outcome = self.sim.step(step, permits)?;
        let departed = std::mem::take(&mut outcome.departed);
        run.unreported.append(&mut outcome.finished);
        let departed_count = departed.len();
        let queued = run.exchange.queue_departures(departed);
        let report = build_report(&self.name, step, outcome, &self.sim, run.exchange.pending_vehicles());
        trace!(worker = %self.name, %step, departed = departed_count, active = report.active_vehicles, "step simulated");
        queued?;
        Ok(report)
    }

    // ── PSP ───────────────────────────────────────────────────────────────

    fn on_serverless_run(&mut self, start: Option<Step>, max_steps: Step) -> CoordResult<Vec<Outbound>> {
        let run = self.run.as_mut().ok_or(CoordError::NotSetUp)?;
        if let Some(step) = start {
            run.step = step;
            run.sharing = None;
        }
        if max_steps > run.max_steps || start.is_some() {
            run.max_steps = max_steps;
            run.completed = run.step > max_steps;
        }
        run.running = true;
        run.paused = false;
        info!(worker = %self.name, step = %run.step, max = %run.max_steps, "serverless run");
        self.pump()
    }

    /// Advance as far as fellow payloads allow, at most [`STEP_BURST`] steps.
    fn pump(&mut self) -> CoordResult<Vec<Outbound>> {
        let mut out = Vec::new();
        let mut steps = 0;
        loop {
            let Some(run) = self.run.as_ref() else { break };
            if run.mode != SyncMode::Psp || !run.running || run.paused || run.completed {
                break;
            }
            if steps >= STEP_BURST {
                out.push(Outbound::Wake);
                break;
            }
            let step = run.step;
            if run.sharing != Some(step) {
                out.extend(self.begin_exchange(step)?);
            }
            let Some(run) = self.run.as_ref() else { break };
            if !run.exchange.all_synced(step) {
                break;
            }

            let mut report = self.simulate(step, &CreationPermits::ALL)?;
            steps += 1;
            let Some(run) = self.run.as_mut() else { break };
            run.step = step.next();
            if step.0 % run.report_interval == 0 || step >= run.max_steps {
                report.finished = std::mem::take(&mut run.unreported);
                out.push(Outbound::ToServer(Message::TrafficReport(Box::new(report.clone()))));
            }
            if step >= run.max_steps {
                run.completed = true;
                info!(worker = %self.name, %step, active = report.active_vehicles, "reached step bound");
                out.push(Outbound::ToServer(Message::ServerlessComplete {
                    worker_name: self.name.clone(),
                    step,
                    vehicle_count: report.active_vehicles,
                }));
            }
        }
        Ok(out)
    }
}

fn build_report<S: LocalSimulation>(name: &str, step: Step, outcome: StepOutcome, sim: &S, in_flight: usize) -> TrafficReport {
    TrafficReport {
        worker_name: name.to_string(),
        step,
        vehicles: outcome.snapshots,
        lights: outcome.lights,
        new_routes: outcome.new_routes,
        finished: outcome.finished,
        lane_directions: outcome.lane_directions,
        counts: outcome.counts,
        // Vehicles queued for a fellow are still this worker's until flushed.
        active_vehicles: (sim.active_vehicle_count() + in_flight) as u64,
        pending_routes: sim.pending_route_count() as u64,
    }
}
