//! The server-side driver.
//!
//! `Coordinator` owns the registry, the partition and the report aggregator,
//! and turns every inbound message or operator command into the messages to
//! send next.  It performs no I/O; see [`Outbound`].
//!
//! # BSP step cycle
//!
//! ```text
//! begin_step(s)   all workers ──ShareRequested──► SharingStarted
//!                 broadcast ShareTraffic{s}
//! SharedWithNeighbor × n   ──► all Shared ──► broadcast Simulate{permits, id}
//! TrafficReport{s} × n     ──► VehiclesRetired to creators, aggregate
//!                          ──► observer ──► terminate?
//!                                                          │ no
//!                                                          ▼
//!                                                   begin_step(s + 1)
//! ```
//!
//! In PSP mode the server only starts, pauses, resumes and stops the run;
//! reports are aggregated on their cadence and the step bound is extended by
//! `ServerlessResume` when the termination rules ask for it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dt_core::{RoadGraphSource, SimConfig, SimRng, Step, SyncMode, VehicleId, WorkerIndex};
use dt_partition::{assign_quotas, partition};
use dt_proto::{CreationPermits, Message, SetupPayload, TrafficReport};
use dt_spatial::RoadNetwork;
use tracing::{debug, info, trace, warn};

use crate::aggregator::{AggregatedStep, ReportAggregator, Termination, TerminationPolicy};
use crate::observer::{ReportObserver, RunSummary};
use crate::outbound::Outbound;
use crate::registry::{Admission, WorkerRegistry};
use crate::state::{WorkerEvent, WorkerState};
use crate::{CoordError, CoordResult};

/// Run lifecycle as seen by the server.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for workers.
    #[default]
    Idle,
    /// `Setup` sent, waiting for every `SetupDone`.
    SettingUp,
    Ready,
    Running,
    Paused,
    /// Last run ended; a new setup may follow.
    Stopped,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle      => "idle",
            Phase::SettingUp => "setting_up",
            Phase::Ready     => "ready",
            Phase::Running   => "running",
            Phase::Paused    => "paused",
            Phase::Stopped   => "stopped",
        }
    }

    fn is_active(self) -> bool {
        matches!(self, Phase::Running | Phase::Paused)
    }
}

/// Operator commands.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ServerCommand {
    Setup,
    Start,
    Pause,
    Resume,
    Stop,
    /// Terminate every worker.  `shared_process` is set for workers hosted
    /// as threads of the server process.
    KillAll { shared_process: bool },
}

impl ServerCommand {
    fn as_str(self) -> &'static str {
        match self {
            ServerCommand::Setup       => "setup",
            ServerCommand::Start       => "start",
            ServerCommand::Pause       => "pause",
            ServerCommand::Resume      => "resume",
            ServerCommand::Stop        => "stop",
            ServerCommand::KillAll { .. } => "kill_all",
        }
    }
}

pub struct Coordinator {
    config: SimConfig,
    registry: WorkerRegistry,
    /// Road graph of the last setup, reused when the config names none.
    network: Option<Arc<RoadNetwork>>,
    phase: Phase,
    aggregator: ReportAggregator,
    policy: TerminationPolicy,
    /// BSP: step in progress.  PSP: last aggregated step.
    step: Step,
    request_id: u64,
    /// `Simulate` already broadcast for `step`.
    simulate_sent: bool,
    permits: CreationPermits,
    /// PSP workers that reached the step bound.
    completed: BTreeSet<String>,
    outcome: Option<RunSummary>,
}

impl Coordinator {
    pub fn new(config: SimConfig) -> CoordResult<Self> {
        config.validate()?;
        let policy = Self::policy_for(&config);
        Ok(Coordinator {
            registry: WorkerRegistry::new(config.num_workers),
            aggregator: ReportAggregator::new(config.num_workers),
            step: config.start_step,
            config,
            network: None,
            phase: Phase::Idle,
            policy,
            request_id: 0,
            simulate_sent: false,
            permits: CreationPermits::NONE,
            completed: BTreeSet::new(),
            outcome: None,
        })
    }

    fn policy_for(config: &SimConfig) -> TerminationPolicy {
        let margin = match config.sync_mode {
            SyncMode::Bsp => 1,
            SyncMode::Psp => config.report_interval_steps,
        };
        TerminationPolicy::new(config).with_extend_margin(margin)
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn step(&self) -> Step {
        self.step
    }

    /// Current step bound, including extensions.
    pub fn max_steps(&self) -> Step {
        self.policy.max_steps()
    }

    pub fn network(&self) -> Option<&Arc<RoadNetwork>> {
        self.network.as_ref()
    }

    pub fn aggregator(&self) -> &ReportAggregator {
        &self.aggregator
    }

    /// Summary of the last finished run.
    pub fn outcome(&self) -> Option<RunSummary> {
        self.outcome
    }

    // ── Inbound messages ──────────────────────────────────────────────────

    /// Dispatch one message from a worker.  Messages that do not fit the
    /// current phase or step are logged and discarded.
    pub fn handle(&mut self, msg: Message, observer: &mut dyn ReportObserver) -> Vec<Outbound> {
        let kind = msg.kind();
        let result = match msg {
            Message::Join { name, address, port } => Ok(self.on_join(name, &address, port)),
            Message::SetupCreatingVehicles { worker_name, count } => {
                debug!(worker = %worker_name, count, "worker creating vehicles");
                Ok(Vec::new())
            }
            Message::SetupDone { worker_name, num_fellows } => self.on_setup_done(&worker_name, num_fellows),
            Message::SharedWithNeighbor { worker_name, step } => self.on_shared(&worker_name, step),
            Message::TrafficReport(report) => self.on_report(*report, observer),
            Message::ServerlessComplete { worker_name, step, vehicle_count } => {
                self.on_complete(&worker_name, step, vehicle_count, observer)
            }
            other => {
                warn!(kind = other.kind(), "message not meant for the server");
                Ok(Vec::new())
            }
        };
        result.unwrap_or_else(|e| {
            warn!(kind, error = %e, "message discarded");
            Vec::new()
        })
    }

    fn on_join(&mut self, name: String, address: &str, port: u16) -> Vec<Outbound> {
        match self.registry.register(&name, address, port) {
            Admission::Accepted(_) => Vec::new(),
            Admission::Rejected(_) => {
                vec![Outbound::Refused { name, msg: Message::KillWorker { is_shared_process_space: false } }]
            }
        }
    }

    fn on_setup_done(&mut self, name: &str, num_fellows: usize) -> CoordResult<Vec<Outbound>> {
        if self.phase != Phase::SettingUp {
            debug!(worker = name, phase = self.phase.as_str(), "setup done outside setup, discarded");
            return Ok(Vec::new());
        }
        self.registry.transition(name, WorkerEvent::SetupDone)?;
        info!(worker = name, fellows = num_fellows, "worker set up");
        if self.registry.all_at(WorkerState::Ready) {
            self.phase = Phase::Ready;
            info!(workers = self.registry.len(), "all workers ready");
        }
        Ok(Vec::new())
    }

    fn on_shared(&mut self, name: &str, step: Step) -> CoordResult<Vec<Outbound>> {
        if self.phase != Phase::Running || self.config.sync_mode != SyncMode::Bsp {
            debug!(worker = name, %step, phase = self.phase.as_str(), "share ack discarded");
            return Ok(Vec::new());
        }
        if step != self.step {
            debug!(worker = name, %step, current = %self.step, "stale share ack discarded");
            return Ok(Vec::new());
        }
        if self.registry.state(name) == Some(WorkerState::Shared) {
            debug!(worker = name, %step, "duplicate share ack");
            return Ok(Vec::new());
        }
        self.registry.transition(name, WorkerEvent::SharedReported)?;
        if !self.simulate_sent && self.registry.all_at(WorkerState::Shared) {
            return Ok(self.dispatch_simulate());
        }
        Ok(Vec::new())
    }

    fn on_report(&mut self, report: TrafficReport, observer: &mut dyn ReportObserver) -> CoordResult<Vec<Outbound>> {
        let name = report.worker_name.clone();
        match self.config.sync_mode {
            SyncMode::Bsp => {
                if self.phase != Phase::Running || report.step != self.step {
                    debug!(worker = %name, step = %report.step, current = %self.step,
                           phase = self.phase.as_str(), "report discarded");
                    return Ok(Vec::new());
                }
                self.registry.transition(&name, WorkerEvent::StepReported)?;
            }
            SyncMode::Psp => {
                // The server is only a sink here; reports stay useful while paused.
                if !self.phase.is_active() {
                    debug!(worker = %name, step = %report.step, phase = self.phase.as_str(), "report discarded");
                    return Ok(Vec::new());
                }
                if self.registry.get(&name).is_none() {
                    return Err(CoordError::UnknownWorker(name));
                }
            }
        }
        let mut out = self.relay_retired(&report);
        if let Some(agg) = self.aggregator.add(report) {
            out.extend(self.after_step(agg, observer));
        }
        Ok(out)
    }

    /// Tell each creator about its vehicles that finished in another
    /// worker's area, so its quota frees up.
    fn relay_retired(&self, report: &TrafficReport) -> Vec<Outbound> {
        let Some(sender) = self.registry.get(&report.worker_name).map(|r| r.meta.index) else {
            return Vec::new();
        };
        let mut by_origin: BTreeMap<WorkerIndex, Vec<VehicleId>> = BTreeMap::new();
        for f in report.finished.iter().filter(|f| f.id.origin() != sender) {
            by_origin.entry(f.id.origin()).or_default().push(f.id);
        }
        by_origin
            .into_iter()
            .filter_map(|(origin, vehicles)| {
                let rec = self.registry.records().iter().find(|r| r.meta.index == origin)?;
                trace!(worker = %rec.meta.name, count = vehicles.len(), "vehicles retired elsewhere");
                Some(Outbound::ToWorker { name: rec.meta.name.clone(), msg: Message::VehiclesRetired { vehicles } })
            })
            .collect()
    }

    fn on_complete(
        &mut self,
        name: &str,
        step: Step,
        vehicle_count: u64,
        observer: &mut dyn ReportObserver,
    ) -> CoordResult<Vec<Outbound>> {
        if self.config.sync_mode != SyncMode::Psp || !self.phase.is_active() {
            debug!(worker = name, %step, "completion discarded");
            return Ok(Vec::new());
        }
        if step < self.policy.max_steps() {
            // Sent before the worker learned about an extension.
            debug!(worker = name, %step, max = %self.policy.max_steps(), "completion below bound ignored");
            return Ok(Vec::new());
        }
        self.registry.transition(name, WorkerEvent::Completed)?;
        self.completed.insert(name.to_string());
        info!(worker = name, %step, vehicles = vehicle_count, done = self.completed.len(), "worker complete");
        if self.completed.len() == self.registry.len() {
            return Ok(self.finish(Termination::MaxSteps, step, observer));
        }
        Ok(Vec::new())
    }

    // ── Commands ──────────────────────────────────────────────────────────

    /// Apply an operator command.
    pub fn command(&mut self, cmd: ServerCommand, observer: &mut dyn ReportObserver) -> CoordResult<Vec<Outbound>> {
        match cmd {
            ServerCommand::Setup  => self.setup(),
            ServerCommand::Start  => self.start(),
            ServerCommand::Pause  => self.pause(),
            ServerCommand::Resume => self.resume(),
            ServerCommand::Stop   => self.stop(observer),
            ServerCommand::KillAll { shared_process } => Ok(self.kill_all(shared_process, observer)),
        }
    }

    fn invalid(&self, cmd: ServerCommand) -> CoordError {
        CoordError::InvalidCommand { command: cmd.as_str(), phase: self.phase.as_str() }
    }

    /// Partition the road graph and send every worker its setup.
    pub fn setup(&mut self) -> CoordResult<Vec<Outbound>> {
        if self.phase.is_active() || self.phase == Phase::SettingUp {
            return Err(self.invalid(ServerCommand::Setup));
        }
        if !self.registry.is_full() {
            return Err(CoordError::NotEnoughWorkers { have: self.registry.len(), need: self.registry.capacity() });
        }

        let (network, is_new) = match RoadNetwork::from_source(&self.config.road_graph)? {
            Some(net) => (Arc::new(net), true),
            None => (self.network.clone().ok_or(CoordError::NoRoadGraph)?, false),
        };
        let n = self.registry.len();
        let mut rng = SimRng::new(self.config.seed);
        let part = partition(&network, n, self.config.max_cell_size_m, &mut rng)?;
        let workload = assign_quotas(
            &part,
            &network,
            self.config.quotas,
            &self.config.windows,
            &self.config.external_routes,
        )?;

        self.registry.reset();
        for rec in self.registry.records_mut() {
            let (quotas, routes) = workload.for_worker(rec.meta.index);
            rec.quotas = quotas;
            rec.external_routes = routes.to_vec();
            rec.area = part.areas.get(rec.meta.index.index()).cloned();
        }

        let workers = self.registry.metas();
        let node_owner = part.ownership.node_owners().to_vec();
        let road_graph = if is_new { self.config.road_graph.clone() } else { RoadGraphSource::Empty };
        let c = &self.config;
        let out = self
            .registry
            .records()
            .iter()
            .map(|rec| {
                let payload = SetupPayload {
                    is_new_environment: is_new,
                    num_workers: n,
                    sync_mode: c.sync_mode,
                    start_step: c.start_step,
                    max_steps: c.max_step(),
                    steps_per_second: c.steps_per_second,
                    driver_profiles: c.driver_profiles.clone(),
                    look_ahead_distance_m: c.look_ahead_distance_m,
                    traffic_light_timing: c.traffic_light_timing,
                    quotas: rec.quotas,
                    external_routes: rec.external_routes.clone(),
                    workers: workers.clone(),
                    road_graph: road_graph.clone(),
                    node_owner: node_owner.clone(),
                    routing_algorithm: c.routing_algorithm,
                    light_nodes_to_add: c.light_nodes_to_add.clone(),
                    light_nodes_to_remove: c.light_nodes_to_remove.clone(),
                    reroute: c.reroute,
                    tram_stop_rule: c.tram_stop_rule,
                    drive_on_left: c.drive_on_left,
                    windows: c.windows.clone(),
                    report_interval_steps: c.report_interval_steps,
                    report_vehicles: c.report_vehicles,
                    seed: c.seed,
                };
                info!(worker = %rec.meta.name, index = rec.meta.index.0, quotas = ?rec.quotas,
                      routes = rec.external_routes.len(), "setup sent");
                Outbound::ToWorker { name: rec.meta.name.clone(), msg: Message::Setup(Box::new(payload)) }
            })
            .collect();

        self.network = Some(network);
        self.phase = Phase::SettingUp;
        self.policy = Self::policy_for(&self.config);
        self.aggregator = ReportAggregator::new(n);
        self.step = self.config.start_step;
        self.completed.clear();
        self.outcome = None;
        Ok(out)
    }

    /// Start a run once every worker is ready.
    pub fn start(&mut self) -> CoordResult<Vec<Outbound>> {
        if self.phase != Phase::Ready {
            return Err(self.invalid(ServerCommand::Start));
        }
        self.registry.seal();
        self.registry.transition_all(WorkerEvent::Start)?;
        self.phase = Phase::Running;
        self.step = self.config.start_step;
        info!(mode = ?self.config.sync_mode, start = %self.step, max = %self.policy.max_steps(), "run started");
        match self.config.sync_mode {
            SyncMode::Bsp => Ok(self.begin_step(self.step)),
            SyncMode::Psp => Ok(self.registry.broadcast(&Message::ServerlessStart {
                step: self.step,
                max_steps: self.policy.max_steps(),
            })),
        }
    }

    pub fn pause(&mut self) -> CoordResult<Vec<Outbound>> {
        if self.phase != Phase::Running {
            return Err(self.invalid(ServerCommand::Pause));
        }
        self.phase = Phase::Paused;
        info!(step = %self.step, "run paused");
        Ok(match self.config.sync_mode {
            SyncMode::Bsp => Vec::new(),
            SyncMode::Psp => self.registry.broadcast(&Message::ServerlessPause { step: self.step }),
        })
    }

    /// Continue a paused run.  BSP re-issues whatever the current step is
    /// waiting on, since replies that arrived while paused were discarded.
    pub fn resume(&mut self) -> CoordResult<Vec<Outbound>> {
        if self.phase != Phase::Paused {
            return Err(self.invalid(ServerCommand::Resume));
        }
        self.phase = Phase::Running;
        info!(step = %self.step, "run resumed");
        if self.config.sync_mode == SyncMode::Psp {
            return Ok(self.registry.broadcast(&Message::ServerlessResume {
                step: self.step,
                max_steps: self.policy.max_steps(),
            }));
        }

        if !self.simulate_sent && self.registry.all_at(WorkerState::Shared) {
            return Ok(self.dispatch_simulate());
        }
        let mut out = Vec::new();
        for rec in self.registry.records() {
            let msg = match rec.state {
                WorkerState::SharingStarted => Message::ShareTraffic { step: self.step },
                WorkerState::Shared if self.simulate_sent => {
                    Message::Simulate { permits: self.permits, request_id: self.request_id }
                }
                _ => continue,
            };
            debug!(worker = %rec.meta.name, kind = msg.kind(), "re-issued");
            out.push(Outbound::ToWorker { name: rec.meta.name.clone(), msg });
        }
        Ok(out)
    }

    /// End the run.  Every worker returns to `New` and awaits another setup.
    pub fn stop(&mut self, observer: &mut dyn ReportObserver) -> CoordResult<Vec<Outbound>> {
        if !self.phase.is_active() {
            return Err(self.invalid(ServerCommand::Stop));
        }
        Ok(self.finish(Termination::Stopped, self.step, observer))
    }

    pub fn kill_all(&mut self, shared_process: bool, observer: &mut dyn ReportObserver) -> Vec<Outbound> {
        let mut out = Vec::new();
        if self.phase.is_active() {
            out = self.finish(Termination::Stopped, self.step, observer);
        }
        info!(workers = self.registry.len(), shared_process, "killing workers");
        out.extend(self.registry.broadcast(&Message::KillWorker { is_shared_process_space: shared_process }));
        self.phase = Phase::Idle;
        out
    }

    /// Forget a worker whose connection closed.  A run in progress cannot
    /// complete without it and is stopped.
    pub fn remove_worker(&mut self, name: &str, observer: &mut dyn ReportObserver) -> Vec<Outbound> {
        if self.registry.remove(name).is_none() {
            return Vec::new();
        }
        match self.phase {
            Phase::Running | Phase::Paused => {
                warn!(worker = name, step = %self.step, "worker lost mid-run");
                self.finish(Termination::Stopped, self.step, observer)
            }
            Phase::SettingUp | Phase::Ready => {
                warn!(worker = name, "worker lost before start");
                self.phase = Phase::Idle;
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    // ── Step cycle ────────────────────────────────────────────────────────

    fn begin_step(&mut self, step: Step) -> Vec<Outbound> {
        self.step = step;
        self.simulate_sent = false;
        self.aggregator.drop_before(step);
        for rec in self.registry.records_mut() {
            match rec.state.transition(WorkerEvent::ShareRequested) {
                Ok(next) => rec.state = next,
                Err(e) => warn!(worker = %rec.meta.name, error = %e, "share request"),
            }
        }
        debug!(%step, "share requested");
        self.registry.broadcast(&Message::ShareTraffic { step })
    }

    fn dispatch_simulate(&mut self) -> Vec<Outbound> {
        self.request_id += 1;
        self.permits = self.aggregator.take_permits(&self.config.quotas);
        self.simulate_sent = true;
        debug!(step = %self.step, request = self.request_id, permits = ?self.permits, "simulate");
        self.registry.broadcast(&Message::Simulate { permits: self.permits, request_id: self.request_id })
    }

    fn after_step(&mut self, agg: AggregatedStep, observer: &mut dyn ReportObserver) -> Vec<Outbound> {
        observer.on_step_complete(&agg);
        info!(step = %agg.step, active = agg.active_vehicles, pending = agg.pending_routes,
              finished = agg.finished.len(), total_finished = agg.total_finished, "step complete");

        let verdict = self.policy.decide(agg.step, agg.unfinished(), self.aggregator.last_finish());
        if verdict.is_final() {
            return self.finish(verdict, agg.step, observer);
        }
        match self.config.sync_mode {
            SyncMode::Bsp => self.begin_step(agg.step.next()),
            SyncMode::Psp => {
                self.step = self.step.max(agg.step);
                match verdict {
                    Termination::Extended(max) => self.extend_psp(max),
                    _ => Vec::new(),
                }
            }
        }
    }

    /// Workers that already stopped at the old bound run again.
    fn extend_psp(&mut self, max_steps: Step) -> Vec<Outbound> {
        for name in std::mem::take(&mut self.completed) {
            if let Err(e) = self.registry.transition(&name, WorkerEvent::Start) {
                warn!(worker = %name, error = %e, "restart after extension");
            }
        }
        if self.phase == Phase::Paused {
            // The new bound goes out with the resume.
            return Vec::new();
        }
        self.registry.broadcast(&Message::ServerlessResume { step: self.step, max_steps })
    }

    fn finish(&mut self, reason: Termination, step: Step, observer: &mut dyn ReportObserver) -> Vec<Outbound> {
        let summary = RunSummary { final_step: step, reason, total_finished: self.aggregator.total_finished() };
        info!(step = %step, reason = reason.as_str(), total_finished = summary.total_finished, "run finished");
        observer.on_run_end(&summary);

        let out = match self.config.sync_mode {
            SyncMode::Bsp => Vec::new(),
            SyncMode::Psp => self.registry.broadcast(&Message::ServerlessStop { step }),
        };
        if let Err(e) = self.registry.transition_all(WorkerEvent::Stop) {
            warn!(error = %e, "stop transition");
        }
        self.registry.reset();
        self.aggregator.clear();
        self.completed.clear();
        self.simulate_sent = false;
        self.outcome = Some(summary);
        self.phase = Phase::Stopped;
        out
    }
}
