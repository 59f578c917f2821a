//! Report aggregation and termination detection (server side).

use std::collections::BTreeMap;

use dt_core::{SimConfig, Step, VehicleClass, VehicleQuotas};
use dt_proto::{CreationPermits, FinishedVehicle, TrafficReport};
use tracing::{debug, info};

// ── Aggregation ───────────────────────────────────────────────────────────────

/// All workers' reports for one step, merged.
#[derive(Clone, Debug, Default)]
pub struct AggregatedStep {
    pub step: Step,
    /// One report per worker, ordered by worker name.
    pub reports: Vec<TrafficReport>,
    pub active_vehicles: u64,
    pub pending_routes: u64,
    /// Vehicles that finished since the workers' previous reports.
    pub finished: Vec<FinishedVehicle>,
    /// Random vehicles on the road by class, as counted by their creators.
    pub counts: VehicleQuotas,
    /// Vehicles finished since the run started.
    pub total_finished: u64,
}

impl AggregatedStep {
    /// Vehicles still to finish: active ones plus external routes not yet
    /// released.
    pub fn unfinished(&self) -> u64 {
        self.active_vehicles + self.pending_routes
    }
}

/// Merges per-worker reports by step.
///
/// A step completes once every expected worker reported it.  Reports for
/// other steps are held, not dropped, so sparse or out-of-order arrivals
/// still complete their step.
#[derive(Debug)]
pub struct ReportAggregator {
    expected: usize,
    pending: BTreeMap<Step, BTreeMap<String, TrafficReport>>,
    /// Active random vehicles per class, summed since the last permit
    /// decision.
    tally: VehicleQuotas,
    total_finished: u64,
    last_finish: Option<Step>,
}

impl ReportAggregator {
    pub fn new(expected: usize) -> Self {
        ReportAggregator {
            expected,
            pending: BTreeMap::new(),
            tally: VehicleQuotas::ZERO,
            total_finished: 0,
            last_finish: None,
        }
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Add one report.  Returns the merged step when this report completed
    /// it.  A second report from the same worker for the same step replaces
    /// the first.
    pub fn add(&mut self, report: TrafficReport) -> Option<AggregatedStep> {
        let step = report.step;
        self.tally.add(&report.counts);
        let slot = self.pending.entry(step).or_default();
        slot.insert(report.worker_name.clone(), report);
        if slot.len() < self.expected {
            debug!(%step, have = slot.len(), need = self.expected, "step report held");
            return None;
        }
        let reports: Vec<TrafficReport> = self.pending.remove(&step)?.into_values().collect();

        let mut agg = AggregatedStep { step, ..AggregatedStep::default() };
        for r in &reports {
            agg.active_vehicles += r.active_vehicles;
            agg.pending_routes += r.pending_routes;
            agg.counts.add(&r.counts);
            agg.finished.extend_from_slice(&r.finished);
        }
        agg.finished.sort_by_key(|f| f.id);
        if let Some(latest) = agg.finished.iter().map(|f| f.finished_at).max() {
            self.total_finished += agg.finished.len() as u64;
            self.last_finish = Some(self.last_finish.map_or(latest, |l| l.max(latest)));
        }
        agg.total_finished = self.total_finished;
        agg.reports = reports;
        Some(agg)
    }

    /// Decide this step's creation permits from the tally, then reset the
    /// tally.  A class is permitted while the summed active count stays
    /// below its global quota.
    pub fn take_permits(&mut self, global: &VehicleQuotas) -> CreationPermits {
        let allow = |c: VehicleClass| self.tally.get(c) < global.get(c);
        let permits = CreationPermits {
            private: allow(VehicleClass::Private),
            tram:    allow(VehicleClass::Tram),
            bus:     allow(VehicleClass::Bus),
        };
        self.tally = VehicleQuotas::ZERO;
        permits
    }

    /// Most recent step in which any vehicle finished.
    pub fn last_finish(&self) -> Option<Step> {
        self.last_finish
    }

    pub fn total_finished(&self) -> u64 {
        self.total_finished
    }

    /// Steps with some but not all reports.
    pub fn held_steps(&self) -> usize {
        self.pending.len()
    }

    /// Forget partial steps older than `step`.
    pub fn drop_before(&mut self, step: Step) {
        self.pending = self.pending.split_off(&step);
    }

    /// Back to the state of a fresh run.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.tally = VehicleQuotas::ZERO;
        self.total_finished = 0;
        self.last_finish = None;
    }
}

// ── Termination ───────────────────────────────────────────────────────────────

/// Why a run ended, or how it continues.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    Continue,
    /// Continue with a larger step bound.
    Extended(Step),
    MaxSteps,
    AllFinished,
    /// No vehicle finished within the detection window.
    Gridlock { last_finish: Step },
    /// Stopped by command.
    Stopped,
}

impl Termination {
    pub fn is_final(self) -> bool {
        !matches!(self, Termination::Continue | Termination::Extended(_))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Termination::Continue       => "continue",
            Termination::Extended(_)    => "extended",
            Termination::MaxSteps       => "max_steps",
            Termination::AllFinished    => "all_finished",
            Termination::Gridlock { .. } => "gridlock",
            Termination::Stopped        => "stopped",
        }
    }
}

/// The stop rules, evaluated once per completed step.
#[derive(Clone, Debug)]
pub struct TerminationPolicy {
    max_steps: Step,
    increment: u64,
    stops_at_max: bool,
    gridlock_steps: u64,
    start: Step,
    /// Extend this many steps before the bound, so workers running ahead of
    /// the reports (PSP) learn about it in time.
    extend_margin: u64,
}

impl TerminationPolicy {
    pub fn new(config: &SimConfig) -> Self {
        TerminationPolicy {
            max_steps: config.max_step(),
            increment: config.max_steps_increment.max(1),
            stops_at_max: config.stops_at_max_steps,
            gridlock_steps: config.gridlock_steps(),
            start: config.start_step,
            extend_margin: 1,
        }
    }

    pub fn with_extend_margin(mut self, margin: u64) -> Self {
        self.extend_margin = margin.max(1);
        self
    }

    pub fn max_steps(&self) -> Step {
        self.max_steps
    }

    /// Evaluate the rules after `step` completed.
    ///
    /// In order: the bound stops the run; a strict bound otherwise keeps it
    /// going; nothing left to finish stops it; too long without a finish is
    /// gridlock; approaching the bound extends it.
    pub fn decide(&mut self, step: Step, unfinished: u64, last_finish: Option<Step>) -> Termination {
        let verdict = if step >= self.max_steps {
            Termination::MaxSteps
        } else if self.stops_at_max {
            Termination::Continue
        } else if unfinished == 0 {
            Termination::AllFinished
        } else {
            let since = last_finish.unwrap_or(self.start);
            if step.since(since) >= self.gridlock_steps {
                Termination::Gridlock { last_finish: since }
            } else if step.0 + self.extend_margin >= self.max_steps.0 {
                self.max_steps = self.max_steps.offset(self.increment);
                Termination::Extended(self.max_steps)
            } else {
                Termination::Continue
            }
        };
        match verdict {
            Termination::Continue => {}
            Termination::Extended(max) => info!(%step, new_max = %max, "step bound extended"),
            v => info!(%step, reason = v.as_str(), "run terminates"),
        }
        verdict
    }
}
