//! Report observer trait for progress reporting and data collection.

use dt_core::Step;

use crate::aggregator::{AggregatedStep, Termination};

/// How a run ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub final_step: Step,
    pub reason: Termination,
    pub total_finished: u64,
}

/// Callbacks invoked by the [`Coordinator`][crate::Coordinator] as merged
/// reports come in.
///
/// All methods have default no-op implementations so implementors only need
/// to override what they care about.
///
/// # Example — progress printer
///
/// ```rust,ignore
/// struct ProgressPrinter;
///
/// impl ReportObserver for ProgressPrinter {
///     fn on_step_complete(&mut self, step: &AggregatedStep) {
///         println!("{}: {} active", step.step, step.active_vehicles);
///     }
/// }
/// ```
pub trait ReportObserver: Send {
    /// Called once every worker has reported `step.step`.
    fn on_step_complete(&mut self, _step: &AggregatedStep) {}

    /// Called once when the run terminates, after the last step callback.
    fn on_run_end(&mut self, _summary: &RunSummary) {}
}

/// A [`ReportObserver`] that does nothing.
pub struct NoopObserver;

impl ReportObserver for NoopObserver {}
