//! `SummaryObserver<W>` — bridges `ReportObserver` to an `OutputWriter`.

use dt_coord::{AggregatedStep, ReportObserver, RunSummary};
use tracing::{info, warn};

use crate::row::{FinishedVehicleRow, StepSummaryRow};
use crate::writer::OutputWriter;
use crate::{OutputError, OutputResult};

/// A [`ReportObserver`] that writes step summaries and finished vehicles to
/// any [`OutputWriter`] backend.
///
/// Errors from the writer are stored internally because observer methods
/// have no return value.  After the run ends, check for errors with
/// [`take_error`][Self::take_error].
pub struct SummaryObserver<W: OutputWriter> {
    writer:     W,
    rows:       u64,
    last_error: Option<OutputError>,
}

impl<W: OutputWriter> SummaryObserver<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, rows: 0, last_error: None }
    }

    /// Take the stored write error, if any.
    pub fn take_error(&mut self) -> Option<OutputError> {
        self.last_error.take()
    }

    /// Step summary rows written so far.
    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    pub fn into_writer(self) -> W {
        self.writer
    }

    fn store_err(&mut self, result: OutputResult<()>) {
        if let Err(e) = result {
            // Keep only the first error.
            if self.last_error.is_none() {
                warn!(error = %e, "output write failed");
                self.last_error = Some(e);
            }
        }
    }
}

impl<W: OutputWriter + Send> ReportObserver for SummaryObserver<W> {
    fn on_step_complete(&mut self, step: &AggregatedStep) {
        let result = self.writer.write_step_summary(&StepSummaryRow::from(step));
        if result.is_ok() {
            self.rows += 1;
        }
        self.store_err(result);

        if !step.finished.is_empty() {
            let rows: Vec<FinishedVehicleRow> = step.finished.iter().map(FinishedVehicleRow::from).collect();
            let result = self.writer.write_finished(&rows);
            self.store_err(result);
        }
    }

    fn on_run_end(&mut self, summary: &RunSummary) {
        let result = self.writer.finish();
        self.store_err(result);
        info!(rows = self.rows, reason = summary.reason.as_str(), "output closed");
    }
}
