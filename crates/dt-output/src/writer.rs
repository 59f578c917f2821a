//! The `OutputWriter` trait implemented by backend writers.

use crate::{FinishedVehicleRow, OutputResult, StepSummaryRow};

/// Sink for run output.
///
/// Errors are returned to the caller; [`SummaryObserver`][crate::SummaryObserver]
/// stores them, since observer callbacks have no return value.
pub trait OutputWriter {
    /// Write one step summary row.
    fn write_step_summary(&mut self, row: &StepSummaryRow) -> OutputResult<()>;

    /// Write a batch of finished vehicles.
    fn write_finished(&mut self, rows: &[FinishedVehicleRow]) -> OutputResult<()>;

    /// Flush all underlying file handles.
    ///
    /// Idempotent.  Writes after `finish` fail with
    /// [`OutputError::Finished`][crate::OutputError::Finished].
    fn finish(&mut self) -> OutputResult<()>;
}
