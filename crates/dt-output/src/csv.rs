//! CSV output backend.
//!
//! Creates two files in the configured output directory:
//! - `step_summaries.csv`
//! - `finished_vehicles.csv`

use std::fs::{self, File};
use std::path::Path;

use ::csv::Writer;

use crate::writer::OutputWriter;
use crate::{FinishedVehicleRow, OutputError, OutputResult, StepSummaryRow};

pub const STEP_SUMMARIES: &str = "step_summaries.csv";
pub const FINISHED_VEHICLES: &str = "finished_vehicles.csv";

/// Writes run output to two CSV files.
pub struct CsvWriter {
    summaries: Writer<File>,
    finished:  Writer<File>,
    closed:    bool,
}

impl CsvWriter {
    /// Create `dir` if needed, open (or truncate) the two CSV files in it and
    /// write the header rows.
    pub fn new(dir: &Path) -> OutputResult<Self> {
        fs::create_dir_all(dir)?;

        let mut summaries = Writer::from_path(dir.join(STEP_SUMMARIES))?;
        summaries.write_record(["step", "active_vehicles", "finished_vehicles", "private", "tram", "bus"])?;

        let mut finished = Writer::from_path(dir.join(FINISHED_VEHICLES))?;
        finished.write_record(["vehicle_id", "origin", "class", "created_at", "finished_at"])?;

        Ok(Self { summaries, finished, closed: false })
    }

    fn check_open(&self) -> OutputResult<()> {
        if self.closed { Err(OutputError::Finished) } else { Ok(()) }
    }
}

impl OutputWriter for CsvWriter {
    fn write_step_summary(&mut self, row: &StepSummaryRow) -> OutputResult<()> {
        self.check_open()?;
        self.summaries.write_record(&[
            row.step.to_string(),
            row.active_vehicles.to_string(),
            row.finished_vehicles.to_string(),
            row.private.to_string(),
            row.tram.to_string(),
            row.bus.to_string(),
        ])?;
        Ok(())
    }

    fn write_finished(&mut self, rows: &[FinishedVehicleRow]) -> OutputResult<()> {
        self.check_open()?;
        for row in rows {
            self.finished.write_record(&[
                row.vehicle_id.to_string(),
                row.origin.to_string(),
                row.class.to_string(),
                row.created_at.to_string(),
                row.finished_at.to_string(),
            ])?;
        }
        Ok(())
    }

    fn finish(&mut self) -> OutputResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.summaries.flush()?;
        self.finished.flush()?;
        Ok(())
    }
}
