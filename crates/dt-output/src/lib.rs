//! `dt-output` — run output for the distributed traffic simulator.
//!
//! The CSV backend creates two files in the output directory:
//!
//! | File                     | One row per                                    |
//! |--------------------------|------------------------------------------------|
//! | `step_summaries.csv`     | completed step (merged over all workers)       |
//! | `finished_vehicles.csv`  | vehicle that reached its destination           |
//!
//! Backends implement [`OutputWriter`] and are driven by [`SummaryObserver`],
//! which implements `dt_coord::ReportObserver`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use dt_output::{CsvWriter, SummaryObserver};
//!
//! let writer = CsvWriter::new(Path::new("./output"))?;
//! let mut obs = SummaryObserver::new(writer);
//! let summary = cluster.run_to_end(&mut obs)?;
//! if let Some(e) = obs.take_error() { eprintln!("output error: {e}"); }
//! ```

pub mod csv;
pub mod error;
pub mod observer;
pub mod row;
pub mod writer;


pub use self::csv::CsvWriter;
pub use error::{OutputError, OutputResult};
pub use observer::SummaryObserver;
pub use row::{FinishedVehicleRow, StepSummaryRow};
pub use writer::OutputWriter;
