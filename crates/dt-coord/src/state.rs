//! The two explicit state machines of the protocol.
//!
//! Both are pure: `transition` maps `(state, event)` to the next state or to
//! [`CoordError::IllegalTransition`], and never touches anything else.  The
//! drivers decide what to do with an illegal event (log and discard).
//!
//! ```text
//! WorkerState (server side, one per worker)
//!
//!   New ──SetupDone──► Ready ──Start──► Simulating
//!                                           │ ShareRequested
//!                                           ▼
//!        ┌──────────────────────────► SharingStarted ──SharedReported──► Shared
//!        │ ShareRequested                                                 │ StepReported
//!        └───────────────────────── FinishedOneStep ◄─────────────────────┘
//!
//!   Simulating ──Completed──► FinishedOneStep ──Start──► Simulating   (PSP)
//!   any ──Stop──► New
//!
//! FellowState (worker side, one per connected fellow, per step)
//!
//!   Shared ──Sent──► SharingDataSent ──Received──► Shared
//!   Shared ──Received──► SharingDataReceived ──Sent──► Shared
//! ```

use std::fmt;

use crate::{CoordError, CoordResult};

// ── WorkerState ───────────────────────────────────────────────────────────────

/// Lifecycle of one worker as seen by the server.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Admitted, or back at rest after a stop.
    #[default]
    New,
    /// Setup acknowledged.
    Ready,
    /// Run started; no step exchange in flight.
    Simulating,
    /// `ShareTraffic` sent, waiting for `SharedWithNeighbor`.
    SharingStarted,
    /// Border exchange done for the current step.
    Shared,
    /// Report for the current step received (BSP), or run bound reached (PSP).
    FinishedOneStep,
}

/// Inputs of [`WorkerState::transition`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum WorkerEvent {
    SetupDone,
    Start,
    ShareRequested,
    SharedReported,
    StepReported,
    Completed,
    Stop,
}

impl WorkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::New             => "NEW",
            WorkerState::Ready           => "READY",
            WorkerState::Simulating      => "SIMULATING",
            WorkerState::SharingStarted  => "SHARING_STARTED",
            WorkerState::Shared          => "SHARED",
            WorkerState::FinishedOneStep => "FINISHED_ONE_STEP",
        }
    }

    pub fn transition(self, event: WorkerEvent) -> CoordResult<WorkerState> {
        use WorkerEvent as E;
        use WorkerState as S;
        match (self, event) {
            (_, E::Stop)                                      => Ok(S::New),
            (S::New | S::Ready, E::SetupDone)                 => Ok(S::Ready),
            (S::Ready | S::FinishedOneStep, E::Start)         => Ok(S::Simulating),
            (S::Simulating | S::FinishedOneStep, E::ShareRequested) => Ok(S::SharingStarted),
            (S::SharingStarted, E::SharedReported)            => Ok(S::Shared),
            (S::Shared, E::StepReported)                      => Ok(S::FinishedOneStep),
            (S::Simulating, E::Completed)                     => Ok(S::FinishedOneStep),
            (from, event) => Err(CoordError::IllegalTransition {
                machine: "WorkerState",
                from:    from.to_string(),
                event:   format!("{event:?}"),
            }),
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── FellowState ───────────────────────────────────────────────────────────────

/// Progress of one step's exchange with one fellow.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum FellowState {
    #[default]
    Shared,
    SharingDataSent,
    SharingDataReceived,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FellowEvent {
    Sent,
    Received,
}

impl FellowState {
    pub fn as_str(self) -> &'static str {
        match self {
            FellowState::Shared              => "SHARED",
            FellowState::SharingDataSent     => "SHARING_DATA_SENT",
            FellowState::SharingDataReceived => "SHARING_DATA_RECEIVED",
        }
    }

    /// Send and receive commute: either order ends in `Shared`.
    pub fn transition(self, event: FellowEvent) -> CoordResult<FellowState> {
        use FellowEvent as E;
        use FellowState as S;
        match (self, event) {
            (S::Shared, E::Sent)                  => Ok(S::SharingDataSent),
            (S::Shared, E::Received)              => Ok(S::SharingDataReceived),
            (S::SharingDataSent, E::Received)     => Ok(S::Shared),
            (S::SharingDataReceived, E::Sent)     => Ok(S::Shared),
            (from, event) => Err(CoordError::IllegalTransition {
                machine: "FellowState",
                from:    from.to_string(),
                event:   format!("{event:?}"),
            }),
        }
    }
}

impl fmt::Display for FellowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
