//! Worker-side record of one connected fellow.

use std::collections::BTreeSet;

use dt_core::{EdgeId, Step};
use dt_partition::FellowLink;
use dt_proto::{BorderVehicle, WorkerMeta};

use crate::state::{FellowEvent, FellowState};
use crate::{CoordError, CoordResult};

/// One connected fellow: identity, exchange progress, border edges and the
/// vehicles waiting to be handed over.
#[derive(Clone, Debug)]
pub struct FellowRecord {
    pub meta: WorkerMeta,
    pub state: FellowState,
    /// Step of the exchange in progress, while `state` is not `Shared`.
    cycle: Option<Step>,
    /// Last step whose exchange completed in both directions.
    synced: Option<Step>,
    /// Edges from the fellow into this worker's area.
    pub inward: BTreeSet<EdgeId>,
    /// Edges from this worker's area into the fellow's.
    pub outward: BTreeSet<EdgeId>,
    pending: Vec<BorderVehicle>,
}

impl FellowRecord {
    pub fn new(meta: WorkerMeta, link: &FellowLink) -> Self {
        FellowRecord {
            meta,
            state: FellowState::Shared,
            cycle: None,
            synced: None,
            inward: link.inward.clone(),
            outward: link.outward.clone(),
            pending: Vec::new(),
        }
    }

    /// Apply a send or receive for `step`.
    ///
    /// A second send (or receive) for a step already converged, or an event
    /// for a different step while one is in progress, is illegal.
    pub fn apply(&mut self, event: FellowEvent, step: Step) -> CoordResult<FellowState> {
        match self.cycle {
            None if self.synced == Some(step) => {
                return Err(CoordError::IllegalTransition {
                    machine: "FellowState",
                    from:    format!("{} at {step}", self.state),
                    event:   format!("{event:?} (step already shared)"),
                });
            }
            Some(c) if c != step => return Err(CoordError::StepMismatch { expected: c, got: step }),
            _ => {}
        }
        let next = self.state.transition(event)?;
        self.state = next;
        if next == FellowState::Shared {
            self.cycle = None;
            self.synced = Some(step);
        } else {
            self.cycle = Some(step);
        }
        Ok(next)
    }

    /// Both directions of `step` are done.
    pub fn is_synced(&self, step: Step) -> bool {
        self.state == FellowState::Shared && self.synced == Some(step)
    }

    /// Whether this worker already sent its payload for `step`.
    pub fn has_sent(&self, step: Step) -> bool {
        match self.state {
            FellowState::SharingDataSent => self.cycle == Some(step),
            FellowState::Shared => self.synced == Some(step),
            FellowState::SharingDataReceived => false,
        }
    }

    pub fn queue(&mut self, vehicle: BorderVehicle) {
        self.pending.push(vehicle);
    }

    /// Take every queued vehicle, leaving the queue empty.
    pub fn take_pending(&mut self) -> Vec<BorderVehicle> {
        std::mem::take(&mut self.pending)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
