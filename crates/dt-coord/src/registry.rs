//! Server-side worker registry.

use dt_core::{ExternalRoute, VehicleQuotas, WorkerIndex};
use dt_partition::WorkArea;
use dt_proto::{Message, WorkerMeta};
use tracing::{debug, info, warn};

use crate::outbound::Outbound;
use crate::state::{WorkerEvent, WorkerState};
use crate::{CoordError, CoordResult};

/// Everything the server knows about one worker.
#[derive(Clone, Debug)]
pub struct WorkerRecord {
    pub meta: WorkerMeta,
    pub state: WorkerState,
    pub quotas: VehicleQuotas,
    pub external_routes: Vec<ExternalRoute>,
    pub area: Option<WorkArea>,
}

/// Outcome of a join request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    Accepted(WorkerIndex),
    Rejected(&'static str),
}

/// Workers in admission order.  The position of a record is its
/// [`WorkerIndex`].
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    capacity: usize,
    records: Vec<WorkerRecord>,
    /// Set once a run starts; no admission after that.
    sealed: bool,
}

impl WorkerRegistry {
    pub fn new(capacity: usize) -> Self {
        WorkerRegistry { capacity, records: Vec::with_capacity(capacity), sealed: false }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn register(&mut self, name: &str, address: &str, port: u16) -> Admission {
        let verdict = if self.sealed {
            Admission::Rejected("simulation already started")
        } else if self.is_full() {
            Admission::Rejected("registry full")
        } else if self.records.iter().any(|r| r.meta.name == name) {
            Admission::Rejected("duplicate name")
        } else {
            let index = WorkerIndex(self.records.len() as u16);
            self.records.push(WorkerRecord {
                meta: WorkerMeta { index, name: name.to_string(), address: address.to_string(), port },
                state: WorkerState::New,
                quotas: VehicleQuotas::ZERO,
                external_routes: Vec::new(),
                area: None,
            });
            Admission::Accepted(index)
        };
        match &verdict {
            Admission::Accepted(index) => {
                info!(worker = name, index = index.0, joined = self.records.len(), need = self.capacity, "worker admitted");
            }
            Admission::Rejected(why) => warn!(worker = name, reason = why, "worker refused"),
        }
        verdict
    }

    /// Drop a worker that went away.  Later workers keep their records but
    /// the registry is no longer full, so the run cannot be set up again
    /// until a replacement joins.
    pub fn remove(&mut self, name: &str) -> Option<WorkerRecord> {
        let pos = self.records.iter().position(|r| r.meta.name == name)?;
        let rec = self.records.remove(pos);
        for (i, r) in self.records.iter_mut().enumerate() {
            r.meta.index = WorkerIndex(i as u16);
        }
        self.sealed = false;
        info!(worker = name, "worker removed");
        Some(rec)
    }

    pub fn get(&self, name: &str) -> Option<&WorkerRecord> {
        self.records.iter().find(|r| r.meta.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut WorkerRecord> {
        self.records.iter_mut().find(|r| r.meta.name == name)
    }

    pub fn records(&self) -> &[WorkerRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [WorkerRecord] {
        &mut self.records
    }

    pub fn metas(&self) -> Vec<WorkerMeta> {
        self.records.iter().map(|r| r.meta.clone()).collect()
    }

    pub fn state(&self, name: &str) -> Option<WorkerState> {
        self.get(name).map(|r| r.state)
    }

    /// Apply one event to one worker.
    pub fn transition(&mut self, name: &str, event: WorkerEvent) -> CoordResult<WorkerState> {
        let rec = self.get_mut(name).ok_or_else(|| CoordError::UnknownWorker(name.to_string()))?;
        let next = rec.state.transition(event)?;
        debug!(worker = name, from = %rec.state, to = %next, "worker state");
        rec.state = next;
        Ok(next)
    }

    /// Apply `event` to every worker; stops at the first illegal transition.
    pub fn transition_all(&mut self, event: WorkerEvent) -> CoordResult<()> {
        for rec in &mut self.records {
            rec.state = rec.state.transition(event)?;
        }
        Ok(())
    }

    /// Every worker back to `New`, ready for another setup.
    pub fn reset(&mut self) {
        for rec in &mut self.records {
            rec.state = WorkerState::New;
        }
        self.sealed = false;
    }

    /// Whether the registry is full and every worker is in `state`.
    pub fn all_at(&self, state: WorkerState) -> bool {
        self.is_full() && self.records.iter().all(|r| r.state == state)
    }

    /// Names of the workers currently in `state`.
    pub fn names_at(&self, state: WorkerState) -> Vec<String> {
        self.records.iter().filter(|r| r.state == state).map(|r| r.meta.name.clone()).collect()
    }

    /// One copy of `msg` per worker.
    pub fn broadcast(&self, msg: &Message) -> Vec<Outbound> {
        self.records
            .iter()
            .map(|r| Outbound::ToWorker { name: r.meta.name.clone(), msg: msg.clone() })
            .collect()
    }
}
