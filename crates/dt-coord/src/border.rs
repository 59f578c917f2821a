//! Per-step hand-off of vehicles and lane tails between connected fellows.
//!
//! Sending side: vehicles the local simulation released at a border are
//! queued on the fellow that owns their next edge; [`BorderExchange::flush`]
//! drains every queue into one [`WwTraffic`] per fellow, together with the
//! rear-most vehicle on each lane of the edges the fellow feeds into.
//!
//! Receiving side: [`BorderExchange::receive`] advances the fellow's state
//! first and only then recreates the vehicles, so a duplicated payload is
//! rejected before any vehicle is inserted twice.

use std::collections::BTreeMap;

use dt_core::{EdgeId, Step, WorkerIndex};
use dt_mobility::LocalSimulation;
use dt_partition::BorderTopology;
use dt_proto::{BorderVehicle, WorkerMeta, WwTraffic};
use tracing::{trace, warn};

use crate::fellow::FellowRecord;
use crate::state::FellowEvent;
use crate::{CoordError, CoordResult};

pub struct BorderExchange {
    name: String,
    me: WorkerIndex,
    topology: BorderTopology,
    fellows: BTreeMap<WorkerIndex, FellowRecord>,
}

impl BorderExchange {
    /// Instantiate a record for every connected fellow in `topology`.
    /// Unconnected workers get none.
    pub fn new(name: impl Into<String>, topology: BorderTopology, workers: &[WorkerMeta]) -> Self {
        let fellows = topology
            .links()
            .filter_map(|link| {
                let meta = workers.iter().find(|w| w.index == link.fellow)?;
                Some((link.fellow, FellowRecord::new(meta.clone(), link)))
            })
            .collect();
        BorderExchange { name: name.into(), me: topology.me, topology, fellows }
    }

    pub fn me(&self) -> WorkerIndex {
        self.me
    }

    pub fn fellow_count(&self) -> usize {
        self.fellows.len()
    }

    pub fn fellows(&self) -> impl Iterator<Item = &FellowRecord> {
        self.fellows.values()
    }

    pub fn fellow(&self, index: WorkerIndex) -> Option<&FellowRecord> {
        self.fellows.get(&index)
    }

    /// Queue vehicles released by the local step on the fellows that own
    /// their next edge.
    ///
    /// A vehicle with no such fellow cannot be placed anywhere; it is
    /// reported as an error after the rest are queued.
    pub fn queue_departures(&mut self, vehicles: Vec<BorderVehicle>) -> CoordResult<()> {
        let mut lost = None;
        for v in vehicles {
            let target = v.current_edge().and_then(|e| self.topology.handover_target(e));
            match target.and_then(|t| self.fellows.get_mut(&t)) {
                Some(f) => f.queue(v),
                None => {
                    let edge = v.current_edge().unwrap_or(EdgeId::INVALID);
                    warn!(worker = %self.name, vehicle = %v.id, %edge, "no fellow to hand vehicle to");
                    lost.get_or_insert(CoordError::NoHandoverTarget { vehicle: v.id, edge });
                }
            }
        }
        lost.map_or(Ok(()), Err)
    }

    /// Build this step's payload for every fellow not yet sent to, draining
    /// their queues.
    pub fn flush<S: LocalSimulation>(&mut self, step: Step, sim: &S) -> CoordResult<Vec<(WorkerIndex, WwTraffic)>> {
        let mut out = Vec::with_capacity(self.fellows.len());
        for (&index, fellow) in self.fellows.iter_mut() {
            if fellow.has_sent(step) {
                continue;
            }
            let inward: Vec<EdgeId> = fellow.inward.iter().copied().collect();
            let traffic = WwTraffic {
                sender_name: self.name.clone(),
                sender: self.me,
                step,
                vehicles: fellow.take_pending(),
                lane_tails: sim.rear_vehicles(&inward),
            };
            fellow.apply(FellowEvent::Sent, step)?;
            trace!(worker = %self.name, fellow = %fellow.meta.name, %step, vehicles = traffic.vehicles.len(), "border payload sent");
            out.push((index, traffic));
        }
        Ok(out)
    }

    /// Adopt a fellow's payload for the current step.  Returns the number of
    /// vehicles inserted.
    pub fn receive<S: LocalSimulation>(&mut self, sim: &mut S, traffic: WwTraffic) -> CoordResult<usize> {
        let fellow = self.fellows.get_mut(&traffic.sender).ok_or(CoordError::UnknownFellow(traffic.sender))?;
        fellow.apply(FellowEvent::Received, traffic.step)?;

        let outward: Vec<EdgeId> = fellow.outward.iter().copied().collect();
        sim.set_border_tails(&outward, &traffic.lane_tails);

        let mut inserted = 0;
        let mut first_err = None;
        for v in traffic.vehicles {
            let id = v.id;
            match sim.insert_border_vehicle(v) {
                Ok(()) => inserted += 1,
                Err(e) => {
                    warn!(worker = %self.name, vehicle = %id, error = %e, "border vehicle rejected");
                    first_err.get_or_insert(e);
                }
            }
        }
        trace!(worker = %self.name, sender = %traffic.sender_name, step = %traffic.step, inserted, "border payload received");
        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(inserted),
        }
    }

    /// Every connected fellow has converged on `step`.  Trivially true with
    /// no fellows.
    pub fn all_synced(&self, step: Step) -> bool {
        self.fellows.values().all(|f| f.is_synced(step))
    }

    /// Vehicles queued but not yet flushed.
    pub fn pending_vehicles(&self) -> usize {
        self.fellows.values().map(FellowRecord::pending_len).sum()
    }
}
