//! Border topology: which workers must exchange vehicles, and over which
//! edges.
//!
//! For worker `me` and a fellow `f`:
//!
//! - **inward** edges run from `f`'s area into `me`'s (start owned by `f`,
//!   end owned by `me`).  They belong to `me`.
//! - **outward** edges run from `me`'s area into `f`'s (start owned by `me`,
//!   end owned by `f`).  They belong to `f`; a vehicle of `me` whose next
//!   leg is one of them is handed to `f`.
//!
//! Two workers are connected fellows iff either set is non-empty.

use std::collections::{BTreeMap, BTreeSet};

use dt_core::{EdgeId, WorkerIndex};
use dt_spatial::RoadNetwork;

use crate::partition::Ownership;

/// Border edges between this worker and one connected fellow.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FellowLink {
    pub fellow: WorkerIndex,
    pub inward: BTreeSet<EdgeId>,
    pub outward: BTreeSet<EdgeId>,
}

/// Every connected fellow of one worker.
#[derive(Clone, Debug, Default)]
pub struct BorderTopology {
    pub me: WorkerIndex,
    links: BTreeMap<WorkerIndex, FellowLink>,
    /// Outward edge → fellow that owns it.
    outward_owner: BTreeMap<EdgeId, WorkerIndex>,
}

impl BorderTopology {
    /// Derive `me`'s border topology from the run's ownership table.
    pub fn compute(net: &RoadNetwork, ownership: &Ownership, me: WorkerIndex) -> Self {
        let mut links: BTreeMap<WorkerIndex, FellowLink> = BTreeMap::new();
        let mut outward_owner = BTreeMap::new();

        for e in net.edges() {
            let from = ownership.node_owner(net.edge_from[e.index()]);
            let to   = ownership.node_owner(net.edge_to[e.index()]);
            if from == to || from == WorkerIndex::INVALID || to == WorkerIndex::INVALID {
                continue;
            }
            if to == me {
                link(&mut links, from).inward.insert(e);
            } else if from == me {
                link(&mut links, to).outward.insert(e);
                outward_owner.insert(e, to);
            }
        }

        Self { me, links, outward_owner }
    }

    /// Topologies of all `num_workers` workers.
    pub fn all(net: &RoadNetwork, ownership: &Ownership, num_workers: usize) -> Vec<Self> {
        (0..num_workers)
            .map(|w| Self::compute(net, ownership, WorkerIndex(w as u16)))
            .collect()
    }

    /// Connected fellows, ascending.
    pub fn fellows(&self) -> impl Iterator<Item = WorkerIndex> + '_ {
        self.links.keys().copied()
    }

    pub fn fellow_count(&self) -> usize {
        self.links.len()
    }

    pub fn is_connected(&self, fellow: WorkerIndex) -> bool {
        self.links.contains_key(&fellow)
    }

    pub fn link(&self, fellow: WorkerIndex) -> Option<&FellowLink> {
        self.links.get(&fellow)
    }

    pub fn links(&self) -> impl Iterator<Item = &FellowLink> {
        self.links.values()
    }

    /// The fellow a vehicle must be handed to before entering `edge`, if
    /// `edge` crosses out of this worker's area.
    #[inline]
    pub fn handover_target(&self, edge: EdgeId) -> Option<WorkerIndex> {
        self.outward_owner.get(&edge).copied()
    }
}

fn link(links: &mut BTreeMap<WorkerIndex, FellowLink>, fellow: WorkerIndex) -> &mut FellowLink {
    links.entry(fellow).or_insert_with(|| FellowLink { fellow, ..FellowLink::default() })
}
