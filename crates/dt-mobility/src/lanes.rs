//! Per-step lane index: which vehicles occupy which lane, front to back.

use dt_core::EdgeId;

use crate::vehicle::Vehicle;

#[cfg(feature = "fx-hash")]
pub(crate) type LaneMap<V> = rustc_hash::FxHashMap<(EdgeId, u8), V>;
#[cfg(not(feature = "fx-hash"))]
pub(crate) type LaneMap<V> = std::collections::HashMap<(EdgeId, u8), V>;

/// Vehicles grouped by `(edge, lane)`.
///
/// Each lane lists vehicle indices sorted front-most first; ties break on
/// vehicle id so the order never depends on insertion order.
#[derive(Default)]
pub struct LaneIndex {
    lanes: LaneMap<Vec<usize>>,
    /// Position of vehicle `i` within its lane's list.
    rank: Vec<usize>,
}

impl LaneIndex {
    pub fn build(vehicles: &[Vehicle]) -> Self {
        let mut lanes: LaneMap<Vec<usize>> = LaneMap::default();
        for (i, v) in vehicles.iter().enumerate() {
            lanes.entry((v.current_edge(), v.lane)).or_default().push(i);
        }
        let mut rank = vec![0; vehicles.len()];
        for list in lanes.values_mut() {
            list.sort_by(|&a, &b| {
                vehicles[b]
                    .head_m
                    .total_cmp(&vehicles[a].head_m)
                    .then(vehicles[a].id.cmp(&vehicles[b].id))
            });
            for (r, &i) in list.iter().enumerate() {
                rank[i] = r;
            }
        }
        LaneIndex { lanes, rank }
    }

    /// Vehicles on one lane, front-most first.
    pub fn lane(&self, edge: EdgeId, lane: u8) -> &[usize] {
        self.lanes.get(&(edge, lane)).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The vehicle directly ahead of `i` in its lane.
    pub fn leader_of(&self, vehicles: &[Vehicle], i: usize) -> Option<usize> {
        let r = self.rank[i];
        if r == 0 {
            return None;
        }
        let v = &vehicles[i];
        Some(self.lane(v.current_edge(), v.lane)[r - 1])
    }

    /// The rear-most vehicle on a lane.
    pub fn rearmost(&self, edge: EdgeId, lane: u8) -> Option<usize> {
        self.lane(edge, lane).last().copied()
    }

    /// Whether any vehicle on `edge` is within `within_m` of its end.
    pub fn approaching(&self, vehicles: &[Vehicle], edge: EdgeId, lanes: u8, edge_len: f32, within_m: f32) -> bool {
        (0..lanes).any(|l| {
            self.lane(edge, l)
                .first()
                .is_some_and(|&i| edge_len - vehicles[i].head_m <= within_m)
        })
    }
}
