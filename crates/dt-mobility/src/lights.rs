//! Two-phase traffic signals at intersections.
//!
//! Incoming edges of a signalised node are split into two approach groups
//! by their position in edge-id order: even positions form group 0, odd
//! positions group 1.  Exactly one group is green at a time.

use std::collections::BTreeMap;

use dt_core::{EdgeId, NodeId, TrafficLightTiming};
use dt_proto::LightState;
use dt_spatial::RoadNetwork;

/// Green time per phase under fixed timing, seconds.
pub const FIXED_GREEN_SECS: f32 = 30.0;
/// Dynamic timing never cuts a phase shorter than this.
pub const MIN_GREEN_SECS: f32 = 8.0;
/// Dynamic timing never holds a phase longer than this.
pub const MAX_GREEN_SECS: f32 = 45.0;
/// A vehicle this close to the stop line counts as demand.
pub const DEMAND_DISTANCE_M: f32 = 40.0;

#[derive(Clone, Debug)]
struct Signal {
    phase: u8,
    elapsed_steps: u32,
    /// Incoming edges in id order.
    incoming: Vec<EdgeId>,
}

impl Signal {
    fn group_of(&self, edge: EdgeId) -> Option<u8> {
        self.incoming.iter().position(|&e| e == edge).map(|p| (p % 2) as u8)
    }
}

/// All signals whose approaches this worker owns.
#[derive(Clone, Debug, Default)]
pub struct LightController {
    timing: Option<TrafficLightTiming>,
    signals: BTreeMap<NodeId, Signal>,
    steps_per_second: u32,
    announced: bool,
}

impl LightController {
    /// Build signals for the nodes whose incoming edges are all owned here.
    ///
    /// Nodes with three or more approaches get a signal by default; `add`
    /// and `remove` adjust that set.  Nodes with fewer than two approaches
    /// never get one.
    pub fn new(
        net: &RoadNetwork,
        owned: impl Fn(EdgeId) -> bool,
        timing: TrafficLightTiming,
        add: &[NodeId],
        remove: &[NodeId],
        steps_per_second: u32,
    ) -> Self {
        if timing == TrafficLightTiming::None {
            return LightController::default();
        }
        let mut incoming: BTreeMap<NodeId, Vec<EdgeId>> = BTreeMap::new();
        for e in net.edges() {
            incoming.entry(net.edge_to[e.index()]).or_default().push(e);
        }
        let mut signals = BTreeMap::new();
        for (node, edges) in incoming {
            if edges.len() < 2 || !edges.iter().all(|&e| owned(e)) || remove.contains(&node) {
                continue;
            }
            if edges.len() >= 3 || add.contains(&node) {
                signals.insert(node, Signal { phase: 0, elapsed_steps: 0, incoming: edges });
            }
        }
        LightController {
            timing: Some(timing),
            signals,
            steps_per_second: steps_per_second.max(1),
            announced: false,
        }
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Whether traffic on `edge` must stop at its end.
    pub fn is_red(&self, net: &RoadNetwork, edge: EdgeId) -> bool {
        let node = net.edge_to[edge.index()];
        self.signals
            .get(&node)
            .and_then(|s| s.group_of(edge).map(|g| g != s.phase))
            .unwrap_or(false)
    }

    /// Advance every signal by one step.  Returns the phases that changed,
    /// or every phase on the first call.
    ///
    /// `demand(edge)` reports whether vehicles are waiting near the end of
    /// `edge`; only dynamic timing consults it.
    pub fn advance(&mut self, demand: impl Fn(EdgeId) -> bool) -> Vec<LightState> {
        let Some(timing) = self.timing else {
            return Vec::new();
        };
        let sps = self.steps_per_second as f32;
        let fixed = (FIXED_GREEN_SECS * sps) as u32;
        let min_green = (MIN_GREEN_SECS * sps) as u32;
        let max_green = (MAX_GREEN_SECS * sps) as u32;
        let announce_all = !self.announced;
        self.announced = true;

        let mut changed = Vec::new();
        for (&node, sig) in self.signals.iter_mut() {
            sig.elapsed_steps += 1;
            let switch = match timing {
                TrafficLightTiming::Fixed => sig.elapsed_steps >= fixed,
                TrafficLightTiming::Dynamic => {
                    let waiting = |group: u8| {
                        sig.incoming
                            .iter()
                            .enumerate()
                            .any(|(p, &e)| (p % 2) as u8 == group && demand(e))
                    };
                    sig.elapsed_steps >= max_green
                        || (sig.elapsed_steps >= min_green
                            && !waiting(sig.phase)
                            && waiting(1 - sig.phase))
                }
                TrafficLightTiming::None => false,
            };
            if switch {
                sig.phase = 1 - sig.phase;
                sig.elapsed_steps = 0;
            }
            if switch || announce_all {
                changed.push(LightState { node, phase: sig.phase });
            }
        }
        changed
    }
}
