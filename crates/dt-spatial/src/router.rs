//! Routing trait and default implementations.
//!
//! # Pluggability
//!
//! The local simulation routes randomly generated vehicles through the
//! [`Router`] trait.  [`DijkstraRouter`] is the exact default;
//! [`RandomAStarRouter`] perturbs edge costs so that vehicles sharing an
//! origin and destination spread over near-shortest alternatives.
//!
//! # Cost units
//!
//! All costs and totals are in **milliseconds** (u32) internally.  `Route`
//! exposes `total_travel_secs: f32` and a `travel_steps()` helper for
//! integration with the step clock.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use dt_core::{EdgeId, NodeId, RoutingAlgorithm, VehicleClass};

use crate::network::RoadNetwork;
use crate::SpatialError;

/// Speed cap for buses, m/s.
const BUS_MAX_MPS: f32 = 13.9;
/// Speed cap for trams, m/s.
const TRAM_MAX_MPS: f32 = 11.1;

// ── Route ─────────────────────────────────────────────────────────────────────

/// The result of a routing query: an ordered list of `EdgeId`s and the total
/// travel time for the requested vehicle class.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Route {
    /// Edges to traverse in order, from source to destination.
    pub edges: Vec<EdgeId>,
    pub total_travel_secs: f32,
}

impl Route {
    /// Travel time in whole steps, rounded up.
    pub fn travel_steps(&self, steps_per_second: u32) -> u64 {
        (self.total_travel_secs * steps_per_second as f32).ceil() as u64
    }

    /// `true` if the source and destination are the same node.
    pub fn is_trivial(&self) -> bool {
        self.edges.is_empty()
    }
}

// ── Router trait ──────────────────────────────────────────────────────────────

/// Pluggable routing engine.
///
/// Implementations must be `Send + Sync` so one router can be shared by the
/// Rayon threads of a local simulation.
pub trait Router: Send + Sync {
    /// Compute a route from `from` to `to` for the given vehicle class.
    ///
    /// `from == to` yields an empty route rather than an error.
    fn route(
        &self,
        network: &RoadNetwork,
        from: NodeId,
        to: NodeId,
        class: VehicleClass,
    ) -> Result<Route, SpatialError>;
}

/// The router a run's `routing_algorithm` setting selects.
pub fn router_for(algorithm: RoutingAlgorithm, seed: u64) -> Box<dyn Router> {
    match algorithm {
        RoutingAlgorithm::Dijkstra   => Box::new(DijkstraRouter),
        RoutingAlgorithm::RandomAStar => Box::new(RandomAStarRouter::new(seed)),
    }
}

// ── DijkstraRouter ────────────────────────────────────────────────────────────

/// Standard Dijkstra's algorithm over the CSR road graph.
///
/// | Class   | Cost                                      |
/// |---------|-------------------------------------------|
/// | Private | `edge_travel_ms`                          |
/// | Bus     | free-flow time, capped at 13.9 m/s        |
/// | Tram    | free-flow time, capped at 11.1 m/s        |
pub struct DijkstraRouter;

impl Router for DijkstraRouter {
    fn route(
        &self,
        network: &RoadNetwork,
        from: NodeId,
        to: NodeId,
        class: VehicleClass,
    ) -> Result<Route, SpatialError> {
        search(network, from, to, |e| edge_cost_ms(network, e, class), |_| 0)
    }
}

// ── RandomAStarRouter ─────────────────────────────────────────────────────────

/// A* with a straight-line heuristic over randomly perturbed edge costs.
///
/// Each query draws a fresh salt from `(seed, from, to)`, so the same query
/// always yields the same route while different origin/destination pairs see
/// independent perturbations.  Costs are scaled by a factor in
/// `[1.0, 1.0 + jitter)`, which keeps the heuristic admissible.
pub struct RandomAStarRouter {
    seed:   u64,
    jitter: f32,
}

impl RandomAStarRouter {
    pub fn new(seed: u64) -> Self {
        Self { seed, jitter: 0.3 }
    }

    pub fn with_jitter(mut self, jitter: f32) -> Self {
        self.jitter = jitter.max(0.0);
        self
    }
}

impl Router for RandomAStarRouter {
    fn route(
        &self,
        network: &RoadNetwork,
        from: NodeId,
        to: NodeId,
        class: VehicleClass,
    ) -> Result<Route, SpatialError> {
        if from.index() >= network.node_count() {
            return Err(SpatialError::NodeNotFound(from));
        }
        if to.index() >= network.node_count() {
            return Err(SpatialError::NodeNotFound(to));
        }
        let salt = splitmix64(self.seed ^ (((from.0 as u64) << 32) | to.0 as u64));
        let goal = network.node_pos[to.index()];
        let max_mps = network
            .edges()
            .map(|e| network.edge_speed_mps(e))
            .fold(1.0_f32, f32::max);

        let mut route = search(
            network,
            from,
            to,
            |e| {
                let unit = (splitmix64(salt ^ e.0 as u64) >> 40) as f32 / (1u64 << 24) as f32;
                (edge_cost_ms(network, e, class) as f32 * (1.0 + self.jitter * unit)) as u32
            },
            |n| (network.node_pos[n.index()].distance_m(goal) / max_mps * 1000.0) as u32,
        )?;
        // Report unperturbed time.
        route.total_travel_secs = route
            .edges
            .iter()
            .map(|&e| edge_cost_ms(network, e, class) as f32 / 1000.0)
            .sum();
        Ok(route)
    }
}

// ── Search internals ──────────────────────────────────────────────────────────

/// Edge cost in milliseconds for the given class.
#[inline]
fn edge_cost_ms(network: &RoadNetwork, edge: EdgeId, class: VehicleClass) -> u32 {
    let free_flow = network.edge_travel_ms[edge.index()];
    let capped = |cap: f32| {
        let at_cap = (network.edge_length_m[edge.index()] / cap * 1000.0) as u32;
        free_flow.max(at_cap)
    };
    match class {
        VehicleClass::Private => free_flow,
        VehicleClass::Bus     => capped(BUS_MAX_MPS),
        VehicleClass::Tram    => capped(TRAM_MAX_MPS),
    }
}

/// Best-first search.  A zero heuristic makes this plain Dijkstra.
fn search(
    network: &RoadNetwork,
    from: NodeId,
    to: NodeId,
    cost: impl Fn(EdgeId) -> u32,
    heuristic: impl Fn(NodeId) -> u32,
) -> Result<Route, SpatialError> {
    let n = network.node_count();
    for node in [from, to] {
        if node.index() >= n {
            return Err(SpatialError::NodeNotFound(node));
        }
    }
    if from == to {
        return Ok(Route { edges: vec![], total_travel_secs: 0.0 });
    }

    let mut dist      = vec![u32::MAX; n];
    let mut prev_edge = vec![EdgeId::INVALID; n];
    dist[from.index()] = 0;

    // Min-heap on (estimate, node); NodeId breaks ties deterministically.
    let mut heap: BinaryHeap<Reverse<(u32, NodeId)>> = BinaryHeap::new();
    heap.push(Reverse((heuristic(from), from)));

    while let Some(Reverse((_, node))) = heap.pop() {
        let g = dist[node.index()];
        if node == to {
            return Ok(reconstruct(network, &prev_edge, to, g));
        }
        for edge in network.out_edges(node) {
            let neighbor = network.edge_to[edge.index()];
            let new_cost = g.saturating_add(cost(edge));
            if new_cost < dist[neighbor.index()] {
                dist[neighbor.index()] = new_cost;
                prev_edge[neighbor.index()] = edge;
                heap.push(Reverse((new_cost.saturating_add(heuristic(neighbor)), neighbor)));
            }
        }
    }

    Err(SpatialError::NoRoute { from, to })
}

fn reconstruct(network: &RoadNetwork, prev_edge: &[EdgeId], to: NodeId, total_ms: u32) -> Route {
    let mut edges = Vec::new();
    let mut cur = to;
    loop {
        let e = prev_edge[cur.index()];
        if e == EdgeId::INVALID {
            break;
        }
        edges.push(e);
        cur = network.edge_from[e.index()];
    }
    edges.reverse();
    Route {
        edges,
        total_travel_secs: total_ms as f32 / 1000.0,
    }
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}
