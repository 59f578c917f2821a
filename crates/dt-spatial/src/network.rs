//! The shared road graph every worker and the server build identically.
//!
//! # Layout
//!
//! Outgoing edges are stored CSR-style: node `n` owns the edge ids
//!
//! ```text
//! node_out_start[n] .. node_out_start[n + 1]
//! ```
//!
//! All edge arrays (`edge_from`, `edge_to`, `edge_length_m`, `edge_lanes`,
//! `edge_travel_ms`) are sorted by source node and indexed by `EdgeId`.
//! Every worker builds the network from the same description, so edge ids
//! agree across processes and can travel on the wire.
//!
//! # Spatial index
//!
//! An R-tree (via `rstar`) over node positions answers nearest-node queries.
//! Spatial windows use `nodes_in_box`, a linear scan, to pick trip endpoints.

use rstar::{PointDistance, RTree, RTreeObject, AABB};

use dt_core::{BoundingBox, EdgeId, GeoPoint, NodeId, RoadGraphSource, RoadGraphSpec};

use crate::{SpatialError, SpatialResult};

/// Default urban free-flow speed for generated roads (50 km/h).
pub const DEFAULT_SPEED_MPS: f32 = 13.9;

/// Metres per degree of latitude.
const M_PER_DEG_LAT: f32 = 111_195.0;

/// South-west corner of the builtin grid.
const BUILTIN_ORIGIN: GeoPoint = GeoPoint { lat: 30.68, lon: -88.06 };

// ── Spatial index entry ───────────────────────────────────────────────────────

#[derive(Clone)]
struct NodeEntry {
    /// `[lat, lon]`
    point: [f32; 2],
    id: NodeId,
}

impl RTreeObject for NodeEntry {
    type Envelope = AABB<[f32; 2]>;
    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.point)
    }
}

impl PointDistance for NodeEntry {
    /// Squared distance in degrees; only used to rank candidates.
    fn distance_2(&self, point: &[f32; 2]) -> f32 {
        let dlat = self.point[0] - point[0];
        let dlon = self.point[1] - point[1];
        dlat * dlat + dlon * dlon
    }
}

// ── RoadNetwork ───────────────────────────────────────────────────────────────

/// Directed road graph in CSR format plus a spatial index.
///
/// Read-only once built.  All fields are `pub` for direct indexed access on
/// hot paths.  Do not construct directly; use [`RoadNetworkBuilder`].
pub struct RoadNetwork {
    /// Intersection positions, by `NodeId`.
    pub node_pos: Vec<GeoPoint>,

    /// `node_count + 1` offsets into the edge arrays.
    pub node_out_start: Vec<u32>,

    // Per-edge columns, by `EdgeId`.
    pub edge_from: Vec<NodeId>,
    pub edge_to: Vec<NodeId>,
    pub edge_length_m: Vec<f32>,
    /// Number of lanes in the direction of travel.
    pub edge_lanes: Vec<u8>,
    /// Free-flow travel time in milliseconds.  Default Dijkstra cost.
    pub edge_travel_ms: Vec<u32>,

    spatial_idx: RTree<NodeEntry>,
}

impl RoadNetwork {
    /// No intersections, no roads.
    pub fn empty() -> Self {
        RoadNetworkBuilder::new().build()
    }

    /// A Manhattan grid of `rows × cols` intersections `spacing_m` apart,
    /// joined by two-lane bidirectional roads.
    ///
    /// Deterministic: every process that calls this with the same arguments
    /// gets identical node and edge ids.
    pub fn builtin_grid(rows: u32, cols: u32, spacing_m: f32) -> Self {
        let dlat = spacing_m / M_PER_DEG_LAT;
        let dlon = spacing_m / (M_PER_DEG_LAT * BUILTIN_ORIGIN.lat.to_radians().cos());
        let travel_ms = (spacing_m / DEFAULT_SPEED_MPS * 1000.0) as u32;

        let mut b = RoadNetworkBuilder::with_capacity(
            (rows * cols) as usize,
            (4 * rows * cols) as usize,
        );
        let mut ids = Vec::with_capacity((rows * cols) as usize);
        for r in 0..rows {
            for c in 0..cols {
                ids.push(b.add_node(GeoPoint::new(
                    BUILTIN_ORIGIN.lat + r as f32 * dlat,
                    BUILTIN_ORIGIN.lon + c as f32 * dlon,
                )));
            }
        }
        let at = |r: u32, c: u32| ids[(r * cols + c) as usize];
        for r in 0..rows {
            for c in 0..cols {
                if c + 1 < cols {
                    b.add_road(at(r, c), at(r, c + 1), spacing_m, 2, travel_ms);
                }
                if r + 1 < rows {
                    b.add_road(at(r, c), at(r + 1, c), spacing_m, 2, travel_ms);
                }
            }
        }
        b.build()
    }

    /// Build from a serialisable graph description, validating node ids.
    pub fn from_spec(spec: &RoadGraphSpec) -> SpatialResult<Self> {
        let mut b = RoadNetworkBuilder::with_capacity(spec.nodes.len(), spec.roads.len() * 2);
        for &p in &spec.nodes {
            b.add_node(p);
        }
        for road in &spec.roads {
            for n in [road.from, road.to] {
                if n.index() >= spec.nodes.len() {
                    return Err(SpatialError::NodeNotFound(n));
                }
            }
            if road.lanes == 0 || road.length_m <= 0.0 || road.speed_mps <= 0.0 {
                return Err(SpatialError::InvalidGraph(format!(
                    "road {} -> {} needs positive length, lanes and speed",
                    road.from, road.to
                )));
            }
            let travel_ms = (road.length_m / road.speed_mps * 1000.0) as u32;
            if road.bidirectional {
                b.add_road(road.from, road.to, road.length_m, road.lanes, travel_ms);
            } else {
                b.add_directed_edge(road.from, road.to, road.length_m, road.lanes, travel_ms);
            }
        }
        Ok(b.build())
    }

    /// Resolve a setup's graph source.  `Empty` yields `None`, meaning "keep
    /// the network already loaded".
    pub fn from_source(source: &RoadGraphSource) -> SpatialResult<Option<Self>> {
        match source {
            RoadGraphSource::Builtin { rows, cols, spacing_m } => {
                Ok(Some(Self::builtin_grid(*rows, *cols, *spacing_m)))
            }
            RoadGraphSource::Inline(spec) => Self::from_spec(spec).map(Some),
            RoadGraphSource::Empty => Ok(None),
        }
    }

    // ── Graph dimensions ──────────────────────────────────────────────────

    pub fn node_count(&self) -> usize {
        self.node_pos.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_to.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_pos.is_empty()
    }

    /// Every edge id, in order.
    pub fn edges(&self) -> impl Iterator<Item = EdgeId> + '_ {
        (0..self.edge_count()).map(|i| EdgeId(i as u32))
    }

    // ── Graph traversal ───────────────────────────────────────────────────

    /// Iterator over the `EdgeId`s of all outgoing edges from `node`.
    #[inline]
    pub fn out_edges(&self, node: NodeId) -> impl Iterator<Item = EdgeId> + '_ {
        let start = self.node_out_start[node.index()] as usize;
        let end   = self.node_out_start[node.index() + 1] as usize;
        (start..end).map(|i| EdgeId(i as u32))
    }

    #[inline]
    pub fn out_degree(&self, node: NodeId) -> usize {
        let start = self.node_out_start[node.index()] as usize;
        let end   = self.node_out_start[node.index() + 1] as usize;
        end - start
    }

    /// `edge` itself if it exists in this network.
    #[inline]
    pub fn check_edge(&self, edge: EdgeId) -> SpatialResult<EdgeId> {
        if edge.index() < self.edge_count() {
            Ok(edge)
        } else {
            Err(SpatialError::EdgeNotFound(edge))
        }
    }

    // ── Edge attributes ───────────────────────────────────────────────────

    /// Summed length of all lanes of `edge`, in metres.
    #[inline]
    pub fn lane_length(&self, edge: EdgeId) -> f32 {
        self.edge_length_m[edge.index()] * self.edge_lanes[edge.index()] as f32
    }

    /// Lane length of the whole network.
    pub fn total_lane_length(&self) -> f64 {
        self.edges().map(|e| self.lane_length(e) as f64).sum()
    }

    /// Free-flow speed of `edge` in metres per second.
    #[inline]
    pub fn edge_speed_mps(&self, edge: EdgeId) -> f32 {
        let ms = self.edge_travel_ms[edge.index()].max(1);
        self.edge_length_m[edge.index()] / (ms as f32 / 1000.0)
    }

    /// The directed edge `from → to`, if present.
    pub fn find_edge(&self, from: NodeId, to: NodeId) -> Option<EdgeId> {
        self.out_edges(from).find(|e| self.edge_to[e.index()] == to)
    }

    // ── Spatial queries ───────────────────────────────────────────────────

    /// Smallest box containing every node, or `None` for an empty network.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(self.node_pos.iter().copied())
    }

    /// Every node inside `bbox` (bounds inclusive), sorted by id.
    pub fn nodes_in_box(&self, bbox: &BoundingBox) -> Vec<NodeId> {
        self.node_pos
            .iter()
            .enumerate()
            .filter(|(_, p)| bbox.contains(**p))
            .map(|(i, _)| NodeId(i as u32))
            .collect()
    }

    /// Return the `NodeId` of the nearest road node to `pos`.
    ///
    /// Returns `None` only if the network has no nodes.
    pub fn snap_to_node(&self, pos: GeoPoint) -> Option<NodeId> {
        self.spatial_idx
            .nearest_neighbor(&[pos.lat, pos.lon])
            .map(|e| e.id)
    }

    /// Return up to `k` nearest nodes to `pos`, sorted by ascending distance.
    pub fn k_nearest_nodes(&self, pos: GeoPoint, k: usize) -> Vec<NodeId> {
        self.spatial_idx
            .nearest_neighbor_iter(&[pos.lat, pos.lon])
            .take(k)
            .map(|e| e.id)
            .collect()
    }
}

// ── RoadNetworkBuilder ────────────────────────────────────────────────────────

/// Collects intersections and roads; [`build`](Self::build) freezes them.
///
/// ```
/// use dt_core::GeoPoint;
/// use dt_spatial::RoadNetworkBuilder;
///
/// let mut b = RoadNetworkBuilder::new();
/// let west = b.add_node(GeoPoint::new(30.680, -88.060));
/// let east = b.add_node(GeoPoint::new(30.680, -88.058));
/// b.add_road(west, east, 190.0, 1, 14_000);
/// let net = b.build();
/// assert_eq!((net.node_count(), net.edge_count()), (2, 2));
/// ```
pub struct RoadNetworkBuilder {
    nodes:     Vec<GeoPoint>,
    raw_edges: Vec<RawEdge>,
}

struct RawEdge {
    from:      NodeId,
    to:        NodeId,
    length_m:  f32,
    lanes:     u8,
    travel_ms: u32,
}

impl RoadNetworkBuilder {
    pub fn new() -> Self {
        Self { nodes: Vec::new(), raw_edges: Vec::new() }
    }

    pub fn with_capacity(nodes: usize, edges: usize) -> Self {
        Self {
            nodes:     Vec::with_capacity(nodes),
            raw_edges: Vec::with_capacity(edges),
        }
    }

    /// Ids are handed out in insertion order from 0.
    pub fn add_node(&mut self, pos: GeoPoint) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(pos);
        id
    }

    /// One-way road.  At least one lane.
    pub fn add_directed_edge(&mut self, from: NodeId, to: NodeId, length_m: f32, lanes: u8, travel_ms: u32) {
        self.raw_edges.push(RawEdge { from, to, length_m, lanes: lanes.max(1), travel_ms });
    }

    /// Two-way road, the same in both directions.
    pub fn add_road(&mut self, a: NodeId, b: NodeId, length_m: f32, lanes: u8, travel_ms: u32) {
        self.add_directed_edge(a, b, length_m, lanes, travel_ms);
        self.add_directed_edge(b, a, length_m, lanes, travel_ms);
    }

    pub fn node_pos(&self, id: NodeId) -> GeoPoint {
        self.nodes[id.index()]
    }

    pub fn node_count(&self) -> usize { self.nodes.len() }
    pub fn edge_count(&self) -> usize { self.raw_edges.len() }

    /// Edges are stably sorted by source node, so insertion order decides
    /// the ids of a node's outgoing edges.
    pub fn build(self) -> RoadNetwork {
        let node_count = self.nodes.len();
        let edge_count = self.raw_edges.len();

        let mut raw = self.raw_edges;
        raw.sort_by_key(|e| e.from.0);

        let edge_from:      Vec<NodeId> = raw.iter().map(|e| e.from).collect();
        let edge_to:        Vec<NodeId> = raw.iter().map(|e| e.to).collect();
        let edge_length_m:  Vec<f32>    = raw.iter().map(|e| e.length_m).collect();
        let edge_lanes:     Vec<u8>     = raw.iter().map(|e| e.lanes).collect();
        let edge_travel_ms: Vec<u32>    = raw.iter().map(|e| e.travel_ms).collect();

        let mut node_out_start = vec![0u32; node_count + 1];
        for e in &raw {
            node_out_start[e.from.index() + 1] += 1;
        }
        for i in 1..=node_count {
            node_out_start[i] += node_out_start[i - 1];
        }
        debug_assert_eq!(node_out_start[node_count] as usize, edge_count);

        let entries: Vec<NodeEntry> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, &pos)| NodeEntry {
                point: [pos.lat, pos.lon],
                id: NodeId(i as u32),
            })
            .collect();
        let spatial_idx = RTree::bulk_load(entries);

        RoadNetwork {
            node_pos: self.nodes,
            node_out_start,
            edge_from,
            edge_to,
            edge_length_m,
            edge_lanes,
            edge_travel_ms,
            spatial_idx,
        }
    }
}

impl Default for RoadNetworkBuilder {
    fn default() -> Self {
        Self::new()
    }
}
