//! Unit tests for dt-spatial.
//!
//! All tests use hand-crafted or builtin networks.

#[cfg(test)]
mod helpers {
    use dt_core::GeoPoint;
    use crate::{RoadNetwork, RoadNetworkBuilder};

    /// Build a small network for testing.
    ///
    /// Nodes (lat, lon):
    ///   0:(0,0)  1:(0,1)  2:(0,2)
    ///   3:(1,0)           4:(1,2)
    ///
    /// Undirected single-lane edges: 0-1, 1-2, 0-3, 2-4, 3-4
    ///
    /// Path via 0→1→2→4: 10+10+10 = 30 s
    /// Path via 0→3→4:   50+10    = 60 s
    pub fn grid_network() -> (RoadNetwork, [dt_core::NodeId; 5]) {
        let mut b = RoadNetworkBuilder::new();

        let n0 = b.add_node(GeoPoint::new(0.0, 0.0));
        let n1 = b.add_node(GeoPoint::new(0.0, 1.0));
        let n2 = b.add_node(GeoPoint::new(0.0, 2.0));
        let n3 = b.add_node(GeoPoint::new(1.0, 0.0));
        let n4 = b.add_node(GeoPoint::new(1.0, 2.0));

        b.add_road(n0, n1, 100.0, 1, 10_000);
        b.add_road(n1, n2, 100.0, 1, 10_000);
        b.add_road(n2, n4, 100.0, 1, 10_000);
        b.add_road(n0, n3, 500.0, 1, 50_000); // long slow road
        b.add_road(n3, n4, 100.0, 1, 10_000);

        (b.build(), [n0, n1, n2, n3, n4])
    }
}

// ── Builder & network structure ────────────────────────────────────────────────

#[cfg(test)]
mod builder {
    use dt_core::GeoPoint;
    use crate::RoadNetworkBuilder;

    #[test]
    fn empty_build() {
        let net = RoadNetworkBuilder::new().build();
        assert_eq!(net.node_count(), 0);
        assert_eq!(net.edge_count(), 0);
        assert!(net.is_empty());
        assert!(net.bounding_box().is_none());
    }

    #[test]
    fn single_road() {
        let mut b = RoadNetworkBuilder::new();
        let a = b.add_node(GeoPoint::new(30.0, -88.0));
        let c = b.add_node(GeoPoint::new(30.1, -88.0));
        b.add_road(a, c, 1_000.0, 3, 75_000);
        let net = b.build();
        assert_eq!(net.node_count(), 2);
        assert_eq!(net.edge_count(), 2);
        assert_eq!(net.lane_length(dt_core::EdgeId(0)), 3_000.0);
        assert_eq!(net.total_lane_length(), 6_000.0);
    }

    #[test]
    fn csr_out_edges() {
        let (net, [n0, n1, n2, n3, n4]) = super::helpers::grid_network();
        assert_eq!(net.out_degree(n0), 2);
        assert_eq!(net.out_degree(n1), 2);
        assert_eq!(net.out_degree(n2), 2);
        assert_eq!(net.out_degree(n3), 2);
        assert_eq!(net.out_degree(n4), 2);
        for e in net.out_edges(n0) {
            assert_eq!(net.edge_from[e.index()], n0);
        }
    }

    #[test]
    fn find_edge_is_directed() {
        let mut b = RoadNetworkBuilder::new();
        let a = b.add_node(GeoPoint::new(0.0, 0.0));
        let c = b.add_node(GeoPoint::new(0.0, 1.0));
        b.add_directed_edge(a, c, 100.0, 1, 10_000);
        let net = b.build();
        assert!(net.find_edge(a, c).is_some());
        assert!(net.find_edge(c, a).is_none());
        assert_eq!(net.out_degree(c), 0);
    }

    #[test]
    fn zero_lanes_clamped_to_one() {
        let mut b = RoadNetworkBuilder::new();
        let a = b.add_node(GeoPoint::new(0.0, 0.0));
        let c = b.add_node(GeoPoint::new(0.0, 1.0));
        b.add_directed_edge(a, c, 100.0, 0, 10_000);
        assert_eq!(b.build().edge_lanes[0], 1);
    }

    #[test]
    fn edge_speed_from_travel_time() {
        let (net, [n0, n1, ..]) = super::helpers::grid_network();
        let e = net.find_edge(n0, n1).unwrap();
        assert!((net.edge_speed_mps(e) - 10.0).abs() < 1e-4);
    }
}

// ── Builtin grid and graph specs ──────────────────────────────────────────────

#[cfg(test)]
mod construction {
    use dt_core::{GeoPoint, NodeId, RoadGraphSource, RoadGraphSpec, RoadSpec};
    use crate::{RoadNetwork, SpatialError};

    #[test]
    fn builtin_grid_shape() {
        let net = RoadNetwork::builtin_grid(3, 4, 200.0);
        assert_eq!(net.node_count(), 12);
        // Horizontal: 3 rows × 3 links; vertical: 2 × 4 links; both directions.
        assert_eq!(net.edge_count(), 2 * (3 * 3 + 2 * 4));
        assert!(net.edges().all(|e| net.edge_lanes[e.index()] == 2));
    }

    #[test]
    fn builtin_grid_is_deterministic() {
        let a = RoadNetwork::builtin_grid(5, 5, 150.0);
        let b = RoadNetwork::builtin_grid(5, 5, 150.0);
        assert_eq!(a.edge_from, b.edge_from);
        assert_eq!(a.edge_to, b.edge_to);
        assert_eq!(a.node_pos, b.node_pos);
    }

    #[test]
    fn builtin_grid_extent_matches_spacing() {
        let net = RoadNetwork::builtin_grid(3, 3, 500.0);
        let bbox = net.bounding_box().unwrap();
        assert!((bbox.height_m() - 1_000.0).abs() < 10.0, "got {}", bbox.height_m());
        assert!((bbox.width_m() - 1_000.0).abs() < 10.0, "got {}", bbox.width_m());
    }

    fn two_node_spec(to: NodeId) -> RoadGraphSpec {
        RoadGraphSpec {
            nodes: vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 0.01)],
            roads: vec![RoadSpec {
                from: NodeId(0),
                to,
                length_m: 1_000.0,
                lanes: 1,
                speed_mps: 10.0,
                bidirectional: false,
            }],
        }
    }

    #[test]
    fn from_spec_builds_travel_time() {
        let net = RoadNetwork::from_spec(&two_node_spec(NodeId(1))).unwrap();
        assert_eq!(net.edge_count(), 1);
        assert_eq!(net.edge_travel_ms[0], 100_000);
    }

    #[test]
    fn from_spec_rejects_unknown_node() {
        let err = RoadNetwork::from_spec(&two_node_spec(NodeId(9))).err();
        assert!(matches!(err, Some(SpatialError::NodeNotFound(NodeId(9)))));
    }

    #[test]
    fn empty_source_keeps_current_network() {
        assert!(RoadNetwork::from_source(&RoadGraphSource::Empty).unwrap().is_none());
        let net = RoadNetwork::from_source(&RoadGraphSource::default()).unwrap().unwrap();
        assert_eq!(net.node_count(), 64);
    }
}

// ── Spatial queries ───────────────────────────────────────────────────────────

#[cfg(test)]
mod spatial {
    use dt_core::{BoundingBox, GeoPoint};
    use crate::RoadNetworkBuilder;

    #[test]
    fn snap_nearest() {
        let (net, [n0, n1, ..]) = super::helpers::grid_network();
        assert_eq!(net.snap_to_node(GeoPoint::new(0.0, 0.0)), Some(n0));
        assert_eq!(net.snap_to_node(GeoPoint::new(0.0, 0.4)), Some(n0));
        assert_eq!(net.snap_to_node(GeoPoint::new(0.0, 0.6)), Some(n1));
    }

    #[test]
    fn empty_network_returns_none() {
        let net = RoadNetworkBuilder::new().build();
        assert!(net.snap_to_node(GeoPoint::new(0.0, 0.0)).is_none());
    }

    #[test]
    fn k_nearest_order() {
        let (net, nodes) = super::helpers::grid_network();
        let nearest = net.k_nearest_nodes(GeoPoint::new(0.0, 0.0), 2);
        assert_eq!(nearest[0], nodes[0]);
        // n1 and n3 are equidistant in lat/lon.
        assert!(nearest[1] == nodes[1] || nearest[1] == nodes[3]);
    }

    #[test]
    fn bounding_box_covers_all_nodes() {
        let (net, _) = super::helpers::grid_network();
        assert_eq!(net.bounding_box(), Some(BoundingBox::new(0.0, 0.0, 1.0, 2.0)));
    }

    #[test]
    fn nodes_in_box_inclusive_and_sorted() {
        let (net, [n0, n1, n2, n3, _]) = super::helpers::grid_network();
        let left = net.nodes_in_box(&BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        assert_eq!(left, vec![n0, n1, n3]);
        let bottom = net.nodes_in_box(&BoundingBox::new(-0.5, 0.0, 0.5, 2.0));
        assert_eq!(bottom, vec![n0, n1, n2]);
        assert!(net.nodes_in_box(&BoundingBox::new(5.0, 5.0, 6.0, 6.0)).is_empty());
    }
}

// ── Routing ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod routing {
    use dt_core::{GeoPoint, NodeId, RoutingAlgorithm, VehicleClass};
    use crate::{router_for, DijkstraRouter, RandomAStarRouter, RoadNetwork, RoadNetworkBuilder, Router, SpatialError};

    #[test]
    fn trivial_same_node() {
        let (net, [n0, ..]) = super::helpers::grid_network();
        let r = DijkstraRouter.route(&net, n0, n0, VehicleClass::Private).unwrap();
        assert!(r.is_trivial());
        assert_eq!(r.total_travel_secs, 0.0);
    }

    #[test]
    fn shortest_path_correct() {
        let (net, [n0, n1, n2, _, n4]) = super::helpers::grid_network();
        let route = DijkstraRouter.route(&net, n0, n4, VehicleClass::Private).unwrap();
        assert_eq!(route.total_travel_secs, 30.0);
        assert_eq!(route.edges.len(), 3);
        assert_eq!(net.edge_from[route.edges[0].index()], n0);
        assert_eq!(net.edge_to[route.edges[0].index()], n1);
        assert_eq!(net.edge_to[route.edges[1].index()], n2);
        assert_eq!(net.edge_to[route.edges[2].index()], n4);
    }

    #[test]
    fn no_route_disconnected() {
        let mut b = RoadNetworkBuilder::new();
        let a = b.add_node(GeoPoint::new(0.0, 0.0));
        let c = b.add_node(GeoPoint::new(1.0, 0.0));
        let net = b.build();
        let result = DijkstraRouter.route(&net, a, c, VehicleClass::Private);
        assert!(matches!(result, Err(SpatialError::NoRoute { .. })));
    }

    #[test]
    fn unknown_node_is_an_error() {
        let (net, [n0, ..]) = super::helpers::grid_network();
        let result = DijkstraRouter.route(&net, n0, NodeId(99), VehicleClass::Private);
        assert!(matches!(result, Err(SpatialError::NodeNotFound(NodeId(99)))));
    }

    #[test]
    fn travel_steps_ceiling() {
        let (net, [n0, _, _, _, n4]) = super::helpers::grid_network();
        let route = DijkstraRouter.route(&net, n0, n4, VehicleClass::Private).unwrap();
        assert_eq!(route.travel_steps(1), 30);
        assert_eq!(route.travel_steps(5), 150);
    }

    #[test]
    fn tram_slower_than_private_on_fast_roads() {
        // 1 km at 25 m/s: trams are capped at 11.1 m/s.
        let mut b = RoadNetworkBuilder::new();
        let a = b.add_node(GeoPoint::new(0.0, 0.0));
        let c = b.add_node(GeoPoint::new(0.0, 0.01));
        b.add_road(a, c, 1_000.0, 1, 40_000);
        let net = b.build();
        let car  = DijkstraRouter.route(&net, a, c, VehicleClass::Private).unwrap();
        let tram = DijkstraRouter.route(&net, a, c, VehicleClass::Tram).unwrap();
        assert!(tram.total_travel_secs > car.total_travel_secs);
    }

    #[test]
    fn random_astar_is_repeatable_and_connected() {
        let net = RoadNetwork::builtin_grid(6, 6, 200.0);
        let router = RandomAStarRouter::new(7);
        let (from, to) = (NodeId(0), NodeId(35));
        let a = router.route(&net, from, to, VehicleClass::Private).unwrap();
        let b = router.route(&net, from, to, VehicleClass::Private).unwrap();
        assert_eq!(a.edges, b.edges);
        assert_eq!(net.edge_from[a.edges[0].index()], from);
        assert_eq!(net.edge_to[a.edges[a.edges.len() - 1].index()], to);
        for w in a.edges.windows(2) {
            assert_eq!(net.edge_to[w[0].index()], net.edge_from[w[1].index()]);
        }
    }

    #[test]
    fn random_astar_never_beats_dijkstra() {
        let net = RoadNetwork::builtin_grid(6, 6, 200.0);
        let exact = router_for(RoutingAlgorithm::Dijkstra, 0)
            .route(&net, NodeId(0), NodeId(35), VehicleClass::Private)
            .unwrap();
        let jittered = router_for(RoutingAlgorithm::RandomAStar, 3)
            .route(&net, NodeId(0), NodeId(35), VehicleClass::Private)
            .unwrap();
        assert!(jittered.total_travel_secs + 1e-3 >= exact.total_travel_secs);
    }
}
