//! Unit tests for dt-partition.

#[cfg(test)]
mod helpers {
    use dt_core::{SimRng, VehicleQuotas};
    use dt_spatial::RoadNetwork;

    use crate::{partition_grid, Grid, Ownership, Partition};

    /// A partition built straight from per-cell lane lengths.
    pub fn partition_from_lengths(rows: u32, cols: u32, lengths: &[f64], workers: usize) -> Partition {
        let grid = Grid::from_lane_lengths(rows, cols, lengths);
        let areas = partition_grid(&grid, workers, &mut SimRng::new(1)).unwrap();
        Partition { grid, areas, ownership: Ownership::default() }
    }

    pub fn grid_net() -> RoadNetwork {
        RoadNetwork::builtin_grid(4, 4, 200.0)
    }

    pub fn quotas(private: u64, tram: u64) -> VehicleQuotas {
        VehicleQuotas::new(private, tram, 0)
    }
}

// ── Grid ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod grid {
    use dt_spatial::RoadNetwork;

    use crate::{Grid, PartitionError};

    #[test]
    fn starts_at_workers_squared() {
        let net = super::helpers::grid_net(); // 600 m across
        let grid = Grid::build(&net, 2, 500.0).unwrap();
        assert_eq!((grid.rows, grid.cols), (2, 2));
        assert_eq!(grid.cell_count(), 4);
    }

    #[test]
    fn grows_until_cells_fit() {
        let net = super::helpers::grid_net();
        let grid = Grid::build(&net, 1, 250.0).unwrap();
        // 600 m / 250 m → 3 rows and 3 columns.
        assert_eq!((grid.rows, grid.cols), (3, 3));
        for cell in &grid.cells {
            assert!(cell.bbox.height_m() <= 250.0 + 1.0);
            assert!(cell.bbox.width_m() <= 250.0 + 1.0);
        }
    }

    #[test]
    fn every_node_in_exactly_one_cell() {
        let net = super::helpers::grid_net();
        let grid = Grid::build(&net, 3, 500.0).unwrap();
        let mut seen: Vec<_> = grid.cells.iter().flat_map(|c| c.nodes.iter().copied()).collect();
        seen.sort_unstable();
        assert_eq!(seen.len(), net.node_count());
        seen.dedup();
        assert_eq!(seen.len(), net.node_count());
    }

    #[test]
    fn lane_length_conserved() {
        let net = super::helpers::grid_net();
        let grid = Grid::build(&net, 2, 500.0).unwrap();
        assert!((grid.total_lane_length() - net.total_lane_length()).abs() < 1e-3);
    }

    #[test]
    fn oversized_grid_rejected() {
        // 100 km across with 1 m cells.
        let net = RoadNetwork::builtin_grid(2, 2, 100_000.0);
        let err = Grid::build(&net, 2, 1.0).err();
        assert!(matches!(err, Some(PartitionError::GridTooLarge { max: crate::MAX_GRID_CELLS, .. })));
    }

    #[test]
    fn too_many_workers_cannot_overflow_the_grid() {
        let net = super::helpers::grid_net();
        assert!(matches!(Grid::build(&net, 70_000, 500.0), Err(PartitionError::GridTooLarge { .. })));
    }

    #[test]
    fn empty_network_rejected() {
        let err = Grid::build(&RoadNetwork::empty(), 2, 500.0).err();
        assert!(matches!(err, Some(PartitionError::EmptyNetwork)));
    }
}

// ── Partitioner ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod partitioner {
    use dt_core::{SimRng, WorkerIndex};

    use crate::{partition, partition_grid, Grid, PartitionError};

    #[test]
    fn four_equal_cells_split_evenly() {
        let p = super::helpers::partition_from_lengths(2, 2, &[10.0; 4], 2);
        assert_eq!(p.areas[0].cells, vec![0, 1]);
        assert_eq!(p.areas[1].cells, vec![2, 3]);
        assert_eq!(p.areas[0].lane_length, 20.0);
        assert_eq!(p.areas[1].lane_length, 20.0);
        assert_eq!(p.lane_length_ratios(), vec![0.5, 0.5]);
    }

    #[test]
    fn every_cell_assigned_once_for_any_seed() {
        let lengths = [3.0, 0.0, 9.0, 1.0, 7.0, 2.0, 0.0, 5.0, 4.0];
        let grid = Grid::from_lane_lengths(3, 3, &lengths);
        for workers in 1..=9 {
            for seed in 0..20 {
                let areas = partition_grid(&grid, workers, &mut SimRng::new(seed)).unwrap();
                assert_eq!(areas.len(), workers);
                let mut cells: Vec<usize> = areas.iter().flat_map(|a| a.cells.iter().copied()).collect();
                cells.sort_unstable();
                assert_eq!(cells, (0..9).collect::<Vec<_>>());
                assert!(areas.iter().all(|a| !a.cells.is_empty()), "empty area: {workers} workers, seed {seed}");
                let sum: f64 = areas.iter().map(|a| a.lane_length).sum();
                assert_eq!(sum, lengths.iter().sum::<f64>());
            }
        }
    }

    #[test]
    fn overflow_tie_break_uses_both_outcomes() {
        // Share is 15; the second cell overflows worker 0's bucket.
        let grid = Grid::from_lane_lengths(1, 3, &[10.0, 10.0, 10.0]);
        let mut first_sizes = std::collections::BTreeSet::new();
        for seed in 0..64 {
            let areas = partition_grid(&grid, 2, &mut SimRng::new(seed)).unwrap();
            first_sizes.insert(areas[0].cells.len());
        }
        assert_eq!(first_sizes.into_iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn same_seed_same_partition() {
        let grid = Grid::from_lane_lengths(2, 3, &[4.0, 8.0, 1.0, 6.0, 3.0, 9.0]);
        let a = partition_grid(&grid, 3, &mut SimRng::new(5)).unwrap();
        let b = partition_grid(&grid, 3, &mut SimRng::new(5)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn too_many_workers_rejected() {
        let grid = Grid::from_lane_lengths(1, 2, &[1.0, 1.0]);
        let err = partition_grid(&grid, 3, &mut SimRng::new(0)).err();
        assert!(matches!(err, Some(PartitionError::TooManyWorkers { workers: 3, cells: 2 })));
    }

    #[test]
    fn ownership_covers_every_node() {
        let net = super::helpers::grid_net();
        let p = partition(&net, 2, 500.0, &mut SimRng::new(3)).unwrap();
        assert!(p.ownership.node_owners().iter().all(|w| w.0 < 2));
        let owned: usize = (0..2).map(|w| p.ownership.owned_edges(&net, WorkerIndex(w)).len()).sum();
        assert_eq!(owned, net.edge_count());
    }
}

// ── Balancer ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod balance {
    use dt_core::{
        BoundingBox, DriverProfile, EdgeId, ExternalRoute, RouteLeg, SimRng, SpatialWindows,
        Step, VehicleClass, VehicleQuotas, WorkerIndex,
    };
    use dt_spatial::RoadNetwork;

    use super::helpers::{partition_from_lengths, quotas};
    use crate::{apportion, assign_quotas, partition, PartitionError};

    #[test]
    fn apportion_remainder_to_last() {
        assert_eq!(apportion(100, &[0.3, 0.7]), vec![30, 70]);
        assert_eq!(apportion(10, &[0.3, 0.7]), vec![3, 7]);
        assert_eq!(apportion(10, &[1.0, 1.0, 1.0]), vec![3, 3, 4]);
        assert_eq!(apportion(0, &[1.0, 2.0]), vec![0, 0]);
    }

    #[test]
    fn apportion_skips_zero_weights() {
        assert_eq!(apportion(7, &[0.0, 1.0, 0.0]), vec![0, 7, 0]);
        assert_eq!(apportion(7, &[0.0, 0.0]), vec![0, 0]);
    }

    #[test]
    fn lane_length_mode_matches_ratios() {
        let p = partition_from_lengths(1, 2, &[3.0, 7.0], 2);
        assert_eq!(p.lane_length_ratios(), vec![0.3, 0.7]);
        let a = assign_quotas(&p, &RoadNetwork::empty(), quotas(100, 10), &SpatialWindows::default(), &[]).unwrap();
        assert_eq!(a.quotas[0], quotas(30, 3));
        assert_eq!(a.quotas[1], quotas(70, 7));
    }

    #[test]
    fn sums_are_exact() {
        let p = partition_from_lengths(3, 3, &[3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0, 5.0], 4);
        let global = VehicleQuotas::new(997, 31, 13);
        let a = assign_quotas(&p, &RoadNetwork::empty(), global, &SpatialWindows::default(), &[]).unwrap();
        let mut sum = VehicleQuotas::ZERO;
        for q in &a.quotas {
            sum.add(q);
        }
        assert_eq!(sum, global);
    }

    #[test]
    fn window_mode_ignores_workers_outside_windows() {
        let p = partition_from_lengths(1, 2, &[1.0, 99.0], 2);
        let windows = SpatialWindows {
            sources: vec![BoundingBox::new(0.1, 0.1, 0.9, 0.5)], // inside cell 0 only
            destinations: Vec::new(),
        };
        let a = assign_quotas(&p, &RoadNetwork::empty(), quotas(100, 10), &windows, &[]).unwrap();
        assert_eq!(a.quotas[0], quotas(100, 10));
        assert_eq!(a.quotas[1], VehicleQuotas::ZERO);
    }

    #[test]
    fn windows_off_the_map_rejected() {
        let p = partition_from_lengths(1, 2, &[1.0, 1.0], 2);
        let windows = SpatialWindows {
            sources: Vec::new(),
            destinations: vec![BoundingBox::new(50.0, 50.0, 51.0, 51.0)],
        };
        let err = assign_quotas(&p, &RoadNetwork::empty(), quotas(1, 0), &windows, &[]).err();
        assert!(matches!(err, Some(PartitionError::WindowsOutsideMap)));
    }

    fn route(id: &str, edges: &[EdgeId]) -> ExternalRoute {
        ExternalRoute {
            id: id.into(),
            class: VehicleClass::Bus,
            driver: DriverProfile::Normal,
            start: Step(0),
            legs: edges.iter().map(|&e| RouteLeg::through(e)).collect(),
            foreground: false,
        }
    }

    #[test]
    fn routes_go_to_owner_of_first_edge() {
        let net = super::helpers::grid_net();
        let p = partition(&net, 2, 500.0, &mut SimRng::new(9)).unwrap();
        let routes: Vec<_> = net.edges().take(6).map(|e| route(&format!("r{}", e.0), &[e])).collect();
        let a = assign_quotas(&p, &net, VehicleQuotas::ZERO, &SpatialWindows::default(), &routes).unwrap();
        assert_eq!(a.routes.iter().map(Vec::len).sum::<usize>(), routes.len());
        for (w, bucket) in a.routes.iter().enumerate() {
            for r in bucket {
                let first = r.first_edge().unwrap();
                assert_eq!(p.ownership.edge_owner(&net, first), WorkerIndex(w as u16));
            }
        }
    }

    #[test]
    fn bad_routes_rejected() {
        let net = super::helpers::grid_net();
        let p = partition(&net, 1, 500.0, &mut SimRng::new(0)).unwrap();
        let none = SpatialWindows::default();
        let empty = assign_quotas(&p, &net, VehicleQuotas::ZERO, &none, &[route("e", &[])]).err();
        assert!(matches!(empty, Some(PartitionError::EmptyRoute { .. })));
        let unknown = assign_quotas(&p, &net, VehicleQuotas::ZERO, &none, &[route("u", &[EdgeId(0), EdgeId(9_999)])]).err();
        assert!(matches!(unknown, Some(PartitionError::UnknownEdge { edge: EdgeId(9_999), .. })));
    }
}

// ── Border topology ───────────────────────────────────────────────────────────

#[cfg(test)]
mod topology {
    use dt_core::{GeoPoint, NodeId, SimRng, WorkerIndex};
    use dt_spatial::{RoadNetwork, RoadNetworkBuilder};

    use crate::{partition, BorderTopology, Ownership};

    /// Three nodes in a row, A=0 and B=1 own one end each, C=2 is isolated.
    fn chain() -> (RoadNetwork, Ownership) {
        let mut b = RoadNetworkBuilder::new();
        let n0 = b.add_node(GeoPoint::new(0.0, 0.0));
        let n1 = b.add_node(GeoPoint::new(0.0, 0.01));
        b.add_node(GeoPoint::new(0.0, 0.02));
        b.add_road(n0, n1, 100.0, 2, 10_000);
        let net = b.build();
        let owners = vec![WorkerIndex(0), WorkerIndex(1), WorkerIndex(2)];
        let own = Ownership::from_node_owners(&net, owners).unwrap();
        (net, own)
    }

    #[test]
    fn directed_sets() {
        let (net, own) = chain();
        let a = BorderTopology::compute(&net, &own, WorkerIndex(0));
        let forward = net.find_edge(NodeId(0), NodeId(1)).unwrap();
        let back = net.find_edge(NodeId(1), NodeId(0)).unwrap();
        let link = a.link(WorkerIndex(1)).unwrap();
        assert!(link.outward.contains(&forward));
        assert!(link.inward.contains(&back));
        assert_eq!(a.handover_target(forward), Some(WorkerIndex(1)));
        assert_eq!(a.handover_target(back), None);
    }

    #[test]
    fn unconnected_workers_are_not_fellows() {
        let (net, own) = chain();
        let c = BorderTopology::compute(&net, &own, WorkerIndex(2));
        assert_eq!(c.fellow_count(), 0);
        let a = BorderTopology::compute(&net, &own, WorkerIndex(0));
        assert!(!a.is_connected(WorkerIndex(2)));
    }

    #[test]
    fn inward_mirrors_fellow_outward() {
        let net = RoadNetwork::builtin_grid(5, 5, 200.0);
        let p = partition(&net, 3, 300.0, &mut SimRng::new(11)).unwrap();
        let all = BorderTopology::all(&net, &p.ownership, 3);
        for t in &all {
            for link in t.links() {
                let mirror = all[link.fellow.index()].link(t.me).unwrap();
                assert_eq!(link.inward, mirror.outward);
                assert_eq!(link.outward, mirror.inward);
            }
        }
    }

    #[test]
    fn ownership_length_checked() {
        let (net, _) = chain();
        assert!(Ownership::from_node_owners(&net, vec![WorkerIndex(0)]).is_err());
    }
}
