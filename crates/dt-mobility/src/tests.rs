//! Unit tests for dt-mobility.

#[cfg(test)]
mod helpers {
    use std::sync::Arc;

    use dt_core::{
        DriverProfile, EdgeId, ExternalRoute, GeoPoint, RouteLeg, Step, VehicleClass, VehicleId,
        WorkerIndex,
    };
    use dt_proto::BorderVehicle;
    use dt_spatial::{RoadNetwork, RoadNetworkBuilder};

    use crate::{LaneEngine, LocalSetup, LocalSimulation, Vehicle};

    pub const E0: EdgeId = EdgeId(0);
    pub const E1: EdgeId = EdgeId(1);

    /// One-way chain 0 → 1 → 2, two single-lane edges of 100 m at 10 m/s.
    pub fn chain() -> Arc<RoadNetwork> {
        let mut b = RoadNetworkBuilder::new();
        let n0 = b.add_node(GeoPoint::new(0.0, 0.0));
        let n1 = b.add_node(GeoPoint::new(0.0, 0.001));
        let n2 = b.add_node(GeoPoint::new(0.0, 0.002));
        b.add_directed_edge(n0, n1, 100.0, 1, 10_000);
        b.add_directed_edge(n1, n2, 100.0, 1, 10_000);
        Arc::new(b.build())
    }

    pub fn route(id: &str, start: u64, legs: Vec<RouteLeg>) -> ExternalRoute {
        ExternalRoute {
            id: id.into(),
            class: VehicleClass::Private,
            driver: DriverProfile::Normal,
            start: Step(start),
            legs,
            foreground: true,
        }
    }

    pub fn through_chain(id: &str, start: u64) -> ExternalRoute {
        route(id, start, vec![RouteLeg::through(E0), RouteLeg::through(E1)])
    }

    pub fn engine(setup: LocalSetup) -> LaneEngine {
        let mut e = LaneEngine::new();
        e.configure(setup).unwrap();
        e
    }

    pub fn border_vehicle(seq: u64, edge: EdgeId, head: f32) -> BorderVehicle {
        BorderVehicle {
            id: VehicleId::compose(WorkerIndex(1), seq),
            class: VehicleClass::Private,
            driver: DriverProfile::Normal,
            legs: vec![RouteLeg::through(edge)],
            leg_index: 0,
            lane: 0,
            head_position_m: head,
            speed_mps: 0.0,
            created_at: Step(0),
            external: true,
            foreground: false,
        }
    }

    pub fn parked(seq: u64, edge: EdgeId, lane: u8, head: f32) -> Vehicle {
        Vehicle::from_border(BorderVehicle { lane, ..border_vehicle(seq, edge, head) }).unwrap()
    }
}

// ── Lane index ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod lane_index {
    use super::helpers::*;
    use crate::LaneIndex;

    #[test]
    fn lanes_are_ordered_front_to_back() {
        let vs = vec![parked(0, E0, 0, 50.0), parked(1, E0, 0, 20.0), parked(2, E0, 0, 80.0)];
        let idx = LaneIndex::build(&vs);
        assert_eq!(idx.lane(E0, 0), &[2, 0, 1]);
        assert_eq!(idx.leader_of(&vs, 1), Some(0));
        assert_eq!(idx.leader_of(&vs, 2), None);
        assert_eq!(idx.rearmost(E0, 0), Some(1));
    }

    #[test]
    fn lanes_do_not_mix() {
        let vs = vec![parked(0, E0, 0, 50.0), parked(1, E0, 1, 20.0)];
        let idx = LaneIndex::build(&vs);
        assert_eq!(idx.leader_of(&vs, 1), None);
        assert!(idx.lane(E1, 0).is_empty());
    }

    #[test]
    fn approaching_checks_the_front_vehicle() {
        let vs = vec![parked(0, E0, 0, 70.0)];
        let idx = LaneIndex::build(&vs);
        assert!(idx.approaching(&vs, E0, 1, 100.0, 40.0));
        assert!(!idx.approaching(&vs, E0, 1, 100.0, 20.0));
    }
}

// ── Traffic lights ────────────────────────────────────────────────────────────

#[cfg(test)]
mod lights {
    use dt_core::{NodeId, TrafficLightTiming};
    use dt_spatial::RoadNetwork;

    use crate::LightController;

    #[test]
    fn fixed_timing_flips_every_thirty_seconds() {
        // 3×3 grid: the centre has four approaches, the edge midpoints three.
        let net = RoadNetwork::builtin_grid(3, 3, 200.0);
        let mut lc = LightController::new(&net, |_| true, TrafficLightTiming::Fixed, &[], &[], 1);
        assert_eq!(lc.len(), 5);

        assert_eq!(lc.advance(|_| false).len(), 5, "first call announces every signal");
        for _ in 2..30 {
            assert!(lc.advance(|_| false).is_empty());
        }
        let flipped = lc.advance(|_| false);
        assert_eq!(flipped.len(), 5);
        assert!(flipped.iter().all(|s| s.phase == 1));
    }

    #[test]
    fn add_and_remove_adjust_the_default_set() {
        let net = RoadNetwork::builtin_grid(3, 3, 200.0);
        let lc = LightController::new(&net, |_| true, TrafficLightTiming::Fixed, &[NodeId(0)], &[NodeId(4)], 1);
        assert_eq!(lc.len(), 5);
    }

    #[test]
    fn unowned_approaches_get_no_signal() {
        let net = RoadNetwork::builtin_grid(3, 3, 200.0);
        let lc = LightController::new(&net, |_| false, TrafficLightTiming::Fixed, &[], &[], 1);
        assert!(lc.is_empty());
    }

    #[test]
    fn no_timing_means_no_signals() {
        let net = RoadNetwork::builtin_grid(3, 3, 200.0);
        let mut lc = LightController::new(&net, |_| true, TrafficLightTiming::None, &[], &[], 1);
        assert!(lc.is_empty());
        assert!(lc.advance(|_| true).is_empty());
    }

    #[test]
    fn red_approaches_alternate() {
        let net = RoadNetwork::builtin_grid(3, 3, 200.0);
        let lc = LightController::new(&net, |_| true, TrafficLightTiming::Fixed, &[], &[], 1);
        let into_centre: Vec<_> = net.edges().filter(|e| net.edge_to[e.index()] == NodeId(4)).collect();
        let red = into_centre.iter().filter(|&&e| lc.is_red(&net, e)).count();
        assert_eq!(red, 2);
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod engine {
    use dt_core::{RouteLeg, Step, VehicleId, VehicleQuotas, WorkerIndex};
    use dt_proto::{BorderVehicle, CreationPermits, LaneTail};
    use dt_spatial::RoadNetwork;
    use std::sync::Arc;

    use super::helpers::*;
    use crate::{LaneEngine, LocalSetup, LocalSimulation, MobilityError, StepOutcome};

    fn run_until<F: Fn(&StepOutcome) -> bool>(e: &mut LaneEngine, from: u64, to: u64, stop: F) -> Option<(u64, StepOutcome)> {
        for s in from..to {
            let out = e.step(Step(s), &CreationPermits::NONE).unwrap();
            if stop(&out) {
                return Some((s, out));
            }
        }
        None
    }

    #[test]
    fn unconfigured_engine_refuses_to_step() {
        let mut e = LaneEngine::new();
        assert!(matches!(e.step(Step(0), &CreationPermits::ALL), Err(MobilityError::NotConfigured)));
        assert_eq!(e.active_vehicle_count(), 0);
    }

    #[test]
    fn external_route_drives_to_completion() {
        let mut setup = LocalSetup::whole_network(chain(), 1);
        setup.external_routes = vec![through_chain("r1", 0)];
        let mut e = engine(setup);

        let (step, out) = run_until(&mut e, 0, 60, |o| !o.finished.is_empty()).expect("vehicle finishes");
        assert_eq!(out.finished[0].finished_at, Step(step));
        assert_eq!(out.finished[0].created_at, Step(0));
        assert_eq!(e.active_vehicle_count(), 0);
        assert_eq!(e.pending_route_count(), 0);
    }

    #[test]
    fn external_route_waits_for_its_start() {
        let mut setup = LocalSetup::whole_network(chain(), 1);
        setup.external_routes = vec![through_chain("late", 5)];
        let mut e = engine(setup);
        for s in 0..5 {
            let out = e.step(Step(s), &CreationPermits::NONE).unwrap();
            assert_eq!(out.created, 0);
        }
        assert_eq!(e.pending_route_count(), 1);
        let out = e.step(Step(5), &CreationPermits::NONE).unwrap();
        assert_eq!(out.created, 1);
        assert_eq!(out.new_routes.len(), 1);
        assert_eq!(e.pending_route_count(), 0);
    }

    #[test]
    fn vehicle_leaves_at_the_border() {
        let mut setup = LocalSetup::whole_network(chain(), 1);
        setup.owned_edges = vec![true, false];
        setup.external_routes = vec![through_chain("r1", 0)];
        let mut e = engine(setup);

        let (_, out) = run_until(&mut e, 0, 60, |o| !o.departed.is_empty()).expect("vehicle departs");
        let v = &out.departed[0];
        assert_eq!(v.current_edge(), Some(E1));
        assert_eq!(v.leg_index, 1);
        assert!(out.finished.is_empty());
        assert_eq!(e.active_vehicle_count(), 0);
    }

    #[test]
    fn external_route_on_a_fellows_edge_is_handed_over_at_once() {
        let mut setup = LocalSetup::whole_network(chain(), 1);
        setup.owned_edges = vec![false, true];
        setup.external_routes = vec![through_chain("elsewhere", 0)];
        let mut e = engine(setup);
        let out = e.step(Step(0), &CreationPermits::NONE).unwrap();
        assert_eq!(out.departed.len(), 1);
        assert_eq!(out.departed[0].current_edge(), Some(E0));
    }

    #[test]
    fn lane_tail_holds_traffic_back() {
        let mut setup = LocalSetup::whole_network(chain(), 1);
        setup.owned_edges = vec![true, false];
        setup.external_routes = vec![through_chain("r1", 0)];
        let mut e = engine(setup);
        e.set_border_tails(&[E1], &[LaneTail { edge: E1, lane: 0, rear_position_m: 0.0, speed_mps: 0.0 }]);

        assert!(run_until(&mut e, 0, 60, |o| !o.departed.is_empty()).is_none());
        let v = &e.vehicles()[0];
        assert!(v.head_m < 100.0);
        assert!(v.speed_mps < 0.1);

        e.set_border_tails(&[E1], &[]);
        assert!(run_until(&mut e, 60, 80, |o| !o.departed.is_empty()).is_some());
    }

    #[test]
    fn followers_never_overlap() {
        let mut setup = LocalSetup::whole_network(chain(), 1);
        setup.external_routes = (0..4).map(|i| through_chain(&format!("r{i}"), 0)).collect();
        let mut e = engine(setup);
        let mut finished = 0;
        for s in 0..120 {
            finished += e.step(Step(s), &CreationPermits::NONE).unwrap().finished.len();
            let vs = e.vehicles();
            for a in vs {
                for b in vs {
                    if a.id != b.id && a.current_edge() == b.current_edge() && a.head_m >= b.head_m {
                        assert!(a.rear_m() >= b.head_m, "step {s}: {:?} overlaps {:?}", a.id, b.id);
                    }
                }
            }
        }
        assert_eq!(finished, 4);
    }

    #[test]
    fn stopover_delays_arrival() {
        let finish_step = |stopover_secs: f32| {
            let mut setup = LocalSetup::whole_network(chain(), 1);
            setup.external_routes =
                vec![route("r", 0, vec![RouteLeg { edge: E0, stopover_secs }, RouteLeg::through(E1)])];
            let mut e = engine(setup);
            run_until(&mut e, 0, 120, |o| !o.finished.is_empty()).map(|(s, _)| s).unwrap()
        };
        assert!(finish_step(10.0) >= finish_step(0.0) + 10);
    }

    #[test]
    fn border_vehicle_insertion_checks() {
        let mut setup = LocalSetup::whole_network(chain(), 1);
        setup.owned_edges = vec![false, true];
        let mut e = engine(setup);

        assert!(matches!(
            e.insert_border_vehicle(border_vehicle(1, E0, 10.0)),
            Err(MobilityError::NotOwned { .. })
        ));
        e.insert_border_vehicle(border_vehicle(1, E1, 10.0)).unwrap();
        assert!(matches!(e.insert_border_vehicle(border_vehicle(1, E1, 40.0)), Err(MobilityError::Duplicate(_))));
        let mut bad = border_vehicle(2, E1, 10.0);
        bad.leg_index = 3;
        assert!(matches!(e.insert_border_vehicle(bad), Err(MobilityError::NoCurrentEdge(_))));
        assert_eq!(e.active_vehicle_count(), 1);
    }

    #[test]
    fn rear_vehicles_reports_the_last_in_each_lane() {
        let mut e = engine(LocalSetup::whole_network(chain(), 1));
        e.insert_border_vehicle(border_vehicle(1, E1, 60.0)).unwrap();
        e.insert_border_vehicle(border_vehicle(2, E1, 30.0)).unwrap();
        let tails = e.rear_vehicles(&[E1]);
        assert_eq!(tails.len(), 1);
        assert_eq!(tails[0].edge, E1);
        assert!((tails[0].rear_position_m - 25.5).abs() < 1e-4);
        assert!(e.rear_vehicles(&[E0]).is_empty());
    }

    #[test]
    fn random_vehicles_respect_quotas_and_permits() {
        let net = Arc::new(RoadNetwork::builtin_grid(3, 3, 200.0));
        let mut setup = LocalSetup::whole_network(net, 7);
        setup.worker = WorkerIndex(3);
        setup.quotas = VehicleQuotas::new(5, 0, 1);
        let mut e = engine(setup);

        let created = e.create_initial_vehicles().unwrap();
        assert!(created > 0 && created <= 6);
        assert!(e.vehicles().iter().all(|v| v.id.origin() == WorkerIndex(3)));

        let out = e.step(Step(0), &CreationPermits::NONE).unwrap();
        assert_eq!(out.created, 0);
        for s in 1..50 {
            let out = e.step(Step(s), &CreationPermits::ALL).unwrap();
            assert!(out.counts.private <= 5);
            assert!(out.counts.bus <= 1);
            assert_eq!(out.counts.tram, 0);
        }
    }

    #[test]
    fn adopted_vehicles_do_not_use_up_the_quota() {
        let mut setup = LocalSetup::whole_network(chain(), 1);
        setup.quotas = VehicleQuotas::new(1, 0, 0);
        let mut e = engine(setup);
        let foreign = BorderVehicle { external: false, ..border_vehicle(1, E1, 10.0) };
        e.insert_border_vehicle(foreign).unwrap();

        let out = e.step(Step(0), &CreationPermits::NONE).unwrap();
        assert_eq!(out.counts.private, 0);

        let out = (1..40)
            .map(|s| e.step(Step(s), &CreationPermits::ALL).unwrap())
            .find(|o| o.created > 0)
            .expect("an own vehicle is created");
        assert_eq!(out.created, 1);
        assert_eq!(out.counts.private, 1);
        assert_eq!(out.new_routes[0].vehicle.origin(), WorkerIndex(0));
    }

    #[test]
    fn own_vehicle_counts_until_retired() {
        let mut setup = LocalSetup::whole_network(chain(), 1);
        setup.owned_edges = vec![true, false];
        setup.quotas = VehicleQuotas::new(1, 0, 0);
        let mut e = engine(setup);

        let mut left = None;
        for s in 0..400 {
            let out = e.step(Step(s), &CreationPermits::ALL).unwrap();
            assert!(out.counts.private <= 1, "step {s}");
            if let Some(v) = out.departed.first() {
                assert_eq!(out.counts.private, 1, "a vehicle in a fellow's area still counts");
                left = Some((s, v.id));
                break;
            }
        }
        let (s, id) = left.expect("an own vehicle crosses the border");
        for t in s + 1..s + 6 {
            let out = e.step(Step(t), &CreationPermits::ALL).unwrap();
            assert_eq!(out.created, 0);
            assert_eq!(out.counts.private, 1);
        }

        assert_eq!(e.retire_vehicles(&[VehicleId::compose(WorkerIndex(1), 0)]), 0);
        assert_eq!(e.retire_vehicles(&[id]), 1);
        assert_eq!(e.retire_vehicles(&[id]), 0);
        let out = e.step(Step(s + 6), &CreationPermits::NONE).unwrap();
        assert_eq!(out.counts.private, 0);
    }

    #[test]
    fn source_windows_restrict_where_trips_start() {
        let net = Arc::new(RoadNetwork::builtin_grid(3, 3, 200.0));
        let mut setup = LocalSetup::whole_network(Arc::clone(&net), 3);
        setup.quotas = VehicleQuotas::new(4, 0, 0);
        // Covers node 0 only.
        setup.windows.sources = vec![dt_core::BoundingBox::new(30.679, -88.061, 30.6805, -88.0595)];
        let mut e = engine(setup);
        e.create_initial_vehicles().unwrap();
        assert!(!e.vehicles().is_empty());
        for v in e.vehicles() {
            assert_eq!(net.edge_from[v.legs[0].edge.index()], dt_core::NodeId(0));
        }
    }

    #[test]
    fn drive_on_left_mirrors_reported_lanes() {
        let net = Arc::new(RoadNetwork::builtin_grid(2, 2, 200.0));
        let mut setup = LocalSetup::whole_network(net, 1);
        setup.drive_on_left = true;
        setup.report_vehicles = true;
        let mut e = engine(setup);
        e.insert_border_vehicle(border_vehicle(1, E0, 10.0)).unwrap();
        let out = e.step(Step(0), &CreationPermits::NONE).unwrap();
        assert_eq!(out.snapshots.len(), 1);
        assert_eq!(out.snapshots[0].lane, 1);
    }
}
