//! Unit tests for dt-core primitives.

#[cfg(test)]
mod ids {
    use crate::{EdgeId, NodeId, VehicleId, WorkerIndex};

    #[test]
    fn index_roundtrip() {
        let id = EdgeId(42);
        assert_eq!(id.index(), 42);
        assert_eq!(EdgeId::try_from(42usize).unwrap(), id);
    }

    #[test]
    fn invalid_sentinels_are_max() {
        assert_eq!(NodeId::INVALID.0, u32::MAX);
        assert_eq!(EdgeId::INVALID.0, u32::MAX);
        assert_eq!(VehicleId::INVALID.0, u64::MAX);
    }

    #[test]
    fn display() {
        assert_eq!(EdgeId(7).to_string(), "EdgeId(7)");
    }

    #[test]
    fn vehicle_id_carries_origin_worker() {
        let id = VehicleId::compose(WorkerIndex(3), 1_234);
        assert_eq!(id.origin(), WorkerIndex(3));
        assert_eq!(id.seq(), 1_234);
    }

    #[test]
    fn vehicle_ids_from_different_workers_differ() {
        let a = VehicleId::compose(WorkerIndex(0), 5);
        let b = VehicleId::compose(WorkerIndex(1), 5);
        assert_ne!(a, b);
    }
}

#[cfg(test)]
mod geo {
    use crate::{BoundingBox, GeoPoint};

    #[test]
    fn zero_distance() {
        let p = GeoPoint::new(30.694, -88.043);
        assert!(p.distance_m(p) < 0.01);
    }

    #[test]
    fn one_degree_latitude() {
        let a = GeoPoint::new(30.0, -88.0);
        let b = GeoPoint::new(31.0, -88.0);
        let d = a.distance_m(b);
        assert!((d - 111_195.0).abs() < 500.0, "got {d}");
    }

    #[test]
    fn bbox_from_points() {
        let pts = [GeoPoint::new(1.0, 2.0), GeoPoint::new(-1.0, 5.0), GeoPoint::new(0.5, 3.0)];
        let bbox = BoundingBox::from_points(pts).unwrap();
        assert_eq!(bbox, BoundingBox::new(-1.0, 2.0, 1.0, 5.0));
        assert!(BoundingBox::from_points(std::iter::empty()).is_none());
    }

    #[test]
    fn bbox_contains_and_intersects() {
        let a = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let b = BoundingBox::new(1.0, 1.0, 2.0, 2.0); // touches a's corner
        let c = BoundingBox::new(3.0, 3.0, 4.0, 4.0);
        assert!(a.contains(GeoPoint::new(1.0, 0.5)));
        assert!(!a.contains(GeoPoint::new(1.1, 0.5)));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn bbox_metric_extent() {
        let b = BoundingBox::new(0.0, 0.0, 0.01, 0.01);
        assert!((b.height_m() - 1_112.0).abs() < 10.0, "got {}", b.height_m());
        assert!((b.width_m() - 1_112.0).abs() < 10.0, "got {}", b.width_m());
    }
}

#[cfg(test)]
mod time {
    use crate::{Step, StepClock};

    #[test]
    fn step_arithmetic() {
        assert_eq!(Step(3).next(), Step(4));
        assert_eq!(Step(3) + 5, Step(8));
        assert_eq!(Step(10) - Step(4), 6);
        assert_eq!(Step(4).since(Step(10)), 0);
    }

    #[test]
    fn clock_advances_and_converts() {
        let mut clock = StepClock::new(5, Step(0));
        for _ in 0..10 {
            clock.advance();
        }
        assert_eq!(clock.current, Step(10));
        assert!((clock.elapsed_secs() - 2.0).abs() < 1e-9);
        assert!((clock.step_secs() - 0.2).abs() < 1e-6);
        assert_eq!(clock.steps_for_secs(3.0), 15);
    }

    #[test]
    fn display() {
        let clock = StepClock::new(1, Step(3_725));
        assert_eq!(clock.to_string(), "S3725 (01:02:05)");
    }
}

#[cfg(test)]
mod vehicle {
    use crate::{DriverProfile, VehicleClass, VehicleQuotas};

    #[test]
    fn driver_profile_parses_its_label() {
        for p in DriverProfile::ALL {
            assert_eq!(p.as_str().parse::<DriverProfile>().unwrap(), p);
        }
        assert!("reckless".parse::<DriverProfile>().is_err());
    }

    #[test]
    fn vehicle_class_parse() {
        assert_eq!("Tram".parse::<VehicleClass>().unwrap(), VehicleClass::Tram);
        assert_eq!("car".parse::<VehicleClass>().unwrap(), VehicleClass::Private);
        assert!("boat".parse::<VehicleClass>().is_err());
    }

    #[test]
    fn quotas_by_class() {
        let mut q = VehicleQuotas::new(10, 2, 3);
        assert_eq!(q.get(VehicleClass::Bus), 3);
        *q.get_mut(VehicleClass::Tram) += 1;
        assert_eq!(q.total(), 16);
        q.add(&VehicleQuotas::new(1, 1, 1));
        assert_eq!(q, VehicleQuotas::new(11, 4, 4));
    }
}

#[cfg(test)]
mod rng {
    use crate::{SimRng, WorkerIndex};

    #[test]
    fn same_seed_same_stream() {
        let mut a = SimRng::new(7);
        let mut b = SimRng::new(7);
        for _ in 0..16 {
            assert_eq!(a.random::<u64>(), b.random::<u64>());
        }
    }

    #[test]
    fn workers_get_distinct_streams() {
        let mut a = SimRng::for_worker(7, WorkerIndex(0));
        let mut b = SimRng::for_worker(7, WorkerIndex(1));
        let xs: Vec<u64> = (0..4).map(|_| a.random()).collect();
        let ys: Vec<u64> = (0..4).map(|_| b.random()).collect();
        assert_ne!(xs, ys);
    }

    #[test]
    fn weighted_index_skips_zero_weights() {
        let mut rng = SimRng::new(1);
        for _ in 0..100 {
            assert_eq!(rng.weighted_index(&[0.0, 3.0, 0.0]), Some(1));
        }
        assert_eq!(rng.weighted_index(&[0.0, 0.0]), None);
        assert_eq!(rng.weighted_index(&[]), None);
    }
}

#[cfg(test)]
mod config {
    use crate::{DriverProfile, DriverProfileShare, SimConfig, SyncMode};

    #[test]
    fn default_config_is_valid() {
        SimConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_workers_rejected() {
        let cfg = SimConfig { num_workers: 0, ..SimConfig::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_profile_distribution_rejected() {
        let cfg = SimConfig {
            driver_profiles: vec![DriverProfileShare { profile: DriverProfile::Normal, weight: 0.0 }],
            ..SimConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn psp_requires_report_cadence() {
        let cfg = SimConfig {
            sync_mode: SyncMode::Psp,
            report_interval_steps: 0,
            ..SimConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn gridlock_window_in_steps() {
        let cfg = SimConfig { gridlock_detection_secs: 30.0, steps_per_second: 5, ..SimConfig::default() };
        assert_eq!(cfg.gridlock_steps(), 150);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn partial_json_fills_defaults() {
        let cfg: SimConfig = serde_json::from_str(r#"{ "num_workers": 4, "sync_mode": "psp" }"#).unwrap();
        assert_eq!(cfg.num_workers, 4);
        assert_eq!(cfg.sync_mode, SyncMode::Psp);
        assert_eq!(cfg.steps_per_second, SimConfig::default().steps_per_second);
    }
}
