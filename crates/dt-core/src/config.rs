//! Run configuration.
//!
//! One `SimConfig` is constructed per run (typically loaded from a JSON file
//! by the server binary) and passed by reference into every component that
//! needs it.  Nothing reads configuration from ambient or static state, so
//! scripted batches of runs in one process cannot leak settings into each
//! other.

use std::path::PathBuf;

use crate::{BoundingBox, DriverProfile, DtError, DtResult, ExternalRoute, GeoPoint, NodeId, Step, StepClock, VehicleQuotas};

// ── Enums ─────────────────────────────────────────────────────────────────────

/// Which step-coordination protocol a run uses.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SyncMode {
    /// Server-driven lock-step: share, then simulate on explicit command.
    #[default]
    Bsp,
    /// Server-less: workers gate their own steps on fellow acknowledgements.
    Psp,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TrafficLightTiming {
    #[default]
    Fixed,
    Dynamic,
    None,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RoutingAlgorithm {
    #[default]
    Dijkstra,
    RandomAStar,
}

/// Share of drivers with a given profile.  Weights need not sum to 1.
#[derive(Copy, Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DriverProfileShare {
    pub profile: DriverProfile,
    pub weight:  f64,
}

/// User-defined spatial windows restricting where random trips start and
/// end.  Empty vectors mean "anywhere".
#[derive(Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpatialWindows {
    pub sources:      Vec<BoundingBox>,
    pub destinations: Vec<BoundingBox>,
}

impl SpatialWindows {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.destinations.is_empty()
    }

    /// Every window, sources first.
    pub fn all(&self) -> impl Iterator<Item = &BoundingBox> {
        self.sources.iter().chain(self.destinations.iter())
    }
}

// ── Road graph description ────────────────────────────────────────────────────

/// One road segment of an inline road graph.
#[derive(Copy, Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoadSpec {
    pub from:          NodeId,
    pub to:            NodeId,
    pub length_m:      f32,
    pub lanes:         u8,
    pub speed_mps:     f32,
    /// Adds the reverse edge with identical attributes.
    pub bidirectional: bool,
}

/// A serialisable road graph, shipped inside `Setup` when the map changes.
#[derive(Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoadGraphSpec {
    pub nodes: Vec<GeoPoint>,
    pub roads: Vec<RoadSpec>,
}

/// Where workers obtain the road graph from.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RoadGraphSource {
    /// Synthetic Manhattan grid generated identically on every process.
    Builtin { rows: u32, cols: u32, spacing_m: f32 },
    /// Full graph carried in the setup message.
    Inline(RoadGraphSpec),
    /// Keep whatever graph the worker already holds.
    Empty,
}

impl Default for RoadGraphSource {
    fn default() -> Self {
        RoadGraphSource::Builtin { rows: 8, cols: 8, spacing_m: 200.0 }
    }
}

// ── SimConfig ─────────────────────────────────────────────────────────────────

/// Top-level run configuration.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SimConfig {
    /// Number of workers the server waits for before setup.
    pub num_workers: usize,

    pub sync_mode: SyncMode,

    /// Step the run starts from.
    pub start_step: Step,

    /// Step budget (absolute).  May be extended at run time unless
    /// `stops_at_max_steps` is set.
    pub max_steps: u64,

    /// Amount `max_steps` grows by when the budget runs out while vehicles
    /// are still moving.
    pub max_steps_increment: u64,

    pub steps_per_second: u32,

    /// Stop exactly at `max_steps`, ignoring the finished/gridlock checks.
    pub stops_at_max_steps: bool,

    /// Simulated seconds without any finished vehicle before the run is
    /// declared gridlocked.
    pub gridlock_detection_secs: f64,

    /// Upper bound on a grid cell's width and height, in metres.
    pub max_cell_size_m: f32,

    /// Global random-vehicle targets.
    pub quotas: VehicleQuotas,

    pub driver_profiles: Vec<DriverProfileShare>,

    pub look_ahead_distance_m: f32,
    pub traffic_light_timing: TrafficLightTiming,
    pub routing_algorithm: RoutingAlgorithm,
    pub reroute: bool,
    /// Vehicles behind a stopped tram must wait (tram stop rule).
    pub tram_stop_rule: bool,
    pub drive_on_left: bool,
    pub light_nodes_to_add: Vec<NodeId>,
    pub light_nodes_to_remove: Vec<NodeId>,

    pub windows: SpatialWindows,
    pub external_routes: Vec<ExternalRoute>,
    pub road_graph: RoadGraphSource,

    /// Server-less mode: workers send a `TrafficReport` every this many steps.
    pub report_interval_steps: u64,

    /// Include per-vehicle snapshots in reports (visualization mode).
    pub report_vehicles: bool,

    /// Master RNG seed.  The same seed always produces identical partitions
    /// and vehicle streams.
    pub seed: u64,

    /// Directory for step-summary output, if any.
    pub output_dir: Option<PathBuf>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            num_workers:             2,
            sync_mode:               SyncMode::Bsp,
            start_step:              Step::ZERO,
            max_steps:               18_000,
            max_steps_increment:     1_000,
            steps_per_second:        5,
            stops_at_max_steps:      false,
            gridlock_detection_secs: 300.0,
            max_cell_size_m:         500.0,
            quotas:                  VehicleQuotas::new(100, 0, 0),
            driver_profiles:         vec![DriverProfileShare { profile: DriverProfile::Normal, weight: 1.0 }],
            look_ahead_distance_m:   50.0,
            traffic_light_timing:    TrafficLightTiming::Fixed,
            routing_algorithm:       RoutingAlgorithm::Dijkstra,
            reroute:                 false,
            tram_stop_rule:          false,
            drive_on_left:           false,
            light_nodes_to_add:      Vec::new(),
            light_nodes_to_remove:   Vec::new(),
            windows:                 SpatialWindows::default(),
            external_routes:         Vec::new(),
            road_graph:              RoadGraphSource::default(),
            report_interval_steps:   10,
            report_vehicles:         false,
            seed:                    42,
            output_dir:              None,
        }
    }
}

impl SimConfig {
    /// Reject settings no run can satisfy.  Called before setup; the
    /// partitioner performs its own cell-count check once the grid exists.
    pub fn validate(&self) -> DtResult<()> {
        if self.num_workers == 0 {
            return Err(DtError::Config("num_workers must be at least 1".into()));
        }
        if self.num_workers > u16::MAX as usize {
            return Err(DtError::Config(format!("num_workers {} exceeds {}", self.num_workers, u16::MAX)));
        }
        if self.steps_per_second == 0 {
            return Err(DtError::Config("steps_per_second must be positive".into()));
        }
        if self.max_cell_size_m <= 0.0 {
            return Err(DtError::Config("max_cell_size_m must be positive".into()));
        }
        if !self.driver_profiles.iter().any(|s| s.weight > 0.0) {
            return Err(DtError::Config("driver profile distribution has no positive weight".into()));
        }
        if self.sync_mode == SyncMode::Psp && self.report_interval_steps == 0 {
            return Err(DtError::Config("report_interval_steps must be positive in server-less mode".into()));
        }
        Ok(())
    }

    /// The initial step budget as an absolute step.
    #[inline]
    pub fn max_step(&self) -> Step {
        Step(self.max_steps)
    }

    /// Gridlock window in steps (`gridlock_detection_secs × steps_per_second`).
    pub fn gridlock_steps(&self) -> u64 {
        self.make_clock().steps_for_secs(self.gridlock_detection_secs)
    }

    /// Construct a `StepClock` pre-configured for this run.
    pub fn make_clock(&self) -> StepClock {
        StepClock::new(self.steps_per_second, self.start_step)
    }

    /// Profiles and their weights as parallel vectors, for weighted sampling.
    pub fn driver_profile_weights(&self) -> (Vec<DriverProfile>, Vec<f64>) {
        self.driver_profiles.iter().map(|s| (s.profile, s.weight)).unzip()
    }
}
