//! Vehicle classification and route primitives shared by every crate.
//!
//! All variants are always compiled in.  The local simulation decides what a
//! class means physically (length, free-flow speed); the coordination core
//! only counts and apportions by class.

use std::str::FromStr;

use crate::{DtError, EdgeId, Step};

// ── VehicleClass ──────────────────────────────────────────────────────────────

/// The three vehicle classes that carry independent global quotas.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VehicleClass {
    /// Private car (the default).
    #[default]
    Private,
    /// Tram.
    Tram,
    /// Bus.
    Bus,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 3] = [VehicleClass::Private, VehicleClass::Tram, VehicleClass::Bus];

    /// Human-readable label, useful for CSV column values.
    pub fn as_str(self) -> &'static str {
        match self {
            VehicleClass::Private => "private",
            VehicleClass::Tram    => "tram",
            VehicleClass::Bus     => "bus",
        }
    }

    /// Physical vehicle length in metres.
    pub fn length_m(self) -> f32 {
        match self {
            VehicleClass::Private => 4.5,
            VehicleClass::Tram    => 30.0,
            VehicleClass::Bus     => 12.0,
        }
    }
}

impl std::fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleClass {
    type Err = DtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "private" | "car" => Ok(VehicleClass::Private),
            "tram"            => Ok(VehicleClass::Tram),
            "bus"             => Ok(VehicleClass::Bus),
            other => Err(DtError::Parse(format!("unknown vehicle class {other:?}"))),
        }
    }
}

// ── DriverProfile ─────────────────────────────────────────────────────────────

/// Driver temperament.  Travels on the wire as its string label and is parsed
/// back on the receiving worker.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DriverProfile {
    HighlyAggressive,
    Aggressive,
    #[default]
    Normal,
    Polite,
    HighlyPolite,
}

impl DriverProfile {
    pub const ALL: [DriverProfile; 5] = [
        DriverProfile::HighlyAggressive,
        DriverProfile::Aggressive,
        DriverProfile::Normal,
        DriverProfile::Polite,
        DriverProfile::HighlyPolite,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DriverProfile::HighlyAggressive => "HIGHLY_AGGRESSIVE",
            DriverProfile::Aggressive       => "AGGRESSIVE",
            DriverProfile::Normal           => "NORMAL",
            DriverProfile::Polite           => "POLITE",
            DriverProfile::HighlyPolite     => "HIGHLY_POLITE",
        }
    }

    /// Multiplier applied to an edge's free-flow speed.
    pub fn speed_factor(self) -> f32 {
        match self {
            DriverProfile::HighlyAggressive => 1.2,
            DriverProfile::Aggressive       => 1.1,
            DriverProfile::Normal           => 1.0,
            DriverProfile::Polite           => 0.9,
            DriverProfile::HighlyPolite     => 0.8,
        }
    }

    /// Minimum bumper-to-bumper gap the driver keeps, in metres.
    pub fn min_gap_m(self) -> f32 {
        match self {
            DriverProfile::HighlyAggressive => 1.0,
            DriverProfile::Aggressive       => 1.5,
            DriverProfile::Normal           => 2.0,
            DriverProfile::Polite           => 2.5,
            DriverProfile::HighlyPolite     => 3.0,
        }
    }
}

impl std::fmt::Display for DriverProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverProfile {
    type Err = DtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DriverProfile::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DtError::Parse(format!("unknown driver profile {s:?}")))
    }
}

// ── VehicleQuotas ─────────────────────────────────────────────────────────────

/// Vehicle counts per class, used for global targets, per-worker
/// apportionments, and reported tallies alike.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VehicleQuotas {
    pub private: u64,
    pub tram:    u64,
    pub bus:     u64,
}

impl VehicleQuotas {
    pub const ZERO: VehicleQuotas = VehicleQuotas { private: 0, tram: 0, bus: 0 };

    pub fn new(private: u64, tram: u64, bus: u64) -> Self {
        Self { private, tram, bus }
    }

    #[inline]
    pub fn get(&self, class: VehicleClass) -> u64 {
        match class {
            VehicleClass::Private => self.private,
            VehicleClass::Tram    => self.tram,
            VehicleClass::Bus     => self.bus,
        }
    }

    #[inline]
    pub fn get_mut(&mut self, class: VehicleClass) -> &mut u64 {
        match class {
            VehicleClass::Private => &mut self.private,
            VehicleClass::Tram    => &mut self.tram,
            VehicleClass::Bus     => &mut self.bus,
        }
    }

    pub fn total(&self) -> u64 {
        self.private + self.tram + self.bus
    }

    /// Component-wise sum.
    pub fn add(&mut self, other: &VehicleQuotas) {
        self.private += other.private;
        self.tram    += other.tram;
        self.bus     += other.bus;
    }
}

// ── Routes ────────────────────────────────────────────────────────────────────

/// One leg of a vehicle route: the edge to traverse and how long the vehicle
/// stops at the end of it (0 for pass-through legs; bus and tram stops are
/// non-zero).
#[derive(Copy, Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RouteLeg {
    pub edge:          EdgeId,
    pub stopover_secs: f32,
}

impl RouteLeg {
    pub fn through(edge: EdgeId) -> Self {
        Self { edge, stopover_secs: 0.0 }
    }
}

/// A predefined route supplied with the setup instead of being generated at
/// random.  Released into the simulation once the clock reaches `start`.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExternalRoute {
    pub id:         String,
    pub class:      VehicleClass,
    pub driver:     DriverProfile,
    pub start:      Step,
    pub legs:       Vec<RouteLeg>,
    /// Foreground vehicles are always included in visualization reports.
    pub foreground: bool,
}

impl ExternalRoute {
    /// First edge of the route, or `None` for an empty route.
    pub fn first_edge(&self) -> Option<EdgeId> {
        self.legs.first().map(|l| l.edge)
    }
}
