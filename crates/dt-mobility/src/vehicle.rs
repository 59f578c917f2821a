//! Per-vehicle travel state.

use dt_core::{DriverProfile, EdgeId, RouteLeg, Step, VehicleClass, VehicleId};
use dt_proto::{BorderVehicle, VehicleSnapshot};

/// One active vehicle.
///
/// `head_m` is the front bumper's distance from the start of the current
/// edge; the body trails behind it by `class.length_m()`.
#[derive(Clone, Debug)]
pub struct Vehicle {
    pub id: VehicleId,
    pub class: VehicleClass,
    pub driver: DriverProfile,
    pub legs: Vec<RouteLeg>,
    /// Index into `legs` of the edge being driven.
    pub leg: u32,
    pub lane: u8,
    pub head_m: f32,
    pub speed_mps: f32,
    pub created_at: Step,
    pub external: bool,
    pub foreground: bool,
    /// Steps left standing at a stopover.
    pub dwell_steps: u32,
    /// The stopover at the end of the current leg was already served.
    pub dwelled: bool,
    /// Consecutive steps spent (almost) stationary.
    pub stuck_steps: u32,
}

impl Vehicle {
    #[inline]
    pub fn current_edge(&self) -> EdgeId {
        self.legs[self.leg as usize].edge
    }

    #[inline]
    pub fn next_edge(&self) -> Option<EdgeId> {
        self.legs.get(self.leg as usize + 1).map(|l| l.edge)
    }

    #[inline]
    pub fn on_last_leg(&self) -> bool {
        self.leg as usize + 1 >= self.legs.len()
    }

    #[inline]
    pub fn rear_m(&self) -> f32 {
        self.head_m - self.class.length_m()
    }

    /// The current leg ends in a stopover not yet served.
    #[inline]
    pub fn owes_stopover(&self) -> bool {
        !self.dwelled && self.legs[self.leg as usize].stopover_secs > 0.0
    }

    /// Rebuild a vehicle received from a fellow.  `None` when the record
    /// does not point at a valid leg.
    pub fn from_border(b: BorderVehicle) -> Option<Vehicle> {
        b.current_edge()?;
        Some(Vehicle {
            id: b.id,
            class: b.class,
            driver: b.driver,
            legs: b.legs,
            leg: b.leg_index,
            lane: b.lane,
            head_m: b.head_position_m.max(0.0),
            speed_mps: b.speed_mps.max(0.0),
            created_at: b.created_at,
            external: b.external,
            foreground: b.foreground,
            dwell_steps: 0,
            dwelled: false,
            stuck_steps: 0,
        })
    }

    /// Flatten for transfer.  The vehicle must already point at the leg it
    /// enters on the receiver.
    pub fn into_border(self) -> BorderVehicle {
        BorderVehicle {
            id: self.id,
            class: self.class,
            driver: self.driver,
            legs: self.legs,
            leg_index: self.leg,
            lane: self.lane,
            head_position_m: self.head_m,
            speed_mps: self.speed_mps,
            created_at: self.created_at,
            external: self.external,
            foreground: self.foreground,
        }
    }

    pub fn snapshot(&self, reported_lane: u8) -> VehicleSnapshot {
        VehicleSnapshot {
            id: self.id,
            class: self.class,
            edge: self.current_edge(),
            lane: reported_lane,
            head_position_m: self.head_m,
            speed_mps: self.speed_mps,
            foreground: self.foreground,
        }
    }
}

/// Top speed of a class regardless of the road.
pub fn class_max_speed_mps(class: VehicleClass) -> f32 {
    match class {
        VehicleClass::Private => 36.0,
        VehicleClass::Tram    => 11.1,
        VehicleClass::Bus     => 13.9,
    }
}

/// Acceleration used when closing on the desired speed.
pub fn class_accel_mps2(class: VehicleClass) -> f32 {
    match class {
        VehicleClass::Private => 2.5,
        VehicleClass::Tram    => 1.0,
        VehicleClass::Bus     => 1.2,
    }
}
