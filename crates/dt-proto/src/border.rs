//! Wire forms exchanged between neighbouring workers.

use serde::{Deserialize, Serialize};

use dt_core::{DriverProfile, EdgeId, RouteLeg, Step, VehicleClass, VehicleId, WorkerIndex};

/// A vehicle crossing a border.
///
/// Exists only in flight: the sender has already removed the live vehicle,
/// the receiver recreates it from this record.  Route legs reference global
/// edge ids, valid on every worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BorderVehicle {
    pub id: VehicleId,
    pub class: VehicleClass,
    pub driver: DriverProfile,
    pub legs: Vec<RouteLeg>,
    /// Leg the vehicle is entering on the receiver.
    pub leg_index: u32,
    pub lane: u8,
    /// Distance of the front bumper from the start of the edge, metres.
    pub head_position_m: f32,
    pub speed_mps: f32,
    pub created_at: Step,
    /// Released from a predefined route rather than generated at random.
    pub external: bool,
    pub foreground: bool,
}

impl BorderVehicle {
    /// The edge the vehicle drives on once recreated.
    pub fn current_edge(&self) -> Option<EdgeId> {
        self.legs.get(self.leg_index as usize).map(|l| l.edge)
    }
}

/// Rear-most vehicle on one lane of a border edge.
///
/// The receiver uses it as a virtual leader for its own vehicles about to
/// enter that lane, so they do not accelerate blindly into traffic they
/// cannot see.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LaneTail {
    pub edge: EdgeId,
    pub lane: u8,
    /// Position of the vehicle's rear bumper from the start of the edge.
    pub rear_position_m: f32,
    pub speed_mps: f32,
}

/// One step's border payload from `sender` to one fellow.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WwTraffic {
    pub sender_name: String,
    pub sender: WorkerIndex,
    pub step: Step,
    pub vehicles: Vec<BorderVehicle>,
    pub lane_tails: Vec<LaneTail>,
}
