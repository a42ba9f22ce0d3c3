//! # Simulation Module
//!
//! Scripted aircraft that publishes VPS telemetry onto an in-memory bus.
//!
//! The script repeats every [`CYCLE_STEPS`] steps:
//!
//! | Steps | Connected | Vision | Ultrasonic | Unit |
//! |-------|-----------|--------|------------|------|
//! | 0-4 | no | no | no | metric |
//! | 5-9 | yes | no | yes | metric |
//! | 10-19 | yes | yes | yes | metric |
//! | 20-29 | yes | yes | yes | imperial |
//! | 30-34 | yes | yes | no | imperial |
//! | 35-39 | yes | yes | yes | metric |
//!
//! The ultrasonic height sweeps between 50 and 300 cm.

use crate::bus::{keys, InMemoryBus, Publisher};
use crate::preferences::GlobalPreferences;
use crate::units::UnitType;

/// Number of steps before the script repeats.
pub const CYCLE_STEPS: u64 = 40;

/// Lowest simulated ultrasonic height in centimeters.
const MIN_HEIGHT_CM: f32 = 50.0;

/// Height change per step in centimeters.
const HEIGHT_STEP_CM: f32 = 12.5;

/// Telemetry published for one simulation step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AircraftFrame {
    pub connected: bool,
    pub vision_positioning_enabled: bool,
    pub ultrasonic_being_used: bool,
    pub ultrasonic_height_cm: f32,
    pub unit: UnitType,
}

impl AircraftFrame {
    /// Computes the frame for `step`.
    #[must_use]
    pub fn at(step: u64) -> Self {
        let phase = step % CYCLE_STEPS;

        // Triangle wave over the cycle: up for 20 steps, down for 20.
        let rise = if phase < CYCLE_STEPS / 2 { phase } else { CYCLE_STEPS - phase };
        let ultrasonic_height_cm = MIN_HEIGHT_CM + rise as f32 * HEIGHT_STEP_CM;

        Self {
            connected: phase >= 5,
            vision_positioning_enabled: phase >= 10,
            ultrasonic_being_used: (5..30).contains(&phase) || phase >= 35,
            ultrasonic_height_cm,
            unit: if (20..35).contains(&phase) {
                UnitType::Imperial
            } else {
                UnitType::Metric
            },
        }
    }
}

/// Producer handles for the simulated aircraft.
#[derive(Debug)]
pub struct SimulatedAircraft {
    connection: Publisher<bool>,
    vision_positioning_enabled: Publisher<bool>,
    ultrasonic_being_used: Publisher<bool>,
    ultrasonic_height: Publisher<f32>,
}

impl SimulatedAircraft {
    /// Registers the aircraft's producers on `bus`, starting at step 0.
    #[must_use]
    pub fn register(bus: &InMemoryBus) -> Self {
        let frame = AircraftFrame::at(0);
        Self {
            connection: bus.register(&keys::PRODUCT_CONNECTION, frame.connected),
            vision_positioning_enabled: bus
                .register(&keys::VISION_POSITIONING_ENABLED, frame.vision_positioning_enabled),
            ultrasonic_being_used: bus
                .register(&keys::ULTRASONIC_BEING_USED, frame.ultrasonic_being_used),
            ultrasonic_height: bus.register(&keys::ULTRASONIC_HEIGHT, frame.ultrasonic_height_cm),
        }
    }

    /// Publishes the frame for `step` and applies its unit preference.
    pub fn step(&self, step: u64, preferences: &GlobalPreferences) -> AircraftFrame {
        let frame = AircraftFrame::at(step);

        self.connection.publish(frame.connected);
        self.vision_positioning_enabled
            .publish(frame.vision_positioning_enabled);
        self.ultrasonic_being_used.publish(frame.ultrasonic_being_used);
        self.ultrasonic_height.publish(frame.ultrasonic_height_cm);
        preferences.set_unit_type(frame.unit);

        frame
    }
}
