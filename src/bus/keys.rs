//! Well-known telemetry signal keys.
//!
//! Names follow the `Component.Key` layout of the aircraft key/value store.

use super::SignalKey;

/// Whether the aircraft is connected. Drives the `Disconnected` override.
pub const PRODUCT_CONNECTION: SignalKey<bool> = SignalKey::new("ProductConnection");

/// Whether vision positioning is enabled on the flight assistant.
pub const VISION_POSITIONING_ENABLED: SignalKey<bool> =
    SignalKey::new("FlightAssistant.VisionPositioningEnabled");

/// Whether the flight controller currently uses the ultrasonic sensor.
pub const ULTRASONIC_BEING_USED: SignalKey<bool> =
    SignalKey::new("FlightController.IsUltrasonicUsed");

/// Raw ultrasonic height in centimeters.
pub const ULTRASONIC_HEIGHT: SignalKey<f32> = SignalKey::new("FlightController.UltrasonicHeight");
