//! # Vision Positioning System Widget
//!
//! Shows the ultrasonic height while the aircraft positions itself visually.
//!
//! ## Signals
//!
//! | Signal | Type | Missing producer |
//! |--------|------|------------------|
//! | `ProductConnection` | bool | setup fails |
//! | `FlightAssistant.VisionPositioningEnabled` | bool | `false` |
//! | `FlightController.IsUltrasonicUsed` | bool | `false` |
//! | `FlightController.UltrasonicHeight` | f32 (cm) | `0.0` |
//!
//! ## States
//!
//! - `Disconnected`: product link down
//! - `Disabled`: vision positioning off or ultrasonic sensor not in use
//! - `Enabled(VpsHeight)`: height converted to the preferred unit
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//! use telemetry_deriver::bus::{keys, InMemoryBus};
//! use telemetry_deriver::deriver::DerivedState;
//! use telemetry_deriver::units::UnitType;
//! use telemetry_deriver::widgets::vps::{VpsHeight, VpsWidgetModel};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> telemetry_deriver::error::Result<()> {
//! let bus = Arc::new(InMemoryBus::new());
//! let _connection = bus.register(&keys::PRODUCT_CONNECTION, true);
//! let _vision = bus.register(&keys::VISION_POSITIONING_ENABLED, true);
//! let _ultrasonic = bus.register(&keys::ULTRASONIC_BEING_USED, true);
//! let _height = bus.register(&keys::ULTRASONIC_HEIGHT, 150.0);
//!
//! let model = VpsWidgetModel::new_vps(Arc::clone(&bus));
//! model.setup()?;
//!
//! match model.state() {
//!     DerivedState::Enabled(VpsHeight { height, unit }) => {
//!         assert!((height - 1.5).abs() < 0.001);
//!         assert_eq!(unit, UnitType::Metric);
//!     }
//!     other => panic!("unexpected state {:?}", other),
//! }
//! # Ok(())
//! # }
//! ```

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::bus::{keys, Signal, TelemetryBus};
use crate::deriver::{Binder, DerivedState, StateDeriver, WidgetLogic};
use crate::error::Result;
use crate::units::{to_distance, UnitType};

/// Height shown by an enabled VPS widget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VpsHeight {
    /// Height in the display unit of `unit`.
    pub height: f32,
    /// Unit preference the height was converted with.
    pub unit: UnitType,
}

impl fmt::Display for VpsHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} {}", self.height, self.unit.distance_label())
    }
}

/// State published by the VPS widget.
pub type VpsState = DerivedState<VpsHeight>;

/// VPS deriver over a telemetry bus.
pub type VpsWidgetModel<B> = StateDeriver<VpsLogic, B>;

impl<B: TelemetryBus> StateDeriver<VpsLogic, B> {
    /// Creates a VPS widget model over `bus`.
    #[must_use]
    pub fn new_vps(bus: Arc<B>) -> Self {
        StateDeriver::new(VpsLogic::new(), bus)
    }
}

/// Signals bound by the VPS widget.
#[derive(Debug)]
pub struct VpsInputs {
    vision_positioning_enabled: Signal<bool>,
    ultrasonic_being_used: Signal<bool>,
    raw_ultrasonic_height: Signal<f32>,
}

/// Decision logic of the VPS widget.
#[derive(Debug, Default, Clone, Copy)]
pub struct VpsLogic;

impl VpsLogic {
    /// Creates the VPS widget logic.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Converts a raw height, falling back to the raw value if it is malformed.
    fn display_height(raw_cm: f32, unit: UnitType) -> f32 {
        match to_distance(raw_cm, unit) {
            Ok(height) => height,
            Err(e) => {
                warn!("Showing raw ultrasonic height: {}", e);
                raw_cm
            }
        }
    }
}

impl WidgetLogic for VpsLogic {
    type Inputs = VpsInputs;
    type Payload = VpsHeight;

    fn name(&self) -> &'static str {
        "vps"
    }

    fn bind<B: TelemetryBus>(&self, binder: &mut Binder<'_, B>) -> Result<Self::Inputs> {
        Ok(VpsInputs {
            vision_positioning_enabled: binder.optional(&keys::VISION_POSITIONING_ENABLED, false)?,
            ultrasonic_being_used: binder.optional(&keys::ULTRASONIC_BEING_USED, false)?,
            raw_ultrasonic_height: binder.optional(&keys::ULTRASONIC_HEIGHT, 0.0)?,
        })
    }

    fn unbind<B: TelemetryBus>(&self, bus: &B, inputs: Self::Inputs) {
        bus.unsubscribe(inputs.vision_positioning_enabled);
        bus.unsubscribe(inputs.ultrasonic_being_used);
        bus.unsubscribe(inputs.raw_ultrasonic_height);
    }

    fn is_enabled(&self, inputs: &Self::Inputs) -> bool {
        inputs.ultrasonic_being_used.latest() && inputs.vision_positioning_enabled.latest()
    }

    fn payload(&self, inputs: &Self::Inputs, unit: UnitType) -> Self::Payload {
        VpsHeight {
            height: Self::display_height(inputs.raw_ultrasonic_height.latest(), unit),
            unit,
        }
    }
}
