//! # Unit Conversion Module
//!
//! Converts raw physical quantities reported by the aircraft into display
//! quantities for the user's measurement system.
//!
//! ## Distances
//!
//! Height sensors report in centimeters. Displayed distances are:
//!
//! | Unit type | Display unit | Formula |
//! |-----------|--------------|---------|
//! | Metric | meters (m) | `cm / 100` |
//! | Imperial | feet (ft) | `cm / 100 * 3.28084` |
//!
//! ## Usage
//!
//! ```
//! use telemetry_deriver::units::{to_distance, UnitType};
//!
//! let meters = to_distance(150.0, UnitType::Metric)?;
//! assert!((meters - 1.5).abs() < 0.001);
//! # Ok::<(), telemetry_deriver::error::DeriverError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DeriverError, Result};

/// Centimeters in one meter.
pub const CENTIMETERS_PER_METER: f32 = 100.0;

/// Feet in one meter.
pub const FEET_PER_METER: f32 = 3.28084;

/// Measurement system chosen by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitType {
    /// Meters
    #[default]
    Metric,
    /// Feet
    Imperial,
}

impl UnitType {
    /// Short distance unit label shown next to converted values.
    #[must_use]
    pub fn distance_label(self) -> &'static str {
        match self {
            UnitType::Metric => "m",
            UnitType::Imperial => "ft",
        }
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitType::Metric => write!(f, "metric"),
            UnitType::Imperial => write!(f, "imperial"),
        }
    }
}

/// Converts a raw distance in centimeters to the display distance for `unit`.
///
/// # Errors
///
/// Returns `DeriverError::Conversion` if `raw_cm` is NaN or infinite.
///
/// # Examples
///
/// ```
/// use telemetry_deriver::units::{to_distance, UnitType};
///
/// let feet = to_distance(150.0, UnitType::Imperial)?;
/// assert!((feet - 4.92).abs() < 0.01);
/// # Ok::<(), telemetry_deriver::error::DeriverError>(())
/// ```
pub fn to_distance(raw_cm: f32, unit: UnitType) -> Result<f32> {
    if !raw_cm.is_finite() {
        return Err(DeriverError::Conversion {
            value: raw_cm,
            reason: "value is not finite".to_string(),
        });
    }

    let meters = raw_cm / CENTIMETERS_PER_METER;
    Ok(match unit {
        UnitType::Metric => meters,
        UnitType::Imperial => meters * FEET_PER_METER,
    })
}
