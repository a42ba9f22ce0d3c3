//! Derived widget states and the decision table that selects them.

use serde::Serialize;

/// Discrete display state derived from telemetry.
///
/// Exactly one variant is active at a time. States are recomputed from the
/// latest signal values and never patched in place.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "state", content = "payload", rename_all = "snake_case")]
pub enum DerivedState<P> {
    /// The product is not connected, or bindings could not be established.
    #[default]
    Disconnected,
    /// Connected, but the widget's enabling conditions do not hold.
    Disabled,
    /// Connected and enabled, carrying the display payload.
    Enabled(P),
}

impl<P> DerivedState<P> {
    /// Returns `true` for [`DerivedState::Enabled`].
    pub fn is_enabled(&self) -> bool {
        matches!(self, DerivedState::Enabled(_))
    }

    /// Returns `true` for [`DerivedState::Disconnected`].
    pub fn is_disconnected(&self) -> bool {
        matches!(self, DerivedState::Disconnected)
    }

    /// Returns the payload of an enabled state.
    pub fn payload(&self) -> Option<&P> {
        match self {
            DerivedState::Enabled(payload) => Some(payload),
            _ => None,
        }
    }
}

/// Evaluates the decision table, top to bottom:
///
/// 1. not connected → `Disconnected`
/// 2. enabled → `Enabled(payload())`
/// 3. otherwise → `Disabled`
///
/// `payload` only runs when its result is used.
///
/// # Examples
///
/// ```
/// use telemetry_deriver::deriver::{decide, DerivedState};
///
/// assert_eq!(decide(false, true, || 1), DerivedState::Disconnected);
/// assert_eq!(decide(true, true, || 1), DerivedState::Enabled(1));
/// assert_eq!(decide(true, false, || 1), DerivedState::Disabled);
/// ```
pub fn decide<P>(connected: bool, enabled: bool, payload: impl FnOnce() -> P) -> DerivedState<P> {
    if !connected {
        DerivedState::Disconnected
    } else if enabled {
        DerivedState::Enabled(payload())
    } else {
        DerivedState::Disabled
    }
}
