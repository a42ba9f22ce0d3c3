//! # Preferences Module
//!
//! Shared, user-configurable display preferences.
//!
//! The unit preference is shared by every widget and may change at any time,
//! independently of telemetry. Widgets read the current value and subscribe
//! to changes through [`UnitPreferenceProvider`].

use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::units::UnitType;

/// Provider of the user's unit preference.
#[cfg_attr(test, mockall::automock)]
pub trait UnitPreferenceProvider: Send + Sync {
    /// Returns the current unit preference.
    fn unit_type(&self) -> UnitType;

    /// Returns a receiver that observes every preference change.
    fn subscribe_unit_type(&self) -> watch::Receiver<UnitType>;

    /// Starts listening for preference changes from the backing store.
    fn set_up_listener(&self);

    /// Stops listening and releases backing resources.
    fn cleanup(&self);
}

/// In-memory global preferences.
///
/// One instance may back several widgets. Each `set_up_listener` call is
/// paired with one `cleanup`, and the preferences keep listening until the
/// last listener is cleaned up.
///
/// # Examples
///
/// ```
/// use telemetry_deriver::preferences::{GlobalPreferences, UnitPreferenceProvider};
/// use telemetry_deriver::units::UnitType;
///
/// let prefs = GlobalPreferences::new(UnitType::Metric);
/// let rx = prefs.subscribe_unit_type();
///
/// prefs.set_unit_type(UnitType::Imperial);
/// assert_eq!(*rx.borrow(), UnitType::Imperial);
/// ```
#[derive(Debug)]
pub struct GlobalPreferences {
    unit_type: watch::Sender<UnitType>,
    listeners: AtomicUsize,
}

impl GlobalPreferences {
    /// Creates preferences with the given initial unit type.
    #[must_use]
    pub fn new(unit_type: UnitType) -> Self {
        let (tx, _rx) = watch::channel(unit_type);
        Self {
            unit_type: tx,
            listeners: AtomicUsize::new(0),
        }
    }

    /// Changes the unit preference and notifies subscribers.
    pub fn set_unit_type(&self, unit_type: UnitType) {
        let previous = self.unit_type.send_replace(unit_type);
        if previous != unit_type {
            info!("Unit preference changed: {} -> {}", previous, unit_type);
        }
    }

    /// Returns `true` while at least one listener is set up.
    pub fn is_listening(&self) -> bool {
        self.listener_count() > 0
    }

    /// Returns the number of listeners not yet cleaned up.
    pub fn listener_count(&self) -> usize {
        self.listeners.load(Ordering::Acquire)
    }
}

impl Default for GlobalPreferences {
    fn default() -> Self {
        Self::new(UnitType::default())
    }
}

impl UnitPreferenceProvider for GlobalPreferences {
    fn unit_type(&self) -> UnitType {
        *self.unit_type.borrow()
    }

    fn subscribe_unit_type(&self) -> watch::Receiver<UnitType> {
        self.unit_type.subscribe()
    }

    fn set_up_listener(&self) {
        if self.listeners.fetch_add(1, Ordering::AcqRel) == 0 {
            debug!("Preference listener set up");
        }
    }

    fn cleanup(&self) {
        let previous = self
            .listeners
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1));
        if previous == Ok(1) {
            debug!("Preference listener cleaned up");
        }
    }
}
