//! Typed signal keys, subscriptions and producer handles.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::watch;

/// Values that can travel over the telemetry bus.
pub trait SignalValue: Clone + Send + Sync + fmt::Debug + 'static {}

impl<T: Clone + Send + Sync + fmt::Debug + 'static> SignalValue for T {}

/// Typed identifier of a telemetry signal.
///
/// The type parameter ties the key to the value type its producer publishes,
/// so a subscriber cannot read a height signal as a flag.
///
/// # Examples
///
/// ```
/// use telemetry_deriver::bus::SignalKey;
///
/// const ARMED: SignalKey<bool> = SignalKey::new("FlightController.IsArmed");
/// assert_eq!(ARMED.name(), "FlightController.IsArmed");
/// ```
pub struct SignalKey<T> {
    name: &'static str,
    _value: PhantomData<fn() -> T>,
}

impl<T> SignalKey<T> {
    /// Creates a key for the signal called `name`.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _value: PhantomData,
        }
    }

    /// Returns the signal name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for SignalKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SignalKey<T> {}

impl<T> fmt::Debug for SignalKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SignalKey").field(&self.name).finish()
    }
}

/// A live subscription to one telemetry signal.
///
/// Holds the latest value published by the producer. Reads never block;
/// [`Signal::changed`] waits for the next update. Dropping the signal
/// releases the subscription.
#[derive(Debug, Clone)]
pub struct Signal<T> {
    name: String,
    rx: watch::Receiver<T>,
}

impl<T: SignalValue> Signal<T> {
    pub(crate) fn new(name: impl Into<String>, rx: watch::Receiver<T>) -> Self {
        Self {
            name: name.into(),
            rx,
        }
    }

    /// Creates a signal that always reads `value` and never changes.
    ///
    /// Used in place of an optional signal whose producer is missing.
    ///
    /// # Examples
    ///
    /// ```
    /// use telemetry_deriver::bus::Signal;
    ///
    /// let signal = Signal::constant("UltrasonicHeight", 0.0_f32);
    /// assert_eq!(signal.latest(), 0.0);
    /// ```
    #[must_use]
    pub fn constant(name: impl Into<String>, value: T) -> Self {
        let (_tx, rx) = watch::channel(value);
        Self::new(name, rx)
    }

    /// Returns the signal name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a snapshot of the latest value.
    pub fn latest(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Returns `true` while the producer can still publish updates.
    ///
    /// A constant signal has no producer and is never live.
    pub fn is_live(&self) -> bool {
        self.rx.has_changed().is_ok()
    }

    /// Waits for the next update.
    ///
    /// Returns `false` once the producer is gone and no further updates can
    /// arrive.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

/// Producer side of a signal registered on the in-memory bus.
#[derive(Debug, Clone)]
pub struct Publisher<T> {
    name: &'static str,
    tx: Arc<watch::Sender<T>>,
}

impl<T: SignalValue> Publisher<T> {
    pub(crate) fn new(name: &'static str, tx: Arc<watch::Sender<T>>) -> Self {
        Self { name, tx }
    }

    /// Returns the signal name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Replaces the current value and notifies every subscriber.
    pub fn publish(&self, value: T) {
        self.tx.send_replace(value);
    }

    /// Returns the current value.
    pub fn current(&self) -> T {
        self.tx.borrow().clone()
    }
}
