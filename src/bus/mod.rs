//! # Telemetry Bus Module
//!
//! Key/value telemetry bus that derivers subscribe to.
//!
//! This module handles:
//! - Typed signal keys and subscriptions
//! - Registering live producers
//! - Resolving subscriptions to producers (or failing with a binding error)
//! - Releasing subscriptions
//!
//! The [`TelemetryBus`] trait is the seam between derivers and whatever
//! actually produces telemetry. [`InMemoryBus`] is the implementation used by
//! the demo binary and the tests.

pub mod keys;
pub mod signal;

pub use signal::{Publisher, Signal, SignalKey, SignalValue};

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{DeriverError, Result};

/// Source of telemetry signals.
///
/// Implementations own the signal registry. Subscribers only read it.
pub trait TelemetryBus: Send + Sync {
    /// Subscribes to the signal identified by `key`.
    ///
    /// # Errors
    ///
    /// Returns `DeriverError::Binding` if no live producer publishes `key`
    /// with the requested value type.
    fn subscribe<T: SignalValue>(&self, key: &SignalKey<T>) -> Result<Signal<T>>;

    /// Releases a subscription obtained from [`TelemetryBus::subscribe`].
    fn unsubscribe<T: SignalValue>(&self, signal: Signal<T>) {
        debug!("Unsubscribed from {}", signal.name());
    }
}

/// In-process telemetry bus backed by `tokio::sync::watch` channels.
///
/// Each registered signal has one producer and any number of independent
/// subscribers.
///
/// # Examples
///
/// ```
/// use telemetry_deriver::bus::{InMemoryBus, SignalKey, TelemetryBus};
///
/// const CONNECTED: SignalKey<bool> = SignalKey::new("ProductConnection");
///
/// let bus = InMemoryBus::new();
/// let publisher = bus.register(&CONNECTED, false);
/// let signal = bus.subscribe(&CONNECTED)?;
///
/// publisher.publish(true);
/// assert!(signal.latest());
/// # Ok::<(), telemetry_deriver::error::DeriverError>(())
/// ```
#[derive(Default)]
pub struct InMemoryBus {
    producers: Mutex<HashMap<&'static str, Box<dyn Any + Send + Sync>>>,
}

impl std::fmt::Debug for InMemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let producers = self.producers.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("InMemoryBus")
            .field("signals", &producers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl InMemoryBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a live producer for `key` with an initial value.
    ///
    /// Registering a key twice replaces the previous producer. Existing
    /// subscribers keep reading the old producer until they resubscribe.
    pub fn register<T: SignalValue>(&self, key: &SignalKey<T>, initial: T) -> Publisher<T> {
        let (tx, _rx) = watch::channel(initial);
        let tx = Arc::new(tx);

        let mut producers = self.producers.lock().unwrap_or_else(PoisonError::into_inner);
        if producers.insert(key.name(), Box::new(Arc::clone(&tx))).is_some() {
            warn!("Replaced existing producer for {}", key.name());
        }
        debug!("Registered producer for {}", key.name());

        Publisher::new(key.name(), tx)
    }

    /// Removes the producer registered under `name`.
    ///
    /// Later subscriptions to `name` fail. Returns `true` if a producer was
    /// removed.
    pub fn remove(&self, name: &str) -> bool {
        let mut producers = self.producers.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = producers.remove(name).is_some();
        if removed {
            debug!("Removed producer for {}", name);
        }
        removed
    }

    /// Returns the number of live subscriptions to `key`.
    pub fn subscriber_count<T: SignalValue>(&self, key: &SignalKey<T>) -> usize {
        let producers = self.producers.lock().unwrap_or_else(PoisonError::into_inner);
        producers
            .get(key.name())
            .and_then(|entry| entry.downcast_ref::<Arc<watch::Sender<T>>>())
            .map_or(0, |tx| tx.receiver_count())
    }
}

impl TelemetryBus for InMemoryBus {
    fn subscribe<T: SignalValue>(&self, key: &SignalKey<T>) -> Result<Signal<T>> {
        let producers = self.producers.lock().unwrap_or_else(PoisonError::into_inner);

        let entry = producers
            .get(key.name())
            .ok_or_else(|| DeriverError::Binding(key.name().to_string()))?;

        let tx = entry.downcast_ref::<Arc<watch::Sender<T>>>().ok_or_else(|| {
            warn!(
                "Signal {} exists but does not publish {}",
                key.name(),
                std::any::type_name::<T>()
            );
            DeriverError::Binding(key.name().to_string())
        })?;

        debug!("Subscribed to {}", key.name());
        Ok(Signal::new(key.name(), tx.subscribe()))
    }
}

impl<B: TelemetryBus> TelemetryBus for Arc<B> {
    fn subscribe<T: SignalValue>(&self, key: &SignalKey<T>) -> Result<Signal<T>> {
        (**self).subscribe(key)
    }

    fn unsubscribe<T: SignalValue>(&self, signal: Signal<T>) {
        (**self).unsubscribe(signal)
    }
}
