//! Signal binding for a deriver session.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::{Signal, SignalKey, SignalValue, TelemetryBus};
use crate::error::Result;

/// Binds widget signals and registers a change listener on each.
///
/// Every listener pokes the same [`Notify`]. Notify keeps at most one stored
/// permit, so updates racing in from several producers wake the deriver once.
///
/// A listener also wakes the deriver once when its producer goes away, so
/// the loss is reflected without waiting for another update.
///
/// Listeners spawned by a binder that is dropped before
/// [`Binder::into_listeners`] are aborted, so a failed setup leaves nothing
/// running.
pub struct Binder<'a, B: TelemetryBus> {
    bus: &'a B,
    runtime: Handle,
    notify: Arc<Notify>,
    required: &'a HashSet<String>,
    bound: HashSet<&'static str>,
    listeners: Vec<JoinHandle<()>>,
}

impl<'a, B: TelemetryBus> Binder<'a, B> {
    pub(crate) fn new(
        bus: &'a B,
        runtime: Handle,
        notify: Arc<Notify>,
        required: &'a HashSet<String>,
    ) -> Self {
        Self {
            bus,
            runtime,
            notify,
            required,
            bound: HashSet::new(),
            listeners: Vec::new(),
        }
    }

    /// Binds a signal the widget cannot work without.
    ///
    /// # Errors
    ///
    /// Returns `DeriverError::Binding` naming the signal if it has no live
    /// producer.
    pub fn required<T: SignalValue>(&mut self, key: &SignalKey<T>) -> Result<Signal<T>> {
        self.bound.insert(key.name());
        let signal = self.bus.subscribe(key)?;
        self.listen(&signal);
        Ok(signal)
    }

    /// Binds a signal that degrades to `default` when it has no producer.
    ///
    /// Signals named in the deriver's required set are bound with
    /// [`Binder::required`] instead.
    ///
    /// # Errors
    ///
    /// Only fails for signals configured as required.
    pub fn optional<T: SignalValue>(&mut self, key: &SignalKey<T>, default: T) -> Result<Signal<T>> {
        if self.required.contains(key.name()) {
            return self.required(key);
        }
        self.bound.insert(key.name());

        match self.bus.subscribe(key) {
            Ok(signal) => {
                self.listen(&signal);
                Ok(signal)
            }
            Err(e) => {
                warn!("{}; using default value {:?}", e, default);
                Ok(Signal::constant(key.name(), default))
            }
        }
    }

    /// Registers a change listener on an already obtained signal.
    pub(crate) fn listen<T: SignalValue>(&mut self, signal: &Signal<T>) {
        let mut watcher = signal.clone();
        let notify = Arc::clone(&self.notify);

        self.listeners.push(self.runtime.spawn(async move {
            while watcher.changed().await {
                notify.notify_one();
            }
            debug!("Producer for {} closed", watcher.name());
            notify.notify_one();
        }));
    }

    /// Returns the configured required names that matched no bound signal.
    pub(crate) fn unmatched_required(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .required
            .iter()
            .map(String::as_str)
            .filter(|name| !self.bound.contains(*name))
            .collect();
        names.sort_unstable();
        names
    }

    /// Hands over the spawned listeners to the caller.
    pub(crate) fn into_listeners(mut self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut self.listeners)
    }
}

impl<B: TelemetryBus> Drop for Binder<'_, B> {
    fn drop(&mut self) {
        for listener in self.listeners.drain(..) {
            listener.abort();
        }
    }
}
