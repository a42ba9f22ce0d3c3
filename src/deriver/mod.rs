//! # Deriver Module
//!
//! Derives one discrete widget state from several telemetry signals.
//!
//! This module handles:
//! - Binding the connection status, widget signals and unit preference
//! - Recomputing the state whenever any bound input changes
//! - Publishing transitions on a latest-value stream
//! - Tearing everything down without late publications
//!
//! ## Recomputation
//!
//! Each bound signal gets a listener task that wakes a single recompute task
//! through a shared [`tokio::sync::Notify`]. Updates that race in from
//! independent producers collapse into one recomputation that reads the most
//! recent value of every signal. Recomputations for one deriver never
//! overlap.
//!
//! ## Teardown
//!
//! Publication happens while holding the session lock, and teardown removes
//! the session under the same lock. Once [`StateDeriver::teardown`] returns,
//! nothing is published again, even if a producer emits right after.
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//! use telemetry_deriver::bus::{keys, InMemoryBus};
//! use telemetry_deriver::deriver::{DerivedState, StateDeriver};
//! use telemetry_deriver::widgets::vps::VpsLogic;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> telemetry_deriver::error::Result<()> {
//! let bus = Arc::new(InMemoryBus::new());
//! let _connection = bus.register(&keys::PRODUCT_CONNECTION, false);
//!
//! let deriver = StateDeriver::new(VpsLogic::new(), Arc::clone(&bus));
//! deriver.setup()?;
//! assert_eq!(deriver.state(), DerivedState::Disconnected);
//!
//! deriver.teardown();
//! # Ok(())
//! # }
//! ```

mod binder;
mod state;

pub use binder::Binder;
pub use state::{decide, DerivedState};

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{keys, Signal, TelemetryBus};
use crate::error::{DeriverError, Result};
use crate::preferences::UnitPreferenceProvider;
use crate::units::UnitType;

/// Name under which the unit preference shows up as a bound signal.
const UNIT_TYPE_SIGNAL: &str = "GlobalPreferences.UnitType";

/// Widget-specific half of a deriver.
///
/// The deriver owns the connection status, the unit preference and the
/// decision table. A widget supplies its extra signals, the enabling
/// condition and the payload.
pub trait WidgetLogic: Send + Sync + 'static {
    /// Signals bound by [`WidgetLogic::bind`].
    type Inputs: Send + 'static;

    /// Payload carried by [`DerivedState::Enabled`].
    type Payload: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;

    /// Widget name used in logs.
    fn name(&self) -> &'static str;

    /// Binds the widget's signals.
    ///
    /// # Errors
    ///
    /// Returns `DeriverError::Binding` if a required signal is missing.
    fn bind<B: TelemetryBus>(&self, binder: &mut Binder<'_, B>) -> Result<Self::Inputs>;

    /// Releases the signals bound by [`WidgetLogic::bind`].
    fn unbind<B: TelemetryBus>(&self, bus: &B, inputs: Self::Inputs);

    /// Returns `true` if every enabling condition holds.
    fn is_enabled(&self, inputs: &Self::Inputs) -> bool;

    /// Computes the enabled payload for the given unit preference.
    fn payload(&self, inputs: &Self::Inputs, unit: UnitType) -> Self::Payload;
}

/// Bindings of one setup/teardown cycle.
struct Session<I> {
    connection: Signal<bool>,
    unit: Signal<UnitType>,
    inputs: I,
    tasks: Vec<JoinHandle<()>>,
}

/// State shared between the deriver handle and its recompute task.
struct Shared<L: WidgetLogic> {
    logic: L,
    output: watch::Sender<DerivedState<L::Payload>>,
    session: Mutex<Option<Session<L::Inputs>>>,
    recomputations: AtomicU64,
}

impl<L: WidgetLogic> Shared<L> {
    fn lock_session(&self) -> MutexGuard<'_, Option<Session<L::Inputs>>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Recomputes from the session's latest values and publishes the result.
    ///
    /// A connection status whose producer is gone counts as disconnected.
    /// Callers hold the session lock.
    fn recompute_with(&self, session: &Session<L::Inputs>) -> DerivedState<L::Payload> {
        let connected = session.connection.is_live() && session.connection.latest();
        let unit = session.unit.latest();
        let enabled = self.logic.is_enabled(&session.inputs);

        let state = decide(connected, enabled, || self.logic.payload(&session.inputs, unit));
        self.recomputations.fetch_add(1, Ordering::Relaxed);
        self.publish(&state);
        state
    }

    /// Replaces the output value, notifying subscribers only on a transition.
    fn publish(&self, state: &DerivedState<L::Payload>) {
        let changed = self.output.send_if_modified(|current| {
            if *current == *state {
                false
            } else {
                *current = state.clone();
                true
            }
        });

        if changed {
            debug!("{} state -> {:?}", self.logic.name(), state);
        }
    }

    fn recompute(&self) -> Option<DerivedState<L::Payload>> {
        let session = self.lock_session();
        let state = session.as_ref().map(|session| self.recompute_with(session));
        state
    }
}

/// Reactive deriver of a widget's display state.
///
/// Call [`StateDeriver::setup`] from within a Tokio runtime to start deriving
/// and [`StateDeriver::teardown`] to stop. Dropping the deriver tears it down.
pub struct StateDeriver<L: WidgetLogic, B: TelemetryBus> {
    shared: Arc<Shared<L>>,
    bus: Arc<B>,
    preferences: Option<Arc<dyn UnitPreferenceProvider>>,
    default_unit: UnitType,
    required: HashSet<String>,
}

impl<L: WidgetLogic, B: TelemetryBus> fmt::Debug for StateDeriver<L, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Session lock before output lock, same order as recompute.
        let bound = self.is_bound();
        f.debug_struct("StateDeriver")
            .field("widget", &self.shared.logic.name())
            .field("state", &self.state())
            .field("bound", &bound)
            .finish_non_exhaustive()
    }
}

impl<L: WidgetLogic, B: TelemetryBus> StateDeriver<L, B> {
    /// Creates an unbound deriver. Its state starts as `Disconnected`.
    #[must_use]
    pub fn new(logic: L, bus: Arc<B>) -> Self {
        let (output, _rx) = watch::channel(DerivedState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                logic,
                output,
                session: Mutex::new(None),
                recomputations: AtomicU64::new(0),
            }),
            bus,
            preferences: None,
            default_unit: UnitType::default(),
            required: HashSet::new(),
        }
    }

    /// Follows a shared unit preference provider instead of a fixed unit.
    #[must_use]
    pub fn with_preferences(mut self, preferences: Arc<dyn UnitPreferenceProvider>) -> Self {
        self.preferences = Some(preferences);
        self
    }

    /// Sets the unit used when no preference provider is attached.
    #[must_use]
    pub fn with_default_unit(mut self, unit: UnitType) -> Self {
        self.default_unit = unit;
        self
    }

    /// Treats the named optional widget signals as required.
    #[must_use]
    pub fn with_required_signals<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required.extend(names.into_iter().map(Into::into));
        self
    }

    /// Returns the widget logic.
    pub fn logic(&self) -> &L {
        &self.shared.logic
    }

    /// Binds every signal and starts deriving.
    ///
    /// Performs one recomputation before returning. Calling `setup` on a
    /// bound deriver does nothing.
    ///
    /// # Errors
    ///
    /// Returns `DeriverError::Runtime` when called outside a Tokio runtime and
    /// `DeriverError::Binding` if the connection status or a required widget
    /// signal has no producer. The state is then `Disconnected` until `setup`
    /// succeeds.
    pub fn setup(&self) -> Result<()> {
        let mut guard = self.shared.lock_session();
        if guard.is_some() {
            warn!("{} deriver is already set up", self.shared.logic.name());
            return Ok(());
        }

        let notify = Arc::new(Notify::new());
        let bound = Handle::try_current()
            .map_err(|e| DeriverError::Runtime(e.to_string()))
            .and_then(|runtime| {
                let session = self.bind(runtime.clone(), Arc::clone(&notify))?;
                Ok((runtime, session))
            });
        let (runtime, mut session) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                warn!("{} deriver setup failed: {}", self.shared.logic.name(), e);
                self.shared.publish(&DerivedState::Disconnected);
                return Err(e);
            }
        };

        let state = self.shared.recompute_with(&session);

        let shared = Arc::clone(&self.shared);
        session.tasks.push(runtime.spawn(async move {
            loop {
                notify.notified().await;
                if shared.recompute().is_none() {
                    break;
                }
            }
        }));

        info!(
            "{} deriver set up ({} signals bound), state: {:?}",
            self.shared.logic.name(),
            session.tasks.len() - 1,
            state
        );
        *guard = Some(session);
        Ok(())
    }

    fn bind(&self, runtime: Handle, notify: Arc<Notify>) -> Result<Session<L::Inputs>> {
        let mut binder = Binder::new(&*self.bus, runtime, notify, &self.required);

        let connection = binder.required(&keys::PRODUCT_CONNECTION)?;
        let inputs = self.shared.logic.bind(&mut binder)?;
        for name in binder.unmatched_required() {
            warn!(
                "{} binds no signal named {}; required entry ignored",
                self.shared.logic.name(),
                name
            );
        }

        let unit = match &self.preferences {
            Some(preferences) => {
                preferences.set_up_listener();
                let unit = Signal::new(UNIT_TYPE_SIGNAL, preferences.subscribe_unit_type());
                binder.listen(&unit);
                unit
            }
            None => Signal::constant(UNIT_TYPE_SIGNAL, self.default_unit),
        };

        Ok(Session {
            connection,
            unit,
            inputs,
            tasks: binder.into_listeners(),
        })
    }

    /// Recomputes and publishes the state from the latest signal values.
    ///
    /// Returns `None` if the deriver is not set up.
    pub fn recompute(&self) -> Option<DerivedState<L::Payload>> {
        self.shared.recompute()
    }

    /// Unbinds every signal and the preference provider.
    ///
    /// Idempotent and safe to call before [`StateDeriver::setup`]. The last
    /// published state stays readable.
    pub fn teardown(&self) {
        let session = self.shared.lock_session().take();
        let Some(session) = session else {
            debug!("{} deriver is not set up", self.shared.logic.name());
            return;
        };

        for task in &session.tasks {
            task.abort();
        }

        self.bus.unsubscribe(session.connection);
        self.shared.logic.unbind(&*self.bus, session.inputs);
        if let Some(preferences) = &self.preferences {
            preferences.cleanup();
        }

        info!("{} deriver torn down", self.shared.logic.name());
    }

    /// Returns `true` between a successful setup and teardown.
    pub fn is_bound(&self) -> bool {
        self.shared.lock_session().is_some()
    }

    /// Subscribes to the state stream.
    ///
    /// The receiver immediately holds the current state and observes every
    /// later transition.
    pub fn subscribe(&self) -> watch::Receiver<DerivedState<L::Payload>> {
        self.shared.output.subscribe()
    }

    /// Returns the current state.
    pub fn state(&self) -> DerivedState<L::Payload> {
        self.shared.output.borrow().clone()
    }

    /// Returns how many recomputations ran since creation.
    pub fn recomputations(&self) -> u64 {
        self.shared.recomputations.load(Ordering::Relaxed)
    }
}

impl<L: WidgetLogic, B: TelemetryBus> Drop for StateDeriver<L, B> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{InMemoryBus, Publisher, SignalKey};
    use crate::preferences::{GlobalPreferences, MockUnitPreferenceProvider};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    const ARMED: SignalKey<bool> = SignalKey::new("Test.Armed");
    const ALTITUDE: SignalKey<f32> = SignalKey::new("Test.Altitude");

    /// Shows the altitude in the preferred unit while armed.
    struct AltitudeLogic;

    struct AltitudeInputs {
        armed: Signal<bool>,
        altitude: Signal<f32>,
    }

    impl WidgetLogic for AltitudeLogic {
        type Inputs = AltitudeInputs;
        type Payload = (f32, UnitType);

        fn name(&self) -> &'static str {
            "altitude"
        }

        fn bind<B: TelemetryBus>(&self, binder: &mut Binder<'_, B>) -> Result<Self::Inputs> {
            Ok(AltitudeInputs {
                armed: binder.optional(&ARMED, false)?,
                altitude: binder.optional(&ALTITUDE, 0.0)?,
            })
        }

        fn unbind<B: TelemetryBus>(&self, bus: &B, inputs: Self::Inputs) {
            bus.unsubscribe(inputs.armed);
            bus.unsubscribe(inputs.altitude);
        }

        fn is_enabled(&self, inputs: &Self::Inputs) -> bool {
            inputs.armed.latest()
        }

        fn payload(&self, inputs: &Self::Inputs, unit: UnitType) -> Self::Payload {
            (inputs.altitude.latest(), unit)
        }
    }

    struct Producers {
        connection: Publisher<bool>,
        armed: Publisher<bool>,
        altitude: Publisher<f32>,
    }

    fn bus_with_producers() -> (Arc<InMemoryBus>, Producers) {
        let bus = Arc::new(InMemoryBus::new());
        let producers = Producers {
            connection: bus.register(&keys::PRODUCT_CONNECTION, true),
            armed: bus.register(&ARMED, false),
            altitude: bus.register(&ALTITUDE, 0.0),
        };
        (bus, producers)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    async fn wait_for_state(
        rx: &mut watch::Receiver<DerivedState<(f32, UnitType)>>,
        expected: DerivedState<(f32, UnitType)>,
    ) {
        tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|state| *state == expected))
            .await
            .expect("timed out waiting for state")
            .expect("output stream closed");
    }

    #[tokio::test]
    async fn test_initial_state_is_disconnected() {
        let (bus, _producers) = bus_with_producers();
        let deriver = StateDeriver::new(AltitudeLogic, bus);

        assert_eq!(deriver.state(), DerivedState::Disconnected);
        assert!(!deriver.is_bound());
        assert_eq!(deriver.recompute(), None);
    }

    #[tokio::test]
    async fn test_setup_recomputes_immediately() {
        let (bus, producers) = bus_with_producers();
        producers.armed.publish(true);
        producers.altitude.publish(30.0);

        let deriver = StateDeriver::new(AltitudeLogic, bus);
        assert_ok!(deriver.setup());

        assert_eq!(deriver.state(), DerivedState::Enabled((30.0, UnitType::Metric)));
        assert_eq!(deriver.recomputations(), 1);
        assert!(deriver.is_bound());
    }

    #[tokio::test]
    async fn test_missing_connection_signal_is_fatal() {
        let bus = Arc::new(InMemoryBus::new());
        let _armed = bus.register(&ARMED, true);

        let deriver = StateDeriver::new(AltitudeLogic, Arc::clone(&bus));
        let err = assert_err!(deriver.setup());
        match err {
            DeriverError::Binding(name) => assert_eq!(name, keys::PRODUCT_CONNECTION.name()),
            other => panic!("Expected Binding error, got: {:?}", other),
        }

        assert_eq!(deriver.state(), DerivedState::Disconnected);
        assert!(!deriver.is_bound());
        settle().await;
        assert_eq!(bus.subscriber_count(&ARMED), 0);
    }

    #[tokio::test]
    async fn test_retry_after_binding_error() {
        let bus = Arc::new(InMemoryBus::new());
        let deriver = StateDeriver::new(AltitudeLogic, Arc::clone(&bus));
        assert_err!(deriver.setup());

        let _connection = bus.register(&keys::PRODUCT_CONNECTION, true);
        assert_ok!(deriver.setup());
        assert_eq!(deriver.state(), DerivedState::Disabled);
    }

    #[tokio::test]
    async fn test_missing_optional_signal_degrades_to_default() {
        let bus = Arc::new(InMemoryBus::new());
        let _connection = bus.register(&keys::PRODUCT_CONNECTION, true);

        let deriver = StateDeriver::new(AltitudeLogic, bus);
        assert_ok!(deriver.setup());
        assert_eq!(deriver.state(), DerivedState::Disabled);
    }

    #[tokio::test]
    async fn test_required_signal_configuration() {
        let bus = Arc::new(InMemoryBus::new());
        let _connection = bus.register(&keys::PRODUCT_CONNECTION, true);
        let _armed = bus.register(&ARMED, true);

        let deriver =
            StateDeriver::new(AltitudeLogic, Arc::clone(&bus)).with_required_signals([ALTITUDE.name()]);
        match deriver.setup() {
            Err(DeriverError::Binding(name)) => assert_eq!(name, ALTITUDE.name()),
            other => panic!("Expected Binding error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_loss_overrides_other_signals() {
        let (bus, producers) = bus_with_producers();
        producers.armed.publish(true);

        let deriver = StateDeriver::new(AltitudeLogic, bus);
        deriver.setup().unwrap();
        let mut rx = deriver.subscribe();
        assert!(deriver.state().is_enabled());

        producers.connection.publish(false);
        wait_for_state(&mut rx, DerivedState::Disconnected).await;

        producers.altitude.publish(99.0);
        settle().await;
        assert_eq!(deriver.state(), DerivedState::Disconnected);
    }

    #[tokio::test]
    async fn test_connection_producer_gone_forces_disconnected() {
        let (bus, producers) = bus_with_producers();
        producers.armed.publish(true);

        let deriver = StateDeriver::new(AltitudeLogic, Arc::clone(&bus));
        deriver.setup().unwrap();
        let mut rx = deriver.subscribe();
        assert!(deriver.state().is_enabled());

        let Producers {
            connection,
            armed: _armed,
            altitude,
        } = producers;
        drop(connection);
        assert!(bus.remove(keys::PRODUCT_CONNECTION.name()));
        wait_for_state(&mut rx, DerivedState::Disconnected).await;

        altitude.publish(200.0);
        settle().await;
        assert_eq!(deriver.state(), DerivedState::Disconnected);
        assert_eq!(deriver.recompute(), Some(DerivedState::Disconnected));
    }

    #[test]
    fn test_setup_outside_runtime_is_error() {
        let (bus, _producers) = bus_with_producers();
        let deriver = StateDeriver::new(AltitudeLogic, Arc::clone(&bus));

        match deriver.setup() {
            Err(DeriverError::Runtime(_)) => {}
            other => panic!("Expected Runtime error, got: {:?}", other),
        }
        assert!(!deriver.is_bound());
        assert_eq!(deriver.state(), DerivedState::Disconnected);
        assert_eq!(bus.subscriber_count(&ARMED), 0);
    }

    #[tokio::test]
    async fn test_unknown_required_name_does_not_fail_setup() {
        let (bus, producers) = bus_with_producers();
        producers.armed.publish(true);

        let deriver = StateDeriver::new(AltitudeLogic, bus).with_required_signals(["Altitude"]);
        assert_ok!(deriver.setup());
        assert!(deriver.state().is_enabled());
    }

    #[tokio::test]
    async fn test_updates_trigger_recompute() {
        let (bus, producers) = bus_with_producers();
        let deriver = StateDeriver::new(AltitudeLogic, bus);
        deriver.setup().unwrap();
        let mut rx = deriver.subscribe();
        assert_eq!(*rx.borrow_and_update(), DerivedState::Disabled);

        producers.altitude.publish(12.0);
        producers.armed.publish(true);
        wait_for_state(&mut rx, DerivedState::Enabled((12.0, UnitType::Metric))).await;

        producers.armed.publish(false);
        wait_for_state(&mut rx, DerivedState::Disabled).await;
    }

    #[tokio::test]
    async fn test_racing_updates_coalesce() {
        let (bus, producers) = bus_with_producers();
        let deriver = StateDeriver::new(AltitudeLogic, bus);
        deriver.setup().unwrap();
        let before = deriver.recomputations();

        producers.armed.publish(true);
        producers.altitude.publish(1.0);
        producers.altitude.publish(2.0);
        producers.connection.publish(true);
        settle().await;

        assert_eq!(deriver.state(), DerivedState::Enabled((2.0, UnitType::Metric)));
        let ran = deriver.recomputations() - before;
        assert!(ran >= 1 && ran < 4, "expected coalesced recomputation, ran {}", ran);
    }

    #[tokio::test]
    async fn test_arrival_order_does_not_matter() {
        let (bus_a, producers_a) = bus_with_producers();
        let (bus_b, producers_b) = bus_with_producers();
        let deriver_a = StateDeriver::new(AltitudeLogic, bus_a);
        let deriver_b = StateDeriver::new(AltitudeLogic, bus_b);
        deriver_a.setup().unwrap();
        deriver_b.setup().unwrap();

        producers_a.altitude.publish(5.0);
        producers_a.armed.publish(true);
        producers_a.connection.publish(true);

        producers_b.connection.publish(true);
        producers_b.armed.publish(true);
        producers_b.altitude.publish(5.0);
        settle().await;

        assert_eq!(deriver_a.state(), deriver_b.state());
        assert_eq!(deriver_a.state(), DerivedState::Enabled((5.0, UnitType::Metric)));
    }

    #[tokio::test]
    async fn test_no_publication_after_teardown() {
        let (bus, producers) = bus_with_producers();
        let deriver = StateDeriver::new(AltitudeLogic, bus);
        deriver.setup().unwrap();
        let mut rx = deriver.subscribe();
        rx.borrow_and_update();

        deriver.teardown();
        producers.armed.publish(true);
        producers.connection.publish(false);
        settle().await;

        assert!(!rx.has_changed().unwrap());
        assert_eq!(deriver.state(), DerivedState::Disabled);
        assert_eq!(deriver.recompute(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_teardown_during_concurrent_updates() {
        let (bus, producers) = bus_with_producers();
        producers.armed.publish(true);

        let deriver = StateDeriver::new(AltitudeLogic, bus);
        deriver.setup().unwrap();
        let mut rx = deriver.subscribe();

        let Producers {
            connection: _connection,
            armed: _armed,
            altitude,
        } = producers;
        let publishing = tokio::spawn(async move {
            let mut value = 0.0_f32;
            loop {
                value += 1.0;
                altitude.publish(value);
                tokio::task::yield_now().await;
            }
        });

        for _ in 0..5 {
            tokio::time::timeout(Duration::from_secs(1), rx.changed())
                .await
                .expect("timed out waiting for a recomputation")
                .expect("output stream closed");
        }

        deriver.teardown();
        let last = rx.borrow_and_update().clone();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!rx.has_changed().unwrap());
        assert_eq!(deriver.state(), last);
        assert_eq!(deriver.recompute(), None);
        publishing.abort();
    }

    #[tokio::test]
    async fn test_teardown_releases_subscriptions() {
        let (bus, _producers) = bus_with_producers();
        let deriver = StateDeriver::new(AltitudeLogic, Arc::clone(&bus));
        deriver.setup().unwrap();
        assert!(bus.subscriber_count(&ARMED) > 0);

        deriver.teardown();
        settle().await;
        assert_eq!(bus.subscriber_count(&keys::PRODUCT_CONNECTION), 0);
        assert_eq!(bus.subscriber_count(&ARMED), 0);
        assert_eq!(bus.subscriber_count(&ALTITUDE), 0);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent_and_safe_before_setup() {
        let (bus, _producers) = bus_with_producers();
        let deriver = StateDeriver::new(AltitudeLogic, bus);

        deriver.teardown();
        deriver.setup().unwrap();
        deriver.teardown();
        deriver.teardown();
        assert!(!deriver.is_bound());
    }

    #[tokio::test]
    async fn test_setup_twice_is_noop() {
        let (bus, _producers) = bus_with_producers();
        let deriver = StateDeriver::new(AltitudeLogic, Arc::clone(&bus));

        deriver.setup().unwrap();
        let subscribers = bus.subscriber_count(&ARMED);
        deriver.setup().unwrap();

        assert_eq!(bus.subscriber_count(&ARMED), subscribers);
        assert_eq!(deriver.recomputations(), 1);
    }

    #[tokio::test]
    async fn test_derivers_sharing_a_signal_do_not_interfere() {
        let (bus, producers) = bus_with_producers();
        producers.armed.publish(true);

        let first = StateDeriver::new(AltitudeLogic, Arc::clone(&bus));
        let second = StateDeriver::new(AltitudeLogic, Arc::clone(&bus));
        first.setup().unwrap();
        second.setup().unwrap();

        first.teardown();
        let mut rx = second.subscribe();
        producers.altitude.publish(8.0);
        wait_for_state(&mut rx, DerivedState::Enabled((8.0, UnitType::Metric))).await;

        assert_eq!(first.state(), DerivedState::Enabled((0.0, UnitType::Metric)));
    }

    #[tokio::test]
    async fn test_default_unit_without_preferences() {
        let (bus, producers) = bus_with_producers();
        producers.armed.publish(true);

        let deriver = StateDeriver::new(AltitudeLogic, bus).with_default_unit(UnitType::Imperial);
        deriver.setup().unwrap();
        assert_eq!(deriver.state(), DerivedState::Enabled((0.0, UnitType::Imperial)));
    }

    #[tokio::test]
    async fn test_unit_preference_change_recomputes() {
        let (bus, producers) = bus_with_producers();
        producers.armed.publish(true);
        producers.altitude.publish(3.0);
        let preferences = Arc::new(GlobalPreferences::new(UnitType::Metric));

        let deriver = StateDeriver::new(AltitudeLogic, bus).with_preferences(preferences.clone());
        deriver.setup().unwrap();
        assert!(preferences.is_listening());
        let mut rx = deriver.subscribe();

        preferences.set_unit_type(UnitType::Imperial);
        wait_for_state(&mut rx, DerivedState::Enabled((3.0, UnitType::Imperial))).await;

        deriver.teardown();
        assert!(!preferences.is_listening());
    }

    #[tokio::test]
    async fn test_shared_preferences_stay_listening_until_last_teardown() {
        let (bus, _producers) = bus_with_producers();
        let preferences = Arc::new(GlobalPreferences::new(UnitType::Metric));

        let first = StateDeriver::new(AltitudeLogic, Arc::clone(&bus))
            .with_preferences(preferences.clone());
        let second = StateDeriver::new(AltitudeLogic, bus).with_preferences(preferences.clone());
        first.setup().unwrap();
        second.setup().unwrap();

        first.teardown();
        assert!(preferences.is_listening());

        second.teardown();
        assert!(!preferences.is_listening());
    }

    #[tokio::test]
    async fn test_preference_cleanup_runs_once() {
        let (bus, _producers) = bus_with_producers();
        let (_unit_tx, unit_rx) = watch::channel(UnitType::Metric);

        let mut preferences = MockUnitPreferenceProvider::new();
        preferences.expect_set_up_listener().times(1).return_const(());
        preferences.expect_subscribe_unit_type().times(1).return_const(unit_rx);
        preferences.expect_cleanup().times(1).return_const(());

        let deriver = StateDeriver::new(AltitudeLogic, bus).with_preferences(Arc::new(preferences));
        deriver.setup().unwrap();
        deriver.teardown();
        deriver.teardown();
    }

    #[tokio::test]
    async fn test_drop_tears_down() {
        let (bus, _producers) = bus_with_producers();
        {
            let deriver = StateDeriver::new(AltitudeLogic, Arc::clone(&bus));
            deriver.setup().unwrap();
        }
        settle().await;
        assert_eq!(bus.subscriber_count(&ARMED), 0);
    }
}
