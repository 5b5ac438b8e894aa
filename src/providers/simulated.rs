//! Scriptable provider for demos and tests
//!
//! A `SimulatedProvider` behaves like a real backend from the orchestrator's
//! point of view. Its paired [`SimulatorHandle`] stays with the caller and
//! drives it: connection events, readings, geofence transitions and
//! activities can all be injected by hand, and every call the orchestrator
//! makes is recorded.

use super::now_ms;
use locus_core_failover::{
    Accuracy, AdapterError, AdapterKind, AdapterResult, ConnectionListener, DetectedActivity,
    GeofenceTransition, LocationParams, PendingOperation, ProviderAdapter, ProviderContext,
    Reading, ReadingStore, Transition, UpdateListener,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const MIN_EMIT_PERIOD: Duration = Duration::from_millis(50);

/// Northward drift per emitted reading, in degrees (about 1.1 m)
const DRIFT_DEG_PER_STEP: f64 = 0.00001;

/// A call made on a simulated provider
#[derive(Debug, Clone, PartialEq)]
pub enum SimCall {
    Initialize { session: String },
    Start { params: LocationParams, single_shot: bool },
    Stop,
    Apply(PendingOperation),
}

#[derive(Default)]
struct SimState {
    calls: Vec<SimCall>,
    listener: Option<Arc<dyn UpdateListener>>,
    single_shot: bool,
    connection: Option<Arc<dyn ConnectionListener>>,
    connected: bool,
    fences: Vec<String>,
    reject_fence: Option<String>,
    last: Option<Reading>,
    store: Option<Arc<dyn ReadingStore>>,
}

struct Shared {
    name: String,
    state: Mutex<SimState>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Caller-side remote control for a [`SimulatedProvider`]
#[derive(Clone)]
pub struct SimulatorHandle {
    shared: Arc<Shared>,
}

impl SimulatorHandle {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Report the backend as connected
    pub fn connect(&self) {
        let listener = {
            let mut state = self.shared.state();
            state.connected = true;
            state.connection.clone()
        };
        match listener {
            Some(l) => l.on_connected(),
            None => warn!(provider = self.name(), "Connect raised with no listener installed"),
        }
    }

    pub fn suspend(&self) {
        let listener = {
            let mut state = self.shared.state();
            state.connected = false;
            state.connection.clone()
        };
        if let Some(l) = listener {
            l.on_suspended();
        }
    }

    pub fn fail(&self) {
        let listener = {
            let mut state = self.shared.state();
            state.connected = false;
            state.connection.clone()
        };
        if let Some(l) = listener {
            l.on_failed();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state().connected
    }

    /// Deliver a reading to the started listener. Returns false when nothing
    /// is listening.
    pub fn emit(&self, reading: Reading) -> bool {
        let (listener, store) = {
            let mut state = self.shared.state();
            let Some(listener) = state.listener.clone() else {
                return false;
            };
            if state.single_shot {
                state.listener = None;
            }
            state.last = Some(reading.clone());
            (listener, state.store.clone())
        };
        if let Some(store) = store {
            store.put(&self.shared.name, &reading);
        }
        listener.on_location(&reading);
        true
    }

    /// Report a transition for a registered fence
    pub fn trigger(&self, fence_id: &str, transition: Transition) -> bool {
        let (listener, reading) = {
            let state = self.shared.state();
            if !state.fences.iter().any(|id| id == fence_id) {
                return false;
            }
            let Some(listener) = state.listener.clone() else {
                return false;
            };
            (listener, state.last.clone())
        };
        listener.on_geofence_transition(&GeofenceTransition {
            fence_id: fence_id.to_string(),
            transition,
            reading,
        });
        true
    }

    pub fn detect(&self, activity: DetectedActivity) -> bool {
        let listener = self.shared.state().listener.clone();
        match listener {
            Some(l) => {
                l.on_activity(&activity);
                true
            }
            None => false,
        }
    }

    /// Make the backend reject operations for `fence_id`
    pub fn reject_fence(&self, fence_id: Option<&str>) {
        self.shared.state().reject_fence = fence_id.map(str::to_string);
    }

    pub fn calls(&self) -> Vec<SimCall> {
        self.shared.state().calls.clone()
    }

    pub fn initializations(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, SimCall::Initialize { .. }))
            .count()
    }

    pub fn starts(&self) -> Vec<(LocationParams, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SimCall::Start {
                    params,
                    single_shot,
                } => Some((params, single_shot)),
                _ => None,
            })
            .collect()
    }

    pub fn applied(&self) -> Vec<PendingOperation> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SimCall::Apply(op) => Some(op),
                _ => None,
            })
            .collect()
    }

    /// Fence ids currently registered with the backend
    pub fn fences(&self) -> Vec<String> {
        self.shared.state().fences.clone()
    }

    pub fn is_started(&self) -> bool {
        self.shared.state().listener.is_some()
    }
}

/// Builder for [`SimulatedProvider`]
#[derive(Debug, Clone)]
pub struct SimulatedProviderBuilder {
    name: String,
    kind: AdapterKind,
    single_shot: bool,
    connect_after: Option<Duration>,
    fail_after: Option<Duration>,
    origin: Option<(f64, f64)>,
}

impl SimulatedProviderBuilder {
    pub fn service_backed(mut self) -> Self {
        self.kind = AdapterKind::ServiceBacked;
        self
    }

    pub fn direct(mut self) -> Self {
        self.kind = AdapterKind::Direct;
        self
    }

    pub fn single_shot(mut self, supported: bool) -> Self {
        self.single_shot = supported;
        self
    }

    /// Service-backed only: connect on its own after `delay`
    pub fn connect_after(mut self, delay: Duration) -> Self {
        self.connect_after = Some(delay);
        self
    }

    /// Service-backed only: fail on its own after `delay`
    pub fn fail_after(mut self, delay: Duration) -> Self {
        self.fail_after = Some(delay);
        self
    }

    /// Emit readings drifting north from this point while started
    pub fn origin(mut self, latitude: f64, longitude: f64) -> Self {
        self.origin = Some((latitude, longitude));
        self
    }

    pub fn build(self) -> (SimulatedProvider, SimulatorHandle) {
        let shared = Arc::new(Shared {
            name: self.name,
            state: Mutex::new(SimState::default()),
        });
        let provider = SimulatedProvider {
            shared: shared.clone(),
            kind: self.kind,
            single_shot: self.single_shot,
            connect_after: self.connect_after,
            fail_after: self.fail_after,
            origin: self.origin,
            timers: Vec::new(),
            stream: None,
        };
        (provider, SimulatorHandle { shared })
    }
}

/// Scriptable [`ProviderAdapter`]
pub struct SimulatedProvider {
    shared: Arc<Shared>,
    kind: AdapterKind,
    single_shot: bool,
    connect_after: Option<Duration>,
    fail_after: Option<Duration>,
    origin: Option<(f64, f64)>,
    timers: Vec<JoinHandle<()>>,
    stream: Option<JoinHandle<()>>,
}

impl SimulatedProvider {
    pub fn builder(name: impl Into<String>) -> SimulatedProviderBuilder {
        SimulatedProviderBuilder {
            name: name.into(),
            kind: AdapterKind::Direct,
            single_shot: true,
            connect_after: None,
            fail_after: None,
            origin: None,
        }
    }

    fn handle(&self) -> SimulatorHandle {
        SimulatorHandle {
            shared: self.shared.clone(),
        }
    }

    fn schedule(&mut self, delay: Duration, action: fn(&SimulatorHandle)) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(provider = %self.shared.name, "No runtime; scheduled connection event dropped");
            return;
        };
        let handle = self.handle();
        self.timers.push(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            action(&handle);
        }));
    }

    fn start_stream(&mut self, params: LocationParams, single_shot: bool) {
        let Some((latitude, longitude)) = self.origin else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let handle = self.handle();
        let period = params.interval.max(MIN_EMIT_PERIOD);
        let accuracy = simulated_accuracy(params.accuracy);
        self.stream = Some(runtime.spawn(async move {
            let mut step = 0u64;
            loop {
                tokio::time::sleep(period).await;
                if !handle.is_connected() {
                    continue;
                }
                step += 1;
                let reading = Reading::new(
                    handle.name(),
                    latitude + step as f64 * DRIFT_DEG_PER_STEP,
                    longitude,
                )
                .with_time(now_ms())
                .with_accuracy(accuracy);
                if !handle.emit(reading) || single_shot {
                    break;
                }
            }
        }));
    }

    fn stop_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.abort();
        }
    }

    fn record(&self, call: SimCall) {
        self.shared.state().calls.push(call);
    }
}

fn simulated_accuracy(accuracy: Accuracy) -> f32 {
    match accuracy {
        Accuracy::High => 5.0,
        Accuracy::Medium => 30.0,
        Accuracy::Low => 150.0,
        Accuracy::Lowest => 1_000.0,
    }
}

impl ProviderAdapter for SimulatedProvider {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn kind(&self) -> AdapterKind {
        self.kind
    }

    fn supports_single_shot(&self) -> bool {
        self.single_shot
    }

    fn initialize(&mut self, ctx: &ProviderContext) {
        self.record(SimCall::Initialize {
            session: ctx.session().to_string(),
        });
        {
            let mut state = self.shared.state();
            state.store = ctx.store().cloned();
            if self.kind == AdapterKind::Direct {
                state.connected = true;
            }
        }

        if self.kind == AdapterKind::ServiceBacked {
            if let Some(delay) = self.connect_after {
                self.schedule(delay, SimulatorHandle::connect);
            }
            if let Some(delay) = self.fail_after {
                self.schedule(delay, SimulatorHandle::fail);
            }
        }
    }

    fn start(
        &mut self,
        listener: Arc<dyn UpdateListener>,
        params: LocationParams,
        single_shot: bool,
    ) -> AdapterResult<()> {
        if single_shot && !self.single_shot {
            return Err(AdapterError::UnsupportedMode {
                adapter: self.shared.name.clone(),
            });
        }

        self.record(SimCall::Start {
            params,
            single_shot,
        });
        {
            let mut state = self.shared.state();
            state.listener = Some(listener);
            state.single_shot = single_shot;
        }
        debug!(provider = %self.shared.name, params = %params, "Simulated stream started");

        self.stop_stream();
        self.start_stream(params, single_shot);
        Ok(())
    }

    fn stop(&mut self) {
        self.record(SimCall::Stop);
        self.stop_stream();
        self.shared.state().listener = None;
    }

    fn last_reading(&self) -> Option<Reading> {
        let state = self.shared.state();
        state
            .last
            .clone()
            .or_else(|| state.store.as_ref().and_then(|s| s.get(&self.shared.name)))
    }

    fn apply(&mut self, op: &PendingOperation) -> AdapterResult<()> {
        let mut state = self.shared.state();
        if !state.connected {
            return Err(AdapterError::NotConnected {
                adapter: self.shared.name.clone(),
            });
        }
        if state.reject_fence.as_deref() == Some(op.id()) {
            return Err(AdapterError::Rejected {
                adapter: self.shared.name.clone(),
                message: format!("fence '{}' refused", op.id()),
            });
        }

        match op {
            PendingOperation::Add(fence) => {
                if !state.fences.contains(&fence.id) {
                    state.fences.push(fence.id.clone());
                }
            }
            PendingOperation::Remove(id) => state.fences.retain(|f| f != id),
        }
        state.calls.push(SimCall::Apply(op.clone()));
        Ok(())
    }

    fn connection_listener(&self) -> Option<Arc<dyn ConnectionListener>> {
        self.shared.state().connection.clone()
    }

    fn set_connection_listener(&mut self, listener: Arc<dyn ConnectionListener>) {
        self.shared.state().connection = Some(listener);
    }
}

impl Drop for SimulatedProvider {
    fn drop(&mut self) {
        self.stop_stream();
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use locus_core_failover::GeoFence;

    #[derive(Default)]
    struct Collector {
        readings: Mutex<Vec<Reading>>,
        transitions: Mutex<Vec<GeofenceTransition>>,
    }

    impl UpdateListener for Collector {
        fn on_location(&self, reading: &Reading) {
            self.readings.lock().unwrap().push(reading.clone());
        }

        fn on_geofence_transition(&self, transition: &GeofenceTransition) {
            self.transitions.lock().unwrap().push(transition.clone());
        }
    }

    #[test]
    fn test_single_shot_unsupported() {
        let (mut provider, handle) = SimulatedProvider::builder("composite")
            .single_shot(false)
            .build();
        let result = provider.start(
            Arc::new(Collector::default()),
            LocationParams::NAVIGATION,
            true,
        );
        assert!(matches!(result, Err(AdapterError::UnsupportedMode { .. })));
        assert!(handle.starts().is_empty());
    }

    #[test]
    fn test_single_shot_delivers_once() {
        let (mut provider, handle) = SimulatedProvider::builder("gps").build();
        provider.initialize(&ProviderContext::new("t"));
        let collector = Arc::new(Collector::default());
        provider
            .start(collector.clone(), LocationParams::NAVIGATION, true)
            .unwrap();

        assert!(handle.emit(Reading::new("gps", 1.0, 1.0)));
        assert!(!handle.emit(Reading::new("gps", 2.0, 2.0)));
        assert_eq!(collector.readings.lock().unwrap().len(), 1);
        assert_eq!(provider.last_reading().unwrap().latitude, 1.0);
    }

    #[test]
    fn test_fences_and_transitions() {
        let (mut provider, handle) = SimulatedProvider::builder("fences").build();
        provider.initialize(&ProviderContext::new("t"));
        let collector = Arc::new(Collector::default());
        provider
            .start(collector.clone(), LocationParams::BEST_EFFORT, false)
            .unwrap();

        provider
            .apply(&PendingOperation::Add(GeoFence::new("home", 1.0, 1.0, 50.0)))
            .unwrap();
        assert!(handle.trigger("home", Transition::Enter));
        assert!(!handle.trigger("work", Transition::Enter));

        provider
            .apply(&PendingOperation::Remove("home".to_string()))
            .unwrap();
        assert!(handle.fences().is_empty());
        assert_eq!(collector.transitions.lock().unwrap()[0].fence_id, "home");
    }

    #[test]
    fn test_service_backed_rejects_apply_until_connected() {
        let (mut provider, _handle) = SimulatedProvider::builder("svc").service_backed().build();
        provider.initialize(&ProviderContext::new("t"));
        let result = provider.apply(&PendingOperation::Remove("x".to_string()));
        assert!(matches!(result, Err(AdapterError::NotConnected { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_origin_stream_emits_at_interval() {
        let (mut provider, handle) = SimulatedProvider::builder("sim")
            .origin(10.0, 20.0)
            .build();
        provider.initialize(&ProviderContext::new("t"));
        let collector = Arc::new(Collector::default());
        provider
            .start(collector.clone(), LocationParams::NAVIGATION, false)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1_750)).await;
        assert_eq!(collector.readings.lock().unwrap().len(), 3);

        provider.stop();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(collector.readings.lock().unwrap().len(), 3);
        assert!(!handle.is_started());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_connect() {
        let (mut provider, handle) = SimulatedProvider::builder("svc")
            .service_backed()
            .connect_after(Duration::from_millis(200))
            .build();

        #[derive(Default)]
        struct Flag(Mutex<bool>);
        impl ConnectionListener for Flag {
            fn on_connected(&self) {
                *self.0.lock().unwrap() = true;
            }
        }
        let flag = Arc::new(Flag::default());
        provider.set_connection_listener(flag.clone());
        provider.initialize(&ProviderContext::new("t"));

        assert!(!handle.is_connected());
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(handle.is_connected());
        assert!(*flag.0.lock().unwrap());
    }
}
