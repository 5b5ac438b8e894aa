//! FailoverOrchestrator: ordered provider failover with request replay
//!
//! # Design
//!
//! The orchestrator owns an ordered list of adapters and a pointer to the
//! current one. All state lives in a single tokio task; callers talk to it
//! through a cloneable [`FailoverHandle`] and backends post connection events
//! into the same channel. Commands and events are therefore applied one at a
//! time, in arrival order.
//!
//! ```text
//! caller ──► FailoverHandle ──┐
//!                             ├──► mpsc ──► orchestrator task ──► adapter[current]
//! backend ─► FailoverListener ┘                  │
//!                                    suspended/failed: advance pointer,
//!                                    initialize next, replay last start
//!                                    connected: drain pending operations
//! ```
//!
//! The pointer only moves forward. A failed adapter is never retried; once
//! the list is exhausted the caller's listener receives a single
//! [`FailoverError::NoProvidersAvailable`] and every later command returns it.
//!
//! # Example
//!
//! ```no_run
//! use locus_core_failover::{
//!     FailoverConfig, FailoverOrchestrator, LocationParams, ProviderAdapter, UpdateListener,
//! };
//! use std::sync::Arc;
//!
//! struct Printer;
//! impl UpdateListener for Printer {}
//!
//! # async fn example(providers: Vec<Box<dyn ProviderAdapter>>) -> Result<(), Box<dyn std::error::Error>> {
//! let (handle, _task) = FailoverOrchestrator::spawn(providers, FailoverConfig::default())?;
//! handle.initialize(Default::default()).await?;
//! handle
//!     .start(Arc::new(Printer), LocationParams::NAVIGATION, false)
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::adapter::{AdapterKind, ConnectionListener, ProviderAdapter, ProviderContext, UpdateListener};
use crate::connection_state::{ConnectionStateMachine, ServiceConnectionState};
use crate::error::{AdapterError, FailoverError, FailoverResult};
use crate::pending::{PendingOperation, PendingOperationQueue};
use crate::types::{GeoFence, LocationParams, Reading};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Configuration for the orchestrator
#[derive(Debug, Clone, Default)]
pub struct FailoverConfig {
    /// Treat a service-backed adapter that is still connecting after this
    /// long as failed. `None` waits forever.
    pub connect_timeout: Option<Duration>,
}

impl FailoverConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

/// Connection events raised by service-backed adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Suspended,
    Failed,
}

/// The most recent `start` request, replayed after failover
#[derive(Clone)]
pub struct LastRequest {
    pub listener: Arc<dyn UpdateListener>,
    pub params: LocationParams,
    pub single_shot: bool,
}

impl fmt::Debug for LastRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LastRequest")
            .field("params", &self.params)
            .field("single_shot", &self.single_shot)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSnapshot {
    /// Index of the current provider; equals the provider count once exhausted
    pub current_index: usize,
    pub current_provider: Option<String>,
    pub current_state: Option<ServiceConnectionState>,
    /// Name and connection state of every provider, in priority order
    pub providers: Vec<(String, ServiceConnectionState)>,
    pub exhausted: bool,
    /// Whether a started stream should be resumed after failover
    pub active: bool,
    pub pending: usize,
    pub last_params: Option<LocationParams>,
    pub failovers: u64,
}

enum Message {
    Initialize {
        ctx: ProviderContext,
        reply: oneshot::Sender<FailoverResult<()>>,
    },
    Start {
        request: Option<LastRequest>,
        reply: oneshot::Sender<FailoverResult<()>>,
    },
    Configure {
        params: LocationParams,
    },
    Stop {
        reply: oneshot::Sender<FailoverResult<()>>,
    },
    LastReading {
        reply: oneshot::Sender<Option<Reading>>,
    },
    Enqueue {
        ops: Vec<PendingOperation>,
        reply: oneshot::Sender<FailoverResult<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<OrchestratorSnapshot>,
    },
    Connection {
        index: usize,
        event: ConnectionEvent,
    },
    ConnectTimeout {
        index: usize,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Decorates an adapter's own connection listener: the original listener
/// still sees every event, then the event is posted to the orchestrator
/// tagged with the adapter's index.
struct FailoverListener {
    index: usize,
    inner: Option<Arc<dyn ConnectionListener>>,
    tx: mpsc::WeakUnboundedSender<Message>,
}

impl FailoverListener {
    fn post(&self, event: ConnectionEvent) {
        if let Some(tx) = self.tx.upgrade() {
            let _ = tx.send(Message::Connection {
                index: self.index,
                event,
            });
        }
    }
}

impl ConnectionListener for FailoverListener {
    fn on_connected(&self) {
        if let Some(inner) = &self.inner {
            inner.on_connected();
        }
        self.post(ConnectionEvent::Connected);
    }

    fn on_suspended(&self) {
        if let Some(inner) = &self.inner {
            inner.on_suspended();
        }
        self.post(ConnectionEvent::Suspended);
    }

    fn on_failed(&self) {
        if let Some(inner) = &self.inner {
            inner.on_failed();
        }
        self.post(ConnectionEvent::Failed);
    }
}

struct ProviderSlot {
    adapter: Box<dyn ProviderAdapter>,
    state: ConnectionStateMachine,
}

/// Owns the provider list and routes every call to the current adapter
pub struct FailoverOrchestrator {
    slots: Vec<ProviderSlot>,
    current: usize,
    last_request: Option<LastRequest>,
    active: bool,
    exhausted: bool,
    failovers: u64,
    pending: PendingOperationQueue,
    ctx: Option<ProviderContext>,
    config: FailoverConfig,
    tx: mpsc::WeakUnboundedSender<Message>,
}

impl FailoverOrchestrator {
    /// Spawn the orchestrator task on the current tokio runtime.
    ///
    /// The task runs until [`FailoverHandle::shutdown`] is called or every
    /// handle has been dropped.
    pub fn spawn(
        providers: Vec<Box<dyn ProviderAdapter>>,
        config: FailoverConfig,
    ) -> FailoverResult<(FailoverHandle, JoinHandle<()>)> {
        if providers.is_empty() {
            return Err(FailoverError::EmptyProviderList);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let slots = providers
            .into_iter()
            .map(|adapter| ProviderSlot {
                state: ConnectionStateMachine::new(adapter.name()),
                adapter,
            })
            .collect();

        let orchestrator = Self {
            slots,
            current: 0,
            last_request: None,
            active: false,
            exhausted: false,
            failovers: 0,
            pending: PendingOperationQueue::new(),
            ctx: None,
            config,
            tx: tx.downgrade(),
        };

        let task = tokio::spawn(orchestrator.run(rx));
        Ok((FailoverHandle { tx }, task))
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        info!(
            providers = self.slots.len(),
            chain = %self.provider_names().join(" -> "),
            "Failover orchestrator started"
        );

        while let Some(message) = rx.recv().await {
            if let Message::Shutdown { reply } = message {
                if let Some(slot) = self.slots.get_mut(self.current) {
                    slot.adapter.stop();
                }
                let _ = reply.send(());
                break;
            }
            self.handle(message);
        }

        info!(failovers = self.failovers, "Failover orchestrator stopped");
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::Initialize { reply, .. } if self.exhausted => {
                let _ = reply.send(Err(self.exhausted_error()));
            }
            Message::Initialize { ctx, reply } => {
                self.ctx = Some(ctx);
                self.initialize_current();
                let _ = reply.send(Ok(()));
            }
            Message::Start { request, reply } => {
                let _ = reply.send(self.start(request));
            }
            Message::Configure { params } => self.configure(params),
            Message::Stop { reply } if self.exhausted => {
                let _ = reply.send(Err(self.exhausted_error()));
            }
            Message::Stop { reply } => {
                self.stop();
                let _ = reply.send(Ok(()));
            }
            Message::LastReading { reply } => {
                let _ = reply.send(self.last_reading());
            }
            // Nothing would ever drain the queue again
            Message::Enqueue { reply, .. } if self.exhausted => {
                let _ = reply.send(Err(self.exhausted_error()));
            }
            Message::Enqueue { ops, reply } => {
                for op in ops {
                    self.pending.enqueue(op);
                }
                self.drain_pending();
                let _ = reply.send(Ok(()));
            }
            Message::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Message::Connection { index, event } => self.on_connection_event(index, event),
            Message::ConnectTimeout { index } => self.on_connect_timeout(index),
            Message::Shutdown { .. } => {}
        }
    }

    fn provider_names(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.adapter.name()).collect()
    }

    fn initialize_current(&mut self) {
        let index = self.current;
        let Some(slot) = self.slots.get_mut(index) else {
            warn!(index, "No provider left to initialize");
            return;
        };

        if slot.state.state() != ServiceConnectionState::Disconnected {
            debug!(provider = slot.adapter.name(), state = %slot.state.state(), "Provider already initialized");
            return;
        }

        let kind = slot.adapter.kind();
        if kind == AdapterKind::ServiceBacked {
            let listener = FailoverListener {
                index,
                inner: slot.adapter.connection_listener(),
                tx: self.tx.clone(),
            };
            slot.adapter.set_connection_listener(Arc::new(listener));
        }

        let ctx = self.ctx.clone().unwrap_or_default();
        info!(provider = slot.adapter.name(), index, session = ctx.session(), "Initializing provider");
        slot.state.on_initialize();
        slot.adapter.initialize(&ctx);

        match kind {
            AdapterKind::Direct => {
                slot.state.on_connected();
                self.drain_pending();
            }
            AdapterKind::ServiceBacked => {
                if let Some(timeout) = self.config.connect_timeout {
                    self.schedule_connect_timeout(index, timeout);
                }
            }
        }
    }

    fn schedule_connect_timeout(&self, index: usize, timeout: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Message::ConnectTimeout { index });
            }
        });
    }

    fn exhausted_error(&self) -> FailoverError {
        FailoverError::NoProvidersAvailable {
            attempted: self.slots.len(),
        }
    }

    fn start(&mut self, request: Option<LastRequest>) -> FailoverResult<()> {
        if self.exhausted {
            return Err(self.exhausted_error());
        }

        let request = match request.or_else(|| self.last_request.clone()) {
            Some(request) => request,
            None => {
                warn!("Restart requested before any start; nothing to resume");
                return Ok(());
            }
        };

        let slot = &self.slots[self.current];
        if request.single_shot && !slot.adapter.supports_single_shot() {
            return Err(FailoverError::UnsupportedMode {
                adapter: slot.adapter.name().to_string(),
            });
        }

        if slot.state.state() == ServiceConnectionState::Disconnected {
            debug!(provider = slot.adapter.name(), "Start before initialize; initializing now");
            self.initialize_current();
        }

        let slot = &mut self.slots[self.current];
        debug!(
            provider = slot.adapter.name(),
            params = %request.params,
            single_shot = request.single_shot,
            "Starting provider"
        );
        slot.adapter
            .start(request.listener.clone(), request.params, request.single_shot)
            .map_err(into_failover_error)?;

        self.last_request = Some(request);
        self.active = true;
        Ok(())
    }

    fn configure(&mut self, params: LocationParams) {
        let Some(request) = self.last_request.as_mut() else {
            debug!(params = %params, "Configure before start; nothing to reconfigure");
            return;
        };
        if request.params == params {
            return;
        }
        request.params = params;

        if !self.active || self.exhausted {
            return;
        }

        let request = request.clone();
        let slot = &mut self.slots[self.current];
        info!(provider = slot.adapter.name(), params = %params, "Reconfiguring provider");
        if let Err(e) = slot
            .adapter
            .start(request.listener.clone(), request.params, request.single_shot)
        {
            warn!(provider = slot.adapter.name(), error = %e, "Provider rejected reconfiguration");
            request.listener.on_error(&into_failover_error(e));
        }
    }

    fn stop(&mut self) {
        self.active = false;
        if let Some(slot) = self.slots.get_mut(self.current) {
            debug!(provider = slot.adapter.name(), "Stopping provider");
            slot.adapter.stop();
        }
    }

    fn last_reading(&self) -> Option<Reading> {
        let index = self.current.min(self.slots.len() - 1);
        self.slots[index].adapter.last_reading()
    }

    fn snapshot(&self) -> OrchestratorSnapshot {
        let current = self.slots.get(self.current);
        OrchestratorSnapshot {
            current_index: self.current,
            current_provider: current.map(|s| s.adapter.name().to_string()),
            current_state: current.map(|s| s.state.state()),
            providers: self
                .slots
                .iter()
                .map(|s| (s.adapter.name().to_string(), s.state.state()))
                .collect(),
            exhausted: self.exhausted,
            active: self.active,
            pending: self.pending.len(),
            last_params: self.last_request.as_ref().map(|r| r.params),
            failovers: self.failovers,
        }
    }

    fn drain_pending(&mut self) {
        let Some(slot) = self.slots.get_mut(self.current) else {
            return;
        };
        if !slot.state.is_connected() || self.pending.is_empty() {
            return;
        }

        let adapter = &mut slot.adapter;
        let result = self.pending.drain(|op| adapter.apply(op));
        match result.error {
            Some(e) => warn!(
                provider = adapter.name(),
                applied = result.applied,
                remaining = result.remaining,
                error = %e,
                "Pending operation rejected; keeping the rest for the next connection"
            ),
            None => debug!(provider = adapter.name(), applied = result.applied, "Replayed pending operations"),
        }
    }

    fn on_connection_event(&mut self, index: usize, event: ConnectionEvent) {
        if index != self.current || self.exhausted {
            debug!(index, current = self.current, ?event, "Ignoring event from abandoned provider");
            return;
        }

        let slot = &mut self.slots[index];
        match event {
            ConnectionEvent::Connected => {
                if slot.state.on_connected().is_some() {
                    info!(provider = slot.adapter.name(), pending = self.pending.len(), "Provider connected");
                    self.drain_pending();
                }
            }
            ConnectionEvent::Suspended => {
                if slot.state.on_suspended().is_some() {
                    self.failover("suspended");
                }
            }
            ConnectionEvent::Failed => {
                if slot.state.on_failed().is_some() {
                    self.failover("failed");
                }
            }
        }
    }

    fn on_connect_timeout(&mut self, index: usize) {
        if index != self.current || self.exhausted {
            return;
        }
        let slot = &mut self.slots[index];
        if slot.state.state() != ServiceConnectionState::Connecting {
            return;
        }
        warn!(
            provider = slot.adapter.name(),
            timeout_ms = self.config.connect_timeout.map(|t| t.as_millis() as u64),
            "Provider did not connect in time"
        );
        slot.state.on_failed();
        self.failover("connect timeout");
    }

    fn failover(&mut self, cause: &str) {
        let slot = &mut self.slots[self.current];
        let previous = slot.state.state();
        let in_state_ms = slot.state.time_in_state().as_millis() as u64;
        // A suspension costs the instance its place too
        if !previous.is_terminal() {
            slot.state.on_failed();
        }
        slot.adapter.stop();
        warn!(
            provider = slot.adapter.name(),
            index = self.current,
            cause,
            previous = %previous,
            in_state_ms,
            transitions = slot.state.history().len(),
            "Provider lost; failing over"
        );

        self.failovers += 1;
        self.current += 1;

        if self.current >= self.slots.len() {
            self.exhausted = true;
            let err = self.exhausted_error();
            error!(attempted = self.slots.len(), "All providers exhausted");
            if !self.pending.is_empty() {
                warn!(dropped = self.pending.len(), "Discarding geofence operations that can no longer be applied");
                self.pending.clear();
            }
            if let Some(request) = &self.last_request {
                request.listener.on_error(&err);
            }
            return;
        }

        self.initialize_current();

        if !self.active {
            return;
        }
        let Some(request) = self.last_request.clone() else {
            return;
        };

        let slot = &mut self.slots[self.current];
        if request.single_shot && !slot.adapter.supports_single_shot() {
            warn!(provider = slot.adapter.name(), "Replacement provider cannot serve single-shot request");
            request.listener.on_error(&FailoverError::UnsupportedMode {
                adapter: slot.adapter.name().to_string(),
            });
            return;
        }

        info!(provider = slot.adapter.name(), params = %request.params, "Resuming stream on replacement provider");
        if let Err(e) = slot
            .adapter
            .start(request.listener.clone(), request.params, request.single_shot)
        {
            warn!(provider = slot.adapter.name(), error = %e, "Replacement provider rejected start");
            request.listener.on_error(&into_failover_error(e));
        }
    }
}

fn into_failover_error(e: AdapterError) -> FailoverError {
    match e {
        AdapterError::UnsupportedMode { adapter } => FailoverError::UnsupportedMode { adapter },
        other => FailoverError::Adapter(other),
    }
}

/// Cloneable handle to a running orchestrator
#[derive(Clone)]
pub struct FailoverHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl fmt::Debug for FailoverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailoverHandle")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl FailoverHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Message,
    ) -> FailoverResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .map_err(|_| FailoverError::Closed)?;
        rx.await.map_err(|_| FailoverError::Closed)
    }

    /// Initialize the current provider
    pub async fn initialize(&self, ctx: ProviderContext) -> FailoverResult<()> {
        self.request(|reply| Message::Initialize { ctx, reply }).await?
    }

    /// Start delivering updates, remembering the request for replay
    pub async fn start(
        &self,
        listener: Arc<dyn UpdateListener>,
        params: LocationParams,
        single_shot: bool,
    ) -> FailoverResult<()> {
        let request = LastRequest {
            listener,
            params,
            single_shot,
        };
        self.request(|reply| Message::Start {
            request: Some(request),
            reply,
        })
        .await?
    }

    /// Re-issue the last start request, e.g. after [`stop`](Self::stop)
    pub async fn restart(&self) -> FailoverResult<()> {
        self.request(|reply| Message::Start {
            request: None,
            reply,
        })
        .await?
    }

    /// Replace the params of the running stream without waiting.
    ///
    /// A no-op when the params are structurally equal to the current ones or
    /// nothing was started yet.
    pub fn configure(&self, params: LocationParams) -> FailoverResult<()> {
        self.tx
            .send(Message::Configure { params })
            .map_err(|_| FailoverError::Closed)
    }

    /// Stop the current provider. Failover will not resume the stream until
    /// the next explicit start.
    pub async fn stop(&self) -> FailoverResult<()> {
        self.request(|reply| Message::Stop { reply }).await?
    }

    pub async fn last_reading(&self) -> FailoverResult<Option<Reading>> {
        self.request(|reply| Message::LastReading { reply }).await
    }

    pub async fn add(&self, fence: GeoFence) -> FailoverResult<()> {
        self.add_all(vec![fence]).await
    }

    pub async fn add_all(&self, fences: Vec<GeoFence>) -> FailoverResult<()> {
        let ops = fences.into_iter().map(PendingOperation::Add).collect();
        self.request(|reply| Message::Enqueue { ops, reply }).await?
    }

    pub async fn remove(&self, id: impl Into<String>) -> FailoverResult<()> {
        self.remove_all(vec![id.into()]).await
    }

    pub async fn remove_all(&self, ids: Vec<String>) -> FailoverResult<()> {
        let ops = ids.into_iter().map(PendingOperation::Remove).collect();
        self.request(|reply| Message::Enqueue { ops, reply }).await?
    }

    pub async fn snapshot(&self) -> FailoverResult<OrchestratorSnapshot> {
        self.request(|reply| Message::Snapshot { reply }).await
    }

    /// Stop the current provider and end the orchestrator task
    pub async fn shutdown(&self) -> FailoverResult<()> {
        self.request(|reply| Message::Shutdown { reply }).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Accuracy;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Init,
        Start(LocationParams, bool),
        Stop,
        Apply(PendingOperation),
    }

    #[derive(Default)]
    struct Shared {
        calls: Mutex<Vec<Call>>,
        listeners: Mutex<Vec<Arc<dyn UpdateListener>>>,
        connection: Mutex<Option<Arc<dyn ConnectionListener>>>,
        reject_apply_for: Mutex<Option<String>>,
    }

    struct MockAdapter {
        name: String,
        kind: AdapterKind,
        single_shot: bool,
        shared: Arc<Shared>,
    }

    #[derive(Clone)]
    struct MockControl(Arc<Shared>);

    impl MockControl {
        fn calls(&self) -> Vec<Call> {
            self.0.calls.lock().unwrap().clone()
        }

        fn count(&self, f: impl Fn(&Call) -> bool) -> usize {
            self.calls().iter().filter(|c| f(c)).count()
        }

        fn inits(&self) -> usize {
            self.count(|c| matches!(c, Call::Init))
        }

        fn starts(&self) -> Vec<(LocationParams, bool)> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Start(p, s) => Some((p, s)),
                    _ => None,
                })
                .collect()
        }

        fn applied(&self) -> Vec<PendingOperation> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Apply(op) => Some(op),
                    _ => None,
                })
                .collect()
        }

        fn last_listener(&self) -> Option<Arc<dyn UpdateListener>> {
            self.0.listeners.lock().unwrap().last().cloned()
        }

        fn reject_apply_for(&self, id: &str) {
            *self.0.reject_apply_for.lock().unwrap() = Some(id.to_string());
        }

        fn connection(&self) -> Arc<dyn ConnectionListener> {
            self.0
                .connection
                .lock()
                .unwrap()
                .clone()
                .expect("connection listener installed")
        }

        fn connect(&self) {
            self.connection().on_connected();
        }

        fn suspend(&self) {
            self.connection().on_suspended();
        }

        fn fail(&self) {
            self.connection().on_failed();
        }
    }

    fn mock(name: &str, kind: AdapterKind) -> (Box<dyn ProviderAdapter>, MockControl) {
        let shared = Arc::new(Shared::default());
        let adapter = MockAdapter {
            name: name.to_string(),
            kind,
            single_shot: true,
            shared: shared.clone(),
        };
        (Box::new(adapter), MockControl(shared))
    }

    fn service(name: &str) -> (Box<dyn ProviderAdapter>, MockControl) {
        mock(name, AdapterKind::ServiceBacked)
    }

    impl ProviderAdapter for MockAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> AdapterKind {
            self.kind
        }

        fn supports_single_shot(&self) -> bool {
            self.single_shot
        }

        fn initialize(&mut self, _ctx: &ProviderContext) {
            self.shared.calls.lock().unwrap().push(Call::Init);
        }

        fn start(
            &mut self,
            listener: Arc<dyn UpdateListener>,
            params: LocationParams,
            single_shot: bool,
        ) -> crate::AdapterResult<()> {
            self.shared.listeners.lock().unwrap().push(listener);
            self.shared
                .calls
                .lock()
                .unwrap()
                .push(Call::Start(params, single_shot));
            Ok(())
        }

        fn stop(&mut self) {
            self.shared.calls.lock().unwrap().push(Call::Stop);
        }

        fn last_reading(&self) -> Option<Reading> {
            Some(Reading::new(self.name.clone(), 1.0, 2.0))
        }

        fn apply(&mut self, op: &PendingOperation) -> crate::AdapterResult<()> {
            if self.shared.reject_apply_for.lock().unwrap().as_deref() == Some(op.id()) {
                return Err(AdapterError::Rejected {
                    adapter: self.name.clone(),
                    message: "not now".to_string(),
                });
            }
            self.shared.calls.lock().unwrap().push(Call::Apply(op.clone()));
            Ok(())
        }

        fn connection_listener(&self) -> Option<Arc<dyn ConnectionListener>> {
            self.shared.connection.lock().unwrap().clone()
        }

        fn set_connection_listener(&mut self, listener: Arc<dyn ConnectionListener>) {
            *self.shared.connection.lock().unwrap() = Some(listener);
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        errors: Mutex<Vec<FailoverError>>,
    }

    impl UpdateListener for RecordingListener {
        fn on_error(&self, error: &FailoverError) {
            self.errors.lock().unwrap().push(error.clone());
        }
    }

    #[derive(Default)]
    struct CountingConnectionListener {
        failed: Mutex<u32>,
    }

    impl ConnectionListener for CountingConnectionListener {
        fn on_failed(&self) {
            *self.failed.lock().unwrap() += 1;
        }
    }

    fn spawn(providers: Vec<Box<dyn ProviderAdapter>>) -> FailoverHandle {
        FailoverOrchestrator::spawn(providers, FailoverConfig::default())
            .unwrap()
            .0
    }

    fn fence(id: &str) -> GeoFence {
        GeoFence::new(id, 10.0, 20.0, 100.0)
    }

    #[tokio::test]
    async fn test_empty_provider_list_is_rejected() {
        let result = FailoverOrchestrator::spawn(Vec::new(), FailoverConfig::default());
        assert!(matches!(result, Err(FailoverError::EmptyProviderList)));
    }

    #[tokio::test]
    async fn test_failover_advances_once_per_distinct_failure() {
        let (a0, c0) = service("a0");
        let (a1, c1) = service("a1");
        let (a2, c2) = service("a2");
        let handle = spawn(vec![a0, a1, a2]);

        handle.initialize(ProviderContext::new("test")).await.unwrap();
        c0.connect();
        c0.fail();
        c0.fail();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.current_index, 1);
        assert_eq!(snapshot.failovers, 1);
        assert_eq!(snapshot.providers[0].1, ServiceConnectionState::Failed);
        assert_eq!(c1.inits(), 1);
        assert_eq!(c2.inits(), 0);
    }

    #[tokio::test]
    async fn test_exhaustion_is_terminal_and_reported_once() {
        let (a0, c0) = service("a0");
        let (a1, c1) = service("a1");
        let handle = spawn(vec![a0, a1]);
        let listener = Arc::new(RecordingListener::default());

        handle.initialize(ProviderContext::new("test")).await.unwrap();
        handle
            .start(listener.clone(), LocationParams::BEST_EFFORT, false)
            .await
            .unwrap();
        c0.fail();
        handle.snapshot().await.unwrap();
        c1.connect();
        c1.fail();
        c1.fail();

        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.exhausted);
        assert_eq!(snapshot.current_index, 2);
        assert_eq!(snapshot.current_provider, None);

        let errors = listener.errors.lock().unwrap().clone();
        assert_eq!(errors, vec![FailoverError::NoProvidersAvailable { attempted: 2 }]);

        let before = (c0.calls().len(), c1.calls().len());
        let result = handle
            .start(listener.clone(), LocationParams::LAZY, false)
            .await;
        assert_eq!(result, Err(FailoverError::NoProvidersAvailable { attempted: 2 }));
        assert_eq!(before, (c0.calls().len(), c1.calls().len()));
        assert_eq!(c0.inits() + c1.inits(), 2);
    }

    #[tokio::test]
    async fn test_commands_rejected_after_exhaustion() {
        let (a0, c0) = service("a0");
        let handle = spawn(vec![a0]);
        let exhausted = Err(FailoverError::NoProvidersAvailable { attempted: 1 });

        handle.initialize(ProviderContext::new("test")).await.unwrap();
        handle.add(fence("queued")).await.unwrap();
        assert_eq!(handle.snapshot().await.unwrap().pending, 1);

        c0.fail();
        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.exhausted);
        assert_eq!(snapshot.pending, 0);
        let before = c0.calls().len();

        assert_eq!(handle.add(fence("a")).await, exhausted);
        assert_eq!(handle.add_all(vec![fence("b"), fence("c")]).await, exhausted);
        assert_eq!(handle.remove("a").await, exhausted);
        assert_eq!(handle.remove_all(vec!["b".into()]).await, exhausted);
        assert_eq!(handle.stop().await, exhausted);
        assert_eq!(
            handle.initialize(ProviderContext::new("test")).await,
            exhausted
        );

        assert_eq!(handle.snapshot().await.unwrap().pending, 0);
        assert_eq!(c0.calls().len(), before);
    }

    #[tokio::test]
    async fn test_failover_replays_identical_request() {
        let (a0, c0) = service("a0");
        let (a1, c1) = service("a1");
        let handle = spawn(vec![a0, a1]);
        let listener: Arc<dyn UpdateListener> = Arc::new(RecordingListener::default());
        let params = LocationParams::new(Accuracy::High, Duration::ZERO, 500.0);

        handle.initialize(ProviderContext::new("test")).await.unwrap();
        handle.start(listener.clone(), params, false).await.unwrap();
        c0.fail();
        handle.snapshot().await.unwrap();

        assert_eq!(c1.starts(), vec![(params, false)]);
        let replayed = c1.last_listener().unwrap();
        assert_eq!(
            Arc::as_ptr(&replayed) as *const (),
            Arc::as_ptr(&listener) as *const ()
        );
        // The abandoned provider was shut down
        assert_eq!(c0.calls().last(), Some(&Call::Stop));
    }

    #[tokio::test]
    async fn test_pending_operations_replay_on_connect() {
        let (a0, c0) = service("a0");
        let handle = spawn(vec![a0]);

        handle.initialize(ProviderContext::new("test")).await.unwrap();
        handle.add(fence("a")).await.unwrap();
        handle.add(fence("b")).await.unwrap();
        handle.remove("a").await.unwrap();
        assert!(c0.applied().is_empty());
        assert_eq!(handle.snapshot().await.unwrap().pending, 2);

        c0.connect();
        handle.snapshot().await.unwrap();
        assert_eq!(
            c0.applied(),
            vec![
                PendingOperation::Add(fence("b")),
                PendingOperation::Remove("a".to_string())
            ]
        );

        // Connected: new operations go straight through
        handle.add(fence("c")).await.unwrap();
        assert_eq!(c0.applied().len(), 3);
        assert_eq!(handle.snapshot().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_connect_with_empty_queue_applies_nothing() {
        let (a0, c0) = service("a0");
        let handle = spawn(vec![a0]);

        handle.initialize(ProviderContext::new("test")).await.unwrap();
        c0.connect();
        handle.snapshot().await.unwrap();
        assert!(c0.applied().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_operation_survives_failover() {
        let (a0, c0) = service("a0");
        let (a1, c1) = service("a1");
        let handle = spawn(vec![a0, a1]);
        c0.reject_apply_for("b");

        handle.initialize(ProviderContext::new("test")).await.unwrap();
        handle
            .add_all(vec![fence("a"), fence("b"), fence("c")])
            .await
            .unwrap();
        c0.connect();
        assert_eq!(handle.snapshot().await.unwrap().pending, 2);
        assert_eq!(c0.applied(), vec![PendingOperation::Add(fence("a"))]);

        c0.suspend();
        assert_eq!(handle.snapshot().await.unwrap().pending, 2);
        c1.connect();
        handle.snapshot().await.unwrap();
        assert_eq!(
            c1.applied(),
            vec![
                PendingOperation::Add(fence("b")),
                PendingOperation::Add(fence("c"))
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_suppresses_replay_until_next_start() {
        let (a0, c0) = service("a0");
        let (a1, c1) = service("a1");
        let handle = spawn(vec![a0, a1]);
        let listener = Arc::new(RecordingListener::default());

        handle.initialize(ProviderContext::new("test")).await.unwrap();
        handle
            .start(listener.clone(), LocationParams::NAVIGATION, true)
            .await
            .unwrap();
        handle.stop().await.unwrap();
        c0.fail();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.current_index, 1);
        assert!(!snapshot.active);
        assert_eq!(c1.inits(), 1);
        assert!(c1.starts().is_empty());

        handle.restart().await.unwrap();
        assert_eq!(c1.starts(), vec![(LocationParams::NAVIGATION, true)]);
    }

    #[tokio::test]
    async fn test_single_shot_rejected_by_composite_adapter() {
        let shared = Arc::new(Shared::default());
        let adapter = MockAdapter {
            name: "composite".to_string(),
            kind: AdapterKind::Direct,
            single_shot: false,
            shared: shared.clone(),
        };
        let control = MockControl(shared);
        let handle = spawn(vec![Box::new(adapter)]);
        let listener = Arc::new(RecordingListener::default());

        let result = handle
            .start(listener.clone(), LocationParams::NAVIGATION, true)
            .await;
        assert_eq!(
            result,
            Err(FailoverError::UnsupportedMode {
                adapter: "composite".to_string()
            })
        );
        assert!(control.starts().is_empty());
        assert_eq!(handle.snapshot().await.unwrap().last_params, None);

        handle
            .start(listener, LocationParams::NAVIGATION, false)
            .await
            .unwrap();
        assert_eq!(control.starts().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_event_does_not_fail_over() {
        let (a0, c0) = service("a0");
        let (a1, c1) = service("a1");
        let handle = spawn(vec![a0, a1]);

        handle.initialize(ProviderContext::new("test")).await.unwrap();
        // Suspension is only meaningful once connected
        c0.suspend();
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.current_index, 0);
        assert_eq!(snapshot.current_state, Some(ServiceConnectionState::Connecting));
        assert_eq!(c1.inits(), 0);
    }

    #[tokio::test]
    async fn test_events_from_abandoned_provider_are_ignored() {
        let (a0, c0) = service("a0");
        let (a1, _c1) = service("a1");
        let handle = spawn(vec![a0, a1]);

        handle.initialize(ProviderContext::new("test")).await.unwrap();
        c0.fail();
        c0.connect();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.current_index, 1);
        assert_eq!(snapshot.current_state, Some(ServiceConnectionState::Connecting));
        assert_eq!(snapshot.providers[0].1, ServiceConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_adapter_listener_still_notified() {
        let (a0, c0) = service("a0");
        let (a1, _c1) = service("a1");
        let original = Arc::new(CountingConnectionListener::default());
        *c0.0.connection.lock().unwrap() = Some(original.clone());
        let handle = spawn(vec![a0, a1]);

        handle.initialize(ProviderContext::new("test")).await.unwrap();
        c0.fail();
        handle.snapshot().await.unwrap();
        assert_eq!(*original.failed.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_direct_provider_is_connected_after_initialize() {
        let (a0, c0) = mock("gps", AdapterKind::Direct);
        let handle = spawn(vec![a0]);

        handle.add(fence("a")).await.unwrap();
        handle.initialize(ProviderContext::new("test")).await.unwrap();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.current_state, Some(ServiceConnectionState::Connected));
        assert_eq!(c0.applied(), vec![PendingOperation::Add(fence("a"))]);
        assert_eq!(
            handle.last_reading().await.unwrap().map(|r| r.provider),
            Some("gps".to_string())
        );
    }

    #[tokio::test]
    async fn test_configure_restarts_only_on_change() {
        let (a0, c0) = mock("gps", AdapterKind::Direct);
        let handle = spawn(vec![a0]);
        let listener = Arc::new(RecordingListener::default());

        handle.configure(LocationParams::LAZY).unwrap();
        handle
            .start(listener, LocationParams::BEST_EFFORT, false)
            .await
            .unwrap();
        handle.configure(LocationParams::BEST_EFFORT).unwrap();
        handle.configure(LocationParams::NAVIGATION).unwrap();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.last_params, Some(LocationParams::NAVIGATION));
        assert_eq!(
            c0.starts(),
            vec![
                (LocationParams::BEST_EFFORT, false),
                (LocationParams::NAVIGATION, false)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_synthesizes_failure() {
        let (a0, _c0) = service("slow");
        let (a1, c1) = service("backup");
        let config = FailoverConfig::default().with_connect_timeout(Duration::from_secs(5));
        let (handle, _task) = FailoverOrchestrator::spawn(vec![a0, a1], config).unwrap();

        handle.initialize(ProviderContext::new("test")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(handle.snapshot().await.unwrap().current_index, 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.current_index, 1);
        assert_eq!(c1.inits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_ignored_once_connected() {
        let (a0, c0) = service("gms");
        let (a1, c1) = service("backup");
        let config = FailoverConfig::default().with_connect_timeout(Duration::from_secs(5));
        let (handle, _task) = FailoverOrchestrator::spawn(vec![a0, a1], config).unwrap();

        handle.initialize(ProviderContext::new("test")).await.unwrap();
        c0.connect();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(handle.snapshot().await.unwrap().current_index, 0);
        assert_eq!(c1.inits(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_handle() {
        let (a0, c0) = mock("gps", AdapterKind::Direct);
        let (handle, task) =
            FailoverOrchestrator::spawn(vec![a0], FailoverConfig::default()).unwrap();

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert_eq!(c0.calls().last(), Some(&Call::Stop));
        assert_eq!(handle.snapshot().await, Err(FailoverError::Closed));
    }
}
