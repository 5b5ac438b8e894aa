//! Capability interface implemented by every location backend
//!
//! The orchestrator is written once against [`ProviderAdapter`]. Backends come
//! in two flavours:
//!
//! - **Direct** adapters (device sensors, recorded tracks) are usable as soon
//!   as they are initialized.
//! - **Service-backed** adapters talk to a managed service that connects
//!   asynchronously. They report connection changes through the
//!   [`ConnectionListener`] installed with `set_connection_listener`.
//!
//! All calls are non-blocking: an adapter kicks off work and reports results
//! later through the listeners it was given.

use crate::error::{AdapterError, AdapterResult};
use crate::pending::PendingOperation;
use crate::types::{DetectedActivity, GeofenceTransition, LocationParams, Reading};
use crate::FailoverError;
use std::fmt;
use std::sync::Arc;

/// How an adapter reaches its backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    /// No connection handshake; connected once initialized
    Direct,
    /// Connects asynchronously and reports through a [`ConnectionListener`]
    ServiceBacked,
}

/// Sink for updates delivered to the caller.
///
/// Every method has an empty default so callers only implement the signals
/// they care about.
pub trait UpdateListener: Send + Sync {
    fn on_location(&self, _reading: &Reading) {}

    fn on_geofence_transition(&self, _transition: &GeofenceTransition) {}

    fn on_activity(&self, _activity: &DetectedActivity) {}

    /// Out-of-band failures, e.g. provider exhaustion
    fn on_error(&self, _error: &FailoverError) {}
}

/// Connection callbacks raised by service-backed adapters.
///
/// May be invoked from any thread.
pub trait ConnectionListener: Send + Sync {
    fn on_connected(&self) {}

    fn on_suspended(&self) {}

    fn on_failed(&self) {}
}

/// Persisted last-known readings, keyed by a stable provider id
pub trait ReadingStore: Send + Sync {
    fn get(&self, id: &str) -> Option<Reading>;

    fn put(&self, id: &str, reading: &Reading);

    fn remove(&self, id: &str);
}

/// Session context handed to adapters on initialization
#[derive(Clone, Default)]
pub struct ProviderContext {
    session: String,
    store: Option<Arc<dyn ReadingStore>>,
}

impl ProviderContext {
    pub fn new(session: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ReadingStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Logical session this adapter serves (used as a logging field)
    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn store(&self) -> Option<&Arc<dyn ReadingStore>> {
        self.store.as_ref()
    }
}

impl fmt::Debug for ProviderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderContext")
            .field("session", &self.session)
            .field("store", &self.store.is_some())
            .finish()
    }
}

/// Uniform wrapper over one concrete location, geofence or activity backend
pub trait ProviderAdapter: Send {
    /// Stable identifier, also used as the persisted-store key
    fn name(&self) -> &str;

    fn kind(&self) -> AdapterKind {
        AdapterKind::Direct
    }

    /// Whether the adapter can serve discrete one-shot reads
    fn supports_single_shot(&self) -> bool {
        true
    }

    /// Prepare the backend. Service-backed adapters begin connecting here.
    fn initialize(&mut self, ctx: &ProviderContext);

    /// Begin (or atomically reconfigure) delivery of updates to `listener`
    fn start(
        &mut self,
        listener: Arc<dyn UpdateListener>,
        params: LocationParams,
        single_shot: bool,
    ) -> AdapterResult<()>;

    fn stop(&mut self);

    /// Most recent reading from the backend or its persisted store
    fn last_reading(&self) -> Option<Reading>;

    /// Apply a geofence operation to a connected backend
    fn apply(&mut self, op: &PendingOperation) -> AdapterResult<()> {
        Err(AdapterError::Unsupported {
            adapter: self.name().to_string(),
            operation: if op.is_add() {
                "adding geofences".to_string()
            } else {
                "removing geofences".to_string()
            },
        })
    }

    /// The connection listener currently installed, if any
    fn connection_listener(&self) -> Option<Arc<dyn ConnectionListener>> {
        None
    }

    fn set_connection_listener(&mut self, _listener: Arc<dyn ConnectionListener>) {}
}

impl fmt::Debug for dyn ProviderAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderAdapter")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}
