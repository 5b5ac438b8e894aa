//! Locus Core Failover: ordered provider failover for location services
//!
//! # Overview
//!
//! Location backends come and go: a platform service can refuse to bind, lose
//! its connection mid-stream, or never answer at all. This crate hides that
//! behind one orchestrator that walks an ordered list of backends:
//!
//! - **Adapter**: the capability interface every backend implements
//! - **Connection State**: per-backend lifecycle with validated transitions
//! - **Pending Operations**: geofence adds/removes buffered until a backend connects
//! - **Orchestrator**: owns the list, fails over once per distinct failure and
//!   replays the last start request on the replacement
//! - **Reconfiguration Policy**: switches location params as detected activity changes
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Concrete positioning backends
//! - Persistence of readings or preferences
//! - Application configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Your Application                │
//! └─────────────┬───────────────────────────┘
//!               │ FailoverHandle
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Failover Orchestrator             │  ← single task, ordered events
//! │  (pointer, last request, pending ops)   │
//! └─────────────┬───────────────────────────┘
//!               │ current adapter only
//!               ▼
//! ┌──────────┐ ┌──────────┐ ┌──────────┐
//! │ adapter 0│ │ adapter 1│ │ adapter 2│    ← never revisited once failed
//! └──────────┘ └──────────┘ └──────────┘
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use locus_core_failover::prelude::*;
//! use std::sync::Arc;
//!
//! struct Logger;
//! impl UpdateListener for Logger {
//!     fn on_location(&self, reading: &Reading) {
//!         println!("{} {} via {}", reading.latitude, reading.longitude, reading.provider);
//!     }
//! }
//!
//! # async fn example(providers: Vec<Box<dyn ProviderAdapter>>) -> Result<(), FailoverError> {
//! let config = FailoverConfig::default()
//!     .with_connect_timeout(std::time::Duration::from_secs(10));
//! let (handle, _task) = FailoverOrchestrator::spawn(providers, config)?;
//!
//! handle.initialize(ProviderContext::new("session")).await?;
//! handle.add(GeoFence::new("home", 51.5, -0.12, 100.0)).await?;
//! handle.start(Arc::new(Logger), LocationParams::NAVIGATION, false).await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod connection_state;
pub mod error;
pub mod orchestrator;
pub mod pending;
pub mod reconfigure;
pub mod types;

// Re-export main types for convenience
pub use adapter::{
    AdapterKind, ConnectionListener, ProviderAdapter, ProviderContext, ReadingStore,
    UpdateListener,
};
pub use connection_state::{ConnectionStateMachine, ServiceConnectionState, StateTransition};
pub use error::{AdapterError, AdapterResult, FailoverError, FailoverResult};
pub use orchestrator::{
    ConnectionEvent, FailoverConfig, FailoverHandle, FailoverOrchestrator, LastRequest,
    OrchestratorSnapshot,
};
pub use pending::{DrainResult, PendingOperation, PendingOperationQueue, PendingStats};
pub use reconfigure::ActivityReconfigurationPolicy;
pub use types::{
    Accuracy, ActivityKind, ActivityParams, DetectedActivity, GeoFence, GeofenceTransition,
    LocationParams, LocationParamsBuilder, Reading, Transition,
};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use locus_core_failover::prelude::*;
/// ```
pub mod prelude {
    pub use super::adapter::{
        AdapterKind, ConnectionListener, ProviderAdapter, ProviderContext, ReadingStore,
        UpdateListener,
    };
    pub use super::error::{AdapterError, FailoverError};
    pub use super::orchestrator::{FailoverConfig, FailoverHandle, FailoverOrchestrator};
    pub use super::reconfigure::ActivityReconfigurationPolicy;
    pub use super::types::{
        Accuracy, ActivityKind, ActivityParams, DetectedActivity, GeoFence, GeofenceTransition,
        LocationParams, Reading, Transition,
    };
}
