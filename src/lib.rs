/*!
 * Locus - location services with provider failover
 *
 * A session-oriented location library with:
 * - Ordered provider chains that fail over on connection loss
 * - Replay of the last location request on the replacement provider
 * - Geofence operations buffered until a provider connects
 * - Activity recognition driving location params
 * - Last known readings persisted per provider
 * - Declarative provider chains from TOML
 *
 * The failover engine lives in `locus-core-failover`; this crate adds the
 * session facade, persistence, concrete providers and configuration.
 */

pub mod config;
pub mod error;
pub mod facade;
pub mod logging;
pub mod providers;
pub mod store;

// Re-export commonly used types
pub use config::{LocusConfig, Preset, ProviderSpec};
pub use error::{LocusError, Result};
pub use facade::{
    default_classifier, ActivityControl, ActivityLocationControl, GeofencingControl,
    LocationControl, Locus, LocusBuilder,
};
pub use locus_core_failover as failover;
pub use store::{JsonFilePreferences, LocationStore, MemoryPreferences, Preferences};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
