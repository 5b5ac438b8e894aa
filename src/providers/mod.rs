//! Concrete provider adapters and the registry that builds them
//!
//! - **SimulatedProvider**: scriptable backend, direct or service-backed, with
//!   a [`SimulatorHandle`] to drive connection events and updates by hand
//! - **ReplayProvider**: replays a recorded track file at the requested rate
//! - **ProviderRegistry**: builds adapters from declarative [`ProviderSpec`]s
//!
//! [`ProviderSpec`]: crate::config::ProviderSpec
//!
//! # Example
//!
//! ```no_run
//! use locus::providers::ProviderRegistry;
//! use locus::config::ProviderSpec;
//!
//! let registry = ProviderRegistry::new();
//! let mut spec = ProviderSpec::new("fused", "simulated");
//! spec.service_backed = true;
//! let adapter = registry.create(&spec)?;
//! assert_eq!(adapter.name(), "fused");
//! # Ok::<(), locus::LocusError>(())
//! ```

mod registry;
mod replay;
mod simulated;

pub use registry::{ProviderFactory, ProviderRegistry};
pub use replay::ReplayProvider;
pub use simulated::{SimCall, SimulatedProvider, SimulatedProviderBuilder, SimulatorHandle};

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors loading a recorded track
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("cannot read track {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("track {path} is not a JSON array of readings: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("track {path} contains no readings")]
    Empty { path: PathBuf },
}

const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Great-circle distance in metres
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_known_distance() {
        // Westminster Bridge to Tower Bridge, roughly 3.3 km
        let d = haversine_m(51.5008, -0.1218, 51.5055, -0.0754);
        assert!((3_200.0..3_400.0).contains(&d), "distance was {}", d);
        assert_eq!(haversine_m(10.0, 10.0, 10.0, 10.0), 0.0);
    }

    #[test]
    fn test_track_error_messages() {
        let err = TrackError::Empty {
            path: PathBuf::from("walk.json"),
        };
        assert_eq!(err.to_string(), "track walk.json contains no readings");
    }
}
