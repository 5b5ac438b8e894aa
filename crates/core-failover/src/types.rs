//! Domain value types shared by the orchestrator, adapters and callers
//!
//! Everything in here is plain data: the orchestrator routes these values
//! between adapters and listeners without transforming them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Accuracy tier requested from a positioning backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accuracy {
    High,
    Medium,
    Low,
    Lowest,
}

impl Accuracy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Accuracy::High => "high",
            Accuracy::Medium => "medium",
            Accuracy::Low => "low",
            Accuracy::Lowest => "lowest",
        }
    }
}

/// Sampling behaviour requested from a location backend
///
/// Two params are equal when all three fields are equal. The orchestrator
/// relies on this to decide whether a reconfiguration is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationParams {
    pub accuracy: Accuracy,
    /// Minimum time between updates
    #[serde(with = "duration_ms", rename = "interval_ms")]
    pub interval: Duration,
    /// Minimum displacement between updates, in metres
    pub distance: f32,
}

impl LocationParams {
    /// Turn-by-turn style tracking
    pub const NAVIGATION: LocationParams = LocationParams {
        accuracy: Accuracy::High,
        interval: Duration::from_millis(500),
        distance: 0.0,
    };

    /// Balanced accuracy and power
    pub const BEST_EFFORT: LocationParams = LocationParams {
        accuracy: Accuracy::Medium,
        interval: Duration::from_millis(2500),
        distance: 150.0,
    };

    /// Coarse, infrequent updates
    pub const LAZY: LocationParams = LocationParams {
        accuracy: Accuracy::Low,
        interval: Duration::from_millis(5000),
        distance: 500.0,
    };

    pub fn new(accuracy: Accuracy, interval: Duration, distance: f32) -> Self {
        Self {
            accuracy,
            interval,
            distance,
        }
    }

    pub fn builder() -> LocationParamsBuilder {
        LocationParamsBuilder::default()
    }
}

impl Default for LocationParams {
    fn default() -> Self {
        Self::BEST_EFFORT
    }
}

impl fmt::Display for LocationParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}ms/{}m",
            self.accuracy.as_str(),
            self.interval.as_millis(),
            self.distance
        )
    }
}

/// Builder for [`LocationParams`]
#[derive(Debug, Clone)]
pub struct LocationParamsBuilder {
    accuracy: Accuracy,
    interval: Duration,
    distance: f32,
}

impl Default for LocationParamsBuilder {
    fn default() -> Self {
        Self {
            accuracy: Accuracy::Medium,
            interval: Duration::ZERO,
            distance: 0.0,
        }
    }
}

impl LocationParamsBuilder {
    pub fn accuracy(mut self, accuracy: Accuracy) -> Self {
        self.accuracy = accuracy;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn distance(mut self, distance: f32) -> Self {
        self.distance = distance;
        self
    }

    pub fn build(self) -> LocationParams {
        LocationParams::new(self.accuracy, self.interval, self.distance)
    }
}

/// Parameters for activity-recognition backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityParams {
    #[serde(with = "duration_ms", rename = "interval_ms")]
    pub interval: Duration,
}

impl ActivityParams {
    pub const NORMAL: ActivityParams = ActivityParams {
        interval: Duration::from_millis(500),
    };

    /// Express activity params as the location params understood by the
    /// orchestrator. Only the interval carries meaning for activity backends.
    pub fn as_location_params(&self) -> LocationParams {
        LocationParams::new(Accuracy::Lowest, self.interval, 0.0)
    }
}

impl Default for ActivityParams {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// A single position fix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Identifier of the backend that produced the fix
    #[serde(default)]
    pub provider: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in metres
    #[serde(default)]
    pub accuracy: f32,
    #[serde(default)]
    pub altitude: f64,
    /// Speed in metres per second
    #[serde(default)]
    pub speed: f32,
    #[serde(default)]
    pub bearing: f32,
    /// Fix time, milliseconds since the Unix epoch
    #[serde(default)]
    pub time_ms: i64,
}

impl Reading {
    pub fn new(provider: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            provider: provider.into(),
            latitude,
            longitude,
            accuracy: 0.0,
            altitude: 0.0,
            speed: 0.0,
            bearing: 0.0,
            time_ms: 0,
        }
    }

    pub fn with_time(mut self, time_ms: i64) -> Self {
        self.time_ms = time_ms;
        self
    }

    pub fn with_accuracy(mut self, accuracy: f32) -> Self {
        self.accuracy = accuracy;
        self
    }
}

/// Geofence transition kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Enter,
    Exit,
    Dwell,
}

/// A circular geofence registered with a geofencing backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoFence {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Radius in metres
    pub radius: f32,
    /// Lifetime in milliseconds; negative means never expire
    #[serde(default = "never_expire")]
    pub expiration_ms: i64,
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub loitering_delay_ms: u32,
}

fn never_expire() -> i64 {
    -1
}

impl GeoFence {
    pub fn new(id: impl Into<String>, latitude: f64, longitude: f64, radius: f32) -> Self {
        Self {
            id: id.into(),
            latitude,
            longitude,
            radius,
            expiration_ms: never_expire(),
            transitions: vec![Transition::Enter, Transition::Exit],
            loitering_delay_ms: 0,
        }
    }

    pub fn with_transitions(mut self, transitions: Vec<Transition>) -> Self {
        self.transitions = transitions;
        self
    }

    pub fn with_expiration(mut self, expiration_ms: i64) -> Self {
        self.expiration_ms = expiration_ms;
        self
    }
}

/// Payload delivered to callers when a fence is crossed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceTransition {
    pub fence_id: String,
    pub transition: Transition,
    /// The fix that triggered the transition, when the backend reports one
    pub reading: Option<Reading>,
}

/// Coarse motion classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    InVehicle,
    OnBicycle,
    OnFoot,
    Running,
    Still,
    Tilting,
    Walking,
    Unknown,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::InVehicle => "in_vehicle",
            ActivityKind::OnBicycle => "on_bicycle",
            ActivityKind::OnFoot => "on_foot",
            ActivityKind::Running => "running",
            ActivityKind::Still => "still",
            ActivityKind::Tilting => "tilting",
            ActivityKind::Walking => "walking",
            ActivityKind::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let kind = match s {
            "in_vehicle" => ActivityKind::InVehicle,
            "on_bicycle" => ActivityKind::OnBicycle,
            "on_foot" => ActivityKind::OnFoot,
            "running" => ActivityKind::Running,
            "still" => ActivityKind::Still,
            "tilting" => ActivityKind::Tilting,
            "walking" => ActivityKind::Walking,
            "unknown" => ActivityKind::Unknown,
            _ => return None,
        };
        Some(kind)
    }
}

/// An activity classification with its confidence (0-100)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedActivity {
    pub kind: ActivityKind,
    pub confidence: u8,
}

impl DetectedActivity {
    pub fn new(kind: ActivityKind, confidence: u8) -> Self {
        Self {
            kind,
            confidence: confidence.min(100),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_structural_equality() {
        let built = LocationParams::builder()
            .accuracy(Accuracy::High)
            .interval(Duration::from_millis(500))
            .distance(0.0)
            .build();
        assert_eq!(built, LocationParams::NAVIGATION);
        assert_ne!(built, LocationParams::LAZY);
    }

    #[test]
    fn test_params_json_uses_millis() {
        let json = serde_json::to_string(&LocationParams::BEST_EFFORT).unwrap();
        assert!(json.contains("\"interval_ms\":2500"));
        let back: LocationParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, LocationParams::BEST_EFFORT);
    }

    #[test]
    fn test_reading_defaults_when_fields_missing() {
        let reading: Reading =
            serde_json::from_str(r#"{"latitude": 51.5, "longitude": -0.12}"#).unwrap();
        assert_eq!(reading.provider, "");
        assert_eq!(reading.time_ms, 0);
    }

    #[test]
    fn test_activity_kind_parse() {
        for kind in [ActivityKind::InVehicle, ActivityKind::Still, ActivityKind::Walking] {
            assert_eq!(ActivityKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ActivityKind::parse("flying"), None);
        assert_eq!(DetectedActivity::new(ActivityKind::Still, 250).confidence, 100);
    }
}
