/*!
 * Persisted last-known values
 *
 * A flat key/value `Preferences` backend plus typed stores on top of it.
 * Keys are `<prefix>_<id>_<field>`; coordinates are stored as the f64 bit
 * pattern in an i64 so they survive any backend that only keeps integers
 * exactly.
 */

use crate::error::Result;
use locus_core_failover::{
    ActivityKind, DetectedActivity, GeoFence, Reading, ReadingStore,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::warn;

/// A primitive preference value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrefValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl PrefValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PrefValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PrefValue::Float(v) => Some(*v),
            PrefValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PrefValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

/// Flat key/value storage of primitives
pub trait Preferences: Send + Sync {
    fn get(&self, key: &str) -> Option<PrefValue>;

    /// Write several entries as one mutation
    fn set_all(&self, entries: Vec<(String, PrefValue)>) -> Result<()>;

    fn remove_all(&self, keys: &[String]) -> Result<()>;

    fn set(&self, key: &str, value: PrefValue) -> Result<()> {
        self.set_all(vec![(key.to_string(), value)])
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_f64())
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_string))
    }
}

/// In-memory preferences, lost at exit
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: RwLock<BTreeMap<String, PrefValue>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Preferences for MemoryPreferences {
    fn get(&self, key: &str) -> Option<PrefValue> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set_all(&self, entries: Vec<(String, PrefValue)>) -> Result<()> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.extend(entries);
        Ok(())
    }

    fn remove_all(&self, keys: &[String]) -> Result<()> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            values.remove(key);
        }
        Ok(())
    }
}

/// Preferences persisted as a JSON object, rewritten on every mutation
#[derive(Debug)]
pub struct JsonFilePreferences {
    path: PathBuf,
    values: Mutex<BTreeMap<String, PrefValue>>,
}

impl JsonFilePreferences {
    /// Open `path`, starting empty if the file does not exist yet
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            if contents.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&contents)?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, values: &BTreeMap<String, PrefValue>) -> Result<()> {
        let contents = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}

impl Preferences for JsonFilePreferences {
    fn get(&self, key: &str) -> Option<PrefValue> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set_all(&self, entries: Vec<(String, PrefValue)>) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.extend(entries);
        self.flush(&values)
    }

    fn remove_all(&self, keys: &[String]) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            values.remove(key);
        }
        self.flush(&values)
    }
}

fn field_key(prefix: &str, id: &str, field: &str) -> String {
    format!("{}_{}_{}", prefix, id, field)
}

const PROVIDER: &str = "provider";
const LATITUDE: &str = "lat";
const LONGITUDE: &str = "lon";
const ACCURACY: &str = "acc";
const ALTITUDE: &str = "alt";
const SPEED: &str = "spd";
const TIME: &str = "tm";
const BEARING: &str = "bearing";

const READING_FIELDS: [&str; 8] = [
    PROVIDER, LATITUDE, LONGITUDE, ACCURACY, ALTITUDE, SPEED, TIME, BEARING,
];

/// Last reading per provider id
#[derive(Clone)]
pub struct LocationStore {
    prefs: Arc<dyn Preferences>,
    prefix: String,
}

impl LocationStore {
    pub const DEFAULT_PREFIX: &'static str = "locus.location";

    pub fn new(prefs: Arc<dyn Preferences>) -> Self {
        Self::with_prefix(prefs, Self::DEFAULT_PREFIX)
    }

    pub fn with_prefix(prefs: Arc<dyn Preferences>, prefix: impl Into<String>) -> Self {
        Self {
            prefs,
            prefix: prefix.into(),
        }
    }

    fn key(&self, id: &str, field: &str) -> String {
        field_key(&self.prefix, id, field)
    }

    fn bits(&self, id: &str, field: &str) -> Option<f64> {
        self.prefs
            .get_i64(&self.key(id, field))
            .map(|bits| f64::from_bits(bits as u64))
    }

    pub fn load(&self, id: &str) -> Option<Reading> {
        let latitude = self.bits(id, LATITUDE)?;
        let longitude = self.bits(id, LONGITUDE)?;
        let provider = self
            .prefs
            .get_string(&self.key(id, PROVIDER))
            .unwrap_or_else(|| id.to_string());

        let mut reading = Reading::new(provider, latitude, longitude);
        reading.accuracy = self.float(id, ACCURACY);
        reading.altitude = self.bits(id, ALTITUDE).unwrap_or_default();
        reading.speed = self.float(id, SPEED);
        reading.bearing = self.float(id, BEARING);
        reading.time_ms = self.prefs.get_i64(&self.key(id, TIME)).unwrap_or_default();
        Some(reading)
    }

    fn float(&self, id: &str, field: &str) -> f32 {
        self.prefs
            .get_f64(&self.key(id, field))
            .unwrap_or_default() as f32
    }

    pub fn save(&self, id: &str, reading: &Reading) -> Result<()> {
        self.prefs.set_all(vec![
            (self.key(id, PROVIDER), PrefValue::Text(reading.provider.clone())),
            (self.key(id, LATITUDE), PrefValue::Int(reading.latitude.to_bits() as i64)),
            (self.key(id, LONGITUDE), PrefValue::Int(reading.longitude.to_bits() as i64)),
            (self.key(id, ACCURACY), PrefValue::Float(reading.accuracy as f64)),
            (self.key(id, ALTITUDE), PrefValue::Int(reading.altitude.to_bits() as i64)),
            (self.key(id, SPEED), PrefValue::Float(reading.speed as f64)),
            (self.key(id, TIME), PrefValue::Int(reading.time_ms)),
            (self.key(id, BEARING), PrefValue::Float(reading.bearing as f64)),
        ])
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let keys: Vec<String> = READING_FIELDS.iter().map(|f| self.key(id, f)).collect();
        self.prefs.remove_all(&keys)
    }
}

impl ReadingStore for LocationStore {
    fn get(&self, id: &str) -> Option<Reading> {
        self.load(id)
    }

    fn put(&self, id: &str, reading: &Reading) {
        if let Err(e) = self.save(id, reading) {
            warn!(provider = id, error = %e, "Failed to persist reading");
        }
    }

    fn remove(&self, id: &str) {
        if let Err(e) = self.delete(id) {
            warn!(provider = id, error = %e, "Failed to remove persisted reading");
        }
    }
}

const ACTIVITY: &str = "activity";
const CONFIDENCE: &str = "confidence";

/// Last detected activity per id
#[derive(Clone)]
pub struct ActivityStore {
    prefs: Arc<dyn Preferences>,
    prefix: String,
}

impl ActivityStore {
    pub const DEFAULT_PREFIX: &'static str = "locus.activity";

    pub fn new(prefs: Arc<dyn Preferences>) -> Self {
        Self {
            prefs,
            prefix: Self::DEFAULT_PREFIX.to_string(),
        }
    }

    pub fn get(&self, id: &str) -> Option<DetectedActivity> {
        let kind = self
            .prefs
            .get_string(&field_key(&self.prefix, id, ACTIVITY))?;
        let confidence = self
            .prefs
            .get_i64(&field_key(&self.prefix, id, CONFIDENCE))
            .unwrap_or_default();
        Some(DetectedActivity::new(
            ActivityKind::parse(&kind).unwrap_or(ActivityKind::Unknown),
            confidence.clamp(0, 100) as u8,
        ))
    }

    pub fn put(&self, id: &str, activity: &DetectedActivity) -> Result<()> {
        self.prefs.set_all(vec![
            (
                field_key(&self.prefix, id, ACTIVITY),
                PrefValue::Text(activity.kind.as_str().to_string()),
            ),
            (
                field_key(&self.prefix, id, CONFIDENCE),
                PrefValue::Int(activity.confidence as i64),
            ),
        ])
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        self.prefs.remove_all(&[
            field_key(&self.prefix, id, ACTIVITY),
            field_key(&self.prefix, id, CONFIDENCE),
        ])
    }
}

/// Registered geofences, so a session can re-register them after restart
#[derive(Clone)]
pub struct GeoFenceStore {
    prefs: Arc<dyn Preferences>,
    prefix: String,
}

impl GeoFenceStore {
    pub const DEFAULT_PREFIX: &'static str = "locus.geofence";

    pub fn new(prefs: Arc<dyn Preferences>) -> Self {
        Self {
            prefs,
            prefix: Self::DEFAULT_PREFIX.to_string(),
        }
    }

    pub fn get(&self, id: &str) -> Option<GeoFence> {
        let json = self.prefs.get_string(&field_key(&self.prefix, id, "fence"))?;
        match serde_json::from_str(&json) {
            Ok(fence) => Some(fence),
            Err(e) => {
                warn!(fence = id, error = %e, "Ignoring unreadable stored geofence");
                None
            }
        }
    }

    pub fn put(&self, fence: &GeoFence) -> Result<()> {
        let json = serde_json::to_string(fence)?;
        self.prefs
            .set(&field_key(&self.prefix, &fence.id, "fence"), PrefValue::Text(json))
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        self.prefs
            .remove_all(&[field_key(&self.prefix, id, "fence")])
    }
}
