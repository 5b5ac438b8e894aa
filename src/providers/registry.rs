//! Provider registry and factory for extensibility
//!
//! Maps a provider kind to a factory that builds a [`ProviderAdapter`] from a
//! declarative [`ProviderSpec`]. `simulated` and `replay` are registered out
//! of the box; applications register their own backends next to them.

use super::{ReplayProvider, SimulatedProvider};
use crate::config::ProviderSpec;
use crate::error::{LocusError, Result};
use locus_core_failover::ProviderAdapter;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;

/// Factory function type for creating providers
pub type ProviderFactory =
    Arc<dyn Fn(&ProviderSpec) -> Result<Box<dyn ProviderAdapter>> + Send + Sync>;

/// Registry of provider factories keyed by kind
///
/// # Example
///
/// ```no_run
/// use locus::providers::{ProviderRegistry, SimulatedProvider};
/// use locus::config::ProviderSpec;
/// use std::sync::Arc;
///
/// let registry = ProviderRegistry::new();
/// registry.register("always-on", Arc::new(|spec: &ProviderSpec| {
///     let (provider, _handle) = SimulatedProvider::builder(spec.name.clone()).build();
///     Ok::<_, locus::LocusError>(Box::new(provider) as Box<dyn locus_core_failover::ProviderAdapter>)
/// }));
/// assert!(registry.is_registered("always-on"));
/// ```
pub struct ProviderRegistry {
    factories: RwLock<HashMap<String, ProviderFactory>>,
}

impl ProviderRegistry {
    /// Create a new registry with the built-in providers
    pub fn new() -> Self {
        let registry = Self {
            factories: RwLock::new(HashMap::new()),
        };
        registry.register_builtin();
        registry
    }

    fn register_builtin(&self) {
        self.register("simulated", Arc::new(build_simulated));
        self.register("replay", Arc::new(build_replay));
    }

    /// Register (or replace) the factory for `kind`
    pub fn register(&self, kind: impl Into<String>, factory: ProviderFactory) {
        let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
        factories.insert(kind.into(), factory);
    }

    pub fn unregister(&self, kind: &str) -> bool {
        let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
        factories.remove(kind).is_some()
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        factories.contains_key(kind)
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<String> {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        let mut kinds: Vec<String> = factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Build one provider
    ///
    /// # Errors
    ///
    /// Returns error if the kind is not registered or the factory fails
    pub fn create(&self, spec: &ProviderSpec) -> Result<Box<dyn ProviderAdapter>> {
        let factory = {
            let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
            factories.get(&spec.kind).cloned()
        };

        match factory {
            Some(factory) => {
                debug!(provider = %spec.name, kind = %spec.kind, "Building provider");
                factory(spec)
            }
            None => Err(LocusError::Provider {
                name: spec.name.clone(),
                message: format!("provider kind '{}' not registered", spec.kind),
            }),
        }
    }

    /// Build the whole chain, preserving order
    pub fn create_all(&self, specs: &[ProviderSpec]) -> Result<Vec<Box<dyn ProviderAdapter>>> {
        specs.iter().map(|spec| self.create(spec)).collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn build_simulated(spec: &ProviderSpec) -> Result<Box<dyn ProviderAdapter>> {
    let mut builder = SimulatedProvider::builder(spec.name.clone()).single_shot(spec.single_shot);
    if spec.service_backed {
        builder = builder.service_backed();
        // No delay configured: connect as soon as initialized
        builder = builder.connect_after(Duration::from_millis(spec.connect_after_ms.unwrap_or(0)));
    }
    if let Some(ms) = spec.fail_after_ms {
        builder = builder.fail_after(Duration::from_millis(ms));
    }
    if let Some([latitude, longitude]) = spec.origin {
        builder = builder.origin(latitude, longitude);
    }
    let (provider, _handle) = builder.build();
    Ok(Box::new(provider))
}

fn build_replay(spec: &ProviderSpec) -> Result<Box<dyn ProviderAdapter>> {
    let path = spec.track.as_ref().ok_or_else(|| LocusError::Provider {
        name: spec.name.clone(),
        message: "replay provider needs a track file".to_string(),
    })?;
    let provider = ReplayProvider::from_file(spec.name.clone(), path).map_err(|e| {
        LocusError::Provider {
            name: spec.name.clone(),
            message: e.to_string(),
        }
    })?;
    Ok(Box::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use locus_core_failover::AdapterKind;
    use std::path::PathBuf;

    #[test]
    fn test_builtin_kinds() {
        let registry = ProviderRegistry::new();
        assert_eq!(registry.kinds(), vec!["replay".to_string(), "simulated".to_string()]);
    }

    #[test]
    fn test_create_simulated_chain() {
        let registry = ProviderRegistry::new();
        let mut first = ProviderSpec::new("fused", "simulated");
        first.service_backed = true;
        first.single_shot = false;
        let second = ProviderSpec::new("gps", "simulated");

        let chain = registry.create_all(&[first, second]).unwrap();
        assert_eq!(chain[0].name(), "fused");
        assert_eq!(chain[0].kind(), AdapterKind::ServiceBacked);
        assert!(!chain[0].supports_single_shot());
        assert_eq!(chain[1].kind(), AdapterKind::Direct);
    }

    #[test]
    fn test_unknown_kind() {
        let registry = ProviderRegistry::new();
        let err = registry
            .create(&ProviderSpec::new("x", "carrier-pigeon"))
            .unwrap_err();
        assert!(matches!(err, LocusError::Provider { .. }));
    }

    #[test]
    fn test_replay_requires_track() {
        let registry = ProviderRegistry::new();
        assert!(registry.create(&ProviderSpec::new("log", "replay")).is_err());

        let mut spec = ProviderSpec::new("log", "replay");
        spec.track = Some(PathBuf::from("/no/such/track.json"));
        let err = registry.create(&spec).unwrap_err();
        assert!(err.to_string().contains("cannot read track"));
    }

    #[test]
    fn test_custom_factory() {
        let registry = ProviderRegistry::new();
        registry.register("custom", Arc::new(build_simulated));
        assert!(registry.is_registered("custom"));
        assert!(registry.unregister("custom"));
        assert!(!registry.is_registered("custom"));
    }
}
