//! Public entry point: one [`Locus`] per logical session
//!
//! `Locus` assembles failover orchestrators from provider lists (or from the
//! declarative chain in [`LocusConfig`]) and hands out typed controls:
//!
//! - [`LocationControl`]: continuous or single-shot location
//! - [`GeofencingControl`]: geofence registration, buffered while disconnected
//! - [`ActivityControl`]: activity recognition with the last result persisted
//! - [`ActivityLocationControl`]: location whose params follow the detected activity
//!
//! Every control owns its orchestrator. Dropping the control ends the
//! orchestrator task and releases its providers.
//!
//! # Example
//!
//! ```no_run
//! use locus::{Locus, LocusConfig};
//! use locus::providers::SimulatedProvider;
//! use locus_core_failover::{LocationParams, Reading, UpdateListener};
//! use std::sync::Arc;
//!
//! struct Print;
//! impl UpdateListener for Print {
//!     fn on_location(&self, r: &Reading) {
//!         println!("{:.5},{:.5}", r.latitude, r.longitude);
//!     }
//! }
//!
//! # async fn example() -> locus::Result<()> {
//! let locus = Locus::builder().config(LocusConfig::default()).build()?;
//! let (gps, _sim) = SimulatedProvider::builder("gps").origin(51.5, -0.12).build();
//!
//! let control = locus
//!     .location(vec![Box::new(gps)])
//!     .await?
//!     .config(LocationParams::NAVIGATION);
//! control.start(Arc::new(Print)).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::LocusConfig;
use crate::error::{LocusError, Result};
use crate::providers::ProviderRegistry;
use crate::store::{
    ActivityStore, GeoFenceStore, JsonFilePreferences, LocationStore, MemoryPreferences,
    Preferences,
};
use locus_core_failover::{
    ActivityKind, ActivityParams, ActivityReconfigurationPolicy, DetectedActivity, FailoverError,
    FailoverHandle, FailoverOrchestrator, GeoFence, GeofenceTransition, LocationParams,
    OrchestratorSnapshot, ProviderAdapter, ProviderContext, Reading, UpdateListener,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Maps a detected activity to the location params it calls for
pub type Classifier = Arc<dyn Fn(&DetectedActivity) -> Option<LocationParams> + Send + Sync>;

/// Navigation in vehicles, best effort on foot or bike, lazy when still.
/// Tilting and unknown readings leave the params alone.
pub fn default_classifier(activity: &DetectedActivity) -> Option<LocationParams> {
    match activity.kind {
        ActivityKind::InVehicle => Some(LocationParams::NAVIGATION),
        ActivityKind::OnBicycle
        | ActivityKind::OnFoot
        | ActivityKind::Running
        | ActivityKind::Walking => Some(LocationParams::BEST_EFFORT),
        ActivityKind::Still => Some(LocationParams::LAZY),
        ActivityKind::Tilting | ActivityKind::Unknown => None,
    }
}

/// Builder for [`Locus`]
#[derive(Default)]
pub struct LocusBuilder {
    config: LocusConfig,
    preferences: Option<Arc<dyn Preferences>>,
    registry: Option<ProviderRegistry>,
}

impl LocusBuilder {
    pub fn config(mut self, config: LocusConfig) -> Self {
        self.config = config;
        self
    }

    /// Backing store for persisted values; defaults to `store_file` from the
    /// config, or memory
    pub fn preferences(mut self, preferences: Arc<dyn Preferences>) -> Self {
        self.preferences = Some(preferences);
        self
    }

    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn pre_initialize(mut self, enabled: bool) -> Self {
        self.config.pre_initialize = enabled;
        self
    }

    pub fn session(mut self, name: impl Into<String>) -> Self {
        self.config.session = name.into();
        self
    }

    pub fn build(self) -> Result<Locus> {
        let preferences: Arc<dyn Preferences> = match (self.preferences, &self.config.store_file) {
            (Some(prefs), _) => prefs,
            (None, Some(path)) => Arc::new(JsonFilePreferences::open(path)?),
            (None, None) => Arc::new(MemoryPreferences::new()),
        };

        info!(
            session = %self.config.session,
            pre_initialize = self.config.pre_initialize,
            connect_timeout_ms = ?self.config.connect_timeout().map(|t| t.as_millis() as u64),
            "Locus session created"
        );

        Ok(Locus {
            location_store: Arc::new(LocationStore::new(preferences.clone())),
            preferences,
            registry: self.registry.unwrap_or_default(),
            config: self.config,
        })
    }
}

/// A logical session: shared configuration, stores and provider registry
pub struct Locus {
    config: LocusConfig,
    preferences: Arc<dyn Preferences>,
    location_store: Arc<LocationStore>,
    registry: ProviderRegistry,
}

impl Locus {
    pub fn builder() -> LocusBuilder {
        LocusBuilder::default()
    }

    pub fn config(&self) -> &LocusConfig {
        &self.config
    }

    pub fn session(&self) -> &str {
        &self.config.session
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn location_store(&self) -> &LocationStore {
        &self.location_store
    }

    pub fn activity_store(&self) -> ActivityStore {
        ActivityStore::new(self.preferences.clone())
    }

    pub fn geofence_store(&self) -> GeoFenceStore {
        GeoFenceStore::new(self.preferences.clone())
    }

    fn context(&self) -> ProviderContext {
        ProviderContext::new(self.config.session.clone()).with_store(self.location_store.clone())
    }

    async fn orchestrate(&self, providers: Vec<Box<dyn ProviderAdapter>>) -> Result<Orchestrated> {
        let names: Vec<String> = providers.iter().map(|p| p.name().to_string()).collect();
        let (handle, task) =
            FailoverOrchestrator::spawn(providers, self.config.failover_config())?;
        let orchestrated = Orchestrated {
            handle,
            task,
            ctx: self.context(),
            initialized: AtomicBool::new(false),
        };
        debug!(session = %self.config.session, chain = ?names, "Orchestrator spawned");

        if self.config.pre_initialize {
            orchestrated.ensure_initialized().await?;
        }
        Ok(orchestrated)
    }

    /// Location control over an explicit provider chain
    pub async fn location(&self, providers: Vec<Box<dyn ProviderAdapter>>) -> Result<LocationControl> {
        Ok(LocationControl {
            inner: self.orchestrate(providers).await?,
            params: self.config.preset.params(),
            once: false,
        })
    }

    /// Location control over the chain declared in the configuration
    pub async fn location_from_config(&self) -> Result<LocationControl> {
        self.config.validate()?;
        let providers = self.registry.create_all(&self.config.providers)?;
        self.location(providers).await
    }

    pub async fn geofencing(&self, providers: Vec<Box<dyn ProviderAdapter>>) -> Result<GeofencingControl> {
        Ok(GeofencingControl {
            inner: self.orchestrate(providers).await?,
            store: self.geofence_store(),
        })
    }

    pub async fn activity(&self, providers: Vec<Box<dyn ProviderAdapter>>) -> Result<ActivityControl> {
        Ok(ActivityControl {
            inner: self.orchestrate(providers).await?,
            params: ActivityParams::NORMAL,
            store: self.activity_store(),
            key: self.config.session.clone(),
        })
    }

    /// Location whose params are switched by `classify` as activity changes
    pub async fn activity_location<F>(
        &self,
        location_providers: Vec<Box<dyn ProviderAdapter>>,
        activity_providers: Vec<Box<dyn ProviderAdapter>>,
        classify: F,
    ) -> Result<ActivityLocationControl>
    where
        F: Fn(&DetectedActivity) -> Option<LocationParams> + Send + Sync + 'static,
    {
        Ok(ActivityLocationControl {
            location: self.orchestrate(location_providers).await?,
            activity: self.orchestrate(activity_providers).await?,
            classify: Arc::new(classify),
            store: self.activity_store(),
            key: self.config.session.clone(),
        })
    }
}

/// An orchestrator plus the context used to initialize it
struct Orchestrated {
    handle: FailoverHandle,
    task: JoinHandle<()>,
    ctx: ProviderContext,
    initialized: AtomicBool,
}

impl Orchestrated {
    async fn ensure_initialized(&self) -> Result<()> {
        if !self.initialized.swap(true, Ordering::SeqCst) {
            self.handle.initialize(self.ctx.clone()).await?;
        }
        Ok(())
    }

    async fn shutdown(self) -> Result<()> {
        match self.handle.shutdown().await {
            Ok(()) | Err(FailoverError::Closed) => {}
            Err(e) => return Err(e.into()),
        }
        if let Err(e) = self.task.await {
            warn!(error = %e, "Orchestrator task ended abnormally");
        }
        Ok(())
    }
}

/// Location updates from a provider chain
pub struct LocationControl {
    inner: Orchestrated,
    params: LocationParams,
    once: bool,
}

impl LocationControl {
    pub fn config(mut self, params: LocationParams) -> Self {
        self.params = params;
        self
    }

    /// Deliver a single fix, then stop
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn continuous(mut self) -> Self {
        self.once = false;
        self
    }

    pub fn params(&self) -> LocationParams {
        self.params
    }

    pub fn is_once(&self) -> bool {
        self.once
    }

    pub async fn start(&self, listener: Arc<dyn UpdateListener>) -> Result<()> {
        self.inner.ensure_initialized().await?;
        self.inner
            .handle
            .start(listener, self.params, self.once)
            .await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        Ok(self.inner.handle.stop().await?)
    }

    /// Resume the last started stream after [`stop`](Self::stop)
    pub async fn restart(&self) -> Result<()> {
        Ok(self.inner.handle.restart().await?)
    }

    /// Switch the running stream to `params`
    pub fn reconfigure(&self, params: LocationParams) -> Result<()> {
        Ok(self.inner.handle.configure(params)?)
    }

    pub async fn last_location(&self) -> Result<Option<Reading>> {
        Ok(self.inner.handle.last_reading().await?)
    }

    pub async fn snapshot(&self) -> Result<OrchestratorSnapshot> {
        Ok(self.inner.handle.snapshot().await?)
    }

    pub fn handle(&self) -> &FailoverHandle {
        &self.inner.handle
    }

    pub async fn shutdown(self) -> Result<()> {
        self.inner.shutdown().await
    }
}

/// Geofence registration; operations issued while no provider is connected
/// are buffered and replayed on connect
pub struct GeofencingControl {
    inner: Orchestrated,
    store: GeoFenceStore,
}

impl GeofencingControl {
    pub async fn add(&self, fence: GeoFence) -> Result<()> {
        self.inner.handle.add(fence.clone()).await?;
        self.store.put(&fence)
    }

    pub async fn add_all(&self, fences: Vec<GeoFence>) -> Result<()> {
        self.inner.handle.add_all(fences.clone()).await?;
        for fence in &fences {
            self.store.put(fence)?;
        }
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        self.inner.handle.remove(id).await?;
        self.store.remove(id)
    }

    pub async fn remove_all(&self, ids: Vec<String>) -> Result<()> {
        self.inner.handle.remove_all(ids.clone()).await?;
        for id in &ids {
            self.store.remove(id)?;
        }
        Ok(())
    }

    /// A fence previously added through this session
    pub fn stored(&self, id: &str) -> Option<GeoFence> {
        self.store.get(id)
    }

    /// Start receiving transitions for registered fences
    pub async fn start(&self, listener: Arc<dyn UpdateListener>) -> Result<()> {
        self.inner.ensure_initialized().await?;
        self.inner
            .handle
            .start(listener, LocationParams::default(), false)
            .await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        Ok(self.inner.handle.stop().await?)
    }

    pub async fn snapshot(&self) -> Result<OrchestratorSnapshot> {
        Ok(self.inner.handle.snapshot().await?)
    }

    pub async fn shutdown(self) -> Result<()> {
        self.inner.shutdown().await
    }
}

/// Persists each detected activity, then forwards it
struct ActivityRecorder {
    store: ActivityStore,
    key: String,
    targets: Vec<Arc<dyn UpdateListener>>,
}

impl UpdateListener for ActivityRecorder {
    fn on_activity(&self, activity: &DetectedActivity) {
        if let Err(e) = self.store.put(&self.key, activity) {
            warn!(error = %e, "Failed to persist activity");
        }
        for target in &self.targets {
            target.on_activity(activity);
        }
    }

    fn on_location(&self, reading: &Reading) {
        for target in &self.targets {
            target.on_location(reading);
        }
    }

    fn on_geofence_transition(&self, transition: &GeofenceTransition) {
        for target in &self.targets {
            target.on_geofence_transition(transition);
        }
    }

    fn on_error(&self, error: &FailoverError) {
        for target in &self.targets {
            target.on_error(error);
        }
    }
}

/// Activity recognition updates
pub struct ActivityControl {
    inner: Orchestrated,
    params: ActivityParams,
    store: ActivityStore,
    key: String,
}

impl ActivityControl {
    pub fn config(mut self, params: ActivityParams) -> Self {
        self.params = params;
        self
    }

    pub async fn start(&self, listener: Arc<dyn UpdateListener>) -> Result<()> {
        self.inner.ensure_initialized().await?;
        let recorder = Arc::new(ActivityRecorder {
            store: self.store.clone(),
            key: self.key.clone(),
            targets: vec![listener],
        });
        self.inner
            .handle
            .start(recorder, self.params.as_location_params(), false)
            .await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        Ok(self.inner.handle.stop().await?)
    }

    /// Most recent activity seen by this session, including earlier runs
    /// when the store is persistent
    pub fn last_activity(&self) -> Option<DetectedActivity> {
        self.store.get(&self.key)
    }

    pub async fn snapshot(&self) -> Result<OrchestratorSnapshot> {
        Ok(self.inner.handle.snapshot().await?)
    }

    pub async fn shutdown(self) -> Result<()> {
        self.inner.shutdown().await
    }
}

/// Location stream reconfigured from activity recognition.
///
/// Runs two orchestrators: one for location, one for activity. Continuous
/// only; single-shot requests are rejected.
pub struct ActivityLocationControl {
    location: Orchestrated,
    activity: Orchestrated,
    classify: Classifier,
    store: ActivityStore,
    key: String,
}

impl ActivityLocationControl {
    pub async fn start(
        &self,
        listener: Arc<dyn UpdateListener>,
        params: LocationParams,
        single_shot: bool,
    ) -> Result<()> {
        if single_shot {
            return Err(LocusError::Failover(FailoverError::UnsupportedMode {
                adapter: "activity-location".to_string(),
            }));
        }

        self.location.ensure_initialized().await?;
        self.activity.ensure_initialized().await?;
        self.location
            .handle
            .start(listener.clone(), params, false)
            .await?;

        let classify = self.classify.clone();
        let policy = ActivityReconfigurationPolicy::new(
            self.location.handle.clone(),
            move |activity: &DetectedActivity| classify(activity),
        )
        .with_initial(params);
        let policy: Arc<dyn UpdateListener> = Arc::new(policy);

        let recorder = Arc::new(ActivityRecorder {
            store: self.store.clone(),
            key: self.key.clone(),
            targets: vec![policy, listener],
        });
        self.activity
            .handle
            .start(recorder, ActivityParams::NORMAL.as_location_params(), false)
            .await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.location.handle.stop().await?;
        self.activity.handle.stop().await?;
        Ok(())
    }

    pub async fn last_location(&self) -> Result<Option<Reading>> {
        Ok(self.location.handle.last_reading().await?)
    }

    pub fn last_activity(&self) -> Option<DetectedActivity> {
        self.store.get(&self.key)
    }

    pub async fn location_snapshot(&self) -> Result<OrchestratorSnapshot> {
        Ok(self.location.handle.snapshot().await?)
    }

    pub async fn activity_snapshot(&self) -> Result<OrchestratorSnapshot> {
        Ok(self.activity.handle.snapshot().await?)
    }

    pub async fn shutdown(self) -> Result<()> {
        self.location.shutdown().await?;
        self.activity.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_classifier() {
        let class = |kind| default_classifier(&DetectedActivity::new(kind, 80));
        assert_eq!(class(ActivityKind::InVehicle), Some(LocationParams::NAVIGATION));
        assert_eq!(class(ActivityKind::Walking), Some(LocationParams::BEST_EFFORT));
        assert_eq!(class(ActivityKind::Still), Some(LocationParams::LAZY));
        assert_eq!(class(ActivityKind::Tilting), None);
    }

    #[test]
    fn test_builder_applies_overrides() {
        let locus = Locus::builder()
            .session("commute")
            .pre_initialize(false)
            .build()
            .unwrap();
        assert_eq!(locus.session(), "commute");
        assert!(!locus.config().pre_initialize);
    }

    #[tokio::test]
    async fn test_location_from_config_requires_providers() {
        crate::logging::init_test_logging();
        let locus = Locus::builder().build().unwrap();
        let err = locus.location_from_config().await.err().unwrap();
        assert!(matches!(err, LocusError::Config(_)));
    }

    #[tokio::test]
    async fn test_empty_chain_is_configuration_error() {
        crate::logging::init_test_logging();
        let locus = Locus::builder().build().unwrap();
        let err = locus.location(Vec::new()).await.err().unwrap();
        assert!(matches!(
            err,
            LocusError::Failover(FailoverError::EmptyProviderList)
        ));
    }
}
