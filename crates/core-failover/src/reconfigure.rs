//! Activity-driven reconfiguration of a running location stream
//!
//! Detected activities are mapped to location params by a caller-supplied
//! classifier. The orchestrator is only told to reconfigure when the
//! resulting params differ from the ones last applied, so a user who keeps
//! walking does not restart the stream on every activity update.

use crate::adapter::UpdateListener;
use crate::orchestrator::FailoverHandle;
use crate::types::{DetectedActivity, LocationParams};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// Reconfigures a [`FailoverHandle`] whenever the classified activity asks
/// for different params
pub struct ActivityReconfigurationPolicy<F>
where
    F: Fn(&DetectedActivity) -> Option<LocationParams> + Send + Sync,
{
    target: FailoverHandle,
    classify: F,
    last_applied: Mutex<Option<LocationParams>>,
}

impl<F> ActivityReconfigurationPolicy<F>
where
    F: Fn(&DetectedActivity) -> Option<LocationParams> + Send + Sync,
{
    pub fn new(target: FailoverHandle, classify: F) -> Self {
        Self {
            target,
            classify,
            last_applied: Mutex::new(None),
        }
    }

    /// Seed with the params the stream was started with
    pub fn with_initial(self, params: LocationParams) -> Self {
        *self.last_applied.lock().unwrap_or_else(PoisonError::into_inner) = Some(params);
        self
    }

    pub fn last_applied(&self) -> Option<LocationParams> {
        *self.last_applied.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget the last applied params so the next classification always applies
    pub fn reset(&self) {
        *self.last_applied.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Classify `activity` and reconfigure if needed.
    ///
    /// Returns the params that were sent to the orchestrator, if any.
    pub fn handle_activity(&self, activity: &DetectedActivity) -> Option<LocationParams> {
        let params = (self.classify)(activity)?;

        let mut last = self.last_applied.lock().unwrap_or_else(PoisonError::into_inner);
        if *last == Some(params) {
            debug!(activity = activity.kind.as_str(), "Activity unchanged for location params");
            return None;
        }

        if let Err(e) = self.target.configure(params) {
            warn!(error = %e, "Could not reconfigure location stream");
            return None;
        }

        debug!(activity = activity.kind.as_str(), params = %params, "Reconfigured for activity");
        *last = Some(params);
        Some(params)
    }
}

impl<F> UpdateListener for ActivityReconfigurationPolicy<F>
where
    F: Fn(&DetectedActivity) -> Option<LocationParams> + Send + Sync,
{
    fn on_activity(&self, activity: &DetectedActivity) {
        self.handle_activity(activity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{ProviderAdapter, ProviderContext};
    use crate::orchestrator::{FailoverConfig, FailoverOrchestrator};
    use crate::types::{ActivityKind, Reading};
    use crate::AdapterResult;
    use std::sync::Arc;

    struct Recorder(Arc<Mutex<Vec<LocationParams>>>);

    impl ProviderAdapter for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn initialize(&mut self, _ctx: &ProviderContext) {}

        fn start(
            &mut self,
            _listener: Arc<dyn UpdateListener>,
            params: LocationParams,
            _single_shot: bool,
        ) -> AdapterResult<()> {
            self.0.lock().unwrap().push(params);
            Ok(())
        }

        fn stop(&mut self) {}

        fn last_reading(&self) -> Option<Reading> {
            None
        }
    }

    fn classify(activity: &DetectedActivity) -> Option<LocationParams> {
        match activity.kind {
            ActivityKind::InVehicle => Some(LocationParams::NAVIGATION),
            ActivityKind::Walking | ActivityKind::Running => Some(LocationParams::BEST_EFFORT),
            ActivityKind::Still => Some(LocationParams::LAZY),
            _ => None,
        }
    }

    struct Silent;
    impl UpdateListener for Silent {}

    #[tokio::test]
    async fn test_reconfigures_only_on_change() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let (handle, _task) = FailoverOrchestrator::spawn(
            vec![Box::new(Recorder(starts.clone()))],
            FailoverConfig::default(),
        )
        .unwrap();
        handle
            .start(Arc::new(Silent), LocationParams::BEST_EFFORT, false)
            .await
            .unwrap();

        let policy = ActivityReconfigurationPolicy::new(handle.clone(), classify)
            .with_initial(LocationParams::BEST_EFFORT);

        assert_eq!(policy.handle_activity(&DetectedActivity::new(ActivityKind::Walking, 90)), None);
        assert_eq!(
            policy.handle_activity(&DetectedActivity::new(ActivityKind::InVehicle, 80)),
            Some(LocationParams::NAVIGATION)
        );
        assert_eq!(policy.handle_activity(&DetectedActivity::new(ActivityKind::InVehicle, 95)), None);
        assert_eq!(policy.handle_activity(&DetectedActivity::new(ActivityKind::Tilting, 50)), None);
        policy.on_activity(&DetectedActivity::new(ActivityKind::Still, 70));

        handle.snapshot().await.unwrap();
        assert_eq!(
            *starts.lock().unwrap(),
            vec![
                LocationParams::BEST_EFFORT,
                LocationParams::NAVIGATION,
                LocationParams::LAZY
            ]
        );
        assert_eq!(policy.last_applied(), Some(LocationParams::LAZY));
    }

    #[tokio::test]
    async fn test_reset_reapplies() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let (handle, _task) = FailoverOrchestrator::spawn(
            vec![Box::new(Recorder(starts.clone()))],
            FailoverConfig::default(),
        )
        .unwrap();

        let policy = ActivityReconfigurationPolicy::new(handle, classify);
        let walking = DetectedActivity::new(ActivityKind::Walking, 90);
        assert!(policy.handle_activity(&walking).is_some());
        assert!(policy.handle_activity(&walking).is_none());
        policy.reset();
        assert!(policy.handle_activity(&walking).is_some());
    }
}
