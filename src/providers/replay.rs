//! Direct provider replaying a recorded track
//!
//! The track is a JSON array of readings. One point is consumed per
//! requested interval; points closer than the requested minimum displacement
//! to the last emitted one are skipped.

use super::{haversine_m, now_ms, TrackError};
use locus_core_failover::{
    AdapterResult, LocationParams, ProviderAdapter, ProviderContext, Reading, ReadingStore,
    UpdateListener,
};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Default)]
struct ReplayState {
    last: Option<Reading>,
    store: Option<Arc<dyn ReadingStore>>,
}

pub struct ReplayProvider {
    name: String,
    track: Arc<Vec<Reading>>,
    state: Arc<Mutex<ReplayState>>,
    stream: Option<JoinHandle<()>>,
}

fn lock(state: &Mutex<ReplayState>) -> MutexGuard<'_, ReplayState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ReplayProvider {
    pub fn new(name: impl Into<String>, track: Vec<Reading>) -> Self {
        Self {
            name: name.into(),
            track: Arc::new(track),
            state: Arc::new(Mutex::new(ReplayState::default())),
            stream: None,
        }
    }

    pub fn from_file(name: impl Into<String>, path: &Path) -> Result<Self, TrackError> {
        let contents = std::fs::read_to_string(path).map_err(|source| TrackError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let track: Vec<Reading> =
            serde_json::from_str(&contents).map_err(|source| TrackError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if track.is_empty() {
            return Err(TrackError::Empty {
                path: path.to_path_buf(),
            });
        }
        Ok(Self::new(name, track))
    }

    pub fn len(&self) -> usize {
        self.track.len()
    }

    pub fn is_empty(&self) -> bool {
        self.track.is_empty()
    }

    fn stop_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.abort();
        }
    }
}

impl ProviderAdapter for ReplayProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self, ctx: &ProviderContext) {
        lock(&self.state).store = ctx.store().cloned();
        info!(provider = %self.name, points = self.track.len(), "Replay track loaded");
    }

    fn start(
        &mut self,
        listener: Arc<dyn UpdateListener>,
        params: LocationParams,
        single_shot: bool,
    ) -> AdapterResult<()> {
        self.stop_stream();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(provider = %self.name, "No runtime; replay not started");
            return Ok(());
        };

        let name = self.name.clone();
        let track = self.track.clone();
        let state = self.state.clone();
        self.stream = Some(runtime.spawn(async move {
            let mut previous: Option<(f64, f64)> = None;
            for (i, point) in track.iter().enumerate() {
                if i > 0 {
                    tokio::time::sleep(params.interval).await;
                }
                if let Some((lat, lon)) = previous {
                    if haversine_m(lat, lon, point.latitude, point.longitude)
                        < params.distance as f64
                    {
                        continue;
                    }
                }

                let mut reading = point.clone();
                reading.provider = name.clone();
                if reading.time_ms == 0 {
                    reading.time_ms = now_ms();
                }

                let store = {
                    let mut state = lock(&state);
                    state.last = Some(reading.clone());
                    state.store.clone()
                };
                if let Some(store) = store {
                    store.put(&name, &reading);
                }
                listener.on_location(&reading);
                previous = Some((reading.latitude, reading.longitude));

                if single_shot {
                    return;
                }
            }
            debug!(provider = %name, "Replay track finished");
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.stop_stream();
    }

    fn last_reading(&self) -> Option<Reading> {
        let state = lock(&self.state);
        state
            .last
            .clone()
            .or_else(|| state.store.as_ref().and_then(|s| s.get(&self.name)))
    }
}

impl Drop for ReplayProvider {
    fn drop(&mut self) {
        self.stop_stream();
    }
}
