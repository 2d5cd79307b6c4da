use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::ingest::{
    run_ingest_loop, spawn_writer, LiveReadings, SensorIngestor, SharedReadings, WriteCounts,
    WriteStats,
};
use crate::metrics::MetricsEngine;
use crate::sensors::{PermissionStatus, SensorSet, Subscription, WatchOptions};
use crate::store::LogStore;
use crate::timer::SessionTimer;
use crate::types::{Coordinate, Metrics, Vector3};

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingState {
    /// Not subscribed to any sensor
    Idle,
    /// Waiting on the location permission answer
    Requesting,
    /// Subscribed and writing snapshots
    Tracking,
}

/// Owns the tracking lifecycle: permission, subscriptions, the ingest and
/// writer tasks, the session timer and the cached metrics.
pub struct SessionController {
    config: TrackerConfig,
    sensors: SensorSet,
    store: Option<Arc<dyn LogStore>>,
    state: TrackingState,
    subscriptions: Vec<Subscription>,
    /// Ingest and writer tasks not yet awaited
    tasks: Vec<JoinHandle<()>>,
    readings: SharedReadings,
    stats: Arc<WriteStats>,
    timer: SessionTimer,
    engine: MetricsEngine,
    last_metrics: Option<Metrics>,
}

impl SessionController {
    /// Create an idle controller. A store that fails to initialize is logged
    /// and left detached; see [`SessionController::reopen_store`].
    pub fn new(config: TrackerConfig, sensors: SensorSet, store: Arc<dyn LogStore>) -> Self {
        let store = match store.initialize() {
            Ok(()) => Some(store),
            Err(e) => {
                log::error!("[session] log store initialization failed: {}", e);
                None
            }
        };

        Self {
            engine: MetricsEngine::new(config.metrics.clone()),
            config,
            sensors,
            store,
            state: TrackingState::Idle,
            subscriptions: Vec::new(),
            tasks: Vec::new(),
            readings: SharedReadings::default(),
            stats: Arc::new(WriteStats::default()),
            timer: SessionTimer::new(),
            last_metrics: None,
        }
    }

    /// Attach a new store, replacing the current one. Not allowed while tracking.
    pub fn reopen_store(&mut self, store: Arc<dyn LogStore>) -> TrackerResult<()> {
        if self.state != TrackingState::Idle {
            return Err(TrackerError::InvalidState(
                "cannot swap the log store while tracking".to_string(),
            ));
        }
        if let Err(e) = store.initialize() {
            log::error!("[session] log store initialization failed: {}", e);
            return Err(e.into());
        }
        self.store = Some(store);
        log::info!("[session] log store attached");
        Ok(())
    }

    /// Request permission and begin capturing. Must be called from within a
    /// Tokio runtime.
    pub fn start(&mut self) -> TrackerResult<()> {
        if self.state != TrackingState::Idle {
            return Err(TrackerError::AlreadyTracking);
        }
        self.config.validate()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(TrackerError::Internal(
                "start requires a Tokio runtime".to_string(),
            ));
        }

        self.state = TrackingState::Requesting;
        if self.sensors.location.request_permission() == PermissionStatus::Denied {
            self.state = TrackingState::Idle;
            log::warn!("[session] location permission denied, not tracking");
            return Err(TrackerError::PermissionDenied);
        }

        let motion_interval = self.config.motion_interval();
        self.sensors.accelerometer.set_update_interval(motion_interval);
        self.sensors.gyroscope.set_update_interval(motion_interval);

        let (writes, writer) = spawn_writer(
            self.store.clone(),
            self.config.write_queue_capacity,
            Arc::clone(&self.stats),
        );
        let ingestor = SensorIngestor::new(
            Arc::clone(&self.readings),
            self.config.metrics.abrupt_delta_threshold,
            self.config.smoothing.clone(),
        );
        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));
        let ingest = tokio::spawn(run_ingest_loop(rx, ingestor, writes));

        let options = WatchOptions {
            interval: self.config.location_interval(),
            min_distance_m: self.config.min_distance_m,
        };
        self.subscriptions = vec![
            self.sensors.location.watch(options, tx.clone()),
            self.sensors.accelerometer.add_listener(tx.clone()),
            self.sensors.gyroscope.add_listener(tx),
        ];
        self.tasks.push(ingest);
        self.tasks.push(writer);

        self.timer.start();
        self.state = TrackingState::Tracking;
        log::info!(
            "[session] tracking started (location every {:?}, motion every {:?})",
            options.interval,
            motion_interval
        );
        Ok(())
    }

    /// Unsubscribe everything and return to idle. Safe to call at any time.
    pub fn stop(&mut self) {
        let was_tracking = self.state == TrackingState::Tracking;

        for mut subscription in self.subscriptions.drain(..) {
            subscription.remove();
        }
        if let Ok(mut live) = self.readings.lock() {
            live.clear_readings();
        }
        self.timer.stop();
        self.state = TrackingState::Idle;

        if was_tracking {
            log::info!(
                "[session] tracking stopped after {}s",
                self.timer.consumed_secs()
            );
        }
    }

    /// Wait until events buffered by stopped sessions are written
    pub async fn flush(&mut self) -> TrackerResult<()> {
        if self.state == TrackingState::Tracking {
            return Err(TrackerError::InvalidState(
                "cannot flush while tracking".to_string(),
            ));
        }
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                log::warn!("[session] pipeline task ended abnormally: {}", e);
            }
        }
        Ok(())
    }

    /// Delete every logged snapshot and reset counters, cached metrics and the
    /// timer. Only valid while idle.
    pub async fn clean(&mut self) -> TrackerResult<()> {
        if self.state != TrackingState::Idle {
            return Err(TrackerError::InvalidState(
                "stop tracking before cleaning".to_string(),
            ));
        }
        let store = self.store.clone().ok_or(TrackerError::StoreUnavailable)?;

        self.flush().await?;
        store.clear()?;

        if let Ok(mut live) = self.readings.lock() {
            *live = LiveReadings::default();
        }
        self.last_metrics = None;
        self.timer.reset();
        log::info!("[session] log cleared");
        Ok(())
    }

    /// Derive metrics from the whole log and cache the result
    pub fn compute_metrics(&mut self) -> TrackerResult<Metrics> {
        let store = self.store.as_ref().ok_or(TrackerError::StoreUnavailable)?;
        let entries = store.get_all()?;
        let metrics = self.engine.compute(&entries);
        self.last_metrics = Some(metrics.clone());
        Ok(metrics)
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn is_tracking(&self) -> bool {
        self.state == TrackingState::Tracking
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn store(&self) -> Option<&Arc<dyn LogStore>> {
        self.store.as_ref()
    }

    pub fn live_readings(&self) -> LiveReadings {
        self.readings
            .lock()
            .map(|live| live.clone())
            .unwrap_or_default()
    }

    pub fn live_location(&self) -> Option<Coordinate> {
        self.live_readings().location
    }

    pub fn live_accelerometer(&self) -> Option<Vector3> {
        self.live_readings().accelerometer
    }

    pub fn live_gyroscope(&self) -> Option<Vector3> {
        self.live_readings().gyroscope
    }

    /// Abrupt movements seen live since the last clean
    pub fn abrupt_movements(&self) -> u32 {
        self.live_readings().abrupt_movements
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.timer.elapsed_secs()
    }

    pub fn consumed_secs(&self) -> u64 {
        self.timer.consumed_secs()
    }

    pub fn write_counts(&self) -> WriteCounts {
        self.stats.counts()
    }

    /// Result of the most recent `compute_metrics`, until the next clean
    pub fn last_metrics(&self) -> Option<&Metrics> {
        self.last_metrics.as_ref()
    }
}
