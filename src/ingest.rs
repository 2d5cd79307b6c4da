//! Sensor ingestion: merge the three streams into snapshots and persist them.
//!
//! A single task owns the pending snapshot, so merging needs no locking. Every
//! event that leaves the pending snapshot complete produces a write; the
//! pending snapshot is not cleared afterwards, so the next event of any kind
//! produces another complete snapshot carrying the latest value of every field.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Receiver};
use tokio::task::JoinHandle;

use crate::config::SmoothingConfig;
use crate::filters::ScalarKalman;
use crate::incident::AbruptMovementDetector;
use crate::sensors::SensorEvent;
use crate::store::LogStore;
use crate::types::{Coordinate, SensorSnapshot, Vector3};

/// Snapshot under construction; any field may still be missing
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PendingSnapshot {
    pub timestamp: Option<String>,
    pub location: Option<Coordinate>,
    pub accelerometer: Option<Vector3>,
    pub gyroscope: Option<Vector3>,
}

impl PendingSnapshot {
    /// Overwrite the event's fields and stamp the snapshot with `timestamp`
    pub fn apply(&mut self, event: SensorEvent, timestamp: String) {
        match event {
            SensorEvent::Location(coord) => self.location = Some(coord),
            SensorEvent::Accelerometer(reading) => self.accelerometer = Some(reading),
            SensorEvent::Gyroscope(reading) => self.gyroscope = Some(reading),
        }
        self.timestamp = Some(timestamp);
    }

    pub fn to_complete(&self) -> Option<SensorSnapshot> {
        let location = self.location?;
        Some(SensorSnapshot {
            timestamp: self.timestamp.clone()?,
            latitude: location.latitude,
            longitude: location.longitude,
            accelerometer: self.accelerometer?,
            gyroscope: self.gyroscope?,
        })
    }
}

/// Latest readings for display, plus the running abrupt-movement count
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LiveReadings {
    pub location: Option<Coordinate>,
    pub accelerometer: Option<Vector3>,
    pub gyroscope: Option<Vector3>,
    pub abrupt_movements: u32,
}

impl LiveReadings {
    /// Forget the sensor values but keep the counter
    pub fn clear_readings(&mut self) {
        self.location = None;
        self.accelerometer = None;
        self.gyroscope = None;
    }
}

pub type SharedReadings = Arc<Mutex<LiveReadings>>;

/// Per-axis coordinate smoother, seeded by the first fix
#[derive(Clone, Debug)]
struct CoordinateSmoother {
    config: SmoothingConfig,
    axes: Option<(ScalarKalman, ScalarKalman)>,
}

impl CoordinateSmoother {
    fn new(config: SmoothingConfig) -> Self {
        Self { config, axes: None }
    }

    fn smooth(&mut self, fix: Coordinate) -> Coordinate {
        let config = &self.config;
        let (lat, lon) = self.axes.get_or_insert_with(|| {
            (
                ScalarKalman::new(
                    config.process_noise,
                    config.measurement_noise,
                    config.estimated_error,
                    fix.latitude,
                ),
                ScalarKalman::new(
                    config.process_noise,
                    config.measurement_noise,
                    config.estimated_error,
                    fix.longitude,
                ),
            )
        });
        Coordinate::new(lat.update(fix.latitude), lon.update(fix.longitude))
    }
}

/// Event-to-snapshot merger owned by the ingest task
pub struct SensorIngestor {
    pending: PendingSnapshot,
    smoother: Option<CoordinateSmoother>,
    detector: AbruptMovementDetector,
    readings: SharedReadings,
}

impl SensorIngestor {
    pub fn new(
        readings: SharedReadings,
        abrupt_threshold: f64,
        smoothing: Option<SmoothingConfig>,
    ) -> Self {
        Self {
            pending: PendingSnapshot::default(),
            smoother: smoothing.map(CoordinateSmoother::new),
            detector: AbruptMovementDetector::with_threshold(abrupt_threshold),
            readings,
        }
    }

    pub fn pending(&self) -> &PendingSnapshot {
        &self.pending
    }

    /// Merge one event received at `received_at`. Returns the snapshot to
    /// persist when every field is populated.
    pub fn handle(&mut self, event: SensorEvent, received_at: DateTime<Utc>) -> Option<SensorSnapshot> {
        let event = match (event, self.smoother.as_mut()) {
            (SensorEvent::Location(fix), Some(smoother)) => SensorEvent::Location(smoother.smooth(fix)),
            (event, _) => event,
        };

        let abrupt = match event {
            SensorEvent::Accelerometer(reading) => self.detector.observe(reading),
            _ => false,
        };
        if abrupt {
            log::debug!("[ingest] abrupt movement detected");
        }
        self.update_readings(event, abrupt);

        let timestamp = received_at.to_rfc3339_opts(SecondsFormat::Millis, true);
        self.pending.apply(event, timestamp);
        self.pending.to_complete()
    }

    fn update_readings(&self, event: SensorEvent, abrupt: bool) {
        let Ok(mut live) = self.readings.lock() else {
            return;
        };
        match event {
            SensorEvent::Location(coord) => live.location = Some(coord),
            SensorEvent::Accelerometer(reading) => live.accelerometer = Some(reading),
            SensorEvent::Gyroscope(reading) => live.gyroscope = Some(reading),
        }
        if abrupt {
            live.abrupt_movements += 1;
        }
    }
}

/// Write-path counters
#[derive(Debug, Default)]
pub struct WriteStats {
    submitted: AtomicU64,
    persisted: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WriteCounts {
    pub submitted: u64,
    pub persisted: u64,
    /// Rejected because the queue was full or closed
    pub dropped: u64,
    /// Store missing, serialization error or store error
    pub failed: u64,
}

impl WriteStats {
    pub fn counts(&self) -> WriteCounts {
        WriteCounts {
            submitted: self.submitted.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
struct PendingWrite {
    key: String,
    value: Value,
}

/// Fire-and-forget handle for persisting snapshots
#[derive(Clone)]
pub struct WriteQueue {
    tx: mpsc::Sender<PendingWrite>,
    stats: Arc<WriteStats>,
}

impl WriteQueue {
    fn bounded(capacity: usize, stats: Arc<WriteStats>) -> (Self, Receiver<PendingWrite>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, stats }, rx)
    }

    /// Queue a snapshot for writing. Never blocks.
    pub fn submit(&self, snapshot: &SensorSnapshot) {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);

        let value = match serde_json::to_value(snapshot) {
            Ok(value) => value,
            Err(e) => {
                log::error!("[writer] cannot serialize snapshot: {}", e);
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        let write = PendingWrite {
            key: snapshot.log_key(),
            value,
        };

        match self.tx.try_send(write) {
            Ok(()) => {}
            Err(TrySendError::Full(write)) => {
                log::warn!("[writer] queue full, dropping {}", write.key);
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Closed(write)) => {
                log::warn!("[writer] writer gone, dropping {}", write.key);
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Spawn the writer task. It exits once every queue handle is dropped and
/// the queue is drained.
pub fn spawn_writer(
    store: Option<Arc<dyn LogStore>>,
    capacity: usize,
    stats: Arc<WriteStats>,
) -> (WriteQueue, JoinHandle<()>) {
    let (queue, mut rx) = WriteQueue::bounded(capacity, Arc::clone(&stats));

    let handle = tokio::spawn(async move {
        while let Some(write) = rx.recv().await {
            let Some(store) = store.as_ref() else {
                log::error!("[writer] log store unavailable, dropping {}", write.key);
                stats.failed.fetch_add(1, Ordering::Relaxed);
                continue;
            };
            // Store I/O runs off the async workers; awaiting keeps writes in order
            let store = Arc::clone(store);
            let outcome = tokio::task::spawn_blocking(move || {
                let result = store.put(&write.key, write.value);
                (write.key, result)
            })
            .await;

            match outcome {
                Ok((_, Ok(()))) => {
                    stats.persisted.fetch_add(1, Ordering::Relaxed);
                }
                Ok((key, Err(e))) => {
                    log::error!("[writer] failed to persist {}: {}", key, e);
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    log::error!("[writer] store task aborted: {}", e);
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        log::debug!("[writer] queue drained");
    });

    (queue, handle)
}

/// Consume sensor events until every sender is gone
pub async fn run_ingest_loop(
    mut rx: Receiver<SensorEvent>,
    mut ingestor: SensorIngestor,
    writes: WriteQueue,
) {
    let mut events = 0u64;
    while let Some(event) = rx.recv().await {
        events += 1;
        if let Some(snapshot) = ingestor.handle(event, Utc::now()) {
            writes.submit(&snapshot);
        }
    }
    log::info!("[ingest] sensor stream closed after {} events", events);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::jsonl::tests::temp_path;
    use crate::store::{JsonlLog, LogEntry, MemoryLog};
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn ingestor() -> (SensorIngestor, SharedReadings) {
        let readings = SharedReadings::default();
        (SensorIngestor::new(Arc::clone(&readings), 1.5, None), readings)
    }

    fn fix() -> SensorEvent {
        SensorEvent::Location(Coordinate::new(45.0, 7.0))
    }

    fn accel(z: f64) -> SensorEvent {
        SensorEvent::Accelerometer(Vector3::new(0.0, 0.0, z))
    }

    fn gyro() -> SensorEvent {
        SensorEvent::Gyroscope(Vector3::new(0.01, 0.02, 0.03))
    }

    #[test]
    fn test_partial_snapshot_is_not_emitted() {
        let (mut ingest, _) = ingestor();
        assert!(ingest.handle(fix(), at(0)).is_none());
        assert!(ingest.handle(accel(9.8), at(10)).is_none());
        assert!(ingest.pending().gyroscope.is_none());
    }

    #[test]
    fn test_complete_snapshot_uses_latest_timestamp() {
        let (mut ingest, _) = ingestor();
        ingest.handle(fix(), at(0));
        ingest.handle(accel(9.8), at(10));
        let snapshot = ingest.handle(gyro(), at(20)).unwrap();

        assert_eq!(snapshot.timestamp, "2023-11-14T22:13:20.020Z");
        assert_eq!(snapshot.log_key(), "sensor_2023-11-14T22:13:20.020Z");
        assert_relative_eq!(snapshot.latitude, 45.0);
        assert_relative_eq!(snapshot.accelerometer.z, 9.8);
    }

    #[test]
    fn test_pending_snapshot_survives_flush() {
        let (mut ingest, _) = ingestor();
        ingest.handle(fix(), at(0));
        ingest.handle(accel(9.8), at(10));
        let first = ingest.handle(gyro(), at(20)).unwrap();

        // Any later event re-fires with the carried-over fields
        let second = ingest.handle(accel(9.7), at(30)).unwrap();
        assert_ne!(first.timestamp, second.timestamp);
        assert_eq!(second.latitude, first.latitude);
        assert_eq!(second.gyroscope, first.gyroscope);
        assert_relative_eq!(second.accelerometer.z, 9.7);
    }

    #[test]
    fn test_live_readings_and_abrupt_count() {
        let (mut ingest, readings) = ingestor();
        ingest.handle(accel(0.0), at(0));
        ingest.handle(accel(2.0), at(1));
        ingest.handle(accel(2.1), at(2));
        ingest.handle(fix(), at(3));

        let live = readings.lock().unwrap().clone();
        assert_eq!(live.abrupt_movements, 1);
        assert_eq!(live.location, Some(Coordinate::new(45.0, 7.0)));
        assert_eq!(live.accelerometer, Some(Vector3::new(0.0, 0.0, 2.1)));
        assert!(live.gyroscope.is_none());
    }

    #[test]
    fn test_smoothing_seeds_with_first_fix() {
        let readings = SharedReadings::default();
        let mut ingest = SensorIngestor::new(readings, 1.5, Some(SmoothingConfig::default()));

        ingest.handle(SensorEvent::Location(Coordinate::new(45.0, 7.0)), at(0));
        assert_eq!(ingest.pending().location, Some(Coordinate::new(45.0, 7.0)));

        ingest.handle(SensorEvent::Location(Coordinate::new(45.001, 7.0)), at(1000));
        let smoothed = ingest.pending().location.unwrap();
        assert!(smoothed.latitude > 45.0);
        assert!(smoothed.latitude <= 45.001);
    }

    #[tokio::test]
    async fn test_writer_persists_under_sensor_key() {
        let store = Arc::new(MemoryLog::new());
        let stats = Arc::new(WriteStats::default());
        let (queue, handle) = spawn_writer(Some(store.clone()), 8, Arc::clone(&stats));

        let (mut ingest, _) = ingestor();
        ingest.handle(fix(), at(0));
        ingest.handle(accel(9.8), at(10));
        let snapshot = ingest.handle(gyro(), at(20)).unwrap();
        queue.submit(&snapshot);
        drop(queue);
        handle.await.unwrap();

        let entries: Vec<LogEntry> = store.get_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, snapshot.log_key());
        assert_eq!(entries[0].value["accelerometer"]["z"], 9.8);
        assert_eq!(stats.counts().persisted, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_writer_keeps_submission_order_on_disk() {
        let path = temp_path("writer.jsonl");
        let stats = Arc::new(WriteStats::default());
        let journal = Arc::new(JsonlLog::open(&path).unwrap());
        let (queue, handle) = spawn_writer(Some(journal), 4, Arc::clone(&stats));

        let (mut ingest, _) = ingestor();
        ingest.handle(fix(), at(0));
        ingest.handle(gyro(), at(10));
        let mut expected = Vec::new();
        for i in 0..3 {
            let snapshot = ingest.handle(accel(9.0 + i as f64), at(20 + i)).unwrap();
            expected.push(snapshot.log_key());
            queue.submit(&snapshot);
        }
        drop(queue);
        handle.await.unwrap();

        let reopened = JsonlLog::open(&path).unwrap();
        let keys: Vec<String> = reopened.get_all().unwrap().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, expected);
        assert_eq!(stats.counts().persisted, 3);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_full_queue_drops_write() {
        let stats = Arc::new(WriteStats::default());
        let (queue, _rx) = WriteQueue::bounded(1, Arc::clone(&stats));
        let snapshot = SensorSnapshot {
            timestamp: "2024-01-01T00:00:00.000Z".to_string(),
            latitude: 1.0,
            longitude: 2.0,
            accelerometer: Vector3::new(0.0, 0.0, 9.8),
            gyroscope: Vector3::new(0.0, 0.0, 0.0),
        };

        queue.submit(&snapshot);
        queue.submit(&snapshot);

        let counts = stats.counts();
        assert_eq!(counts.submitted, 2);
        assert_eq!(counts.dropped, 1);
    }

    struct FailingStore;

    impl LogStore for FailingStore {
        fn initialize(&self) -> Result<(), StoreError> {
            Ok(())
        }
        fn put(&self, _key: &str, _value: Value) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        }
        fn get(&self, _key: &str) -> Result<Option<Value>, StoreError> {
            Ok(None)
        }
        fn get_all(&self) -> Result<Vec<LogEntry>, StoreError> {
            Ok(Vec::new())
        }
        fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Ok(())
        }
        fn clear(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_store_failures_are_counted_not_fatal() {
        let stats = Arc::new(WriteStats::default());
        let (failing, failing_handle) =
            spawn_writer(Some(Arc::new(FailingStore)), 8, Arc::clone(&stats));
        let (detached, detached_handle) = spawn_writer(None, 8, Arc::clone(&stats));

        let (mut ingest, _) = ingestor();
        ingest.handle(fix(), at(0));
        ingest.handle(accel(9.8), at(10));
        let snapshot = ingest.handle(gyro(), at(20)).unwrap();
        failing.submit(&snapshot);
        detached.submit(&snapshot);
        drop((failing, detached));
        failing_handle.await.unwrap();
        detached_handle.await.unwrap();

        let counts = stats.counts();
        assert_eq!(counts.failed, 2);
        assert_eq!(counts.persisted, 0);
    }

    #[tokio::test]
    async fn test_ingest_loop_ends_when_senders_drop() {
        let store = Arc::new(MemoryLog::new());
        let stats = Arc::new(WriteStats::default());
        let (queue, writer) = spawn_writer(Some(store.clone()), 8, Arc::clone(&stats));
        let (tx, rx) = mpsc::channel(8);
        let (ingest, _) = ingestor();
        let ingest_task = tokio::spawn(run_ingest_loop(rx, ingest, queue));

        tx.send(fix()).await.unwrap();
        tx.send(accel(9.8)).await.unwrap();
        tx.send(gyro()).await.unwrap();
        drop(tx);

        ingest_task.await.unwrap();
        writer.await.unwrap();
        assert_eq!(store.len().unwrap(), 1);
    }
}
