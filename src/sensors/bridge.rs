//! Push-style sources for embedding hosts.
//!
//! Platform glue (a mobile shell, a replay tool, tests) receives sensor
//! callbacks itself and forwards them with `push`. Readings pushed while no
//! listener is registered are discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;

use super::{
    LocationSource, MotionKind, MotionSource, PermissionStatus, SensorEvent, Subscription,
    WatchOptions,
};
use crate::geodesy::haversine_distance;
use crate::types::{Coordinate, Vector3};

type ListenerSlot = Arc<Mutex<Option<Sender<SensorEvent>>>>;

fn forward(slot: &ListenerSlot, event: SensorEvent, name: &str) -> bool {
    let guard = match slot.lock() {
        Ok(guard) => guard,
        Err(_) => return false,
    };
    let Some(tx) = guard.as_ref() else {
        return false;
    };

    match tx.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            log::warn!("[{}] event channel full, dropping reading", name);
            false
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

fn register(slot: &ListenerSlot, tx: Sender<SensorEvent>, name: &'static str) -> Subscription {
    if let Ok(mut guard) = slot.lock() {
        *guard = Some(tx);
    }
    let slot = Arc::clone(slot);
    Subscription::new(name, move || {
        if let Ok(mut guard) = slot.lock() {
            guard.take();
        }
    })
}

#[derive(Debug)]
struct WatchState {
    min_distance_m: f64,
    last_reported: Option<Coordinate>,
}

/// Location source fed by the host
pub struct BridgeLocation {
    permission: Mutex<PermissionStatus>,
    listener: ListenerSlot,
    watch: Mutex<WatchState>,
}

impl BridgeLocation {
    pub fn new(permission: PermissionStatus) -> Self {
        Self {
            permission: Mutex::new(permission),
            listener: Arc::new(Mutex::new(None)),
            watch: Mutex::new(WatchState {
                min_distance_m: 0.0,
                last_reported: None,
            }),
        }
    }

    /// Change the answer given to the next permission request
    pub fn set_permission(&self, permission: PermissionStatus) {
        if let Ok(mut guard) = self.permission.lock() {
            *guard = permission;
        }
    }

    pub fn has_listener(&self) -> bool {
        self.listener.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    /// Forward a fix. Returns true if it was delivered.
    pub fn push(&self, latitude: f64, longitude: f64) -> bool {
        let fix = Coordinate::new(latitude, longitude);

        let Ok(mut watch) = self.watch.lock() else {
            return false;
        };
        if let Some(last) = watch.last_reported {
            if haversine_distance(&last, &fix) < watch.min_distance_m {
                return false;
            }
        }

        // Only a delivered fix becomes the distance anchor
        let delivered = forward(&self.listener, SensorEvent::Location(fix), "location");
        if delivered {
            watch.last_reported = Some(fix);
        }
        delivered
    }
}

impl LocationSource for BridgeLocation {
    fn request_permission(&self) -> PermissionStatus {
        self.permission
            .lock()
            .map(|p| *p)
            .unwrap_or(PermissionStatus::Denied)
    }

    fn watch(&self, options: WatchOptions, tx: Sender<SensorEvent>) -> Subscription {
        if let Ok(mut watch) = self.watch.lock() {
            watch.min_distance_m = options.min_distance_m;
            watch.last_reported = None;
        }
        register(&self.listener, tx, "location")
    }
}

/// Accelerometer or gyroscope source fed by the host
pub struct BridgeMotion {
    kind: MotionKind,
    interval_ms: AtomicU64,
    listener: ListenerSlot,
}

impl BridgeMotion {
    pub fn new(kind: MotionKind) -> Self {
        Self {
            kind,
            interval_ms: AtomicU64::new(0),
            listener: Arc::new(Mutex::new(None)),
        }
    }

    pub fn accelerometer() -> Self {
        Self::new(MotionKind::Accelerometer)
    }

    pub fn gyroscope() -> Self {
        Self::new(MotionKind::Gyroscope)
    }

    /// Interval last requested by the tracker
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }

    pub fn has_listener(&self) -> bool {
        self.listener.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    /// Forward a reading. Returns true if it was delivered.
    pub fn push(&self, x: f64, y: f64, z: f64) -> bool {
        forward(
            &self.listener,
            self.kind.event(Vector3::new(x, y, z)),
            self.kind.as_str(),
        )
    }
}

impl MotionSource for BridgeMotion {
    fn kind(&self) -> MotionKind {
        self.kind
    }

    fn set_update_interval(&self, interval: Duration) {
        self.interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
    }

    fn add_listener(&self, tx: Sender<SensorEvent>) -> Subscription {
        register(&self.listener, tx, self.kind.as_str())
    }
}
