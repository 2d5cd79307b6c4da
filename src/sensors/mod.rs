//! Sensor source capabilities
//!
//! Sources push readings into the ingest channel. A subscription owns
//! whatever keeps the source alive (a polling task or a registered sender) and
//! releases it on `remove` or drop.

mod bridge;
mod device;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;

use crate::types::{Coordinate, Vector3};

pub use bridge::{BridgeLocation, BridgeMotion};
pub use device::{DeviceLocation, DeviceMotion};

/// One reading from any of the three sources
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SensorEvent {
    Location(Coordinate),
    Accelerometer(Vector3),
    Gyroscope(Vector3),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionKind {
    Accelerometer,
    Gyroscope,
}

impl MotionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MotionKind::Accelerometer => "accelerometer",
            MotionKind::Gyroscope => "gyroscope",
        }
    }

    pub fn event(&self, reading: Vector3) -> SensorEvent {
        match self {
            MotionKind::Accelerometer => SensorEvent::Accelerometer(reading),
            MotionKind::Gyroscope => SensorEvent::Gyroscope(reading),
        }
    }
}

/// Location watch parameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WatchOptions {
    pub interval: Duration,
    /// Fixes closer than this to the last reported one are suppressed
    pub min_distance_m: f64,
}

/// Live registration with a sensor source
pub struct Subscription {
    name: &'static str,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(name: &'static str, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            name,
            release: Some(Box::new(release)),
        }
    }

    /// Subscription backed by a polling task; removing it aborts the task
    pub fn from_task(name: &'static str, handle: JoinHandle<()>) -> Self {
        Self::new(name, move || handle.abort())
    }

    /// Stop delivery. Calling again is a no-op.
    pub fn remove(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            log::debug!("[{}] subscription removed", self.name);
        }
    }

    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .field("active", &self.is_active())
            .finish()
    }
}

pub trait LocationSource: Send + Sync {
    fn request_permission(&self) -> PermissionStatus;

    /// Start delivering fixes as [`SensorEvent::Location`]
    fn watch(&self, options: WatchOptions, tx: Sender<SensorEvent>) -> Subscription;
}

pub trait MotionSource: Send + Sync {
    fn kind(&self) -> MotionKind;

    fn set_update_interval(&self, interval: Duration);

    /// Start delivering readings of this source's kind
    fn add_listener(&self, tx: Sender<SensorEvent>) -> Subscription;
}

/// The three sources a tracking session subscribes to
#[derive(Clone)]
pub struct SensorSet {
    pub location: Arc<dyn LocationSource>,
    pub accelerometer: Arc<dyn MotionSource>,
    pub gyroscope: Arc<dyn MotionSource>,
}

impl SensorSet {
    /// Termux:API sources with synthetic fallback
    pub fn device() -> Self {
        Self {
            location: Arc::new(DeviceLocation::new()),
            accelerometer: Arc::new(DeviceMotion::new(MotionKind::Accelerometer)),
            gyroscope: Arc::new(DeviceMotion::new(MotionKind::Gyroscope)),
        }
    }

    pub fn simulated() -> Self {
        Self {
            location: Arc::new(DeviceLocation::simulated()),
            accelerometer: Arc::new(DeviceMotion::simulated(MotionKind::Accelerometer)),
            gyroscope: Arc::new(DeviceMotion::simulated(MotionKind::Gyroscope)),
        }
    }
}
