//! Polling sources for the host device.
//!
//! Reads come from Termux:API (`termux-location`, `termux-sensor`). When the
//! tools are missing or return garbage the source switches to synthetic data
//! so the tracker can run on a desktop.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio::time::interval;

use super::{
    LocationSource, MotionKind, MotionSource, PermissionStatus, SensorEvent, Subscription,
    WatchOptions,
};
use crate::geodesy::{haversine_distance, offset_north};
use crate::types::{Coordinate, Vector3};

const SIM_ORIGIN: Coordinate = Coordinate {
    latitude: 37.7749,
    longitude: -122.4194,
};
/// Synthetic walking pace (m/s)
const SIM_PACE_MPS: f64 = 1.4;

#[derive(Debug, Deserialize)]
struct TermuxFix {
    latitude: f64,
    longitude: f64,
}

fn parse_termux_fix(output: &str) -> Option<Coordinate> {
    let fix: TermuxFix = serde_json::from_str(output.trim()).ok()?;
    if fix.latitude.is_finite() && fix.longitude.is_finite() {
        Some(Coordinate::new(fix.latitude, fix.longitude))
    } else {
        None
    }
}

/// Pull `x=.., y=.., z=..` out of a termux-sensor event line
fn parse_termux_triple(output: &str) -> Option<Vector3> {
    let mut axes = [None; 3];
    for part in output.split(',') {
        let part = part.trim();
        let Some((name, value)) = part.split_once('=') else {
            continue;
        };
        let slot = match name.rsplit(' ').next() {
            Some("x") => 0,
            Some("y") => 1,
            Some("z") => 2,
            _ => continue,
        };
        axes[slot] = Some(value.trim().parse::<f64>().ok()?);
    }
    Some(Vector3::new(axes[0]?, axes[1]?, axes[2]?))
}

async fn termux_output(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().await.ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Returns false once the receiver is gone
fn deliver(tx: &Sender<SensorEvent>, event: SensorEvent, name: &str, count: &mut u64) -> bool {
    match tx.try_send(event) {
        Ok(()) => {
            *count += 1;
            if *count % 100 == 0 {
                log::debug!("[{}] {} readings", name, count);
            }
            true
        }
        Err(TrySendError::Full(_)) => {
            log::warn!("[{}] event channel full, dropping reading", name);
            true
        }
        Err(TrySendError::Closed(_)) => {
            log::info!("[{}] channel closed after {} readings", name, count);
            false
        }
    }
}

/// GPS via `termux-location`, falling back to a simulated walk north
pub struct DeviceLocation {
    simulate: Arc<AtomicBool>,
}

impl DeviceLocation {
    pub fn new() -> Self {
        Self {
            simulate: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Skip the device probe and always walk
    pub fn simulated() -> Self {
        Self {
            simulate: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl Default for DeviceLocation {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationSource for DeviceLocation {
    fn request_permission(&self) -> PermissionStatus {
        PermissionStatus::Granted
    }

    fn watch(&self, options: WatchOptions, tx: Sender<SensorEvent>) -> Subscription {
        let simulate = Arc::clone(&self.simulate);
        let handle = tokio::spawn(async move {
            let mut ticks = interval(options.interval.max(Duration::from_millis(1)));
            let mut last_reported: Option<Coordinate> = None;
            let mut step = 0u64;
            let mut count = 0u64;

            loop {
                ticks.tick().await;

                let mut fix = None;
                if !simulate.load(Ordering::Relaxed) {
                    fix = termux_output("termux-location", &["-p", "gps", "-r", "once"])
                        .await
                        .as_deref()
                        .and_then(parse_termux_fix);
                    if fix.is_none() {
                        log::warn!("[location] termux-location unavailable, simulating a walk");
                        simulate.store(true, Ordering::Relaxed);
                    }
                }
                let fix = fix.unwrap_or_else(|| {
                    step += 1;
                    let metres = step as f64 * SIM_PACE_MPS * options.interval.as_secs_f64();
                    offset_north(&SIM_ORIGIN, metres)
                });

                if let Some(last) = last_reported {
                    if haversine_distance(&last, &fix) < options.min_distance_m {
                        continue;
                    }
                }
                last_reported = Some(fix);

                if !deliver(&tx, SensorEvent::Location(fix), "location", &mut count) {
                    break;
                }
            }
        });
        Subscription::from_task("location", handle)
    }
}

/// Accelerometer or gyroscope via `termux-sensor`, falling back to sinusoids
pub struct DeviceMotion {
    kind: MotionKind,
    interval_ms: Arc<AtomicU64>,
    simulate: Arc<AtomicBool>,
}

impl DeviceMotion {
    pub fn new(kind: MotionKind) -> Self {
        Self {
            kind,
            interval_ms: Arc::new(AtomicU64::new(1000)),
            simulate: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn simulated(kind: MotionKind) -> Self {
        let motion = Self::new(kind);
        motion.simulate.store(true, Ordering::Relaxed);
        motion
    }
}

fn mock_reading(kind: MotionKind, step: u64) -> Vector3 {
    let t = step as f64 * 0.02;
    match kind {
        MotionKind::Accelerometer => Vector3::new(
            (t * 2.0 * PI).sin() * 0.5,
            (t * 2.0 * PI).cos() * 0.3,
            9.81 + (t * PI).sin() * 0.1,
        ),
        MotionKind::Gyroscope => Vector3::new(
            (t * 0.5).sin() * 0.05,
            (t * 0.3).cos() * 0.03,
            t.sin() * 0.1,
        ),
    }
}

impl MotionSource for DeviceMotion {
    fn kind(&self) -> MotionKind {
        self.kind
    }

    fn set_update_interval(&self, interval: Duration) {
        self.interval_ms
            .store(interval.as_millis().max(1) as u64, Ordering::Relaxed);
    }

    fn add_listener(&self, tx: Sender<SensorEvent>) -> Subscription {
        let kind = self.kind;
        let period = Duration::from_millis(self.interval_ms.load(Ordering::Relaxed).max(1));
        let simulate = Arc::clone(&self.simulate);

        let handle = tokio::spawn(async move {
            let mut ticks = interval(period);
            let mut step = 0u64;
            let mut count = 0u64;

            loop {
                ticks.tick().await;

                let mut reading = None;
                if !simulate.load(Ordering::Relaxed) {
                    reading = termux_output("termux-sensor", &["-n", "1", "-s", kind.as_str()])
                        .await
                        .as_deref()
                        .and_then(parse_termux_triple);
                    if reading.is_none() {
                        log::warn!("[{}] termux-sensor unavailable, using mock data", kind.as_str());
                        simulate.store(true, Ordering::Relaxed);
                    }
                }
                let reading = reading.unwrap_or_else(|| {
                    step += 1;
                    mock_reading(kind, step)
                });

                if !deliver(&tx, kind.event(reading), kind.as_str(), &mut count) {
                    break;
                }
            }
        });
        Subscription::from_task(kind.as_str(), handle)
    }
}
