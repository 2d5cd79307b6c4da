use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use chrono::{SecondsFormat, Utc};

use crate::ingest::WriteCounts;
use crate::session::{SessionController, TrackingState};
use crate::types::{Coordinate, Vector3};

/// Point-in-time view of a tracking session, dumped for external dashboards
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LiveStatus {
    pub timestamp: String,
    pub state: TrackingState,
    pub elapsed_seconds: u64,
    pub consumed_seconds: u64,
    pub location: Option<Coordinate>,
    pub accelerometer: Option<Vector3>,
    pub gyroscope: Option<Vector3>,
    pub abrupt_movements: u32,
    // Write path
    pub writes_submitted: u64,
    pub writes_persisted: u64,
    pub writes_dropped: u64,
    pub writes_failed: u64,
    pub store_attached: bool,
}

impl LiveStatus {
    pub fn from_controller(controller: &SessionController) -> Self {
        let live = controller.live_readings();
        let WriteCounts {
            submitted,
            persisted,
            dropped,
            failed,
        } = controller.write_counts();

        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            state: controller.state(),
            elapsed_seconds: controller.elapsed_secs(),
            consumed_seconds: controller.consumed_secs(),
            location: live.location,
            accelerometer: live.accelerometer,
            gyroscope: live.gyroscope,
            abrupt_movements: live.abrupt_movements,
            writes_submitted: submitted,
            writes_persisted: persisted,
            writes_dropped: dropped,
            writes_failed: failed,
            store_attached: controller.store().is_some(),
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
