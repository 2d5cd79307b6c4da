//! Tracker configuration
//!
//! Every field has a default, so a config file only needs the values it
//! changes. CLI flags are applied on top by the binary.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TrackerError;
use crate::incident::ABRUPT_DELTA_THRESHOLD;

/// Thresholds used by the metrics engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Segments faster than this are treated as GPS noise (km/h)
    pub speed_threshold_kmh: f64,
    /// Summed accelerometer axis delta that counts as an abrupt movement
    pub abrupt_delta_threshold: f64,
    /// kcal added per accepted segment, per cumulative km
    pub calories_per_km: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            speed_threshold_kmh: 30.0,
            abrupt_delta_threshold: ABRUPT_DELTA_THRESHOLD,
            calories_per_km: 0.06,
        }
    }
}

/// Parameters for the optional per-axis coordinate smoother
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    pub process_noise: f64,
    pub measurement_noise: f64,
    pub estimated_error: f64,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            process_noise: 1e-6,
            measurement_noise: 1e-4,
            estimated_error: 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Location poll interval (ms)
    pub location_interval_ms: u64,
    /// Minimum displacement between reported fixes (m)
    pub min_distance_m: f64,
    /// Accelerometer and gyroscope update interval (ms)
    pub motion_interval_ms: u64,
    /// Capacity of the sensor event channel
    pub event_buffer: usize,
    /// Capacity of the pending-write queue
    pub write_queue_capacity: usize,
    /// Smooth coordinates before they enter the snapshot
    pub smoothing: Option<SmoothingConfig>,
    pub metrics: MetricsConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            location_interval_ms: 1000,
            min_distance_m: 1.0,
            motion_interval_ms: 1000,
            event_buffer: 256,
            write_queue_capacity: 1024,
            smoothing: None,
            metrics: MetricsConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Load from a JSON file and validate
    pub fn from_file(path: &Path) -> Result<Self, TrackerError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            TrackerError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: TrackerConfig = serde_json::from_str(&text).map_err(|e| {
            TrackerError::InvalidConfig(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.location_interval_ms == 0 || self.motion_interval_ms == 0 {
            return Err(TrackerError::InvalidConfig(
                "sensor intervals must be non-zero".to_string(),
            ));
        }
        if self.event_buffer == 0 || self.write_queue_capacity == 0 {
            return Err(TrackerError::InvalidConfig(
                "channel capacities must be non-zero".to_string(),
            ));
        }
        if !self.min_distance_m.is_finite() || self.min_distance_m < 0.0 {
            return Err(TrackerError::InvalidConfig(format!(
                "min_distance_m must be a non-negative number, got {}",
                self.min_distance_m
            )));
        }

        let metrics = &self.metrics;
        for (name, value) in [
            ("speed_threshold_kmh", metrics.speed_threshold_kmh),
            ("abrupt_delta_threshold", metrics.abrupt_delta_threshold),
            ("calories_per_km", metrics.calories_per_km),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(TrackerError::InvalidConfig(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }

        if let Some(smoothing) = &self.smoothing {
            for (name, value) in [
                ("process_noise", smoothing.process_noise),
                ("measurement_noise", smoothing.measurement_noise),
                ("estimated_error", smoothing.estimated_error),
            ] {
                if !value.is_finite() || value <= 0.0 {
                    return Err(TrackerError::InvalidConfig(format!(
                        "smoothing.{} must be a positive number, got {}",
                        name, value
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn location_interval(&self) -> Duration {
        Duration::from_millis(self.location_interval_ms)
    }

    pub fn motion_interval(&self) -> Duration {
        Duration::from_millis(self.motion_interval_ms)
    }
}
