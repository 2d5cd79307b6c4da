use serde::{Deserialize, Serialize};

/// Three-axis motion reading (m/s² for the accelerometer, rad/s for the gyroscope)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Sum of absolute per-axis differences to `other`
    pub fn abs_delta_sum(&self, other: &Vector3) -> f64 {
        (self.x - other.x).abs() + (self.y - other.y).abs() + (self.z - other.z).abs()
    }
}

/// Geographic position in degrees
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Complete merged observation as persisted to the log
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub timestamp: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accelerometer: Vector3,
    pub gyroscope: Vector3,
}

impl SensorSnapshot {
    /// Log key for this snapshot
    pub fn log_key(&self) -> String {
        format!("{}{}", SENSOR_KEY_PREFIX, self.timestamp)
    }
}

pub const SENSOR_KEY_PREFIX: &str = "sensor_";

/// Lenient view of a logged record. Every field is optional so that
/// malformed or partial rows can still be inspected.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct LoggedRecord {
    pub timestamp: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accelerometer: Option<Vector3>,
    pub gyroscope: Option<Vector3>,
}

/// One two-point route segment annotated for speed/direction rendering
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSegment {
    pub coords: [Coordinate; 2],
    pub speed_kmh: f64,
    /// Initial bearing from start to end, degrees clockwise from north in [0, 360)
    pub bearing_deg: f64,
    /// Whether the segment passed the speed outlier filter
    pub accepted: bool,
}

/// Session statistics derived from the full log
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub total_distance_meters: f64,
    pub average_speed_kmh: f64,
    pub max_speed_kmh: f64,
    pub session_time_hours: f64,
    pub calories_kcal: f64,
    pub abrupt_movements: u32,
    pub heatmap: Vec<Coordinate>,
    pub routes: Vec<RouteSegment>,
    pub distance_history_km: Vec<f64>,
}

impl Metrics {
    pub fn total_distance_km(&self) -> f64 {
        self.total_distance_meters / 1000.0
    }
}
