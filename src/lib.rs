//! Activity tracker core: sensor capture into a persistent snapshot log and
//! metrics derived from it (distance, speed, calories, abrupt movements,
//! heatmap and route segments).

pub mod config;
pub mod error;
pub mod filters;
pub mod geodesy;
pub mod incident;
pub mod ingest;
pub mod live_status;
pub mod metrics;
pub mod sensors;
pub mod session;
pub mod store;
pub mod timer;
pub mod types;

pub use config::{MetricsConfig, SmoothingConfig, TrackerConfig};
pub use error::{StoreError, TrackerError, TrackerResult};
pub use filters::ScalarKalman;
pub use metrics::MetricsEngine;
pub use session::{SessionController, TrackingState};
pub use store::{JsonlLog, LogEntry, LogStore, MemoryLog};
pub use types::{Coordinate, Metrics, RouteSegment, SensorSnapshot, Vector3};
