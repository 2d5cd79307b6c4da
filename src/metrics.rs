//! Batch metrics derivation
//!
//! Replays the persisted snapshot log into session statistics. The engine is
//! a pure function of the log contents: it always recomputes from scratch and
//! trusts storage order as session order.

use std::collections::HashSet;

use chrono::{DateTime, FixedOffset};

use crate::config::MetricsConfig;
use crate::geodesy::{haversine_distance, initial_bearing};
use crate::incident::AbruptMovementDetector;
use crate::store::LogEntry;
use crate::types::{Coordinate, LoggedRecord, Metrics, RouteSegment, Vector3};

/// Coordinate record with a usable timestamp
#[derive(Clone, Debug)]
struct TrackPoint {
    coord: Coordinate,
    at: DateTime<FixedOffset>,
}

/// Running totals over accepted segments
#[derive(Debug, Default)]
pub struct SegmentAccumulator {
    calories_per_km: f64,
    total_distance_m: f64,
    elapsed_secs: f64,
    max_speed_kmh: f64,
    calories_kcal: f64,
    distance_history_km: Vec<f64>,
}

impl SegmentAccumulator {
    pub fn new(calories_per_km: f64) -> Self {
        Self {
            calories_per_km,
            ..Self::default()
        }
    }

    /// Fold in one segment that passed the speed filter.
    ///
    /// Calories are charged on the running total after this segment, so the
    /// sum compounds with segment count.
    pub fn accept(&mut self, distance_m: f64, elapsed_secs: f64, speed_kmh: f64) {
        self.max_speed_kmh = self.max_speed_kmh.max(speed_kmh);
        self.total_distance_m += distance_m;
        self.elapsed_secs += elapsed_secs.max(0.0);

        let total_km = self.total_distance_m / 1000.0;
        self.distance_history_km.push(total_km);
        self.calories_kcal += self.calories_per_km * total_km;
    }

    /// Write the accumulated totals into `metrics`
    fn finish(self, metrics: &mut Metrics) {
        let session_time_hours = self.elapsed_secs / 3600.0;
        let total_km = self.total_distance_m / 1000.0;

        metrics.total_distance_meters = self.total_distance_m;
        metrics.max_speed_kmh = self.max_speed_kmh;
        metrics.session_time_hours = session_time_hours;
        metrics.average_speed_kmh = if session_time_hours > 0.0 {
            total_km / session_time_hours
        } else {
            0.0
        };
        metrics.calories_kcal = self.calories_kcal;
        metrics.distance_history_km = self.distance_history_km;
    }
}

/// Derives [`Metrics`] from log records
#[derive(Clone, Debug, Default)]
pub struct MetricsEngine {
    config: MetricsConfig,
}

impl MetricsEngine {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Recompute metrics over every record, in the given order
    pub fn compute(&self, entries: &[LogEntry]) -> Metrics {
        let mut track = Vec::new();
        let mut accelerations = Vec::new();

        for entry in entries {
            let record: LoggedRecord = match serde_json::from_value(entry.value.clone()) {
                Ok(record) => record,
                Err(e) => {
                    log::debug!("Skipping malformed record {}: {}", entry.key, e);
                    continue;
                }
            };

            if let Some(accel) = record.accelerometer {
                accelerations.push(accel);
            }
            if let Some(point) = track_point(&entry.key, &record) {
                track.push(point);
            }
        }

        let mut metrics = Metrics {
            abrupt_movements: self.count_abrupt(&accelerations),
            heatmap: heatmap(&track),
            ..Metrics::default()
        };

        if track.len() > 1 {
            self.replay_segments(&track, &mut metrics);
        }

        log::debug!(
            "Metrics over {} records: {} track points, {:.1} m accepted, {} routes",
            entries.len(),
            track.len(),
            metrics.total_distance_meters,
            metrics.routes.len()
        );
        metrics
    }

    fn replay_segments(&self, track: &[TrackPoint], metrics: &mut Metrics) {
        let mut totals = SegmentAccumulator::new(self.config.calories_per_km);

        for pair in track.windows(2) {
            let (prev, current) = (&pair[0], &pair[1]);

            let distance = haversine_distance(&prev.coord, &current.coord);
            if distance == 0.0 {
                continue;
            }

            let elapsed_secs = (current.at - prev.at).num_milliseconds() as f64 / 1000.0;
            let speed_kmh = if elapsed_secs > 0.0 {
                distance / elapsed_secs * 3.6
            } else {
                0.0
            };
            let accepted = (0.0..=self.config.speed_threshold_kmh).contains(&speed_kmh);

            metrics.routes.push(RouteSegment {
                coords: [prev.coord, current.coord],
                speed_kmh,
                bearing_deg: initial_bearing(&prev.coord, &current.coord),
                accepted,
            });

            if accepted {
                totals.accept(distance, elapsed_secs, speed_kmh);
            } else {
                log::debug!(
                    "Rejecting segment at {} as GPS noise ({:.1} km/h)",
                    current.at,
                    speed_kmh
                );
            }
        }

        totals.finish(metrics);
    }

    fn count_abrupt(&self, accelerations: &[Vector3]) -> u32 {
        let mut detector = AbruptMovementDetector::with_threshold(self.config.abrupt_delta_threshold);
        for accel in accelerations {
            detector.observe(*accel);
        }
        detector.count()
    }
}

fn track_point(key: &str, record: &LoggedRecord) -> Option<TrackPoint> {
    let (latitude, longitude) = (record.latitude?, record.longitude?);
    let timestamp = record.timestamp.as_deref()?;

    match DateTime::parse_from_rfc3339(timestamp) {
        Ok(at) => Some(TrackPoint {
            coord: Coordinate::new(latitude, longitude),
            at,
        }),
        Err(e) => {
            log::debug!("Record {} has unparseable timestamp {:?}: {}", key, timestamp, e);
            None
        }
    }
}

/// Visited coordinates, exact duplicates removed, first-seen order kept
fn heatmap(track: &[TrackPoint]) -> Vec<Coordinate> {
    // Adding 0.0 folds -0.0 into 0.0 so both hash alike
    let mut seen = HashSet::with_capacity(track.len());
    track
        .iter()
        .map(|p| p.coord)
        .filter(|c| seen.insert(((c.latitude + 0.0).to_bits(), (c.longitude + 0.0).to_bits())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::offset_north;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::{json, Value};

    fn ts(offset_secs: i64) -> String {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        (base + Duration::seconds(offset_secs))
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }

    fn record(coord: Coordinate, at: i64) -> LogEntry {
        let timestamp = ts(at);
        LogEntry {
            key: format!("sensor_{}", timestamp),
            value: json!({
                "timestamp": timestamp,
                "latitude": coord.latitude,
                "longitude": coord.longitude,
                "accelerometer": {"x": 0.0, "y": 0.0, "z": 9.8},
                "gyroscope": {"x": 0.0, "y": 0.0, "z": 0.0},
            }),
        }
    }

    fn raw(key: &str, value: Value) -> LogEntry {
        LogEntry {
            key: key.to_string(),
            value,
        }
    }

    /// `count` points heading north, `spacing_m` apart, `interval_secs` apart in time
    fn walk(count: usize, spacing_m: f64, interval_secs: i64) -> Vec<LogEntry> {
        let mut coord = Coordinate::new(40.0, -3.7);
        let mut entries = Vec::new();
        for i in 0..count {
            entries.push(record(coord, i as i64 * interval_secs));
            coord = offset_north(&coord, spacing_m);
        }
        entries
    }

    #[test]
    fn test_empty_log_is_zeroed() {
        let metrics = MetricsEngine::default().compute(&[]);
        assert_eq!(metrics, Metrics::default());
    }

    #[test]
    fn test_single_point_has_no_segments() {
        let metrics = MetricsEngine::default().compute(&walk(1, 50.0, 10));
        assert_eq!(metrics.total_distance_meters, 0.0);
        assert!(metrics.routes.is_empty());
        assert_eq!(metrics.heatmap.len(), 1);
    }

    #[test]
    fn test_walking_pace_accumulates() {
        // 50 m every 10 s = 18 km/h
        let metrics = MetricsEngine::default().compute(&walk(4, 50.0, 10));

        assert_abs_diff_eq!(metrics.total_distance_meters, 150.0, epsilon = 1e-6);
        assert_eq!(metrics.distance_history_km.len(), 3);
        assert!(metrics
            .distance_history_km
            .windows(2)
            .all(|w| w[0] <= w[1]));
        assert_abs_diff_eq!(metrics.max_speed_kmh, 18.0, epsilon = 1e-6);
        assert_abs_diff_eq!(metrics.session_time_hours, 30.0 / 3600.0, epsilon = 1e-12);
        assert_abs_diff_eq!(metrics.average_speed_kmh, 18.0, epsilon = 1e-6);
        assert_eq!(metrics.routes.len(), 3);
        assert!(metrics.routes.iter().all(|r| r.accepted));
    }

    #[test]
    fn test_fast_segments_only_reach_routes() {
        // 100 m every 10 s = 36 km/h, above the 30 km/h default
        let metrics = MetricsEngine::default().compute(&walk(4, 100.0, 10));

        assert_eq!(metrics.total_distance_meters, 0.0);
        assert!(metrics.distance_history_km.is_empty());
        assert_eq!(metrics.max_speed_kmh, 0.0);
        assert_eq!(metrics.calories_kcal, 0.0);
        assert_eq!(metrics.average_speed_kmh, 0.0);

        assert_eq!(metrics.routes.len(), 3);
        for route in &metrics.routes {
            assert!(!route.accepted);
            assert_abs_diff_eq!(route.speed_kmh, 36.0, epsilon = 1e-6);
            assert_abs_diff_eq!(route.bearing_deg, 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_custom_threshold_accepts_fast_segments() {
        let engine = MetricsEngine::new(MetricsConfig {
            speed_threshold_kmh: 40.0,
            ..MetricsConfig::default()
        });
        let metrics = engine.compute(&walk(4, 100.0, 10));
        assert_abs_diff_eq!(metrics.total_distance_meters, 300.0, epsilon = 1e-6);
    }

    #[test]
    fn test_speed_threshold_is_inclusive() {
        let entries = walk(2, 100.0, 10);
        let speed = MetricsEngine::default().compute(&entries).routes[0].speed_kmh;
        assert!(speed > 0.0);

        let at_limit = MetricsEngine::new(MetricsConfig {
            speed_threshold_kmh: speed,
            ..MetricsConfig::default()
        })
        .compute(&entries);
        assert!(at_limit.routes[0].accepted);
        assert_eq!(at_limit.distance_history_km.len(), 1);
        assert_eq!(at_limit.max_speed_kmh, speed);

        // One ULP below the segment speed
        let just_below = MetricsEngine::new(MetricsConfig {
            speed_threshold_kmh: f64::from_bits(speed.to_bits() - 1),
            ..MetricsConfig::default()
        })
        .compute(&entries);
        assert!(!just_below.routes[0].accepted);
        assert_eq!(just_below.total_distance_meters, 0.0);
        assert!(just_below.distance_history_km.is_empty());
    }

    #[test]
    fn test_calories_compound_on_running_total() {
        let mut totals = SegmentAccumulator::new(0.06);
        totals.accept(100.0, 60.0, 6.0);
        totals.accept(150.0, 60.0, 9.0);

        let mut metrics = Metrics::default();
        totals.finish(&mut metrics);

        assert_relative_eq!(metrics.calories_kcal, 0.021, epsilon = 1e-12);
        assert_eq!(metrics.distance_history_km, vec![0.1, 0.25]);
        assert_eq!(metrics.max_speed_kmh, 9.0);
    }

    #[test]
    fn test_calories_through_engine() {
        // Two 50 m segments: 0.06 * 0.05 + 0.06 * 0.10
        let metrics = MetricsEngine::default().compute(&walk(3, 50.0, 10));
        assert_abs_diff_eq!(metrics.calories_kcal, 0.009, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_distance_pairs_are_skipped() {
        let here = Coordinate::new(1.0, 1.0);
        let entries = vec![record(here, 0), record(here, 10), record(here, 20)];
        let metrics = MetricsEngine::default().compute(&entries);

        assert!(metrics.routes.is_empty());
        assert_eq!(metrics.session_time_hours, 0.0);
        assert_eq!(metrics.heatmap, vec![here]);
    }

    #[test]
    fn test_same_instant_counts_as_zero_speed() {
        let start = Coordinate::new(0.0, 0.0);
        let entries = vec![record(start, 0), record(offset_north(&start, 20.0), 0)];
        let metrics = MetricsEngine::default().compute(&entries);

        assert_eq!(metrics.routes.len(), 1);
        assert_eq!(metrics.routes[0].speed_kmh, 0.0);
        assert!(metrics.routes[0].accepted);
        assert_abs_diff_eq!(metrics.total_distance_meters, 20.0, epsilon = 1e-6);
        // No elapsed time, so no average
        assert_eq!(metrics.average_speed_kmh, 0.0);
    }

    #[test]
    fn test_heatmap_dedup_keeps_first_seen_order() {
        let points = [(1.0, 1.0), (2.0, 2.0), (1.0, 1.0), (3.0, 3.0)];
        let entries: Vec<_> = points
            .iter()
            .enumerate()
            .map(|(i, (lat, lon))| record(Coordinate::new(*lat, *lon), i as i64 * 3600))
            .collect();

        let metrics = MetricsEngine::default().compute(&entries);
        assert_eq!(
            metrics.heatmap,
            vec![
                Coordinate::new(1.0, 1.0),
                Coordinate::new(2.0, 2.0),
                Coordinate::new(3.0, 3.0)
            ]
        );
    }

    #[test]
    fn test_abrupt_movements_from_accelerometer_rows() {
        let entries = vec![
            raw("sensor_1", json!({"timestamp": ts(0), "accelerometer": {"x": 0.0, "y": 0.0, "z": 0.0}})),
            raw("sensor_2", json!({"timestamp": ts(1), "accelerometer": {"x": 0.0, "y": 0.0, "z": 2.0}})),
            raw("sensor_3", json!({"timestamp": ts(2), "accelerometer": {"x": 0.0, "y": 0.0, "z": 2.1}})),
        ];

        let metrics = MetricsEngine::default().compute(&entries);
        assert_eq!(metrics.abrupt_movements, 1);
        assert!(metrics.heatmap.is_empty());
    }

    #[test]
    fn test_malformed_rows_are_excluded() {
        let mut entries = walk(2, 50.0, 10);
        entries.insert(1, raw("sensor_bad_ts", json!({"timestamp": "yesterday", "latitude": 5.0, "longitude": 5.0})));
        entries.insert(1, raw("sensor_null", json!({"timestamp": ts(5), "latitude": null, "longitude": 5.0})));
        entries.insert(1, raw("sensor_text", json!({"latitude": "north"})));
        entries.insert(1, raw("note", json!("not an object")));

        let metrics = MetricsEngine::default().compute(&entries);
        assert_eq!(metrics.routes.len(), 1);
        assert_abs_diff_eq!(metrics.total_distance_meters, 50.0, epsilon = 1e-6);
        assert_eq!(metrics.heatmap.len(), 2);
        assert!(!metrics.heatmap.contains(&Coordinate::new(5.0, 5.0)));
    }

    #[test]
    fn test_store_order_is_trusted() {
        // Second record is earlier in time, giving a negative interval
        let start = Coordinate::new(0.0, 0.0);
        let entries = vec![record(start, 10), record(offset_north(&start, 10.0), 0)];
        let metrics = MetricsEngine::default().compute(&entries);

        assert_eq!(metrics.routes[0].speed_kmh, 0.0);
        assert_eq!(metrics.session_time_hours, 0.0);
    }
}
