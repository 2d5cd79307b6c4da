//! Great-circle helpers on a spherical Earth

use crate::types::Coordinate;

/// Mean Earth radius used for all distance computations (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance between two coordinates in meters
pub fn haversine_distance(from: &Coordinate, to: &Coordinate) -> f64 {
    let d_lat = (to.latitude - from.latitude).to_radians();
    let d_lon = (to.longitude - from.longitude).to_radians();
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

/// Initial bearing (forward azimuth) from `from` towards `to`,
/// degrees clockwise from true north, normalized to [0, 360)
pub fn initial_bearing(from: &Coordinate, to: &Coordinate) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let d_lon = (to.longitude - from.longitude).to_radians();

    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();
    y.atan2(x).to_degrees().rem_euclid(360.0)
}

/// Point `distance_m` meters due north of `origin`
pub fn offset_north(origin: &Coordinate, distance_m: f64) -> Coordinate {
    let d_lat = (distance_m / EARTH_RADIUS_M).to_degrees();
    Coordinate::new(origin.latitude + d_lat, origin.longitude)
}
