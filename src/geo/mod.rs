use serde::{Deserialize, Serialize};

use crate::models::courier::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Padding applied around the fitted points and the smallest span a region may have.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionPadding {
    pub factor: f64,
    pub min_span: f64,
}

/// Customer/admin view of a single order.
pub const ORDER_VIEW: RegionPadding = RegionPadding {
    factor: 2.2,
    min_span: 0.01,
};

/// Admin view of the whole fleet.
pub const FLEET_VIEW: RegionPadding = RegionPadding {
    factor: 1.5,
    min_span: 0.05,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Region {
    pub center_lat: f64,
    pub center_lng: f64,
    pub lat_span: f64,
    pub lng_span: f64,
}

impl Region {
    pub fn contains(&self, point: &GeoPoint) -> bool {
        (point.lat - self.center_lat).abs() <= self.lat_span / 2.0
            && (point.lng - self.center_lng).abs() <= self.lng_span / 2.0
    }
}

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    // Clamped so rounding near antipodes cannot push sqrt(1 - h) into NaN.
    let haversine = (sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng).clamp(0.0, 1.0);
    let central_angle = 2.0 * haversine.sqrt().atan2((1.0 - haversine).sqrt());

    EARTH_RADIUS_KM * central_angle
}

/// Fits a map region around `points`. Returns `None` when there is nothing to show.
pub fn bounding_region(points: &[GeoPoint], padding: RegionPadding) -> Option<Region> {
    let first = points.first()?;

    let (mut min_lat, mut max_lat) = (first.lat, first.lat);
    let (mut min_lng, mut max_lng) = (first.lng, first.lng);
    for point in &points[1..] {
        min_lat = min_lat.min(point.lat);
        max_lat = max_lat.max(point.lat);
        min_lng = min_lng.min(point.lng);
        max_lng = max_lng.max(point.lng);
    }

    Some(Region {
        center_lat: (min_lat + max_lat) / 2.0,
        center_lng: (min_lng + max_lng) / 2.0,
        lat_span: ((max_lat - min_lat) * padding.factor).max(padding.min_span),
        lng_span: ((max_lng - min_lng) * padding.factor).max(padding.min_span),
    })
}

/// Linear travel-time estimate. Unknown (`None`) for non-positive speeds.
pub fn eta_minutes(distance_km: f64, speed_kmh: f64) -> Option<f64> {
    if !speed_kmh.is_finite() || speed_kmh <= 0.0 || !distance_km.is_finite() {
        return None;
    }

    Some(distance_km.max(0.0) / speed_kmh * 60.0)
}

pub fn within_radius(origin: &GeoPoint, point: &GeoPoint, radius_km: f64) -> bool {
    haversine_km(origin, point) <= radius_km
}
