// Great-circle distance for radius filtering and nearest-agent ranking

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean Earth radius used by the haversine formula
pub const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeoError {
    #[error("coordinates are missing")]
    MissingCoordinates,

    #[error("coordinate out of range: lat={lat}, lng={lng}")]
    InvalidCoordinate { lat: f64, lng: f64 },
}

/// A WGS84 latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Result<Self, GeoError> {
        let point = Self { lat, lng };
        point.check()?;
        Ok(point)
    }

    /// Build an optional point from two optional halves.
    /// Both absent is `None`; exactly one absent is an error.
    pub fn from_parts(lat: Option<f64>, lng: Option<f64>) -> Result<Option<Self>, GeoError> {
        match (lat, lng) {
            (Some(lat), Some(lng)) => Self::new(lat, lng).map(Some),
            (None, None) => Ok(None),
            _ => Err(GeoError::MissingCoordinates),
        }
    }

    pub fn check(&self) -> Result<(), GeoError> {
        let lat_ok = self.lat.is_finite() && (-90.0..=90.0).contains(&self.lat);
        let lng_ok = self.lng.is_finite() && (-180.0..=180.0).contains(&self.lng);
        if lat_ok && lng_ok {
            Ok(())
        } else {
            Err(GeoError::InvalidCoordinate {
                lat: self.lat,
                lng: self.lng,
            })
        }
    }

    /// Point displaced by the given kilometres north and east (small offsets only)
    pub fn offset_km(&self, north_km: f64, east_km: f64) -> GeoPoint {
        let km_per_degree = EARTH_RADIUS_KM.to_radians();
        let lat = self.lat + north_km / km_per_degree;
        let lng = self.lng + east_km / (km_per_degree * self.lat.to_radians().cos());
        GeoPoint { lat, lng }
    }
}

/// Haversine distance in kilometres
pub fn haversine_km(from: GeoPoint, to: GeoPoint) -> f64 {
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lng = (to.lng - from.lng).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + from.lat.to_radians().cos() * to.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Distance between raw coordinates. Any missing half is an error, never zero.
pub fn distance(
    lat1: Option<f64>,
    lng1: Option<f64>,
    lat2: Option<f64>,
    lng2: Option<f64>,
) -> Result<f64, GeoError> {
    let from = GeoPoint::from_parts(lat1, lng1)?;
    let to = GeoPoint::from_parts(lat2, lng2)?;
    distance_between(from, to)
}

pub fn distance_between(from: Option<GeoPoint>, to: Option<GeoPoint>) -> Result<f64, GeoError> {
    match (from, to) {
        (Some(from), Some(to)) => {
            from.check()?;
            to.check()?;
            Ok(haversine_km(from, to))
        }
        _ => Err(GeoError::MissingCoordinates),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dubai() -> GeoPoint {
        GeoPoint::new(25.2048, 55.2708).unwrap()
    }

    #[test]
    fn test_zero_distance_for_same_point() {
        assert_eq!(haversine_km(dubai(), dubai()), 0.0);
    }

    #[test]
    fn test_known_city_distance() {
        let london = GeoPoint::new(51.5074, -0.1278).unwrap();
        let paris = GeoPoint::new(48.8566, 2.3522).unwrap();
        let km = haversine_km(london, paris);
        assert!((km - 343.5).abs() < 1.0, "London-Paris was {km}");
        // symmetric
        assert!((haversine_km(paris, london) - km).abs() < 1e-9);
    }

    #[test]
    fn test_missing_coordinates_are_an_error() {
        assert_eq!(
            distance(Some(25.2), None, Some(25.2), Some(55.2)),
            Err(GeoError::MissingCoordinates)
        );
        assert_eq!(
            distance(None, None, Some(25.2), Some(55.2)),
            Err(GeoError::MissingCoordinates)
        );
        assert_eq!(
            distance_between(Some(dubai()), None),
            Err(GeoError::MissingCoordinates)
        );
    }

    #[test]
    fn test_out_of_range_coordinates_rejected() {
        assert!(matches!(
            GeoPoint::new(91.0, 0.0),
            Err(GeoError::InvalidCoordinate { .. })
        ));
        assert!(matches!(
            GeoPoint::new(0.0, f64::NAN),
            Err(GeoError::InvalidCoordinate { .. })
        ));
        let bogus = GeoPoint { lat: 0.0, lng: 200.0 };
        assert!(distance_between(Some(bogus), Some(dubai())).is_err());
    }

    #[test]
    fn test_offset_north_matches_haversine() {
        for km in [1.0, 4.0, 8.0] {
            let moved = dubai().offset_km(km, 0.0);
            assert!((haversine_km(dubai(), moved) - km).abs() < 1e-6);
        }
        let east = dubai().offset_km(0.0, 3.0);
        assert!((haversine_km(dubai(), east) - 3.0).abs() < 0.01);
    }
}
