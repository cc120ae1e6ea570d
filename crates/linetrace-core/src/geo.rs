//! Coordinate projection
//!
//! Two projections turn GPS degrees into metres with x = east and y = north:
//!
//! - [`LocalProjection`]: equirectangular about a vehicle's own mean position. Fast,
//!   single precision, used for trajectories and racing lines.
//! - [`EnuFrame`]: WGS84 geodetic to ECEF to local East-North-Up about a fixed origin,
//!   shared by every vehicle on the canonical path.
//!
//! Coordinates from the two frames are never mixed.

use nalgebra::{Matrix3, Vector3};

/// Mean Earth radius used by the equirectangular projection
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// WGS84 semi-major axis
pub const WGS84_A: f64 = 6_378_137.0;

/// WGS84 first eccentricity squared
pub const WGS84_E2: f64 = 6.694_379_990_14e-3;

/// Equirectangular projection about a reference point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalProjection {
    /// Reference latitude in degrees
    pub lat0: f64,
    /// Reference longitude in degrees
    pub lon0: f64,
}

impl LocalProjection {
    /// Projection centred on the mean of the given coordinates
    pub fn from_mean(lat: &[f64], lon: &[f64]) -> Option<Self> {
        if lat.is_empty() || lon.is_empty() {
            return None;
        }
        Some(Self {
            lat0: lat.iter().sum::<f64>() / lat.len() as f64,
            lon0: lon.iter().sum::<f64>() / lon.len() as f64,
        })
    }

    /// Project one coordinate
    pub fn project(&self, lat: f64, lon: f64) -> (f64, f64) {
        let deg = std::f32::consts::PI / 180.0;
        let cos_lat0 = (self.lat0 as f32 * deg).cos();
        let r = EARTH_RADIUS_M as f32;
        let x = (lon - self.lon0) as f32 * deg * cos_lat0 * r;
        let y = (lat - self.lat0) as f32 * deg * r;
        (x as f64, y as f64)
    }

    /// Project paired coordinate columns
    pub fn project_all(&self, lat: &[f64], lon: &[f64]) -> (Vec<f64>, Vec<f64>) {
        lat.iter()
            .zip(lon)
            .map(|(&la, &lo)| self.project(la, lo))
            .unzip()
    }
}

/// Geodetic coordinate (degrees, metres) to Earth-centred Earth-fixed metres
pub fn geodetic_to_ecef(lat_deg: f64, lon_deg: f64, h: f64) -> Vector3<f64> {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let n = WGS84_A / (1.0 - WGS84_E2 * lat.sin().powi(2)).sqrt();
    Vector3::new(
        (n + h) * lat.cos() * lon.cos(),
        (n + h) * lat.cos() * lon.sin(),
        (n * (1.0 - WGS84_E2) + h) * lat.sin(),
    )
}

/// Local East-North-Up frame about a fixed origin
#[derive(Debug, Clone, PartialEq)]
pub struct EnuFrame {
    origin_lat: f64,
    origin_lon: f64,
    origin_ecef: Vector3<f64>,
    rotation: Matrix3<f64>,
}

impl EnuFrame {
    /// Create a frame with its origin at the given latitude/longitude
    pub fn new(lat0_deg: f64, lon0_deg: f64) -> Self {
        let lat0 = lat0_deg.to_radians();
        let lon0 = lon0_deg.to_radians();
        let (sl, cl) = lat0.sin_cos();
        let (so, co) = lon0.sin_cos();
        #[rustfmt::skip]
        let rotation = Matrix3::new(
            -so,       co,      0.0,
            -sl * co, -sl * so, cl,
             cl * co,  cl * so, sl,
        );
        Self {
            origin_lat: lat0_deg,
            origin_lon: lon0_deg,
            origin_ecef: geodetic_to_ecef(lat0_deg, lon0_deg, 0.0),
            rotation,
        }
    }

    /// Origin latitude and longitude in degrees
    pub fn origin(&self) -> (f64, f64) {
        (self.origin_lat, self.origin_lon)
    }

    /// East and north offsets in metres from the origin
    pub fn project(&self, lat: f64, lon: f64) -> (f64, f64) {
        let d = geodetic_to_ecef(lat, lon, 0.0) - self.origin_ecef;
        let enu = self.rotation * d;
        (enu.x, enu.y)
    }

    /// Project paired coordinate columns
    pub fn project_all(&self, lat: &[f64], lon: &[f64]) -> (Vec<f64>, Vec<f64>) {
        lat.iter()
            .zip(lon)
            .map(|(&la, &lo)| self.project(la, lo))
            .unzip()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_projection_origin_is_zero() {
        let proj = LocalProjection::from_mean(&[33.5, 33.6], &[-86.6, -86.4]).unwrap();
        let (x, y) = proj.project(33.55, -86.5);
        assert!(x.abs() < 1e-3 && y.abs() < 1e-3);
    }

    #[test]
    fn test_local_projection_axes() {
        let proj = LocalProjection { lat0: 0.0, lon0: 0.0 };
        let (x, y) = proj.project(0.001, 0.0);
        assert!(x.abs() < 1e-6);
        assert!((y - 111.19).abs() < 0.05, "north offset {}", y);
        let (x, _) = proj.project(0.0, 0.001);
        assert!(x > 111.0);
    }

    #[test]
    fn test_enu_matches_local_for_short_offsets() {
        let frame = EnuFrame::new(33.53, -86.62);
        let local = LocalProjection { lat0: 33.53, lon0: -86.62 };
        let (ex, ey) = frame.project(33.531, -86.619);
        let (lx, ly) = local.project(33.531, -86.619);
        // 100 m offsets agree to well under a metre
        assert!((ex - lx).abs() < 0.5, "east {} vs {}", ex, lx);
        assert!((ey - ly).abs() < 0.5, "north {} vs {}", ey, ly);
        assert!(ex > 0.0 && ey > 0.0);
    }

    #[test]
    fn test_ecef_equator() {
        let p = geodetic_to_ecef(0.0, 0.0, 0.0);
        assert!((p.x - WGS84_A).abs() < 1e-6);
        assert!(p.y.abs() < 1e-6 && p.z.abs() < 1e-6);
    }
}
