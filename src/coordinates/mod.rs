//! Equatorial coordinates and angular distances on the celestial sphere

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Arcseconds per degree
pub const ARCSEC_PER_DEG: f64 = 3600.0;

/// Celestial coordinate in right ascension and declination
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RaDec {
    /// Right ascension in radians
    pub ra: f64,
    /// Declination in radians
    pub dec: f64,
}

impl RaDec {
    /// Create a new RaDec coordinate with values in radians
    pub fn new(ra: f64, dec: f64) -> Self {
        Self { ra, dec }
    }

    /// Create a new RaDec coordinate with values in degrees
    pub fn from_degrees(ra_deg: f64, dec_deg: f64) -> Self {
        Self {
            ra: ra_deg * PI / 180.0,
            dec: dec_deg * PI / 180.0,
        }
    }

    /// Get right ascension in degrees
    pub fn ra_degrees(&self) -> f64 {
        self.ra * 180.0 / PI
    }

    /// Get declination in degrees
    pub fn dec_degrees(&self) -> f64 {
        self.dec * 180.0 / PI
    }

    /// Angular distance to another coordinate, in degrees.
    ///
    /// Uses the haversine formula, which stays numerically stable at
    /// sub-arcsecond separations where the law of cosines loses precision.
    /// Never returns NaN for finite inputs: the haversine term is clamped
    /// to the antipodal distance.
    pub fn angular_distance(&self, other: &RaDec) -> f64 {
        let sd2 = (0.5 * (other.dec - self.dec)).sin();
        let sr2 = (0.5 * (other.ra - self.ra)).sin();
        let a = sd2 * sd2 + sr2 * sr2 * self.dec.cos() * other.dec.cos();
        let d = if a < 1.0 { 2.0 * a.sqrt().asin() } else { PI };
        d * 180.0 / PI
    }

    /// Angular distance to another coordinate, in arcseconds
    pub fn separation_arcsec(&self, other: &RaDec) -> f64 {
        self.angular_distance(other) * ARCSEC_PER_DEG
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_radec_conversions() {
        let coord = RaDec::from_degrees(53.2, -27.9);
        assert_relative_eq!(coord.ra_degrees(), 53.2, epsilon = 1e-12);
        assert_relative_eq!(coord.dec_degrees(), -27.9, epsilon = 1e-12);
    }

    #[test]
    fn test_known_subarcsecond_distance() {
        // Two sources in the CDF-S, 0.755 arcsec apart
        let a = RaDec::from_degrees(53.15964508, -27.92927742);
        let b = RaDec::from_degrees(53.15953445, -27.9313736);
        let d = a.angular_distance(&b);
        assert!(d.is_finite());
        assert_relative_eq!(d, 0.000210, epsilon = 2e-6);
        assert_relative_eq!(a.separation_arcsec(&b), 0.755, epsilon = 5e-3);
    }

    #[test]
    fn test_distance_symmetry_and_range() {
        let points = [
            RaDec::from_degrees(0.0, 0.0),
            RaDec::from_degrees(180.0, 0.0),
            RaDec::from_degrees(53.147, -27.793),
            RaDec::from_degrees(279.23, 38.78),
            RaDec::from_degrees(359.999, 89.9),
        ];
        for a in &points {
            for b in &points {
                let dab = a.angular_distance(b);
                let dba = b.angular_distance(a);
                assert!(dab.is_finite());
                assert!((0.0..=180.0).contains(&dab));
                assert_relative_eq!(dab, dba, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_zero_and_antipodal() {
        let p = RaDec::from_degrees(10.0, 20.0);
        assert_relative_eq!(p.angular_distance(&p), 0.0);

        let q = RaDec::from_degrees(190.0, -20.0);
        assert_relative_eq!(p.angular_distance(&q), 180.0, epsilon = 1e-9);
    }

    #[test]
    fn test_polaris_vega() {
        let polaris = RaDec::from_degrees(37.95, 89.26);
        let vega = RaDec::from_degrees(279.23, 38.78);
        let dist = polaris.angular_distance(&vega);
        assert!((dist - 51.0).abs() < 1.0);
    }
}
