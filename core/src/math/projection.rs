//! Transverse Mercator (UTM) on the WGS84 ellipsoid, series form after Snyder.

use serde::{Deserialize, Serialize};

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const SCALE_K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UtmProjection {
    pub zone: u8,
    pub south: bool,
}

impl Default for UtmProjection {
    fn default() -> Self {
        Self {
            zone: 52,
            south: false,
        }
    }
}

impl UtmProjection {
    pub fn new(zone: u8, south: bool) -> Option<Self> {
        (1..=60).contains(&zone).then_some(Self { zone, south })
    }

    /// Reads a proj4 string such as `+proj=utm +zone=52 +ellps=WGS84 +units=m`.
    pub fn from_proj_parameter(param: &str) -> Option<Self> {
        let mut is_utm = false;
        let mut zone = None;
        let mut south = false;
        for token in param.split_whitespace() {
            match token.trim_start_matches('+').split_once('=') {
                Some(("proj", "utm")) => is_utm = true,
                Some(("zone", value)) => zone = value.parse::<u8>().ok(),
                None if token.trim_start_matches('+') == "south" => south = true,
                _ => {}
            }
        }
        if !is_utm {
            return None;
        }
        Self::new(zone?, south)
    }

    fn central_meridian(&self) -> f64 {
        (f64::from(self.zone) - 1.0) * 6.0 - 180.0 + 3.0
    }

    fn false_northing(&self) -> f64 {
        if self.south {
            FALSE_NORTHING_SOUTH
        } else {
            0.0
        }
    }

    /// Projected metres to `(lat, lng)` in degrees.
    pub fn inverse(&self, easting: f64, northing: f64) -> (f64, f64) {
        let e2 = WGS84_F * (2.0 - WGS84_F);
        let ep2 = e2 / (1.0 - e2);
        let sqrt_1_e2 = (1.0 - e2).sqrt();
        let e1 = (1.0 - sqrt_1_e2) / (1.0 + sqrt_1_e2);

        let m = (northing - self.false_northing()) / SCALE_K0;
        let mu = m / (WGS84_A * (1.0 - e2 / 4.0 - 3.0 * e2 * e2 / 64.0 - 5.0 * e2.powi(3) / 256.0));

        let phi1 = mu
            + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
            + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
            + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
            + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

        let (sin1, cos1) = phi1.sin_cos();
        let tan1 = sin1 / cos1;
        let c1 = ep2 * cos1 * cos1;
        let t1 = tan1 * tan1;
        let denom = 1.0 - e2 * sin1 * sin1;
        let n1 = WGS84_A / denom.sqrt();
        let r1 = WGS84_A * (1.0 - e2) / denom.powf(1.5);
        let d = (easting - FALSE_EASTING) / (n1 * SCALE_K0);

        let lat = phi1
            - (n1 * tan1 / r1)
                * (d * d / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                        * d.powi(6)
                        / 720.0);
        let lng = (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d.powi(5)
                / 120.0)
            / cos1;

        (lat.to_degrees(), self.central_meridian() + lng.to_degrees())
    }

    /// `(lat, lng)` in degrees to projected metres.
    pub fn forward(&self, lat: f64, lng: f64) -> (f64, f64) {
        let e2 = WGS84_F * (2.0 - WGS84_F);
        let ep2 = e2 / (1.0 - e2);
        let phi = lat.to_radians();
        let (sin_phi, cos_phi) = phi.sin_cos();
        let tan_phi = sin_phi / cos_phi;

        let n = WGS84_A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
        let t = tan_phi * tan_phi;
        let c = ep2 * cos_phi * cos_phi;
        let a = cos_phi * (lng - self.central_meridian()).to_radians();
        let m = WGS84_A
            * ((1.0 - e2 / 4.0 - 3.0 * e2 * e2 / 64.0 - 5.0 * e2.powi(3) / 256.0) * phi
                - (3.0 * e2 / 8.0 + 3.0 * e2 * e2 / 32.0 + 45.0 * e2.powi(3) / 1024.0)
                    * (2.0 * phi).sin()
                + (15.0 * e2 * e2 / 256.0 + 45.0 * e2.powi(3) / 1024.0) * (4.0 * phi).sin()
                - (35.0 * e2.powi(3) / 3072.0) * (6.0 * phi).sin());

        let easting = SCALE_K0
            * n
            * (a + (1.0 - t + c) * a.powi(3) / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0)
            + FALSE_EASTING;
        let northing = SCALE_K0
            * (m + n
                * tan_phi
                * (a * a / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0))
            + self.false_northing();

        (easting, northing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sumo_proj_parameter() {
        let proj = UtmProjection::from_proj_parameter(
            "+proj=utm +zone=52 +ellps=WGS84 +datum=WGS84 +units=m +no_defs",
        )
        .unwrap();
        assert_eq!(proj, UtmProjection::new(52, false).unwrap());
        let south = UtmProjection::from_proj_parameter("+proj=utm +zone=33 +south").unwrap();
        assert!(south.south);
        assert!(UtmProjection::from_proj_parameter("!").is_none());
        assert!(UtmProjection::from_proj_parameter("+proj=utm +zone=99").is_none());
    }

    #[test]
    fn central_meridian_maps_to_false_easting() {
        let proj = UtmProjection::default();
        let (easting, northing) = proj.forward(0.0, 129.0);
        assert!((easting - FALSE_EASTING).abs() < 1e-6);
        assert!(northing.abs() < 1e-6);
    }

    #[test]
    fn seoul_round_trips_within_tolerance() {
        let proj = UtmProjection::default();
        let (easting, northing) = proj.forward(37.5665, 126.978);
        // City hall sits roughly 322 km east of the zone origin.
        assert!((easting - 322_000.0).abs() < 2_000.0);
        let (lat, lng) = proj.inverse(easting, northing);
        assert!((lat - 37.5665).abs() < 1e-6);
        assert!((lng - 126.978).abs() < 1e-6);
    }

    #[test]
    fn southern_hemisphere_round_trip() {
        let proj = UtmProjection::new(56, true).unwrap();
        let (easting, northing) = proj.forward(-33.8688, 151.2093);
        let (lat, lng) = proj.inverse(easting, northing);
        assert!((lat + 33.8688).abs() < 1e-6);
        assert!((lng - 151.2093).abs() < 1e-6);
    }
}
