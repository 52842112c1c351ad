use crate::math::projection::UtmProjection;
use crate::scenario_interface::GeoPoint;

/// Maps engine-local planar coordinates to public latitude/longitude.
///
/// The network declares `netOffset`, the translation added to projected
/// coordinates; the session origin is its negation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateTransformer {
    projection: UtmProjection,
    center_x: f64,
    center_y: f64,
}

impl CoordinateTransformer {
    pub fn from_net_offset(projection: UtmProjection, net_offset: (f64, f64)) -> Self {
        Self {
            projection,
            center_x: -net_offset.0,
            center_y: -net_offset.1,
        }
    }

    pub fn origin(&self) -> (f64, f64) {
        (self.center_x, self.center_y)
    }

    pub fn to_public(&self, local_x: f64, local_y: f64) -> GeoPoint {
        let (lat, lng) = self
            .projection
            .inverse(local_x + self.center_x, local_y + self.center_y);
        GeoPoint { lat, lng }
    }

    pub fn to_local(&self, point: GeoPoint) -> (f64, f64) {
        let (easting, northing) = self.projection.forward(point.lat, point.lng);
        (easting - self.center_x, northing - self.center_y)
    }
}
