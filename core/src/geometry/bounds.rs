use crate::prelude::ValidationError;
use crate::scenario_interface::{AreaCoordinates, ScenarioRequest, SelectedArea};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Geographic rectangle in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    /// Normalizes edge order and rejects out-of-range or degenerate boxes.
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Result<Self, ValidationError> {
        for (name, value, limit) in [
            ("west", west, 180.0),
            ("east", east, 180.0),
            ("south", south, 90.0),
            ("north", north, 90.0),
        ] {
            if !value.is_finite() || value.abs() > limit {
                return Err(ValidationError::InvalidCoordinates(format!(
                    "{name}={value} is outside [-{limit}, {limit}]"
                )));
            }
        }
        let bbox = Self {
            west: west.min(east),
            south: south.min(north),
            east: west.max(east),
            north: south.max(north),
        };
        if bbox.west == bbox.east || bbox.south == bbox.north {
            return Err(ValidationError::InvalidCoordinates(
                "bounding box has zero extent".into(),
            ));
        }
        Ok(bbox)
    }

    /// `west,south,east,north`, as taken by the extraction tool.
    pub fn to_arg(&self) -> String {
        format!("{},{},{},{}", self.west, self.south, self.east, self.north)
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.6}, {:.6}, {:.6}, {:.6}]",
            self.west, self.south, self.east, self.north
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryLimits {
    pub meters_per_degree: f64,
    /// Metres represented by one selection-canvas unit.
    pub canvas_unit_meters: f64,
    pub min_area_m2: f64,
    pub max_area_m2: f64,
}

impl Default for GeometryLimits {
    fn default() -> Self {
        Self {
            meters_per_degree: 111_320.0,
            canvas_unit_meters: 1000.0,
            min_area_m2: 10_000.0,
            max_area_m2: 100_000_000.0,
        }
    }
}

/// Turns request geometry into validated bounds. Pure and deterministic.
#[derive(Debug, Clone, Default)]
pub struct GeometryResolver {
    limits: GeometryLimits,
}

impl GeometryResolver {
    pub fn new(limits: GeometryLimits) -> Self {
        Self { limits }
    }

    pub fn resolve_request(&self, request: &ScenarioRequest) -> Result<BoundingBox, ValidationError> {
        self.resolve(
            &request.coordinates,
            request.radius_m(),
            request.selected_area.as_ref(),
        )
    }

    pub fn resolve(
        &self,
        coordinates: &AreaCoordinates,
        radius_m: f64,
        selected_area: Option<&SelectedArea>,
    ) -> Result<BoundingBox, ValidationError> {
        if let Some(area) = selected_area {
            return self.resolve_selected_area(area);
        }
        match *coordinates {
            AreaCoordinates::Center { lat, lng } => {
                let side = 2.0 * radius_m;
                self.footprint(lng, lat, side, side)
            }
            AreaCoordinates::Bounds {
                west,
                south,
                east,
                north,
            } => BoundingBox::new(west, south, east, north),
            AreaCoordinates::Array([west, south, east, north]) => {
                BoundingBox::new(west, south, east, north)
            }
        }
    }

    pub fn resolve_selected_area(&self, area: &SelectedArea) -> Result<BoundingBox, ValidationError> {
        let [lon, lat] = area.center;
        let [x1, y1, x2, y2] = area.rect;
        let width_m = (x2 - x1).abs() * self.limits.canvas_unit_meters;
        let height_m = (y2 - y1).abs() * self.limits.canvas_unit_meters;
        self.footprint(lon, lat, width_m, height_m)
    }

    fn footprint(
        &self,
        lon: f64,
        lat: f64,
        width_m: f64,
        height_m: f64,
    ) -> Result<BoundingBox, ValidationError> {
        if !lat.is_finite() || !lon.is_finite() || lat.abs() > 90.0 || lon.abs() > 180.0 {
            return Err(ValidationError::InvalidCoordinates(format!(
                "center ({lon}, {lat}) is not a valid lon/lat pair"
            )));
        }
        let area_m2 = width_m * height_m;
        if !area_m2.is_finite() || area_m2 < self.limits.min_area_m2 {
            return Err(ValidationError::AreaTooSmall {
                area_m2,
                min_m2: self.limits.min_area_m2,
            });
        }
        if area_m2 > self.limits.max_area_m2 {
            return Err(ValidationError::AreaTooLarge {
                area_m2,
                max_m2: self.limits.max_area_m2,
            });
        }

        let lat_m = self.limits.meters_per_degree;
        let lon_m = self.limits.meters_per_degree * lat.to_radians().cos();
        let half_lon = (width_m / 2.0) / lon_m;
        let half_lat = (height_m / 2.0) / lat_m;
        BoundingBox::new(lon - half_lon, lat - half_lat, lon + half_lon, lat + half_lat)
    }
}
