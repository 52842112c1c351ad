use crate::prelude::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_RADIUS_M: f64 = 1000.0;

/// Vehicle classes understood by the route generator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    Passenger,
    Truck,
    Bus,
    Motorcycle,
    Bicycle,
    Pedestrian,
    Tram,
    RailUrban,
    Rail,
    Ship,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 10] = [
        VehicleClass::Passenger,
        VehicleClass::Truck,
        VehicleClass::Bus,
        VehicleClass::Motorcycle,
        VehicleClass::Bicycle,
        VehicleClass::Pedestrian,
        VehicleClass::Tram,
        VehicleClass::RailUrban,
        VehicleClass::Rail,
        VehicleClass::Ship,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleClass::Passenger => "passenger",
            VehicleClass::Truck => "truck",
            VehicleClass::Bus => "bus",
            VehicleClass::Motorcycle => "motorcycle",
            VehicleClass::Bicycle => "bicycle",
            VehicleClass::Pedestrian => "pedestrian",
            VehicleClass::Tram => "tram",
            VehicleClass::RailUrban => "rail_urban",
            VehicleClass::Rail => "rail",
            VehicleClass::Ship => "ship",
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Road categories selectable for the edge-inclusion filter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RoadCategory {
    Highway,
    Railway,
    Pedestrians,
    Aeroway,
    Waterway,
    Aerialway,
    Route,
}

impl RoadCategory {
    /// OSM key used as the edge-type namespace in the converted network.
    pub fn osm_key(&self) -> &'static str {
        match self {
            RoadCategory::Highway | RoadCategory::Pedestrians => "highway",
            RoadCategory::Railway => "railway",
            RoadCategory::Aeroway => "aeroway",
            RoadCategory::Waterway => "waterway",
            RoadCategory::Aerialway => "aerialway",
            RoadCategory::Route => "route",
        }
    }

    fn has_link_types(&self) -> bool {
        matches!(self, RoadCategory::Highway)
    }

    /// Edge type tags selected by `types` within this category.
    pub fn edge_types<'a>(&'a self, types: &'a [String]) -> impl Iterator<Item = String> + 'a {
        let key = self.osm_key();
        types.iter().flat_map(move |t| {
            let mut tags = vec![format!("{key}.{t}")];
            if self.has_link_types() {
                tags.push(format!("{key}.{t}_link"));
            }
            tags
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VehicleClassConfig {
    #[serde(default)]
    pub enabled: bool,
    pub count: f64,
    pub fringe_factor: f64,
}

impl VehicleClassConfig {
    pub fn new(count: f64, fringe_factor: f64, enabled: bool) -> Self {
        Self {
            enabled,
            count,
            fringe_factor,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ScenarioOptions {
    pub polygons: bool,
    pub public_transport: bool,
    pub car_only_network: bool,
    pub left_hand: bool,
}

/// Area the user dragged on the selection canvas.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SelectedArea {
    /// `[lon, lat]`
    pub center: [f64; 2],
    /// `[x1, y1, x2, y2]` in canvas units.
    pub rect: [f64; 4],
}

/// The three accepted shapes of the `coordinates` field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AreaCoordinates {
    Center { lat: f64, lng: f64 },
    Bounds {
        west: f64,
        south: f64,
        east: f64,
        north: f64,
    },
    Array([f64; 4]),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioRequest {
    pub coordinates: AreaCoordinates,
    #[serde(default)]
    pub radius: Option<f64>,
    pub duration: i64,
    #[serde(default)]
    pub vehicles: BTreeMap<VehicleClass, VehicleClassConfig>,
    #[serde(default)]
    pub road_types: BTreeMap<RoadCategory, Vec<String>>,
    #[serde(default)]
    pub options: ScenarioOptions,
    #[serde(default)]
    pub selected_area: Option<SelectedArea>,
}

impl ScenarioRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.duration <= 0 {
            return Err(ValidationError::InvalidDuration(self.duration));
        }
        if let Some(radius) = self.radius {
            if !radius.is_finite() || radius <= 0.0 {
                return Err(ValidationError::InvalidRadius(radius));
            }
        }
        for (class, settings) in &self.vehicles {
            let invalid = |reason: &str| ValidationError::InvalidVehicleClass {
                class: class.to_string(),
                reason: reason.to_string(),
            };
            if !settings.count.is_finite() || settings.count < 0.0 {
                return Err(invalid("count must be a non-negative number"));
            }
            if !settings.fringe_factor.is_finite() || settings.fringe_factor < 0.0 {
                return Err(invalid("fringeFactor must be a non-negative number"));
            }
        }
        Ok(())
    }

    pub fn radius_m(&self) -> f64 {
        self.radius.unwrap_or(DEFAULT_RADIUS_M)
    }

    /// Enabled classes in processing order.
    pub fn enabled_classes(&self) -> impl Iterator<Item = (VehicleClass, &VehicleClassConfig)> {
        self.vehicles
            .iter()
            .filter(|(_, settings)| settings.enabled)
            .map(|(class, settings)| (*class, settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> ScenarioRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn center_request_parses_with_defaults() {
        let request = parse(
            r#"{"coordinates":{"lat":37.5665,"lng":126.978},"radius":1000,"duration":3600,
                "vehicles":{"passenger":{"count":12,"fringeFactor":5,"enabled":true}}}"#,
        );
        assert_eq!(
            request.coordinates,
            AreaCoordinates::Center {
                lat: 37.5665,
                lng: 126.978
            }
        );
        assert_eq!(request.enabled_classes().count(), 1);
        assert_eq!(request.options, ScenarioOptions::default());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn array_and_named_bounds_are_accepted() {
        let array = parse(r#"{"coordinates":[13.3,52.5,13.4,52.6],"duration":60}"#);
        assert_eq!(
            array.coordinates,
            AreaCoordinates::Array([13.3, 52.5, 13.4, 52.6])
        );
        let named = parse(
            r#"{"coordinates":{"west":13.3,"south":52.5,"east":13.4,"north":52.6},"duration":60,
                "roadTypes":{"Highway":["motorway","primary"]},
                "selectedArea":{"center":[13.35,52.55],"rect":[0,0,1,1]}}"#,
        );
        assert!(matches!(named.coordinates, AreaCoordinates::Bounds { .. }));
        assert_eq!(named.road_types[&RoadCategory::Highway].len(), 2);
        assert!(named.selected_area.is_some());
    }

    #[test]
    fn negative_counts_are_rejected() {
        let request = parse(
            r#"{"coordinates":[0,0,1,1],"duration":60,
                "vehicles":{"truck":{"count":-1,"fringeFactor":5,"enabled":true}}}"#,
        );
        assert!(matches!(
            request.validate(),
            Err(ValidationError::InvalidVehicleClass { .. })
        ));
    }

    #[test]
    fn non_positive_duration_is_rejected() {
        let request = parse(r#"{"coordinates":[0,0,1,1],"duration":0}"#);
        assert_eq!(request.validate(), Err(ValidationError::InvalidDuration(0)));
    }

    #[test]
    fn unknown_vehicle_class_fails_to_parse() {
        let result: Result<ScenarioRequest, _> = serde_json::from_str(
            r#"{"coordinates":[0,0,1,1],"duration":60,
                "vehicles":{"hovercraft":{"count":1,"fringeFactor":1,"enabled":true}}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn highway_types_include_link_variants() {
        let types = vec!["motorway".to_string()];
        let tags: Vec<_> = RoadCategory::Highway.edge_types(&types).collect();
        assert_eq!(tags, vec!["highway.motorway", "highway.motorway_link"]);
        let rail: Vec<_> = RoadCategory::Railway.edge_types(&types).collect();
        assert_eq!(rail, vec!["railway.motorway"]);
    }
}
