use crate::generator::profile::preset_vehicles;
use std::collections::BTreeMap;
use trafficcore::scenario_interface::request::DEFAULT_RADIUS_M;
use trafficcore::scenario_interface::{AreaCoordinates, RoadCategory, ScenarioOptions, ScenarioRequest};

/// Seoul City Hall.
const SAMPLE_CENTER: (f64, f64) = (37.5665, 126.978);

const SAMPLE_DURATION_S: i64 = 3600;

/// Starting point for `--print-template`: a 1 km radius around the sample
/// center with the vehicle presets and the common street types.
pub fn sample_request() -> ScenarioRequest {
    let (lat, lng) = SAMPLE_CENTER;
    let mut road_types = BTreeMap::new();
    road_types.insert(
        RoadCategory::Highway,
        ["motorway", "trunk", "primary", "secondary", "tertiary", "residential"]
            .iter()
            .map(|t| t.to_string())
            .collect(),
    );
    ScenarioRequest {
        coordinates: AreaCoordinates::Center { lat, lng },
        radius: Some(DEFAULT_RADIUS_M),
        duration: SAMPLE_DURATION_S,
        vehicles: preset_vehicles(),
        road_types,
        options: ScenarioOptions::default(),
        selected_area: None,
    }
}

pub fn sample_request_json() -> serde_json::Result<String> {
    serde_json::to_string_pretty(&sample_request())
}
