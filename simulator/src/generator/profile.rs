use std::collections::BTreeMap;
use trafficcore::scenario_interface::{VehicleClass, VehicleClassConfig};

/// Default count and fringe factor offered for each vehicle class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehiclePreset {
    pub class: VehicleClass,
    pub count: f64,
    pub fringe_factor: f64,
    pub enabled: bool,
}

impl VehiclePreset {
    const fn new(class: VehicleClass, count: f64, fringe_factor: f64, enabled: bool) -> Self {
        Self {
            class,
            count,
            fringe_factor,
            enabled,
        }
    }

    pub fn to_config(&self) -> VehicleClassConfig {
        VehicleClassConfig::new(self.count, self.fringe_factor, self.enabled)
    }
}

/// Only passenger traffic starts enabled.
pub const VEHICLE_PRESETS: [VehiclePreset; 10] = [
    VehiclePreset::new(VehicleClass::Passenger, 12.0, 5.0, true),
    VehiclePreset::new(VehicleClass::Truck, 8.0, 5.0, false),
    VehiclePreset::new(VehicleClass::Bus, 4.0, 5.0, false),
    VehiclePreset::new(VehicleClass::Motorcycle, 4.0, 2.0, false),
    VehiclePreset::new(VehicleClass::Bicycle, 6.0, 2.0, false),
    VehiclePreset::new(VehicleClass::Pedestrian, 10.0, 1.0, false),
    VehiclePreset::new(VehicleClass::Tram, 2.0, 20.0, false),
    VehiclePreset::new(VehicleClass::RailUrban, 2.0, 40.0, false),
    VehiclePreset::new(VehicleClass::Rail, 2.0, 40.0, false),
    VehiclePreset::new(VehicleClass::Ship, 2.0, 40.0, false),
];

pub fn preset_vehicles() -> BTreeMap<VehicleClass, VehicleClassConfig> {
    VEHICLE_PRESETS
        .iter()
        .map(|preset| (preset.class, preset.to_config()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_class_has_a_preset() {
        let vehicles = preset_vehicles();
        assert_eq!(vehicles.len(), 10);
        assert_eq!(
            vehicles[&VehicleClass::Passenger],
            VehicleClassConfig::new(12.0, 5.0, true)
        );
        assert_eq!(vehicles[&VehicleClass::Ship].fringe_factor, 40.0);
    }

    #[test]
    fn only_passenger_starts_enabled() {
        let enabled: Vec<_> = preset_vehicles()
            .into_iter()
            .filter(|(_, config)| config.enabled)
            .map(|(class, _)| class)
            .collect();
        assert_eq!(enabled, vec![VehicleClass::Passenger]);
    }
}
