pub mod progress;
pub mod request;
pub mod telemetry;

pub use progress::ProgressEvent;
pub use request::{
    AreaCoordinates, RoadCategory, ScenarioOptions, ScenarioRequest, SelectedArea, VehicleClass,
    VehicleClassConfig,
};
pub use telemetry::{
    ControlCommand, ControlStatus, ControlToggle, EntitySnapshot, GeoPoint, ObserverMessage,
    PositionsFrame, TelemetryEvent, VehiclePosition, DEFAULT_DURATION_STEPS,
};
