use crate::prelude::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Duration used when the opening message does not carry one.
pub const DEFAULT_DURATION_STEPS: u64 = 3600;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Per-step view of one vehicle; rebuilt every step.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot {
    pub id: String,
    pub local_position: (f64, f64),
    pub public_position: GeoPoint,
    pub heading: f64,
    pub speed_kmh: f64,
    pub class_id: String,
}

impl EntitySnapshot {
    pub fn to_wire(&self) -> VehiclePosition {
        VehiclePosition {
            id: self.id.clone(),
            position: self.public_position,
            vehicle_type: self.class_id.clone(),
            angle: self.heading,
            speed: self.speed_kmh,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VehiclePosition {
    pub id: String,
    pub position: GeoPoint,
    #[serde(rename = "type")]
    pub vehicle_type: String,
    pub angle: f64,
    pub speed: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlStatus {
    pub block_applied: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PositionsFrame {
    #[serde(skip)]
    pub step_index: u64,
    pub data: Vec<VehiclePosition>,
    pub progress: u32,
    pub vehicle_count: usize,
    pub control_status: ControlStatus,
    pub average_speed: f64,
}

/// Server-to-observer messages of the simulation protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    VehiclePositions(PositionsFrame),
    SimulationComplete,
    Error { message: String },
}

impl TelemetryEvent {
    pub fn error(message: impl Into<String>) -> Self {
        TelemetryEvent::Error {
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TelemetryEvent::VehiclePositions(_))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"type":"error","message":"unserializable event"}"#.into())
    }
}

/// Named operator switches applied between engine steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ControlToggle {
    BlockMotorwayLinks,
}

impl ControlToggle {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "blockMotorwayLinks" => Some(ControlToggle::BlockMotorwayLinks),
            _ => None,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            ControlToggle::BlockMotorwayLinks => "blockMotorwayLinks",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlCommand {
    pub key: String,
    pub value: Value,
}

impl ControlCommand {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// The toggle this command addresses and its desired state, if recognised.
    pub fn toggle(&self) -> Option<(ControlToggle, bool)> {
        let toggle = ControlToggle::from_key(&self.key)?;
        let desired = match &self.value {
            Value::Bool(flag) => *flag,
            Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
            Value::String(s) => matches!(s.as_str(), "true" | "1" | "on"),
            _ => false,
        };
        Some((toggle, desired))
    }
}

/// Observer-to-server messages of the simulation protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverMessage {
    Start { duration: u64 },
    Disconnect,
    Control(Vec<ControlCommand>),
}

impl ObserverMessage {
    fn is_disconnect(object: &serde_json::Map<String, Value>) -> bool {
        object.get("type").and_then(Value::as_str) == Some("disconnect")
    }

    /// Parses the first message of a connection. A missing duration means
    /// [`DEFAULT_DURATION_STEPS`]; zero, negative or non-integer ones are rejected.
    pub fn parse_opening(text: &str) -> Result<Self, ValidationError> {
        let object: serde_json::Map<String, Value> = serde_json::from_str(text)
            .map_err(|err| ValidationError::MalformedMessage(err.to_string()))?;
        if Self::is_disconnect(&object) {
            return Ok(ObserverMessage::Disconnect);
        }
        let duration = match object.get("duration") {
            None | Some(Value::Null) => DEFAULT_DURATION_STEPS,
            Some(value) => parse_duration(value)?,
        };
        Ok(ObserverMessage::Start { duration })
    }

    /// Parses a message received while a run is in progress.
    pub fn parse_control(text: &str) -> Result<Self, serde_json::Error> {
        let object: serde_json::Map<String, Value> = serde_json::from_str(text)?;
        if Self::is_disconnect(&object) {
            return Ok(ObserverMessage::Disconnect);
        }
        let commands = object
            .into_iter()
            .filter(|(key, _)| key != "type")
            .map(|(key, value)| ControlCommand { key, value })
            .collect();
        Ok(ObserverMessage::Control(commands))
    }
}

fn parse_duration(value: &Value) -> Result<u64, ValidationError> {
    match (value.as_u64(), value.as_i64()) {
        (Some(0), _) => Err(ValidationError::InvalidDuration(0)),
        (Some(steps), _) => Ok(steps),
        (None, Some(negative)) => Err(ValidationError::InvalidDuration(negative)),
        (None, None) => Err(ValidationError::MalformedMessage(format!(
            "duration must be a whole number of steps, got {value}"
        ))),
    }
}
