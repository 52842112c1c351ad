use std::path::PathBuf;

pub use crate::generation::stage_runner::{ToolCommand, ToolOutput, ToolRunner};
pub use crate::session::engine::{EngineLauncher, SimulationEngine};
pub use crate::session::streamer::TelemetrySink;

/// Rejections raised while checking a request, before any external tool runs.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("selected area of {area_m2:.0} m² is below the minimum of {min_m2:.0} m²")]
    AreaTooSmall { area_m2: f64, min_m2: f64 },
    #[error("selected area of {area_m2:.0} m² exceeds the maximum of {max_m2:.0} m²")]
    AreaTooLarge { area_m2: f64, max_m2: f64 },
    #[error("invalid coordinates: {0}")]
    InvalidCoordinates(String),
    #[error("invalid settings for vehicle class {class}: {reason}")]
    InvalidVehicleClass { class: String, reason: String },
    #[error("duration must be positive, got {0}")]
    InvalidDuration(i64),
    #[error("radius must be a positive number of metres, got {0}")]
    InvalidRadius(f64),
    #[error("malformed message: {0}")]
    MalformedMessage(String),
}

/// Failures of a generation stage.
#[derive(thiserror::Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {}: {stderr}", exit_label(.exit_code))]
    Execution {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("map extraction did not produce {}", .0.display())]
    ExtractionFailed(PathBuf),
    #[error("expected artifact {} is missing", .0.display())]
    MissingArtifact(PathBuf),
    #[error("no artifacts produced: {0}")]
    NoArtifacts(String),
    #[error("no route files available for the run configuration")]
    NoRoutesAvailable,
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

pub type StageResult<T> = Result<T, StageError>;

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

/// Failures of a simulation session or its observer connection.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("no run configuration found in {}", .0.display())]
    ConfigNotFound(PathBuf),
    #[error("cannot read network {}: {reason}", .path.display())]
    Network { path: PathBuf, reason: String },
    #[error("network {} declares no netOffset", .0.display())]
    MissingOffsetMetadata(PathBuf),
    #[error("engine start failed: {0}")]
    EngineStart(String),
    #[error("query for entity {id} failed: {reason}")]
    EntityQuery { id: String, reason: String },
    #[error("engine error: {0}")]
    Engine(String),
    #[error("observer transport closed: {0}")]
    Transport(String),
    #[error("a simulation run is already in progress")]
    Busy,
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl SessionError {
    /// True when the observer went away; such failures are not server faults.
    pub fn is_transport(&self) -> bool {
        matches!(self, SessionError::Transport(_))
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
