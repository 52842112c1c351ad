use crate::prelude::SessionResult;
use crate::settings::EngineSettings;
use async_trait::async_trait;
use std::path::PathBuf;

/// Per-vehicle values read after a step, in engine units.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleState {
    pub position: (f64, f64),
    /// Metres per second.
    pub speed: f64,
    pub vehicle_type: String,
    pub angle: f64,
}

/// A connected, step-driven simulation engine.
#[async_trait]
pub trait SimulationEngine: Send {
    async fn simulation_step(&mut self) -> SessionResult<()>;
    /// Vehicles still running or waiting to depart.
    async fn min_expected_number(&mut self) -> SessionResult<i32>;
    async fn vehicle_ids(&mut self) -> SessionResult<Vec<String>>;
    async fn vehicle_state(&mut self, id: &str) -> SessionResult<VehicleState>;
    async fn set_edge_disallowed(&mut self, edge: &str, classes: &[String]) -> SessionResult<()>;
    async fn set_edge_allowed(&mut self, edge: &str, classes: &[String]) -> SessionResult<()>;
    async fn close(&mut self) -> SessionResult<()>;
}

/// Starts engines for a session.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    type Engine: SimulationEngine;

    async fn launch(&self, invocation: &EngineInvocation) -> SessionResult<Self::Engine>;
}

/// Everything needed to start the engine on a generated scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineInvocation {
    pub program: String,
    pub config_file: PathBuf,
    pub working_dir: PathBuf,
    pub duration: u64,
    pub trajectory_output: PathBuf,
    pub settings: EngineSettings,
}

impl EngineInvocation {
    /// Command-line arguments, excluding the remote control port.
    pub fn args(&self) -> Vec<String> {
        let s = &self.settings;
        let duration = self.duration.to_string();
        vec![
            "-c".into(),
            self.config_file.to_string_lossy().into_owned(),
            "--waiting-time-memory".into(),
            s.waiting_time_memory.to_string(),
            "--time-to-teleport".into(),
            s.time_to_teleport.to_string(),
            "--end".into(),
            duration.clone(),
            "--max-depart-delay".into(),
            duration,
            "--quit-on-end".into(),
            "true".into(),
            "--device.rerouting.mode".into(),
            s.rerouting_mode.to_string(),
            "--default.carfollowmodel".into(),
            s.car_follow_model.clone(),
            "--device.rerouting.probability".into(),
            s.rerouting_probability.to_string(),
            "--ignore-route-errors".into(),
            "true".into(),
            "--fcd-output".into(),
            self.trajectory_output.to_string_lossy().into_owned(),
        ]
    }
}
