use crate::geometry::CoordinateTransformer;
use crate::prelude::{EngineLauncher, SessionError, SessionResult, SimulationEngine};
use crate::scenario_interface::{ControlCommand, ControlStatus, ControlToggle, EntitySnapshot};
use crate::session::engine::EngineInvocation;
use crate::session::network::{load_network, locate_run_config, read_net_file};
use crate::settings::{EngineSettings, ScenarioSettings};
use crate::telemetry::{MetricsRecorder, SessionMetrics};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const MS_TO_KMH: f64 = 3.6;
const TRAJECTORY_OUTPUT: &str = "fcd_output.xml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    Running,
    Stopped,
}

/// One engine connection on a generated scenario.
pub struct SimulationSession<L: EngineLauncher> {
    launcher: L,
    engine_settings: EngineSettings,
    program: String,
    config_file: PathBuf,
    trajectory_output: PathBuf,
    transformer: CoordinateTransformer,
    restricted_edges: Vec<String>,
    engine: Option<L::Engine>,
    state: SessionState,
    step_index: u64,
    duration: u64,
    toggles: BTreeMap<ControlToggle, bool>,
    control_status: ControlStatus,
    metrics: MetricsRecorder,
}

impl<L: EngineLauncher> SimulationSession<L> {
    /// Reads the scenario in `settings.data_dir`; the engine is not started yet.
    pub async fn open(settings: &ScenarioSettings, launcher: L) -> SessionResult<Self> {
        let config_file = locate_run_config(&settings.data_dir, &settings.generation.prefix).await?;
        let net_file = read_net_file(&config_file).await?;
        let network = load_network(&net_file).await?;
        let projection = network.projection.unwrap_or_else(|| {
            warn!(
                "{} declares no UTM projection, using zone {}",
                net_file.display(),
                settings.engine.fallback_projection.zone
            );
            settings.engine.fallback_projection
        });
        info!("session scenario {}", config_file.display());

        Ok(Self {
            launcher,
            engine_settings: settings.engine.clone(),
            program: settings.tools.sumo(),
            config_file,
            trajectory_output: settings.data_dir.join(TRAJECTORY_OUTPUT),
            transformer: CoordinateTransformer::from_net_offset(projection, network.net_offset),
            restricted_edges: network.restricted_edges,
            engine: None,
            state: SessionState::Unstarted,
            step_index: 0,
            duration: 0,
            toggles: BTreeMap::new(),
            control_status: ControlStatus::default(),
            metrics: MetricsRecorder::new(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_started(&self) -> bool {
        self.engine.is_some()
    }

    pub fn step_index(&self) -> u64 {
        self.step_index
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn transformer(&self) -> &CoordinateTransformer {
        &self.transformer
    }

    pub fn restricted_edges(&self) -> &[String] {
        &self.restricted_edges
    }

    pub fn control_status(&self) -> ControlStatus {
        self.control_status
    }

    pub fn metrics(&self) -> SessionMetrics {
        self.metrics.snapshot()
    }

    /// `stepIndex × 100 / duration`, capped at 100.
    pub fn progress(&self) -> u32 {
        if self.duration == 0 {
            return 0;
        }
        (self.step_index.saturating_mul(100) / self.duration).min(100) as u32
    }

    /// Starts the engine once; later calls while running are no-ops.
    pub async fn initialize(&mut self, duration: u64) -> SessionResult<()> {
        if self.engine.is_some() {
            debug!("session already started");
            return Ok(());
        }
        let working_dir = self
            .config_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let invocation = EngineInvocation {
            program: self.program.clone(),
            config_file: self.config_file.clone(),
            working_dir,
            duration,
            trajectory_output: self.trajectory_output.clone(),
            settings: self.engine_settings.clone(),
        };
        let engine = self.launcher.launch(&invocation).await?;
        info!("engine started for {duration} steps");
        self.engine = Some(engine);
        self.state = SessionState::Running;
        self.duration = duration;
        self.step_index = 0;
        Ok(())
    }

    fn engine(&mut self) -> SessionResult<&mut L::Engine> {
        self.engine
            .as_mut()
            .ok_or_else(|| SessionError::Engine("session is not running".into()))
    }

    /// Vehicles the engine still expects to run.
    pub async fn pending(&mut self) -> SessionResult<i32> {
        self.engine()?.min_expected_number().await
    }

    /// Advances one tick and snapshots every live vehicle.
    pub async fn step(&mut self) -> SessionResult<Vec<EntitySnapshot>> {
        let engine = self
            .engine
            .as_mut()
            .ok_or_else(|| SessionError::Engine("session is not running".into()))?;
        engine.simulation_step().await?;
        self.step_index += 1;
        self.metrics.record_step();

        let ids = engine.vehicle_ids().await?;
        let mut snapshots = Vec::with_capacity(ids.len());
        for id in ids {
            match engine.vehicle_state(&id).await {
                Ok(vehicle) => {
                    let (x, y) = vehicle.position;
                    snapshots.push(EntitySnapshot {
                        public_position: self.transformer.to_public(x, y),
                        local_position: vehicle.position,
                        heading: vehicle.angle,
                        speed_kmh: vehicle.speed * MS_TO_KMH,
                        class_id: vehicle.vehicle_type,
                        id,
                    });
                }
                Err(err) => {
                    warn!("skipping vehicle {id}: {err}");
                    self.metrics.record_skipped_entity();
                }
            }
        }
        Ok(snapshots)
    }

    /// Applies a toggle when it changes state; repeated values are no-ops.
    pub async fn apply_control(&mut self, command: &ControlCommand) -> SessionResult<()> {
        let Some((toggle, desired)) = command.toggle() else {
            warn!("ignoring unknown control '{}'", command.key);
            return Ok(());
        };
        let current = self.toggles.get(&toggle).copied().unwrap_or(false);
        if desired == current {
            debug!("{} already {desired}", toggle.key());
            return Ok(());
        }

        let engine = self
            .engine
            .as_mut()
            .ok_or_else(|| SessionError::Engine("session is not running".into()))?;
        let classes = &self.engine_settings.restricted_classes;
        let mut failures = 0usize;
        for edge in &self.restricted_edges {
            let result = match toggle {
                ControlToggle::BlockMotorwayLinks if desired => {
                    engine.set_edge_disallowed(edge, classes).await
                }
                ControlToggle::BlockMotorwayLinks => engine.set_edge_allowed(edge, classes).await,
            };
            if let Err(err) = result {
                warn!("{} on edge {edge} failed: {err}", toggle.key());
                failures += 1;
            }
        }

        self.toggles.insert(toggle, desired);
        self.control_status.block_applied = failures == 0;
        if failures > 0 {
            self.metrics.record_control_failure();
        }
        info!(
            "{} set to {desired} on {} edges ({failures} failed)",
            toggle.key(),
            self.restricted_edges.len()
        );
        Ok(())
    }

    /// Closes the engine and resets the session. Safe to call repeatedly.
    pub async fn cleanup(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            match engine.close().await {
                Ok(()) => info!("engine closed"),
                Err(err) => warn!("engine close failed: {err}"),
            }
            self.metrics.finish();
            self.state = SessionState::Stopped;
        }
        self.step_index = 0;
        self.duration = 0;
        self.toggles.clear();
        self.control_status = ControlStatus::default();
    }
}
