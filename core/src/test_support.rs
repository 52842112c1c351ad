//! In-crate fakes for the external tools, the engine and the observer.

use crate::prelude::{
    EngineLauncher, SessionError, SessionResult, SimulationEngine, StageError, StageResult,
    TelemetrySink, ToolCommand, ToolOutput, ToolRunner,
};
use crate::scenario_interface::{TelemetryEvent, VehicleClass};
use crate::session::engine::{EngineInvocation, VehicleState};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const SAMPLE_NET: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<net version="1.20" junctionCornerDetail="5">
    <location netOffset="-321000.00,-4158000.00" convBoundary="0.00,0.00,2000.00,2000.00" origBoundary="126.96,37.55,126.99,37.58" projParameter="+proj=utm +zone=52 +ellps=WGS84 +datum=WGS84 +units=m +no_defs"/>
    <type id="highway.motorway_link" priority="12"/>
    <edge id=":J0_0" function="internal">
        <lane id=":J0_0_0" index="0" speed="13.89" length="5.00" shape="0,0 5,0"/>
    </edge>
    <edge id="ramp_1" from="J0" to="J1" type="highway.motorway_link">
        <lane id="ramp_1_0" index="0" speed="22.22" length="120.00" shape="0,0 120,0"/>
    </edge>
    <edge id="main_2" from="J1" to="J2" type="highway.primary"/>
    <edge id="ramp_3" from="J2" to="J3" type="highway.motorway_link"/>
</net>
"#;

/// Writes a minimal generated scenario (`osm.sumocfg` + network) into `dir`.
pub fn write_scenario(dir: &Path) {
    std::fs::write(dir.join("osm.net.xml"), SAMPLE_NET).unwrap();
    std::fs::write(
        dir.join("osm.sumocfg"),
        r#"<configuration>
    <input>
        <net-file value="osm.net.xml"/>
        <route-files value="osm.passenger.rou.xml"/>
    </input>
</configuration>
"#,
    )
    .unwrap();
}

fn xml_value<'a>(document: &'a str, tag: &str) -> Option<&'a str> {
    let marker = format!("<{tag} value=\"");
    let start = document.find(&marker)? + marker.len();
    let end = document[start..].find('"')?;
    Some(&document[start..start + end])
}

fn touch(path: impl AsRef<Path>, contents: &str) {
    std::fs::write(path, contents).unwrap();
}

/// Stands in for the pipeline tools, creating the files each would produce.
#[derive(Clone, Default)]
pub struct FakeToolRunner {
    commands: Arc<Mutex<Vec<ToolCommand>>>,
    failing_classes: Vec<VehicleClass>,
    failing_programs: Vec<String>,
    silent_programs: Vec<String>,
    tripless_classes: Vec<VehicleClass>,
}

impl FakeToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route generation for `class` exits non-zero.
    pub fn failing_class(mut self, class: VehicleClass) -> Self {
        self.failing_classes.push(class);
        self
    }

    pub fn failing_program(mut self, name: &str) -> Self {
        self.failing_programs.push(name.to_string());
        self
    }

    /// `name` exits cleanly without writing its outputs.
    pub fn without_outputs_for(mut self, name: &str) -> Self {
        self.silent_programs.push(name.to_string());
        self
    }

    /// Route generation for `class` writes its routes but no trips file.
    pub fn without_trips_for(mut self, class: VehicleClass) -> Self {
        self.tripless_classes.push(class);
        self
    }

    pub fn commands(&self) -> Vec<ToolCommand> {
        self.commands.lock().unwrap().clone()
    }

    fn tool_name(command: &ToolCommand) -> String {
        let target = if command.program.starts_with("python") {
            command.args.first().map(String::as_str).unwrap_or_default()
        } else {
            command.program.as_str()
        };
        Path::new(target)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn write_outputs(tool: &str, command: &ToolCommand) {
        match tool {
            "osmGet.py" => {
                let dir = PathBuf::from(command.flag_value("-d").unwrap());
                let prefix = command.flag_value("-p").unwrap();
                touch(dir.join(format!("{prefix}_bbox.osm.xml.gz")), "osm");
            }
            "netconvert" => {
                let config = std::fs::read_to_string(command.flag_value("-c").unwrap()).unwrap();
                touch(xml_value(&config, "output-file").unwrap(), SAMPLE_NET);
                for tag in ["ptstop-output", "ptline-output"] {
                    if let Some(path) = xml_value(&config, tag) {
                        touch(path, "<additional/>");
                    }
                }
            }
            "randomTrips.py" => {
                touch(command.flag_value("-o").unwrap(), "<routes/>");
                touch(command.flag_value("-r").unwrap(), "<routes/>");
            }
            "polyconvert" => touch(command.flag_value("-o").unwrap(), "<additional/>"),
            _ => {}
        }
    }
}

#[async_trait]
impl ToolRunner for FakeToolRunner {
    async fn run(&self, command: &ToolCommand) -> StageResult<ToolOutput> {
        self.commands.lock().unwrap().push(command.clone());
        let tool = Self::tool_name(command);
        let class_fails = command
            .flag_value("--vehicle-class")
            .is_some_and(|class| self.failing_classes.iter().any(|c| c.as_str() == class));
        if class_fails || self.failing_programs.iter().any(|p| tool.contains(p.as_str())) {
            return Err(StageError::Execution {
                command: command.to_string(),
                exit_code: Some(1),
                stderr: format!("{tool}: simulated failure"),
            });
        }
        if !self.silent_programs.iter().any(|p| tool.contains(p.as_str())) {
            Self::write_outputs(&tool, command);
        }
        let tripless = command
            .flag_value("--vehicle-class")
            .is_some_and(|class| self.tripless_classes.iter().any(|c| c.as_str() == class));
        if tripless {
            if let Some(trips) = command.flag_value("-o") {
                std::fs::remove_file(trips).unwrap();
            }
        }
        Ok(ToolOutput::default())
    }
}

#[derive(Debug, Default)]
struct EngineLog {
    steps: usize,
    disallowed: usize,
    allowed: usize,
    closes: usize,
}

/// Shared view of what every engine launched from one template did.
#[derive(Clone)]
pub struct EngineProbe {
    log: Arc<Mutex<EngineLog>>,
}

impl EngineProbe {
    pub fn steps(&self) -> usize {
        self.log.lock().unwrap().steps
    }

    pub fn disallowed_calls(&self) -> usize {
        self.log.lock().unwrap().disallowed
    }

    pub fn allowed_calls(&self) -> usize {
        self.log.lock().unwrap().allowed
    }

    pub fn closes(&self) -> usize {
        self.log.lock().unwrap().closes
    }
}

/// Scripted engine: two vehicles, a fixed number of steps with pending traffic.
#[derive(Clone)]
pub struct FakeEngine {
    steps_with_traffic: u64,
    taken: u64,
    failing_vehicle: Option<String>,
    failing_edge: Option<String>,
    failing_step: Option<u64>,
    log: Arc<Mutex<EngineLog>>,
}

impl FakeEngine {
    pub fn with_steps(steps_with_traffic: u64) -> Self {
        Self {
            steps_with_traffic,
            taken: 0,
            failing_vehicle: None,
            failing_edge: None,
            failing_step: None,
            log: Arc::default(),
        }
    }

    /// Adds a listed vehicle whose queries fail.
    pub fn failing_vehicle(mut self, id: &str) -> Self {
        self.failing_vehicle = Some(id.to_string());
        self
    }

    pub fn failing_edge(mut self, id: &str) -> Self {
        self.failing_edge = Some(id.to_string());
        self
    }

    /// The `n`-th step call (1-based) fails.
    pub fn failing_step_at(mut self, n: u64) -> Self {
        self.failing_step = Some(n);
        self
    }

    pub fn probe(&self) -> EngineProbe {
        EngineProbe {
            log: Arc::clone(&self.log),
        }
    }

    fn edge_call(&self, edge: &str) -> SessionResult<()> {
        if self.failing_edge.as_deref() == Some(edge) {
            return Err(SessionError::Engine(format!("Edge '{edge}' is not known")));
        }
        Ok(())
    }
}

#[async_trait]
impl SimulationEngine for FakeEngine {
    async fn simulation_step(&mut self) -> SessionResult<()> {
        self.taken += 1;
        self.log.lock().unwrap().steps += 1;
        if self.failing_step == Some(self.taken) {
            return Err(SessionError::Engine("connection reset by engine".into()));
        }
        Ok(())
    }

    async fn min_expected_number(&mut self) -> SessionResult<i32> {
        Ok(self.steps_with_traffic.saturating_sub(self.taken) as i32)
    }

    async fn vehicle_ids(&mut self) -> SessionResult<Vec<String>> {
        let mut ids = vec!["passenger0".to_string(), "bus1".to_string()];
        ids.extend(self.failing_vehicle.clone());
        Ok(ids)
    }

    async fn vehicle_state(&mut self, id: &str) -> SessionResult<VehicleState> {
        let (position, speed, vehicle_type, angle) = match id {
            "passenger0" => ((812.5, 1_204.25), 10.0, "passenger", 90.0),
            "bus1" => ((900.0, 1_300.0), 5.0, "bus", 180.0),
            _ => {
                return Err(SessionError::EntityQuery {
                    id: id.to_string(),
                    reason: "vehicle is not known".into(),
                })
            }
        };
        Ok(VehicleState {
            position,
            speed,
            vehicle_type: vehicle_type.to_string(),
            angle,
        })
    }

    async fn set_edge_disallowed(&mut self, edge: &str, _classes: &[String]) -> SessionResult<()> {
        self.log.lock().unwrap().disallowed += 1;
        self.edge_call(edge)
    }

    async fn set_edge_allowed(&mut self, edge: &str, _classes: &[String]) -> SessionResult<()> {
        self.log.lock().unwrap().allowed += 1;
        self.edge_call(edge)
    }

    async fn close(&mut self) -> SessionResult<()> {
        self.log.lock().unwrap().closes += 1;
        Ok(())
    }
}

/// Hands out fresh copies of a template engine and records each invocation.
#[derive(Clone)]
pub struct FakeLauncher {
    template: FakeEngine,
    invocations: Arc<Mutex<Vec<EngineInvocation>>>,
}

impl FakeLauncher {
    pub fn new(template: FakeEngine) -> Self {
        Self {
            template,
            invocations: Arc::default(),
        }
    }

    pub fn launches(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }

    pub fn last_invocation(&self) -> Option<EngineInvocation> {
        self.invocations.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl EngineLauncher for FakeLauncher {
    type Engine = FakeEngine;

    async fn launch(&self, invocation: &EngineInvocation) -> SessionResult<FakeEngine> {
        self.invocations.lock().unwrap().push(invocation.clone());
        Ok(self.template.clone())
    }
}

/// Collects events; optionally fails every send after the first `n`.
#[derive(Default)]
pub struct RecordingSink {
    events: Vec<TelemetryEvent>,
    disconnect_after: Option<usize>,
}

impl RecordingSink {
    pub fn disconnecting_after(n: usize) -> Self {
        Self {
            events: Vec::new(),
            disconnect_after: Some(n),
        }
    }

    pub fn events(&self) -> &[TelemetryEvent] {
        &self.events
    }
}

#[async_trait]
impl TelemetrySink for RecordingSink {
    async fn send(&mut self, event: &TelemetryEvent) -> SessionResult<()> {
        if self.disconnect_after.is_some_and(|n| self.events.len() >= n) {
            return Err(SessionError::Transport("observer closed the connection".into()));
        }
        self.events.push(event.clone());
        Ok(())
    }
}
