use crate::geometry::GeometryLimits;
use crate::math::projection::UtmProjection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Where the external toolchain lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub sumo_home: Option<PathBuf>,
    pub python: String,
    pub netconvert: Option<String>,
    pub polyconvert: Option<String>,
    pub sumo: Option<String>,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            sumo_home: None,
            python: "python3".into(),
            netconvert: None,
            polyconvert: None,
            sumo: None,
        }
    }
}

impl ToolPaths {
    fn resolve_binary(&self, configured: &Option<String>, name: &str) -> String {
        if let Some(path) = configured.as_ref().filter(|p| !p.is_empty()) {
            return path.clone();
        }
        if let Some(home) = &self.sumo_home {
            let candidate = home.join("bin").join(name);
            if candidate.is_file() {
                return candidate.to_string_lossy().into_owned();
            }
        }
        name.to_string()
    }

    pub fn netconvert(&self) -> String {
        self.resolve_binary(&self.netconvert, "netconvert")
    }

    pub fn polyconvert(&self) -> String {
        self.resolve_binary(&self.polyconvert, "polyconvert")
    }

    pub fn sumo(&self) -> String {
        self.resolve_binary(&self.sumo, "sumo")
    }

    /// Python helper shipped under `$SUMO_HOME/tools`.
    pub fn tool_script(&self, name: &str) -> PathBuf {
        match &self.sumo_home {
            Some(home) => home.join("tools").join(name),
            None => PathBuf::from(name),
        }
    }

    pub fn typemap(&self, name: &str) -> PathBuf {
        match &self.sumo_home {
            Some(home) => home.join("data").join("typemap").join(name),
            None => PathBuf::from(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub prefix: String,
    pub time_to_teleport: i64,
    pub rerouting_adaptation_interval: u32,
    pub rerouting_adaptation_steps: u32,
    pub car_only_classes: Vec<String>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            prefix: "osm".into(),
            time_to_teleport: 1,
            rerouting_adaptation_interval: 10,
            rerouting_adaptation_steps: 18,
            car_only_classes: ["passenger", "bus", "delivery", "truck"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub waiting_time_memory: u32,
    pub time_to_teleport: i64,
    pub rerouting_mode: u32,
    pub rerouting_probability: f64,
    pub car_follow_model: String,
    pub connect_retries: u32,
    pub connect_retry_delay_ms: u64,
    pub control_timeout_ms: u64,
    /// Classes toggled on restricted edges by the motorway-ramp switch.
    pub restricted_classes: Vec<String>,
    /// Used when the network carries no usable `projParameter`.
    pub fallback_projection: UtmProjection,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            waiting_time_memory: 100,
            time_to_teleport: 1,
            rerouting_mode: 8,
            rerouting_probability: 1.0,
            car_follow_model: "EIDM".into(),
            connect_retries: 50,
            connect_retry_delay_ms: 100,
            control_timeout_ms: 100,
            restricted_classes: ["passenger", "truck", "bus", "motorcycle", "bicycle"]
                .into_iter()
                .map(String::from)
                .collect(),
            fallback_projection: UtmProjection::default(),
        }
    }
}

impl EngineSettings {
    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }
}

/// Everything one generation run or session needs to know about its environment.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScenarioSettings {
    pub data_dir: PathBuf,
    pub tools: ToolPaths,
    pub geometry: GeometryLimits,
    pub generation: GenerationSettings,
    pub engine: EngineSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_resolve_under_sumo_home() {
        let tools = ToolPaths {
            sumo_home: Some(PathBuf::from("/opt/sumo")),
            ..Default::default()
        };
        assert_eq!(
            tools.tool_script("osmGet.py"),
            PathBuf::from("/opt/sumo/tools/osmGet.py")
        );
        assert_eq!(
            tools.typemap("osmNetconvert.typ.xml"),
            PathBuf::from("/opt/sumo/data/typemap/osmNetconvert.typ.xml")
        );
    }

    #[test]
    fn binaries_fall_back_to_path_lookup() {
        let tools = ToolPaths {
            sumo_home: Some(PathBuf::from("/nonexistent/sumo")),
            sumo: Some("/usr/local/bin/sumo".into()),
            ..Default::default()
        };
        assert_eq!(tools.netconvert(), "netconvert");
        assert_eq!(tools.sumo(), "/usr/local/bin/sumo");
    }

    #[test]
    fn teleport_threshold_is_shared_by_default() {
        assert_eq!(
            GenerationSettings::default().time_to_teleport,
            EngineSettings::default().time_to_teleport
        );
    }
}
