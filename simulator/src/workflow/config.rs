use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use trafficcore::geometry::GeometryLimits;
use trafficcore::settings::{EngineSettings, GenerationSettings, ScenarioSettings, ToolPaths};
use warp::http::Uri;

const SUMO_HOME_ENV: &str = "SUMO_HOME";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub data_dir: PathBuf,
    pub allowed_origins: Vec<String>,
    pub tools: ToolPaths,
    pub geometry: GeometryLimits,
    pub generation: GenerationSettings,
    pub engine: EngineSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".into(),
            data_dir: PathBuf::from("data"),
            allowed_origins: vec!["http://localhost:3000".into()],
            tools: ToolPaths::default(),
            geometry: GeometryLimits::default(),
            generation: GenerationSettings::default(),
            engine: EngineSettings::default(),
        }
    }
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading server config {}", path_ref.display()))?;
        let config: ServerConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing server config {}", path_ref.display()))?;
        config
            .validate_origins()
            .with_context(|| format!("checking server config {}", path_ref.display()))?;
        Ok(config)
    }

    /// Every allowed origin must be a bare `scheme://host[:port]`; the CORS
    /// layer cannot be built from anything else.
    pub fn validate_origins(&self) -> anyhow::Result<()> {
        for origin in &self.allowed_origins {
            check_origin(origin).with_context(|| format!("invalid CORS origin {origin:?}"))?;
        }
        Ok(())
    }

    pub fn from_args(data_dir: Option<PathBuf>, bind: Option<String>) -> Self {
        Self::default().with_overrides(data_dir, bind)
    }

    /// Command-line values win over the file.
    pub fn with_overrides(mut self, data_dir: Option<PathBuf>, bind: Option<String>) -> Self {
        if let Some(data_dir) = data_dir {
            self.data_dir = data_dir;
        }
        if let Some(bind) = bind {
            self.bind = bind;
        }
        self
    }

    /// Fills `tools.sumo_home` from the environment when the file leaves it unset.
    pub fn with_sumo_home(mut self, env_value: Option<String>) -> Self {
        if self.tools.sumo_home.is_none() {
            self.tools.sumo_home = env_value.filter(|v| !v.is_empty()).map(PathBuf::from);
        }
        self
    }

    pub fn with_env(self) -> Self {
        self.with_sumo_home(std::env::var(SUMO_HOME_ENV).ok())
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.bind
            .parse()
            .with_context(|| format!("invalid bind address {}", self.bind))
    }

    pub fn to_settings(&self) -> ScenarioSettings {
        ScenarioSettings {
            data_dir: self.data_dir.clone(),
            tools: self.tools.clone(),
            geometry: self.geometry,
            generation: self.generation.clone(),
            engine: self.engine.clone(),
        }
    }
}

fn check_origin(origin: &str) -> anyhow::Result<()> {
    let uri: Uri = origin.parse()?;
    let (Some(scheme), Some(authority)) = (uri.scheme_str(), uri.authority()) else {
        bail!("expected scheme://host[:port]");
    };
    if origin != format!("{scheme}://{authority}") {
        bail!("expected scheme://host[:port] with nothing after the port");
    }
    Ok(())
}
