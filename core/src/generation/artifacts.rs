use crate::scenario_interface::VehicleClass;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

const COMPRESSED_EXTENSION: &str = ".gz";

/// Logical role of a generated file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactUse {
    NetConfig,
    Osm,
    Net,
    Poly,
    PtStops,
    PtLines,
    Trips(VehicleClass),
    Routes(VehicleClass),
    Config,
}

impl ArtifactUse {
    pub fn tag(&self) -> String {
        match self {
            ArtifactUse::NetConfig => "netccfg".into(),
            ArtifactUse::Osm => "osm".into(),
            ArtifactUse::Net => "net".into(),
            ArtifactUse::Poly => "poly".into(),
            ArtifactUse::PtStops => "ptstops".into(),
            ArtifactUse::PtLines => "ptlines".into(),
            ArtifactUse::Trips(class) => format!("{class}_trips"),
            ArtifactUse::Routes(class) => format!("{class}_routes"),
            ArtifactUse::Config => "config".into(),
        }
    }

    fn compressed(&self) -> bool {
        matches!(
            self,
            ArtifactUse::Net | ArtifactUse::Poly | ArtifactUse::Trips(_)
        )
    }
}

impl fmt::Display for ArtifactUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub absolute: PathBuf,
    /// File name relative to the output directory, as embedded in generated configs.
    pub relative: String,
}

/// Files named so far in one generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSet {
    entries: BTreeMap<ArtifactUse, Artifact>,
}

impl ArtifactSet {
    pub fn get(&self, artifact_use: ArtifactUse) -> Option<&Artifact> {
        self.entries.get(&artifact_use)
    }

    pub fn path(&self, artifact_use: ArtifactUse) -> Option<&Path> {
        self.get(artifact_use).map(|a| a.absolute.as_path())
    }

    pub fn relative(&self, artifact_use: ArtifactUse) -> Option<&str> {
        self.get(artifact_use).map(|a| a.relative.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ArtifactUse, &Artifact)> {
        self.entries.iter()
    }
}

/// Derives output names from a use tag, a suffix and the run prefix.
#[derive(Debug, Clone)]
pub struct ArtifactNamer {
    output_dir: PathBuf,
    prefix: String,
    artifacts: ArtifactSet,
}

impl ArtifactNamer {
    pub fn new(output_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            prefix: prefix.into(),
            artifacts: ArtifactSet::default(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Names the artifact for `artifact_use` and records it; returns the absolute path.
    pub fn name(&mut self, artifact_use: ArtifactUse, suffix: &str, use_prefix: bool) -> PathBuf {
        let mut relative = if use_prefix {
            format!("{}{}", self.prefix, suffix)
        } else {
            suffix.to_string()
        };
        if artifact_use.compressed() {
            relative.push_str(COMPRESSED_EXTENSION);
        }
        let absolute = self.output_dir.join(&relative);
        self.artifacts.entries.insert(
            artifact_use,
            Artifact {
                absolute: absolute.clone(),
                relative,
            },
        );
        absolute
    }

    pub fn artifacts(&self) -> &ArtifactSet {
        &self.artifacts
    }
}
