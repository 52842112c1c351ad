use crate::generation::artifacts::{ArtifactNamer, ArtifactUse};
use crate::prelude::{StageError, ToolCommand};
use crate::scenario_interface::{VehicleClass, VehicleClassConfig};
use crate::settings::ToolPaths;
use std::path::{Path, PathBuf};

/// Trip and route file pair for one vehicle class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRoutes {
    pub class: VehicleClass,
    pub trips: PathBuf,
    pub routes: PathBuf,
}

impl ClassRoutes {
    pub fn named(namer: &mut ArtifactNamer, class: VehicleClass) -> Self {
        let trips = namer.name(ArtifactUse::Trips(class), &format!(".{class}.trips.xml"), true);
        let routes = namer.name(ArtifactUse::Routes(class), &format!(".{class}.rou.xml"), true);
        Self {
            class,
            trips,
            routes,
        }
    }

    /// Random-trip generator invocation; entity ids are prefixed with the class.
    pub fn command(
        &self,
        tools: &ToolPaths,
        net: &Path,
        duration: i64,
        settings: &VehicleClassConfig,
    ) -> ToolCommand {
        let class = self.class.as_str();
        ToolCommand::new(&tools.python)
            .arg(tools.tool_script("randomTrips.py").to_string_lossy())
            .arg("-n")
            .arg(net.to_string_lossy())
            .arg("-o")
            .arg(self.trips.to_string_lossy())
            .arg("-r")
            .arg(self.routes.to_string_lossy())
            .args(["-b".to_string(), "0".to_string()])
            .args(["-e".to_string(), duration.to_string()])
            .args(["--fringe-factor".to_string(), settings.fringe_factor.to_string()])
            .args(["--vehicle-class", class])
            .arg("--validate")
            .args(["--insertion-density".to_string(), settings.count.to_string()])
            .args(["--prefix", class])
    }
}

/// A class whose route generation was skipped.
#[derive(Debug)]
pub struct RouteFailure {
    pub class: VehicleClass,
    pub error: StageError,
}

/// Successes and per-class failures of the route stage.
#[derive(Debug, Default)]
pub struct RouteAccumulator {
    succeeded: Vec<ClassRoutes>,
    failed: Vec<RouteFailure>,
}

impl RouteAccumulator {
    pub fn record_success(&mut self, routes: ClassRoutes) {
        self.succeeded.push(routes);
    }

    pub fn record_failure(&mut self, class: VehicleClass, error: StageError) {
        self.failed.push(RouteFailure { class, error });
    }

    pub fn succeeded(&self) -> &[ClassRoutes] {
        &self.succeeded
    }

    pub fn failed(&self) -> &[RouteFailure] {
        &self.failed
    }

    /// Some classes failed while at least one succeeded.
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty() && !self.succeeded.is_empty()
    }

    pub fn route_files(&self) -> impl Iterator<Item = &Path> {
        self.succeeded.iter().map(|r| r.routes.as_path())
    }

    pub fn summary(&self) -> String {
        self.failed
            .iter()
            .map(|f| format!("{}: {}", f.class, f.error))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_carries_class_scoped_arguments() {
        let tools = ToolPaths {
            sumo_home: Some(PathBuf::from("/opt/sumo")),
            ..Default::default()
        };
        let mut namer = ArtifactNamer::new("/data", "osm");
        let routes = ClassRoutes::named(&mut namer, VehicleClass::Passenger);
        let cmd = routes.command(
            &tools,
            Path::new("/data/osm.net.xml.gz"),
            3600,
            &VehicleClassConfig::new(12.0, 5.0, true),
        );
        assert_eq!(cmd.program, "python3");
        assert_eq!(cmd.args[0], "/opt/sumo/tools/randomTrips.py");
        assert_eq!(cmd.flag_value("-o"), Some("/data/osm.passenger.trips.xml.gz"));
        assert_eq!(cmd.flag_value("-r"), Some("/data/osm.passenger.rou.xml"));
        assert_eq!(cmd.flag_value("-e"), Some("3600"));
        assert_eq!(cmd.flag_value("--insertion-density"), Some("12"));
        assert_eq!(cmd.flag_value("--fringe-factor"), Some("5"));
        assert_eq!(cmd.flag_value("--prefix"), Some("passenger"));
        assert!(cmd.args.iter().any(|a| a == "--validate"));
    }

    #[test]
    fn accumulator_reports_partial_results() {
        let mut namer = ArtifactNamer::new("/data", "osm");
        let mut acc = RouteAccumulator::default();
        acc.record_success(ClassRoutes::named(&mut namer, VehicleClass::Passenger));
        assert!(!acc.is_partial());
        acc.record_failure(
            VehicleClass::Bus,
            StageError::MissingArtifact(PathBuf::from("/data/osm.bus.rou.xml")),
        );
        assert!(acc.is_partial());
        assert_eq!(acc.route_files().count(), 1);
        assert!(acc.summary().starts_with("bus: "));
    }
}
