use crate::generation::artifacts::{ArtifactNamer, ArtifactSet, ArtifactUse};
use crate::generation::netconvert::{edge_type_filter, NetconvertConfig};
use crate::generation::routes::{ClassRoutes, RouteAccumulator, RouteFailure};
use crate::generation::sumocfg::RunConfig;
use crate::geometry::{BoundingBox, GeometryResolver};
use crate::prelude::{StageError, StageResult, ToolCommand, ToolRunner};
use crate::scenario_interface::{ProgressEvent, ScenarioRequest};
use crate::settings::ScenarioSettings;
use futures::stream::{self, Stream, StreamExt};
use log::{error, info, warn};
use std::fmt;
use std::path::{Path, PathBuf};

const NETCONVERT_TYPEMAP: &str = "osmNetconvert.typ.xml";
const POLYCONVERT_TYPEMAP: &str = "osmPolyconvert.typ.xml";

/// Position of a generation run; `Done` and `Failed` absorb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    ResolvingArea,
    Extracting,
    ConvertingNetwork,
    GeneratingRoutes,
    WritingConfig,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    fn next(&self) -> PipelineState {
        match self {
            PipelineState::ResolvingArea => PipelineState::Extracting,
            PipelineState::Extracting => PipelineState::ConvertingNetwork,
            PipelineState::ConvertingNetwork => PipelineState::GeneratingRoutes,
            PipelineState::GeneratingRoutes => PipelineState::WritingConfig,
            PipelineState::WritingConfig | PipelineState::Done => PipelineState::Done,
            PipelineState::Failed => PipelineState::Failed,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::ResolvingArea => "area resolution",
            PipelineState::Extracting => "map extraction",
            PipelineState::ConvertingNetwork => "network conversion",
            PipelineState::GeneratingRoutes => "route generation",
            PipelineState::WritingConfig => "configuration",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Turns one scenario request into the artifacts a simulation session consumes.
pub struct GenerationPipeline<R> {
    request: ScenarioRequest,
    settings: ScenarioSettings,
    runner: R,
    state: PipelineState,
    namer: ArtifactNamer,
    bounds: Option<BoundingBox>,
    additional_files: Vec<ArtifactUse>,
    routes: RouteAccumulator,
    produced: Vec<PathBuf>,
}

impl<R: ToolRunner> GenerationPipeline<R> {
    pub fn new(request: ScenarioRequest, settings: ScenarioSettings, runner: R) -> Self {
        let namer = ArtifactNamer::new(&settings.data_dir, &settings.generation.prefix);
        Self {
            request,
            settings,
            runner,
            state: PipelineState::ResolvingArea,
            namer,
            bounds: None,
            additional_files: Vec::new(),
            routes: RouteAccumulator::default(),
            produced: Vec::new(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn bounds(&self) -> Option<BoundingBox> {
        self.bounds
    }

    pub fn artifacts(&self) -> &ArtifactSet {
        self.namer.artifacts()
    }

    /// Network, run configuration, then route files; filled once the run is done.
    pub fn produced_files(&self) -> &[PathBuf] {
        &self.produced
    }

    pub fn route_failures(&self) -> &[RouteFailure] {
        self.routes.failed()
    }

    /// Runs the current stage and returns the events it emits.
    pub async fn step(&mut self) -> Vec<ProgressEvent> {
        let stage = self.state;
        let outcome = match stage {
            PipelineState::ResolvingArea => self.resolve_area(),
            PipelineState::Extracting => self.extract().await,
            PipelineState::ConvertingNetwork => self.convert_network().await,
            PipelineState::GeneratingRoutes => self.generate_routes().await,
            PipelineState::WritingConfig => self.write_config().await,
            PipelineState::Done | PipelineState::Failed => return Vec::new(),
        };
        match outcome {
            Ok(events) => {
                info!("{stage} finished");
                self.state = stage.next();
                events
            }
            Err(err) => {
                error!("{stage} failed: {err}");
                self.state = PipelineState::Failed;
                vec![ProgressEvent::failure(format!("Error: {err}"))]
            }
        }
    }

    /// Drives every remaining stage, collecting the emitted events.
    pub async fn run(&mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while !self.state.is_terminal() {
            events.extend(self.step().await);
        }
        events
    }

    /// Lazy event sequence; each poll past the buffered events advances one stage.
    pub fn generate(self) -> impl Stream<Item = ProgressEvent> {
        stream::unfold(self, |mut pipeline| async move {
            if pipeline.state.is_terminal() {
                return None;
            }
            let events = pipeline.step().await;
            Some((stream::iter(events), pipeline))
        })
        .flatten()
    }

    fn resolve_area(&mut self) -> StageResult<Vec<ProgressEvent>> {
        let bounds = GeometryResolver::new(self.settings.geometry).resolve_request(&self.request)?;
        info!("resolved area {bounds}");
        self.bounds = Some(bounds);
        Ok(vec![ProgressEvent::new(10, "Area resolved, downloading map data...")])
    }

    async fn extract(&mut self) -> StageResult<Vec<ProgressEvent>> {
        let bounds = self
            .bounds
            .ok_or_else(|| StageError::NoArtifacts("area was not resolved".into()))?;
        let dir = self.namer.output_dir().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StageError::Io {
                context: format!("creating {}", dir.display()),
                source,
            })?;

        let osm = self.namer.name(ArtifactUse::Osm, "_bbox.osm.xml.gz", true);
        let tools = &self.settings.tools;
        let command = ToolCommand::new(&tools.python)
            .arg(tools.tool_script("osmGet.py").to_string_lossy())
            .args(["-b".to_string(), bounds.to_arg()])
            .args(["-p", self.namer.prefix()])
            .arg("-d")
            .arg(dir.to_string_lossy())
            .arg("-z")
            .current_dir(&dir);
        remove_stale(&osm).await?;
        self.runner.run(&command).await?;

        if !exists(&osm).await {
            return Err(StageError::ExtractionFailed(osm));
        }
        Ok(vec![
            ProgressEvent::new(30, "Map data downloaded"),
            ProgressEvent::new(50, "Map data saved"),
            ProgressEvent::new(60, "Converting road network..."),
        ])
    }

    async fn convert_network(&mut self) -> StageResult<Vec<ProgressEvent>> {
        let options = self.request.options;
        let netccfg = self.namer.name(ArtifactUse::NetConfig, ".netccfg", true);
        let net = self.namer.name(ArtifactUse::Net, ".net.xml", true);
        let osm = self
            .namer
            .artifacts()
            .path(ArtifactUse::Osm)
            .map(Path::to_path_buf)
            .ok_or_else(|| StageError::NoArtifacts("map extract was not named".into()))?;
        let (ptstops, ptlines) = if options.public_transport {
            (
                Some(self.namer.name(ArtifactUse::PtStops, "_ptstops.add.xml", true)),
                Some(self.namer.name(ArtifactUse::PtLines, "_ptlines.xml", true)),
            )
        } else {
            (None, None)
        };

        let type_map = self.settings.tools.typemap(NETCONVERT_TYPEMAP);
        let document = NetconvertConfig {
            type_map: &type_map,
            osm_file: &osm,
            output_file: &net,
            keep_edge_types: edge_type_filter(&self.request.road_types),
            keep_vclasses: options
                .car_only_network
                .then(|| self.settings.generation.car_only_classes.join(",")),
            options,
            ptstop_output: ptstops.as_deref(),
            ptline_output: ptlines.as_deref(),
        }
        .render();
        write_file(&netccfg, &document).await?;
        for output in [Some(&net), ptstops.as_ref(), ptlines.as_ref()].into_iter().flatten() {
            remove_stale(output).await?;
        }

        let command = ToolCommand::new(self.settings.tools.netconvert())
            .arg("-c")
            .arg(netccfg.to_string_lossy())
            .current_dir(self.namer.output_dir());
        self.runner.run(&command).await?;
        if !exists(&net).await {
            return Err(StageError::MissingArtifact(net));
        }

        if options.polygons {
            self.convert_polygons(&net, &osm).await;
        }
        if let Some(stops) = &ptstops {
            if exists(stops).await {
                self.additional_files.push(ArtifactUse::PtStops);
            } else {
                warn!("no public transport stops were produced");
            }
        }

        Ok(vec![
            ProgressEvent::new(70, "Road network converted"),
            ProgressEvent::new(80, "Generating vehicle routes..."),
        ])
    }

    /// Optional; a failure leaves the scenario without polygons.
    async fn convert_polygons(&mut self, net: &Path, osm: &Path) {
        let poly = self.namer.name(ArtifactUse::Poly, ".poly.xml", true);
        let command = ToolCommand::new(self.settings.tools.polyconvert())
            .arg("--net-file")
            .arg(net.to_string_lossy())
            .arg("--osm-files")
            .arg(osm.to_string_lossy())
            .arg("--type-file")
            .arg(self.settings.tools.typemap(POLYCONVERT_TYPEMAP).to_string_lossy())
            .arg("-o")
            .arg(poly.to_string_lossy())
            .current_dir(self.namer.output_dir());
        if let Err(err) = remove_stale(&poly).await {
            warn!("skipping polygons: {err}");
            return;
        }
        match self.runner.run(&command).await {
            Ok(_) if exists(&poly).await => self.additional_files.push(ArtifactUse::Poly),
            Ok(_) => warn!("polygon conversion produced no {}", poly.display()),
            Err(err) => warn!("skipping polygons: {err}"),
        }
    }

    async fn generate_routes(&mut self) -> StageResult<Vec<ProgressEvent>> {
        let enabled: Vec<_> = self
            .request
            .enabled_classes()
            .map(|(class, settings)| (class, settings.clone()))
            .collect();
        if enabled.is_empty() {
            return Err(StageError::NoArtifacts("no vehicle classes enabled".into()));
        }
        let net = self
            .namer
            .artifacts()
            .path(ArtifactUse::Net)
            .map(Path::to_path_buf)
            .ok_or_else(|| StageError::NoArtifacts("network was not named".into()))?;

        for (class, settings) in &enabled {
            let routes = ClassRoutes::named(&mut self.namer, *class);
            let command = routes
                .command(&self.settings.tools, &net, self.request.duration, settings)
                .current_dir(self.namer.output_dir());
            let result = match clear_outputs(&routes).await {
                Ok(()) => self.run_class(&command, &routes).await,
                Err(err) => Err(err),
            };
            match result {
                Ok(()) => {
                    info!("generated routes for {class}");
                    self.routes.record_success(routes);
                }
                Err(err) => {
                    warn!("skipping vehicle class {class}: {err}");
                    self.routes.record_failure(*class, err);
                }
            }
        }

        let generated = self.routes.succeeded().len();
        if generated == 0 {
            return Err(StageError::NoArtifacts(format!(
                "route generation failed for every class ({})",
                self.routes.summary()
            )));
        }
        Ok(vec![
            ProgressEvent::new(
                90,
                format!("Routes generated for {generated} of {} classes", enabled.len()),
            ),
            ProgressEvent::new(95, "Writing simulation configuration..."),
        ])
    }

    /// A class counts only when both its trips and routes files appear.
    async fn run_class(&self, command: &ToolCommand, routes: &ClassRoutes) -> StageResult<()> {
        self.runner.run(command).await?;
        for output in [&routes.trips, &routes.routes] {
            if !exists(output).await {
                return Err(StageError::MissingArtifact(output.clone()));
            }
        }
        Ok(())
    }

    async fn write_config(&mut self) -> StageResult<Vec<ProgressEvent>> {
        let config = self.namer.name(ArtifactUse::Config, ".sumocfg", true);
        let artifacts = self.namer.artifacts();
        let net_file = artifacts
            .relative(ArtifactUse::Net)
            .ok_or_else(|| StageError::NoArtifacts("network was not named".into()))?;
        let route_files = self
            .routes
            .succeeded()
            .iter()
            .filter_map(|r| artifacts.relative(ArtifactUse::Routes(r.class)))
            .collect();
        let additional_files = self
            .additional_files
            .iter()
            .filter_map(|u| artifacts.relative(*u))
            .collect();
        let document = RunConfig {
            net_file,
            route_files,
            additional_files,
            settings: &self.settings.generation,
        }
        .render()?;
        write_file(&config, &document).await?;

        let net = artifacts
            .path(ArtifactUse::Net)
            .map(Path::to_path_buf)
            .ok_or_else(|| StageError::NoArtifacts("network was not named".into()))?;
        self.produced = vec![net, config];
        self.produced
            .extend(self.routes.route_files().map(Path::to_path_buf));
        if self.routes.is_partial() {
            warn!("scenario generated without: {}", self.routes.summary());
        }
        Ok(vec![ProgressEvent::complete()])
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

/// Outputs left by an earlier run would satisfy the existence checks.
async fn remove_stale(path: &Path) -> StageResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StageError::Io {
            context: format!("removing stale {}", path.display()),
            source,
        }),
    }
}

async fn clear_outputs(routes: &ClassRoutes) -> StageResult<()> {
    remove_stale(&routes.trips).await?;
    remove_stale(&routes.routes).await
}

async fn write_file(path: &Path, contents: &str) -> StageResult<()> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|source| StageError::Io {
            context: format!("writing {}", path.display()),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario_interface::{
        AreaCoordinates, ScenarioOptions, VehicleClass, VehicleClassConfig,
    };
    use crate::test_support::FakeToolRunner;
    use std::collections::BTreeMap;

    fn seoul_request(classes: &[(VehicleClass, bool)]) -> ScenarioRequest {
        let vehicles: BTreeMap<_, _> = classes
            .iter()
            .map(|(class, enabled)| (*class, VehicleClassConfig::new(12.0, 5.0, *enabled)))
            .collect();
        ScenarioRequest {
            coordinates: AreaCoordinates::Center {
                lat: 37.5665,
                lng: 126.978,
            },
            radius: Some(1000.0),
            duration: 3600,
            vehicles,
            road_types: BTreeMap::new(),
            options: ScenarioOptions::default(),
            selected_area: None,
        }
    }

    fn settings_in(dir: &Path) -> ScenarioSettings {
        ScenarioSettings {
            data_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    fn percents(events: &[ProgressEvent]) -> Vec<i32> {
        events.iter().map(|e| e.progress).collect()
    }

    #[tokio::test]
    async fn single_class_run_reports_every_milestone() {
        let dir = tempfile::tempdir().unwrap();
        let request = seoul_request(&[(VehicleClass::Passenger, true)]);
        let pipeline =
            GenerationPipeline::new(request, settings_in(dir.path()), FakeToolRunner::new());
        let events: Vec<_> = pipeline.generate().collect().await;
        assert_eq!(percents(&events), vec![10, 30, 50, 60, 70, 80, 90, 95, 100]);
        assert_eq!(events.last().unwrap().message, "Generation complete!");
        assert!(dir.path().join("osm.sumocfg").is_file());
        assert!(dir.path().join("osm.netccfg").is_file());
    }

    #[tokio::test]
    async fn produced_files_list_network_config_and_routes() {
        let dir = tempfile::tempdir().unwrap();
        let request = seoul_request(&[(VehicleClass::Passenger, true), (VehicleClass::Bus, false)]);
        let mut pipeline =
            GenerationPipeline::new(request, settings_in(dir.path()), FakeToolRunner::new());
        pipeline.run().await;
        assert_eq!(pipeline.state(), PipelineState::Done);
        assert_eq!(
            pipeline.produced_files(),
            &[
                dir.path().join("osm.net.xml.gz"),
                dir.path().join("osm.sumocfg"),
                dir.path().join("osm.passenger.rou.xml"),
            ]
        );
        assert!(pipeline.artifacts().get(ArtifactUse::Routes(VehicleClass::Bus)).is_none());
    }

    #[tokio::test]
    async fn zero_enabled_classes_fail_before_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let request = seoul_request(&[(VehicleClass::Truck, false)]);
        let mut pipeline =
            GenerationPipeline::new(request, settings_in(dir.path()), FakeToolRunner::new());
        let events = pipeline.run().await;
        assert_eq!(percents(&events), vec![10, 30, 50, 60, 70, 80, 0]);
        assert!(events.last().unwrap().message.contains("no vehicle classes enabled"));
        assert_eq!(pipeline.state(), PipelineState::Failed);
        assert!(!dir.path().join("osm.sumocfg").exists());
        assert!(pipeline.step().await.is_empty());
    }

    #[tokio::test]
    async fn one_failing_class_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let request = seoul_request(&[
            (VehicleClass::Passenger, true),
            (VehicleClass::Truck, true),
            (VehicleClass::Bus, true),
        ]);
        let runner = FakeToolRunner::new().failing_class(VehicleClass::Truck);
        let mut pipeline = GenerationPipeline::new(request, settings_in(dir.path()), runner);
        let events = pipeline.run().await;
        assert_eq!(events.last().unwrap().progress, 100);
        let routes: Vec<_> = pipeline.produced_files()[2..].to_vec();
        assert_eq!(
            routes,
            vec![
                dir.path().join("osm.passenger.rou.xml"),
                dir.path().join("osm.bus.rou.xml"),
            ]
        );
        assert_eq!(pipeline.route_failures().len(), 1);
        assert_eq!(pipeline.route_failures()[0].class, VehicleClass::Truck);
        let config = std::fs::read_to_string(dir.path().join("osm.sumocfg")).unwrap();
        assert!(config.contains(r#"<route-files value="osm.passenger.rou.xml,osm.bus.rou.xml"/>"#));
    }

    #[tokio::test]
    async fn missing_extract_fails_despite_clean_exit() {
        let dir = tempfile::tempdir().unwrap();
        let request = seoul_request(&[(VehicleClass::Passenger, true)]);
        let runner = FakeToolRunner::new().without_outputs_for("osmGet.py");
        let mut pipeline = GenerationPipeline::new(request, settings_in(dir.path()), runner);
        let events = pipeline.run().await;
        assert_eq!(percents(&events), vec![10, 0]);
        assert!(events[1].message.contains("map extraction did not produce"));
    }

    #[tokio::test]
    async fn outputs_of_an_earlier_run_do_not_count() {
        let dir = tempfile::tempdir().unwrap();
        let request = seoul_request(&[(VehicleClass::Passenger, true)]);
        let mut first =
            GenerationPipeline::new(request.clone(), settings_in(dir.path()), FakeToolRunner::new());
        assert_eq!(first.run().await.last().unwrap().progress, 100);

        for (tool, expected) in [
            ("osmGet.py", vec![10, 0]),
            ("netconvert", vec![10, 30, 50, 60, 0]),
            ("randomTrips.py", vec![10, 30, 50, 60, 70, 80, 0]),
        ] {
            let runner = FakeToolRunner::new().without_outputs_for(tool);
            let mut rerun = GenerationPipeline::new(request.clone(), settings_in(dir.path()), runner);
            let events = rerun.run().await;
            assert_eq!(percents(&events), expected, "silent {tool}");
            assert_eq!(rerun.state(), PipelineState::Failed);
        }
    }

    #[tokio::test]
    async fn class_without_trips_file_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let request = seoul_request(&[(VehicleClass::Passenger, true), (VehicleClass::Bus, true)]);
        let runner = FakeToolRunner::new().without_trips_for(VehicleClass::Bus);
        let mut pipeline = GenerationPipeline::new(request, settings_in(dir.path()), runner);
        let events = pipeline.run().await;
        assert_eq!(events.last().unwrap().progress, 100);
        assert_eq!(pipeline.route_failures().len(), 1);
        assert_eq!(pipeline.route_failures()[0].class, VehicleClass::Bus);
        assert!(matches!(
            pipeline.route_failures()[0].error,
            StageError::MissingArtifact(ref path) if path.ends_with("osm.bus.trips.xml.gz")
        ));
    }

    #[tokio::test]
    async fn converter_exit_code_aborts_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let request = seoul_request(&[(VehicleClass::Passenger, true)]);
        let runner = FakeToolRunner::new().failing_program("netconvert");
        let mut pipeline = GenerationPipeline::new(request, settings_in(dir.path()), runner.clone());
        let events = pipeline.run().await;
        assert_eq!(percents(&events), vec![10, 30, 50, 60, 0]);
        assert!(!runner.commands().iter().any(|c| c.to_string().contains("randomTrips.py")));
    }

    #[tokio::test]
    async fn tiny_area_is_rejected_before_any_tool_runs() {
        let dir = tempfile::tempdir().unwrap();
        let mut request = seoul_request(&[(VehicleClass::Passenger, true)]);
        request.radius = Some(10.0);
        let runner = FakeToolRunner::new();
        let mut pipeline = GenerationPipeline::new(request, settings_in(dir.path()), runner.clone());
        let events = pipeline.run().await;
        assert_eq!(percents(&events), vec![0]);
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn optional_outputs_become_additional_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut request = seoul_request(&[(VehicleClass::Passenger, true)]);
        request.options = ScenarioOptions {
            polygons: true,
            public_transport: true,
            car_only_network: true,
            left_hand: false,
        };
        let mut pipeline =
            GenerationPipeline::new(request, settings_in(dir.path()), FakeToolRunner::new());
        pipeline.run().await;
        let config = std::fs::read_to_string(dir.path().join("osm.sumocfg")).unwrap();
        assert!(config.contains(r#"<additional-files value="osm.poly.xml.gz,osm_ptstops.add.xml"/>"#));
        let netccfg = std::fs::read_to_string(dir.path().join("osm.netccfg")).unwrap();
        assert!(netccfg.contains("keep-edges.by-vclass"));
        assert!(netccfg.contains("ptstop-output"));
    }

    #[tokio::test]
    async fn polygon_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut request = seoul_request(&[(VehicleClass::Passenger, true)]);
        request.options.polygons = true;
        let runner = FakeToolRunner::new().failing_program("polyconvert");
        let mut pipeline = GenerationPipeline::new(request, settings_in(dir.path()), runner);
        let events = pipeline.run().await;
        assert_eq!(events.last().unwrap().progress, 100);
        let config = std::fs::read_to_string(dir.path().join("osm.sumocfg")).unwrap();
        assert!(!config.contains("additional-files"));
    }
}
