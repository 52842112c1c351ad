use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;
use trafficcore::generation::{GenerationPipeline, ProcessRunner};
use trafficcore::prelude::{SessionError, SessionResult, TelemetrySink, ValidationError};
use trafficcore::scenario_interface::{ProgressEvent, ScenarioRequest, TelemetryEvent};
use trafficcore::session::{
    ControlChannel, RunOutcome, SimulationSession, SumoLauncher, TelemetryStreamer,
};
use trafficcore::settings::ScenarioSettings;

/// Entry point shared by the HTTP bridge and the offline modes.
#[derive(Clone)]
pub struct Runner {
    settings: Arc<ScenarioSettings>,
    /// Runs share the fixed artifact names in `data_dir`.
    generation_gate: Arc<Mutex<()>>,
    simulation_gate: Arc<Mutex<()>>,
}

impl Runner {
    pub fn new(settings: ScenarioSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            generation_gate: Arc::new(Mutex::new(())),
            simulation_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn settings(&self) -> &ScenarioSettings {
        &self.settings
    }

    /// Validates `request` and returns its lazy progress stream. The stream
    /// waits for any earlier generation to finish before its first stage.
    pub fn generate(
        &self,
        request: ScenarioRequest,
    ) -> Result<BoxStream<'static, ProgressEvent>, ValidationError> {
        request.validate()?;
        info!(
            "generating scenario: {} enabled classes, {} s",
            request.enabled_classes().count(),
            request.duration
        );
        let pipeline = GenerationPipeline::new(request, (*self.settings).clone(), ProcessRunner);
        let gate = Arc::clone(&self.generation_gate);
        let events = stream::once(async move {
            let guard = gate.lock_owned().await;
            pipeline.generate().map(move |event| {
                let _held = &guard;
                event
            })
        })
        .flatten();
        Ok(events.boxed())
    }

    /// Runs one simulation on the current scenario; one run per process at a time.
    pub async fn simulate<S>(
        &self,
        duration: u64,
        sink: &mut S,
        mut control: ControlChannel,
    ) -> SessionResult<RunOutcome>
    where
        S: TelemetrySink + ?Sized,
    {
        if duration == 0 {
            let err = SessionError::from(ValidationError::InvalidDuration(0));
            report(sink, &err).await;
            return Err(err);
        }
        let Ok(_gate) = self.simulation_gate.try_lock() else {
            warn!("rejecting simulation request: another run is active");
            report(sink, &SessionError::Busy).await;
            return Err(SessionError::Busy);
        };

        let session = match SimulationSession::open(&self.settings, SumoLauncher).await {
            Ok(session) => session,
            Err(err) => {
                report(sink, &err).await;
                return Err(err);
            }
        };
        let streamer = TelemetryStreamer::new(
            Arc::new(Mutex::new(session)),
            self.settings.engine.control_timeout(),
        );
        streamer.run(duration, sink, &mut control).await
    }
}

/// Sink for offline runs: every event goes to the log.
#[derive(Debug, Default)]
pub struct LogSink {
    frames: u64,
}

impl LogSink {
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

#[async_trait]
impl TelemetrySink for LogSink {
    async fn send(&mut self, event: &TelemetryEvent) -> SessionResult<()> {
        match event {
            TelemetryEvent::VehiclePositions(frame) => {
                self.frames += 1;
                info!(
                    "step {} ({}%): {} vehicles, average {:.2} km/h",
                    frame.step_index, frame.progress, frame.vehicle_count, frame.average_speed
                );
            }
            TelemetryEvent::SimulationComplete => info!("simulation complete"),
            TelemetryEvent::Error { message } => warn!("simulation error: {message}"),
        }
        Ok(())
    }
}

async fn report<S: TelemetrySink + ?Sized>(sink: &mut S, err: &SessionError) {
    warn!("simulation not started: {err}");
    if let Err(send_err) = sink.send(&TelemetryEvent::error(err.to_string())).await {
        warn!("could not report to observer: {send_err}");
    }
}
