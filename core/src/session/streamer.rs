use crate::math::stats::StatsHelper;
use crate::prelude::{EngineLauncher, SessionError, SessionResult, ValidationError};
use crate::scenario_interface::{EntitySnapshot, PositionsFrame, TelemetryEvent};
use crate::session::control::ControlChannel;
use crate::session::simulation::SimulationSession;
use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Outward half of the observer connection.
#[async_trait]
pub trait TelemetrySink: Send {
    /// Fails with [`SessionError::Transport`] once the observer is gone.
    async fn send(&mut self, event: &TelemetryEvent) -> SessionResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The engine ran out of vehicles or the duration was reached.
    Completed,
    /// The observer went away or asked to stop.
    Disconnected,
    /// An engine or scenario failure ended the run.
    Failed,
}

enum LoopExit {
    Exhausted,
    Stopped,
}

/// Drives a session step by step and streams each step to a sink.
pub struct TelemetryStreamer<L: EngineLauncher> {
    session: Arc<Mutex<SimulationSession<L>>>,
    control_timeout: Duration,
}

impl<L: EngineLauncher + 'static> TelemetryStreamer<L> {
    pub fn new(session: Arc<Mutex<SimulationSession<L>>>, control_timeout: Duration) -> Self {
        Self {
            session,
            control_timeout,
        }
    }

    pub fn session(&self) -> Arc<Mutex<SimulationSession<L>>> {
        Arc::clone(&self.session)
    }

    /// Runs up to `duration` steps. Fails fast with [`SessionError::Busy`]
    /// while another run holds the session, and before launching anything
    /// when `duration` is zero.
    pub async fn run<S>(
        &self,
        duration: u64,
        sink: &mut S,
        control: &mut ControlChannel,
    ) -> SessionResult<RunOutcome>
    where
        S: TelemetrySink + ?Sized,
    {
        if duration == 0 {
            let err = SessionError::from(ValidationError::InvalidDuration(0));
            warn!("rejecting simulation run: {err}");
            if let Err(send_err) = sink.send(&TelemetryEvent::error(err.to_string())).await {
                warn!("could not report rejection to observer: {send_err}");
            }
            return Err(err);
        }
        let session = Arc::clone(&self.session)
            .try_lock_owned()
            .map_err(|_| SessionError::Busy)?;
        let mut guard = ReleaseOnDrop {
            session: Some(session),
        };
        let Some(session) = guard.session.as_mut() else {
            return Err(SessionError::Busy);
        };

        let exit = drive(&mut **session, duration, sink, control, self.control_timeout).await;
        let outcome = match exit {
            Ok(LoopExit::Exhausted) => match sink.send(&TelemetryEvent::SimulationComplete).await {
                Ok(()) => {
                    info!("simulation complete after {} steps", session.step_index());
                    RunOutcome::Completed
                }
                Err(err) => {
                    warn!("observer left before completion: {err}");
                    RunOutcome::Disconnected
                }
            },
            Ok(LoopExit::Stopped) => {
                info!("simulation stopped by observer at step {}", session.step_index());
                RunOutcome::Disconnected
            }
            Err(err) if err.is_transport() => {
                warn!("observer disconnected at step {}: {err}", session.step_index());
                RunOutcome::Disconnected
            }
            Err(err) => {
                error!("simulation failed: {err}");
                if let Err(send_err) = sink.send(&TelemetryEvent::error(err.to_string())).await {
                    warn!("could not report failure to observer: {send_err}");
                }
                RunOutcome::Failed
            }
        };

        guard.release().await;
        Ok(outcome)
    }
}

async fn drive<L, S>(
    session: &mut SimulationSession<L>,
    duration: u64,
    sink: &mut S,
    control: &mut ControlChannel,
    control_timeout: Duration,
) -> SessionResult<LoopExit>
where
    L: EngineLauncher,
    S: TelemetrySink + ?Sized,
{
    session.initialize(duration).await?;
    loop {
        if control.is_closed() {
            return Ok(LoopExit::Stopped);
        }
        if let Some(command) = control.try_receive(control_timeout).await {
            session.apply_control(&command).await?;
        }
        if control.is_closed() {
            return Ok(LoopExit::Stopped);
        }
        if session.step_index() >= duration || session.pending().await? <= 0 {
            return Ok(LoopExit::Exhausted);
        }

        let snapshots = session.step().await?;
        let frame = positions_frame(session, &snapshots);
        sink.send(&TelemetryEvent::VehiclePositions(frame)).await?;
    }
}

fn positions_frame<L: EngineLauncher>(
    session: &SimulationSession<L>,
    snapshots: &[EntitySnapshot],
) -> PositionsFrame {
    let speeds: Vec<f64> = snapshots.iter().map(|s| s.speed_kmh).collect();
    PositionsFrame {
        step_index: session.step_index(),
        data: snapshots.iter().map(EntitySnapshot::to_wire).collect(),
        progress: session.progress(),
        vehicle_count: snapshots.len(),
        control_status: session.control_status(),
        average_speed: StatsHelper::round_to(StatsHelper::mean(&speeds), 2),
    }
}

/// Holds the session for one run; cleans it up even if the run is abandoned.
struct ReleaseOnDrop<L: EngineLauncher + 'static> {
    session: Option<OwnedMutexGuard<SimulationSession<L>>>,
}

impl<L: EngineLauncher + 'static> ReleaseOnDrop<L> {
    async fn release(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.cleanup().await;
        }
    }
}

impl<L: EngineLauncher + 'static> Drop for ReleaseOnDrop<L> {
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("simulation run abandoned, cleaning up in background");
                handle.spawn(async move { session.cleanup().await });
            }
            Err(_) => error!("simulation run abandoned outside a runtime; engine left to drop"),
        }
    }
}
