use crate::workflow::runner::Runner;
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, info, warn};
use std::fmt::Display;
use trafficcore::prelude::{SessionError, SessionResult, TelemetrySink};
use trafficcore::scenario_interface::{ObserverMessage, TelemetryEvent, DEFAULT_DURATION_STEPS};
use trafficcore::session::{ControlChannel, ControlSender, RunOutcome, CONTROL_CAPACITY};
use warp::ws::{Message, WebSocket};

/// Writes telemetry events to the observer as JSON text frames.
pub struct WsTelemetrySink<Si> {
    inner: Si,
}

impl<Si> WsTelemetrySink<Si>
where
    Si: Sink<Message> + Unpin + Send,
    Si::Error: Display,
{
    pub fn new(inner: Si) -> Self {
        Self { inner }
    }

    pub async fn close(&mut self) {
        if let Err(err) = self.inner.close().await {
            debug!("observer socket already closed: {err}");
        }
    }
}

#[async_trait]
impl<Si> TelemetrySink for WsTelemetrySink<Si>
where
    Si: Sink<Message> + Unpin + Send,
    Si::Error: Display,
{
    async fn send(&mut self, event: &TelemetryEvent) -> SessionResult<()> {
        self.inner
            .send(Message::text(event.to_json()))
            .await
            .map_err(|err| SessionError::Transport(err.to_string()))
    }
}

/// Serves one observer connection of the simulation protocol.
pub async fn serve_observer(socket: WebSocket, runner: Runner) {
    let (outgoing, mut incoming) = socket.split();
    let mut sink = WsTelemetrySink::new(outgoing);

    let Some(opening) = next_text(&mut incoming).await else {
        info!("observer left before sending a start message");
        return;
    };
    let duration = match ObserverMessage::parse_opening(&opening) {
        Ok(ObserverMessage::Start { duration }) => duration,
        Ok(ObserverMessage::Control(_)) => DEFAULT_DURATION_STEPS,
        Ok(ObserverMessage::Disconnect) => {
            info!("observer disconnected before start");
            sink.close().await;
            return;
        }
        Err(err) => {
            warn!("rejecting start message: {err}");
            let event = TelemetryEvent::error(format!("invalid start message: {err}"));
            if let Err(send_err) = sink.send(&event).await {
                debug!("could not report invalid start: {send_err}");
            }
            sink.close().await;
            return;
        }
    };

    let (commands, control) = ControlChannel::pair(CONTROL_CAPACITY);
    let reader = tokio::spawn(forward_controls(incoming, commands));
    match runner.simulate(duration, &mut sink, control).await {
        Ok(RunOutcome::Completed) => info!("observer run completed"),
        Ok(outcome) => info!("observer run ended: {outcome:?}"),
        Err(err) => warn!("observer run not started: {err}"),
    }
    reader.abort();
    sink.close().await;
}

async fn next_text<St>(incoming: &mut St) -> Option<String>
where
    St: Stream<Item = Result<Message, warp::Error>> + Unpin,
{
    while let Some(frame) = incoming.next().await {
        match frame {
            Ok(message) if message.is_close() => return None,
            Ok(message) => {
                if let Ok(text) = message.to_str() {
                    return Some(text.to_string());
                }
            }
            Err(err) => {
                warn!("observer socket error: {err}");
                return None;
            }
        }
    }
    None
}

/// Feeds control messages into the session inbox until the observer stops.
///
/// Returning drops `commands`, which the streamer reads as a stop request.
pub async fn forward_controls<St>(mut incoming: St, commands: ControlSender)
where
    St: Stream<Item = Result<Message, warp::Error>> + Unpin,
{
    while let Some(text) = next_text(&mut incoming).await {
        match ObserverMessage::parse_control(&text) {
            Ok(ObserverMessage::Disconnect) => {
                info!("observer requested stop");
                return;
            }
            Ok(ObserverMessage::Control(batch)) => {
                for command in batch {
                    if commands.send(command).await.is_err() {
                        return;
                    }
                }
            }
            Ok(ObserverMessage::Start { .. }) => {}
            Err(err) => warn!("ignoring malformed control message: {err}"),
        }
    }
    info!("observer connection closed");
}
