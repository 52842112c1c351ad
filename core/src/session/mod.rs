pub mod control;
pub mod engine;
pub mod network;
pub mod simulation;
pub mod streamer;
pub mod traci;

pub use control::{ControlChannel, ControlSender, CONTROL_CAPACITY};
pub use engine::{EngineInvocation, VehicleState};
pub use network::NetworkMetadata;
pub use simulation::{SessionState, SimulationSession};
pub use streamer::{RunOutcome, TelemetryStreamer};
pub use traci::{SumoEngine, SumoLauncher};
