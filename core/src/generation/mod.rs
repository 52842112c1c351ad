pub mod artifacts;
pub mod netconvert;
pub mod pipeline;
pub mod routes;
pub mod stage_runner;
pub mod sumocfg;

pub use artifacts::{Artifact, ArtifactNamer, ArtifactSet, ArtifactUse};
pub use pipeline::{GenerationPipeline, PipelineState};
pub use routes::{ClassRoutes, RouteAccumulator, RouteFailure};
pub use stage_runner::ProcessRunner;
