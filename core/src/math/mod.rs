pub mod projection;
pub mod stats;

pub use projection::UtmProjection;
pub use stats::StatsHelper;
