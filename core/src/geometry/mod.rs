pub mod bounds;
pub mod transform;

pub use bounds::{BoundingBox, GeometryLimits, GeometryResolver};
pub use transform::CoordinateTransformer;
