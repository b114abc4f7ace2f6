pub mod estimator;
pub mod traits;

pub use estimator::{MotionEstimator, MotionState};
pub use traits::VectorSink;
