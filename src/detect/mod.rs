mod backend;
mod backends;
mod detector;
mod postprocess;
mod result;

pub use backend::DetectionModel;
pub use backends::FixedModel;
#[cfg(feature = "backend-tract")]
pub use backends::TractModel;
pub use detector::ObjectDetector;
pub use result::{BoundingBox, DetectionOutcome, Label, Observation, UNKNOWN_LABEL};
