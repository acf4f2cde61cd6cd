//! Capture-and-detect pipeline.
//!
//! Reads frames from a local camera, shows each frame on a display surface, and
//! runs an object detector over it. Detections are logged, never drawn.
//!
//! # Architecture
//!
//! Every frame goes through the same path:
//!
//! 1. **Capture**: a `CaptureDevice` produces `RawBuffer`s on the capture thread.
//! 2. **Delivery**: a bounded queue (oldest frame dropped when full) feeds the
//!    delivery thread, which decodes each buffer into an immutable `Frame`.
//! 3. **Display**: the frame is posted to the UI context and lands in the
//!    last-writer-wins `DisplaySurface`.
//! 4. **Detection**: the `ObjectDetector` runs synchronously on the delivery
//!    thread and every observation goes to a `DetectionSink`.
//!
//! Only model loading is fatal. Everything after startup fails silently: the
//! affected call or frame is dropped and counted in `SessionStats`.
//!
//! # Module Structure
//!
//! - `capture`: capture devices (synthetic, V4L2, image directory, scripted)
//! - `config`: pipeline configuration (defaults, JSON file, env overrides)
//! - `convert`: pixel format conversion and orientation
//! - `detect`: detection models and the object detector
//! - `display`: display surface, UI context, renderers
//! - `frame`: raw buffers and decoded frames
//! - `permission`: camera permission check and request
//! - `report`: detection sinks
//! - `session`: capture session lifecycle and frame delivery

pub mod capture;
pub mod config;
pub mod convert;
pub mod detect;
pub mod display;
pub mod frame;
pub mod permission;
pub mod report;
pub mod session;

pub use capture::{CaptureDevice, DeviceProvider, UriDeviceProvider};
pub use config::{ModelBackend, ModelConfig, PermissionMode, PipelineConfig};
pub use convert::{Orientation, PixelFormat};
pub use detect::{BoundingBox, DetectionModel, DetectionOutcome, Label, ObjectDetector, Observation};
pub use display::{DisplaySurface, LogRenderer, Renderer, UiContext, UiHandle};
pub use frame::{Frame, RawBuffer};
pub use permission::{PermissionProvider, PermissionRequest, PermissionState};
pub use report::{DetectionSink, LogSink, MemorySink};
pub use session::{CaptureSession, FrameHandler, SessionState, SessionStats};
