//! Capture session.
//!
//! Lifecycle: `Uninitialized → Configuring → Running → Stopped`, or straight from
//! `Configuring` to `Stopped` when setup is abandoned. Setup runs on its own
//! thread. Once running, a capture thread reads the device into a bounded queue
//! and a delivery thread hands each frame, in capture order, to the display and
//! the detector.
//!
//! Nothing after startup is surfaced as an error: denied permission, a missing or
//! busy device, failed device reads, undecodable buffers and failed detections are
//! logged at debug, counted, and dropped. A device that keeps failing is given up
//! after `MAX_CONSECUTIVE_CAPTURE_FAILURES` reads in a row, which ends its stream.

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::capture::{CaptureDevice, DeviceProvider};
use crate::config::PipelineConfig;
use crate::convert::Orientation;
use crate::detect::{DetectionOutcome, ObjectDetector};
use crate::display::{DisplaySurface, UiHandle};
use crate::frame::{Frame, RawBuffer};
use crate::permission::{PermissionProvider, PermissionRequest, PermissionState};
use crate::report::DetectionSink;

/// Set while a session is configuring or running.
static ACTIVE_SESSION: AtomicBool = AtomicBool::new(false);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Failed reads in a row before the device stream is treated as ended.
pub const MAX_CONSECUTIVE_CAPTURE_FAILURES: u32 = 10;
const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Configuring,
    /// Threads are started. When the device stream ends the session stays here
    /// with `wait_until_drained` satisfied until `stop` is called.
    Running,
    Stopped,
}

/// True while any session in this process is configuring or running.
pub fn session_active() -> bool {
    ACTIVE_SESSION.load(Ordering::SeqCst)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_captured: u64,
    pub frames_delivered: u64,
    /// Dropped from a full delivery queue.
    pub frames_dropped: u64,
    /// Device reads that returned an error.
    pub capture_failures: u64,
    pub decode_failures: u64,
    pub detection_failures: u64,
    pub observations_reported: u64,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "captured={} delivered={} dropped={} capture_failures={} decode_failures={} detection_failures={} observations={}",
            self.frames_captured,
            self.frames_delivered,
            self.frames_dropped,
            self.capture_failures,
            self.decode_failures,
            self.detection_failures,
            self.observations_reported
        )
    }
}

#[derive(Debug, Default)]
struct Counters {
    captured: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    capture_failures: AtomicU64,
    decode_failures: AtomicU64,
    detection_failures: AtomicU64,
    observations: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SessionStats {
        SessionStats {
            frames_captured: self.captured.load(Ordering::Relaxed),
            frames_delivered: self.delivered.load(Ordering::Relaxed),
            frames_dropped: self.dropped.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            detection_failures: self.detection_failures.load(Ordering::Relaxed),
            observations_reported: self.observations.load(Ordering::Relaxed),
        }
    }
}

/// Per-frame work on the delivery thread.
pub struct FrameHandler {
    orientation: Orientation,
    detector: Arc<ObjectDetector>,
    display: Arc<DisplaySurface>,
    ui: UiHandle,
    sink: Arc<dyn DetectionSink>,
    counters: Arc<Counters>,
}

impl FrameHandler {
    pub fn new(
        orientation: Orientation,
        detector: Arc<ObjectDetector>,
        display: Arc<DisplaySurface>,
        ui: UiHandle,
        sink: Arc<dyn DetectionSink>,
    ) -> Self {
        Self {
            orientation,
            detector,
            display,
            ui,
            sink,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Decode one buffer, queue the display update, then run detection and report.
    ///
    /// Returns the decoded frame, or `None` when the buffer could not be decoded.
    pub fn on_frame_delivered(&self, raw: RawBuffer) -> Option<Frame> {
        Counters::bump(&self.counters.delivered);
        let sequence = raw.sequence;
        let decoded = panic::catch_unwind(AssertUnwindSafe(|| {
            Frame::decode(raw, self.orientation)
        }))
        .unwrap_or_else(|_| Err(anyhow!("decoder panicked")));
        let frame = match decoded {
            Ok(frame) => frame,
            Err(err) => {
                Counters::bump(&self.counters.decode_failures);
                log::debug!("frame #{} dropped: {:#}", sequence, err);
                return None;
            }
        };

        let display = self.display.clone();
        let shown = frame.clone();
        if !self.ui.dispatch(move || display.update(shown)) {
            log::debug!("frame #{}: ui context gone, display update dropped", sequence);
        }

        match self.detector.detect_outcome(&frame) {
            DetectionOutcome::Detected(observations) => {
                for observation in &observations {
                    self.sink.report(&frame, observation);
                    Counters::bump(&self.counters.observations);
                }
            }
            DetectionOutcome::Failed(reason) => {
                Counters::bump(&self.counters.detection_failures);
                log::debug!("frame #{}: detection failed: {}", sequence, reason);
            }
        }
        Some(frame)
    }

    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }
}

enum PermissionGate {
    Unchecked,
    Granted,
    Denied,
    Pending(PermissionRequest),
}

struct Status {
    state: SessionState,
    drained: bool,
}

struct Shared {
    status: Mutex<Status>,
    changed: Condvar,
    shutdown: AtomicBool,
    holds_claim: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            status: Mutex::new(Status {
                state: SessionState::Uninitialized,
                drained: false,
            }),
            changed: Condvar::new(),
            shutdown: AtomicBool::new(false),
            holds_claim: AtomicBool::new(false),
        }
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> SessionState {
        self.status().state
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let mut status = self.status();
        if status.state != from {
            return false;
        }
        status.state = to;
        self.changed.notify_all();
        true
    }

    fn finish(&self) {
        if self.holds_claim.swap(false, Ordering::SeqCst) {
            ACTIVE_SESSION.store(false, Ordering::SeqCst);
        }
        let mut status = self.status();
        status.state = SessionState::Stopped;
        self.changed.notify_all();
    }

    fn mark_drained(&self) {
        let mut status = self.status();
        status.drained = true;
        self.changed.notify_all();
    }

    fn wait_until(&self, timeout: Duration, done: impl Fn(&Status) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut status = self.status();
        while !done(&status) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            status = match self.changed.wait_timeout(status, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

/// One camera session: permission, device, and the threads that move frames.
pub struct CaptureSession {
    config: PipelineConfig,
    permission: Box<dyn PermissionProvider>,
    devices: Option<Box<dyn DeviceProvider>>,
    handler: Option<FrameHandler>,
    counters: Arc<Counters>,
    gate: PermissionGate,
    shared: Arc<Shared>,
    setup: Option<JoinHandle<()>>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl CaptureSession {
    pub fn new(
        config: PipelineConfig,
        permission: Box<dyn PermissionProvider>,
        devices: Box<dyn DeviceProvider>,
        detector: Arc<ObjectDetector>,
        display: Arc<DisplaySurface>,
        ui: UiHandle,
        sink: Arc<dyn DetectionSink>,
    ) -> Self {
        let handler = FrameHandler::new(config.device.orientation, detector, display, ui, sink);
        Self {
            counters: handler.counters.clone(),
            config,
            permission,
            devices: Some(devices),
            handler: Some(handler),
            gate: PermissionGate::Unchecked,
            shared: Arc::new(Shared::new()),
            setup: None,
            workers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Check camera permission. An undetermined permission is requested here and
    /// answered later; setup waits for the answer.
    pub fn initialize(&mut self) -> PermissionState {
        let status = self.permission.status();
        self.gate = match status {
            PermissionState::Authorized => PermissionGate::Granted,
            PermissionState::Denied => PermissionGate::Denied,
            PermissionState::Undetermined => {
                log::debug!("camera permission undetermined, requesting access");
                PermissionGate::Pending(self.permission.request())
            }
        };
        status
    }

    /// Start setup on a background thread and return.
    ///
    /// Fails only when the session was already started or another session is active.
    pub fn configure_and_start(&mut self) -> Result<()> {
        if self.state() != SessionState::Uninitialized {
            return Err(anyhow!("capture session already started"));
        }
        if matches!(self.gate, PermissionGate::Unchecked) {
            self.initialize();
        }
        if ACTIVE_SESSION
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(anyhow!("another capture session is already active"));
        }
        self.shared.holds_claim.store(true, Ordering::SeqCst);
        self.shared
            .transition(SessionState::Uninitialized, SessionState::Configuring);

        let (Some(devices), Some(handler)) = (self.devices.take(), self.handler.take()) else {
            self.shared.finish();
            return Err(anyhow!("capture session already consumed"));
        };
        let job = SetupJob {
            gate: std::mem::replace(&mut self.gate, PermissionGate::Unchecked),
            permission_timeout: self.config.permission.timeout,
            queue_depth: self.config.pipeline.queue_depth.max(1),
            devices,
            handler: Some(handler),
            shared: self.shared.clone(),
            workers: self.workers.clone(),
        };
        let spawned = std::thread::Builder::new()
            .name("session-setup".into())
            .spawn(move || job.run());
        match spawned {
            Ok(join) => {
                self.setup = Some(join);
                Ok(())
            }
            Err(err) => {
                self.shared.finish();
                Err(anyhow!("spawn session setup thread: {}", err))
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }

    /// Block until the session reaches `state`, up to `timeout`.
    pub fn wait_for_state(&self, state: SessionState, timeout: Duration) -> bool {
        self.shared.wait_until(timeout, |status| status.state == state)
    }

    /// Block until the device ran out of frames and every queued frame was handled.
    pub fn wait_until_drained(&self, timeout: Duration) -> bool {
        self.shared.wait_until(timeout, |status| status.drained)
    }

    /// Stop all session threads and release the device. Safe to call repeatedly.
    pub fn stop(&mut self) -> Result<()> {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        let mut panicked = Vec::new();
        if let Some(setup) = self.setup.take() {
            if setup.join().is_err() {
                panicked.push("setup");
            }
        }
        let workers: Vec<JoinHandle<()>> = {
            let mut guard = self
                .workers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.drain(..).collect()
        };
        for worker in workers {
            if worker.join().is_err() {
                panicked.push("worker");
            }
        }

        let was_stopped = self.state() == SessionState::Stopped;
        self.shared.finish();
        if !was_stopped {
            log::info!("capture session stopped ({})", self.stats());
        }
        if !panicked.is_empty() {
            return Err(anyhow!("session threads panicked: {}", panicked.join(", ")));
        }
        Ok(())
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::warn!("{}", err);
        }
    }
}

struct SetupJob {
    gate: PermissionGate,
    permission_timeout: Duration,
    queue_depth: usize,
    devices: Box<dyn DeviceProvider>,
    handler: Option<FrameHandler>,
    shared: Arc<Shared>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl SetupJob {
    fn run(mut self) {
        if let Err(reason) = self.bind() {
            log::debug!("capture setup abandoned: {}", reason);
            self.shared.finish();
        }
    }

    fn bind(&mut self) -> std::result::Result<(), String> {
        let granted = match std::mem::replace(&mut self.gate, PermissionGate::Unchecked) {
            PermissionGate::Granted => true,
            PermissionGate::Denied | PermissionGate::Unchecked => false,
            PermissionGate::Pending(mut request) => request
                .wait_unless(self.permission_timeout, &self.shared.shutdown)
                .unwrap_or(false),
        };
        if !granted {
            return Err("camera permission not granted".into());
        }
        if self.shutdown_requested() {
            return Err("stopped during setup".into());
        }

        let mut device = self
            .devices
            .default_device()
            .ok_or_else(|| "no capture device available".to_string())?;
        device
            .open()
            .map_err(|err| format!("{}: open failed: {:#}", device.name(), err))?;
        let device_name = device.name().to_string();
        let handler = self
            .handler
            .take()
            .ok_or_else(|| "frame handler already bound".to_string())?;

        let (tx, rx) = bounded::<RawBuffer>(self.queue_depth);
        let capture = CaptureLoop {
            device,
            tx,
            rx: rx.clone(),
            counters: handler.counters.clone(),
            shared: self.shared.clone(),
        };
        let capture_join = std::thread::Builder::new()
            .name("frame-capture".into())
            .spawn(move || capture.run())
            .map_err(|err| format!("spawn capture thread: {}", err))?;
        self.push_worker(capture_join);

        let shared = self.shared.clone();
        let delivery_join = std::thread::Builder::new()
            .name("frame-delivery".into())
            .spawn(move || deliver(rx, handler, shared))
            .map_err(|err| {
                self.shared.shutdown.store(true, Ordering::SeqCst);
                format!("spawn delivery thread: {}", err)
            })?;
        self.push_worker(delivery_join);

        if self
            .shared
            .transition(SessionState::Configuring, SessionState::Running)
        {
            log::info!("capture session running on {}", device_name);
        }
        Ok(())
    }

    fn shutdown_requested(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    fn push_worker(&self, join: JoinHandle<()>) {
        self.workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(join);
    }
}

struct CaptureLoop {
    device: Box<dyn CaptureDevice>,
    tx: Sender<RawBuffer>,
    rx: Receiver<RawBuffer>,
    counters: Arc<Counters>,
    shared: Arc<Shared>,
}

impl CaptureLoop {
    fn run(mut self) {
        let mut consecutive_failures = 0u32;
        while !self.shared.shutdown.load(Ordering::SeqCst) {
            match self.device.next_buffer() {
                Ok(Some(buffer)) => {
                    consecutive_failures = 0;
                    Counters::bump(&self.counters.captured);
                    if !push_drop_oldest(&self.tx, &self.rx, buffer, &self.counters) {
                        break;
                    }
                }
                Ok(None) => {
                    log::debug!("{}: end of stream", self.device.name());
                    break;
                }
                Err(err) => {
                    Counters::bump(&self.counters.capture_failures);
                    consecutive_failures += 1;
                    log::debug!(
                        "{}: frame dropped, read failed: {:#}",
                        self.device.name(),
                        err
                    );
                    if consecutive_failures >= MAX_CONSECUTIVE_CAPTURE_FAILURES {
                        log::debug!(
                            "{}: {} reads failed in a row, ending stream",
                            self.device.name(),
                            consecutive_failures
                        );
                        break;
                    }
                    std::thread::sleep(CAPTURE_RETRY_DELAY * consecutive_failures);
                }
            }
        }
        self.device.close();
    }
}

/// Queue `buffer`, evicting the oldest queued buffer while the queue is full.
/// Returns false once the consumer is gone.
fn push_drop_oldest(
    tx: &Sender<RawBuffer>,
    rx: &Receiver<RawBuffer>,
    mut buffer: RawBuffer,
    counters: &Counters,
) -> bool {
    loop {
        match tx.try_send(buffer) {
            Ok(()) => return true,
            Err(TrySendError::Full(back)) => {
                buffer = back;
                if let Ok(oldest) = rx.try_recv() {
                    Counters::bump(&counters.dropped);
                    log::debug!("frame #{} dropped (delivery backlog)", oldest.sequence);
                }
            }
            Err(TrySendError::Disconnected(_)) => return false,
        }
    }
}

fn deliver(rx: Receiver<RawBuffer>, handler: FrameHandler, shared: Arc<Shared>) {
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            return;
        }
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(raw) => {
                handler.on_frame_delivered(raw);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    shared.mark_drained();
}
