//! Camera access permission.
//!
//! The permission check is synchronous; the request for an undetermined permission
//! is asynchronous and hands back a `PermissionRequest` that setup can await.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::capture::is_synthetic_uri;
use crate::config::{DeviceConfig, PermissionConfig, PermissionMode};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionState {
    Authorized,
    Denied,
    Undetermined,
}

/// Source of the camera permission.
pub trait PermissionProvider: Send + Sync {
    /// Current state, without prompting.
    fn status(&self) -> PermissionState;

    /// Ask for access. The answer arrives later on the returned request.
    fn request(&self) -> PermissionRequest;
}

/// Pending answer to a permission request.
#[derive(Debug)]
pub struct PermissionRequest {
    rx: Receiver<bool>,
    answer: Option<bool>,
}

impl PermissionRequest {
    /// Create a request and the sender that completes it.
    pub fn pending() -> (crossbeam_channel::Sender<bool>, Self) {
        let (tx, rx) = bounded(1);
        (tx, Self { rx, answer: None })
    }

    /// A request that is already answered.
    pub fn resolved(granted: bool) -> Self {
        let (tx, request) = Self::pending();
        // Capacity 1 and the receiver is alive, so this cannot fail.
        let _ = tx.send(granted);
        request
    }

    /// Non-blocking poll.
    pub fn try_result(&mut self) -> Option<bool> {
        if self.answer.is_none() {
            self.answer = self.rx.try_recv().ok();
        }
        self.answer
    }

    /// Wait up to `timeout` for the answer. `None` if it did not arrive.
    pub fn wait(&mut self, timeout: Duration) -> Option<bool> {
        self.wait_unless(timeout, &AtomicBool::new(false))
    }

    /// Like `wait`, but gives up early once `cancel` is set.
    pub fn wait_unless(&mut self, timeout: Duration, cancel: &AtomicBool) -> Option<bool> {
        let deadline = Instant::now() + timeout;
        while self.try_result().is_none() {
            if cancel.load(Ordering::SeqCst) {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.rx.recv_timeout(remaining.min(Duration::from_millis(50))) {
                Ok(granted) => self.answer = Some(granted),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.answer
    }
}

/// Permission with a configured state.
///
/// When undetermined, a request resolves to `grant_on_request` after `delay` on a
/// background thread, the way an OS prompt answers some time later.
#[derive(Clone, Debug)]
pub struct StaticPermission {
    state: PermissionState,
    grant_on_request: bool,
    delay: Duration,
}

impl StaticPermission {
    pub fn new(state: PermissionState) -> Self {
        Self {
            state,
            grant_on_request: true,
            delay: Duration::ZERO,
        }
    }

    pub fn authorized() -> Self {
        Self::new(PermissionState::Authorized)
    }

    pub fn denied() -> Self {
        Self::new(PermissionState::Denied)
    }

    /// Undetermined permission answered with `grant` after `delay`.
    pub fn prompt(grant: bool, delay: Duration) -> Self {
        Self {
            state: PermissionState::Undetermined,
            grant_on_request: grant,
            delay,
        }
    }
}

impl PermissionProvider for StaticPermission {
    fn status(&self) -> PermissionState {
        self.state
    }

    fn request(&self) -> PermissionRequest {
        match self.state {
            PermissionState::Authorized => PermissionRequest::resolved(true),
            PermissionState::Denied => PermissionRequest::resolved(false),
            PermissionState::Undetermined => {
                let (tx, request) = PermissionRequest::pending();
                let grant = self.grant_on_request;
                let delay = self.delay;
                let spawned = std::thread::Builder::new()
                    .name("permission-prompt".into())
                    .spawn(move || {
                        std::thread::sleep(delay);
                        let _ = tx.send(grant);
                    });
                if let Err(err) = spawned {
                    log::warn!("permission prompt could not start: {}", err);
                }
                request
            }
        }
    }
}

/// Permission derived from access to the device node.
///
/// Readable → authorized, present but unreadable → denied, absent → undetermined
/// (a request re-checks once).
#[derive(Clone, Debug)]
pub struct DeviceAccessPermission {
    path: PathBuf,
}

impl DeviceAccessPermission {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PermissionProvider for DeviceAccessPermission {
    fn status(&self) -> PermissionState {
        if !self.path.exists() {
            return PermissionState::Undetermined;
        }
        if is_readable(&self.path) {
            PermissionState::Authorized
        } else {
            PermissionState::Denied
        }
    }

    fn request(&self) -> PermissionRequest {
        PermissionRequest::resolved(self.path.exists() && is_readable(&self.path))
    }
}

#[cfg(target_os = "linux")]
fn is_readable(path: &Path) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: `c_path` is a valid NUL-terminated string for the duration of the call.
    unsafe { libc::access(c_path.as_ptr(), libc::R_OK) == 0 }
}

#[cfg(not(target_os = "linux"))]
fn is_readable(path: &Path) -> bool {
    std::fs::File::open(path).is_ok()
}

/// Build the permission provider for a device.
pub fn permission_for(
    config: &PermissionConfig,
    device: &DeviceConfig,
) -> Box<dyn PermissionProvider> {
    match config.mode {
        PermissionMode::Authorized => Box::new(StaticPermission::authorized()),
        PermissionMode::Denied => Box::new(StaticPermission::denied()),
        PermissionMode::Undetermined => {
            Box::new(StaticPermission::prompt(config.grant_on_request, Duration::ZERO))
        }
        PermissionMode::Device => {
            if is_synthetic_uri(&device.uri) {
                Box::new(StaticPermission::authorized())
            } else {
                Box::new(DeviceAccessPermission::new(device_node(&device.uri)))
            }
        }
    }
}

fn device_node(uri: &str) -> PathBuf {
    match uri.strip_prefix("images://") {
        Some(dir) => PathBuf::from(dir),
        None => PathBuf::from(uri),
    }
}
