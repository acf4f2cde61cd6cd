use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::CaptureDevice;
use crate::frame::RawBuffer;

/// Device that plays back a fixed list of buffers, then reports end of stream.
pub struct ScriptedDevice {
    name: String,
    script: VecDeque<Step>,
    interval: Duration,
    fail_open: bool,
    tracker: DeviceTracker,
}

enum Step {
    Buffer(RawBuffer),
    Fail,
}

/// Shared view of what happened to a `ScriptedDevice` after it moved into a session.
#[derive(Clone, Debug, Default)]
pub struct DeviceTracker {
    opened: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    delivered: Arc<AtomicUsize>,
}

impl DeviceTracker {
    pub fn opened(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }
}

impl ScriptedDevice {
    pub fn new(name: impl Into<String>, buffers: Vec<RawBuffer>) -> Self {
        Self {
            name: name.into(),
            script: buffers.into_iter().map(Step::Buffer).collect(),
            interval: Duration::ZERO,
            fail_open: false,
            tracker: DeviceTracker::default(),
        }
    }

    /// Sleep between buffers.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Make `open` fail, as a device held by another process would.
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Fail one read at `position` in the script, then carry on with the next buffer.
    pub fn with_failure_at(mut self, position: usize) -> Self {
        let position = position.min(self.script.len());
        self.script.insert(position, Step::Fail);
        self
    }

    pub fn tracker(&self) -> DeviceTracker {
        self.tracker.clone()
    }
}

impl CaptureDevice for ScriptedDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<()> {
        if self.fail_open {
            return Err(anyhow!("{}: device busy", self.name));
        }
        self.tracker.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn next_buffer(&mut self) -> Result<Option<RawBuffer>> {
        if !self.tracker.opened() {
            return Err(anyhow!("{}: device not open", self.name));
        }
        let buffer = match self.script.pop_front() {
            Some(Step::Buffer(buffer)) => buffer,
            Some(Step::Fail) => return Err(anyhow!("{}: read failed", self.name)),
            None => return Ok(None),
        };
        if !self.interval.is_zero() {
            std::thread::sleep(self.interval);
        }
        self.tracker.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(Some(buffer))
    }

    fn close(&mut self) {
        self.tracker.closed.store(true, Ordering::SeqCst);
    }
}
