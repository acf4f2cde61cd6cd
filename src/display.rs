//! Display surface and UI context.
//!
//! The surface is a single last-writer-wins slot: frames written between two
//! renders are never shown. Updates reach it through the UI context, a serial
//! thread running fire-and-forget jobs in submission order.

use anyhow::{anyhow, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::frame::Frame;

#[derive(Default)]
struct Slot {
    frame: Option<Frame>,
    written: u64,
    rendered: u64,
}

/// Shows the latest frame.
#[derive(Default)]
pub struct DisplaySurface {
    slot: Mutex<Slot>,
    subscribers: Mutex<Vec<Sender<Frame>>>,
}

impl DisplaySurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame.
    pub fn update(&self, frame: Frame) {
        {
            let mut slot = lock(&self.slot);
            slot.frame = Some(frame.clone());
            slot.written += 1;
        }
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| tx.send(frame.clone()).is_ok());
    }

    pub fn latest(&self) -> Option<Frame> {
        lock(&self.slot).frame.clone()
    }

    /// The current frame if it was written after the last call.
    pub fn take_pending(&self) -> Option<Frame> {
        let mut slot = lock(&self.slot);
        if slot.written == slot.rendered {
            return None;
        }
        slot.rendered = slot.written;
        slot.frame.clone()
    }

    /// Number of updates so far.
    pub fn updates(&self) -> u64 {
        lock(&self.slot).written
    }

    /// Receive every frame passed to `update` from now on.
    pub fn subscribe(&self) -> Receiver<Frame> {
        let (tx, rx) = unbounded();
        lock(&self.subscribers).push(tx);
        rx
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // The guarded data stays consistent even if a holder panicked.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

type Job = Box<dyn FnOnce() + Send + 'static>;

enum UiMessage {
    Run(Job),
    Shutdown,
}

/// Submits work to the UI thread.
#[derive(Clone)]
pub struct UiHandle {
    tx: Sender<UiMessage>,
}

impl UiHandle {
    /// Queue `job` without waiting for it. Returns false once the UI thread is gone.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(UiMessage::Run(Box::new(job))).is_ok()
    }

    /// Wait until every job dispatched before this call has run.
    pub fn flush(&self, timeout: Duration) -> bool {
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        if !self.dispatch(move || {
            let _ = done_tx.send(());
        }) {
            return false;
        }
        done_rx.recv_timeout(timeout).is_ok()
    }
}

/// The serial UI thread.
pub struct UiContext {
    handle: UiHandle,
    join: Option<JoinHandle<()>>,
}

impl UiContext {
    pub fn new() -> Result<Self> {
        let (tx, rx) = unbounded::<UiMessage>();
        let join = std::thread::Builder::new()
            .name("ui".into())
            .spawn(move || run_ui(rx))
            .map_err(|err| anyhow!("spawn ui thread: {}", err))?;
        Ok(Self {
            handle: UiHandle { tx },
            join: Some(join),
        })
    }

    pub fn handle(&self) -> UiHandle {
        self.handle.clone()
    }

    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.handle.dispatch(job)
    }

    pub fn flush(&self, timeout: Duration) -> bool {
        self.handle.flush(timeout)
    }

    /// Run the jobs already queued, then stop the thread. Later dispatches are refused.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop_thread()
    }

    fn stop_thread(&mut self) -> Result<()> {
        let _ = self.handle.tx.send(UiMessage::Shutdown);
        if let Some(join) = self.join.take() {
            join.join().map_err(|_| anyhow!("ui thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for UiContext {
    fn drop(&mut self) {
        if let Err(err) = self.stop_thread() {
            log::warn!("{}", err);
        }
    }
}

fn run_ui(rx: Receiver<UiMessage>) {
    for message in rx.iter() {
        match message {
            UiMessage::Run(job) => {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    log::warn!("ui job panicked");
                }
            }
            UiMessage::Shutdown => break,
        }
    }
    log::debug!("ui thread stopped");
}

/// Puts a frame on screen.
pub trait Renderer {
    fn render(&mut self, frame: &Frame) -> Result<()>;
}

/// Headless renderer that logs what it would draw.
#[derive(Debug, Default)]
pub struct LogRenderer {
    rendered: u64,
}

impl LogRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rendered(&self) -> u64 {
        self.rendered
    }
}

impl Renderer for LogRenderer {
    fn render(&mut self, frame: &Frame) -> Result<()> {
        self.rendered += 1;
        log::debug!(
            "render frame #{} ({}x{}, {:?} old)",
            frame.sequence,
            frame.width,
            frame.height,
            frame.age()
        );
        Ok(())
    }
}

/// Render the latest frame if one arrived since the last render.
pub fn render_pending(surface: &DisplaySurface, renderer: &mut dyn Renderer) -> Result<bool> {
    match surface.take_pending() {
        Some(frame) => {
            renderer.render(&frame)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Wait up to `timeout` for queued display updates, then render whatever landed.
///
/// Returns false when the UI queue did not drain in time; the render still runs.
pub fn render_final(
    ui: &UiHandle,
    surface: &DisplaySurface,
    renderer: &mut dyn Renderer,
    timeout: Duration,
) -> Result<bool> {
    let flushed = ui.flush(timeout);
    if !flushed {
        log::debug!(
            "ui queue not drained within {:?}; last frame may not be rendered",
            timeout
        );
    }
    render_pending(surface, renderer)?;
    Ok(flushed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn frame(sequence: u64) -> Frame {
        Frame::from_rgb(vec![sequence as u8; 3], 1, 1, sequence).unwrap()
    }

    #[test]
    fn last_write_wins() {
        let surface = DisplaySurface::new();
        for sequence in 0..10 {
            surface.update(frame(sequence));
        }
        assert_eq!(surface.latest().map(|f| f.sequence), Some(9));
        assert_eq!(surface.updates(), 10);
    }

    #[test]
    fn pending_frame_is_taken_once() {
        let surface = DisplaySurface::new();
        assert!(surface.take_pending().is_none());
        surface.update(frame(1));
        surface.update(frame(2));
        assert_eq!(surface.take_pending().map(|f| f.sequence), Some(2));
        assert!(surface.take_pending().is_none());
        assert_eq!(surface.latest().map(|f| f.sequence), Some(2));
    }

    #[test]
    fn subscribers_see_every_update() {
        let surface = DisplaySurface::new();
        let rx = surface.subscribe();
        surface.update(frame(1));
        surface.update(frame(2));
        let seen: Vec<u64> = rx.try_iter().map(|f| f.sequence).collect();
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn render_pending_skips_overwritten_frames() -> Result<()> {
        let surface = DisplaySurface::new();
        let mut renderer = LogRenderer::new();
        surface.update(frame(1));
        surface.update(frame(2));
        assert!(render_pending(&surface, &mut renderer)?);
        assert!(!render_pending(&surface, &mut renderer)?);
        assert_eq!(renderer.rendered(), 1);
        Ok(())
    }

    #[test]
    fn render_final_reports_a_stalled_ui_queue() -> Result<()> {
        let ui = UiContext::new()?;
        let surface = Arc::new(DisplaySurface::new());
        let mut renderer = LogRenderer::new();

        surface.update(frame(1));
        let (release, blocked) = crossbeam_channel::bounded::<()>(0);
        assert!(ui.dispatch(move || {
            let _ = blocked.recv_timeout(Duration::from_secs(5));
        }));
        let late = surface.clone();
        assert!(ui.dispatch(move || late.update(frame(2))));

        let stalled = Duration::from_millis(50);
        let flushed = render_final(&ui.handle(), &surface, &mut renderer, stalled)?;
        assert!(!flushed);
        assert_eq!(renderer.rendered(), 1);
        assert_eq!(surface.latest().map(|f| f.sequence), Some(1));

        drop(release);
        let drained = Duration::from_secs(2);
        assert!(render_final(&ui.handle(), &surface, &mut renderer, drained)?);
        assert_eq!(renderer.rendered(), 2);
        ui.shutdown()
    }

    #[test]
    fn ui_jobs_run_in_order() -> Result<()> {
        let ui = UiContext::new()?;
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            assert!(ui.dispatch(move || order.lock().unwrap().push(i)));
        }
        assert!(ui.flush(Duration::from_secs(2)));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        ui.shutdown()
    }

    #[test]
    fn panicking_job_does_not_stop_ui_thread() -> Result<()> {
        let ui = UiContext::new()?;
        let ran = Arc::new(AtomicUsize::new(0));
        ui.dispatch(|| panic!("boom"));
        let counter = ran.clone();
        ui.dispatch(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(ui.flush(Duration::from_secs(2)));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        ui.shutdown()
    }

    #[test]
    fn dispatch_fails_after_shutdown() -> Result<()> {
        let ui = UiContext::new()?;
        let handle = ui.handle();
        ui.shutdown()?;
        assert!(!handle.dispatch(|| {}));
        assert!(!handle.flush(Duration::from_millis(10)));
        Ok(())
    }
}
