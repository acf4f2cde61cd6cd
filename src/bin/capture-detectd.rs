//! capture-detectd - camera capture and object detection daemon
//!
//! This daemon:
//! 1. Loads the bundled detection model (a missing model is fatal)
//! 2. Checks camera permission and binds the configured capture device
//! 3. Shows every frame on a headless display surface
//! 4. Logs every detection

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use capture_detect::display::{render_final, render_pending};
use capture_detect::permission::permission_for;
use capture_detect::{
    CaptureSession, DisplaySurface, LogRenderer, LogSink, ObjectDetector, PipelineConfig,
    SessionState, UiContext, UriDeviceProvider,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON pipeline config file.
    #[arg(long, env = "CAPTURE_CONFIG")]
    config: Option<PathBuf>,
    /// Capture device URI (stub://name, images://dir, /dev/videoN).
    #[arg(long)]
    device: Option<String>,
    /// Directory holding the bundled model artifact.
    #[arg(long)]
    model_dir: Option<PathBuf>,
    /// Exit after this many frames were delivered.
    #[arg(long)]
    frames: Option<u64>,
    /// Exit after this many seconds.
    #[arg(long)]
    seconds: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = PipelineConfig::load_from(args.config.as_deref())?;
    if let Some(device) = args.device {
        cfg.device.uri = device;
    }
    if let Some(dir) = args.model_dir {
        cfg.model.dir = dir;
    }
    cfg.validate()?;

    let detector = Arc::new(ObjectDetector::load(&cfg.model)?);

    let ui = UiContext::new()?;
    let display = Arc::new(DisplaySurface::new());
    let permission = permission_for(&cfg.permission, &cfg.device);
    let devices = Box::new(UriDeviceProvider::new(cfg.device.clone()));
    let render_interval = cfg.pipeline.render_interval;
    log::info!(
        "capture-detectd starting: device={} model={}",
        cfg.device.uri,
        detector.model_name()
    );

    let mut session = CaptureSession::new(
        cfg,
        permission,
        devices,
        detector,
        display.clone(),
        ui.handle(),
        Arc::new(LogSink),
    );
    let permission_state = session.initialize();
    log::debug!("camera permission: {:?}", permission_state);
    session.configure_and_start()?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    }

    let started = Instant::now();
    let deadline = args.seconds.map(Duration::from_secs);
    let mut renderer = LogRenderer::new();
    loop {
        if stop.load(Ordering::SeqCst) {
            log::info!("shutdown signal received, stopping capture...");
            break;
        }
        if session.state() == SessionState::Stopped {
            log::info!("capture session is not running");
            break;
        }
        if session.wait_until_drained(Duration::ZERO) {
            log::info!("capture device has no more frames");
            break;
        }
        if args
            .frames
            .is_some_and(|limit| session.stats().frames_delivered >= limit)
        {
            break;
        }
        if deadline.is_some_and(|deadline| started.elapsed() >= deadline) {
            break;
        }
        render_pending(&display, &mut renderer)?;
        std::thread::sleep(render_interval);
    }

    session.stop()?;
    render_final(&ui.handle(), &display, &mut renderer, Duration::from_secs(1))?;
    ui.shutdown()?;

    log::info!(
        "capture-detectd finished: rendered={} {}",
        renderer.rendered(),
        session.stats()
    );
    Ok(())
}
