//! Capture devices.
//!
//! A `CaptureDevice` produces `RawBuffer`s; the session owns exactly one device
//! while it runs. Devices are addressed by URI:
//! - `stub://name[?frames=N&format=nv12&noise=0]`: synthetic camera (always available)
//! - `images://dir`: replay still images from a directory (feature: ingest-images)
//! - `/dev/videoN`: V4L2 device (feature: ingest-v4l2)
//!
//! Devices MUST NOT:
//! - Store captured buffers to disk
//! - Forward buffers over the network

#[cfg(feature = "ingest-images")]
pub mod images;
pub mod scripted;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};
use std::path::PathBuf;

use crate::config::DeviceConfig;
use crate::convert::PixelFormat;
use crate::frame::RawBuffer;

#[cfg(feature = "ingest-images")]
pub use images::ImageDirectoryCamera;
pub use scripted::{DeviceTracker, ScriptedDevice};
pub use synthetic::SyntheticCamera;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Camera;

/// A camera the pipeline can bind as its input.
pub trait CaptureDevice: Send {
    fn name(&self) -> &str;

    /// Acquire the device and start streaming.
    fn open(&mut self) -> Result<()>;

    /// Block until the next buffer. `Ok(None)` once the device has nothing more to give.
    fn next_buffer(&mut self) -> Result<Option<RawBuffer>>;

    /// Release the device.
    fn close(&mut self) {}
}

/// Finds the capture device a session should bind.
pub trait DeviceProvider: Send {
    fn default_device(&mut self) -> Option<Box<dyn CaptureDevice>>;
}

impl<F> DeviceProvider for F
where
    F: FnMut() -> Option<Box<dyn CaptureDevice>> + Send,
{
    fn default_device(&mut self) -> Option<Box<dyn CaptureDevice>> {
        self()
    }
}

/// Resolves the configured device URI.
#[derive(Clone, Debug)]
pub struct UriDeviceProvider {
    config: DeviceConfig,
}

impl UriDeviceProvider {
    pub fn new(config: DeviceConfig) -> Self {
        Self { config }
    }
}

impl DeviceProvider for UriDeviceProvider {
    fn default_device(&mut self) -> Option<Box<dyn CaptureDevice>> {
        locate_device(&self.config)
    }
}

/// Parsed device address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceUri {
    Synthetic {
        name: String,
        frames: Option<u64>,
        format: PixelFormat,
        noise: bool,
    },
    Images(PathBuf),
    V4l2(PathBuf),
}

impl DeviceUri {
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(anyhow!("device uri is empty"));
        }
        if let Some(rest) = uri.strip_prefix("stub://") {
            return parse_synthetic(rest);
        }
        if let Some(dir) = uri.strip_prefix("images://") {
            if dir.is_empty() {
                return Err(anyhow!("images:// uri needs a directory"));
            }
            return Ok(DeviceUri::Images(PathBuf::from(dir)));
        }
        if uri.contains("://") {
            return Err(anyhow!(
                "unsupported device uri '{}' (only local devices are allowed)",
                uri
            ));
        }
        Ok(DeviceUri::V4l2(PathBuf::from(uri)))
    }
}

fn parse_synthetic(rest: &str) -> Result<DeviceUri> {
    let (name, query) = match rest.split_once('?') {
        Some((name, query)) => (name, Some(query)),
        None => (rest, None),
    };
    let mut frames = None;
    let mut format = PixelFormat::Rgb24;
    let mut noise = true;
    for pair in query.into_iter().flat_map(|q| q.split('&')) {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("malformed stub:// parameter '{}'", pair))?;
        match key {
            "frames" => {
                frames = Some(
                    value
                        .parse()
                        .map_err(|_| anyhow!("stub:// frames must be an integer"))?,
                )
            }
            "format" => {
                format = match value {
                    "rgb24" => PixelFormat::Rgb24,
                    "bgra32" => PixelFormat::Bgra32,
                    "nv12" => PixelFormat::Nv12,
                    "yuyv" => PixelFormat::Yuyv,
                    other => return Err(anyhow!("unknown stub:// format '{}'", other)),
                }
            }
            "noise" => noise = value != "0",
            other => return Err(anyhow!("unknown stub:// parameter '{}'", other)),
        }
    }
    Ok(DeviceUri::Synthetic {
        name: name.to_string(),
        frames,
        format,
        noise,
    })
}

pub fn is_synthetic_uri(uri: &str) -> bool {
    uri.trim().starts_with("stub://")
}

/// Resolve the configured device. `None` when it does not exist or is unsupported.
pub fn locate_device(config: &DeviceConfig) -> Option<Box<dyn CaptureDevice>> {
    let uri = match DeviceUri::parse(&config.uri) {
        Ok(uri) => uri,
        Err(err) => {
            log::debug!("no capture device: {}", err);
            return None;
        }
    };
    match uri {
        DeviceUri::Synthetic {
            name,
            frames,
            format,
            noise,
        } => Some(Box::new(
            SyntheticCamera::new(name, config.width, config.height, config.target_fps)
                .with_format(format)
                .with_frame_limit(frames)
                .with_noise(noise),
        )),
        DeviceUri::Images(dir) => {
            #[cfg(feature = "ingest-images")]
            {
                if dir.is_dir() {
                    return Some(Box::new(ImageDirectoryCamera::new(dir, config.target_fps)));
                }
                log::debug!("no capture device: {} is not a directory", dir.display());
                None
            }
            #[cfg(not(feature = "ingest-images"))]
            {
                log::debug!(
                    "no capture device: images://{} requires the ingest-images feature",
                    dir.display()
                );
                None
            }
        }
        DeviceUri::V4l2(path) => {
            #[cfg(feature = "ingest-v4l2")]
            {
                if path.exists() {
                    return Some(Box::new(V4l2Camera::new(path, config)));
                }
                log::debug!("no capture device at {}", path.display());
                None
            }
            #[cfg(not(feature = "ingest-v4l2"))]
            {
                log::debug!(
                    "no capture device: {} requires the ingest-v4l2 feature",
                    path.display()
                );
                None
            }
        }
    }
}
