//! V4L2 capture device.
//!
//! Streams from a local device node (e.g. /dev/video0) through memory-mapped
//! buffers. Format negotiation asks for RGB3; whatever the driver settles on is
//! reported with each buffer and converted downstream.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::path::PathBuf;

use super::CaptureDevice;
use crate::config::DeviceConfig;
use crate::convert::PixelFormat;
use crate::frame::RawBuffer;

pub struct V4l2Camera {
    name: String,
    path: PathBuf,
    width: u32,
    height: u32,
    target_fps: u32,
    state: Option<V4l2State>,
    format: PixelFormat,
    frame_count: u64,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    pub fn new(path: PathBuf, config: &DeviceConfig) -> Self {
        Self {
            name: path.display().to_string(),
            path,
            width: config.width,
            height: config.height,
            target_fps: config.target_fps,
            state: None,
            format: PixelFormat::Rgb24,
            frame_count: 0,
        }
    }
}

fn pixel_format_for(fourcc: &v4l::FourCC) -> Option<PixelFormat> {
    match &fourcc.repr {
        b"RGB3" => Some(PixelFormat::Rgb24),
        b"BGR4" | b"AR24" => Some(PixelFormat::Bgra32),
        b"NV12" => Some(PixelFormat::Nv12),
        b"YUYV" => Some(PixelFormat::Yuyv),
        _ => None,
    }
}

impl CaptureDevice for V4l2Camera {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.path)
            .with_context(|| format!("open v4l2 device {}", self.name))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.width;
        format.height = self.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("{}: failed to set format: {}", self.name, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        self.format = pixel_format_for(&format.fourcc)
            .ok_or_else(|| anyhow!("{}: unsupported pixel format {}", self.name, format.fourcc))?;

        if self.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("{}: failed to set fps: {}", self.name, err);
            }
        }

        self.width = format.width;
        self.height = format.height;

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "{}: connected ({}x{} {:?})",
            self.name,
            self.width,
            self.height,
            self.format
        );
        Ok(())
    }

    fn next_buffer(&mut self) -> Result<Option<RawBuffer>> {
        use v4l::io::traits::CaptureStream;

        let state = self
            .state
            .as_mut()
            .ok_or_else(|| anyhow!("{}: device not open", self.name))?;
        let data = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .context("capture v4l2 frame")?;

        let sequence = self.frame_count;
        self.frame_count += 1;

        Ok(Some(RawBuffer {
            data,
            width: self.width,
            height: self.height,
            format: self.format,
            sequence,
        }))
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!("{}: released", self.name);
        }
    }
}
