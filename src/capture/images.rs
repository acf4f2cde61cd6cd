use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use super::CaptureDevice;
use crate::convert::PixelFormat;
use crate::frame::RawBuffer;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Replays the still images of a directory, in file-name order, as a camera.
pub struct ImageDirectoryCamera {
    name: String,
    dir: PathBuf,
    target_fps: u32,
    queue: Vec<PathBuf>,
    cursor: usize,
    next_due: Option<Instant>,
}

impl ImageDirectoryCamera {
    pub fn new(dir: PathBuf, target_fps: u32) -> Self {
        Self {
            name: format!("images://{}", dir.display()),
            dir,
            target_fps,
            queue: Vec::new(),
            cursor: 0,
            next_due: None,
        }
    }

    fn pace(&mut self) {
        if self.target_fps == 0 {
            return;
        }
        if let Some(due) = self.next_due {
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.next_due = Some(Instant::now() + Duration::from_secs(1) / self.target_fps);
    }
}

impl CaptureDevice for ImageDirectoryCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<()> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .with_context(|| format!("read image directory {}", self.dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
            .collect();
        if files.is_empty() {
            return Err(anyhow!("{}: no images found", self.name));
        }
        files.sort();
        log::info!("{}: connected ({} images)", self.name, files.len());
        self.queue = files;
        self.cursor = 0;
        Ok(())
    }

    fn next_buffer(&mut self) -> Result<Option<RawBuffer>> {
        let Some(path) = self.queue.get(self.cursor).cloned() else {
            return Ok(None);
        };
        self.pace();
        let sequence = self.cursor as u64;
        self.cursor += 1;

        let image = image::open(&path)
            .with_context(|| format!("decode {}", path.display()))?
            .to_rgb8();
        let (width, height) = image.dimensions();
        Ok(Some(RawBuffer {
            data: image.into_raw(),
            width,
            height,
            format: PixelFormat::Rgb24,
            sequence,
        }))
    }

    fn close(&mut self) {
        self.queue.clear();
    }
}
