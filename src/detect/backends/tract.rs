#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::config::ModelConfig;
use crate::detect::backend::DetectionModel;
use crate::detect::postprocess::{decode_proposals, non_max_suppression};
use crate::detect::result::Observation;
use crate::frame::Frame;

/// Tract-based backend for YOLO-style ONNX detectors.
///
/// Expects a `[1, 3, S, S]` float input and a `[1, 4 + C, N]` output where each
/// proposal is `cx, cy, w, h` in input pixels followed by `C` class scores.
/// Frames are stretched to `S x S`, so normalized boxes map straight back onto the
/// frame.
pub struct TractModel {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    labels: Vec<String>,
    score_threshold: f32,
    iou_threshold: f32,
    max_detections: usize,
}

impl TractModel {
    pub fn load(config: &ModelConfig) -> Result<Self> {
        let model_path = config.artifact_path();
        let size = config.input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(&model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size: config.input_size,
            labels: read_labels(&config.labels_path())?,
            score_threshold: config.score_threshold,
            iou_threshold: config.iou_threshold,
            max_detections: config.max_detections,
        })
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let size = self.input_size as usize;
        let (fw, fh) = (frame.width as usize, frame.height as usize);
        let pixels = frame.pixels();
        // Nearest-neighbour stretch into the square model input.
        tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
            let sx = (x * fw / size).min(fw - 1);
            let sy = (y * fh / size).min(fh - 1);
            pixels[(sy * fw + sx) * 3 + channel] as f32 / 255.0
        })
        .into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<Observation>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let data: Vec<f32> = view.iter().copied().collect();
        let observations = decode_proposals(
            &data,
            view.shape(),
            self.score_threshold,
            self.input_size as f32,
            &self.labels,
        )?;

        Ok(non_max_suppression(
            observations,
            self.iou_threshold,
            self.max_detections,
        ))
    }
}

impl DetectionModel for TractModel {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&self, frame: &Frame) -> Result<Vec<Observation>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs)
    }

    fn warm_up(&self) -> Result<()> {
        let size = self.input_size;
        let blank = Frame::from_rgb(vec![0u8; (size * size * 3) as usize], size, size, 0)?;
        self.infer(&blank).map(|_| ())
    }
}

/// One class name per line. A missing file leaves classes unnamed.
fn read_labels(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        log::warn!(
            "no label file at {}; classes will be reported by index",
            path.display()
        );
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read labels from {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
