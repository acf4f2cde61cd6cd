use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::convert::Orientation;

/// Fixed resource name of the bundled model artifact (without extension).
pub const MODEL_RESOURCE_NAME: &str = "best";
/// Class names for the ONNX backend, one per line, next to the artifact.
pub const LABELS_RESOURCE_NAME: &str = "labels.txt";

const DEFAULT_DEVICE_URI: &str = "stub://back_camera";
const DEFAULT_DEVICE_FPS: u32 = 30;
const DEFAULT_DEVICE_WIDTH: u32 = 640;
const DEFAULT_DEVICE_HEIGHT: u32 = 480;
/// Largest accepted device width or height.
pub const MAX_DEVICE_DIMENSION: u32 = 16_384;
const DEFAULT_MODEL_DIR: &str = "models";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_SCORE_THRESHOLD: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_MAX_DETECTIONS: usize = 100;
const DEFAULT_PERMISSION_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_QUEUE_DEPTH: usize = 2;
const DEFAULT_RENDER_INTERVAL_MS: u64 = 33;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    device: Option<DeviceConfigFile>,
    model: Option<ModelConfigFile>,
    permission: Option<PermissionConfigFile>,
    pipeline: Option<PipelineSettingsFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DeviceConfigFile {
    uri: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    orientation: Option<Orientation>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelConfigFile {
    dir: Option<PathBuf>,
    backend: Option<ModelBackend>,
    input_size: Option<u32>,
    min_confidence: Option<f32>,
    score_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    max_detections: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PermissionConfigFile {
    mode: Option<PermissionMode>,
    grant_on_request: Option<bool>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineSettingsFile {
    queue_depth: Option<usize>,
    render_interval_ms: Option<u64>,
}

/// Which detection runtime loads the artifact.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelBackend {
    /// JSON artifact with fixed observations (`best.json`).
    #[default]
    Fixed,
    /// ONNX detector run by tract (`best.onnx`).
    Tract,
}

impl ModelBackend {
    pub fn artifact_extension(&self) -> &'static str {
        match self {
            ModelBackend::Fixed => "json",
            ModelBackend::Tract => "onnx",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(ModelBackend::Fixed),
            "tract" | "onnx" => Ok(ModelBackend::Tract),
            other => Err(anyhow!("unknown model backend '{}'", other)),
        }
    }
}

/// Where the camera permission answer comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionMode {
    /// Check access to the configured device node.
    #[default]
    Device,
    Authorized,
    Denied,
    Undetermined,
}

impl PermissionMode {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "device" => Ok(PermissionMode::Device),
            "authorized" => Ok(PermissionMode::Authorized),
            "denied" => Ok(PermissionMode::Denied),
            "undetermined" => Ok(PermissionMode::Undetermined),
            other => Err(anyhow!("unknown permission mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub device: DeviceConfig,
    pub model: ModelConfig,
    pub permission: PermissionConfig,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    /// `stub://name[?frames=N]`, `images://dir`, or a V4L2 node such as `/dev/video0`.
    pub uri: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub orientation: Orientation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub dir: PathBuf,
    pub backend: ModelBackend,
    /// Square input edge for the ONNX backend.
    pub input_size: u32,
    pub min_confidence: f32,
    /// Class score a raw ONNX proposal needs before suppression.
    pub score_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl ModelConfig {
    /// Path of the bundled artifact: `<dir>/best.<ext>`.
    pub fn artifact_path(&self) -> PathBuf {
        self.dir.join(format!(
            "{}.{}",
            MODEL_RESOURCE_NAME,
            self.backend.artifact_extension()
        ))
    }

    pub fn labels_path(&self) -> PathBuf {
        self.dir.join(LABELS_RESOURCE_NAME)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PermissionConfig {
    pub mode: PermissionMode,
    /// Answer given when an undetermined permission is requested.
    pub grant_on_request: bool,
    /// How long setup waits for a pending permission request.
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Capture → delivery queue capacity. The oldest frame is dropped when full.
    pub queue_depth: usize,
    pub render_interval: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        device_settings(DeviceConfigFile::default())
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        model_settings(ModelConfigFile::default())
    }
}

impl Default for PermissionConfig {
    fn default() -> Self {
        permission_settings(PermissionConfigFile::default())
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        pipeline_settings(PipelineSettingsFile::default())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_file(PipelineConfigFile::default())
    }
}

fn device_settings(file: DeviceConfigFile) -> DeviceConfig {
    DeviceConfig {
        uri: file.uri.unwrap_or_else(|| DEFAULT_DEVICE_URI.to_string()),
        width: file.width.unwrap_or(DEFAULT_DEVICE_WIDTH),
        height: file.height.unwrap_or(DEFAULT_DEVICE_HEIGHT),
        target_fps: file.target_fps.unwrap_or(DEFAULT_DEVICE_FPS),
        orientation: file.orientation.unwrap_or_default(),
    }
}

fn model_settings(file: ModelConfigFile) -> ModelConfig {
    ModelConfig {
        dir: file
            .dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR)),
        backend: file.backend.unwrap_or_default(),
        input_size: file.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
        min_confidence: file.min_confidence.unwrap_or(0.0),
        score_threshold: file.score_threshold.unwrap_or(DEFAULT_SCORE_THRESHOLD),
        iou_threshold: file.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
        max_detections: file.max_detections.unwrap_or(DEFAULT_MAX_DETECTIONS),
    }
}

fn permission_settings(file: PermissionConfigFile) -> PermissionConfig {
    PermissionConfig {
        mode: file.mode.unwrap_or_default(),
        grant_on_request: file.grant_on_request.unwrap_or(true),
        timeout: Duration::from_millis(
            file.timeout_ms.unwrap_or(DEFAULT_PERMISSION_TIMEOUT_MS),
        ),
    }
}

fn pipeline_settings(file: PipelineSettingsFile) -> PipelineSettings {
    PipelineSettings {
        queue_depth: file.queue_depth.unwrap_or(DEFAULT_QUEUE_DEPTH),
        render_interval: Duration::from_millis(
            file.render_interval_ms
                .unwrap_or(DEFAULT_RENDER_INTERVAL_MS),
        ),
    }
}

impl PipelineConfig {
    /// Defaults, then the JSON file named by `CAPTURE_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CAPTURE_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Defaults, then `path` if given, then env overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) if !path.as_os_str().is_empty() => Some(read_config_file(path)?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        Self {
            device: device_settings(file.device.unwrap_or_default()),
            model: model_settings(file.model.unwrap_or_default()),
            permission: permission_settings(file.permission.unwrap_or_default()),
            pipeline: pipeline_settings(file.pipeline.unwrap_or_default()),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(uri) = std::env::var("CAPTURE_DEVICE") {
            if !uri.trim().is_empty() {
                self.device.uri = uri;
            }
        }
        if let Ok(dir) = std::env::var("CAPTURE_MODEL_DIR") {
            if !dir.trim().is_empty() {
                self.model.dir = PathBuf::from(dir);
            }
        }
        if let Ok(backend) = std::env::var("CAPTURE_MODEL_BACKEND") {
            self.model.backend = ModelBackend::parse(&backend)?;
        }
        if let Ok(mode) = std::env::var("CAPTURE_PERMISSION") {
            self.permission.mode = PermissionMode::parse(&mode)?;
        }
        if let Ok(threshold) = std::env::var("CAPTURE_MIN_CONFIDENCE") {
            self.model.min_confidence = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("CAPTURE_MIN_CONFIDENCE must be a number"))?;
        }
        if let Ok(threshold) = std::env::var("CAPTURE_SCORE_THRESHOLD") {
            self.model.score_threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("CAPTURE_SCORE_THRESHOLD must be a number"))?;
        }
        if let Ok(depth) = std::env::var("CAPTURE_QUEUE_DEPTH") {
            self.pipeline.queue_depth = depth
                .trim()
                .parse()
                .map_err(|_| anyhow!("CAPTURE_QUEUE_DEPTH must be a positive integer"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.device.uri.trim().is_empty() {
            return Err(anyhow!("device uri must not be empty"));
        }
        if self.device.width == 0 || self.device.height == 0 {
            return Err(anyhow!("device dimensions must be non-zero"));
        }
        if self.device.width > MAX_DEVICE_DIMENSION || self.device.height > MAX_DEVICE_DIMENSION {
            return Err(anyhow!(
                "device dimensions must not exceed {}",
                MAX_DEVICE_DIMENSION
            ));
        }
        if !(0.0..=1.0).contains(&self.model.min_confidence) {
            return Err(anyhow!("min_confidence must be within 0..=1"));
        }
        if !(0.0..=1.0).contains(&self.model.score_threshold) {
            return Err(anyhow!("score_threshold must be within 0..=1"));
        }
        if !(0.0..=1.0).contains(&self.model.iou_threshold) {
            return Err(anyhow!("iou_threshold must be within 0..=1"));
        }
        if self.model.input_size == 0 {
            return Err(anyhow!("model input_size must be greater than zero"));
        }
        if self.model.max_detections == 0 {
            return Err(anyhow!("max_detections must be greater than zero"));
        }
        if self.pipeline.queue_depth == 0 {
            return Err(anyhow!("queue_depth must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = PipelineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.device.uri, DEFAULT_DEVICE_URI);
        assert_eq!(cfg.device.orientation, Orientation::Portrait);
        assert_eq!(cfg.model.artifact_path(), PathBuf::from("models/best.json"));
        assert_eq!(cfg.pipeline.queue_depth, 2);
        assert_eq!(cfg.model.score_threshold, DEFAULT_SCORE_THRESHOLD);
    }

    #[test]
    fn artifact_name_follows_backend() {
        let model = ModelConfig {
            backend: ModelBackend::Tract,
            dir: PathBuf::from("/opt/models"),
            ..ModelConfig::default()
        };
        assert_eq!(model.artifact_path(), PathBuf::from("/opt/models/best.onnx"));
        assert_eq!(model.labels_path(), PathBuf::from("/opt/models/labels.txt"));
    }

    #[test]
    fn validation_rejects_bad_ranges() {
        let mut cfg = PipelineConfig::default();
        cfg.model.min_confidence = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.pipeline.queue_depth = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.model.score_threshold = -0.1;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.device.width = MAX_DEVICE_DIMENSION + 1;
        assert!(cfg.validate().is_err());
        cfg.device.width = MAX_DEVICE_DIMENSION;
        cfg.validate().unwrap();
    }

    #[test]
    fn parses_backend_and_permission_names() {
        assert_eq!(ModelBackend::parse("ONNX").unwrap(), ModelBackend::Tract);
        assert!(ModelBackend::parse("coreml").is_err());
        assert_eq!(
            PermissionMode::parse(" denied ").unwrap(),
            PermissionMode::Denied
        );
    }
}
