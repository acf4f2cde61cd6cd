use std::panic::{self, AssertUnwindSafe};

use anyhow::{anyhow, Result};

use crate::config::{ModelBackend, ModelConfig};
use crate::detect::backend::DetectionModel;
use crate::detect::backends::FixedModel;
use crate::detect::result::{DetectionOutcome, Observation};
use crate::frame::Frame;

/// Object detector wrapping one loaded model.
///
/// Loading is the only fatal step: a missing or malformed artifact is returned as
/// an error and the caller is expected to abort startup. Once loaded, every
/// detection pass is best-effort.
pub struct ObjectDetector {
    model: Box<dyn DetectionModel>,
    min_confidence: f32,
}

impl ObjectDetector {
    pub fn new(model: Box<dyn DetectionModel>) -> Self {
        Self {
            model,
            min_confidence: 0.0,
        }
    }

    /// Drop observations below `threshold`.
    pub fn with_min_confidence(mut self, threshold: f32) -> Self {
        self.min_confidence = threshold.clamp(0.0, 1.0);
        self
    }

    /// Load the bundled model artifact described by `config`.
    pub fn load(config: &ModelConfig) -> Result<Self> {
        let artifact = config.artifact_path();
        if !artifact.is_file() {
            return Err(anyhow!(
                "model artifact {} not found",
                artifact.display()
            ));
        }

        let model: Box<dyn DetectionModel> = match config.backend {
            ModelBackend::Fixed => Box::new(FixedModel::from_artifact(&artifact)?),
            ModelBackend::Tract => {
                #[cfg(feature = "backend-tract")]
                {
                    Box::new(crate::detect::backends::TractModel::load(config)?)
                }
                #[cfg(not(feature = "backend-tract"))]
                {
                    return Err(anyhow!(
                        "model backend 'tract' requires the backend-tract feature"
                    ));
                }
            }
        };
        model
            .warm_up()
            .map_err(|e| anyhow!("model warm-up failed: {:#}", e))?;

        log::info!(
            "loaded {} model from {}",
            model.name(),
            artifact.display()
        );
        Ok(Self::new(model).with_min_confidence(config.min_confidence))
    }

    pub fn model_name(&self) -> &'static str {
        self.model.name()
    }

    /// Run one detection pass. Failures come back as an empty list.
    pub fn detect(&self, frame: &Frame) -> Vec<Observation> {
        self.detect_outcome(frame).into_observations()
    }

    /// Run one detection pass, keeping failures distinguishable from empty results.
    pub fn detect_outcome(&self, frame: &Frame) -> DetectionOutcome {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.model.infer(frame)));
        match result {
            Ok(Ok(observations)) => DetectionOutcome::Detected(
                observations
                    .into_iter()
                    .filter_map(Observation::sanitized)
                    .filter(|obs| obs.confidence >= self.min_confidence)
                    .collect(),
            ),
            Ok(Err(err)) => DetectionOutcome::Failed(format!("{:#}", err)),
            Err(_) => DetectionOutcome::Failed(format!("{} model panicked", self.model.name())),
        }
    }
}
