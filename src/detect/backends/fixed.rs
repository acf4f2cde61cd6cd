use std::path::Path;

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::detect::backend::DetectionModel;
use crate::detect::result::{BoundingBox, Label, Observation};
use crate::frame::Frame;

/// Model that reports the same observations for every frame.
///
/// Used for bring-up and tests. The artifact form is a JSON document:
///
/// ```json
/// { "observations": [ { "label": "bottle", "confidence": 0.92, "box": [0.1, 0.1, 0.5, 0.5] } ] }
/// ```
///
/// `box` is `[x, y, width, height]`, normalized, top-left origin.
#[derive(Clone, Debug, Default)]
pub struct FixedModel {
    observations: Vec<Observation>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FixedArtifact {
    observations: Vec<FixedObservation>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FixedObservation {
    label: String,
    confidence: f32,
    #[serde(rename = "box")]
    bbox: [f32; 4],
    #[serde(default)]
    alternatives: Vec<FixedLabel>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FixedLabel {
    label: String,
    confidence: f32,
}

impl FixedModel {
    pub fn new(observations: Vec<Observation>) -> Self {
        Self { observations }
    }

    /// Parse a JSON artifact. Out-of-range values make the artifact malformed.
    pub fn from_artifact(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read model artifact {}: {}", path.display(), e))?;
        Self::from_json(&raw)
            .map_err(|e| anyhow!("invalid model artifact {}: {:#}", path.display(), e))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let artifact: FixedArtifact = serde_json::from_str(raw)?;
        let observations = artifact
            .observations
            .into_iter()
            .enumerate()
            .map(|(idx, obs)| obs.into_observation(idx))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { observations })
    }
}

impl FixedObservation {
    fn into_observation(self, idx: usize) -> Result<Observation> {
        check_unit(self.confidence, idx, "confidence")?;
        for value in self.bbox {
            check_unit(value, idx, "box")?;
        }
        let [x, y, w, h] = self.bbox;
        if x + w > 1.0 || y + h > 1.0 {
            return Err(anyhow!("observation {}: box extends past the frame", idx));
        }

        let mut labels = vec![Label::new(self.label, self.confidence)];
        for alt in self.alternatives {
            check_unit(alt.confidence, idx, "alternative confidence")?;
            labels.push(Label::new(alt.label, alt.confidence));
        }
        Ok(Observation {
            bounding_box: BoundingBox::new(x, y, w, h),
            confidence: self.confidence,
            labels,
        })
    }
}

fn check_unit(value: f32, idx: usize, field: &str) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!(
            "observation {}: {} {} outside 0..=1",
            idx,
            field,
            value
        ));
    }
    Ok(())
}

impl DetectionModel for FixedModel {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn infer(&self, _frame: &Frame) -> Result<Vec<Observation>> {
        Ok(self.observations.clone())
    }
}
