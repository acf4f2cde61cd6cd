use std::fmt;

/// Label used when a model returns an observation without any candidates.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Axis-aligned box in normalized image coordinates.
///
/// Origin is the top-left corner of the frame, y grows downwards, and all four
/// fields lie in `0..=1`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Build a box, clamping it into the unit square.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        let x = unit(x);
        let y = unit(y);
        Self {
            x,
            y,
            width: unit(width).min(1.0 - x),
            height: unit(height).min(1.0 - y),
        }
    }

    /// Build a box from corner coordinates.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x.max(other.x);
        let iy1 = self.y.max(other.y);
        let ix2 = (self.x + self.width).min(other.x + other.width);
        let iy2 = (self.y + self.height).min(other.y + other.height);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        inter / (self.area() + other.area() - inter)
    }

    fn is_finite(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(x: {:.3}, y: {:.3}, w: {:.3}, h: {:.3})",
            self.x, self.y, self.width, self.height
        )
    }
}

/// One candidate classification for an observation.
#[derive(Clone, Debug, PartialEq)]
pub struct Label {
    pub identifier: String,
    pub confidence: f32,
}

impl Label {
    pub fn new(identifier: impl Into<String>, confidence: f32) -> Self {
        Self {
            identifier: identifier.into(),
            confidence,
        }
    }
}

/// Result of one detection pass for one object.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    pub bounding_box: BoundingBox,
    pub confidence: f32,
    /// Candidate labels, best first.
    pub labels: Vec<Label>,
}

impl Observation {
    /// Single-label observation.
    pub fn new(label: impl Into<String>, confidence: f32, bounding_box: BoundingBox) -> Self {
        Self {
            bounding_box,
            confidence,
            labels: vec![Label::new(label, confidence)],
        }
    }

    /// The first candidate label, or `"Unknown"`.
    pub fn label(&self) -> &str {
        self.labels
            .first()
            .map(|label| label.identifier.as_str())
            .unwrap_or(UNKNOWN_LABEL)
    }

    /// Clamp confidences and box into range. Non-finite values reject the observation.
    pub(crate) fn sanitized(mut self) -> Option<Self> {
        if !self.confidence.is_finite() || !self.bounding_box.is_finite() {
            return None;
        }
        self.confidence = unit(self.confidence);
        let b = self.bounding_box;
        self.bounding_box = BoundingBox::new(b.x, b.y, b.width, b.height);
        self.labels.retain(|label| label.confidence.is_finite());
        for label in &mut self.labels {
            label.confidence = unit(label.confidence);
        }
        Some(self)
    }
}

/// Outcome of a detection pass.
///
/// Keeps "nothing detected" apart from "detection failed".
#[derive(Clone, Debug, PartialEq)]
pub enum DetectionOutcome {
    Detected(Vec<Observation>),
    Failed(String),
}

impl DetectionOutcome {
    /// Observations, empty on failure.
    pub fn into_observations(self) -> Vec<Observation> {
        match self {
            DetectionOutcome::Detected(observations) => observations,
            DetectionOutcome::Failed(_) => Vec::new(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, DetectionOutcome::Failed(_))
    }
}

fn unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}
