//! Detection reporting.
//!
//! Detections are reported, never drawn onto the frame.

use std::sync::{Arc, Mutex};

use crate::detect::Observation;
use crate::frame::Frame;

/// Receives every observation the detector produces.
pub trait DetectionSink: Send + Sync {
    fn report(&self, frame: &Frame, observation: &Observation);
}

/// Writes detections to the log at info level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl DetectionSink for LogSink {
    fn report(&self, frame: &Frame, observation: &Observation) {
        log::info!(
            "Detected {} with confidence {:.2} at {} (frame #{})",
            observation.label(),
            observation.confidence,
            observation.bounding_box,
            frame.sequence
        );
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DetectionReport {
    pub sequence: u64,
    pub observation: Observation,
}

/// Keeps reports in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    reports: Arc<Mutex<Vec<DetectionReport>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<DetectionReport> {
        self.reports
            .lock()
            .map(|reports| reports.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn len(&self) -> usize {
        self.reports().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DetectionSink for MemorySink {
    fn report(&self, frame: &Frame, observation: &Observation) {
        let report = DetectionReport {
            sequence: frame.sequence,
            observation: observation.clone(),
        };
        match self.reports.lock() {
            Ok(mut reports) => reports.push(report),
            Err(poisoned) => poisoned.into_inner().push(report),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    #[test]
    fn memory_sink_clones_share_reports() {
        let sink = MemorySink::new();
        let handle = sink.clone();
        let frame = Frame::from_rgb(vec![0; 3], 1, 1, 7).unwrap();
        let observation = Observation::new("bottle", 0.92, BoundingBox::new(0.1, 0.1, 0.5, 0.5));

        sink.report(&frame, &observation);
        LogSink.report(&frame, &observation);

        let reports = handle.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].sequence, 7);
        assert_eq!(reports[0].observation, observation);
    }
}
