//! Decoding helpers for raw detector outputs.
#![cfg_attr(not(feature = "backend-tract"), allow(dead_code))]

use std::cmp::Ordering;

use anyhow::{anyhow, Result};

use crate::detect::result::{BoundingBox, Observation};

/// Candidate box in model input pixels before normalization.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Candidate {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
    pub class_id: usize,
    pub score: f32,
}

impl Candidate {
    /// Normalize a center-format box against a square input of `input_size` pixels.
    pub fn to_observation(self, input_size: f32, labels: &[String]) -> Observation {
        let label = labels
            .get(self.class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", self.class_id));
        let x1 = (self.cx - self.w / 2.0) / input_size;
        let y1 = (self.cy - self.h / 2.0) / input_size;
        let x2 = (self.cx + self.w / 2.0) / input_size;
        let y2 = (self.cy + self.h / 2.0) / input_size;
        Observation::new(label, self.score, BoundingBox::from_corners(x1, y1, x2, y2))
    }
}

/// Decode a row-major `[1, 4 + C, N]` YOLO output into observations.
///
/// Each of the `N` proposals keeps its best class; proposals scoring below
/// `score_threshold` are discarded. Results keep proposal order.
pub(crate) fn decode_proposals(
    data: &[f32],
    shape: &[usize],
    score_threshold: f32,
    input_size: f32,
    labels: &[String],
) -> Result<Vec<Observation>> {
    if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
        return Err(anyhow!("unexpected detector output shape {:?}", shape));
    }
    let (rows, proposals) = (shape[1], shape[2]);
    if data.len() != rows * proposals {
        return Err(anyhow!(
            "detector output holds {} values, shape {:?} needs {}",
            data.len(),
            shape,
            rows * proposals
        ));
    }
    let at = |row: usize, n: usize| data[row * proposals + n];

    let mut observations = Vec::new();
    for n in 0..proposals {
        let (class_id, score) = (0..rows - 4)
            .map(|c| (c, at(4 + c, n)))
            .fold((0, f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });
        if !score.is_finite() || score < score_threshold {
            continue;
        }
        let candidate = Candidate {
            cx: at(0, n),
            cy: at(1, n),
            w: at(2, n),
            h: at(3, n),
            class_id,
            score,
        };
        observations.push(candidate.to_observation(input_size, labels));
    }
    Ok(observations)
}

/// Greedy per-class NMS: highest confidence first, suppress overlaps above `iou_threshold`.
pub(crate) fn non_max_suppression(
    mut observations: Vec<Observation>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Observation> {
    observations.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept: Vec<Observation> = Vec::new();
    for candidate in observations {
        if kept.len() >= max_detections {
            break;
        }
        let overlaps = kept.iter().any(|existing| {
            existing.label() == candidate.label()
                && existing.bounding_box.iou(&candidate.bounding_box) > iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppresses_overlapping_boxes_of_same_class() {
        let observations = vec![
            Observation::new("bottle", 0.6, BoundingBox::new(0.1, 0.1, 0.4, 0.4)),
            Observation::new("bottle", 0.9, BoundingBox::new(0.12, 0.1, 0.4, 0.4)),
            Observation::new("can", 0.5, BoundingBox::new(0.1, 0.1, 0.4, 0.4)),
            Observation::new("bottle", 0.7, BoundingBox::new(0.6, 0.6, 0.2, 0.2)),
        ];
        let kept = non_max_suppression(observations, 0.45, 10);
        let summary: Vec<(&str, f32)> = kept.iter().map(|o| (o.label(), o.confidence)).collect();
        assert_eq!(summary, vec![("bottle", 0.9), ("bottle", 0.7), ("can", 0.5)]);
    }

    #[test]
    fn caps_detection_count() {
        let observations = (0..5)
            .map(|i| {
                Observation::new(
                    "cup",
                    0.5,
                    BoundingBox::new(i as f32 * 0.2, 0.0, 0.1, 0.1),
                )
            })
            .collect();
        assert_eq!(non_max_suppression(observations, 0.5, 3).len(), 3);
    }

    #[test]
    fn decodes_proposals_above_score_threshold() -> Result<()> {
        // [1, 4 + 2, 3]: rows are cx, cy, w, h, score(person), score(bottle).
        let data = [
            320.0, 64.0, 500.0, // cx
            320.0, 64.0, 500.0, // cy
            64.0, 32.0, 40.0, // w
            128.0, 32.0, 40.0, // h
            0.10, 0.90, 0.05, // person
            0.80, 0.20, 0.10, // bottle
        ];
        let labels = ["person".to_string(), "bottle".to_string()];
        let observations = decode_proposals(&data, &[1, 6, 3], 0.25, 640.0, &labels)?;

        let summary: Vec<(&str, f32)> = observations
            .iter()
            .map(|o| (o.label(), o.confidence))
            .collect();
        assert_eq!(summary, vec![("bottle", 0.80), ("person", 0.90)]);
        let first = observations[0].bounding_box;
        assert!((first.x - 0.45).abs() < 1e-6);
        assert!((first.width - 0.1).abs() < 1e-6);
        assert!((first.height - 0.2).abs() < 1e-6);
        let second = observations[1].bounding_box;
        assert!((second.x - 0.075).abs() < 1e-6);

        assert!(decode_proposals(&data, &[1, 6, 3], 0.95, 640.0, &labels)?.is_empty());
        Ok(())
    }

    #[test]
    fn rejects_malformed_output() {
        assert!(decode_proposals(&[0.0; 12], &[1, 4, 3], 0.25, 640.0, &[]).is_err());
        assert!(decode_proposals(&[0.0; 17], &[1, 6, 3], 0.25, 640.0, &[]).is_err());
    }

    #[test]
    fn candidate_normalizes_against_input_size() {
        let candidate = Candidate {
            cx: 320.0,
            cy: 320.0,
            w: 64.0,
            h: 128.0,
            class_id: 1,
            score: 0.8,
        };
        let obs = candidate.to_observation(640.0, &["person".into(), "bottle".into()]);
        assert_eq!(obs.label(), "bottle");
        assert!((obs.bounding_box.x - 0.45).abs() < 1e-6);
        assert!((obs.bounding_box.height - 0.2).abs() < 1e-6);

        let unnamed = candidate.to_observation(640.0, &[]);
        assert_eq!(unnamed.label(), "class_1");
    }
}
