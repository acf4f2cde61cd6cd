use anyhow::Result;

use capture_detect::config::{ModelBackend, ModelConfig};
use capture_detect::{Frame, ObjectDetector};

fn model_dir(artifact: Option<&str>) -> Result<tempfile::TempDir> {
    let dir = tempfile::tempdir()?;
    if let Some(json) = artifact {
        std::fs::write(dir.path().join("best.json"), json)?;
    }
    Ok(dir)
}

fn config(dir: &tempfile::TempDir) -> ModelConfig {
    ModelConfig {
        dir: dir.path().to_path_buf(),
        ..ModelConfig::default()
    }
}

fn frame() -> Frame {
    Frame::from_rgb(vec![128; 8 * 6 * 3], 6, 8, 0).unwrap()
}

#[test]
fn missing_artifact_is_a_load_error() -> Result<()> {
    let dir = model_dir(None)?;
    let err = ObjectDetector::load(&config(&dir)).err().expect("load must fail");
    assert!(err.to_string().contains("best.json"));
    Ok(())
}

#[test]
fn malformed_artifact_is_a_load_error() -> Result<()> {
    let dir = model_dir(Some("{ not json"))?;
    assert!(ObjectDetector::load(&config(&dir)).is_err());

    let out_of_range = model_dir(Some(
        r#"{ "observations": [ { "label": "bottle", "confidence": 1.7, "box": [0.1, 0.1, 0.5, 0.5] } ] }"#,
    ))?;
    assert!(ObjectDetector::load(&config(&out_of_range)).is_err());
    Ok(())
}

#[test]
fn fixed_artifact_loads_and_detects() -> Result<()> {
    let dir = model_dir(Some(
        r#"{
            "observations": [
                {
                    "label": "bottle",
                    "confidence": 0.92,
                    "box": [0.1, 0.1, 0.5, 0.5],
                    "alternatives": [ { "label": "cup", "confidence": 0.05 } ]
                },
                { "label": "chair", "confidence": 0.2, "box": [0.6, 0.6, 0.3, 0.3] }
            ]
        }"#,
    ))?;
    let detector = ObjectDetector::load(&config(&dir))?;
    assert_eq!(detector.model_name(), "fixed");

    let observations = detector.detect(&frame());
    assert_eq!(observations.len(), 2);
    assert_eq!(observations[0].label(), "bottle");
    assert_eq!(observations[0].labels[1].identifier, "cup");
    assert_eq!(observations[1].label(), "chair");
    for observation in &observations {
        assert!((0.0..=1.0).contains(&observation.confidence));
        let b = observation.bounding_box;
        for value in [b.x, b.y, b.width, b.height] {
            assert!(value.is_finite() && (0.0..=1.0).contains(&value));
        }
    }

    assert_eq!(detector.detect(&frame()), observations);
    Ok(())
}

#[test]
fn min_confidence_from_config_filters_observations() -> Result<()> {
    let dir = model_dir(Some(
        r#"{ "observations": [
            { "label": "bottle", "confidence": 0.92, "box": [0.1, 0.1, 0.5, 0.5] },
            { "label": "chair", "confidence": 0.2, "box": [0.6, 0.6, 0.3, 0.3] }
        ] }"#,
    ))?;
    let cfg = ModelConfig {
        min_confidence: 0.5,
        ..config(&dir)
    };
    let detector = ObjectDetector::load(&cfg)?;
    let labels: Vec<String> = detector
        .detect(&frame())
        .iter()
        .map(|obs| obs.label().to_string())
        .collect();
    assert_eq!(labels, vec!["bottle".to_string()]);
    Ok(())
}

#[cfg(not(feature = "backend-tract"))]
#[test]
fn onnx_backend_requires_feature() -> Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("best.onnx"), b"\x08\x07")?;
    let cfg = ModelConfig {
        dir: dir.path().to_path_buf(),
        backend: ModelBackend::Tract,
        ..ModelConfig::default()
    };
    let err = ObjectDetector::load(&cfg).err().expect("load must fail");
    assert!(err.to_string().contains("backend-tract"));
    Ok(())
}

#[cfg(feature = "backend-tract")]
#[test]
fn corrupt_onnx_artifact_is_a_load_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("best.onnx"), b"not an onnx model")?;
    let cfg = ModelConfig {
        dir: dir.path().to_path_buf(),
        backend: ModelBackend::Tract,
        ..ModelConfig::default()
    };
    assert!(ObjectDetector::load(&cfg).is_err());
    Ok(())
}
