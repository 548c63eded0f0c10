//! Detector seam (SPEC_FULL.md §10.6): the animal-presence detector itself is
//! explicitly out of scope. This trait is the shape everything downstream
//! consumes, so a real detector can be dropped in without touching the
//! capture, state machine, recorder, or clip pipeline.

use crate::error::Result;
use crate::frame::{Detection, Frame};
use async_trait::async_trait;

#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Always-empty detector used in tests and as a safe default before a real
/// detector is wired in.
pub struct StubDetector;

#[async_trait]
impl Detector for StubDetector {
    async fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>> {
        Ok(Vec::new())
    }
}

/// Returns detections matching `class_ids`, or any detection at all if
/// `detect_any_animal` is set (SPEC_FULL.md §6 detection config).
pub fn matches_target(detections: &[Detection], class_ids: &[u32], detect_any_animal: bool) -> bool {
    if detect_any_animal {
        return !detections.is_empty();
    }
    detections.iter().any(|d| class_ids.contains(&d.class_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn detection(class_id: u32) -> Detection {
        Detection {
            class_id,
            class_name: "test".to_string(),
            confidence: 0.9,
            bbox: (0.0, 0.0, 1.0, 1.0),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn stub_detector_returns_nothing() {
        let detector = StubDetector;
        let frame = Frame::new(vec![0u8; 12], 2, 2, 0, Utc::now());
        assert!(detector.detect(&frame).await.unwrap().is_empty());
    }

    #[test]
    fn matches_target_respects_detect_any_flag() {
        let detections = vec![detection(99)];
        assert!(matches_target(&detections, &[1, 2, 3], true));
        assert!(!matches_target(&detections, &[1, 2, 3], false));
        assert!(matches_target(&detections, &[99], false));
    }
}
