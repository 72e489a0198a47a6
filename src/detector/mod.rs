//! The hand pose detection capability.
//!
//! The pipeline only depends on the [`PoseDetector`] trait, so any detector can be plugged in.
//! [`onnx::HandLandmarkNetwork`] is the implementation used by the demo.

pub mod onnx;

use crate::{frame::Frame, landmark::LandmarkPoint, timer::Timer};

/// Parameters passed along with every detection request.
///
/// The default configuration tracks a single hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorConfig {
    max_subjects: usize,
}

impl DetectorConfig {
    /// Creates a configuration that reports at most `max_subjects` hands per frame.
    pub fn new(max_subjects: usize) -> Self {
        Self { max_subjects }
    }

    #[inline]
    pub fn max_subjects(&self) -> usize {
        self.max_subjects
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self { max_subjects: 1 }
    }
}

/// The landmarks reported for one detected hand.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandObservation {
    points: Vec<LandmarkPoint>,
    confidence: f32,
}

impl HandObservation {
    pub fn new(points: Vec<LandmarkPoint>, confidence: f32) -> Self {
        Self { points, confidence }
    }

    /// All recognized landmarks. May be empty.
    #[inline]
    pub fn recognized_points(&self) -> &[LandmarkPoint] {
        &self.points
    }

    #[inline]
    pub fn confidence(&self) -> f32 {
        self.confidence
    }
}

/// A synchronous hand pose detector.
///
/// Called on the frame delivery thread, once per delivered frame.
pub trait PoseDetector: Send {
    /// Runs detection on `frame`.
    ///
    /// Returns one [`HandObservation`] per detected hand, at most `config.max_subjects()` of them,
    /// or an empty list if no hand was found.
    fn detect(
        &mut self,
        frame: &Frame,
        config: &DetectorConfig,
    ) -> anyhow::Result<Vec<HandObservation>>;

    /// Returns profiling timers to include in the pipeline's periodic log output.
    fn timers(&self) -> Vec<&Timer> {
        Vec::new()
    }
}

impl<D: PoseDetector + ?Sized> PoseDetector for Box<D> {
    fn detect(
        &mut self,
        frame: &Frame,
        config: &DetectorConfig,
    ) -> anyhow::Result<Vec<HandObservation>> {
        (**self).detect(frame, config)
    }

    fn timers(&self) -> Vec<&Timer> {
        (**self).timers()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use image::RgbaImage;
    use nalgebra::Point2;

    use crate::landmark::HandJoint;

    use super::*;

    struct Fixed;

    impl PoseDetector for Fixed {
        fn detect(
            &mut self,
            _frame: &Frame,
            config: &DetectorConfig,
        ) -> anyhow::Result<Vec<HandObservation>> {
            let hand = HandObservation::new(
                vec![LandmarkPoint::new(HandJoint::Wrist, Point2::new(0.5, 0.5), 1.0)],
                1.0,
            );
            Ok(vec![hand; config.max_subjects()])
        }
    }

    #[test]
    fn boxed_detector() {
        let mut detector: Box<dyn PoseDetector> = Box::new(Fixed);
        let frame = Frame::new(RgbaImage::new(2, 2), Duration::ZERO, 0);
        let hands = detector.detect(&frame, &DetectorConfig::default()).unwrap();
        assert_eq!(hands.len(), 1);
        assert_eq!(hands[0].recognized_points().len(), 1);
        assert!(detector.timers().is_empty());
    }
}
