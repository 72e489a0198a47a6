//! Per-frame detection.
//!
//! [`DetectionPipeline`] is the frame consumer: it runs on the frame delivery thread, calls the
//! [`PoseDetector`] on every delivered frame, and hands the result to the main thread. A detector
//! failure stops capture right away and is reported to the main thread; the detector is not
//! retried.

use crate::{
    capture::CaptureControl,
    detector::{DetectorConfig, PoseDetector},
    error::VisionError,
    frame::Frame,
    landmark::{CapturePoint, LandmarkPoint},
    main_thread::{MainHandle, MainMsg},
    timer::{FpsCounter, Timer},
};

pub struct DetectionPipeline<D: PoseDetector> {
    detector: D,
    config: DetectorConfig,
    capture: CaptureControl,
    main: MainHandle,
    t_detect: Timer,
    fps: FpsCounter,
}

impl<D: PoseDetector> DetectionPipeline<D> {
    /// Creates a pipeline that looks for a single hand with `detector`.
    ///
    /// `capture` is stopped when the detector fails.
    pub fn new(detector: D, capture: CaptureControl, main: MainHandle) -> Self {
        Self {
            detector,
            config: DetectorConfig::new(1),
            capture,
            main,
            t_detect: Timer::new("detect"),
            fps: FpsCounter::new("detection"),
        }
    }

    #[inline]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Processes one delivered frame.
    ///
    /// Enqueues exactly one [`MainMsg::Points`] for the frame, preceded by a
    /// [`MainMsg::DetectorFailed`] if the detector failed. Returns once both are enqueued.
    pub fn process(&mut self, frame: Frame) {
        let sequence = frame.sequence();
        let result = self
            .t_detect
            .time(|| self.detector.detect(&frame, &self.config));
        drop(frame);

        let points = match result {
            Ok(observations) => match observations.first() {
                Some(hand) => hand
                    .recognized_points()
                    .iter()
                    .map(LandmarkPoint::to_capture_space)
                    .collect::<Vec<CapturePoint>>(),
                None => Vec::new(),
            },
            Err(e) => {
                if self.capture.stop() {
                    log::info!("capture stopped after detector failure");
                }
                log::error!("detection failed on frame {}: {:#}", sequence, e);
                self.main.send(MainMsg::DetectorFailed(VisionError::new(e)));
                Vec::new()
            }
        };

        log::trace!("frame {}: {} points", sequence, points.len());
        self.main.send(MainMsg::Points { sequence, points });

        let mut timers = vec![&self.t_detect];
        timers.extend(self.detector.timers());
        self.fps.tick_with(timers);
    }

    /// Turns the pipeline into a frame consumer for
    /// [`FrameSource::register_consumer`][crate::capture::FrameSource::register_consumer].
    pub fn into_consumer(mut self) -> impl FnMut(Frame) + Send + 'static
    where
        D: 'static,
    {
        move |frame| self.process(frame)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::anyhow;
    use approx::assert_relative_eq;
    use image::RgbaImage;
    use nalgebra::Point2;

    use crate::{
        detector::HandObservation,
        landmark::HandJoint,
        main_thread::{self, MainQueue},
    };

    use super::*;

    /// Replays a fixed list of results.
    struct Scripted(Vec<anyhow::Result<Vec<HandObservation>>>);

    impl PoseDetector for Scripted {
        fn detect(
            &mut self,
            _frame: &Frame,
            config: &DetectorConfig,
        ) -> anyhow::Result<Vec<HandObservation>> {
            assert_eq!(config.max_subjects(), 1);
            self.0.remove(0)
        }
    }

    fn frame(sequence: u64) -> Frame {
        Frame::new(RgbaImage::new(4, 4), Duration::ZERO, sequence)
    }

    fn hand(points: &[(f32, f32)]) -> HandObservation {
        let points = points
            .iter()
            .zip(HandJoint::ALL)
            .map(|(&(x, y), joint)| LandmarkPoint::new(joint, Point2::new(x, y), 1.0))
            .collect();
        HandObservation::new(points, 1.0)
    }

    fn pipeline(
        script: Vec<anyhow::Result<Vec<HandObservation>>>,
    ) -> (DetectionPipeline<Scripted>, CaptureControl, MainQueue) {
        let (main, queue) = main_thread::channel();
        let control = CaptureControl::new();
        let pipeline = DetectionPipeline::new(Scripted(script), control.clone(), main);
        (pipeline, control, queue)
    }

    fn expect_points(queue: &MainQueue, expected_sequence: u64) -> Vec<CapturePoint> {
        match queue.try_recv() {
            Some(MainMsg::Points { sequence, points }) => {
                assert_eq!(sequence, expected_sequence);
                points
            }
            other => panic!("expected points, got {:?}", other),
        }
    }

    #[test]
    fn flips_y() {
        let (mut pipeline, _, queue) = pipeline(vec![Ok(vec![hand(&[(0.1, 0.2), (0.5, 1.0)])])]);
        pipeline.process(frame(7));

        let points = expect_points(&queue, 7);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].joint(), HandJoint::Wrist);
        assert_relative_eq!(points[0].position(), Point2::new(0.1, 0.8));
        assert_relative_eq!(points[1].position(), Point2::new(0.5, 0.0));
        assert!(queue.is_empty());
    }

    #[test]
    fn no_subject_clears() {
        let (mut pipeline, _, queue) = pipeline(vec![Ok(vec![hand(&[(0.5, 0.5)])]), Ok(vec![])]);
        pipeline.process(frame(0));
        pipeline.process(frame(1));

        assert_eq!(expect_points(&queue, 0).len(), 1);
        assert!(expect_points(&queue, 1).is_empty());
    }

    #[test]
    fn degenerate_subject_passes_through() {
        let (mut pipeline, _, queue) = pipeline(vec![Ok(vec![hand(&[])])]);
        pipeline.process(frame(0));
        assert!(expect_points(&queue, 0).is_empty());
    }

    #[test]
    fn only_first_subject_is_used() {
        let (mut pipeline, _, queue) = pipeline(vec![Ok(vec![
            hand(&[(0.0, 0.0)]),
            hand(&[(1.0, 1.0), (1.0, 1.0)]),
        ])]);
        pipeline.process(frame(0));
        assert_eq!(expect_points(&queue, 0).len(), 1);
    }

    #[test]
    fn failure_stops_capture() {
        let (mut pipeline, control, queue) = pipeline(vec![Err(anyhow!("model exploded"))]);
        control.resume();
        pipeline.process(frame(3));

        assert!(!control.is_running());
        match queue.try_recv() {
            Some(MainMsg::DetectorFailed(e)) => {
                assert_eq!(e.underlying().to_string(), "model exploded");
            }
            other => panic!("expected detector failure, got {:?}", other),
        }
        assert!(expect_points(&queue, 3).is_empty());
        assert!(queue.is_empty());
    }
}
