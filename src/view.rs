//! The camera view controller.
//!
//! [`CameraView`] lives on the main thread. It owns the session, the preview geometry and the
//! overlay, and applies the messages sent by the frame delivery and capture threads.

use std::time::Duration;

use crate::{
    capture::{CaptureBackend, CaptureOptions, CaptureStats, FrameSource},
    detector::PoseDetector,
    error::{AppError, ErrorPresenter, SetupError},
    geometry::{CoordinateMapper, PreviewGeometry},
    main_thread::{self, MainMsg, MainQueue},
    overlay::OverlayPresenter,
    pipeline::DetectionPipeline,
    session::{SessionLifecycle, SessionState},
};

pub struct CameraView<B: CaptureBackend> {
    lifecycle: SessionLifecycle<B>,
    geometry: PreviewGeometry,
    overlay: OverlayPresenter,
    errors: Box<dyn ErrorPresenter>,
    queue: MainQueue,
    last_sequence: Option<u64>,
}

impl<B: CaptureBackend> CameraView<B> {
    /// Creates the view and wires `detector` into the capture pipeline.
    ///
    /// Nothing is captured until [`CameraView::did_appear`] is called.
    pub fn new<D>(
        backend: B,
        options: CaptureOptions,
        detector: D,
        geometry: PreviewGeometry,
        errors: Box<dyn ErrorPresenter>,
    ) -> Self
    where
        D: PoseDetector + 'static,
    {
        let (main, queue) = main_thread::channel();
        let mut source = FrameSource::new(backend, options);
        let pipeline = DetectionPipeline::new(detector, source.control(), main.clone());
        source.register_consumer(pipeline.into_consumer());
        source.on_capture_error(move |e| {
            main.send(MainMsg::CaptureFailed(e));
        });

        Self {
            lifecycle: SessionLifecycle::new(source),
            overlay: OverlayPresenter::new(&geometry),
            geometry,
            errors,
            queue,
            last_sequence: None,
        }
    }

    /// The view became visible: builds the capture session if needed and starts capture.
    ///
    /// A setup failure is presented to the user and also returned.
    pub fn did_appear(&mut self) -> Result<(), SetupError> {
        match self.lifecycle.view_did_appear() {
            Ok(()) => {
                if let Some(config) = self.lifecycle.source().configuration() {
                    self.geometry.set_capture_resolution(config.resolution());
                }
                Ok(())
            }
            Err(e) => {
                self.errors
                    .display(&AppError::Setup(e.clone()), "Unable to start the camera");
                Err(e)
            }
        }
    }

    /// The view is about to disappear: stops capture.
    pub fn will_disappear(&mut self) {
        self.lifecycle.view_will_disappear();
    }

    /// Stops capture and discards the capture session.
    ///
    /// Messages the old session already sent are applied first. A rebuilt session numbers its
    /// frames from 0 again.
    pub fn teardown(&mut self) {
        self.lifecycle.teardown();
        self.process_pending();
        self.last_sequence = None;
    }

    /// Updates the preview geometry used for all following overlay updates.
    ///
    /// The capture resolution of `geometry` is replaced with the one of the running session, if
    /// there is one.
    pub fn set_preview_geometry(&mut self, mut geometry: PreviewGeometry) {
        if let Some(config) = self.lifecycle.source().configuration() {
            geometry.set_capture_resolution(config.resolution());
        }
        self.overlay.resize(&geometry);
        self.geometry = geometry;
    }

    /// Applies one message from the worker threads.
    pub fn handle(&mut self, msg: MainMsg) {
        match msg {
            MainMsg::Points { sequence, points } => {
                if let Some(last) = self.last_sequence {
                    if sequence <= last {
                        log::warn!("overlay update for frame {sequence} after frame {last}");
                    }
                }
                self.last_sequence = Some(sequence);

                let mapper = CoordinateMapper::new(&self.geometry);
                self.overlay.show(mapper.map(&points));
            }
            MainMsg::DetectorFailed(e) => {
                self.lifecycle.fail();
                self.errors
                    .display(&AppError::Vision(e), "Hand pose detection stopped");
            }
            MainMsg::CaptureFailed(e) => {
                self.lifecycle.fail();
                self.errors.display(&AppError::Capture(e), "Camera stopped");
            }
        }
    }

    /// Applies all messages that are already queued. Returns how many there were.
    pub fn process_pending(&mut self) -> usize {
        let mut count = 0;
        while let Some(msg) = self.queue.try_recv() {
            self.handle(msg);
            count += 1;
        }
        count
    }

    /// Waits up to `timeout` for a message and applies it. Returns whether there was one.
    pub fn process_next(&mut self, timeout: Duration) -> bool {
        match self.queue.recv_timeout(timeout) {
            Some(msg) => {
                self.handle(msg);
                true
            }
            None => false,
        }
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    #[inline]
    pub fn overlay(&self) -> &OverlayPresenter {
        &self.overlay
    }

    #[inline]
    pub fn geometry(&self) -> &PreviewGeometry {
        &self.geometry
    }

    /// Sequence number of the frame the overlay currently shows.
    #[inline]
    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn stats(&self) -> CaptureStats {
        self.lifecycle.source().stats()
    }

    #[inline]
    pub fn lifecycle(&self) -> &SessionLifecycle<B> {
        &self.lifecycle
    }
}
