//! Error taxonomy and user-visible error presentation.
//!
//! Failures are converted into one of the types here by the component that invoked the failing
//! operation, before they cross a thread boundary.

use thiserror::Error;

/// Device or session configuration failed.
///
/// Not retried automatically. The session stays idle until the next attempt to show the view.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("camera setup failed: {reason}")]
pub struct SetupError {
    reason: String,
}

impl SetupError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Returns the human-readable reason for the failure.
    #[inline]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// The pose detector failed on a frame.
///
/// Stops the capture session immediately; there is no automatic retry.
#[derive(Debug, Error)]
#[error("hand pose detection failed: {underlying}")]
pub struct VisionError {
    #[source]
    underlying: crate::Error,
}

impl VisionError {
    pub fn new(underlying: impl Into<crate::Error>) -> Self {
        Self {
            underlying: underlying.into(),
        }
    }

    /// Returns the error reported by the detector.
    pub fn underlying(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.underlying
    }
}

/// The camera stopped producing frames while the session was running.
#[derive(Debug, Error)]
#[error("camera capture failed: {underlying}")]
pub struct CaptureError {
    #[source]
    underlying: crate::Error,
}

impl CaptureError {
    pub fn new(underlying: impl Into<crate::Error>) -> Self {
        Self {
            underlying: underlying.into(),
        }
    }
}

/// Any error that ends up in front of the user.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Vision(#[from] VisionError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

/// Shows errors to the user.
///
/// Only ever invoked on the main thread, by [`CameraView`][crate::view::CameraView].
pub trait ErrorPresenter {
    /// Presents `error`. `context` describes what was being attempted when it happened.
    fn display(&mut self, error: &AppError, context: &str);
}

/// An [`ErrorPresenter`] that writes errors to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorPresenter;

impl ErrorPresenter for LogErrorPresenter {
    fn display(&mut self, error: &AppError, context: &str) {
        log::error!("{context}: {error}");
    }
}
