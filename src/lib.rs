//! Live hand landmark overlay.
//!
//! Frames are captured on a dedicated worker thread, handed to a [`PoseDetector`] one at a time,
//! and the detected landmark points are sent to the thread owning the [`CameraView`], which maps
//! them into preview coordinates and draws them as markers.
//!
//! # Threads
//!
//! * The *capture* thread reads frames from the camera and offers them to the delivery worker. A
//!   frame that arrives while the previous one is still being processed is dropped.
//! * The *delivery* worker runs detection synchronously and hands the result to the main thread.
//! * The *main* thread owns the [`CameraView`], the overlay, and the session state machine.
//!
//! # Environment Variables
//!
//! * `HANDPOINT_CAMERA_NAME`: Forces the V4L2 device to use. If unset, the first device that
//!   supports a compatible image format will be used.
//! * `HANDPOINT_LANDMARK_MODEL`: Path to the ONNX hand landmark model used by the demo binary.
//!
//! [`PoseDetector`]: detector::PoseDetector
//! [`CameraView`]: view::CameraView

use log::LevelFilter;

pub mod capture;
pub mod detector;
pub mod drop;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod landmark;
pub mod main_thread;
pub mod overlay;
pub mod pipeline;
pub mod resolution;
pub mod session;
pub mod timer;
pub mod view;
pub mod worker;

/// Boxed error type used to carry underlying failures across thread boundaries.
pub type Error = Box<dyn std::error::Error + Sync + Send>;

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = if cfg!(debug_assertions) {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    };
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_PKG_NAME")), log_level)
        .filter(Some("tract"), LevelFilter::Warn)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// If `cfg!(debug_assertions)` is enabled, the calling crate and `handpoint` will log at *trace*
/// level. Otherwise, they will log at *debug* level.
///
/// `tract` will always log at *warn* level.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
