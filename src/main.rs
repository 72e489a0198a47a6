use std::{
    env,
    time::{Duration, Instant},
};

use handpoint::{
    capture::{v4l2::V4l2Backend, CaptureOptions},
    detector::onnx::HandLandmarkNetwork,
    error::LogErrorPresenter,
    geometry::PreviewGeometry,
    resolution::Resolution,
    session::SessionState,
    view::CameraView,
    Error,
};

const ENV_VAR_LANDMARK_MODEL: &str = "HANDPOINT_LANDMARK_MODEL";

/// How long to wait before showing the view again after capture was stopped by a failure.
const RESTART_DELAY: Duration = Duration::from_secs(3);

fn main() -> Result<(), Error> {
    handpoint::init_logger!();

    let model = env::var(ENV_VAR_LANDMARK_MODEL)
        .map_err(|_| format!("`{ENV_VAR_LANDMARK_MODEL}` must be set to an ONNX model path"))?;
    let detector = HandLandmarkNetwork::from_path(model)?;

    let geometry = PreviewGeometry::new(1280.0, 720.0, Resolution::RES_720P).mirrored(true);
    let mut view = CameraView::new(
        V4l2Backend::new(),
        CaptureOptions::default(),
        detector,
        geometry,
        Box::new(LogErrorPresenter),
    );

    view.did_appear()?;

    let mut stopped_at = None;
    let mut last_report = Instant::now();
    loop {
        view.process_next(Duration::from_millis(100));

        match (view.state(), stopped_at) {
            (SessionState::Stopped, None) => stopped_at = Some(Instant::now()),
            (SessionState::Stopped, Some(at)) if at.elapsed() > RESTART_DELAY => {
                log::info!("restarting capture");
                stopped_at = None;
                view.did_appear()?;
            }
            _ => {}
        }

        if last_report.elapsed() > Duration::from_secs(1) {
            let stats = view.stats();
            log::info!(
                "{:?}: {} markers, {} frames delivered, {} dropped",
                view.state(),
                view.overlay().markers().len(),
                stats.delivered,
                stats.dropped,
            );
            last_report = Instant::now();
        }
    }
}
