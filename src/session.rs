//! The capture session state machine.
//!
//! ```text
//! Idle ──configure──▶ Configuring ──configured──▶ Running ◀──start──┐
//!  ▲                      │                        │               │
//!  └──configure failed────┘                        └──stop/fail──▶ Stopped
//!  ▲                                                                │
//!  └──────────────────────────── teardown ◀─────────────────────────┘
//! ```
//!
//! The capture session is built when leaving `Idle` and kept until the next teardown, so that
//! `Stopped -> Running` is cheap.

use crate::{
    capture::{CaptureBackend, FrameSource},
    error::SetupError,
};

/// State of a [`SessionLifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No capture session exists.
    #[default]
    Idle,
    /// The capture session is being built.
    Configuring,
    /// Frames are being delivered.
    Running,
    /// The capture session exists but delivers no frames.
    Stopped,
}

/// Something that happened to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Session setup begins.
    Configure,
    /// Session setup succeeded and capture starts.
    Configured,
    /// Session setup failed.
    ConfigureFailed,
    /// Capture is resumed.
    Start,
    /// Capture is stopped on request.
    Stop,
    /// Capture is stopped because the detector or camera failed.
    Fail,
    /// The session is discarded.
    Teardown,
}

impl SessionState {
    /// Returns the state reached by applying `event`, or `None` if `event` is not allowed in this
    /// state.
    pub fn transition(self, event: SessionEvent) -> Option<SessionState> {
        use SessionEvent::*;
        use SessionState::*;

        match (self, event) {
            (Idle, Configure) => Some(Configuring),
            (Configuring, Configured) => Some(Running),
            (Configuring, ConfigureFailed) => Some(Idle),
            (Stopped, Start) => Some(Running),
            (Running, Stop | Fail) => Some(Stopped),
            (Running | Stopped, Teardown) => Some(Idle),
            _ => None,
        }
    }
}

/// Drives a [`FrameSource`] from view visibility changes and failures.
pub struct SessionLifecycle<B: CaptureBackend> {
    state: SessionState,
    source: FrameSource<B>,
}

impl<B: CaptureBackend> SessionLifecycle<B> {
    /// Wraps `source`, which must not be configured yet.
    pub fn new(source: FrameSource<B>) -> Self {
        Self {
            state: SessionState::Idle,
            source,
        }
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[inline]
    pub fn source(&self) -> &FrameSource<B> {
        &self.source
    }

    #[inline]
    pub fn source_mut(&mut self) -> &mut FrameSource<B> {
        &mut self.source
    }

    /// The view became visible.
    ///
    /// Builds the capture session if there is none, and starts capture. If building the session
    /// fails, the state stays `Idle` and the error is returned for presentation.
    pub fn view_did_appear(&mut self) -> Result<(), SetupError> {
        match self.state {
            SessionState::Idle => {
                self.apply(SessionEvent::Configure);
                match self.source.configure() {
                    Ok(()) => {
                        self.apply(SessionEvent::Configured);
                        self.source.start();
                        Ok(())
                    }
                    Err(e) => {
                        self.apply(SessionEvent::ConfigureFailed);
                        Err(e)
                    }
                }
            }
            SessionState::Stopped => {
                self.apply(SessionEvent::Start);
                self.source.start();
                Ok(())
            }
            SessionState::Configuring | SessionState::Running => {
                log::debug!("view appeared while {:?}, nothing to do", self.state);
                Ok(())
            }
        }
    }

    /// The view is about to disappear. Stops capture but keeps the session.
    pub fn view_will_disappear(&mut self) {
        self.source.stop();
        self.apply(SessionEvent::Stop);
    }

    /// The detector or camera failed. Stops capture but keeps the session.
    ///
    /// Returns whether the session was running.
    pub fn fail(&mut self) -> bool {
        self.source.stop();
        self.apply(SessionEvent::Fail)
    }

    /// Discards the capture session, returning to `Idle`.
    pub fn teardown(&mut self) {
        self.source.teardown();
        self.apply(SessionEvent::Teardown);
    }

    fn apply(&mut self, event: SessionEvent) -> bool {
        match self.state.transition(event) {
            Some(next) => {
                log::debug!("session {:?} -> {:?} ({:?})", self.state, next, event);
                self.state = next;
                true
            }
            None => {
                log::trace!("ignoring {:?} while {:?}", event, self.state);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        capture::{
            virtual_camera::{SetupFault, VirtualCamera, VirtualDevice},
            CaptureOptions, Facing,
        },
        resolution::Resolution,
    };

    use super::*;

    fn lifecycle(camera: VirtualCamera) -> SessionLifecycle<VirtualCamera> {
        let mut source = FrameSource::new(camera, CaptureOptions::default());
        source.register_consumer(|_| {});
        SessionLifecycle::new(source)
    }

    fn front_camera() -> VirtualCamera {
        let (dev, _) = VirtualDevice::new("cam", Facing::Front, Resolution::RES_VGA);
        VirtualCamera::new().with_device(dev)
    }

    #[test]
    fn transitions() {
        use SessionEvent::*;
        use SessionState::*;

        assert_eq!(Idle.transition(Configure), Some(Configuring));
        assert_eq!(Configuring.transition(Configured), Some(Running));
        assert_eq!(Configuring.transition(ConfigureFailed), Some(Idle));
        assert_eq!(Running.transition(Stop), Some(Stopped));
        assert_eq!(Running.transition(Fail), Some(Stopped));
        assert_eq!(Stopped.transition(Start), Some(Running));
        assert_eq!(Stopped.transition(Teardown), Some(Idle));
        assert_eq!(Running.transition(Teardown), Some(Idle));

        assert_eq!(Idle.transition(Start), None);
        assert_eq!(Idle.transition(Stop), None);
        assert_eq!(Running.transition(Configure), None);
        assert_eq!(Stopped.transition(Configure), None);
        assert_eq!(Stopped.transition(Fail), None);
        assert_eq!(Configuring.transition(Start), None);
    }

    #[test]
    fn stop_start_reuses_session() {
        let mut lifecycle = lifecycle(front_camera());
        lifecycle.view_did_appear().unwrap();
        assert_eq!(lifecycle.state(), SessionState::Running);
        assert!(lifecycle.source().is_running());

        lifecycle.view_will_disappear();
        assert_eq!(lifecycle.state(), SessionState::Stopped);
        assert!(!lifecycle.source().is_running());
        assert!(lifecycle.source().is_configured());

        lifecycle.view_did_appear().unwrap();
        lifecycle.view_did_appear().unwrap();
        assert_eq!(lifecycle.state(), SessionState::Running);
        assert_eq!(lifecycle.source().sessions_built(), 1);
        assert_eq!(lifecycle.source().backend().inputs_created(), 1);
    }

    #[test]
    fn teardown_allows_rebuild() {
        let mut lifecycle = lifecycle(front_camera());
        lifecycle.view_did_appear().unwrap();
        lifecycle.teardown();
        assert_eq!(lifecycle.state(), SessionState::Idle);
        assert!(!lifecycle.source().is_configured());

        lifecycle.view_did_appear().unwrap();
        assert_eq!(lifecycle.state(), SessionState::Running);
        assert_eq!(lifecycle.source().sessions_built(), 2);
    }

    #[test]
    fn setup_failure_stays_idle() {
        let mut lifecycle = lifecycle(VirtualCamera::new());
        let err = lifecycle.view_did_appear().unwrap_err();
        assert_eq!(err.reason(), "no front facing camera");
        assert_eq!(lifecycle.state(), SessionState::Idle);

        lifecycle.view_will_disappear();
        assert_eq!(lifecycle.state(), SessionState::Idle);
    }

    #[test]
    fn setup_failure_reasons() {
        let cases = [
            (
                SetupFault::CreateInput,
                "could not create video device input",
            ),
            (
                SetupFault::Preset,
                "could not add video device input to the session",
            ),
            (
                SetupFault::PixelFormat,
                "could not add video data output to the session",
            ),
            (SetupFault::Open, "could not start video data output"),
        ];
        for (fault, reason) in cases {
            let (dev, _) = VirtualDevice::new("cam", Facing::Front, Resolution::RES_VGA);
            let mut lifecycle = lifecycle(VirtualCamera::new().with_device(dev.with_fault(fault)));
            let err = lifecycle.view_did_appear().unwrap_err();
            assert!(err.reason().starts_with(reason), "{:?}: {}", fault, err);
            assert_eq!(lifecycle.state(), SessionState::Idle);
            assert!(!lifecycle.source().is_configured());
            assert!(!lifecycle.source().is_running());

            // The consumer survives the failure, so the retry fails the same way.
            let err = lifecycle.source_mut().configure().unwrap_err();
            assert!(err.reason().starts_with(reason), "{:?}: {}", fault, err);
        }
    }

    #[test]
    fn failure_stops_once() {
        let mut lifecycle = lifecycle(front_camera());
        lifecycle.view_did_appear().unwrap();
        assert!(lifecycle.fail());
        assert!(!lifecycle.fail());
        assert_eq!(lifecycle.state(), SessionState::Stopped);
        assert!(!lifecycle.source().is_running());
    }
}
