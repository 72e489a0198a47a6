//! Camera capture.
//!
//! A [`FrameSource`] selects a camera through a [`CaptureBackend`], builds a capture session, and
//! delivers frames to a registered consumer on a dedicated worker thread. Frames that arrive while
//! the consumer is still busy with the previous one are dropped.

mod session;
pub mod v4l2;
pub mod virtual_camera;

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use image::RgbaImage;

use crate::{
    error::{CaptureError, SetupError},
    frame::{Frame, PixelFormat},
    resolution::Resolution,
};

use self::session::CaptureSession;

/// Which way a camera points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Facing {
    /// Towards the user.
    #[default]
    Front,
    /// Away from the user.
    Back,
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Facing::Front => "front",
            Facing::Back => "back",
        })
    }
}

/// Kind of capture device to look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeviceKind {
    /// A regular video camera.
    WideAngleCamera,
}

/// Output quality level of a capture session.
///
/// Backends pick the closest format they support, preferring at least the preset's resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPreset {
    /// 640x480
    Low,
    /// 1280x720
    Medium,
    /// 1920x1080
    #[default]
    High,
}

impl SessionPreset {
    pub fn resolution(&self) -> Resolution {
        match self {
            SessionPreset::Low => Resolution::RES_VGA,
            SessionPreset::Medium => Resolution::RES_720P,
            SessionPreset::High => Resolution::RES_1080P,
        }
    }
}

/// Identifies a capture device found by a [`CaptureBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    name: String,
    id: String,
    facing: Facing,
}

impl DeviceHandle {
    /// Creates a handle. `id` is backend-specific, eg. a device path.
    pub fn new(name: impl Into<String>, id: impl Into<String>, facing: Facing) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            facing,
        }
    }

    /// Human-readable device name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn facing(&self) -> Facing {
        self.facing
    }
}

/// Capture session options.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    facing: Facing,
    preset: SessionPreset,
    pixel_format: PixelFormat,
    queue_label: String,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            facing: Facing::Front,
            preset: SessionPreset::High,
            pixel_format: PixelFormat::Rgba8,
            queue_label: "camera feed output".into(),
        }
    }
}

impl CaptureOptions {
    /// Sets which way the camera to open should face. Defaults to [`Facing::Front`].
    #[inline]
    pub fn facing(self, facing: Facing) -> Self {
        Self { facing, ..self }
    }

    /// Sets the session preset. Defaults to [`SessionPreset::High`].
    #[inline]
    pub fn preset(self, preset: SessionPreset) -> Self {
        Self { preset, ..self }
    }

    /// Sets the pixel format frames are delivered in.
    #[inline]
    pub fn pixel_format(self, pixel_format: PixelFormat) -> Self {
        Self {
            pixel_format,
            ..self
        }
    }

    /// Sets the name of the frame delivery thread.
    #[inline]
    pub fn queue_label(self, label: impl Into<String>) -> Self {
        Self {
            queue_label: label.into(),
            ..self
        }
    }
}

/// The configuration of a built capture session. Immutable once the session is committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfiguration {
    device: DeviceHandle,
    preset: SessionPreset,
    pixel_format: PixelFormat,
    queue_label: String,
    resolution: Resolution,
}

impl CaptureConfiguration {
    #[inline]
    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    #[inline]
    pub fn preset(&self) -> SessionPreset {
        self.preset
    }

    #[inline]
    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    #[inline]
    pub fn queue_label(&self) -> &str {
        &self.queue_label
    }

    /// Resolution of the delivered frames.
    #[inline]
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }
}

/// Finds cameras and creates inputs for them.
pub trait CaptureBackend {
    /// Returns the default device of the given kind facing the given way, if there is one.
    fn default_device(&self, kind: DeviceKind, facing: Facing) -> Option<DeviceHandle>;

    /// Creates an input for `device`.
    fn create_input(&self, device: &DeviceHandle) -> anyhow::Result<Box<dyn CaptureInput>>;
}

/// A camera input that can be attached to a capture session.
pub trait CaptureInput: Send {
    /// Returns whether the input can deliver frames for `preset`.
    fn supports_preset(&self, preset: SessionPreset) -> bool;

    /// Returns whether frames can be delivered in `format`.
    fn supports_pixel_format(&self, format: PixelFormat) -> bool;

    /// Fixes the capture format. Returns the resolution frames will have.
    fn commit(&mut self, preset: SessionPreset, format: PixelFormat) -> anyhow::Result<Resolution>;

    /// Starts streaming. Called once, on the capture thread, after [`CaptureInput::commit`].
    fn open(&mut self) -> anyhow::Result<Box<dyn FrameReader>>;
}

/// Reads frames from a streaming camera. Lives on the capture thread.
pub trait FrameReader {
    /// Reads the next frame.
    ///
    /// May block for up to one frame interval. Returns `Ok(None)` if no frame arrived in that
    /// time, so that the caller can check whether it should stop.
    fn read(&mut self) -> anyhow::Result<Option<RgbaImage>>;

    /// Drops every frame the camera has already produced, without waiting for new ones.
    ///
    /// Called when capture resumes, so that nothing recorded while stopped is delivered.
    fn discard_pending(&mut self) -> anyhow::Result<()>;
}

/// Receives every delivered frame on the frame delivery thread.
pub type FrameConsumer = Box<dyn FnMut(Frame) + Send>;

/// Receives camera failures on the capture thread.
pub type ErrorSink = Arc<dyn Fn(CaptureError) + Send + Sync>;

/// Frame counters of a [`FrameSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureStats {
    /// Frames handed to the consumer.
    pub delivered: u64,
    /// Frames discarded because the consumer was still busy.
    pub dropped: u64,
}

/// Shared run state of a [`FrameSource`].
///
/// Clones can be sent to other threads, eg. to stop capture from the frame consumer.
#[derive(Clone)]
pub struct CaptureControl {
    shared: Arc<Shared>,
}

struct Shared {
    running: AtomicBool,
    resumes: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl CaptureControl {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                resumes: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Halts frame delivery. Returns whether capture was running.
    ///
    /// Returns immediately. A frame that is already being processed is processed to completion,
    /// but no frame is delivered after it.
    pub fn stop(&self) -> bool {
        self.shared.running.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
        }
    }

    /// Returns whether capture was already running.
    ///
    /// Only called from the thread owning the [`FrameSource`].
    pub(crate) fn resume(&self) -> bool {
        if self.is_running() {
            return true;
        }
        // Incremented before `running` is set: whoever sees `running` also sees the new count.
        self.shared.resumes.fetch_add(1, Ordering::Release);
        self.shared.running.swap(true, Ordering::AcqRel)
    }

    /// Number of times capture went from stopped to running.
    fn resumes(&self) -> u64 {
        self.shared.resumes.load(Ordering::Acquire)
    }

    fn count_delivered(&self) {
        self.shared.delivered.fetch_add(1, Ordering::Relaxed);
    }

    fn count_dropped(&self) {
        self.shared.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for CaptureControl {
    fn default() -> Self {
        Self::new()
    }
}

/// A camera delivering frames to a consumer on a dedicated thread.
///
/// The underlying session is built once by [`FrameSource::configure`] and kept across
/// [`stop`][Self::stop]/[`start`][Self::start] cycles until [`teardown`][Self::teardown].
pub struct FrameSource<B: CaptureBackend> {
    backend: B,
    options: CaptureOptions,
    control: CaptureControl,
    consumer: Option<FrameConsumer>,
    errors: Option<ErrorSink>,
    session: Option<CaptureSession>,
    sessions_built: usize,
}

impl<B: CaptureBackend> FrameSource<B> {
    pub fn new(backend: B, options: CaptureOptions) -> Self {
        Self {
            backend,
            options,
            control: CaptureControl::new(),
            consumer: None,
            errors: None,
            session: None,
            sessions_built: 0,
        }
    }

    /// Registers the consumer that frames are delivered to.
    ///
    /// Takes effect the next time a session is built.
    pub fn register_consumer<F>(&mut self, consumer: F)
    where
        F: FnMut(Frame) + Send + 'static,
    {
        self.consumer = Some(Box::new(consumer));
    }

    /// Registers a callback invoked when the camera fails while running.
    ///
    /// Capture is stopped before the callback is invoked.
    pub fn on_capture_error<F>(&mut self, sink: F)
    where
        F: Fn(CaptureError) + Send + Sync + 'static,
    {
        self.errors = Some(Arc::new(sink));
    }

    /// Builds the capture session.
    ///
    /// Selects the default camera facing the configured way, creates an input for it, attaches
    /// input and frame output, and spawns the capture threads (in a stopped state). Either all of
    /// this succeeds, or nothing is retained and a [`SetupError`] is returned.
    ///
    /// Does nothing if a session already exists.
    pub fn configure(&mut self) -> Result<(), SetupError> {
        if self.session.is_some() {
            log::debug!("capture session already configured");
            return Ok(());
        }
        if self.consumer.is_none() {
            return Err(SetupError::new("no frame consumer registered"));
        }

        let CaptureOptions {
            facing,
            preset,
            pixel_format,
            ref queue_label,
        } = self.options;

        let device = self
            .backend
            .default_device(DeviceKind::WideAngleCamera, facing)
            .ok_or_else(|| SetupError::new(format!("no {facing} facing camera")))?;
        log::debug!("selected camera '{}' ({})", device.name(), device.id());

        let mut input = self
            .backend
            .create_input(&device)
            .map_err(|e| SetupError::new(format!("could not create video device input: {e}")))?;

        if !input.supports_preset(preset) {
            return Err(SetupError::new("could not add video device input to the session"));
        }
        if !input.supports_pixel_format(pixel_format) {
            return Err(SetupError::new("could not add video data output to the session"));
        }

        let resolution = input.commit(preset, pixel_format).map_err(|e| {
            SetupError::new(format!("could not commit session configuration: {e}"))
        })?;

        let configuration = CaptureConfiguration {
            device,
            preset,
            pixel_format,
            queue_label: queue_label.clone(),
            resolution,
        };

        let Some(consumer) = self.consumer.take() else {
            return Err(SetupError::new("no frame consumer registered"));
        };
        match CaptureSession::spawn(
            configuration,
            input,
            consumer,
            self.control.clone(),
            self.errors.clone(),
        ) {
            Ok(session) => {
                log::debug!("capture session configured: {:?}", session.configuration());
                self.session = Some(session);
                self.sessions_built += 1;
                Ok(())
            }
            Err((err, consumer)) => {
                match consumer {
                    Some(consumer) => self.consumer = Some(consumer),
                    None => log::warn!("frame consumer lost, it has to be registered again"),
                }
                Err(err)
            }
        }
    }

    /// Starts frame delivery.
    ///
    /// Does nothing if capture is already running. The session is never rebuilt here; if none
    /// has been configured, a warning is logged and nothing happens.
    pub fn start(&mut self) {
        let Some(session) = &self.session else {
            log::warn!("cannot start capture: no capture session configured");
            return;
        };
        if self.control.resume() {
            log::debug!("capture already running");
            return;
        }
        log::info!(
            "starting capture from '{}'",
            session.configuration().device().name()
        );
        session.resume(self.control.resumes());
    }

    /// Halts frame delivery. Safe to call when not running.
    pub fn stop(&mut self) {
        if self.control.stop() {
            log::info!("capture stopped");
        }
    }

    /// Stops capture, joins the capture threads, and discards the session.
    ///
    /// The frame consumer is kept, so the session can be configured again afterwards.
    pub fn teardown(&mut self) {
        self.control.stop();
        if let Some(session) = self.session.take() {
            log::debug!("tearing down capture session");
            if let Some(consumer) = session.shutdown() {
                self.consumer = Some(consumer);
            }
        }
    }

    /// Returns a handle that can stop capture from other threads.
    pub fn control(&self) -> CaptureControl {
        self.control.clone()
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    #[inline]
    pub fn is_configured(&self) -> bool {
        self.session.is_some()
    }

    /// Returns the configuration of the current session.
    pub fn configuration(&self) -> Option<&CaptureConfiguration> {
        self.session.as_ref().map(|s| s.configuration())
    }

    /// Returns how many sessions have been built over the lifetime of this source.
    #[inline]
    pub fn sessions_built(&self) -> usize {
        self.sessions_built
    }

    pub fn stats(&self) -> CaptureStats {
        self.control.stats()
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: CaptureBackend> Drop for FrameSource<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}
