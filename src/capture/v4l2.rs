//! V4L2 camera backend.
//!
//! Only `VIDEO_CAPTURE` devices yielding JFIF JPEG or Motion JPEG frames are supported. V4L2 does
//! not report which way a camera faces, so every device is treated as front facing.

use std::{cmp::Reverse, env};

use anyhow::{bail, Context};
use image::{ImageFormat, RgbaImage};
use linuxvideo::{
    format::{FrameIntervals, FrameSizes, PixFormat, PixelFormat as V4lPixelFormat},
    stream::ReadStream,
    BufType, CapabilityFlags, Device, Fract,
};

use crate::{
    frame::PixelFormat,
    resolution::Resolution,
    timer::{FpsCounter, Timer},
};

use super::{
    CaptureBackend, CaptureInput, DeviceHandle, DeviceKind, Facing, FrameReader, SessionPreset,
};

/// Selects the camera by its card name when set.
pub const ENV_VAR_CAMERA_NAME: &str = "HANDPOINT_CAMERA_NAME";

const DEFAULT_FPS: u32 = 30;
const STREAM_BUFFERS: u32 = 2;

/// Finds cameras through V4L2.
#[derive(Debug, Default, Clone)]
pub struct V4l2Backend {
    name: Option<String>,
}

impl V4l2Backend {
    /// Creates a backend that uses the first capture device found, or the one named by
    /// `HANDPOINT_CAMERA_NAME`.
    pub fn new() -> Self {
        let name = env::var(ENV_VAR_CAMERA_NAME).ok();
        if let Some(name) = &name {
            log::debug!(
                "camera override: `{}` is set to '{}'",
                ENV_VAR_CAMERA_NAME,
                name,
            );
        }
        Self { name }
    }

    /// Only uses the device with the given card name.
    pub fn with_name(self, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    /// Returns the card name and path of `dev` if it is a usable capture device.
    fn probe(&self, dev: &Device) -> anyhow::Result<Option<(String, String)>> {
        let caps = dev.capabilities()?;
        if let Some(name) = &self.name {
            if caps.card() != name {
                return Ok(None);
            }
        }

        let cap_flags = caps.device_capabilities();
        let path = dev.path()?;
        log::debug!(
            "device {} ({}) capabilities: {:?}",
            caps.card(),
            path.display(),
            cap_flags,
        );
        if !cap_flags.contains(CapabilityFlags::VIDEO_CAPTURE) {
            return Ok(None);
        }

        Ok(Some((caps.card().to_string(), path.display().to_string())))
    }

    /// Calls `f` with every usable capture device until it returns `Some`.
    fn find<T>(
        &self,
        mut f: impl FnMut(Device, String, String) -> Option<T>,
    ) -> anyhow::Result<Option<T>> {
        for res in linuxvideo::list()? {
            let dev = match res {
                Ok(dev) => dev,
                Err(e) => {
                    log::warn!("{}", e);
                    continue;
                }
            };
            match self.probe(&dev) {
                Ok(Some((name, path))) => {
                    if let Some(found) = f(dev, name, path) {
                        return Ok(Some(found));
                    }
                }
                Ok(None) => {}
                Err(e) => log::debug!("{}", e),
            }
        }
        Ok(None)
    }
}

impl CaptureBackend for V4l2Backend {
    fn default_device(&self, kind: DeviceKind, facing: Facing) -> Option<DeviceHandle> {
        match (kind, facing) {
            (DeviceKind::WideAngleCamera, Facing::Front) => {}
            (_, Facing::Back) => return None,
        }

        match self.find(|_, name, path| Some(DeviceHandle::new(name, path, facing))) {
            Ok(found) => found,
            Err(e) => {
                log::error!("failed to enumerate video devices: {e:#}");
                None
            }
        }
    }

    fn create_input(&self, device: &DeviceHandle) -> anyhow::Result<Box<dyn CaptureInput>> {
        let dev = self
            .find(|dev, _, path| (path == device.id()).then_some(dev))?
            .with_context(|| format!("device {} is gone", device.id()))?;
        let formats = FormatTable::query(&dev)?;
        Ok(Box::new(V4l2Input {
            name: device.name().to_string(),
            device: Some(dev),
            formats,
            negotiated: None,
        }))
    }
}

#[derive(Debug, Clone, Copy)]
struct FrameFormat {
    resolution: Resolution,
    frame_interval: Fract,
}

/// The frame sizes and rates a device offers for its JPEG format.
struct FormatTable {
    pixel_format: Option<V4lPixelFormat>,
    formats: Vec<FrameFormat>,
}

impl FormatTable {
    fn query(device: &Device) -> anyhow::Result<Self> {
        let mut pixel_format = None;
        for format in device.formats(BufType::VIDEO_CAPTURE) {
            let format = format?;
            if format.pixel_format() == V4lPixelFormat::JPEG
                || format.pixel_format() == V4lPixelFormat::MJPG
            {
                pixel_format = Some(format.pixel_format());
                break;
            }
        }

        let Some(pixel_format) = pixel_format else {
            return Ok(Self {
                pixel_format: None,
                formats: Vec::new(),
            });
        };

        let mut formats = Vec::new();
        match device.frame_sizes(pixel_format)? {
            FrameSizes::Discrete(sizes) => {
                for size in sizes {
                    let intervals =
                        match device.frame_intervals(pixel_format, size.width(), size.height())? {
                            FrameIntervals::Discrete(intervals) => intervals,
                            FrameIntervals::Stepwise(_) | FrameIntervals::Continuous(_) => {
                                bail!("stepwise or continuous frame rates are not supported")
                            }
                        };
                    for rate in intervals {
                        formats.push(FrameFormat {
                            resolution: Resolution::new(size.width(), size.height()),
                            frame_interval: *rate.fract(),
                        });
                    }
                }
            }
            FrameSizes::Stepwise(_) | FrameSizes::Continuous(_) => {
                bail!("stepwise or continuous resolutions are not supported");
            }
        }

        Ok(Self {
            pixel_format: Some(pixel_format),
            formats,
        })
    }

    /// Picks a format offering at least `resolution` at `fps`. If there is none, the frame rate
    /// and then the resolution requirement is dropped.
    fn negotiate(&self, resolution: Resolution, fps: u32) -> Option<(PixFormat, Fract)> {
        let pixel_format = self.pixel_format?;
        let mut resolution = Some(resolution);
        let mut fps = Some(fps);
        loop {
            if let Some(fmt) = self.negotiate_step(resolution, fps) {
                return Some((
                    PixFormat::new(
                        fmt.resolution.width(),
                        fmt.resolution.height(),
                        pixel_format,
                    ),
                    fmt.frame_interval,
                ));
            }

            log::debug!(
                "failed to negotiate format with resolution {:?} and fps {:?}",
                resolution,
                fps,
            );
            if fps.take().is_none() && resolution.take().is_none() {
                return None;
            }
        }
    }

    fn negotiate_step(
        &self,
        resolution: Option<Resolution>,
        fps: Option<u32>,
    ) -> Option<FrameFormat> {
        let eligible = self.formats.iter().copied().filter(|fmt| {
            resolution.map_or(true, |res| {
                fmt.resolution.width() >= res.width() && fmt.resolution.height() >= res.height()
            }) && fps.map_or(true, |fps| {
                (1.0 / fmt.frame_interval.as_f32()).round() >= fps as f32
            })
        });
        match resolution {
            // The smallest size covering the request, at the highest frame rate.
            Some(_) => eligible.min_by_key(|fmt| (fmt.resolution.num_pixels(), fmt.frame_interval)),
            None => eligible
                .max_by_key(|fmt| (fmt.resolution.num_pixels(), Reverse(fmt.frame_interval))),
        }
    }
}

struct V4l2Input {
    name: String,
    device: Option<Device>,
    formats: FormatTable,
    negotiated: Option<(PixFormat, Fract)>,
}

impl CaptureInput for V4l2Input {
    fn supports_preset(&self, preset: SessionPreset) -> bool {
        self.formats
            .negotiate(preset.resolution(), DEFAULT_FPS)
            .is_some()
    }

    fn supports_pixel_format(&self, format: PixelFormat) -> bool {
        match format {
            PixelFormat::Rgba8 => self.formats.pixel_format.is_some(),
        }
    }

    fn commit(
        &mut self,
        preset: SessionPreset,
        _format: PixelFormat,
    ) -> anyhow::Result<Resolution> {
        let Some((pixfmt, fract)) = self.formats.negotiate(preset.resolution(), DEFAULT_FPS) else {
            bail!("failed to negotiate a camera format");
        };
        let resolution = Resolution::new(pixfmt.width(), pixfmt.height());
        self.negotiated = Some((pixfmt, fract));
        Ok(resolution)
    }

    fn open(&mut self) -> anyhow::Result<Box<dyn FrameReader>> {
        let Some((pixfmt, fract)) = self.negotiated.take() else {
            bail!("capture format was not committed");
        };
        let Some(device) = self.device.take() else {
            bail!("device '{}' is already streaming", self.name);
        };

        let capture = device.video_capture(pixfmt)?;
        let format = capture.format();
        let width = format.width();
        let height = format.height();
        let actual = capture.set_frame_interval(fract)?;

        log::info!(
            "opened {}, {}x{} @ {:.1}Hz",
            self.name,
            width,
            height,
            1.0 / actual.as_f32(),
        );

        let stream = capture.into_stream()?;
        Ok(Box::new(V4l2Reader {
            stream,
            width,
            height,
            t_dequeue: Timer::new("dequeue"),
            t_decode: Timer::new("decode"),
            fps: FpsCounter::new(format!("{} stream", self.name)),
        }))
    }
}

struct V4l2Reader {
    stream: ReadStream,
    width: u32,
    height: u32,
    t_dequeue: Timer,
    t_decode: Timer,
    fps: FpsCounter,
}

impl FrameReader for V4l2Reader {
    fn read(&mut self) -> anyhow::Result<Option<RgbaImage>> {
        let dequeue_guard = self.t_dequeue.start();
        let (width, height) = (self.width, self.height);
        let t_decode = &self.t_decode;
        let image = self.stream.dequeue(|buf| {
            drop(dequeue_guard);
            let decoded =
                t_decode.time(|| image::load_from_memory_with_format(&buf, ImageFormat::Jpeg));
            let image = match decoded {
                Ok(image) => image.into_rgba8(),
                Err(e) => {
                    // Webcams occasionally produce corrupted MJPG frames. A blank frame keeps the
                    // frame rate steady.
                    log::error!("camera decode error: {}", e);
                    RgbaImage::new(width, height)
                }
            };
            Ok(image)
        })?;

        self.fps.tick_with([&self.t_dequeue, &self.t_decode]);
        Ok(Some(image))
    }

    fn discard_pending(&mut self) -> anyhow::Result<()> {
        // At most every buffer can be filled already.
        for _ in 0..STREAM_BUFFERS {
            if self.stream.will_block()? {
                break;
            }
            self.stream.dequeue(|_| Ok(()))?;
            log::trace!("discarded stale camera buffer");
        }
        Ok(())
    }
}
