//! An in-process camera fed with images from another thread.
//!
//! Useful for replaying recorded footage and for exercising the capture pipeline without hardware.
//! Every setup step can be made to fail.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::bail;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use image::RgbaImage;

use crate::{frame::PixelFormat, resolution::Resolution};

use super::{
    CaptureBackend, CaptureInput, DeviceHandle, DeviceKind, Facing, FrameReader, SessionPreset,
};

/// How long a read waits for a fed image before returning `Ok(None)`.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Makes one step of session setup fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupFault {
    /// Creating the input fails.
    CreateInput,
    /// The input does not support any session preset.
    Preset,
    /// The input cannot deliver any pixel format.
    PixelFormat,
    /// Streaming cannot be started.
    Open,
}

/// A virtual camera device.
#[derive(Clone)]
pub struct VirtualDevice {
    name: String,
    facing: Facing,
    resolution: Resolution,
    frames: Receiver<Option<RgbaImage>>,
    fault: Option<SetupFault>,
}

impl VirtualDevice {
    /// Creates a device and the [`FrameFeeder`] that supplies its images.
    pub fn new(
        name: impl Into<String>,
        facing: Facing,
        resolution: Resolution,
    ) -> (Self, FrameFeeder) {
        let (sender, frames) = channel::unbounded();
        (
            Self {
                name: name.into(),
                facing,
                resolution,
                frames,
                fault: None,
            },
            FrameFeeder { sender, resolution },
        )
    }

    /// Makes session setup fail at `fault`.
    pub fn with_fault(self, fault: SetupFault) -> Self {
        Self {
            fault: Some(fault),
            ..self
        }
    }
}

/// Supplies images to a [`VirtualDevice`].
#[derive(Clone)]
pub struct FrameFeeder {
    sender: Sender<Option<RgbaImage>>,
    resolution: Resolution,
}

impl FrameFeeder {
    /// Queues an image to be read as the next frame.
    ///
    /// Returns `false` if the device no longer exists.
    pub fn send(&self, image: RgbaImage) -> bool {
        self.sender.send(Some(image)).is_ok()
    }

    /// Queues a black image of the device's resolution.
    pub fn send_blank(&self) -> bool {
        self.send(RgbaImage::new(
            self.resolution.width(),
            self.resolution.height(),
        ))
    }

    /// Makes the next read fail, as if the camera had been unplugged.
    pub fn send_failure(&self) -> bool {
        self.sender.send(None).is_ok()
    }

    #[inline]
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }
}

/// A [`CaptureBackend`] made of [`VirtualDevice`]s.
#[derive(Default)]
pub struct VirtualCamera {
    devices: Vec<VirtualDevice>,
    inputs_created: Arc<AtomicUsize>,
}

impl VirtualCamera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a device. The first device facing a given way is the default for that direction.
    pub fn with_device(mut self, device: VirtualDevice) -> Self {
        self.devices.push(device);
        self
    }

    /// Returns how many inputs have been created so far.
    pub fn inputs_created(&self) -> usize {
        self.inputs_created.load(Ordering::Relaxed)
    }
}

impl CaptureBackend for VirtualCamera {
    fn default_device(&self, _kind: DeviceKind, facing: Facing) -> Option<DeviceHandle> {
        self.devices
            .iter()
            .enumerate()
            .find(|(_, dev)| dev.facing == facing)
            .map(|(i, dev)| DeviceHandle::new(dev.name.clone(), format!("virtual:{i}"), facing))
    }

    fn create_input(&self, device: &DeviceHandle) -> anyhow::Result<Box<dyn CaptureInput>> {
        let Some(dev) = device
            .id()
            .strip_prefix("virtual:")
            .and_then(|i| i.parse::<usize>().ok())
            .and_then(|i| self.devices.get(i))
        else {
            bail!("unknown virtual device '{}'", device.id());
        };
        if dev.fault == Some(SetupFault::CreateInput) {
            bail!("virtual device '{}' refused to open", dev.name);
        }

        self.inputs_created.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(VirtualInput {
            device: dev.clone(),
        }))
    }
}

struct VirtualInput {
    device: VirtualDevice,
}

impl CaptureInput for VirtualInput {
    fn supports_preset(&self, _preset: SessionPreset) -> bool {
        self.device.fault != Some(SetupFault::Preset)
    }

    fn supports_pixel_format(&self, format: PixelFormat) -> bool {
        self.device.fault != Some(SetupFault::PixelFormat) && format == PixelFormat::Rgba8
    }

    fn commit(
        &mut self,
        preset: SessionPreset,
        _format: PixelFormat,
    ) -> anyhow::Result<Resolution> {
        log::debug!(
            "virtual camera '{}' delivers {} for preset {:?}",
            self.device.name,
            self.device.resolution,
            preset,
        );
        Ok(self.device.resolution)
    }

    fn open(&mut self) -> anyhow::Result<Box<dyn FrameReader>> {
        if self.device.fault == Some(SetupFault::Open) {
            bail!(
                "virtual device '{}' failed to start streaming",
                self.device.name
            );
        }
        Ok(Box::new(VirtualReader {
            frames: self.device.frames.clone(),
        }))
    }
}

struct VirtualReader {
    frames: Receiver<Option<RgbaImage>>,
}

impl FrameReader for VirtualReader {
    fn read(&mut self) -> anyhow::Result<Option<RgbaImage>> {
        match self.frames.recv_timeout(POLL_INTERVAL) {
            Ok(Some(image)) => Ok(Some(image)),
            Ok(None) => bail!("virtual camera disconnected"),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                // All feeders are gone. Don't spin.
                std::thread::sleep(POLL_INTERVAL);
                Ok(None)
            }
        }
    }

    fn discard_pending(&mut self) -> anyhow::Result<()> {
        let mut discarded = 0;
        for image in self.frames.try_iter() {
            if image.is_none() {
                bail!("virtual camera disconnected");
            }
            discarded += 1;
        }
        log::trace!("discarded {discarded} stale frames");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_device_by_facing() {
        let (back, _) = VirtualDevice::new("rear", Facing::Back, Resolution::RES_VGA);
        let (front, _) = VirtualDevice::new("selfie", Facing::Front, Resolution::RES_VGA);
        let camera = VirtualCamera::new().with_device(back).with_device(front);

        let dev = camera
            .default_device(DeviceKind::WideAngleCamera, Facing::Front)
            .unwrap();
        assert_eq!(dev.name(), "selfie");
        assert_eq!(dev.id(), "virtual:1");
        assert_eq!(camera.inputs_created(), 0);
        camera.create_input(&dev).unwrap();
        assert_eq!(camera.inputs_created(), 1);
    }

    #[test]
    fn reads_fed_frames() {
        let (dev, feeder) = VirtualDevice::new("cam", Facing::Front, Resolution::new(4, 2));
        let camera = VirtualCamera::new().with_device(dev);
        let handle = camera
            .default_device(DeviceKind::WideAngleCamera, Facing::Front)
            .unwrap();
        let mut input = camera.create_input(&handle).unwrap();
        assert_eq!(
            input
                .commit(SessionPreset::High, PixelFormat::Rgba8)
                .unwrap(),
            Resolution::new(4, 2)
        );
        let mut reader = input.open().unwrap();

        assert!(reader.read().unwrap().is_none());
        assert!(feeder.send_blank());
        let image = reader.read().unwrap().unwrap();
        assert_eq!((image.width(), image.height()), (4, 2));
        assert!(feeder.send_failure());
        reader.read().unwrap_err();
    }

    #[test]
    fn create_input_fault() {
        let (dev, _) = VirtualDevice::new("cam", Facing::Front, Resolution::RES_VGA);
        let camera = VirtualCamera::new().with_device(dev.with_fault(SetupFault::CreateInput));
        let handle = camera
            .default_device(DeviceKind::WideAngleCamera, Facing::Front)
            .unwrap();
        assert!(camera.create_input(&handle).is_err());
        assert_eq!(camera.inputs_created(), 0);
    }
}
