//! Hand landmark estimation with an ONNX network.
//!
//! Expects a MediaPipe-style hand landmark network: a single square RGB input (NCHW or NHWC,
//! values in `[0.0, 1.0]`), a `[1, 63]` output holding 21 `(x, y, z)` landmarks in input pixel
//! coordinates, and a `[1, 1]` hand presence score.
//!
//! The whole frame is fed to the network, there is no palm detection stage. This works best when
//! the hand fills a good part of the image.

use std::path::Path;

use anyhow::{bail, Context};
use image::imageops::{self, FilterType};
use nalgebra::Point2;
use tract_onnx::prelude::{
    tract_ndarray, tvec, Framework, Graph, InferenceModelExt, SimplePlan, Tensor, TypedFact,
    TypedOp,
};

use crate::{
    detector::{DetectorConfig, HandObservation, PoseDetector},
    frame::Frame,
    landmark::{HandJoint, LandmarkPoint},
    resolution::{AspectRatio, Resolution},
    timer::Timer,
};

type Model = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

const NUM_LANDMARKS: usize = HandJoint::ALL.len();

/// Presence scores below this are reported as "no hand".
const DEFAULT_MIN_PRESENCE: f32 = 0.5;

/// Describes in what order the network expects its input image data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InputLayout {
    /// Shape is `[1, 3, H, W]`.
    Nchw,
    /// Shape is `[1, H, W, 3]`.
    Nhwc,
}

/// A neural network based hand landmark estimator.
pub struct HandLandmarkNetwork {
    model: Model,
    layout: InputLayout,
    input_res: Resolution,
    min_presence: f32,
    t_resize: Timer,
    t_infer: Timer,
}

impl HandLandmarkNetwork {
    /// Loads and optimizes the network from an ONNX file.
    ///
    /// Returns an error if the file cannot be read, if the network uses unsupported operations, or
    /// if its input does not look like a single square RGB image.
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        Self::from_path_impl(path.as_ref())
    }

    fn from_path_impl(path: &Path) -> anyhow::Result<Self> {
        match path.extension() {
            Some(ext) if ext == "onnx" => {}
            _ => bail!("neural network file must have `.onnx` extension"),
        }

        let graph = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("failed to read model from {}", path.display()))?
            .into_optimized()?;

        if graph.inputs.len() != 1 {
            bail!(
                "hand landmark network has to take 1 input, this one takes {}",
                graph.inputs.len()
            );
        }
        if graph.outputs.len() < 2 {
            bail!(
                "hand landmark network must output landmarks and presence, it has {} outputs",
                graph.outputs.len()
            );
        }

        let fact = graph.input_fact(0)?;
        let Some(shape) = fact.shape.as_concrete() else {
            bail!("hand landmark network has a symbolic input shape");
        };
        let (layout, w, h) = match *shape {
            [1, 3, h, w] => (InputLayout::Nchw, w, h),
            [1, h, w, 3] => (InputLayout::Nhwc, w, h),
            _ => bail!("invalid hand landmark network input shape: {:?}", shape),
        };
        let input_res = Resolution::new(w.try_into()?, h.try_into()?);
        if input_res.aspect_ratio() != Some(AspectRatio::SQUARE) {
            bail!(
                "hand landmark network input has to be square, this one is {} ({:?})",
                input_res,
                input_res.aspect_ratio(),
            );
        }

        let model = graph.into_runnable()?;
        log::debug!(
            "loaded hand landmark network from {} ({:?}, {})",
            path.display(),
            layout,
            input_res,
        );

        Ok(Self {
            model,
            layout,
            input_res,
            min_presence: DEFAULT_MIN_PRESENCE,
            t_resize: Timer::new("resize"),
            t_infer: Timer::new("infer"),
        })
    }

    /// Sets the minimum presence score for a hand to be reported.
    pub fn min_presence(mut self, min_presence: f32) -> Self {
        self.min_presence = min_presence;
        self
    }

    /// Returns the expected input image size.
    #[inline]
    pub fn input_resolution(&self) -> Resolution {
        self.input_res
    }

    /// Returns profiling timers for resizing and inference.
    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_resize, &self.t_infer].into_iter()
    }

    fn input_tensor(&self, frame: &Frame) -> Tensor {
        let (w, h) = (self.input_res.width(), self.input_res.height());
        let resized = self
            .t_resize
            .time(|| imageops::resize(frame.image(), w, h, FilterType::Triangle));

        let channel = |x: usize, y: usize, c: usize| -> f32 {
            f32::from(resized.get_pixel(x as u32, y as u32)[c]) / 255.0
        };
        let (w, h) = (w as usize, h as usize);
        match self.layout {
            InputLayout::Nchw => {
                tract_ndarray::Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| channel(x, y, c))
                    .into()
            }
            InputLayout::Nhwc => {
                tract_ndarray::Array4::from_shape_fn((1, h, w, 3), |(_, y, x, c)| channel(x, y, c))
                    .into()
            }
        }
    }
}

impl PoseDetector for HandLandmarkNetwork {
    fn detect(
        &mut self,
        frame: &Frame,
        config: &DetectorConfig,
    ) -> anyhow::Result<Vec<HandObservation>> {
        if config.max_subjects() == 0 {
            return Ok(Vec::new());
        }

        let input = self.input_tensor(frame);
        let outputs = self.t_infer.time(|| self.model.run(tvec!(input.into())))?;

        let landmarks = outputs[0].to_array_view::<f32>()?;
        let presence = outputs[1].to_array_view::<f32>()?;
        if landmarks.len() != NUM_LANDMARKS * 3 {
            bail!(
                "expected {} landmark coordinates, got {}",
                NUM_LANDMARKS * 3,
                landmarks.len()
            );
        }
        let Some(&presence) = presence.iter().next() else {
            bail!("hand landmark network produced an empty presence output");
        };

        if presence < self.min_presence {
            return Ok(Vec::new());
        }

        let (w, h) = (
            self.input_res.width() as f32,
            self.input_res.height() as f32,
        );
        let coords = landmarks.iter().copied().collect::<Vec<_>>();
        let points = HandJoint::ALL
            .iter()
            .zip(coords.chunks_exact(3))
            .map(|(&joint, xyz)| {
                // Network output has Y pointing down, detector space has it pointing up.
                let location = Point2::new(xyz[0] / w, 1.0 - xyz[1] / h);
                LandmarkPoint::new(joint, location, presence)
            })
            .collect();

        Ok(vec![HandObservation::new(points, presence)])
    }

    fn timers(&self) -> Vec<&Timer> {
        HandLandmarkNetwork::timers(self).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_onnx_files() {
        let err = HandLandmarkNetwork::from_path("hand_landmark.tflite")
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "neural network file must have `.onnx` extension"
        );
    }

    #[test]
    fn missing_model_file() {
        let path = "/nonexistent/hand_landmark.onnx";
        let err = HandLandmarkNetwork::from_path(path).err().unwrap();
        assert!(err.to_string().contains(path), "{err}");
    }
}
