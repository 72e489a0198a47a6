//! Projection of capture-space points onto the preview.
//!
//! The preview shows the captured image inside a view of some size, possibly rotated, mirrored, and
//! scaled according to a [`VideoGravity`]. [`PreviewGeometry`] describes the current state of the
//! preview and can change at any time (eg. when the device rotates or the view is resized), so a
//! [`CoordinateMapper`] is derived from it anew for every update.

use nalgebra::{Matrix3, Point2, Vector2};

use crate::{
    landmark::{CapturePoint, HandJoint},
    resolution::Resolution,
};

/// How the captured image is scaled to fill the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoGravity {
    /// Stretch the image to fill the view, ignoring its aspect ratio.
    Resize,
    /// Scale the image to fit inside the view, preserving its aspect ratio. Leaves empty bars on
    /// two sides if the aspect ratios differ.
    #[default]
    ResizeAspect,
    /// Scale the image to cover the whole view, preserving its aspect ratio. Parts of the image
    /// are cut off if the aspect ratios differ.
    ResizeAspectFill,
}

/// Clockwise rotation of the captured image in the preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Returns whether width and height are swapped by this rotation.
    #[inline]
    pub fn is_transposing(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }

    /// The rotation as a transform of the unit square onto itself.
    fn unit_transform(self) -> Matrix3<f32> {
        match self {
            Rotation::Deg0 => Matrix3::identity(),
            // x' = 1 - y, y' = x
            Rotation::Deg90 => Matrix3::new(
                0.0, -1.0, 1.0, //
                1.0, 0.0, 0.0, //
                0.0, 0.0, 1.0,
            ),
            // x' = 1 - x, y' = 1 - y
            Rotation::Deg180 => Matrix3::new(
                -1.0, 0.0, 1.0, //
                0.0, -1.0, 1.0, //
                0.0, 0.0, 1.0,
            ),
            // x' = y, y' = 1 - x
            Rotation::Deg270 => Matrix3::new(
                0.0, 1.0, 0.0, //
                -1.0, 0.0, 1.0, //
                0.0, 0.0, 1.0,
            ),
        }
    }
}

/// Current geometry of the video preview.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewGeometry {
    bounds: Vector2<f32>,
    capture: Resolution,
    gravity: VideoGravity,
    rotation: Rotation,
    mirrored: bool,
}

impl PreviewGeometry {
    /// Creates a geometry for a `width`x`height` view showing frames of resolution `capture`.
    pub fn new(width: f32, height: f32, capture: Resolution) -> Self {
        Self {
            bounds: Vector2::new(width.max(0.0), height.max(0.0)),
            capture,
            gravity: VideoGravity::default(),
            rotation: Rotation::default(),
            mirrored: false,
        }
    }

    /// Sets the video gravity. Defaults to [`VideoGravity::ResizeAspect`].
    pub fn gravity(self, gravity: VideoGravity) -> Self {
        Self { gravity, ..self }
    }

    /// Sets the rotation of the image in the view.
    pub fn rotation(self, rotation: Rotation) -> Self {
        Self { rotation, ..self }
    }

    /// Sets whether the image is shown mirrored horizontally, as is usual for front cameras.
    pub fn mirrored(self, mirrored: bool) -> Self {
        Self { mirrored, ..self }
    }

    pub fn set_bounds(&mut self, width: f32, height: f32) {
        self.bounds = Vector2::new(width.max(0.0), height.max(0.0));
    }

    pub fn set_capture_resolution(&mut self, capture: Resolution) {
        self.capture = capture;
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.bounds.x
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.bounds.y
    }

    #[inline]
    pub fn capture_resolution(&self) -> Resolution {
        self.capture
    }

    /// Returns whether `point` lies within the view.
    pub fn contains(&self, point: &Point2<f32>) -> bool {
        (0.0..=self.bounds.x).contains(&point.x) && (0.0..=self.bounds.y).contains(&point.y)
    }

    /// The rectangle the (oriented) image occupies in view coordinates, as offset and size.
    fn image_rect(&self) -> (Vector2<f32>, Vector2<f32>) {
        let content = if self.rotation.is_transposing() {
            self.capture.transposed()
        } else {
            self.capture
        };
        let content = Vector2::new(content.width() as f32, content.height() as f32);

        let size = if content.x <= 0.0 || content.y <= 0.0 {
            self.bounds
        } else {
            let sx = self.bounds.x / content.x;
            let sy = self.bounds.y / content.y;
            match self.gravity {
                VideoGravity::Resize => self.bounds,
                VideoGravity::ResizeAspect => content * sx.min(sy),
                VideoGravity::ResizeAspectFill => content * sx.max(sy),
            }
        };
        ((self.bounds - size) / 2.0, size)
    }

    /// Computes the transform from capture space to view coordinates.
    pub fn transform(&self) -> Matrix3<f32> {
        let (offset, size) = self.image_rect();
        let view = Matrix3::new_translation(&offset) * Matrix3::new_nonuniform_scaling(&size);
        let mirror = if self.mirrored {
            Matrix3::new(
                -1.0, 0.0, 1.0, //
                0.0, 1.0, 0.0, //
                0.0, 0.0, 1.0,
            )
        } else {
            Matrix3::identity()
        };
        view * mirror * self.rotation.unit_transform()
    }

    /// Converts a point in capture space to view coordinates.
    pub fn layer_point_from_capture_point(&self, point: &Point2<f32>) -> Point2<f32> {
        self.transform().transform_point(point)
    }
}

/// A landmark in view coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MappedPoint {
    joint: HandJoint,
    position: Point2<f32>,
}

impl MappedPoint {
    pub fn new(joint: HandJoint, position: Point2<f32>) -> Self {
        Self { joint, position }
    }

    #[inline]
    pub fn joint(&self) -> HandJoint {
        self.joint
    }

    #[inline]
    pub fn position(&self) -> Point2<f32> {
        self.position
    }
}

/// Maps capture-space points into the preview.
///
/// Holds the transform of one [`PreviewGeometry`] snapshot. Create one per update; a mapper must
/// not outlive a geometry change.
pub struct CoordinateMapper {
    transform: Matrix3<f32>,
}

impl CoordinateMapper {
    pub fn new(geometry: &PreviewGeometry) -> Self {
        Self {
            transform: geometry.transform(),
        }
    }

    pub fn map_point(&self, point: &CapturePoint) -> MappedPoint {
        MappedPoint {
            joint: point.joint(),
            position: self.transform.transform_point(&point.position()),
        }
    }

    pub fn map(&self, points: &[CapturePoint]) -> Vec<MappedPoint> {
        points.iter().map(|p| self.map_point(p)).collect()
    }
}
