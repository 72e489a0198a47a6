//! Landmark markers drawn over the preview.

use std::{convert::Infallible, marker::PhantomData};

use embedded_graphics::{
    draw_target::DrawTarget,
    pixelcolor::raw::RawU32,
    prelude::*,
    primitives::{Circle, PrimitiveStyle, Rectangle},
};
use image::{Rgba, RgbaImage};

use crate::geometry::{MappedPoint, PreviewGeometry};

/// An 8-bit RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color(pub [u8; 4]);

impl Color {
    pub const TRANSPARENT: Self = Self([0, 0, 0, 0]);
    pub const GREEN: Self = Self([0, 255, 0, 255]);
    pub const RED: Self = Self([255, 0, 0, 255]);
}

impl PixelColor for Color {
    type Raw = RawU32;
}

/// Appearance of the landmark markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerStyle {
    color: Color,
    diameter: u32,
}

impl Default for MarkerStyle {
    fn default() -> Self {
        Self {
            color: Color::GREEN,
            diameter: 5,
        }
    }
}

impl MarkerStyle {
    pub fn color(self, color: Color) -> Self {
        Self { color, ..self }
    }

    /// Sets the marker diameter in pixels. The default is 5.
    pub fn diameter(self, diameter: u32) -> Self {
        Self { diameter, ..self }
    }
}

/// Shows the most recent set of landmarks as markers over the preview.
///
/// Every update replaces all markers; nothing from an earlier update remains visible. The
/// presenter belongs to the rendering thread and cannot be sent to other threads.
pub struct OverlayPresenter {
    markers: Vec<MappedPoint>,
    canvas: RgbaImage,
    style: MarkerStyle,
    updates: u64,
    _main: PhantomData<*const ()>,
}

impl OverlayPresenter {
    /// Creates an empty overlay covering the view described by `geometry`.
    pub fn new(geometry: &PreviewGeometry) -> Self {
        Self {
            markers: Vec::new(),
            canvas: RgbaImage::new(canvas_dim(geometry.width()), canvas_dim(geometry.height())),
            style: MarkerStyle::default(),
            updates: 0,
            _main: PhantomData,
        }
    }

    pub fn with_style(self, style: MarkerStyle) -> Self {
        let mut this = Self { style, ..self };
        this.redraw();
        this
    }

    /// Replaces all markers with `points`. An empty list removes all markers.
    pub fn show(&mut self, points: Vec<MappedPoint>) {
        self.markers = points;
        self.updates += 1;
        self.redraw();
    }

    /// Removes all markers.
    pub fn clear(&mut self) {
        self.show(Vec::new());
    }

    /// Adapts the canvas to a changed view size and redraws the current markers.
    pub fn resize(&mut self, geometry: &PreviewGeometry) {
        let (width, height) = (canvas_dim(geometry.width()), canvas_dim(geometry.height()));
        if (width, height) != self.canvas.dimensions() {
            self.canvas = RgbaImage::new(width, height);
            self.redraw();
        }
    }

    /// The markers currently shown, in view coordinates.
    #[inline]
    pub fn markers(&self) -> &[MappedPoint] {
        &self.markers
    }

    /// The rendered overlay, to be composited on top of the preview.
    #[inline]
    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    /// Number of times the markers have been replaced.
    #[inline]
    pub fn updates(&self) -> u64 {
        self.updates
    }

    fn redraw(&mut self) {
        for pixel in self.canvas.pixels_mut() {
            *pixel = Rgba(Color::TRANSPARENT.0);
        }

        let (width, height) = self.canvas.dimensions();
        let reach = self.style.diameter as f32;
        let style = PrimitiveStyle::with_fill(self.style.color);
        let mut target = Target(&mut self.canvas);
        for marker in &self.markers {
            let p = marker.position();
            if !p.x.is_finite() || !p.y.is_finite() {
                log::trace!("skipping marker at {:?}", p);
                continue;
            }
            // Far-away markers are moved just outside the canvas, where nothing of them is drawn.
            let x = p.x.clamp(-reach, width as f32 + reach);
            let y = p.y.clamp(-reach, height as f32 + reach);
            let center = Point::new(x.round() as i32, y.round() as i32);
            match Circle::with_center(center, self.style.diameter)
                .into_styled(style)
                .draw(&mut target)
            {
                Ok(()) => {}
                Err(infallible) => match infallible {},
            }
        }
    }
}

fn canvas_dim(len: f32) -> u32 {
    len.max(0.0).round() as u32
}

struct Target<'a>(&'a mut RgbaImage);

impl Dimensions for Target<'_> {
    fn bounding_box(&self) -> Rectangle {
        let (width, height) = self.0.dimensions();

        Rectangle {
            top_left: Point { x: 0, y: 0 },
            size: Size { width, height },
        }
    }
}

impl DrawTarget for Target<'_> {
    type Color = Color;

    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = embedded_graphics::Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            let (Ok(x), Ok(y)) = (u32::try_from(point.x), u32::try_from(point.y)) else {
                continue;
            };
            if x < self.0.width() && y < self.0.height() {
                self.0.put_pixel(x, y, Rgba(color.0));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::Point2;

    use crate::{landmark::HandJoint, resolution::Resolution};

    use super::*;

    fn marker(x: f32, y: f32) -> MappedPoint {
        MappedPoint::new(HandJoint::IndexFingerTip, Point2::new(x, y))
    }

    fn painted(overlay: &OverlayPresenter) -> usize {
        overlay
            .canvas()
            .pixels()
            .filter(|p| p.0 != Color::TRANSPARENT.0)
            .count()
    }

    #[test]
    fn replaces_markers() {
        let geometry = PreviewGeometry::new(40.0, 30.0, Resolution::RES_VGA);
        let mut overlay = OverlayPresenter::new(&geometry);
        assert_eq!(overlay.canvas().dimensions(), (40, 30));
        assert_eq!(painted(&overlay), 0);

        overlay.show(vec![marker(5.0, 5.0), marker(20.0, 20.0)]);
        assert_eq!(overlay.markers().len(), 2);
        assert_eq!(overlay.canvas().get_pixel(5, 5).0, Color::GREEN.0);
        assert_eq!(overlay.canvas().get_pixel(20, 20).0, Color::GREEN.0);

        overlay.show(vec![marker(30.0, 10.0)]);
        assert_eq!(overlay.markers(), &[marker(30.0, 10.0)]);
        assert_eq!(overlay.canvas().get_pixel(5, 5).0, Color::TRANSPARENT.0);
        assert_eq!(overlay.canvas().get_pixel(30, 10).0, Color::GREEN.0);

        overlay.clear();
        assert!(overlay.markers().is_empty());
        assert_eq!(painted(&overlay), 0);
        assert_eq!(overlay.updates(), 3);
    }

    #[test]
    fn clips_at_edges() {
        let geometry = PreviewGeometry::new(10.0, 10.0, Resolution::new(1, 1));
        let mut overlay =
            OverlayPresenter::new(&geometry).with_style(MarkerStyle::default().color(Color::RED));
        overlay.show(vec![marker(0.0, 0.0), marker(-50.0, 3.0)]);
        assert_eq!(overlay.canvas().get_pixel(0, 0).0, Color::RED.0);
        assert!(painted(&overlay) < 25);
    }

    #[test]
    fn unrepresentable_positions() {
        let geometry = PreviewGeometry::new(10.0, 10.0, Resolution::new(1, 1));
        let mut overlay = OverlayPresenter::new(&geometry);
        overlay.show(vec![
            marker(f32::INFINITY, 5.0),
            marker(3.0e9, 5.0),
            marker(-3.0e9, f32::NAN),
            marker(5.0, -1.0e12),
            marker(5.0, 5.0),
        ]);
        assert_eq!(overlay.markers().len(), 5);
        assert_eq!(overlay.canvas().get_pixel(5, 5).0, Color::GREEN.0);
        assert_eq!(overlay.canvas().get_pixel(9, 5).0, Color::TRANSPARENT.0);
        assert_eq!(overlay.canvas().get_pixel(5, 0).0, Color::TRANSPARENT.0);
    }

    #[test]
    fn resize_keeps_markers() {
        let mut geometry = PreviewGeometry::new(10.0, 10.0, Resolution::new(1, 1));
        let mut overlay = OverlayPresenter::new(&geometry);
        overlay.show(vec![marker(15.0, 15.0)]);
        assert_eq!(painted(&overlay), 0);

        geometry.set_bounds(20.0, 20.0);
        overlay.resize(&geometry);
        assert_eq!(overlay.canvas().dimensions(), (20, 20));
        assert_eq!(overlay.canvas().get_pixel(15, 15).0, Color::GREEN.0);
    }
}
