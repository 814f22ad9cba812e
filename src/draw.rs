//! Drawing overlays for visual inspection of normalization results.
//!
//! The free functions return a guard value that draws once dropped and allows customizing colors
//! and stroke widths beforehand.

use std::convert::Infallible;
use std::f64::consts::FRAC_PI_4;

use embedded_graphics::{
    draw_target::DrawTarget,
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{Line, PrimitiveStyle, Rectangle},
};
use image::{GrayImage, Rgb, RgbImage};

/// Length of the two arrow head segments, relative to the arrow length.
const TIP_LENGTH: f64 = 0.2;

/// Guard returned by [`gaze`]; draws the gaze arrow when dropped and allows customization.
pub struct DrawGaze<'a> {
    image: &'a mut RgbImage,
    pitch: f64,
    yaw: f64,
    color: Rgb888,
    stroke_width: u32,
}

impl DrawGaze<'_> {
    /// Sets the arrow's color.
    pub fn color(&mut self, color: Rgb888) -> &mut Self {
        self.color = color;
        self
    }

    /// Sets the arrow's stroke width.
    ///
    /// By default, a stroke width of 2 is used.
    pub fn stroke_width(&mut self, width: u32) -> &mut Self {
        self.stroke_width = width;
        self
    }
}

impl Drop for DrawGaze<'_> {
    fn drop(&mut self) {
        let (w, h) = self.image.dimensions();
        let length = f64::from(w.min(h)) / 2.0;
        let (cx, cy) = ((w / 2) as i32, (h / 2) as i32);
        let dx = -length * self.yaw.sin() * self.pitch.cos();
        let dy = -length * self.pitch.sin();
        let (tip_x, tip_y) = (f64::from(cx) + dx, f64::from(cy) + dy);

        let style = PrimitiveStyle::with_stroke(self.color, self.stroke_width);
        let start = Point::new(cx, cy);
        let tip = Point::new(tip_x.round() as i32, tip_y.round() as i32);
        match Line::new(start, tip)
            .into_styled(style)
            .draw(&mut Target(self.image))
        {
            Ok(_) => {}
            Err(infallible) => match infallible {},
        }

        // Arrow head: two segments fanning out from the tip, angled ±45° off the shaft.
        let back = (f64::from(cy) - tip_y).atan2(f64::from(cx) - tip_x);
        let tip_size = TIP_LENGTH * (dx * dx + dy * dy).sqrt();
        for angle in [back + FRAC_PI_4, back - FRAC_PI_4] {
            let end = Point::new(
                (tip_x + tip_size * angle.cos()).round() as i32,
                (tip_y + tip_size * angle.sin()).round() as i32,
            );
            match Line::new(end, tip)
                .into_styled(style)
                .draw(&mut Target(self.image))
            {
                Ok(_) => {}
                Err(infallible) => match infallible {},
            }
        }
    }
}

/// Guard returned by [`marker`]; draws the marker when dropped and allows customization.
pub struct DrawMarker<'a> {
    image: &'a mut RgbImage,
    x: i32,
    y: i32,
    color: Rgb888,
    size: u32,
}

impl DrawMarker<'_> {
    /// Sets the marker's color.
    pub fn color(&mut self, color: Rgb888) -> &mut Self {
        self.color = color;
        self
    }

    /// Sets the width and height of the marker.
    ///
    /// The default size is 5. The size must be *uneven* and *non-zero*. A size of 1 will result in
    /// a single pixel getting drawn.
    pub fn size(&mut self, size: u32) -> &mut Self {
        assert!(size != 0, "marker size must be greater than zero");
        assert!(size % 2 == 1, "marker size must be an uneven number");
        self.size = size;
        self
    }
}

impl Drop for DrawMarker<'_> {
    fn drop(&mut self) {
        let offset = ((self.size - 1) / 2) as i32;
        for (xoff, yoff) in (-offset..=offset)
            .zip(-offset..=offset)
            .chain((-offset..=offset).rev().zip(-offset..=offset))
        {
            match Pixel(
                Point {
                    x: self.x + xoff,
                    y: self.y + yoff,
                },
                self.color,
            )
            .draw(&mut Target(self.image))
            {
                Ok(_) => {}
                Err(infallible) => match infallible {},
            }
        }
    }
}

/// Draws a gaze direction as an arrow anchored at the image center.
///
/// `pitch` and `yaw` are in radians (see
/// [`NormalizedSample::gaze_angles`][crate::norm::NormalizedSample::gaze_angles]); the arrow
/// points where the eye looks.
pub fn gaze(image: &mut RgbImage, pitch: f64, yaw: f64) -> DrawGaze<'_> {
    DrawGaze {
        image,
        pitch,
        yaw,
        color: Rgb888::RED,
        stroke_width: 2,
    }
}

/// Draws a marker onto an image.
///
/// This can be used to visualize landmark positions.
pub fn marker(image: &mut RgbImage, x: i32, y: i32) -> DrawMarker<'_> {
    DrawMarker {
        image,
        x,
        y,
        color: Rgb888::RED,
        size: 5,
    }
}

/// Expands a grayscale image to RGB so that colored overlays can be drawn onto it.
pub fn expand_to_rgb(image: &GrayImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let luma = image.get_pixel(x, y)[0];
        Rgb([luma, luma, luma])
    })
}

struct Target<'a>(&'a mut RgbImage);

impl Dimensions for Target<'_> {
    fn bounding_box(&self) -> Rectangle {
        Rectangle {
            top_left: Point { x: 0, y: 0 },
            size: Size {
                width: self.0.width(),
                height: self.0.height(),
            },
        }
    }
}

impl DrawTarget for Target<'_> {
    type Color = Rgb888;

    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = embedded_graphics::Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x >= 0
                && (point.x as u32) < self.0.width()
                && point.y >= 0
                && (point.y as u32) < self.0.height()
            {
                self.0.put_pixel(
                    point.x as u32,
                    point.y as u32,
                    Rgb([color.r(), color.g(), color.b()]),
                );
            }
        }

        Ok(())
    }
}
