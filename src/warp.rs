//! Perspective warping and grayscale post-processing.

use image::GrayImage;
use nalgebra::{Matrix3, Vector3};

use crate::Resolution;

/// Warps `src` through a 3×3 homography into a new image of the given size.
///
/// `homography` maps source pixel positions to destination pixel positions; sampling goes through
/// its inverse with bilinear interpolation. Destination pixels that fall outside the source are
/// black.
///
/// # Panics
///
/// Panics if `homography` is not invertible.
pub fn warp_perspective(src: &GrayImage, homography: &Matrix3<f64>, size: Resolution) -> GrayImage {
    let inverse = match homography.try_inverse() {
        Some(inverse) => inverse,
        None => panic!("homography is not invertible: {homography}"),
    };

    let mut out = GrayImage::new(size.width(), size.height());
    for (x, y, px) in out.enumerate_pixels_mut() {
        let source = inverse * Vector3::new(f64::from(x), f64::from(y), 1.0);
        if source.z.abs() < f64::EPSILON {
            continue;
        }
        px[0] = sample_bilinear(src, source.x / source.z, source.y / source.z);
    }
    out
}

/// Samples `image` at a fractional pixel position with bilinear interpolation.
///
/// Samples outside the image contribute black, so edge pixels fade out instead of smearing.
pub(crate) fn sample_bilinear(image: &GrayImage, x: f64, y: f64) -> u8 {
    let tx = x - x.floor();
    let ty = y - y.floor();
    let (x0, y0) = (x.floor() as i64, y.floor() as i64);

    let fetch = |ix: i64, iy: i64| -> f64 {
        if ix < 0 || iy < 0 || ix >= i64::from(image.width()) || iy >= i64::from(image.height()) {
            0.0
        } else {
            f64::from(image.get_pixel(ix as u32, iy as u32)[0])
        }
    };

    let top = fetch(x0, y0) * (1.0 - tx) + fetch(x0 + 1, y0) * tx;
    let bottom = fetch(x0, y0 + 1) * (1.0 - tx) + fetch(x0 + 1, y0 + 1) * tx;
    (top * (1.0 - ty) + bottom * ty).round() as u8
}

/// Equalizes the image histogram, stretching the cumulative intensity distribution over the full
/// 8-bit range.
///
/// Single-intensity images are returned unchanged.
pub fn equalize_hist(image: &GrayImage) -> GrayImage {
    let mut histogram = [0u32; 256];
    for px in image.pixels() {
        histogram[px[0] as usize] += 1;
    }

    let total = image.as_raw().len() as u32;
    // The cumulative count at the darkest occupied bin maps to 0.
    let cdf_min = histogram.iter().copied().find(|&count| count != 0).unwrap_or(0);
    if cdf_min == total {
        return image.clone();
    }

    let scale = 255.0 / f64::from(total - cdf_min);
    let mut lut = [0u8; 256];
    let mut cdf = 0u32;
    for (mapped, &count) in lut.iter_mut().zip(&histogram) {
        cdf += count;
        *mapped = (f64::from(cdf.saturating_sub(cdf_min)) * scale).round() as u8;
    }

    let mut out = image.clone();
    for px in out.pixels_mut() {
        px[0] = lut[px[0] as usize];
    }
    out
}
