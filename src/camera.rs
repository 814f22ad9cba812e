//! Camera intrinsics and the Brown-Conrady lens distortion model.
//!
//! The normalization math assumes an ideal pinhole image. [`Camera::undistort_image`] provides
//! the matching preprocessing step for callers that start from raw frames.

use image::GrayImage;
use nalgebra::{Matrix3, Point2, Point3};

use crate::warp;

/// Iteration cap for the fixed-point distortion inverse.
const MAX_UNDISTORT_ITERS: usize = 20;
/// Early-exit threshold for the fixed-point update, in normalized image coordinates.
const UNDISTORT_EPS: f64 = 1e-10;

/// Pinhole camera intrinsics: focal lengths and principal point, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    /// Extracts focal lengths and principal point from a 3×3 camera matrix.
    ///
    /// Skew is not modeled and is ignored.
    pub fn from_matrix(m: &Matrix3<f64>) -> Self {
        Self {
            fx: m[(0, 0)],
            fy: m[(1, 1)],
            cx: m[(0, 2)],
            cy: m[(1, 2)],
        }
    }

    /// Returns the 3×3 camera matrix.
    pub fn to_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Returns the inverse of the camera matrix.
    pub fn inverse_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            1.0 / self.fx,
            0.0,
            -self.cx / self.fx,
            0.0,
            1.0 / self.fy,
            -self.cy / self.fy,
            0.0,
            0.0,
            1.0,
        )
    }

    /// Returns whether all values are finite and the focal lengths are positive.
    pub fn is_valid(&self) -> bool {
        self.fx > 0.0
            && self.fy > 0.0
            && [self.fx, self.fy, self.cx, self.cy]
                .iter()
                .all(|v| v.is_finite())
    }

    /// Converts a pixel position to normalized image coordinates.
    #[inline]
    pub fn pixel_to_normalized(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy)
    }

    /// Converts normalized image coordinates to a pixel position.
    #[inline]
    pub fn normalized_to_pixel(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new(p.x * self.fx + self.cx, p.y * self.fy + self.cy)
    }
}

/// Brown-Conrady lens distortion coefficients, ordered `k1, k2, p1, p2, k3`.
///
/// The default value models a distortion-free lens.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    /// Builds coefficients from a slice of up to 5 values, treating missing trailing values as
    /// zero.
    ///
    /// Returns [`None`] when more than 5 coefficients are supplied; rational and thin-prism
    /// extensions are not modeled.
    pub fn from_slice(coeffs: &[f64]) -> Option<Self> {
        if coeffs.len() > 5 {
            return None;
        }
        let mut c = [0.0; 5];
        c[..coeffs.len()].copy_from_slice(coeffs);
        Some(Self {
            k1: c[0],
            k2: c[1],
            p1: c[2],
            p2: c[3],
            k3: c[4],
        })
    }

    /// Returns whether all coefficients are zero.
    pub fn is_zero(&self) -> bool {
        self == &Self::default()
    }

    /// Applies the distortion polynomial to a point in normalized image coordinates.
    pub fn distort(&self, p: Point2<f64>) -> Point2<f64> {
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
        let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        Point2::new(x * radial + dx, y * radial + dy)
    }
}

/// A calibrated camera: [`Intrinsics`] plus lens [`Distortion`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub intrinsics: Intrinsics,
    pub distortion: Distortion,
}

impl Camera {
    /// Creates a camera with the given intrinsics and a distortion-free lens.
    pub fn undistorted(intrinsics: Intrinsics) -> Self {
        Self {
            intrinsics,
            distortion: Distortion::default(),
        }
    }

    /// Projects a 3D point in camera coordinates onto the image, including lens distortion.
    pub fn project(&self, p: &Point3<f64>) -> Point2<f64> {
        let normalized = Point2::new(p.x / p.z, p.y / p.z);
        self.intrinsics
            .normalized_to_pixel(self.distortion.distort(normalized))
    }

    /// Maps an observed (distorted) pixel position to the ideal pinhole position.
    ///
    /// The distortion polynomial has no closed-form inverse; it is inverted by fixed-point
    /// iteration, which converges quickly for physically plausible coefficients.
    pub fn undistort_pixel(&self, pixel: Point2<f64>) -> Point2<f64> {
        if self.distortion.is_zero() {
            return pixel;
        }

        let target = self.intrinsics.pixel_to_normalized(pixel);
        let mut p = target;
        for _ in 0..MAX_UNDISTORT_ITERS {
            let err = self.distortion.distort(p) - target;
            p -= err;
            if err.norm() < UNDISTORT_EPS {
                break;
            }
        }
        self.intrinsics.normalized_to_pixel(p)
    }

    /// Removes lens distortion from a grayscale image.
    ///
    /// Every output pixel is sampled at its distorted source position with bilinear
    /// interpolation; positions outside the source are black.
    pub fn undistort_image(&self, image: &GrayImage) -> GrayImage {
        if self.distortion.is_zero() {
            return image.clone();
        }

        let mut out = GrayImage::new(image.width(), image.height());
        for (x, y, px) in out.enumerate_pixels_mut() {
            let ideal = self
                .intrinsics
                .pixel_to_normalized(Point2::new(f64::from(x), f64::from(y)));
            let src = self
                .intrinsics
                .normalized_to_pixel(self.distortion.distort(ideal));
            px[0] = warp::sample_bilinear(image, src.x, src.y);
        }
        out
    }
}
