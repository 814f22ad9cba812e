//! Per-eye pose- and distance-invariant normalization.
//!
//! [`EyeNormalizer`] converts an undistorted camera frame plus head pose and gaze target into,
//! per eye, a rectified grayscale crop taken by a synthetic camera looking straight at the eye
//! from a fixed distance, the head rotation re-expressed relative to that camera, and the unit
//! gaze direction in the same frame. Training data produced this way is free of head-pose and
//! camera-distance variation, which is what makes pooling across recordings work.

use image::{DynamicImage, GrayImage};
use nalgebra::{Matrix3, Point3, Rotation3, Vector3};
use thiserror::Error;

use crate::camera::Intrinsics;
use crate::face::{Eye, FaceModel};
use crate::pose::HeadPose;
use crate::warp;
use crate::Resolution;

/// Cross products below this norm leave the crop's roll undefined.
const ROLL_AXIS_EPS: f64 = 1e-12;
/// Gaze offsets below this norm (in millimetres) count as a zero gaze vector.
const GAZE_NORM_EPS: f64 = 1e-9;

/// Eye-specific geometry failures.
///
/// The two eyes are processed independently; one eye failing never affects the other's result.
#[derive(Debug, Error)]
pub enum DegenerateGeometryError {
    /// The eye center coincides with the camera origin, or its position is non-finite.
    #[error("eye-to-camera distance is degenerate ({distance})")]
    EyeDistance { distance: f64 },
    /// The gaze target coincides with the eye center.
    #[error("gaze target coincides with the eye center")]
    GazeDirection,
    /// The view direction is parallel to the head's transverse axis, leaving the crop's roll
    /// undefined.
    #[error("eye direction is parallel to the head's transverse axis")]
    RollAxis,
}

/// Invalid [`NormConfig`] values, reported by [`EyeNormalizer::new`].
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("normalized focal length must be positive and finite, got {0}")]
    FocalLength(f64),
    #[error("normalized distance must be positive and finite, got {0}")]
    Distance(f64),
    #[error("crop size must be non-empty, got {0}")]
    RoiSize(Resolution),
}

/// Configuration of the normalized camera.
///
/// `focal_norm`, `distance_norm` and `roi_size` are coupled: together they decide how much of
/// the face ends up in the crop. Changing one usually means re-deriving the others; no
/// consistency between them is enforced here. The defaults produce tight 60×36 eye crops.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormConfig {
    /// Focal length of the normalized camera, in pixels. *Default: 960.*
    pub focal_norm: f64,
    /// Distance from the normalized camera to the eye center, in millimetres. *Default: 600.*
    pub distance_norm: f64,
    /// Size of the rectified eye crop. *Default: 60x36.*
    pub roi_size: Resolution,
    /// Histogram-equalize the crop after warping. *Default: `true`.*
    pub equalize_histogram: bool,
    /// Apply the depth scaling to the gaze vector before unit normalization, reproducing the
    /// older variant of the method. The current variant only rotates the gaze.
    /// *Default: `false`.*
    pub scale_gaze_vector: bool,
}

impl Default for NormConfig {
    fn default() -> Self {
        Self {
            focal_norm: 960.0,
            distance_norm: 600.0,
            roi_size: Resolution::new(60, 36),
            equalize_histogram: true,
            scale_gaze_vector: false,
        }
    }
}

impl NormConfig {
    /// Checks all values for plausibility.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.focal_norm.is_finite() && self.focal_norm > 0.0) {
            return Err(ConfigurationError::FocalLength(self.focal_norm));
        }
        if !(self.distance_norm.is_finite() && self.distance_norm > 0.0) {
            return Err(ConfigurationError::Distance(self.distance_norm));
        }
        if self.roi_size.width() == 0 || self.roi_size.height() == 0 {
            return Err(ConfigurationError::RoiSize(self.roi_size));
        }
        Ok(())
    }

    /// Camera matrix of the normalized camera: focal length `focal_norm`, principal point at the
    /// crop center.
    fn camera_matrix(&self) -> Matrix3<f64> {
        let (cx, cy) = self.roi_size.center();
        Matrix3::new(
            self.focal_norm, 0.0, cx, //
            0.0, self.focal_norm, cy, //
            0.0, 0.0, 1.0,
        )
    }
}

/// One eye's normalization result.
#[derive(Debug, Clone)]
pub struct NormalizedSample {
    eye: Eye,
    image: GrayImage,
    head_rotation: Vector3<f64>,
    gaze: Vector3<f64>,
    rotation: Matrix3<f64>,
    scale: f64,
}

impl NormalizedSample {
    /// Returns the eye this sample belongs to.
    #[inline]
    pub fn eye(&self) -> Eye {
        self.eye
    }

    /// Returns the rectified grayscale eye crop.
    #[inline]
    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    /// Returns the head rotation relative to the normalized camera, in Rodrigues form.
    #[inline]
    pub fn head_rotation(&self) -> Vector3<f64> {
        self.head_rotation
    }

    /// Returns the unit gaze direction in the normalized camera frame.
    #[inline]
    pub fn gaze(&self) -> Vector3<f64> {
        self.gaze
    }

    /// Returns the rotation from camera coordinates into the normalized camera frame.
    #[inline]
    pub fn rotation(&self) -> &Matrix3<f64> {
        &self.rotation
    }

    /// Returns the depth scale `distance_norm / distance` applied by the warp.
    #[inline]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Returns the gaze direction as `[pitch, yaw]` angles in radians.
    ///
    /// Pitch is positive when looking up, yaw is positive when looking towards the subject's
    /// right. A gaze straight into the camera maps to `[0, 0]`.
    pub fn gaze_angles(&self) -> [f64; 2] {
        let g = self.gaze;
        [(-g.y).asin(), (-g.x).atan2(-g.z)]
    }
}

/// Runs the per-eye normalization.
pub struct EyeNormalizer {
    config: NormConfig,
}

impl EyeNormalizer {
    /// Creates a normalizer after validating the configuration.
    pub fn new(config: NormConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Returns the active configuration.
    #[inline]
    pub fn config(&self) -> &NormConfig {
        &self.config
    }

    /// Normalizes both eyes of one frame.
    ///
    /// `image` must already be undistorted (see [`crate::camera::Camera::undistort_image`]);
    /// color images are converted to grayscale internally. `gaze_target` is the observed 3D
    /// fixation point in camera coordinates.
    ///
    /// The result holds the subject's right eye at index 0 and the left eye at index 1. The two
    /// computations are independent, so one eye can fail while the other succeeds.
    pub fn normalize(
        &self,
        image: &DynamicImage,
        model: &FaceModel,
        pose: &HeadPose,
        gaze_target: Point3<f64>,
        intrinsics: &Intrinsics,
    ) -> [Result<NormalizedSample, DegenerateGeometryError>; 2] {
        let gray = image.to_luma8();
        [Eye::Right, Eye::Left].map(|eye| {
            let (a, b) = eye.corners();
            let center =
                (pose.transform_point(&model[a]).coords + pose.transform_point(&model[b]).coords)
                    / 2.0;
            self.normalize_eye(&gray, eye, center, pose.rotation(), gaze_target, intrinsics)
        })
    }

    fn normalize_eye(
        &self,
        gray: &GrayImage,
        eye: Eye,
        eye_center: Vector3<f64>,
        head_rotation: &Rotation3<f64>,
        gaze_target: Point3<f64>,
        intrinsics: &Intrinsics,
    ) -> Result<NormalizedSample, DegenerateGeometryError> {
        let distance = eye_center.norm();
        if !distance.is_finite() || distance <= 0.0 {
            return Err(DegenerateGeometryError::EyeDistance { distance });
        }
        let scale = self.config.distance_norm / distance;

        // Basis of the normalized camera: it looks straight at the eye center, with roll locked
        // to the head's own transverse axis so the eye appears upright in the crop.
        let forward = eye_center / distance;
        let head_x = head_rotation * Vector3::x();
        let down = match forward.cross(&head_x).try_normalize(ROLL_AXIS_EPS) {
            Some(down) => down,
            None => return Err(DegenerateGeometryError::RollAxis),
        };
        let right = down.cross(&forward).normalize();
        let rotation =
            Matrix3::from_rows(&[right.transpose(), down.transpose(), forward.transpose()]);

        let scaling = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, scale));
        let homography =
            self.config.camera_matrix() * scaling * rotation * intrinsics.inverse_matrix();

        log::trace!("{eye} eye: distance={distance:.1}mm, scale={scale:.4}");

        let mut crop = warp::warp_perspective(gray, &homography, self.config.roi_size);
        if self.config.equalize_histogram {
            crop = warp::equalize_hist(&crop);
        }

        let head_rotation_norm =
            Rotation3::from_matrix_unchecked(rotation * head_rotation.matrix()).scaled_axis();

        let mut gaze = rotation * (gaze_target.coords - eye_center);
        if self.config.scale_gaze_vector {
            gaze = scaling * gaze;
        }
        let norm = gaze.norm();
        if !norm.is_finite() || norm <= GAZE_NORM_EPS {
            return Err(DegenerateGeometryError::GazeDirection);
        }

        Ok(NormalizedSample {
            eye,
            image: crop,
            head_rotation: head_rotation_norm,
            gaze: gaze / norm,
            rotation,
            scale,
        })
    }
}
