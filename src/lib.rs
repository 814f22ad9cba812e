//! Eye-image normalization for appearance-based gaze estimation.
//!
//! Given a calibrated camera frame, the pixel positions of six facial landmarks, a 3D face
//! template, and a 3D gaze target, this crate estimates the head pose and re-renders each eye
//! through a synthetic camera that looks straight at the eye from a fixed distance. The
//! resulting fixed-size crops, normalized head rotations, and unit gaze vectors are free of
//! head-pose and camera-distance variation, which is what makes training data from different
//! recordings comparable.
//!
//! The usual pipeline is [`pose::PoseEstimator`] followed by [`norm::EyeNormalizer`].
//! [`camera::Camera::undistort_image`] prepares raw frames beforehand, [`calib`] loads
//! calibration data and face templates from disk, and [`draw`] visualizes the results.
//!
//! # 3D Coordinates
//!
//! All 3D coordinates use the calibrated camera's frame: X points right, Y points down, and Z
//! points from the camera into the scene. Lengths are in millimetres. 2D pixel coordinates have
//! their origin in the image's top left corner.
//!
//! # Environment Variables
//!
//! Logging is configured through `RUST_LOG` (see [`init_logger!`] and the `env_logger`
//! documentation).

use log::LevelFilter;

pub mod calib;
pub mod camera;
pub mod draw;
pub mod face;
pub mod norm;
pub mod pose;
pub mod warp;

mod resolution;

pub use resolution::Resolution;

/// For use by [`init_logger!`] only, not part of the public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = if cfg!(debug_assertions) {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    };
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_PKG_NAME")), log_level)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// If `cfg!(debug_assertions)` is enabled, the calling crate and this library will log at *trace*
/// level. Otherwise, they will log at *debug* level.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
