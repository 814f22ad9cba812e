//! Runs the full normalization pipeline on a single image and saves the results.
//!
//! Landmark detection is out of scope for this crate, so the 2D landmarks and the 3D gaze target
//! are bundled sample values; they refer to a specific recording and will not line up with
//! arbitrary input images. Pass camera calibration and face model files to match your setup.

use std::path::PathBuf;

use gazenorm::calib::{self, CalibrationFormat};
use gazenorm::camera::{Camera, Intrinsics};
use gazenorm::draw;
use gazenorm::face::{FaceLandmarks, FaceModel};
use gazenorm::norm::{EyeNormalizer, NormConfig};
use gazenorm::pose::PoseEstimator;
use image::imageops::{self, FilterType};
use image::DynamicImage;
use nalgebra::{Point2, Point3};

/// Landmark pixel positions of the bundled sample frame, in storage order (right eye outer and
/// inner corner, left eye inner and outer corner, right and left mouth corner).
const SAMPLE_LANDMARKS: [[f64; 2]; 6] = [
    [551.0, 408.0],
    [603.0, 405.0],
    [698.0, 398.0],
    [755.0, 393.0],
    [603.0, 566.0],
    [724.0, 557.0],
];

/// Gaze target of the bundled sample frame, in camera coordinates (millimetres).
const SAMPLE_GAZE_TARGET: [f64; 3] = [-127.790719, 4.621111, -12.025310];

/// Upscaling factor for the saved eye crops.
const CROP_UPSCALE: u32 = 4;

fn main() -> anyhow::Result<()> {
    gazenorm::init_logger!();

    let mut args = std::env::args_os().skip(1);
    let image_path = match args.next() {
        Some(path) => PathBuf::from(path),
        None => {
            eprintln!("usage: gazenorm <image> [camera.{{json,txt}}] [face-model.{{json,txt}}]");
            std::process::exit(1);
        }
    };

    let image = image::open(&image_path)?;
    log::info!(
        "loaded {} ({}x{})",
        image_path.display(),
        image.width(),
        image.height()
    );

    let camera = match args.next() {
        Some(path) => {
            let path = PathBuf::from(path);
            calib::load_camera(&path, CalibrationFormat::from_path(&path)?)?
        }
        None => {
            // A plausible webcam guess; fine for eyeballing the output, not for real data.
            log::warn!("no camera calibration given, assuming an undistorted default camera");
            Camera::undistorted(Intrinsics {
                fx: f64::from(image.width().max(image.height())),
                fy: f64::from(image.width().max(image.height())),
                cx: f64::from(image.width()) / 2.0,
                cy: f64::from(image.height()) / 2.0,
            })
        }
    };

    let model = match args.next() {
        Some(path) => {
            let path = PathBuf::from(path);
            calib::load_face_model(&path, CalibrationFormat::from_path(&path)?)?
        }
        None => FaceModel::generic().clone(),
    };

    let landmarks = FaceLandmarks::new(SAMPLE_LANDMARKS.map(|[x, y]| Point2::new(x, y)));
    let gaze_target = Point3::new(
        SAMPLE_GAZE_TARGET[0],
        SAMPLE_GAZE_TARGET[1],
        SAMPLE_GAZE_TARGET[2],
    );

    let pose = PoseEstimator::new(model.clone(), camera).estimate(&landmarks)?;
    log::info!(
        "head pose: rodrigues={:?}, translation={:?}",
        pose.rodrigues(),
        pose.translation()
    );

    let mut annotated = image.to_rgb8();
    for point in landmarks.points() {
        draw::marker(&mut annotated, point.x.round() as i32, point.y.round() as i32);
    }
    annotated.save("landmarks.png")?;
    log::info!("saved landmark overlay to landmarks.png");

    let undistorted = camera.undistort_image(&image.to_luma8());
    let normalizer = EyeNormalizer::new(NormConfig::default())?;
    let samples = normalizer.normalize(
        &DynamicImage::ImageLuma8(undistorted),
        &model,
        &pose,
        gaze_target,
        &camera.intrinsics,
    );

    for sample in samples {
        // One eye failing does not invalidate the other.
        let sample = match sample {
            Ok(sample) => sample,
            Err(e) => {
                log::error!("skipping degenerate eye: {}", e);
                continue;
            }
        };
        let [pitch, yaw] = sample.gaze_angles();
        log::info!(
            "{} eye: gaze={:?}, pitch={:.1}°, yaw={:.1}°, scale={:.3}",
            sample.eye(),
            sample.gaze(),
            pitch.to_degrees(),
            yaw.to_degrees(),
            sample.scale(),
        );

        let crop = draw::expand_to_rgb(sample.image());
        let mut upscaled = imageops::resize(
            &crop,
            crop.width() * CROP_UPSCALE,
            crop.height() * CROP_UPSCALE,
            FilterType::Nearest,
        );
        draw::gaze(&mut upscaled, pitch, yaw);

        let out = format!("normalized_{}.png", sample.eye());
        upscaled.save(&out)?;
        log::info!("saved normalized {} eye to {out}", sample.eye());
    }

    Ok(())
}
