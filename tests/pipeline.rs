//! End-to-end test of the full pipeline: a synthetic scene with a known head pose is projected
//! through a distorting camera, the pose is recovered from the projected landmarks, and the
//! normalization output is checked against analytically known values.

use approx::assert_relative_eq;
use gazenorm::camera::{Camera, Distortion, Intrinsics};
use gazenorm::face::{Eye, FaceLandmarks, FaceModel};
use gazenorm::norm::{EyeNormalizer, NormConfig};
use gazenorm::pose::{HeadPose, PoseEstimator};
use image::{DynamicImage, GrayImage, Luma};
use nalgebra::{Point3, Rotation3, Vector3};

fn scene_camera() -> Camera {
    Camera {
        intrinsics: Intrinsics {
            fx: 1150.0,
            fy: 1140.0,
            cx: 640.0,
            cy: 360.0,
        },
        distortion: Distortion {
            k1: -0.18,
            k2: 0.05,
            p1: 6.0e-4,
            p2: -4.0e-4,
            k3: 0.0,
        },
    }
}

fn scene_pose() -> HeadPose {
    HeadPose::new(
        Rotation3::from_euler_angles(0.12, -0.25, 0.06),
        Vector3::new(25.0, -18.0, 640.0),
    )
}

fn observed_landmarks(model: &FaceModel, pose: &HeadPose, camera: &Camera) -> FaceLandmarks {
    FaceLandmarks::new(
        model
            .points()
            .map(|p| camera.project(&pose.transform_point(&p))),
    )
}

fn eye_center(eye: Eye, model: &FaceModel, pose: &HeadPose) -> Vector3<f64> {
    let (a, b) = eye.corners();
    (pose.transform_point(&model[a]).coords + pose.transform_point(&model[b]).coords) / 2.0
}

#[test]
fn pose_recovery_under_distortion() {
    let camera = scene_camera();
    let truth = scene_pose();
    let landmarks = observed_landmarks(FaceModel::generic(), &truth, &camera);

    let pose = PoseEstimator::new(FaceModel::generic().clone(), camera)
        .estimate(&landmarks)
        .unwrap();

    let angle = truth.rotation().rotation_to(pose.rotation()).angle();
    assert!(angle < 1e-4, "rotation is off by {angle} rad");
    assert_relative_eq!(truth.translation(), pose.translation(), epsilon = 0.05);
}

#[test]
fn normalization_centers_the_eye() {
    // A bright patch at the right eye's ideal projection must land at the crop center: the warp
    // maps the eye-center ray onto the normalized camera's principal point by construction.
    let camera = scene_camera();
    let truth = scene_pose();
    let model = FaceModel::generic();

    let center = eye_center(Eye::Right, model, &truth);
    let ideal = Camera::undistorted(camera.intrinsics).project(&Point3::from(center));

    let mut image = GrayImage::new(1280, 720);
    let (px, py) = (ideal.x.round() as i64, ideal.y.round() as i64);
    for dy in -2..=2i64 {
        for dx in -2..=2i64 {
            image.put_pixel((px + dx) as u32, (py + dy) as u32, Luma([255]));
        }
    }

    let config = NormConfig {
        equalize_histogram: false,
        ..NormConfig::default()
    };
    let samples = EyeNormalizer::new(config).unwrap().normalize(
        &DynamicImage::ImageLuma8(image),
        model,
        &truth,
        Point3::new(-100.0, 30.0, 0.0),
        &camera.intrinsics,
    );
    let [right, left] = samples;
    let right = right.unwrap();
    assert!(left.is_ok());

    let (cx, cy) = (right.image().width() / 2, right.image().height() / 2);
    let value = right.image().get_pixel(cx, cy)[0];
    assert!(value > 200, "crop center is not bright: {value}");
}

#[test]
fn collinear_gaze_targets_map_onto_the_axis() {
    let truth = scene_pose();
    let model = FaceModel::generic();
    let intrinsics = scene_camera().intrinsics;
    let center = eye_center(Eye::Right, model, &truth);

    let image = DynamicImage::ImageLuma8(GrayImage::new(640, 480));
    let normalizer = EyeNormalizer::new(NormConfig::default()).unwrap();

    // Looking away from the camera, along the eye-center ray.
    let away = normalizer.normalize(
        &image,
        model,
        &truth,
        Point3::from(center * 1.5),
        &intrinsics,
    );
    let gaze = away[0].as_ref().unwrap().gaze();
    assert_relative_eq!(gaze, Vector3::new(0.0, 0.0, 1.0), epsilon = 1e-9);

    // Looking straight into the camera.
    let towards = normalizer.normalize(&image, model, &truth, Point3::origin(), &intrinsics);
    let sample = towards[0].as_ref().unwrap();
    assert_relative_eq!(sample.gaze(), Vector3::new(0.0, 0.0, -1.0), epsilon = 1e-9);

    let [pitch, yaw] = sample.gaze_angles();
    assert_relative_eq!(pitch, 0.0, epsilon = 1e-9);
    assert_relative_eq!(yaw, 0.0, epsilon = 1e-9);
}

#[test]
fn distorted_frame_flows_through_the_pipeline() {
    let camera = scene_camera();
    let truth = scene_pose();
    let model = FaceModel::generic();
    let landmarks = observed_landmarks(model, &truth, &camera);

    let raw = GrayImage::from_fn(1280, 720, |x, y| Luma([((x / 4 + y / 4) % 256) as u8]));
    let undistorted = camera.undistort_image(&raw);

    let pose = PoseEstimator::new(model.clone(), camera)
        .estimate(&landmarks)
        .unwrap();
    let samples = EyeNormalizer::new(NormConfig::default()).unwrap().normalize(
        &DynamicImage::ImageLuma8(undistorted),
        model,
        &pose,
        Point3::new(-120.0, 40.0, 5.0),
        &camera.intrinsics,
    );

    for (sample, eye) in samples.iter().zip([Eye::Right, Eye::Left]) {
        let sample = sample.as_ref().unwrap();
        assert_eq!(sample.eye(), eye);
        assert_eq!(sample.image().dimensions(), (60, 36));
        assert_relative_eq!(sample.gaze().norm(), 1.0, epsilon = 1e-6);
    }
}
