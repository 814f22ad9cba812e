//! Head pose estimation from 2D-3D landmark correspondences.
//!
//! [`PoseEstimator`] recovers the rigid transform mapping the face template into camera
//! coordinates: an EPnP solve for the initial estimate, followed (by default) by
//! Levenberg-Marquardt refinement of the reprojection error under the full distortion model.

use itertools::Itertools;
use nalgebra::{DMatrix, DVector, Matrix3, Point2, Point3, Rotation3, Vector3};
use thiserror::Error;

use crate::camera::Camera;
use crate::face::{FaceLandmarks, FaceModel};

const CONTROL_POINTS: usize = 4;

const REFINE_MAX_ITERS: usize = 30;
/// Refinement stops early once the accepted parameter step falls below this.
const REFINE_STEP_EPS: f64 = 1e-10;
/// Central-difference step for the numeric Jacobian.
const JACOBIAN_DELTA: f64 = 1e-6;

/// Errors reported by [`PoseEstimator::estimate`].
#[derive(Debug, Error)]
pub enum PoseEstimationError {
    /// Fewer than 4 point correspondences were supplied.
    #[error("need at least 4 point correspondences, got {0}")]
    NotEnoughPoints(usize),
    /// The template points are collinear or otherwise too degenerate to span a control-point
    /// basis.
    #[error("template landmark geometry is degenerate")]
    DegenerateLandmarks,
    /// The solve produced non-finite values, typically caused by non-finite input.
    #[error("pose solve did not produce a finite estimate")]
    NumericalFailure,
}

/// A rigid transform mapping face-template coordinates into camera coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadPose {
    rotation: Rotation3<f64>,
    translation: Vector3<f64>,
}

impl HeadPose {
    /// Creates a pose from a rotation and a translation.
    pub fn new(rotation: Rotation3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Creates a pose from a Rodrigues (scaled-axis) rotation vector and a translation.
    pub fn from_rodrigues(rvec: Vector3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation: Rotation3::from_scaled_axis(rvec),
            translation,
        }
    }

    /// Returns the head rotation.
    #[inline]
    pub fn rotation(&self) -> &Rotation3<f64> {
        &self.rotation
    }

    /// Returns the head translation in camera coordinates (millimetres).
    #[inline]
    pub fn translation(&self) -> Vector3<f64> {
        self.translation
    }

    /// Returns the rotation in Rodrigues (scaled-axis) form.
    pub fn rodrigues(&self) -> Vector3<f64> {
        self.rotation.scaled_axis()
    }

    /// Maps a point from face-template coordinates into camera coordinates.
    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        self.rotation * p + self.translation
    }
}

/// Estimates [`HeadPose`]s of a fixed face template seen by a fixed camera.
pub struct PoseEstimator {
    model: FaceModel,
    camera: Camera,
    refine: bool,
}

impl PoseEstimator {
    /// Creates an estimator that refines the initial EPnP solve by minimizing the reprojection
    /// error (the recommended default).
    pub fn new(model: FaceModel, camera: Camera) -> Self {
        Self {
            model,
            camera,
            refine: true,
        }
    }

    /// Creates an estimator that returns the raw EPnP solution.
    ///
    /// Cheaper, but noticeably less accurate on distorted or noisy landmarks.
    pub fn without_refinement(model: FaceModel, camera: Camera) -> Self {
        Self {
            model,
            camera,
            refine: false,
        }
    }

    /// Estimates the head pose from one image's landmark observations.
    pub fn estimate(&self, landmarks: &FaceLandmarks) -> Result<HeadPose, PoseEstimationError> {
        // EPnP assumes an ideal pinhole projection, so observations are undistorted first.
        // Refinement works on the raw observations and models the distortion instead.
        let ideal = landmarks.points().map(|p| self.camera.undistort_pixel(p));

        let initial = epnp(self.model.points(), &ideal, &self.camera)?;
        let pose = if self.refine {
            refine(initial, self.model.points(), landmarks.points(), &self.camera)?
        } else {
            initial
        };

        log::trace!(
            "head pose: rodrigues={:?}, translation={:?}",
            pose.rodrigues(),
            pose.translation(),
        );
        Ok(pose)
    }
}

/// EPnP (Lepetit et al.): expresses the template as barycentric combinations of 4 control
/// points, recovers the control points' camera-frame positions from the projection constraints,
/// and aligns the two point sets.
fn epnp(
    world: &[Point3<f64>],
    image: &[Point2<f64>],
    camera: &Camera,
) -> Result<HeadPose, PoseEstimationError> {
    let n = world.len();
    if n < 4 {
        return Err(PoseEstimationError::NotEnoughPoints(n));
    }
    if world.iter().any(|p| !p.coords.iter().all(|c| c.is_finite()))
        || image.iter().any(|p| !p.coords.iter().all(|c| c.is_finite()))
    {
        return Err(PoseEstimationError::NumericalFailure);
    }

    let img_norm = image
        .iter()
        .map(|&p| camera.intrinsics.pixel_to_normalized(p))
        .collect::<Vec<_>>();

    // Control points: the template centroid plus its principal axes.
    let centroid = world.iter().map(|p| p.coords).sum::<Vector3<f64>>() / n as f64;
    let mut covariance = Matrix3::zeros();
    for p in world {
        let d = p.coords - centroid;
        covariance += d * d.transpose();
    }
    covariance /= n as f64;

    let eigen = covariance.symmetric_eigen();
    let mut control_world = [Vector3::zeros(); CONTROL_POINTS];
    control_world[0] = centroid;
    for i in 0..3 {
        let scale = eigen.eigenvalues[i].abs().sqrt();
        control_world[i + 1] = centroid + eigen.eigenvectors.column(i) * scale;
    }

    // Barycentric coordinates of every template point in the control basis. A collinear (or
    // coincident) template collapses at least one basis column to zero.
    let basis = Matrix3::from_columns(&[
        control_world[1] - control_world[0],
        control_world[2] - control_world[0],
        control_world[3] - control_world[0],
    ]);
    let basis_inv = basis
        .try_inverse()
        .ok_or(PoseEstimationError::DegenerateLandmarks)?;

    let alphas = world
        .iter()
        .map(|p| {
            let coeff = basis_inv * (p.coords - control_world[0]);
            [1.0 - coeff.x - coeff.y - coeff.z, coeff.x, coeff.y, coeff.z]
        })
        .collect::<Vec<_>>();

    // Each observation constrains the camera-frame control points with two rows; the solution is
    // the right singular vector of the smallest singular value.
    let mut m = DMatrix::zeros(2 * n, 12);
    for (i, (alpha, uv)) in alphas.iter().zip_eq(&img_norm).enumerate() {
        for (j, &a) in alpha.iter().enumerate() {
            m[(2 * i, 3 * j)] = a;
            m[(2 * i, 3 * j + 2)] = -uv.x * a;
            m[(2 * i + 1, 3 * j + 1)] = a;
            m[(2 * i + 1, 3 * j + 2)] = -uv.y * a;
        }
    }

    let svd = m.svd(false, true);
    let v_t = svd.v_t.ok_or(PoseEstimationError::NumericalFailure)?;
    let solution = v_t.row(v_t.nrows() - 1);

    let mut control_cam = [Vector3::zeros(); CONTROL_POINTS];
    for (j, c) in control_cam.iter_mut().enumerate() {
        *c = Vector3::new(solution[3 * j], solution[3 * j + 1], solution[3 * j + 2]);
    }

    // The singular vector is known only up to scale; fix it so camera-frame control distances
    // match the template's.
    let mut sum_world = 0.0;
    let mut sum_cam = 0.0;
    for ((a_world, a_cam), (b_world, b_cam)) in
        control_world.iter().zip_eq(&control_cam).tuple_combinations()
    {
        sum_world += (a_world - b_world).norm_squared();
        sum_cam += (a_cam - b_cam).norm_squared();
    }
    if sum_cam <= f64::EPSILON {
        return Err(PoseEstimationError::NumericalFailure);
    }
    let beta = (sum_world / sum_cam).sqrt();

    let mut camera_points = alphas
        .iter()
        .map(|alpha| {
            (0..CONTROL_POINTS)
                .map(|j| control_cam[j] * (alpha[j] * beta))
                .sum::<Vector3<f64>>()
        })
        .collect::<Vec<_>>();

    // The singular vector's sign is arbitrary as well; a face behind the camera means the
    // mirrored solution was picked.
    let mean_z = camera_points.iter().map(|p| p.z).sum::<f64>() / n as f64;
    if mean_z < 0.0 {
        for p in &mut camera_points {
            *p = -*p;
        }
    }

    let pose = align_points(world, &camera_points);
    if !pose.translation.iter().all(|c| c.is_finite()) {
        return Err(PoseEstimationError::NumericalFailure);
    }
    Ok(pose)
}

/// Computes the rigid transform taking `from` onto `to` (Kabsch algorithm).
fn align_points(from: &[Point3<f64>], to: &[Vector3<f64>]) -> HeadPose {
    let n = from.len() as f64;
    let centroid_from = from.iter().map(|p| p.coords).sum::<Vector3<f64>>() / n;
    let centroid_to = to.iter().sum::<Vector3<f64>>() / n;

    let mut covariance = Matrix3::zeros();
    for (f, t) in from.iter().zip_eq(to) {
        covariance += (t - centroid_to) * (f.coords - centroid_from).transpose();
    }

    let svd = covariance.svd(true, true);
    let u = svd.u.unwrap();
    let v_t = svd.v_t.unwrap();
    // Ensure a proper rotation (determinant +1, not a reflection).
    let d = (u * v_t).determinant().signum();
    let d_mat = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, d));
    let rotation = Rotation3::from_matrix_unchecked(u * d_mat * v_t);

    let translation = centroid_to - rotation * centroid_from;
    HeadPose {
        rotation,
        translation,
    }
}

/// Polishes a pose estimate by Levenberg-Marquardt over the 6 pose parameters, minimizing the
/// pixel reprojection error under the full distortion model.
fn refine(
    initial: HeadPose,
    world: &[Point3<f64>],
    image: &[Point2<f64>],
    camera: &Camera,
) -> Result<HeadPose, PoseEstimationError> {
    let mut params = pack(&initial);
    let mut cost = residuals(&params, world, image, camera).norm_squared();
    if !cost.is_finite() {
        return Err(PoseEstimationError::NumericalFailure);
    }

    let mut lambda = 1e-3;
    for _ in 0..REFINE_MAX_ITERS {
        let j = jacobian(&params, world, image, camera);
        let r = residuals(&params, world, image, camera);
        let jt_j = j.tr_mul(&j);
        let jt_r = j.tr_mul(&r);

        let damped = &jt_j + DMatrix::identity(6, 6) * lambda;
        let step = match damped.cholesky() {
            Some(cholesky) => cholesky.solve(&jt_r),
            None => {
                lambda *= 10.0;
                continue;
            }
        };

        let candidate = &params - &step;
        let candidate_cost = residuals(&candidate, world, image, camera).norm_squared();
        if candidate_cost < cost {
            params = candidate;
            cost = candidate_cost;
            lambda = (lambda * 0.1).max(1e-12);
            if step.norm() < REFINE_STEP_EPS {
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > 1e9 {
                break;
            }
        }
    }

    Ok(unpack(&params))
}

fn pack(pose: &HeadPose) -> DVector<f64> {
    let r = pose.rodrigues();
    let t = pose.translation();
    DVector::from_column_slice(&[r.x, r.y, r.z, t.x, t.y, t.z])
}

fn unpack(params: &DVector<f64>) -> HeadPose {
    HeadPose::from_rodrigues(
        Vector3::new(params[0], params[1], params[2]),
        Vector3::new(params[3], params[4], params[5]),
    )
}

fn residuals(
    params: &DVector<f64>,
    world: &[Point3<f64>],
    image: &[Point2<f64>],
    camera: &Camera,
) -> DVector<f64> {
    let pose = unpack(params);
    let mut r = DVector::zeros(2 * world.len());
    for (i, (point, observed)) in world.iter().zip_eq(image).enumerate() {
        let projected = camera.project(&pose.transform_point(point));
        r[2 * i] = projected.x - observed.x;
        r[2 * i + 1] = projected.y - observed.y;
    }
    r
}

fn jacobian(
    params: &DVector<f64>,
    world: &[Point3<f64>],
    image: &[Point2<f64>],
    camera: &Camera,
) -> DMatrix<f64> {
    let mut j = DMatrix::zeros(2 * world.len(), 6);
    for k in 0..6 {
        let mut plus = params.clone();
        plus[k] += JACOBIAN_DELTA;
        let mut minus = params.clone();
        minus[k] -= JACOBIAN_DELTA;
        let column = (residuals(&plus, world, image, camera)
            - residuals(&minus, world, image, camera))
            / (2.0 * JACOBIAN_DELTA);
        j.set_column(k, &column);
    }
    j
}
