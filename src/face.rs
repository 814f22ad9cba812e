//! The 3D face landmark template and per-image 2D landmark observations.
//!
//! All landmark containers are indexed by [`Landmark`] role rather than by bare position, fixing
//! the ordering convention in the type system. `Right`/`Left` refer to the *subject's* right and
//! left. In a non-mirrored image, the subject's right eye shows up on the left side of the image.

use std::fmt;
use std::ops::Index;

use nalgebra::{Point2, Point3};
use once_cell::sync::Lazy;

/// Number of landmarks in a [`FaceModel`] and [`FaceLandmarks`].
pub const NUM_LANDMARKS: usize = 6;

static GENERIC_MODEL: Lazy<FaceModel> = Lazy::new(|| {
    FaceModel::new([
        Point3::new(-45.0968, -0.4838, 2.397),
        Point3::new(-21.3129, 0.4838, -2.397),
        Point3::new(21.3129, 0.4838, -2.397),
        Point3::new(45.0968, -0.4838, 2.397),
        Point3::new(-26.2996, 68.595, 0.0),
        Point3::new(26.2996, 68.595, 0.0),
    ])
});

/// Role of a tracked facial landmark, in storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Landmark {
    RightEyeOuterCorner = 0,
    RightEyeInnerCorner = 1,
    LeftEyeInnerCorner = 2,
    LeftEyeOuterCorner = 3,
    MouthRightCorner = 4,
    MouthLeftCorner = 5,
}

impl Landmark {
    /// All landmark roles, in storage order.
    pub const ALL: [Landmark; NUM_LANDMARKS] = [
        Landmark::RightEyeOuterCorner,
        Landmark::RightEyeInnerCorner,
        Landmark::LeftEyeInnerCorner,
        Landmark::LeftEyeOuterCorner,
        Landmark::MouthRightCorner,
        Landmark::MouthLeftCorner,
    ];
}

impl From<Landmark> for usize {
    #[inline]
    fn from(landmark: Landmark) -> usize {
        landmark as usize
    }
}

/// One of the subject's eyes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Eye {
    Right,
    Left,
}

impl Eye {
    /// Returns the landmark pair whose midpoint defines this eye's center.
    pub fn corners(&self) -> (Landmark, Landmark) {
        match self {
            Eye::Right => (Landmark::RightEyeOuterCorner, Landmark::RightEyeInnerCorner),
            Eye::Left => (Landmark::LeftEyeInnerCorner, Landmark::LeftEyeOuterCorner),
        }
    }
}

impl fmt::Display for Eye {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eye::Right => f.write_str("right"),
            Eye::Left => f.write_str("left"),
        }
    }
}

/// The 3D landmark template of a face, in face-local coordinates (millimetres).
#[derive(Debug, Clone, PartialEq)]
pub struct FaceModel {
    points: [Point3<f64>; NUM_LANDMARKS],
}

impl FaceModel {
    /// Returns the built-in average-face template.
    ///
    /// Subject-specific templates (see [`crate::calib::load_face_model`]) improve pose accuracy,
    /// but the generic template works reasonably well for unseen subjects.
    pub fn generic() -> &'static FaceModel {
        &GENERIC_MODEL
    }

    /// Creates a face model from template points in [`Landmark`] order.
    pub fn new(points: [Point3<f64>; NUM_LANDMARKS]) -> Self {
        Self { points }
    }

    /// Returns the template points in [`Landmark`] order.
    #[inline]
    pub fn points(&self) -> &[Point3<f64>; NUM_LANDMARKS] {
        &self.points
    }
}

impl Index<Landmark> for FaceModel {
    type Output = Point3<f64>;

    fn index(&self, landmark: Landmark) -> &Point3<f64> {
        &self.points[landmark as usize]
    }
}

/// Detected 2D pixel positions of the [`FaceModel`] landmarks in one image.
///
/// Landmark detection itself is out of scope for this crate; observations come from an external
/// detector and must follow the [`Landmark`] ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceLandmarks {
    points: [Point2<f64>; NUM_LANDMARKS],
}

impl FaceLandmarks {
    /// Creates landmark observations from pixel positions in [`Landmark`] order.
    pub fn new(points: [Point2<f64>; NUM_LANDMARKS]) -> Self {
        Self { points }
    }

    /// Returns the observed positions in [`Landmark`] order.
    #[inline]
    pub fn points(&self) -> &[Point2<f64>; NUM_LANDMARKS] {
        &self.points
    }
}

impl Index<Landmark> for FaceLandmarks {
    type Output = Point2<f64>;

    fn index(&self, landmark: Landmark) -> &Point2<f64> {
        &self.points[landmark as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landmark_storage_order() {
        for (i, landmark) in Landmark::ALL.into_iter().enumerate() {
            assert_eq!(usize::from(landmark), i);
        }
    }

    #[test]
    fn eye_corner_pairs() {
        let (a, b) = Eye::Right.corners();
        assert_eq!((usize::from(a), usize::from(b)), (0, 1));
        let (a, b) = Eye::Left.corners();
        assert_eq!((usize::from(a), usize::from(b)), (2, 3));
    }

    #[test]
    fn landmarks_index_by_role() {
        let landmarks = FaceLandmarks::new([
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(3.0, 0.0),
            Point2::new(4.0, 1.0),
            Point2::new(5.0, 1.0),
        ]);
        assert_eq!(landmarks[Landmark::RightEyeOuterCorner].x, 0.0);
        assert_eq!(landmarks[Landmark::MouthLeftCorner], Point2::new(5.0, 1.0));
    }

    #[test]
    fn generic_template_is_mirror_symmetric() {
        let model = FaceModel::generic();
        for (right, left) in [
            (Landmark::RightEyeOuterCorner, Landmark::LeftEyeOuterCorner),
            (Landmark::RightEyeInnerCorner, Landmark::LeftEyeInnerCorner),
            (Landmark::MouthRightCorner, Landmark::MouthLeftCorner),
        ] {
            assert_eq!(model[right].x, -model[left].x);
            assert_eq!(model[right].y, model[left].y);
            assert_eq!(model[right].z, model[left].z);
        }
    }

    #[test]
    fn generic_template_is_not_planar() {
        // Pose estimation needs a template with depth variation.
        let model = FaceModel::generic();
        let z = model.points().map(|p| p.z);
        assert!(z.iter().any(|&v| v != z[0]));
    }

    #[test]
    fn mouth_is_below_the_eyes() {
        // Y points down.
        let model = FaceModel::generic();
        assert!(model[Landmark::MouthRightCorner].y > model[Landmark::RightEyeOuterCorner].y);
    }
}
