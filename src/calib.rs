//! Loading camera calibrations and face model templates from disk.
//!
//! Two interchangeable on-disk formats cover the common ways this data is shipped: JSON
//! documents, and plain text files holding whitespace-separated matrices. [`CalibrationFormat`]
//! selects the adapter, either explicitly or from the file extension.

use std::num::ParseFloatError;
use std::path::{Path, PathBuf};
use std::{fs, io};

use nalgebra::{Matrix3, Point3};
use serde::Deserialize;
use thiserror::Error;

use crate::camera::{Camera, Distortion, Intrinsics};
use crate::face::{FaceModel, NUM_LANDMARKS};

/// On-disk format of calibration and face model files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationFormat {
    /// JSON documents (`.json`).
    Json,
    /// Whitespace-separated numbers (`.txt`).
    Text,
}

impl CalibrationFormat {
    /// Picks the format matching a path's file extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, CalibrationError> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("txt") => Ok(Self::Text),
            _ => Err(CalibrationError::UnknownFormat(path.to_path_buf())),
        }
    }
}

/// Errors produced while loading calibration or face model data.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("failed to read file")]
    Io(#[from] io::Error),
    #[error("invalid JSON document")]
    Json(#[from] serde_json::Error),
    #[error("invalid number")]
    Number(#[from] ParseFloatError),
    #[error("no known calibration format for path '{}'", .0.display())]
    UnknownFormat(PathBuf),
    #[error("expected {expected} numbers, got {got}")]
    ElementCount { expected: usize, got: usize },
    #[error("camera matrix has non-positive or non-finite focal lengths or principal point")]
    InvalidIntrinsics,
    #[error("at most 5 distortion coefficients are supported, got {0}")]
    UnsupportedDistortion(usize),
}

#[derive(Deserialize)]
struct CameraDoc {
    camera_matrix: [[f64; 3]; 3],
    #[serde(default)]
    distortion: Vec<f64>,
}

#[derive(Deserialize)]
struct FaceModelDoc {
    points: Vec<[f64; 3]>,
}

/// Loads a [`Camera`] from a file.
pub fn load_camera<P: AsRef<Path>>(
    path: P,
    format: CalibrationFormat,
) -> Result<Camera, CalibrationError> {
    let text = fs::read_to_string(path)?;
    match format {
        CalibrationFormat::Json => parse_camera_json(&text),
        CalibrationFormat::Text => parse_camera_text(&text),
    }
}

/// Loads a [`FaceModel`] from a file.
pub fn load_face_model<P: AsRef<Path>>(
    path: P,
    format: CalibrationFormat,
) -> Result<FaceModel, CalibrationError> {
    let text = fs::read_to_string(path)?;
    match format {
        CalibrationFormat::Json => parse_face_model_json(&text),
        CalibrationFormat::Text => parse_face_model_text(&text),
    }
}

/// Parses a JSON camera document: a 3×3 `camera_matrix` plus an optional list of up to 5
/// `distortion` coefficients.
pub fn parse_camera_json(text: &str) -> Result<Camera, CalibrationError> {
    let doc: CameraDoc = serde_json::from_str(text)?;
    let matrix = Matrix3::from_fn(|r, c| doc.camera_matrix[r][c]);
    camera_from_parts(&matrix, &doc.distortion)
}

/// Parses a plain-text camera: 9 row-major camera matrix entries, optionally followed by up to 5
/// distortion coefficients.
pub fn parse_camera_text(text: &str) -> Result<Camera, CalibrationError> {
    let values = parse_numbers(text)?;
    if values.len() < 9 || values.len() > 9 + 5 {
        return Err(CalibrationError::ElementCount {
            expected: 9,
            got: values.len(),
        });
    }
    let matrix = Matrix3::from_row_slice(&values[..9]);
    camera_from_parts(&matrix, &values[9..])
}

/// Parses a JSON face model document: a `points` list of 6 `[x, y, z]` template positions in
/// [`crate::face::Landmark`] order.
pub fn parse_face_model_json(text: &str) -> Result<FaceModel, CalibrationError> {
    let doc: FaceModelDoc = serde_json::from_str(text)?;
    if doc.points.len() != NUM_LANDMARKS {
        return Err(CalibrationError::ElementCount {
            expected: NUM_LANDMARKS,
            got: doc.points.len(),
        });
    }

    let mut points = [Point3::origin(); NUM_LANDMARKS];
    for (point, &[x, y, z]) in points.iter_mut().zip(&doc.points) {
        *point = Point3::new(x, y, z);
    }
    Ok(FaceModel::new(points))
}

/// Parses a plain-text face model: one row per coordinate, so 3 rows of 6 values each.
pub fn parse_face_model_text(text: &str) -> Result<FaceModel, CalibrationError> {
    let values = parse_numbers(text)?;
    if values.len() != 3 * NUM_LANDMARKS {
        return Err(CalibrationError::ElementCount {
            expected: 3 * NUM_LANDMARKS,
            got: values.len(),
        });
    }

    let mut points = [Point3::origin(); NUM_LANDMARKS];
    for (i, point) in points.iter_mut().enumerate() {
        *point = Point3::new(
            values[i],
            values[NUM_LANDMARKS + i],
            values[2 * NUM_LANDMARKS + i],
        );
    }
    Ok(FaceModel::new(points))
}

fn camera_from_parts(
    matrix: &Matrix3<f64>,
    distortion: &[f64],
) -> Result<Camera, CalibrationError> {
    let intrinsics = Intrinsics::from_matrix(matrix);
    if !intrinsics.is_valid() {
        return Err(CalibrationError::InvalidIntrinsics);
    }
    let distortion = Distortion::from_slice(distortion)
        .ok_or(CalibrationError::UnsupportedDistortion(distortion.len()))?;
    Ok(Camera {
        intrinsics,
        distortion,
    })
}

fn parse_numbers(text: &str) -> Result<Vec<f64>, CalibrationError> {
    text.split_whitespace()
        .map(|token| Ok(token.parse::<f64>()?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::Landmark;

    #[test]
    fn format_from_extension() {
        assert_eq!(
            CalibrationFormat::from_path("cam.json").unwrap(),
            CalibrationFormat::Json
        );
        assert_eq!(
            CalibrationFormat::from_path("model.txt").unwrap(),
            CalibrationFormat::Text
        );
        assert!(matches!(
            CalibrationFormat::from_path("calibration.xml"),
            Err(CalibrationError::UnknownFormat(_))
        ));
        assert!(matches!(
            CalibrationFormat::from_path("calibration"),
            Err(CalibrationError::UnknownFormat(_))
        ));
    }

    #[test]
    fn camera_json() {
        let camera = parse_camera_json(
            r#"{
                "camera_matrix": [[950.0, 0.0, 640.0], [0.0, 945.0, 360.0], [0.0, 0.0, 1.0]],
                "distortion": [-0.1, 0.02]
            }"#,
        )
        .unwrap();
        assert_eq!(camera.intrinsics.fx, 950.0);
        assert_eq!(camera.intrinsics.cy, 360.0);
        assert_eq!(camera.distortion.k1, -0.1);
        assert_eq!(camera.distortion.k3, 0.0);
    }

    #[test]
    fn camera_json_distortion_is_optional() {
        let camera = parse_camera_json(
            r#"{"camera_matrix": [[950.0, 0.0, 640.0], [0.0, 945.0, 360.0], [0.0, 0.0, 1.0]]}"#,
        )
        .unwrap();
        assert!(camera.distortion.is_zero());
    }

    #[test]
    fn camera_json_rejects_garbage() {
        assert!(matches!(
            parse_camera_json("not json"),
            Err(CalibrationError::Json(_))
        ));
    }

    #[test]
    fn camera_text() {
        let camera = parse_camera_text(
            "950.0 0.0 640.0\n0.0 945.0 360.0\n0.0 0.0 1.0\n-0.1 0.02 0.0 0.0 0.05",
        )
        .unwrap();
        assert_eq!(camera.intrinsics.fy, 945.0);
        assert_eq!(camera.distortion.k3, 0.05);

        let bare = parse_camera_text("950.0 0.0 640.0 0.0 945.0 360.0 0.0 0.0 1.0").unwrap();
        assert!(bare.distortion.is_zero());
    }

    #[test]
    fn camera_text_wrong_count() {
        assert!(matches!(
            parse_camera_text("1.0 2.0 3.0"),
            Err(CalibrationError::ElementCount { expected: 9, got: 3 })
        ));
    }

    #[test]
    fn camera_text_bad_token() {
        assert!(matches!(
            parse_camera_text("950.0 0.0 x 0.0 945.0 360.0 0.0 0.0 1.0"),
            Err(CalibrationError::Number(_))
        ));
    }

    #[test]
    fn invalid_intrinsics_are_rejected() {
        assert!(matches!(
            parse_camera_text("0.0 0.0 640.0 0.0 945.0 360.0 0.0 0.0 1.0"),
            Err(CalibrationError::InvalidIntrinsics)
        ));
    }

    #[test]
    fn too_many_distortion_coefficients() {
        let text = "950.0 0.0 640.0 0.0 945.0 360.0 0.0 0.0 1.0 0.1 0.1 0.1 0.1 0.1 0.1";
        // 6 coefficients also exceed the 9..=14 element window, so the text path reports a count
        // error rather than an unsupported model.
        assert!(parse_camera_text(text).is_err());

        let json = r#"{
            "camera_matrix": [[950.0, 0.0, 640.0], [0.0, 945.0, 360.0], [0.0, 0.0, 1.0]],
            "distortion": [0.1, 0.1, 0.1, 0.1, 0.1, 0.1]
        }"#;
        assert!(matches!(
            parse_camera_json(json),
            Err(CalibrationError::UnsupportedDistortion(6))
        ));
    }

    #[test]
    fn face_model_text_layout() {
        let model = parse_face_model_text(
            "-45.0968 -21.3129 21.3129 45.0968 -26.2996 26.2996\n\
             -0.4838 0.4838 0.4838 -0.4838 68.595 68.595\n\
             2.397 -2.397 -2.397 2.397 0.0 0.0",
        )
        .unwrap();
        assert_eq!(model, *FaceModel::generic());
    }

    #[test]
    fn face_model_text_wrong_count() {
        assert!(matches!(
            parse_face_model_text("1.0 2.0 3.0 4.0"),
            Err(CalibrationError::ElementCount { expected: 18, got: 4 })
        ));
    }

    #[test]
    fn face_model_json() {
        let model = parse_face_model_json(
            r#"{"points": [
                [-45.0, -0.5, 2.4], [-21.3, 0.5, -2.4], [21.3, 0.5, -2.4],
                [45.0, -0.5, 2.4], [-26.3, 68.6, 0.0], [26.3, 68.6, 0.0]
            ]}"#,
        )
        .unwrap();
        assert_eq!(model[Landmark::RightEyeOuterCorner].x, -45.0);
        assert_eq!(model[Landmark::MouthLeftCorner].y, 68.6);
    }

    #[test]
    fn face_model_json_wrong_count() {
        assert!(matches!(
            parse_face_model_json(r#"{"points": [[1.0, 2.0, 3.0]]}"#),
            Err(CalibrationError::ElementCount { expected: 6, got: 1 })
        ));
    }

    #[test]
    fn load_camera_from_disk() {
        let path = std::env::temp_dir().join("gazenorm-test-camera.txt");
        fs::write(&path, "950.0 0.0 640.0 0.0 945.0 360.0 0.0 0.0 1.0").unwrap();

        let format = CalibrationFormat::from_path(&path).unwrap();
        let camera = load_camera(&path, format).unwrap();
        assert_eq!(camera.intrinsics.fx, 950.0);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn load_missing_file() {
        assert!(matches!(
            load_camera("/nonexistent/camera.json", CalibrationFormat::Json),
            Err(CalibrationError::Io(_))
        ));
    }
}
