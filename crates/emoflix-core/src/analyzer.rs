//! Per-frame emotion analysis: locate the face, classify its expression.

use crate::classifier::{ClassifierError, EmotionClassifier, TensorLayout};
use crate::decode::DecodeError;
use crate::detector::{DetectorError, FaceDetector};
use crate::fusion::FusionError;
use crate::types::{BoundingBox, FrameAnalysis};
use image::imageops;
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fraction of the face box added on every side before cropping.
const CROP_MARGIN: f32 = 0.10;

pub const DEFAULT_DETECTOR_MODEL: &str = "version-RFB-320.onnx";
pub const DEFAULT_CLASSIFIER_MODEL: &str = "emotion-fer7.onnx";
pub const DEFAULT_DETECTION_THRESHOLD: f32 = 0.7;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Fusion(#[from] FusionError),
}

/// Anything that turns a preprocessed RGB frame into class scores.
///
/// The ONNX-backed implementation is [`OnnxEmotionModel`]; tests substitute
/// scripted models.
pub trait EmotionModel {
    fn analyze(&mut self, frame: &RgbImage) -> Result<FrameAnalysis, AnalysisError>;
}

impl<M: EmotionModel + ?Sized> EmotionModel for Box<M> {
    fn analyze(&mut self, frame: &RgbImage) -> Result<FrameAnalysis, AnalysisError> {
        (**self).analyze(frame)
    }
}

/// Locations and parameters of the two ONNX models.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub classifier: PathBuf,
    pub layout: TensorLayout,
    pub detection_threshold: f32,
}

impl ModelPaths {
    /// Default file names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join(DEFAULT_DETECTOR_MODEL),
            classifier: dir.join(DEFAULT_CLASSIFIER_MODEL),
            layout: TensorLayout::default(),
            detection_threshold: DEFAULT_DETECTION_THRESHOLD,
        }
    }
}

/// UltraFace detection followed by expression classification of the face crop.
///
/// When no face is found the whole frame is classified instead.
pub struct OnnxEmotionModel {
    detector: FaceDetector,
    classifier: EmotionClassifier,
}

impl OnnxEmotionModel {
    pub fn load(paths: &ModelPaths) -> Result<Self, AnalysisError> {
        let detector_path = paths.detector.to_string_lossy();
        let classifier_path = paths.classifier.to_string_lossy();

        let detector = FaceDetector::load(&detector_path, paths.detection_threshold)?;
        tracing::info!(path = %detector_path, "UltraFace detector loaded");

        let classifier = EmotionClassifier::load(&classifier_path, paths.layout)?;
        tracing::info!(path = %classifier_path, "emotion classifier loaded");

        Ok(Self { detector, classifier })
    }
}

impl EmotionModel for OnnxEmotionModel {
    fn analyze(&mut self, frame: &RgbImage) -> Result<FrameAnalysis, AnalysisError> {
        match self.detector.detect_best(frame) {
            Ok(face) => {
                let crop = crop_face(frame, &face);
                let scores = self.classifier.classify(&crop)?;
                tracing::debug!(?face, ?scores, "classified face crop");
                Ok(FrameAnalysis::new(scores, Some(face)))
            }
            Err(e) => {
                if matches!(e, DetectorError::NoFaceDetected) {
                    tracing::debug!("no face detected, classifying whole frame");
                } else {
                    tracing::warn!(error = %e, "face detection failed, classifying whole frame");
                }
                let scores = self.classifier.classify(frame)?;
                Ok(FrameAnalysis::new(scores, None))
            }
        }
    }
}

/// Crop `face` out of `frame`, widened by [`CROP_MARGIN`] and clamped to the frame.
pub fn crop_face(frame: &RgbImage, face: &BoundingBox) -> RgbImage {
    if frame.width() == 0 || frame.height() == 0 {
        return frame.clone();
    }
    let (fw, fh) = (frame.width() as f32, frame.height() as f32);
    let mx = face.width * CROP_MARGIN;
    let my = face.height * CROP_MARGIN;

    let x1 = (face.x - mx).clamp(0.0, fw - 1.0);
    let y1 = (face.y - my).clamp(0.0, fh - 1.0);
    let x2 = (face.x + face.width + mx).clamp(x1 + 1.0, fw);
    let y2 = (face.y + face.height + my).clamp(y1 + 1.0, fh);

    let (x, y) = (x1.floor() as u32, y1.floor() as u32);
    let w = ((x2.ceil() as u32).saturating_sub(x)).max(1);
    let h = ((y2.ceil() as u32).saturating_sub(y)).max(1);

    imageops::crop_imm(frame, x, y, w, h).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Emotion, EmotionScores};
    use image::Rgb;

    fn face(x: f32, y: f32, width: f32, height: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width,
            height,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_crop_face_adds_margin() {
        let frame = RgbImage::new(200, 200);
        let crop = crop_face(&frame, &face(50.0, 50.0, 100.0, 100.0));
        assert_eq!(crop.dimensions(), (120, 120));
    }

    #[test]
    fn test_crop_face_clamps_to_frame() {
        let frame = RgbImage::new(100, 80);
        let crop = crop_face(&frame, &face(-10.0, 40.0, 60.0, 60.0));
        assert_eq!(crop.dimensions(), (56, 46));
    }

    #[test]
    fn test_crop_face_keeps_pixels() {
        let mut frame = RgbImage::new(10, 10);
        frame.put_pixel(5, 5, Rgb([9, 8, 7]));
        let crop = crop_face(&frame, &face(5.0, 5.0, 1.0, 1.0));
        // margin pushes the origin to (4, 4)
        assert_eq!(crop.get_pixel(1, 1), &Rgb([9, 8, 7]));
    }

    #[test]
    fn test_crop_face_degenerate_box() {
        let frame = RgbImage::new(10, 10);
        let crop = crop_face(&frame, &face(20.0, 20.0, 0.0, 0.0));
        assert_eq!(crop.dimensions(), (1, 1));
    }

    struct Fixed(Emotion);

    impl EmotionModel for Fixed {
        fn analyze(&mut self, _frame: &RgbImage) -> Result<FrameAnalysis, AnalysisError> {
            let mut scores = EmotionScores::default();
            scores.set(self.0, 90.0);
            Ok(FrameAnalysis::new(scores, None))
        }
    }

    #[test]
    fn test_boxed_model_delegates() {
        let mut model: Box<dyn EmotionModel + Send> = Box::new(Fixed(Emotion::Sad));
        let analysis = model.analyze(&RgbImage::new(2, 2)).unwrap();
        assert_eq!(analysis.dominant, Emotion::Sad);
    }

    #[test]
    fn test_model_paths_in_dir() {
        let paths = ModelPaths::in_dir(Path::new("/models"));
        assert_eq!(paths.detector, PathBuf::from("/models/version-RFB-320.onnx"));
        assert_eq!(paths.classifier, PathBuf::from("/models/emotion-fer7.onnx"));
        assert_eq!(paths.layout, TensorLayout::Nchw);
    }

    #[test]
    fn test_load_missing_models() {
        let paths = ModelPaths::in_dir(Path::new("/nonexistent/emoflix"));
        assert!(matches!(
            OnnxEmotionModel::load(&paths),
            Err(AnalysisError::Detector(DetectorError::ModelNotFound(_)))
        ));
    }
}
