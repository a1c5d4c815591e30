//! UltraFace face detector via ONNX Runtime.
//!
//! Runs the RFB-320 variant of the Ultra-Light-Fast-Generic-Face-Detector:
//! the frame is stretched to 320x240, the model emits per-prior face scores
//! and normalized corner boxes, and overlapping boxes are merged by NMS.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const ULTRAFACE_INPUT_WIDTH: u32 = 320;
const ULTRAFACE_INPUT_HEIGHT: u32 = 240;
const ULTRAFACE_MEAN: f32 = 127.0;
const ULTRAFACE_STD: f32 = 128.0;
const ULTRAFACE_NMS_THRESHOLD: f32 = 0.3;
/// Faces smaller than this fraction of the frame area are discarded.
const MIN_FACE_AREA_FRACTION: f32 = 0.001;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download version-RFB-320.onnx and place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// UltraFace-based face detector.
pub struct FaceDetector {
    session: Session,
    confidence_threshold: f32,
    /// Output indices (scores, boxes), discovered by name at load time.
    output_indices: (usize, usize),
}

impl FaceDetector {
    /// Load the UltraFace ONNX model from the given path.
    pub fn load(model_path: &str, confidence_threshold: f32) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded UltraFace model"
        );

        if output_names.len() < 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "UltraFace model requires 2 outputs (scores, boxes), got {}",
                output_names.len()
            )));
        }

        let output_indices = discover_output_indices(&output_names);

        Ok(Self {
            session,
            confidence_threshold,
            output_indices,
        })
    }

    /// Detect faces in an RGB frame, returning boxes in frame pixels sorted by confidence.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let input = Self::preprocess(frame);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (scores_idx, boxes_idx) = self.output_indices;
        let (_, scores) = outputs[scores_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[boxes_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;

        if scores.len() / 2 != boxes.len() / 4 {
            return Err(DetectorError::InferenceFailed(format!(
                "prior count mismatch: {} scores vs {} boxes",
                scores.len() / 2,
                boxes.len() / 4
            )));
        }

        let candidates = decode_priors(scores, boxes, width, height, self.confidence_threshold);
        let faces = nms(candidates, ULTRAFACE_NMS_THRESHOLD);
        tracing::debug!(faces = faces.len(), "UltraFace detections");
        Ok(faces)
    }

    /// Detect and return the most confident face, or `NoFaceDetected`.
    pub fn detect_best(&mut self, frame: &RgbImage) -> Result<BoundingBox, DetectorError> {
        self.detect(frame)?
            .into_iter()
            .next()
            .ok_or(DetectorError::NoFaceDetected)
    }

    /// Stretch the frame to the model input and normalize into an NCHW tensor.
    fn preprocess(frame: &RgbImage) -> Array4<f32> {
        let resized = imageops::resize(
            frame,
            ULTRAFACE_INPUT_WIDTH,
            ULTRAFACE_INPUT_HEIGHT,
            FilterType::Triangle,
        );

        let h = ULTRAFACE_INPUT_HEIGHT as usize;
        let w = ULTRAFACE_INPUT_WIDTH as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - ULTRAFACE_MEAN) / ULTRAFACE_STD;
            }
        }
        tensor
    }
}

/// Find the `scores` and `boxes` outputs by name, falling back to positional order.
fn discover_output_indices(names: &[String]) -> (usize, usize) {
    let scores = names.iter().position(|n| n == "scores");
    let boxes = names.iter().position(|n| n == "boxes");
    match (scores, boxes) {
        (Some(s), Some(b)) => (s, b),
        _ => {
            tracing::info!(?names, "UltraFace: output names not recognized, using positional mapping [0]=scores, [1]=boxes");
            (0, 1)
        }
    }
}

/// Turn per-prior scores (`[background, face]` pairs) and normalized corner
/// boxes into pixel-space candidates above `threshold`.
fn decode_priors(scores: &[f32], boxes: &[f32], width: u32, height: u32, threshold: f32) -> Vec<BoundingBox> {
    let w = width as f32;
    let h = height as f32;
    let min_area = MIN_FACE_AREA_FRACTION * w * h;

    scores
        .chunks_exact(2)
        .zip(boxes.chunks_exact(4))
        .filter(|(score, _)| score[1] > threshold)
        .filter_map(|(score, corners)| {
            let x1 = corners[0].clamp(0.0, 1.0) * w;
            let y1 = corners[1].clamp(0.0, 1.0) * h;
            let x2 = corners[2].clamp(0.0, 1.0) * w;
            let y2 = corners[3].clamp(0.0, 1.0) * h;
            let bbox = BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score[1],
            };
            (bbox.width > 0.0 && bbox.height > 0.0 && bbox.area() >= min_area).then_some(bbox)
        })
        .collect()
}

/// Greedy non-maximum suppression; the result is sorted by descending confidence.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Intersection-over-Union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let ix = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let iy = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = ix * iy;
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
