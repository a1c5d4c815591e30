//! Facial expression classifier via ONNX Runtime.
//!
//! Expects a FER-2013 style model: a 48x48 grayscale face crop in, seven
//! class scores out in the order angry, disgust, fear, happy, sad, surprise,
//! neutral.

use crate::types::{Emotion, EmotionScores};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

const CLASSIFIER_INPUT_SIZE: u32 = 48;
/// Outputs already summing to 1 within this tolerance are treated as probabilities.
const PROBABILITY_SUM_TOLERANCE: f32 = 1e-3;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model file not found: {0} (place a 7-class FER model in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("expected {expected} class scores, got {actual}")]
    UnexpectedOutput { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Memory layout of the model's input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
    /// `[1, 1, 48, 48]`, typical of PyTorch exports.
    #[default]
    Nchw,
    /// `[1, 48, 48, 1]`, typical of Keras exports.
    Nhwc,
}

impl FromStr for TensorLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nchw" => Ok(TensorLayout::Nchw),
            "nhwc" => Ok(TensorLayout::Nhwc),
            other => Err(format!("unknown tensor layout {other:?} (expected nchw or nhwc)")),
        }
    }
}

/// Seven-class facial expression classifier.
pub struct EmotionClassifier {
    session: Session,
    layout: TensorLayout,
}

impl EmotionClassifier {
    /// Load the classifier ONNX model from the given path.
    pub fn load(model_path: &str, layout: TensorLayout) -> Result<Self, ClassifierError> {
        if !Path::new(model_path).exists() {
            return Err(ClassifierError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            ?layout,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded emotion classifier"
        );

        Ok(Self { session, layout })
    }

    /// Classify a face crop (or whole frame), returning scores on the 0–100 scale.
    pub fn classify(&mut self, face: &RgbImage) -> Result<EmotionScores, ClassifierError> {
        let input = Self::preprocess(face, self.layout);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("class scores: {e}")))?;

        to_percentages(raw)
    }

    /// Convert to 48x48 luma in [0, 1], laid out per `layout`.
    fn preprocess(face: &RgbImage, layout: TensorLayout) -> Array4<f32> {
        let gray = GrayImage::from_fn(face.width(), face.height(), |x, y| {
            let [r, g, b] = face.get_pixel(x, y).0;
            // ITU-R BT.601 luma
            let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
            Luma([luma.round().clamp(0.0, 255.0) as u8])
        });
        let resized = imageops::resize(&gray, CLASSIFIER_INPUT_SIZE, CLASSIFIER_INPUT_SIZE, FilterType::Triangle);

        let size = CLASSIFIER_INPUT_SIZE as usize;
        let shape = match layout {
            TensorLayout::Nchw => (1, 1, size, size),
            TensorLayout::Nhwc => (1, size, size, 1),
        };
        let mut tensor = Array4::<f32>::zeros(shape);
        for (x, y, pixel) in resized.enumerate_pixels() {
            let value = pixel.0[0] as f32 / 255.0;
            let (x, y) = (x as usize, y as usize);
            match layout {
                TensorLayout::Nchw => tensor[[0, 0, y, x]] = value,
                TensorLayout::Nhwc => tensor[[0, y, x, 0]] = value,
            }
        }
        tensor
    }
}

/// Map raw model output to 0–100 scores, applying softmax to logits.
fn to_percentages(raw: &[f32]) -> Result<EmotionScores, ClassifierError> {
    if raw.len() != Emotion::COUNT {
        return Err(ClassifierError::UnexpectedOutput {
            expected: Emotion::COUNT,
            actual: raw.len(),
        });
    }
    if raw.iter().any(|v| !v.is_finite()) {
        return Err(ClassifierError::InferenceFailed("non-finite class score".into()));
    }

    let is_distribution = raw.iter().all(|&v| (0.0..=1.0).contains(&v))
        && (raw.iter().sum::<f32>() - 1.0).abs() < PROBABILITY_SUM_TOLERANCE;

    let probabilities: Vec<f32> = if is_distribution {
        raw.to_vec()
    } else {
        let max = raw.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = raw.iter().map(|&v| (v - max).exp()).collect();
        let sum: f32 = exps.iter().sum();
        exps.into_iter().map(|e| e / sum).collect()
    };

    let mut values = [0.0f32; Emotion::COUNT];
    for (slot, p) in values.iter_mut().zip(probabilities) {
        *slot = p * 100.0;
    }
    Ok(EmotionScores::new(values))
}
