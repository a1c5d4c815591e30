//! emoflix-core — Facial emotion analysis engine.
//!
//! Decodes base64 image payloads, enhances contrast with CLAHE, locates the
//! face with UltraFace and classifies its expression with a 7-class model,
//! both running via ONNX Runtime. Per-frame results are reconciled into a
//! single label by the fusion rules in [`fusion`].

pub mod analyzer;
pub mod classifier;
pub mod decode;
pub mod detector;
pub mod fusion;
pub mod genre;
pub mod pipeline;
pub mod preprocess;
pub mod types;

pub use analyzer::{AnalysisError, EmotionModel, ModelPaths, OnnxEmotionModel};
pub use fusion::{AggregateDecision, FrameOutcome, FusionError, FusionPolicy, SingleDecision};
pub use genre::GenreMap;
pub use pipeline::Pipeline;
pub use preprocess::ClaheParams;
pub use types::{BoundingBox, Emotion, EmotionScores, FrameAnalysis, VoteTally};

use std::path::PathBuf;

/// Default directory for ONNX model files: `$XDG_DATA_HOME/emoflix/models`,
/// falling back to `~/.local/share/emoflix/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("emoflix")
        .join("models")
}
