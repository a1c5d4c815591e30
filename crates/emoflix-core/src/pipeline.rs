//! End-to-end analysis: payload → pixels → CLAHE → model → fusion.

use crate::analyzer::{AnalysisError, EmotionModel};
use crate::decode;
use crate::fusion::{AggregateDecision, FrameOutcome, FusionPolicy, SingleDecision};
use crate::preprocess::{self, ClaheParams};
use crate::types::FrameAnalysis;
use image::DynamicImage;

const NOT_A_STRING: &str = "frame is not a string";

/// Owns an [`EmotionModel`] together with the preprocessing and fusion settings.
pub struct Pipeline<M> {
    model: M,
    clahe: ClaheParams,
    policy: FusionPolicy,
}

impl<M: EmotionModel> Pipeline<M> {
    pub fn new(model: M, clahe: ClaheParams, policy: FusionPolicy) -> Self {
        Self { model, clahe, policy }
    }

    /// Enhance contrast and classify one decoded image.
    pub fn analyze_image(&mut self, image: &DynamicImage) -> Result<FrameAnalysis, AnalysisError> {
        let frame = preprocess::prepare(image, self.clahe);
        self.model.analyze(&frame)
    }

    /// Decode a base64 payload and classify it.
    pub fn analyze_payload(&mut self, payload: &str) -> Result<FrameAnalysis, AnalysisError> {
        let image = decode::decode_payload(payload)?;
        tracing::debug!(width = image.width(), height = image.height(), "decoded image");
        self.analyze_image(&image)
    }

    /// Classify one frame and apply the single-frame neutral override.
    pub fn detect_single(&mut self, payload: &str) -> Result<SingleDecision, AnalysisError> {
        let analysis = self.analyze_payload(payload)?;
        let decision = self.policy.decide_single(&analysis);
        tracing::info!(
            emotion = %decision.emotion,
            dominant = %decision.dominant,
            face = analysis.face.is_some(),
            "single-frame decision"
        );
        Ok(decision)
    }

    /// Classify every frame, skipping those that fail, and fuse the survivors.
    pub fn detect_batch<S: AsRef<str>>(&mut self, payloads: &[S]) -> Result<AggregateDecision, AnalysisError> {
        self.detect_frames(payloads.iter().map(|p| Some(p.as_ref())))
    }

    /// Like [`Pipeline::detect_batch`], but a `None` frame (an entry that was not
    /// a string on the wire) is recorded as failed without being decoded.
    pub fn detect_frames<'a, I>(&mut self, frames: I) -> Result<AggregateDecision, AnalysisError>
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        let outcomes: Vec<FrameOutcome> = frames
            .into_iter()
            .enumerate()
            .map(|(index, frame)| {
                let result = match frame {
                    Some(payload) => self.analyze_payload(payload).map_err(|e| e.to_string()),
                    None => Err(NOT_A_STRING.to_string()),
                };
                match result {
                    Ok(analysis) => FrameOutcome::Analyzed(analysis),
                    Err(reason) => {
                        tracing::warn!(index, error = %reason, "skipping frame");
                        FrameOutcome::Failed { index, reason }
                    }
                }
            })
            .collect();

        let decision = self.policy.decide_batch(&outcomes)?;
        tracing::info!(
            emotion = %decision.emotion,
            majority = %decision.majority,
            highest_average = %decision.highest_average,
            analyzed = decision.frames_analyzed,
            failed = decision.frames_failed,
            "multi-frame decision"
        );
        Ok(decision)
    }
}
