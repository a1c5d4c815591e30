//! Decision fusion — reconciles classifier output into one final label.
//!
//! Pretrained expression models lean towards "neutral" on ambiguous faces.
//! A single frame prefers a runner-up label with non-trivial support over a
//! weak neutral; a burst of frames prefers the majority vote unless neutral
//! wins the vote while another label carries the highest average score.

use crate::types::{Emotion, EmotionScores, FrameAnalysis, VoteTally};
use serde::Serialize;
use thiserror::Error;

const DEFAULT_NEUTRAL_CEILING: f32 = 50.0;
const DEFAULT_RUNNER_UP_FLOOR: f32 = 20.0;
const DEFAULT_AVERAGE_OVERRIDE_FLOOR: f32 = 30.0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FusionError {
    #[error("No images provided")]
    EmptyBatch,
    #[error("Could not analyze any frames")]
    AllFramesFailed { attempted: usize },
}

/// Thresholds for the neutral-override rules. All values are on the 0–100 score scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionPolicy {
    /// A dominant neutral scoring below this is open to override (single frame).
    pub neutral_ceiling: f32,
    /// A non-neutral runner-up must score above this to replace neutral (single frame).
    pub runner_up_floor: f32,
    /// The highest-average label must score above this to overturn a neutral majority.
    pub average_override_floor: f32,
}

impl Default for FusionPolicy {
    fn default() -> Self {
        Self {
            neutral_ceiling: DEFAULT_NEUTRAL_CEILING,
            runner_up_floor: DEFAULT_RUNNER_UP_FLOOR,
            average_override_floor: DEFAULT_AVERAGE_OVERRIDE_FLOOR,
        }
    }
}

/// Final label for a single frame.
#[derive(Debug, Clone, Serialize)]
pub struct SingleDecision {
    pub emotion: Emotion,
    pub scores: EmotionScores,
    #[serde(skip)]
    pub dominant: Emotion,
}

impl SingleDecision {
    pub fn overridden(&self) -> bool {
        self.emotion != self.dominant
    }
}

/// Result of classifying one frame of a batch.
#[derive(Debug, Clone)]
pub enum FrameOutcome {
    Analyzed(FrameAnalysis),
    Failed { index: usize, reason: String },
}

impl FrameOutcome {
    pub fn analysis(&self) -> Option<&FrameAnalysis> {
        match self {
            FrameOutcome::Analyzed(a) => Some(a),
            FrameOutcome::Failed { .. } => None,
        }
    }
}

/// Final label for a burst of frames.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateDecision {
    pub emotion: Emotion,
    /// Mean score per label over successfully analyzed frames.
    pub scores: EmotionScores,
    pub votes: VoteTally,
    #[serde(skip)]
    pub majority: Emotion,
    #[serde(skip)]
    pub highest_average: Emotion,
    #[serde(skip)]
    pub frames_analyzed: usize,
    #[serde(skip)]
    pub frames_failed: usize,
}

impl FusionPolicy {
    /// Apply the single-frame neutral override.
    pub fn decide_single(&self, analysis: &FrameAnalysis) -> SingleDecision {
        let scores = analysis.scores;
        let dominant = analysis.dominant;
        let mut emotion = dominant;

        if dominant == Emotion::Neutral && scores.get(Emotion::Neutral) < self.neutral_ceiling {
            let runner_up = scores
                .ranked()
                .into_iter()
                .find(|&(e, score)| e != Emotion::Neutral && score > self.runner_up_floor);
            if let Some((e, score)) = runner_up {
                tracing::info!(emotion = %e, score, "overriding weak neutral");
                emotion = e;
            }
        }

        SingleDecision {
            emotion,
            scores,
            dominant,
        }
    }

    /// Fold per-frame outcomes into one decision. Failed frames are skipped.
    pub fn decide_batch(&self, outcomes: &[FrameOutcome]) -> Result<AggregateDecision, FusionError> {
        if outcomes.is_empty() {
            return Err(FusionError::EmptyBatch);
        }

        let analyses: Vec<&FrameAnalysis> = outcomes.iter().filter_map(FrameOutcome::analysis).collect();
        let frames_failed = outcomes.len() - analyses.len();

        let scores = EmotionScores::mean(analyses.iter().map(|a| &a.scores)).ok_or(
            FusionError::AllFramesFailed {
                attempted: outcomes.len(),
            },
        )?;
        let votes: VoteTally = analyses.iter().map(|a| a.dominant).collect();

        let majority = votes.leader().ok_or(FusionError::AllFramesFailed {
            attempted: outcomes.len(),
        })?;
        let highest_average = scores.dominant();

        tracing::debug!(
            %majority,
            %highest_average,
            votes = ?votes,
            scores = ?scores,
            "batch fusion inputs"
        );

        let mut emotion = majority;
        if majority == Emotion::Neutral
            && highest_average != Emotion::Neutral
            && scores.get(highest_average) > self.average_override_floor
        {
            tracing::info!(
                emotion = %highest_average,
                score = scores.get(highest_average),
                "overriding neutral majority with highest average"
            );
            emotion = highest_average;
        }

        Ok(AggregateDecision {
            emotion,
            scores,
            votes,
            majority,
            highest_average,
            frames_analyzed: analyses.len(),
            frames_failed,
        })
    }
}
