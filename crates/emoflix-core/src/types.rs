use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// The closed emotion vocabulary produced by the classifier.
///
/// Declaration order is the canonical order used for serialization and for
/// breaking ties between equal scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
}

impl Emotion {
    pub const COUNT: usize = 7;

    /// All labels in canonical order (matches the classifier's output indices).
    pub const ALL: [Emotion; Emotion::COUNT] = [
        Emotion::Angry,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Surprise,
        Emotion::Neutral,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Angry => "angry",
            Emotion::Disgust => "disgust",
            Emotion::Fear => "fear",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Surprise => "surprise",
            Emotion::Neutral => "neutral",
        }
    }

    /// Position in canonical order.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown emotion label: {0:?}")]
pub struct UnknownEmotion(pub String);

impl FromStr for Emotion {
    type Err = UnknownEmotion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Emotion::ALL
            .into_iter()
            .find(|e| e.as_str() == needle)
            .ok_or_else(|| UnknownEmotion(s.to_string()))
    }
}

/// Confidence for every emotion label, each in [0, 100].
///
/// Scores are independent and need not sum to 100.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EmotionScores([f32; Emotion::COUNT]);

impl EmotionScores {
    pub fn new(values: [f32; Emotion::COUNT]) -> Self {
        Self(values)
    }

    pub fn get(&self, emotion: Emotion) -> f32 {
        self.0[emotion.index()]
    }

    pub fn set(&mut self, emotion: Emotion, score: f32) {
        self.0[emotion.index()] = score;
    }

    /// Iterate `(label, score)` pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (Emotion, f32)> + '_ {
        Emotion::ALL.iter().map(move |&e| (e, self.get(e)))
    }

    /// Highest-scoring label. Ties resolve to the earliest label in canonical order.
    pub fn dominant(&self) -> Emotion {
        let mut best = Emotion::ALL[0];
        for (emotion, score) in self.iter() {
            if score > self.get(best) {
                best = emotion;
            }
        }
        best
    }

    /// Labels sorted by descending score; equal scores keep canonical order.
    pub fn ranked(&self) -> Vec<(Emotion, f32)> {
        let mut ranked: Vec<_> = self.iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }

    /// Per-label arithmetic mean. Returns `None` for an empty input.
    pub fn mean<'a, I>(scores: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a EmotionScores>,
    {
        let mut sum = [0.0f32; Emotion::COUNT];
        let mut count = 0usize;
        for s in scores {
            for (acc, v) in sum.iter_mut().zip(s.0.iter()) {
                *acc += v;
            }
            count += 1;
        }
        if count == 0 {
            return None;
        }
        Some(Self(sum.map(|v| v / count as f32)))
    }
}

impl Serialize for EmotionScores {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Emotion::COUNT))?;
        for (emotion, score) in self.iter() {
            map.serialize_entry(emotion.as_str(), &score)?;
        }
        map.end()
    }
}

/// Per-label count of frames whose dominant label was that emotion.
///
/// Labels are kept in the order they were first voted for; only labels with
/// at least one vote appear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteTally {
    counts: Vec<(Emotion, u32)>,
}

impl VoteTally {
    pub fn record(&mut self, emotion: Emotion) {
        match self.counts.iter_mut().find(|(e, _)| *e == emotion) {
            Some((_, n)) => *n += 1,
            None => self.counts.push((emotion, 1)),
        }
    }

    pub fn count(&self, emotion: Emotion) -> u32 {
        self.counts
            .iter()
            .find(|(e, _)| *e == emotion)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().map(|(_, n)| n).sum()
    }

    /// Most voted label; ties go to the label that received its first vote earliest.
    pub fn leader(&self) -> Option<Emotion> {
        let mut best: Option<(Emotion, u32)> = None;
        for &(emotion, n) in &self.counts {
            if best.map_or(true, |(_, top)| n > top) {
                best = Some((emotion, n));
            }
        }
        best.map(|(e, _)| e)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Emotion, u32)> + '_ {
        self.counts.iter().copied()
    }
}

impl FromIterator<Emotion> for VoteTally {
    fn from_iter<I: IntoIterator<Item = Emotion>>(iter: I) -> Self {
        let mut tally = VoteTally::default();
        for emotion in iter {
            tally.record(emotion);
        }
        tally
    }
}

impl Serialize for VoteTally {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.counts.len()))?;
        for (emotion, n) in &self.counts {
            map.serialize_entry(emotion.as_str(), n)?;
        }
        map.end()
    }
}

/// Bounding box of a detected face, in pixel coordinates of the analyzed frame.
#[derive(Debug, Clone)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Classifier output for one frame.
#[derive(Debug, Clone)]
pub struct FrameAnalysis {
    pub scores: EmotionScores,
    /// Arg-max of `scores` at classification time, before any fusion override.
    pub dominant: Emotion,
    /// The face that was classified, or `None` when the whole frame was used.
    pub face: Option<BoundingBox>,
}

impl FrameAnalysis {
    pub fn new(scores: EmotionScores, face: Option<BoundingBox>) -> Self {
        Self {
            dominant: scores.dominant(),
            scores,
            face,
        }
    }
}
