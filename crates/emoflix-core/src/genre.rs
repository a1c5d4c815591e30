//! Emotion → TMDB movie genre mapping.

use crate::types::{Emotion, UnknownEmotion};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// TMDB "Comedy"; used for labels without an explicit mapping.
pub const FALLBACK_GENRE_ID: u32 = 35;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GenreMapError {
    #[error("genre map entry {0:?} is not of the form label=id")]
    MalformedEntry(String),
    #[error(transparent)]
    UnknownEmotion(#[from] UnknownEmotion),
    #[error("invalid genre id {0:?}")]
    InvalidId(String),
}

/// Lookup table from emotion label to TMDB genre id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenreMap {
    genres: BTreeMap<Emotion, u32>,
}

impl Default for GenreMap {
    fn default() -> Self {
        let genres = BTreeMap::from([
            (Emotion::Happy, 35), // Comedy
            (Emotion::Sad, 18), // Drama
            (Emotion::Angry, 28), // Action
            (Emotion::Fear, 27), // Horror
            (Emotion::Surprise, 878), // Science Fiction
            (Emotion::Neutral, 10749), // Romance
        ]);
        Self { genres }
    }
}

impl GenreMap {
    /// Genre id for `emotion`, falling back to Comedy for unmapped labels.
    pub fn genre_for(&self, emotion: Emotion) -> u32 {
        self.genres.get(&emotion).copied().unwrap_or(FALLBACK_GENRE_ID)
    }

    /// Apply `label=id,label=id` overrides on top of this map. Blank input is a no-op.
    pub fn with_overrides(mut self, spec: &str) -> Result<Self, GenreMapError> {
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (label, id) = entry
                .split_once('=')
                .ok_or_else(|| GenreMapError::MalformedEntry(entry.to_string()))?;
            let emotion: Emotion = label.trim().parse()?;
            let id: u32 = id
                .trim()
                .parse()
                .map_err(|_| GenreMapError::InvalidId(id.trim().to_string()))?;
            self.genres.insert(emotion, id);
        }
        Ok(self)
    }
}
