//! Transcript types emitted by the speech recognition adapter

use serde::{Deserialize, Serialize};

/// A partial or final transcript
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptResult {
    /// Transcribed text
    pub text: String,
    /// Recognition confidence (0.0 - 1.0)
    pub confidence: f32,
    /// Is this the final transcript for the turn?
    pub is_final: bool,
}

impl TranscriptResult {
    /// Create a partial transcript
    pub fn partial(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            is_final: false,
        }
    }

    /// Create a final transcript
    pub fn final_(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            is_final: true,
        }
    }

    /// A transcript counts as empty when nothing but whitespace was heard.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}
