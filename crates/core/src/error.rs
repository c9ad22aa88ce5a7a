//! Error types shared across the workspace

use thiserror::Error;

/// Core errors, mostly raised at the adapter boundaries
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("speech recognition unavailable: {0}")]
    RecognitionUnavailable(String),

    #[error("speech recognition timed out after {0}ms")]
    RecognitionTimeout(u64),

    #[error("reply generation unavailable: {0}")]
    GenerationUnavailable(String),

    #[error("reply generation timed out after {0}ms")]
    GenerationTimeout(u64),

    #[error("speech synthesis unavailable: {0}")]
    SynthesisUnavailable(String),

    #[error("invalid profile: {0}")]
    InvalidProfile(String),
}

impl Error {
    /// Transient errors are worth one retry; the rest are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::RecognitionUnavailable(_)
                | Error::RecognitionTimeout(_)
                | Error::GenerationUnavailable(_)
                | Error::GenerationTimeout(_)
                | Error::SynthesisUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
