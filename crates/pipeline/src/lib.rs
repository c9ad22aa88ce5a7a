//! Per-turn voice pipeline
//!
//! Drives one conversational turn end to end: audio in, transcript, scrub,
//! reply text, audio out. The transport layer owns the session state
//! machine; this crate owns everything between "begin turn" and the last
//! output audio frame.

pub mod cancel;
pub mod fallback;
pub mod segmenter;
pub mod turn;

pub use cancel::CancelToken;
pub use segmenter::segment_sentences;
pub use turn::{TurnController, TurnEvent, TurnInput, TurnStatus, TurnTimeouts};

use thiserror::Error;

/// Pipeline errors
///
/// Adapter failures are mostly absorbed inside the turn (retry, then canned
/// fallback); what escapes here is unrecoverable for the turn itself.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("adapter error: {0}")]
    Adapter(#[from] checky_core::Error),

    #[error("output channel closed")]
    OutputClosed,
}
