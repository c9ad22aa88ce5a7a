//! Core traits and types for the child voice assistant
//!
//! This crate provides foundational types used across all other crates:
//! - Adapter traits for the external speech services (STT, generation, TTS)
//! - Audio frame types
//! - Transcript types
//! - The PII scrubber
//! - Per-session configuration profile
//! - Error types

pub mod audio;
pub mod error;
pub mod persona;
pub mod profile;
pub mod scrub;
pub mod traits;
pub mod transcript;

pub use audio::{AudioFrame, Channels, SampleRate};
pub use error::{Error, Result};
pub use persona::Persona;
pub use profile::{AgeBand, ConfigProfile, ProfileStore, VoiceId};
pub use scrub::{scrub, ScrubOutcome};
pub use transcript::TranscriptResult;

pub use traits::{
    AudioStream, GenerateRequest, RecognitionStream, ReplyGenerator, SpeechRecognizer,
    SpeechSynthesizer,
};
