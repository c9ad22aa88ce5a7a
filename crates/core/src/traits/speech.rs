//! Speech processing traits
//!
//! The recognition and synthesis services are unreliable, latency-variable
//! external collaborators. These traits are the only surface the pipeline
//! sees; concrete streaming clients are substituted without touching the
//! session or turn logic.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::audio::AudioFrame;
use crate::profile::VoiceId;
use crate::transcript::TranscriptResult;
use crate::Result;

/// Stream of synthesized audio frames
pub type AudioStream = Pin<Box<dyn Stream<Item = Result<AudioFrame>> + Send>>;

/// Speech-to-Text interface
///
/// `open` starts one recognition stream per turn; frames are pushed in
/// client-send order and `finalize` consumes the stream.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync + 'static {
    /// Open a recognition stream
    ///
    /// # Arguments
    /// * `language_hint` - BCP 47 language tag, e.g. "de-DE"
    async fn open(&self, language_hint: &str) -> Result<Box<dyn RecognitionStream>>;

    /// Get model name for logging
    fn model_name(&self) -> &str;
}

/// One live recognition stream, owned by a single turn
#[async_trait]
pub trait RecognitionStream: Send {
    /// Push an audio frame; frames must arrive in sequence order
    async fn push_audio(&mut self, frame: AudioFrame) -> Result<()>;

    /// Take the latest partial transcript, if the service emitted one
    /// since the last call. Partials are advisory (UI feedback only).
    fn take_partial(&mut self) -> Option<TranscriptResult>;

    /// Finalize the stream and return the final transcript
    async fn finalize(self: Box<Self>) -> Result<TranscriptResult>;
}

/// Text-to-Speech interface
///
/// Synthesis is consumed incrementally so the first audio chunk can be on
/// the wire before the full reply has been synthesized.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync + 'static {
    /// Synthesize one text segment into a stream of audio frames
    async fn synthesize(&self, segment: &str, voice: &VoiceId) -> Result<AudioStream>;

    /// Get model name for logging
    fn model_name(&self) -> &str;
}
