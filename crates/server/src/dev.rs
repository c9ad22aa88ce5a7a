//! Local loopback adapters
//!
//! Stand-ins used by the binary and in tests so the full pipeline runs
//! without any external speech service. Recognition reports what it heard
//! in terms of speech activity, generation echoes an age-appropriate
//! German reply, synthesis produces a tone whose length tracks the text.

use async_trait::async_trait;
use std::f32::consts::TAU;

use checky_core::{
    AgeBand, AudioFrame, AudioStream, Channels, GenerateRequest, RecognitionStream,
    ReplyGenerator, Result, SampleRate, SpeechRecognizer, SpeechSynthesizer, TranscriptResult,
    VoiceId,
};

/// Frames above this energy count as speech
const SPEECH_FLOOR_DB: f32 = -45.0;

/// Voiced frames needed before the turn counts as heard (20ms each)
const MIN_VOICED_FRAMES: u64 = 10;

pub struct LoopbackRecognizer;

struct LoopbackRecognitionStream {
    voiced_frames: u64,
    total_frames: u64,
}

#[async_trait]
impl SpeechRecognizer for LoopbackRecognizer {
    async fn open(&self, language_hint: &str) -> Result<Box<dyn RecognitionStream>> {
        tracing::debug!(language_hint, "loopback recognition stream opened");
        Ok(Box::new(LoopbackRecognitionStream {
            voiced_frames: 0,
            total_frames: 0,
        }))
    }

    fn model_name(&self) -> &str {
        "loopback-stt"
    }
}

#[async_trait]
impl RecognitionStream for LoopbackRecognitionStream {
    async fn push_audio(&mut self, frame: AudioFrame) -> Result<()> {
        self.total_frames += 1;
        if !frame.is_silence(SPEECH_FLOOR_DB) {
            self.voiced_frames += 1;
        }
        Ok(())
    }

    fn take_partial(&mut self) -> Option<TranscriptResult> {
        if self.voiced_frames == MIN_VOICED_FRAMES {
            Some(TranscriptResult::partial("...", 0.3))
        } else {
            None
        }
    }

    async fn finalize(self: Box<Self>) -> Result<TranscriptResult> {
        if self.voiced_frames >= MIN_VOICED_FRAMES {
            Ok(TranscriptResult::final_(
                format!(
                    "Ich habe {} ms gesprochen",
                    self.voiced_frames * 20
                ),
                0.5,
            ))
        } else {
            Ok(TranscriptResult::final_("", 1.0))
        }
    }
}

pub struct LoopbackGenerator;

#[async_trait]
impl ReplyGenerator for LoopbackGenerator {
    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        let reply = match request.age_band {
            AgeBand::Young => format!("Du hast gesagt: {}. Das ist toll!", request.text),
            AgeBand::Middle => format!(
                "Du hast gesagt: {}. Zum Beispiel könnten wir darüber reden!",
                request.text
            ),
            AgeBand::Older => format!(
                "Du hast gesagt: {}. Was denkst du selbst darüber?",
                request.text
            ),
        };
        Ok(reply)
    }

    fn model_name(&self) -> &str {
        "loopback-llm"
    }
}

pub struct LoopbackSynthesizer;

#[async_trait]
impl SpeechSynthesizer for LoopbackSynthesizer {
    async fn synthesize(&self, segment: &str, voice: &VoiceId) -> Result<AudioStream> {
        // Roughly 60ms of tone per word, in 20ms frames.
        let words = segment.split_whitespace().count().max(1);
        let frames = (words * 3) as u64;
        let pitch_hz = if voice.as_str().ends_with('D') { 220.0 } else { 330.0 };

        Ok(Box::pin(async_stream::stream! {
            let samples_per_frame = SampleRate::Hz24000.frame_size_20ms();
            for sequence in 0..frames {
                let samples: Vec<f32> = (0..samples_per_frame)
                    .map(|i| {
                        let t = (sequence as usize * samples_per_frame + i) as f32 / 24_000.0;
                        0.2 * (TAU * pitch_hz * t).sin()
                    })
                    .collect();
                yield Ok(AudioFrame::new(
                    samples,
                    SampleRate::Hz24000,
                    Channels::Mono,
                    sequence,
                ));
            }
        }))
    }

    fn model_name(&self) -> &str {
        "loopback-tts"
    }
}

/// The full loopback adapter set
pub fn loopback_adapters() -> crate::state::Adapters {
    use std::sync::Arc;
    crate::state::Adapters {
        recognizer: Arc::new(LoopbackRecognizer),
        generator: Arc::new(LoopbackGenerator),
        synthesizer: Arc::new(LoopbackSynthesizer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_silence_finalizes_empty() {
        let recognizer = LoopbackRecognizer;
        let mut stream = recognizer.open("de-DE").await.unwrap();
        for seq in 0..20 {
            let frame = AudioFrame::new(vec![0.0; 320], SampleRate::Hz16000, Channels::Mono, seq);
            stream.push_audio(frame).await.unwrap();
        }
        let transcript = stream.finalize().await.unwrap();
        assert!(transcript.is_empty());
    }

    #[tokio::test]
    async fn test_speech_finalizes_nonempty() {
        let recognizer = LoopbackRecognizer;
        let mut stream = recognizer.open("de-DE").await.unwrap();
        for seq in 0..20 {
            let frame = AudioFrame::new(vec![0.5; 320], SampleRate::Hz16000, Channels::Mono, seq);
            stream.push_audio(frame).await.unwrap();
        }
        let transcript = stream.finalize().await.unwrap();
        assert!(!transcript.is_empty());
    }

    #[tokio::test]
    async fn test_synthesizer_length_tracks_text() {
        let synthesizer = LoopbackSynthesizer;
        let short: Vec<_> = synthesizer
            .synthesize("Hallo", &VoiceId::default())
            .await
            .unwrap()
            .collect()
            .await;
        let long: Vec<_> = synthesizer
            .synthesize("Hallo du liebe kleine Welt", &VoiceId::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert!(long.len() > short.len());
    }
}
