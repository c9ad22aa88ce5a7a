//! Turn controller
//!
//! Executes exactly one turn: stream audio to recognition, finalize, scrub,
//! generate a reply, synthesize it segment by segment. One overall deadline
//! bounds processing and speaking; each adapter call additionally has its
//! own stage timeout. The cancellation token is checked at every suspension
//! point, so a barge-in or disconnect stops the turn before the next
//! adapter call or output frame.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use checky_core::{
    scrub, AudioFrame, ConfigProfile, GenerateRequest, Persona, RecognitionStream,
    ReplyGenerator, SpeechRecognizer, SpeechSynthesizer, TranscriptResult,
};

use crate::cancel::CancelToken;
use crate::fallback;
use crate::segmenter::segment_sentences;
use crate::PipelineError;

/// Input to a running turn, produced by the transport layer
#[derive(Debug)]
pub enum TurnInput {
    /// One audio frame, in client-send order
    Frame(AudioFrame),
    /// The client signalled "end turn" (button release)
    End,
}

/// Events emitted while a turn runs
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// Partial transcript for UI feedback; never used for generation
    PartialTranscript(TranscriptResult),
    /// Final transcript (pre-scrub, for UI display only)
    FinalTranscript(TranscriptResult),
    /// Reply text about to be spoken; `degraded` marks canned fallbacks
    Reply { text: String, degraded: bool },
    /// One output audio frame, in synthesis order
    Audio(AudioFrame),
    /// Terminal status; always the last event of a turn
    Finished(TurnStatus),
}

/// Terminal status of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Completed,
    Cancelled,
    TimedOut,
    UpstreamFailed,
}

/// Timeout configuration for one turn
#[derive(Debug, Clone)]
pub struct TurnTimeouts {
    /// LISTENING ends after this long without an input frame
    pub listen_inactivity: Duration,
    /// Bound on recognition open/finalize
    pub recognition: Duration,
    /// Bound on one generation request
    pub generation: Duration,
    /// Bound on synthesis per segment and per chunk
    pub synthesis: Duration,
    /// Hard deadline for PROCESSING + SPEAKING combined
    pub overall: Duration,
    /// Base backoff before the single generation retry
    pub retry_backoff: Duration,
}

impl Default for TurnTimeouts {
    fn default() -> Self {
        Self {
            listen_inactivity: Duration::from_secs(3),
            recognition: Duration::from_secs(5),
            generation: Duration::from_secs(10),
            synthesis: Duration::from_secs(5),
            overall: Duration::from_secs(30),
            retry_backoff: Duration::from_millis(250),
        }
    }
}

/// Outcome of one deadline-bounded adapter call
enum Stage<T> {
    Done(T),
    Cancelled,
    StageTimeout,
    DeadlineExceeded,
}

/// Drives one conversational turn end to end
pub struct TurnController {
    recognizer: Arc<dyn SpeechRecognizer>,
    generator: Arc<dyn ReplyGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    profile: ConfigProfile,
    timeouts: TurnTimeouts,
    cancel: CancelToken,
    language_hint: String,
}

impl TurnController {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        generator: Arc<dyn ReplyGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        profile: ConfigProfile,
        timeouts: TurnTimeouts,
        cancel: CancelToken,
    ) -> Self {
        Self {
            recognizer,
            generator,
            synthesizer,
            profile,
            timeouts,
            cancel,
            language_hint: "de-DE".to_string(),
        }
    }

    /// Token that cancels this turn (barge-in, disconnect)
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run the turn to completion
    ///
    /// Consumes input frames until `End` (or inactivity), then produces
    /// reply audio on the event channel. The bounded event channel is the
    /// backpressure path: when the transport cannot drain audio, sends here
    /// block and no further synthesis chunks are pulled.
    pub async fn run(
        &self,
        input: mpsc::Receiver<TurnInput>,
        events: mpsc::Sender<TurnEvent>,
    ) -> Result<TurnStatus, PipelineError> {
        let status = match self.drive(input, &events).await {
            Ok(status) => status,
            Err(PipelineError::OutputClosed) => {
                // Client went away mid-turn; nothing left to notify.
                tracing::debug!("output closed mid-turn");
                return Err(PipelineError::OutputClosed);
            }
            Err(e) => return Err(e),
        };

        let _ = events.send(TurnEvent::Finished(status)).await;
        Ok(status)
    }

    async fn drive(
        &self,
        mut input: mpsc::Receiver<TurnInput>,
        events: &mpsc::Sender<TurnEvent>,
    ) -> Result<TurnStatus, PipelineError> {
        let band = self.profile.age_band();

        // Recognition stream, one retry on open.
        let mut stream = match self.open_recognizer().await {
            Stage::Done(Ok(stream)) => stream,
            Stage::Cancelled => return Ok(TurnStatus::Cancelled),
            Stage::Done(Err(e)) => {
                tracing::warn!(
                    model = self.recognizer.model_name(),
                    error = %e,
                    "recognition open failed twice"
                );
                return self
                    .speak_fallback(fallback::apology(band), TurnStatus::UpstreamFailed, events)
                    .await;
            }
            Stage::StageTimeout | Stage::DeadlineExceeded => {
                tracing::warn!("recognition open timed out");
                return self
                    .speak_fallback(fallback::apology(band), TurnStatus::UpstreamFailed, events)
                    .await;
            }
        };

        // LISTENING: forward frames in client-send order until end-turn,
        // disconnect, or inactivity.
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(TurnStatus::Cancelled),
                item = input.recv() => match item {
                    Some(TurnInput::Frame(frame)) => {
                        if let Err(e) = stream.push_audio(frame).await {
                            tracing::warn!(error = %e, "recognition rejected audio");
                            return self
                                .speak_fallback(
                                    fallback::apology(band),
                                    TurnStatus::UpstreamFailed,
                                    events,
                                )
                                .await;
                        }
                        if let Some(partial) = stream.take_partial() {
                            self.send(events, TurnEvent::PartialTranscript(partial)).await?;
                        }
                    }
                    Some(TurnInput::End) | None => break,
                },
                _ = time::sleep(self.timeouts.listen_inactivity) => {
                    tracing::debug!(
                        inactivity_ms = self.timeouts.listen_inactivity.as_millis() as u64,
                        "listening ended by inactivity"
                    );
                    break;
                }
            }
        }

        // PROCESSING starts; the overall deadline covers everything below.
        let deadline = Instant::now() + self.timeouts.overall;

        let transcript = match self
            .stage(deadline, self.timeouts.recognition, stream.finalize())
            .await
        {
            Stage::Done(Ok(transcript)) => transcript,
            Stage::Cancelled => return Ok(TurnStatus::Cancelled),
            Stage::Done(Err(e)) => {
                tracing::warn!(error = %e, "recognition finalize failed");
                return self
                    .speak_fallback(fallback::apology(band), TurnStatus::UpstreamFailed, events)
                    .await;
            }
            Stage::StageTimeout => {
                return self
                    .speak_fallback(fallback::apology(band), TurnStatus::UpstreamFailed, events)
                    .await;
            }
            Stage::DeadlineExceeded => {
                return self
                    .speak_fallback(fallback::apology(band), TurnStatus::TimedOut, events)
                    .await;
            }
        };

        self.send(events, TurnEvent::FinalTranscript(transcript.clone()))
            .await?;

        // Nothing heard: canned reply, no generation call.
        if transcript.is_empty() {
            return self
                .speak_fallback(fallback::didnt_hear(band), TurnStatus::Completed, events)
                .await;
        }

        // The scrubbed text is the only thing that ever reaches generation.
        let scrubbed = scrub(&transcript.text);
        if scrubbed.matches_removed > 0 {
            tracing::info!(
                matches_removed = scrubbed.matches_removed,
                "pii redacted from transcript"
            );
        } else {
            tracing::debug!("scrub pass removed nothing");
        }

        let request = GenerateRequest::new(scrubbed.text, Persona::for_age(self.profile.child_age));

        let reply = match self.generate_with_retry(request, deadline).await {
            Stage::Done(text) => text,
            Stage::Cancelled => return Ok(TurnStatus::Cancelled),
            Stage::StageTimeout => {
                return self
                    .speak_fallback(fallback::apology(band), TurnStatus::UpstreamFailed, events)
                    .await;
            }
            Stage::DeadlineExceeded => {
                return self
                    .speak_fallback(fallback::apology(band), TurnStatus::TimedOut, events)
                    .await;
            }
        };

        self.send(
            events,
            TurnEvent::Reply {
                text: reply.clone(),
                degraded: false,
            },
        )
        .await?;

        // SPEAKING: segment-by-segment synthesis, pipelined to the client.
        self.speak(&reply, Some(deadline), events).await
    }

    async fn open_recognizer(&self) -> Stage<checky_core::Result<Box<dyn RecognitionStream>>> {
        let open_deadline = Instant::now() + self.timeouts.recognition;
        match self
            .stage(open_deadline, self.timeouts.recognition, async {
                match self.recognizer.open(&self.language_hint).await {
                    Ok(stream) => Ok(stream),
                    Err(e) if e.is_transient() => {
                        tracing::debug!(error = %e, "recognition open failed, retrying once");
                        self.backoff().await;
                        self.recognizer.open(&self.language_hint).await
                    }
                    Err(e) => Err(e),
                }
            })
            .await
        {
            // Open has no separate overall deadline yet; fold the two
            // timeout cases together.
            Stage::DeadlineExceeded => Stage::StageTimeout,
            other => other,
        }
    }

    /// One generation call plus a single retry with backoff on transient
    /// failure or stage timeout.
    async fn generate_with_retry(
        &self,
        request: GenerateRequest,
        deadline: Instant,
    ) -> Stage<String> {
        for attempt in 0..2 {
            let call = self.generator.generate(request.clone());
            match self.stage(deadline, self.timeouts.generation, call).await {
                Stage::Done(Ok(text)) => return Stage::Done(text),
                Stage::Cancelled => return Stage::Cancelled,
                Stage::DeadlineExceeded => return Stage::DeadlineExceeded,
                Stage::Done(Err(e)) if attempt == 0 && e.is_transient() => {
                    tracing::warn!(
                        model = self.generator.model_name(),
                        error = %e,
                        "generation failed, retrying once"
                    );
                }
                Stage::StageTimeout if attempt == 0 => {
                    tracing::warn!(
                        model = self.generator.model_name(),
                        "generation timed out, retrying once"
                    );
                }
                Stage::Done(Err(e)) => {
                    tracing::warn!(
                        model = self.generator.model_name(),
                        error = %e,
                        "generation failed after retry"
                    );
                    return Stage::StageTimeout;
                }
                Stage::StageTimeout => return Stage::StageTimeout,
            }

            if self.backoff_until(deadline).await {
                return Stage::DeadlineExceeded;
            }
        }
        Stage::StageTimeout
    }

    /// Stream synthesized audio for every sentence segment of `text`.
    ///
    /// With `deadline` set this is the normal speaking path; fallback
    /// speech passes `None` and is bounded only by stage timeouts.
    async fn speak(
        &self,
        text: &str,
        deadline: Option<Instant>,
        events: &mpsc::Sender<TurnEvent>,
    ) -> Result<TurnStatus, PipelineError> {
        let cap = deadline.unwrap_or_else(|| Instant::now() + self.timeouts.overall);
        let mut frames_sent = 0u64;

        for segment in segment_sentences(text) {
            if self.cancel.is_cancelled() {
                return Ok(TurnStatus::Cancelled);
            }

            let mut audio = match self
                .stage(cap, self.timeouts.synthesis, async {
                    match self.synthesizer.synthesize(&segment, &self.profile.voice).await {
                        Ok(stream) => Ok(stream),
                        Err(e) if e.is_transient() => {
                            tracing::debug!(error = %e, "synthesis failed, retrying once");
                            self.backoff().await;
                            self.synthesizer.synthesize(&segment, &self.profile.voice).await
                        }
                        Err(e) => Err(e),
                    }
                })
                .await
            {
                Stage::Done(Ok(stream)) => stream,
                Stage::Cancelled => return Ok(TurnStatus::Cancelled),
                Stage::DeadlineExceeded => return Ok(TurnStatus::TimedOut),
                Stage::Done(Err(e)) => {
                    tracing::warn!(
                        model = self.synthesizer.model_name(),
                        error = %e,
                        segment = %segment,
                        "synthesis unavailable"
                    );
                    return Ok(TurnStatus::UpstreamFailed);
                }
                Stage::StageTimeout => {
                    tracing::warn!(segment = %segment, "synthesis timed out");
                    return Ok(TurnStatus::UpstreamFailed);
                }
            };

            loop {
                let chunk = match self
                    .stage(cap, self.timeouts.synthesis, audio.next())
                    .await
                {
                    Stage::Done(chunk) => chunk,
                    Stage::Cancelled => return Ok(TurnStatus::Cancelled),
                    Stage::DeadlineExceeded => return Ok(TurnStatus::TimedOut),
                    Stage::StageTimeout => {
                        tracing::warn!("synthesis chunk timed out");
                        return Ok(TurnStatus::UpstreamFailed);
                    }
                };

                match chunk {
                    Some(Ok(frame)) => {
                        // Bounded send: blocks when the transport is slow,
                        // which pauses pulling further synthesis chunks.
                        self.send(events, TurnEvent::Audio(frame)).await?;
                        frames_sent += 1;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "synthesis stream error");
                        return Ok(TurnStatus::UpstreamFailed);
                    }
                    None => break,
                }
            }
        }

        tracing::debug!(frames_sent, "turn audio complete");
        Ok(TurnStatus::Completed)
    }

    /// Speak a canned reply and resolve the turn with `status`.
    ///
    /// Best effort: a spoken generic reply beats silence, but if synthesis
    /// itself is down the status still resolves and the session returns to
    /// idle.
    async fn speak_fallback(
        &self,
        text: &str,
        status: TurnStatus,
        events: &mpsc::Sender<TurnEvent>,
    ) -> Result<TurnStatus, PipelineError> {
        self.send(
            events,
            TurnEvent::Reply {
                text: text.to_string(),
                degraded: true,
            },
        )
        .await?;

        match self.speak(text, None, events).await? {
            TurnStatus::Cancelled => Ok(TurnStatus::Cancelled),
            spoken => {
                if spoken != TurnStatus::Completed {
                    tracing::warn!(?spoken, "fallback reply could not be spoken");
                }
                Ok(status)
            }
        }
    }

    /// Run one adapter call bounded by its stage timeout, the overall turn
    /// deadline, and cancellation. An uncancellable in-flight call is
    /// simply dropped here; its eventual result is discarded.
    async fn stage<T>(
        &self,
        deadline: Instant,
        stage_timeout: Duration,
        fut: impl std::future::Future<Output = T>,
    ) -> Stage<T> {
        let cap = deadline.min(Instant::now() + stage_timeout);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Stage::Cancelled,
            result = time::timeout_at(cap, fut) => match result {
                Ok(value) => Stage::Done(value),
                Err(_) if Instant::now() >= deadline => Stage::DeadlineExceeded,
                Err(_) => Stage::StageTimeout,
            },
        }
    }

    async fn backoff(&self) {
        let jitter = rand::thread_rng().gen_range(0..100);
        time::sleep(self.timeouts.retry_backoff + Duration::from_millis(jitter)).await;
    }

    /// Backoff that respects cancellation and the turn deadline.
    /// Returns true when the deadline was reached instead.
    async fn backoff_until(&self, deadline: Instant) -> bool {
        let jitter = rand::thread_rng().gen_range(0..100);
        let wait = self.timeouts.retry_backoff + Duration::from_millis(jitter);
        let wake = Instant::now() + wait;
        if wake >= deadline {
            time::sleep_until(deadline).await;
            return true;
        }
        time::sleep_until(wake).await;
        false
    }

    async fn send(
        &self,
        events: &mpsc::Sender<TurnEvent>,
        event: TurnEvent,
    ) -> Result<(), PipelineError> {
        events
            .send(event)
            .await
            .map_err(|_| PipelineError::OutputClosed)
    }
}
