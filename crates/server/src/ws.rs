//! WebSocket transport
//!
//! One duplex channel per session: binary frames carry PCM16 audio in both
//! directions, JSON text frames carry control messages. The outbound side
//! is a bounded channel drained by a single writer task, which keeps
//! output audio strictly ordered and gives the turn controller natural
//! backpressure when the client cannot keep up. Audio still queued for a
//! superseded turn is dropped by the writer, never flushed.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use checky_core::{AudioFrame, Channels, SampleRate};
use checky_pipeline::{fallback, CancelToken, TurnController, TurnEvent, TurnInput, TurnStatus};

use crate::session::{Session, SessionState};
use crate::state::AppState;
use crate::ServerError;

/// Outbound frames buffered before the turn controller is paused
const OUTBOUND_BUFFER: usize = 32;
/// Input audio frames buffered between transport and recognition
const INPUT_BUFFER: usize = 64;
/// Turn events buffered between controller and transport
const EVENT_BUFFER: usize = 16;

const GREETING: &str = "Hallo! Ich bin Checky. Halte den Knopf gedrückt und sprich mit mir!";

/// Control frames exchanged as JSON text messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Client: button pressed, start a turn (barge-in while speaking)
    BeginTurn,
    /// Client: button released, finish listening
    EndTurn,
    /// Server: session state change, optionally with a detail string
    Status {
        state: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// Server: configuration snapshot acknowledged after the handshake
    ConfigAck { child_age: u8, voice: String },
    /// Server: transcript feedback (partials are advisory)
    Transcript { text: String, is_final: bool },
    /// Server: reply text about to be spoken
    Reply { text: String, degraded: bool },
    /// Server: turn admission denied
    RateLimited { retry_after_ms: u64, message: String },
    /// Server: protocol violation, state unchanged
    Error { message: String },
}

/// One queued outbound frame
///
/// Audio is tagged with its turn sequence so the writer can drop frames
/// belonging to a superseded turn: barge-in must discard unsent audio, not
/// flush it to a slow client after the new turn has begun.
enum Outbound {
    Control(Message),
    Audio { turn: u64, message: Message },
}

/// Resolve a queued frame against the live turn sequence
///
/// Control frames always go out; audio from turns older than `live_turn`
/// is discarded.
fn outbound_message(frame: Outbound, live_turn: u64) -> Option<Message> {
    match frame {
        Outbound::Control(message) => Some(message),
        Outbound::Audio { turn, message } if turn >= live_turn => Some(message),
        Outbound::Audio { .. } => None,
    }
}

/// One running turn as seen by the transport
struct RunningTurn {
    cancel: CancelToken,
    input: mpsc::Sender<TurnInput>,
    /// Resolves only after the last event of the turn has been forwarded
    task: JoinHandle<()>,
}

/// WebSocket handler
pub struct WsHandler;

impl WsHandler {
    /// Handle the WebSocket upgrade for an existing session
    pub async fn handle(
        ws: WebSocketUpgrade,
        State(state): State<AppState>,
        Path(session_id): Path<String>,
    ) -> Result<Response, axum::http::StatusCode> {
        let session = state
            .sessions
            .get(&session_id)
            .ok_or(axum::http::StatusCode::NOT_FOUND)?;

        // One transport per session
        if session.state() != SessionState::Connecting {
            return Err(axum::http::StatusCode::CONFLICT);
        }

        Ok(ws.on_upgrade(move |socket| handle_socket(socket, session, state)))
    }
}

async fn handle_socket(socket: WebSocket, session: Arc<Session>, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Single writer task; everything outbound goes through this bounded
    // channel in order. The live turn sequence advances on every begin_turn,
    // which invalidates queued audio of the superseded turn.
    let live_turn = Arc::new(AtomicU64::new(0));
    let writer_live_turn = live_turn.clone();
    let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER);
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let Some(message) = outbound_message(frame, writer_live_turn.load(Ordering::Acquire))
            else {
                continue;
            };
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    // Handshake complete
    if session.transition(SessionState::Idle).is_err() {
        tracing::warn!(session_id = %session.id, "session not in connecting state");
        return;
    }

    send_frame(
        &out_tx,
        &WsMessage::ConfigAck {
            child_age: session.profile.child_age,
            voice: session.profile.voice.as_str().to_string(),
        },
    )
    .await;
    send_status(&out_tx, SessionState::Idle, Some(GREETING.to_string())).await;

    let mut running: Option<RunningTurn> = None;
    let mut audio_seq: u64 = 0;
    let mut ignored_notified = false;

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => {
                session.touch();
                let frame = match serde_json::from_str::<WsMessage>(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::debug!(session_id = %session.id, error = %e, "bad control frame");
                        send_error(&out_tx, "unrecognized control frame").await;
                        continue;
                    }
                };

                match frame {
                    WsMessage::BeginTurn => {
                        let from = session.state();
                        if !matches!(from, SessionState::Idle | SessionState::Speaking) {
                            send_error(
                                &out_tx,
                                &format!("begin_turn not allowed while {}", from.as_str()),
                            )
                            .await;
                            continue;
                        }

                        // Admission before any turn state is created.
                        if let Err(denied) = state.gatekeeper.admit(&session.identity) {
                            tracing::info!(
                                session_id = %session.id,
                                identity = %session.identity,
                                retry_after_ms = denied.retry_after.as_millis() as u64,
                                "turn denied by rate limit"
                            );
                            send_frame(
                                &out_tx,
                                &WsMessage::RateLimited {
                                    retry_after_ms: denied.retry_after.as_millis() as u64,
                                    message: fallback::please_wait().to_string(),
                                },
                            )
                            .await;
                            continue;
                        }

                        // Barge-in: cancel the old turn and wait for its last
                        // event to be forwarded, so no old audio can follow
                        // the new turn's frames.
                        if from == SessionState::Speaking {
                            if let Some(turn) = running.take() {
                                turn.cancel.cancel();
                                let _ = turn.task.await;
                            }
                        }

                        if let Err(e) = session.transition(SessionState::Listening) {
                            send_error(&out_tx, &e.to_string()).await;
                            continue;
                        }
                        send_status(&out_tx, SessionState::Listening, None).await;

                        match start_turn(&state, &session, &live_turn, &out_tx) {
                            Ok(turn) => {
                                running = Some(turn);
                                audio_seq = 0;
                                ignored_notified = false;
                            }
                            Err(e) => {
                                tracing::warn!(session_id = %session.id, error = %e, "failed to start turn");
                                let _ = session.transition(SessionState::Idle);
                                send_error(&out_tx, &e.to_string()).await;
                            }
                        }
                    }
                    WsMessage::EndTurn => match &running {
                        Some(turn) => {
                            let _ = turn.input.send(TurnInput::End).await;
                        }
                        None => {
                            send_error(&out_tx, "end_turn without an active turn").await;
                        }
                    },
                    _ => {
                        send_error(&out_tx, "unexpected control frame from client").await;
                    }
                }
            }
            Ok(Message::Binary(data)) => {
                session.touch();
                match session.state() {
                    SessionState::Listening => {
                        if let Some(turn) = &running {
                            let frame = AudioFrame::from_pcm16(
                                &data,
                                SampleRate::Hz16000,
                                Channels::Mono,
                                audio_seq,
                            );
                            audio_seq += 1;
                            if turn.input.send(TurnInput::Frame(frame)).await.is_err() {
                                tracing::debug!(session_id = %session.id, "turn input closed");
                            }
                        }
                    }
                    SessionState::Processing | SessionState::Speaking => {
                        // Turn already past listening; discard, acknowledge
                        // once per turn.
                        if !ignored_notified {
                            ignored_notified = true;
                            send_status(
                                &out_tx,
                                session.state(),
                                Some("audio_ignored".to_string()),
                            )
                            .await;
                        }
                    }
                    other => {
                        send_error(
                            &out_tx,
                            &format!("audio not accepted while {}", other.as_str()),
                        )
                        .await;
                    }
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = out_tx.send(Outbound::Control(Message::Pong(data))).await;
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!(session_id = %session.id, error = %e, "websocket error");
                break;
            }
            _ => {}
        }
    }

    // Disconnect: cancel any active turn and release the session.
    if let Some(turn) = running.take() {
        turn.cancel.cancel();
        let _ = turn.task.await;
    }
    state.sessions.remove(&session.id);
    drop(out_tx);
    let _ = writer.await;

    tracing::info!(
        session_id = %session.id,
        turns = session.turn_count(),
        age_secs = session.age().as_secs(),
        "websocket closed"
    );
}

/// Spawn the controller and event forwarder for one turn
fn start_turn(
    state: &AppState,
    session: &Arc<Session>,
    live_turn: &Arc<AtomicU64>,
    out_tx: &mpsc::Sender<Outbound>,
) -> Result<RunningTurn, ServerError> {
    let cancel = CancelToken::new();
    let seq = session.begin_turn(cancel.clone())?;
    // From here on, queued audio of any earlier turn is stale.
    live_turn.store(seq, Ordering::Release);

    let controller = TurnController::new(
        state.adapters.recognizer.clone(),
        state.adapters.generator.clone(),
        state.adapters.synthesizer.clone(),
        session.profile.clone(),
        state.settings.turn.timeouts(),
        cancel.clone(),
    );

    let (input_tx, input_rx) = mpsc::channel(INPUT_BUFFER);
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

    let session = session.clone();
    let out_tx = out_tx.clone();
    let task = tokio::spawn(async move {
        let runner = tokio::spawn(async move { controller.run(input_rx, event_tx).await });

        forward_turn_events(&session, seq, &out_tx, event_rx).await;

        match runner.await {
            Ok(Ok(status)) => {
                tracing::info!(session_id = %session.id, turn = seq, ?status, "turn resolved");
            }
            Ok(Err(e)) => {
                tracing::warn!(session_id = %session.id, turn = seq, error = %e, "turn aborted");
            }
            Err(e) => {
                tracing::warn!(session_id = %session.id, turn = seq, error = %e, "turn task failed");
            }
        }
        session.finish_turn(seq);
    });

    Ok(RunningTurn {
        cancel,
        input: input_tx,
        task,
    })
}

/// Map turn events to wire frames, driving the session state machine as
/// the turn advances.
async fn forward_turn_events(
    session: &Arc<Session>,
    seq: u64,
    out_tx: &mpsc::Sender<Outbound>,
    mut events: mpsc::Receiver<TurnEvent>,
) {
    let mut speaking = false;

    while let Some(event) = events.recv().await {
        match event {
            TurnEvent::PartialTranscript(transcript) => {
                send_frame(
                    out_tx,
                    &WsMessage::Transcript {
                        text: transcript.text,
                        is_final: false,
                    },
                )
                .await;
            }
            TurnEvent::FinalTranscript(transcript) => {
                if session.transition(SessionState::Processing).is_ok() {
                    send_status(out_tx, SessionState::Processing, None).await;
                }
                send_frame(
                    out_tx,
                    &WsMessage::Transcript {
                        text: transcript.text,
                        is_final: true,
                    },
                )
                .await;
            }
            TurnEvent::Reply { text, degraded } => {
                // Degraded paths can skip the final transcript event.
                if session.state() == SessionState::Listening
                    && session.transition(SessionState::Processing).is_ok()
                {
                    send_status(out_tx, SessionState::Processing, None).await;
                }
                send_frame(out_tx, &WsMessage::Reply { text, degraded }).await;
            }
            TurnEvent::Audio(frame) => {
                if !speaking {
                    speaking = true;
                    if session.transition(SessionState::Speaking).is_ok() {
                        send_status(out_tx, SessionState::Speaking, None).await;
                    }
                }
                if out_tx
                    .send(Outbound::Audio {
                        turn: seq,
                        message: Message::Binary(frame.to_pcm16()),
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            TurnEvent::Finished(status) => {
                let detail = match status {
                    TurnStatus::Completed => "completed",
                    TurnStatus::Cancelled => "cancelled",
                    TurnStatus::TimedOut => "timed_out",
                    TurnStatus::UpstreamFailed => "upstream_failed",
                };
                tracing::debug!(session_id = %session.id, turn = seq, detail, "turn finished");
                // Release the turn record before the client can see the
                // idle status, so an immediate begin_turn is not rejected.
                session.finish_turn(seq);
                if session.state() != SessionState::Closed {
                    let _ = session.transition(SessionState::Idle);
                    send_status(out_tx, SessionState::Idle, Some(detail.to_string())).await;
                }
            }
        }
    }
}

async fn send_frame(out_tx: &mpsc::Sender<Outbound>, message: &WsMessage) {
    if let Ok(json) = serde_json::to_string(message) {
        let _ = out_tx.send(Outbound::Control(Message::Text(json))).await;
    }
}

async fn send_status(out_tx: &mpsc::Sender<Outbound>, state: SessionState, detail: Option<String>) {
    send_frame(
        out_tx,
        &WsMessage::Status {
            state: state.as_str().to_string(),
            detail,
        },
    )
    .await;
}

async fn send_error(out_tx: &mpsc::Sender<Outbound>, message: &str) {
    send_frame(
        out_tx,
        &WsMessage::Error {
            message: message.to_string(),
        },
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionManager;
    use checky_core::{ConfigProfile, VoiceId};
    use std::time::Duration;

    fn listening_session() -> Arc<Session> {
        let manager = SessionManager::new(4, Duration::from_secs(300), Duration::from_secs(60));
        let profile = ConfigProfile::new(7, VoiceId::default(), "hash").unwrap();
        let session = manager.create("child-1", profile).unwrap();
        session.transition(SessionState::Idle).unwrap();
        session.transition(SessionState::Listening).unwrap();
        session
    }

    #[test]
    fn test_superseded_turn_audio_is_dropped() {
        let audio = |turn| Outbound::Audio {
            turn,
            message: Message::Binary(vec![0, 0]),
        };

        // Queued audio from turn 1 after a barge-in advanced the live turn.
        assert!(outbound_message(audio(1), 2).is_none());
        assert!(outbound_message(audio(2), 2).is_some());
        // Control frames are never dropped.
        assert!(outbound_message(Outbound::Control(Message::Text("{}".into())), 2).is_some());
    }

    #[tokio::test]
    async fn test_turn_record_released_when_finished_is_forwarded() {
        let session = listening_session();
        let seq = session.begin_turn(CancelToken::new()).unwrap();

        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = mpsc::channel(8);
        event_tx
            .send(TurnEvent::Finished(TurnStatus::Completed))
            .await
            .unwrap();
        drop(event_tx);

        forward_turn_events(&session, seq, &out_tx, event_rx).await;

        // By the time the idle status is on the wire, a new begin_turn must
        // be admissible.
        assert!(!session.has_active_turn());
        assert!(session.begin_turn(CancelToken::new()).is_ok());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(out_rx.recv().await.is_some());
    }

    #[test]
    fn test_control_frame_wire_format() {
        let json = serde_json::to_string(&WsMessage::BeginTurn).unwrap();
        assert_eq!(json, r#"{"type":"begin_turn"}"#);

        let parsed: WsMessage = serde_json::from_str(r#"{"type":"end_turn"}"#).unwrap();
        assert!(matches!(parsed, WsMessage::EndTurn));
    }

    #[test]
    fn test_status_detail_omitted_when_none() {
        let json = serde_json::to_string(&WsMessage::Status {
            state: "idle".to_string(),
            detail: None,
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"status","state":"idle"}"#);
    }
}
