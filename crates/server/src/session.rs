//! Session lifecycle and registry
//!
//! A session owns one client connection: its state machine, its immutable
//! configuration snapshot, and at most one non-terminal turn at any
//! instant. The manager is the only component that creates or destroys
//! sessions.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use checky_core::ConfigProfile;
use checky_pipeline::CancelToken;

use crate::ServerError;

/// Session state machine
///
/// `Connecting → Idle → Listening → Processing → Speaking → Idle` in a
/// loop; `Closed` is terminal. Barge-in jumps `Speaking → Listening`;
/// cancellation returns any mid-turn state to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Idle,
    Listening,
    Processing,
    Speaking,
    Closed,
}

impl SessionState {
    /// Is `next` a legal transition from this state?
    fn allows(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Connecting, Idle) => true,
            (Idle, Listening) => true,
            (Listening, Processing) => true,
            (Processing, Speaking) => true,
            (Speaking, Idle) => true,
            // Barge-in
            (Speaking, Listening) => true,
            // Cancellation and fallback resolution
            (Listening, Idle) | (Processing, Idle) => true,
            // Disconnect from anywhere
            (_, Closed) => !matches!(self, Closed),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Idle => "idle",
            SessionState::Listening => "listening",
            SessionState::Processing => "processing",
            SessionState::Speaking => "speaking",
            SessionState::Closed => "closed",
        }
    }
}

/// Record of the session's single active turn
struct ActiveTurn {
    seq: u64,
    cancel: CancelToken,
}

/// One client connection
pub struct Session {
    pub id: String,
    /// Rate-limit identity this session belongs to
    pub identity: String,
    /// Immutable snapshot read from the config store at connect time.
    /// Store updates never affect a running session.
    pub profile: ConfigProfile,
    state: RwLock<SessionState>,
    turn_seq: AtomicU64,
    active_turn: Mutex<Option<ActiveTurn>>,
    created_at: Instant,
    last_activity: RwLock<Instant>,
}

impl Session {
    fn new(id: impl Into<String>, identity: impl Into<String>, profile: ConfigProfile) -> Self {
        Self {
            id: id.into(),
            identity: identity.into(),
            profile,
            state: RwLock::new(SessionState::Connecting),
            turn_seq: AtomicU64::new(0),
            active_turn: Mutex::new(None),
            created_at: Instant::now(),
            last_activity: RwLock::new(Instant::now()),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Apply a state transition, rejecting illegal ones without changing
    /// state.
    pub fn transition(&self, next: SessionState) -> Result<SessionState, ServerError> {
        let mut state = self.state.write();
        if !state.allows(next) {
            return Err(ServerError::Protocol(format!(
                "invalid transition {} -> {}",
                state.as_str(),
                next.as_str()
            )));
        }
        tracing::debug!(
            session_id = %self.id,
            from = state.as_str(),
            to = next.as_str(),
            "session transition"
        );
        *state = next;
        Ok(next)
    }

    /// Register a new active turn
    ///
    /// Fails while another turn is still registered; barge-in must cancel
    /// and clear the old turn first.
    pub fn begin_turn(&self, cancel: CancelToken) -> Result<u64, ServerError> {
        let mut active = self.active_turn.lock();
        if active.is_some() {
            return Err(ServerError::Protocol(
                "turn already in progress".to_string(),
            ));
        }
        let seq = self.turn_seq.fetch_add(1, Ordering::Relaxed) + 1;
        *active = Some(ActiveTurn { seq, cancel });
        Ok(seq)
    }

    /// Clear the active turn record if `seq` still owns it
    pub fn finish_turn(&self, seq: u64) {
        let mut active = self.active_turn.lock();
        if active.as_ref().map(|t| t.seq) == Some(seq) {
            *active = None;
        }
    }

    /// Cancel the active turn, if any, without clearing its record
    pub fn cancel_active_turn(&self) {
        if let Some(turn) = self.active_turn.lock().as_ref() {
            turn.cancel.cancel();
        }
    }

    pub fn has_active_turn(&self) -> bool {
        self.active_turn.lock().is_some()
    }

    pub fn turn_count(&self) -> u64 {
        self.turn_seq.load(Ordering::Relaxed)
    }

    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.last_activity.read().elapsed() > timeout
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Close the session: cancel any active turn and release it
    pub fn close(&self) {
        self.cancel_active_turn();
        *self.active_turn.lock() = None;
        *self.state.write() = SessionState::Closed;
    }
}

/// Process-wide session registry
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    max_sessions: usize,
    idle_timeout: Duration,
    cleanup_interval: Duration,
}

impl SessionManager {
    pub fn new(max_sessions: usize, idle_timeout: Duration, cleanup_interval: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
            idle_timeout,
            cleanup_interval,
        }
    }

    /// Create a session in `Connecting` state
    pub fn create(
        &self,
        identity: impl Into<String>,
        profile: ConfigProfile,
    ) -> Result<Arc<Session>, ServerError> {
        let mut sessions = self.sessions.write();

        if sessions.len() >= self.max_sessions {
            self.cleanup_expired_locked(&mut sessions);
            if sessions.len() >= self.max_sessions {
                return Err(ServerError::Capacity);
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(&id, identity, profile));
        sessions.insert(id.clone(), session.clone());

        tracing::info!(session_id = %id, child_age = session.profile.child_age, "created session");
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Remove and close a session
    pub fn remove(&self, id: &str) {
        if let Some(session) = self.sessions.write().remove(id) {
            session.close();
            tracing::info!(session_id = %id, "removed session");
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Remove sessions idle past the timeout
    pub fn cleanup_expired(&self) {
        let mut sessions = self.sessions.write();
        self.cleanup_expired_locked(&mut sessions);
    }

    fn cleanup_expired_locked(&self, sessions: &mut HashMap<String, Arc<Session>>) {
        let timeout = self.idle_timeout;
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.is_expired(timeout))
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            if let Some(session) = sessions.remove(&id) {
                session.close();
                tracing::info!(session_id = %id, "expired idle session");
            }
        }
    }

    /// Start the periodic idle-session cleanup task
    ///
    /// Returns the shutdown sender; flipping it to `true` stops the task.
    pub fn start_cleanup_task(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);
        let interval = manager.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let before = manager.count();
                        manager.cleanup_expired();
                        let after = manager.count();
                        if before != after {
                            tracing::info!(
                                removed = before - after,
                                remaining = after,
                                "session cleanup pass"
                            );
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("session cleanup task shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checky_core::VoiceId;

    fn profile() -> ConfigProfile {
        ConfigProfile::new(6, VoiceId::default(), "hash").unwrap()
    }

    fn manager(max: usize) -> SessionManager {
        SessionManager::new(max, Duration::from_secs(300), Duration::from_secs(60))
    }

    #[test]
    fn test_lifecycle_transitions() {
        let manager = manager(10);
        let session = manager.create("child-1", profile()).unwrap();

        assert_eq!(session.state(), SessionState::Connecting);
        session.transition(SessionState::Idle).unwrap();
        session.transition(SessionState::Listening).unwrap();
        session.transition(SessionState::Processing).unwrap();
        session.transition(SessionState::Speaking).unwrap();
        session.transition(SessionState::Idle).unwrap();
    }

    #[test]
    fn test_invalid_transition_rejected_without_state_change() {
        let manager = manager(10);
        let session = manager.create("child-1", profile()).unwrap();
        session.transition(SessionState::Idle).unwrap();

        // Audio processing cannot start from idle
        assert!(session.transition(SessionState::Processing).is_err());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_barge_in_transition() {
        let manager = manager(10);
        let session = manager.create("child-1", profile()).unwrap();
        session.transition(SessionState::Idle).unwrap();
        session.transition(SessionState::Listening).unwrap();
        session.transition(SessionState::Processing).unwrap();
        session.transition(SessionState::Speaking).unwrap();

        session.transition(SessionState::Listening).unwrap();
        assert_eq!(session.state(), SessionState::Listening);
    }

    #[test]
    fn test_closed_is_terminal() {
        let manager = manager(10);
        let session = manager.create("child-1", profile()).unwrap();
        session.transition(SessionState::Closed).unwrap();
        assert!(session.transition(SessionState::Idle).is_err());
        assert!(session.transition(SessionState::Closed).is_err());
    }

    #[test]
    fn test_single_active_turn() {
        let manager = manager(10);
        let session = manager.create("child-1", profile()).unwrap();

        let seq = session.begin_turn(CancelToken::new()).unwrap();
        assert_eq!(seq, 1);
        assert!(session.begin_turn(CancelToken::new()).is_err());

        session.finish_turn(seq);
        let next = session.begin_turn(CancelToken::new()).unwrap();
        assert_eq!(next, 2);
    }

    #[test]
    fn test_close_cancels_active_turn() {
        let manager = manager(10);
        let session = manager.create("child-1", profile()).unwrap();
        let cancel = CancelToken::new();
        session.begin_turn(cancel.clone()).unwrap();

        session.close();
        assert!(cancel.is_cancelled());
        assert!(!session.has_active_turn());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_capacity_limit() {
        let manager = manager(2);
        manager.create("a", profile()).unwrap();
        manager.create("b", profile()).unwrap();
        assert!(matches!(
            manager.create("c", profile()),
            Err(ServerError::Capacity)
        ));
    }

    #[test]
    fn test_idle_cleanup() {
        let manager = SessionManager::new(10, Duration::from_millis(10), Duration::from_secs(60));
        let session = manager.create("a", profile()).unwrap();
        let id = session.id.clone();

        std::thread::sleep(Duration::from_millis(20));
        manager.cleanup_expired();
        assert!(manager.get(&id).is_none());
        assert_eq!(session.state(), SessionState::Closed);
    }
}
