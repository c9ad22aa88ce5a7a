//! Application state
//!
//! Shared state across all handlers.

use std::sync::Arc;
use std::time::Duration;

use checky_core::{ProfileStore, ReplyGenerator, SpeechRecognizer, SpeechSynthesizer};

use crate::profile_store::MemoryProfileStore;
use crate::rate_limit::RateGatekeeper;
use crate::session::SessionManager;
use crate::settings::Settings;

/// The three external speech services behind their trait seams
#[derive(Clone)]
pub struct Adapters {
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub generator: Arc<dyn ReplyGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
}

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub sessions: Arc<SessionManager>,
    pub gatekeeper: Arc<RateGatekeeper>,
    pub profiles: Arc<dyn ProfileStore>,
    pub adapters: Adapters,
}

impl AppState {
    pub fn new(settings: Settings, adapters: Adapters) -> Self {
        let sessions = Arc::new(SessionManager::new(
            settings.session.max_sessions,
            Duration::from_secs(settings.session.idle_timeout_secs),
            Duration::from_secs(settings.session.cleanup_interval_secs),
        ));
        let gatekeeper = Arc::new(RateGatekeeper::from_config(&settings.rate_limit));

        Self {
            settings: Arc::new(settings),
            sessions,
            gatekeeper,
            profiles: Arc::new(MemoryProfileStore::new()),
            adapters,
        }
    }

    pub fn with_profile_store(mut self, profiles: Arc<dyn ProfileStore>) -> Self {
        self.profiles = profiles;
        self
    }
}
