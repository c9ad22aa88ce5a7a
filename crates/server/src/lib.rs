//! Checky server
//!
//! Owns everything around a turn: session lifecycle and state machine,
//! the process-wide session registry, rate limiting, the duplex WebSocket
//! transport, and configuration.

pub mod dev;
pub mod http;
pub mod profile_store;
pub mod rate_limit;
pub mod session;
pub mod settings;
pub mod state;
pub mod ws;

pub use http::create_router;
pub use profile_store::MemoryProfileStore;
pub use rate_limit::{RateGatekeeper, RateLimitError};
pub use session::{Session, SessionManager, SessionState};
pub use settings::{load_settings, Settings};
pub use state::{Adapters, AppState};

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("session error: {0}")]
    Session(String),

    #[error("session capacity reached")]
    Capacity,

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("rate limit exceeded")]
    RateLimit(#[from] RateLimitError),

    #[error("profile error: {0}")]
    Profile(#[from] checky_core::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Session(_) => axum::http::StatusCode::NOT_FOUND,
            ServerError::Capacity => axum::http::StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Protocol(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::RateLimit(_) => axum::http::StatusCode::TOO_MANY_REQUESTS,
            ServerError::Profile(_) => axum::http::StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
