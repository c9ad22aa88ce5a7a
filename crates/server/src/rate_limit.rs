//! Rate gatekeeper
//!
//! Admission control for turn initiation, shared across all sessions of an
//! identity. Sliding window per identity; the whole table sits behind one
//! mutex so concurrent admissions for the same identity are linearized and
//! can never both under-count.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::settings::RateLimitConfig;

/// Signaled admission denial
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("rate limit exceeded, retry in {}ms", retry_after.as_millis())]
pub struct RateLimitError {
    /// Time until the oldest counted admission leaves the window
    pub retry_after: Duration,
}

/// Per-identity sliding-window admission control
pub struct RateGatekeeper {
    max_count: u32,
    window: Duration,
    admissions: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateGatekeeper {
    pub fn new(max_count: u32, window: Duration) -> Self {
        Self {
            max_count,
            window,
            admissions: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_turns, Duration::from_secs(config.window_secs))
    }

    /// Admit one action for `identity`, or deny with a retry hint
    ///
    /// Denial does not consume a slot.
    pub fn admit(&self, identity: &str) -> Result<(), RateLimitError> {
        let now = Instant::now();
        let mut admissions = self.admissions.lock();
        let window = admissions.entry(identity.to_string()).or_default();

        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() as u32 >= self.max_count {
            let retry_after = window
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.window);
            return Err(RateLimitError { retry_after });
        }

        window.push_back(now);
        Ok(())
    }

    /// Drop identities whose whole window has expired
    ///
    /// Called periodically to keep the table bounded.
    pub fn prune(&self) {
        let now = Instant::now();
        let mut admissions = self.admissions.lock();
        admissions.retain(|_, window| {
            window
                .back()
                .map(|last| now.duration_since(*last) < self.window)
                .unwrap_or(false)
        });
    }

    /// Number of identities currently tracked
    pub fn tracked_identities(&self) -> usize {
        self.admissions.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_admits_up_to_limit_then_denies() {
        let gatekeeper = RateGatekeeper::new(10, Duration::from_secs(60));

        for _ in 0..10 {
            assert!(gatekeeper.admit("child-1").is_ok());
        }
        let denied = gatekeeper.admit("child-1");
        assert!(denied.is_err());
        assert!(denied.unwrap_err().retry_after <= Duration::from_secs(60));
    }

    #[test]
    fn test_identities_are_independent() {
        let gatekeeper = RateGatekeeper::new(2, Duration::from_secs(60));

        assert!(gatekeeper.admit("a").is_ok());
        assert!(gatekeeper.admit("a").is_ok());
        assert!(gatekeeper.admit("a").is_err());
        assert!(gatekeeper.admit("b").is_ok());
    }

    #[test]
    fn test_window_slides() {
        let gatekeeper = RateGatekeeper::new(2, Duration::from_millis(50));

        assert!(gatekeeper.admit("a").is_ok());
        assert!(gatekeeper.admit("a").is_ok());
        assert!(gatekeeper.admit("a").is_err());

        std::thread::sleep(Duration::from_millis(60));
        assert!(gatekeeper.admit("a").is_ok());
    }

    #[test]
    fn test_concurrent_admissions_count_exactly() {
        let gatekeeper = Arc::new(RateGatekeeper::new(10, Duration::from_secs(60)));

        let handles: Vec<_> = (0..40)
            .map(|_| {
                let gatekeeper = gatekeeper.clone();
                std::thread::spawn(move || gatekeeper.admit("shared").is_ok())
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap_or(false))
            .filter(|&admitted| admitted)
            .count();
        assert_eq!(admitted, 10);
    }

    #[test]
    fn test_prune_drops_expired_identities() {
        let gatekeeper = RateGatekeeper::new(5, Duration::from_millis(20));
        gatekeeper.admit("a").unwrap();
        assert_eq!(gatekeeper.tracked_identities(), 1);

        std::thread::sleep(Duration::from_millis(30));
        gatekeeper.prune();
        assert_eq!(gatekeeper.tracked_identities(), 0);
    }
}
