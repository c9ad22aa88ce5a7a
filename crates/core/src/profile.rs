//! Per-session configuration profile
//!
//! The profile is read once from the external configuration store when a
//! client connects and is then immutable for the lifetime of the session.
//! Concurrent updates to the store deliberately do not affect running
//! sessions (snapshot-at-connect-time semantics).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Minimum supported child age
pub const MIN_AGE: u8 = 5;
/// Maximum supported child age
pub const MAX_AGE: u8 = 10;

/// Voices the synthesis service supports for this product
pub const SUPPORTED_VOICES: &[&str] = &["de-DE-Standard-C", "de-DE-Standard-D"];

/// Age band used to tune reply complexity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgeBand {
    /// Ages 5-6: very simple language, short sentences
    Young,
    /// Ages 7-8: simple explanations with examples
    Middle,
    /// Ages 9-10: age-appropriate language encouraging independent thinking
    Older,
}

impl AgeBand {
    /// Classify a validated age into its band
    pub fn from_age(age: u8) -> Self {
        match age {
            0..=6 => AgeBand::Young,
            7..=8 => AgeBand::Middle,
            _ => AgeBand::Older,
        }
    }
}

/// Opaque voice identifier for the synthesis service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceId(String);

impl VoiceId {
    /// Validate against the supported voice list
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if SUPPORTED_VOICES.contains(&id.as_str()) {
            Ok(Self(id))
        } else {
            Err(Error::InvalidProfile(format!("unsupported voice: {id}")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VoiceId {
    fn default() -> Self {
        Self("de-DE-Standard-C".to_string())
    }
}

/// Immutable per-session configuration snapshot
///
/// Only the PIN hash is ever carried; the plaintext PIN never exists beyond
/// the parent-facing request that produced the hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigProfile {
    /// Child age, bounded 5-10
    pub child_age: u8,
    /// Selected synthesis voice
    pub voice: VoiceId,
    /// Hashed parent PIN (bcrypt)
    pub pin_hash: String,
}

impl ConfigProfile {
    /// Create a profile, validating the age bound
    pub fn new(child_age: u8, voice: VoiceId, pin_hash: impl Into<String>) -> Result<Self> {
        if !(MIN_AGE..=MAX_AGE).contains(&child_age) {
            return Err(Error::InvalidProfile(format!(
                "age {child_age} outside supported range {MIN_AGE}-{MAX_AGE}"
            )));
        }
        Ok(Self {
            child_age,
            voice,
            pin_hash: pin_hash.into(),
        })
    }

    /// Age band for reply generation
    pub fn age_band(&self) -> AgeBand {
        AgeBand::from_age(self.child_age)
    }
}

/// External configuration store, read once per connection
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Read the profile for a session identity
    async fn read_profile(&self, identity: &str) -> Result<ConfigProfile>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_bounds() {
        assert!(ConfigProfile::new(4, VoiceId::default(), "h").is_err());
        assert!(ConfigProfile::new(11, VoiceId::default(), "h").is_err());
        assert!(ConfigProfile::new(5, VoiceId::default(), "h").is_ok());
        assert!(ConfigProfile::new(10, VoiceId::default(), "h").is_ok());
    }

    #[test]
    fn test_age_bands() {
        assert_eq!(AgeBand::from_age(5), AgeBand::Young);
        assert_eq!(AgeBand::from_age(6), AgeBand::Young);
        assert_eq!(AgeBand::from_age(7), AgeBand::Middle);
        assert_eq!(AgeBand::from_age(8), AgeBand::Middle);
        assert_eq!(AgeBand::from_age(9), AgeBand::Older);
        assert_eq!(AgeBand::from_age(10), AgeBand::Older);
    }

    #[test]
    fn test_voice_whitelist() {
        assert!(VoiceId::new("de-DE-Standard-C").is_ok());
        assert!(VoiceId::new("de-DE-Standard-D").is_ok());
        assert!(VoiceId::new("en-US-Wavenet-A").is_err());
    }
}
