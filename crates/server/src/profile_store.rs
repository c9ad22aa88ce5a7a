//! In-memory profile store
//!
//! Stand-in for the external configuration store. Profiles are keyed by
//! rate-limit identity; unknown identities get the default profile so a
//! fresh device can connect without prior setup.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use checky_core::{ConfigProfile, ProfileStore, Result, VoiceId};

pub struct MemoryProfileStore {
    profiles: RwLock<HashMap<String, ConfigProfile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace the profile for an identity
    pub fn put(&self, identity: impl Into<String>, profile: ConfigProfile) {
        self.profiles.write().insert(identity.into(), profile);
    }

    fn default_profile() -> Result<ConfigProfile> {
        ConfigProfile::new(7, VoiceId::default(), "")
    }
}

impl Default for MemoryProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn read_profile(&self, identity: &str) -> Result<ConfigProfile> {
        if let Some(profile) = self.profiles.read().get(identity) {
            return Ok(profile.clone());
        }
        Self::default_profile()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_returns_stored_profile() {
        let store = MemoryProfileStore::new();
        let profile = ConfigProfile::new(9, VoiceId::default(), "h").unwrap();
        store.put("child-1", profile);

        let read = store.read_profile("child-1").await.unwrap();
        assert_eq!(read.child_age, 9);
    }

    #[tokio::test]
    async fn test_unknown_identity_gets_default() {
        let store = MemoryProfileStore::new();
        let read = store.read_profile("nobody").await.unwrap();
        assert_eq!(read.child_age, 7);
        assert_eq!(read.voice, VoiceId::default());
    }
}
