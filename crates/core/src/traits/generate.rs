//! Reply generation trait and request types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::persona::Persona;
use crate::profile::AgeBand;
use crate::Result;

/// Request for one generated reply
///
/// `text` is always the scrubbed transcript; the raw transcript never
/// crosses this boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Scrubbed user utterance
    pub text: String,
    /// Age band the reply must be tuned for
    pub age_band: AgeBand,
    /// Persona configuration (system prompt, assistant name)
    pub persona: Persona,
    /// Maximum reply length in tokens
    pub max_tokens: u32,
}

impl GenerateRequest {
    /// Create a request for a scrubbed utterance and persona
    pub fn new(scrubbed_text: impl Into<String>, persona: Persona) -> Self {
        let age_band = AgeBand::from_age(persona.child_age);
        Self {
            text: scrubbed_text.into(),
            age_band,
            persona,
            max_tokens: 256,
        }
    }
}

/// Generative reply service interface
#[async_trait]
pub trait ReplyGenerator: Send + Sync + 'static {
    /// Generate a reply for the scrubbed transcript
    async fn generate(&self, request: GenerateRequest) -> Result<String>;

    /// Get model name for logging
    fn model_name(&self) -> &str;
}
