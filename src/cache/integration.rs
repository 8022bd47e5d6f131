//! Seams to the collaborators that live outside the cache
//!
//! - [`PromptGenerator`]: turns a character configuration into prompt text.
//!   Only called on a cache miss.
//! - [`CharacterDirectory`]: supplies the current character version and
//!   prompt configuration.

use crate::cache::entry::PromptCandidate;
use crate::cache::types::{LanguageCode, MoodModifier, PromptConfig, ToneStyle};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Input handed to the prompt generator on a miss
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub user_id: String,
    pub character_id: String,
    pub affinity_level: u8,
    pub personality_tags: Vec<String>,
    pub tone_style: ToneStyle,
    pub mood_modifiers: BTreeSet<MoodModifier>,
    pub language_code: LanguageCode,
}

/// Generator output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedPrompt {
    pub system_prompt: String,
    pub generation_time_ms: u32,
}

/// Current configuration of a character
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub character_id: String,
    pub character_version: u32,
    pub prompt_version: u32,
    pub personality_tags: Vec<String>,
    pub tone_style: ToneStyle,
    pub mood_modifiers: BTreeSet<MoodModifier>,
}

impl CharacterProfile {
    /// Prompt config for a given relationship state
    pub fn prompt_config(&self, affinity_level: u8, language_code: LanguageCode) -> PromptConfig {
        PromptConfig::new(
            affinity_level,
            self.personality_tags.clone(),
            self.tone_style,
            self.mood_modifiers.iter().copied(),
            language_code,
        )
    }

    pub fn generation_request(&self, user_id: &str, config: &PromptConfig) -> GenerationRequest {
        GenerationRequest {
            user_id: user_id.to_string(),
            character_id: self.character_id.clone(),
            affinity_level: config.affinity_level,
            personality_tags: config.personality_tags.clone(),
            tone_style: config.tone_style,
            mood_modifiers: config.mood_modifiers.clone(),
            language_code: config.language_code,
        }
    }

    /// Package generator output for the write path
    pub fn candidate(&self, user_id: &str, config: PromptConfig, generated: GeneratedPrompt) -> PromptCandidate {
        PromptCandidate {
            user_id: user_id.to_string(),
            character_id: self.character_id.clone(),
            prompt_config: config,
            system_prompt: generated.system_prompt,
            generation_time_ms: generated.generation_time_ms,
            character_version: self.character_version,
            prompt_version: self.prompt_version,
        }
    }
}

/// Produces prompt text. Implementations may be slow; the cache never holds a
/// lock across this call.
#[async_trait]
pub trait PromptGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedPrompt>;
}

/// Source of truth for character configuration
#[async_trait]
pub trait CharacterDirectory: Send + Sync {
    async fn current_profile(&self, character_id: &str) -> Result<CharacterProfile>;
}
