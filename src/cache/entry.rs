//! Cache entry model: one stored system prompt plus its lifecycle metadata

use crate::cache::types::{AffinityBand, LanguageCode, PromptConfig, PromptKey};
use crate::error::{PromptCacheError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prompts at or below this many characters are rejected
pub const MIN_PROMPT_CHARS: usize = 51;

pub const MAX_PROMPT_CHARS: usize = 8000;

pub const MAX_GENERATION_TIME_MS: u32 = 60_000;

/// Hard ceiling on `use_count`
pub const MAX_USE_COUNT: u32 = 10_000;

pub const MIN_COMPRESSION_RATIO: f64 = 0.1;

pub const MAX_COMPRESSION_RATIO: f64 = 10.0;

/// A freshly generated prompt on its way into the cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptCandidate {
    pub user_id: String,
    pub character_id: String,
    pub prompt_config: PromptConfig,
    pub system_prompt: String,
    pub generation_time_ms: u32,
    pub character_version: u32,
    pub prompt_version: u32,
}

impl PromptCandidate {
    pub fn key(&self) -> PromptKey {
        PromptKey::new(
            self.user_id.clone(),
            self.character_id.clone(),
            self.prompt_config.affinity_level,
            self.prompt_config.language_code,
        )
    }

    /// Reject anything outside its documented range
    pub fn validate(&self) -> Result<()> {
        validate_identity(&self.user_id, &self.character_id)?;
        self.prompt_config.validate()?;
        validate_prompt(&self.system_prompt)?;
        validate_generation_time(self.generation_time_ms)?;
        validate_versions(self.character_version, self.prompt_version)
    }
}

/// A stored, reusable system prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Store identity, stable across folds
    pub id: Uuid,

    pub user_id: String,

    pub character_id: String,

    pub prompt_config: PromptConfig,

    pub system_prompt: String,

    pub created_at: DateTime<Utc>,

    pub last_used: DateTime<Utc>,

    /// Served count, starting at 1
    pub use_count: u32,

    /// Absolute expiry instant
    pub ttl: DateTime<Utc>,

    pub character_version: u32,

    pub prompt_version: u32,

    pub generation_time_ms: u32,

    /// Bumped by the store on every successful write
    pub revision: u64,

    pub(crate) prompt_length: u32,

    pub(crate) compression_ratio: f64,
}

impl CacheEntry {
    /// Build a first-generation entry from a candidate
    pub fn from_candidate(candidate: PromptCandidate, now: DateTime<Utc>, ttl: Duration) -> Self {
        let mut entry = Self {
            id: Uuid::new_v4(),
            user_id: candidate.user_id,
            character_id: candidate.character_id,
            prompt_config: candidate.prompt_config,
            system_prompt: candidate.system_prompt,
            created_at: now,
            last_used: now,
            use_count: 1,
            ttl: now + ttl,
            character_version: candidate.character_version,
            prompt_version: candidate.prompt_version,
            generation_time_ms: candidate.generation_time_ms,
            revision: 0,
            prompt_length: 0,
            compression_ratio: 0.0,
        };
        entry.refresh_derived();
        entry
    }

    /// Recompute `prompt_length` and `compression_ratio` from the payload.
    ///
    /// Must run immediately before every store write.
    pub fn refresh_derived(&mut self) {
        let length = self.system_prompt.chars().count();
        self.prompt_length = length as u32;
        self.compression_ratio = compression_ratio(length, &self.prompt_config);
    }

    pub fn prompt_length(&self) -> u32 {
        self.prompt_length
    }

    pub fn compression_ratio(&self) -> f64 {
        self.compression_ratio
    }

    pub fn key(&self) -> PromptKey {
        PromptKey::new(
            self.user_id.clone(),
            self.character_id.clone(),
            self.prompt_config.affinity_level,
            self.prompt_config.language_code,
        )
    }

    pub fn affinity_level(&self) -> u8 {
        self.prompt_config.affinity_level
    }

    pub fn language_code(&self) -> LanguageCode {
        self.prompt_config.language_code
    }

    pub fn affinity_band(&self) -> AffinityBand {
        self.prompt_config.band()
    }

    /// Check if the entry has expired
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ttl <= now
    }

    /// Served by lookups and protected by the uniqueness invariant
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now)
    }

    /// Unexpired, versioned, and carrying a usable prompt
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.is_live(now)
            && self.character_version > 0
            && self.prompt_version > 0
            && self.system_prompt.chars().count() >= MIN_PROMPT_CHARS
    }

    /// Uses per day since creation, counting partial days as one
    pub fn efficiency(&self, now: DateTime<Utc>) -> f64 {
        let days = (now - self.created_at).num_days().max(1);
        self.use_count as f64 / days as f64
    }

    /// Time until expiration, `None` once expired
    pub fn time_until_expiration(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.is_expired(now) {
            None
        } else {
            Some(self.ttl - now)
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_identity(&self.user_id, &self.character_id)?;
        self.prompt_config.validate()?;
        validate_prompt(&self.system_prompt)?;
        validate_generation_time(self.generation_time_ms)?;
        validate_versions(self.character_version, self.prompt_version)?;

        if self.use_count == 0 || self.use_count > MAX_USE_COUNT {
            return Err(PromptCacheError::validation(
                "use_count",
                format!("{} is outside 1-{}", self.use_count, MAX_USE_COUNT),
            ));
        }

        Ok(())
    }
}

/// `prompt_length / (tag lengths + tone name length)`, clamped to [0.1, 10.0]
pub fn compression_ratio(prompt_length: usize, config: &PromptConfig) -> f64 {
    let descriptor = config.descriptor_length().max(1);
    (prompt_length as f64 / descriptor as f64).clamp(MIN_COMPRESSION_RATIO, MAX_COMPRESSION_RATIO)
}

fn validate_identity(user_id: &str, character_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(PromptCacheError::validation("user_id", "must not be empty"));
    }
    if character_id.trim().is_empty() {
        return Err(PromptCacheError::validation("character_id", "must not be empty"));
    }
    Ok(())
}

fn validate_prompt(prompt: &str) -> Result<()> {
    let chars = prompt.chars().count();
    if chars < MIN_PROMPT_CHARS || chars > MAX_PROMPT_CHARS {
        return Err(PromptCacheError::validation(
            "system_prompt",
            format!(
                "{} characters, expected {}-{}",
                chars, MIN_PROMPT_CHARS, MAX_PROMPT_CHARS
            ),
        ));
    }
    Ok(())
}

fn validate_generation_time(ms: u32) -> Result<()> {
    if ms > MAX_GENERATION_TIME_MS {
        return Err(PromptCacheError::validation(
            "generation_time_ms",
            format!("{} exceeds {}", ms, MAX_GENERATION_TIME_MS),
        ));
    }
    Ok(())
}

fn validate_versions(character_version: u32, prompt_version: u32) -> Result<()> {
    if character_version == 0 {
        return Err(PromptCacheError::validation("character_version", "must be set"));
    }
    if prompt_version == 0 {
        return Err(PromptCacheError::validation("prompt_version", "must be set"));
    }
    Ok(())
}
