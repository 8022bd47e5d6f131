//! Core type definitions for the prompt cache

use crate::error::{PromptCacheError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Highest representable affinity level
pub const MAX_AFFINITY_LEVEL: u8 = 100;

/// Maximum number of personality tags on one prompt config
pub const MAX_PERSONALITY_TAGS: usize = 15;

/// Maximum length of a single personality tag, in characters
pub const MAX_TAG_CHARS: usize = 20;

/// Speaking style of a character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToneStyle {
    Friendly,
    Formal,
    Playful,
    Cool,
    Gentle,
}

impl ToneStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToneStyle::Friendly => "friendly",
            ToneStyle::Formal => "formal",
            ToneStyle::Playful => "playful",
            ToneStyle::Cool => "cool",
            ToneStyle::Gentle => "gentle",
        }
    }
}

impl FromStr for ToneStyle {
    type Err = PromptCacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "friendly" => Ok(ToneStyle::Friendly),
            "formal" => Ok(ToneStyle::Formal),
            "playful" => Ok(ToneStyle::Playful),
            "cool" => Ok(ToneStyle::Cool),
            "gentle" => Ok(ToneStyle::Gentle),
            other => Err(PromptCacheError::validation(
                "tone_style",
                format!("unknown tone style: {}", other),
            )),
        }
    }
}

impl fmt::Display for ToneStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mood tags layered on top of the base tone
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoodModifier {
    Happy,
    Sad,
    Excited,
    Calm,
    Shy,
    Jealous,
    Tired,
}

impl MoodModifier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MoodModifier::Happy => "happy",
            MoodModifier::Sad => "sad",
            MoodModifier::Excited => "excited",
            MoodModifier::Calm => "calm",
            MoodModifier::Shy => "shy",
            MoodModifier::Jealous => "jealous",
            MoodModifier::Tired => "tired",
        }
    }
}

impl FromStr for MoodModifier {
    type Err = PromptCacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "happy" => Ok(MoodModifier::Happy),
            "sad" => Ok(MoodModifier::Sad),
            "excited" => Ok(MoodModifier::Excited),
            "calm" => Ok(MoodModifier::Calm),
            "shy" => Ok(MoodModifier::Shy),
            "jealous" => Ok(MoodModifier::Jealous),
            "tired" => Ok(MoodModifier::Tired),
            other => Err(PromptCacheError::validation(
                "mood_modifiers",
                format!("unknown mood modifier: {}", other),
            )),
        }
    }
}

/// Language the prompt is written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageCode {
    Ja,
    En,
    Ko,
    Zh,
}

impl LanguageCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LanguageCode::Ja => "ja",
            LanguageCode::En => "en",
            LanguageCode::Ko => "ko",
            LanguageCode::Zh => "zh",
        }
    }
}

impl FromStr for LanguageCode {
    type Err = PromptCacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ja" => Ok(LanguageCode::Ja),
            "en" => Ok(LanguageCode::En),
            "ko" => Ok(LanguageCode::Ko),
            "zh" => Ok(LanguageCode::Zh),
            other => Err(PromptCacheError::validation(
                "language_code",
                format!("unsupported language: {}", other),
            )),
        }
    }
}

impl fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse relationship label derived from an affinity level.
///
/// Reporting only; never used for key matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffinityBand {
    Stranger,
    Acquaintance,
    Friend,
    CloseFriend,
    Lover,
}

impl AffinityBand {
    pub fn from_level(level: u8) -> Self {
        match level {
            0..=19 => AffinityBand::Stranger,
            20..=39 => AffinityBand::Acquaintance,
            40..=59 => AffinityBand::Friend,
            60..=84 => AffinityBand::CloseFriend,
            _ => AffinityBand::Lover,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AffinityBand::Stranger => "stranger",
            AffinityBand::Acquaintance => "acquaintance",
            AffinityBand::Friend => "friend",
            AffinityBand::CloseFriend => "close_friend",
            AffinityBand::Lover => "lover",
        }
    }
}

impl fmt::Display for AffinityBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Character configuration that shaped a generated prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptConfig {
    pub affinity_level: u8,

    /// Ordered, duplicate-free
    pub personality_tags: Vec<String>,

    pub tone_style: ToneStyle,

    pub mood_modifiers: BTreeSet<MoodModifier>,

    pub language_code: LanguageCode,
}

impl PromptConfig {
    /// Create a config; repeated tags are dropped, first occurrence wins
    pub fn new(
        affinity_level: u8,
        personality_tags: Vec<String>,
        tone_style: ToneStyle,
        mood_modifiers: impl IntoIterator<Item = MoodModifier>,
        language_code: LanguageCode,
    ) -> Self {
        let mut tags: Vec<String> = Vec::with_capacity(personality_tags.len());
        for tag in personality_tags {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }

        Self {
            affinity_level,
            personality_tags: tags,
            tone_style,
            mood_modifiers: mood_modifiers.into_iter().collect(),
            language_code,
        }
    }

    /// Check documented ranges. Nothing is truncated.
    pub fn validate(&self) -> Result<()> {
        if self.affinity_level > MAX_AFFINITY_LEVEL {
            return Err(PromptCacheError::validation(
                "affinity_level",
                format!("{} is outside 0-{}", self.affinity_level, MAX_AFFINITY_LEVEL),
            ));
        }

        if self.personality_tags.len() > MAX_PERSONALITY_TAGS {
            return Err(PromptCacheError::validation(
                "personality_tags",
                format!(
                    "{} tags given, at most {} allowed",
                    self.personality_tags.len(),
                    MAX_PERSONALITY_TAGS
                ),
            ));
        }

        for tag in &self.personality_tags {
            let chars = tag.chars().count();
            if chars == 0 || chars > MAX_TAG_CHARS {
                return Err(PromptCacheError::validation(
                    "personality_tags",
                    format!("tag {:?} must be 1-{} characters", tag, MAX_TAG_CHARS),
                ));
            }
        }

        Ok(())
    }

    /// Sum of tag lengths plus the tone style name, in characters
    pub fn descriptor_length(&self) -> usize {
        let tags: usize = self.personality_tags.iter().map(|t| t.chars().count()).sum();
        tags + self.tone_style.as_str().len()
    }

    pub fn band(&self) -> AffinityBand {
        AffinityBand::from_level(self.affinity_level)
    }
}

/// The exact uniqueness tuple of a cache entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PromptKey {
    pub user_id: String,
    pub character_id: String,
    pub affinity_level: u8,
    pub language_code: LanguageCode,
}

impl PromptKey {
    pub fn new(
        user_id: impl Into<String>,
        character_id: impl Into<String>,
        affinity_level: u8,
        language_code: LanguageCode,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            character_id: character_id.into(),
            affinity_level,
            language_code,
        }
    }
}

impl fmt::Display for PromptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.user_id, self.character_id, self.affinity_level, self.language_code
        )
    }
}

/// Store-level range query issued by the lookup engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    pub user_id: String,
    pub character_id: String,
    pub language_code: LanguageCode,
    /// Inclusive lower bound
    pub min_level: u8,
    /// Inclusive upper bound
    pub max_level: u8,
    /// Entries with `ttl <= now` are excluded
    pub now: DateTime<Utc>,
}

/// Result of handing a freshly generated prompt to the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// A new row was written
    Inserted,
    /// An existing row with the exact key was overwritten
    FoldedIntoExisting,
}

impl fmt::Display for UpsertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpsertOutcome::Inserted => write!(f, "inserted"),
            UpsertOutcome::FoldedIntoExisting => write!(f, "folded"),
        }
    }
}

/// In-process counters for one cache handle
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheStats {
    /// Lookups that returned an entry
    pub hits: u64,

    /// Lookups that found nothing
    pub misses: u64,

    /// Writes that created a row
    pub inserts: u64,

    /// Writes that overwrote an exact-key row
    pub folds: u64,

    /// Store-level duplicate-key rejections and lost compare-and-swaps
    pub write_conflicts: u64,

    /// Rows removed by expiry sweeps
    pub evictions_expired: u64,

    /// Rows removed by low-value pruning
    pub evictions_pruned: u64,

    /// Rows removed by character version invalidation
    pub invalidations: u64,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }

    pub fn total_evictions(&self) -> u64 {
        self.evictions_expired + self.evictions_pruned + self.invalidations
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, inserts: {}, folds: {}, conflicts: {}, evictions: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.inserts,
            self.folds,
            self.write_conflicts,
            self.total_evictions()
        )
    }
}
