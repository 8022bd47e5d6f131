//! # Affinity-Aware Prompt Cache
//!
//! Stores generated character system prompts keyed by
//! `(user, character, affinity level, language)` and serves them back for
//! nearby relationship states, so regenerating a prompt is only needed when
//! nothing close enough is cached.
//!
//! ## Features
//!
//! - **Fuzzy lookup**: any live entry within ±`affinity_tolerance` levels
//!   matches; the most recently and most frequently used one wins
//! - **Write-time dedup**: at most one live entry per exact key; a
//!   regenerated prompt is folded into the existing row
//! - **Usage-driven TTL**: hot entries have their lifetime extended
//! - **Eviction**: expiry purge, low-value pruning and character-version
//!   invalidation, each a single bulk delete
//! - **Analytics**: per-character usage rollups over a trailing window
//!
//! ## Example
//!
//! ```rust
//! use persona_prompt_cache::cache::{
//!     CacheConfig, LanguageCode, MemoryStore, PromptCache, PromptCandidate, PromptConfig, ToneStyle,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let cache = PromptCache::new(CacheConfig::default(), Arc::new(MemoryStore::new()))?;
//!
//! cache
//!     .put_prompt(PromptCandidate {
//!         user_id: "user-1".to_string(),
//!         character_id: "hina".to_string(),
//!         prompt_config: PromptConfig::new(22, vec!["cheerful".into()], ToneStyle::Playful, [], LanguageCode::Ja),
//!         system_prompt: "You are Hina, a cheerful classmate who is slowly warming up to the user.".to_string(),
//!         generation_time_ms: 1800,
//!         character_version: 1,
//!         prompt_version: 1,
//!     })
//!     .await?;
//!
//! // Level 25 is within tolerance of the cached level 22
//! if let Some(prompt) = cache.get_prompt("user-1", "hina", 25, LanguageCode::Ja).await? {
//!     println!("Cache hit: {}", prompt);
//! }
//! # Ok(())
//! # }
//! ```

pub mod analytics;
pub mod config;
pub mod dedup;
pub mod entry;
pub mod integration;
pub mod invalidation;
pub mod lifecycle;
pub mod lookup;
pub mod neo4j_store;
pub mod service;
pub mod store;
pub mod types;

pub use analytics::{CharacterUsage, GenerationTimeSummary, UsageAnalytics, UsageReport};
pub use config::{CacheConfig, CacheConfigBuilder};
pub use dedup::{DedupEngine, UpsertReport};
pub use entry::{CacheEntry, PromptCandidate};
pub use integration::{
    CharacterDirectory, CharacterProfile, GeneratedPrompt, GenerationRequest, PromptGenerator,
};
pub use invalidation::{EvictionEngine, InvalidationEvent, InvalidationReason};
pub use lifecycle::Lifecycle;
pub use lookup::LookupEngine;
pub use neo4j_store::Neo4jEntryStore;
pub use service::{spawn_maintenance, PromptCache, PromptSource, ServedPrompt};
pub use store::{DeleteFilter, EntryStore, MemoryStore};
pub use types::{
    AffinityBand, CacheStats, LanguageCode, MoodModifier, PromptConfig, PromptKey, RangeQuery,
    ToneStyle, UpsertOutcome,
};
