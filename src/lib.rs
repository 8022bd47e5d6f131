//! # Persona Prompt Cache
//!
//! Caches expensive, LLM-generated character system prompts for a
//! character-chat platform and serves them back for nearby relationship
//! states.
//!
//! ## Features
//!
//! - Affinity-window lookup with a deterministic tie-break
//! - At most one live entry per exact cache key, enforced by the store
//! - Usage-driven TTL extension and bounded use counters
//! - Bulk eviction and character-version invalidation
//! - Usage analytics over a trailing window
//! - In-memory and Neo4j-backed stores behind one trait
//! - Background maintenance task
//!
//! ## Neo4j
//!
//! ```no_run
//! use persona_prompt_cache::{CacheConfig, Neo4jClient, Neo4jEntryStore, PromptCache};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Neo4jClient::new(
//!         "bolt://localhost:7687",
//!         "neo4j",
//!         "password",
//!         "neo4j"
//!     ).await?;
//!
//!     let store = Neo4jEntryStore::from_client(&client);
//!     store.ensure_schema().await?;
//!
//!     let cache = PromptCache::new(CacheConfig::from_env()?, Arc::new(store))?;
//!     let report = cache.usage_stats(None).await?;
//!     println!("{} entries used in the last {} days", report.total_entries, report.window_days);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod connection;
pub mod error;

// Re-export main types for convenience
pub use cache::{
    CacheConfig, CacheConfigBuilder, CacheEntry, CacheStats, CharacterDirectory, EntryStore,
    LanguageCode, MemoryStore, MoodModifier, Neo4jEntryStore, PromptCache, PromptCandidate,
    PromptConfig, PromptGenerator, ToneStyle, UpsertOutcome, UsageReport,
};
pub use connection::{HealthCheckConfig, HealthCheckResult, HealthStatus, Neo4jClient, Neo4jSettings};
pub use error::{PromptCacheError, Result};
