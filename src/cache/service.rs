//! The prompt cache as seen by the chat layer and by operators

use crate::cache::{
    analytics::{UsageAnalytics, UsageReport},
    config::CacheConfig,
    dedup::{DedupEngine, UpsertReport},
    entry::{CacheEntry, PromptCandidate},
    integration::{CharacterDirectory, PromptGenerator},
    invalidation::{EvictionEngine, InvalidationEvent},
    lifecycle::Lifecycle,
    lookup::LookupEngine,
    store::EntryStore,
    types::{CacheStats, LanguageCode, UpsertOutcome},
};
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where a served prompt came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptSource {
    Cache,
    /// Generated and written back
    Generated(UpsertOutcome),
    /// Generated, but the store could not be used
    Uncached,
}

/// Prompt handed back to the chat layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServedPrompt {
    pub system_prompt: String,
    pub source: PromptSource,
}

/// Affinity-aware prompt cache over a shared entry store
pub struct PromptCache {
    config: CacheConfig,
    store: Arc<dyn EntryStore>,
    lifecycle: Lifecycle,
    lookup: LookupEngine,
    dedup: DedupEngine,
    eviction: EvictionEngine,
    analytics: UsageAnalytics,
    stats: RwLock<CacheStats>,
}

impl PromptCache {
    pub fn new(config: CacheConfig, store: Arc<dyn EntryStore>) -> Result<Self> {
        config.validate()?;
        info!("Initializing prompt cache with config: {:?}", config);

        let lifecycle = Lifecycle::new(&config);

        Ok(Self {
            lookup: LookupEngine::new(store.clone(), config.affinity_tolerance),
            dedup: DedupEngine::new(store.clone(), lifecycle.clone(), config.max_write_retries),
            eviction: EvictionEngine::new(store.clone(), &config),
            analytics: UsageAnalytics::new(store.clone()),
            lifecycle,
            store,
            config,
            stats: RwLock::new(CacheStats::default()),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn EntryStore> {
        self.store.clone()
    }

    /// Cached prompt text for the request, `None` on a miss
    pub async fn get_prompt(
        &self,
        user_id: &str,
        character_id: &str,
        affinity_level: u8,
        language_code: LanguageCode,
    ) -> Result<Option<String>> {
        Ok(self
            .lookup(user_id, character_id, affinity_level, language_code)
            .await?
            .map(|entry| entry.system_prompt))
    }

    /// Best live entry for the request. A hit is recorded exactly once.
    pub async fn lookup(
        &self,
        user_id: &str,
        character_id: &str,
        affinity_level: u8,
        language_code: LanguageCode,
    ) -> Result<Option<CacheEntry>> {
        let now = Utc::now();
        let found = self
            .lookup
            .find(user_id, character_id, affinity_level, language_code, now)
            .await?;

        let Some(entry) = found else {
            debug!("Cache miss: {}/{}/{}/{}", user_id, character_id, affinity_level, language_code);
            self.stats.write().await.misses += 1;
            return Ok(None);
        };

        debug!("Cache hit: {} for level {}", entry.key(), affinity_level);
        self.stats.write().await.hits += 1;

        Ok(Some(self.record_hit(entry, now).await?))
    }

    /// Persist a served hit with compare-and-swap, re-reading on conflict.
    ///
    /// If the row vanished meanwhile (evicted or invalidated) the copy already
    /// read is still served.
    async fn record_hit(&self, entry: CacheEntry, now: DateTime<Utc>) -> Result<CacheEntry> {
        let mut current = entry;

        for _ in 0..=self.config.max_write_retries {
            let next = self.lifecycle.record_hit(&current, now);
            if self.store.compare_and_swap(&next, current.revision).await? {
                let mut stored = next;
                stored.revision = current.revision + 1;
                return Ok(stored);
            }

            self.stats.write().await.write_conflicts += 1;
            match self.store.get(current.id).await? {
                Some(fresh) => current = fresh,
                None => {
                    debug!("Entry {} removed while serving, returning last read", current.id);
                    return Ok(current);
                }
            }
        }

        warn!("Could not record hit on {} after retries", current.id);
        Ok(current)
    }

    /// Hand a freshly generated prompt to the cache
    pub async fn put_prompt(&self, candidate: PromptCandidate) -> Result<UpsertOutcome> {
        Ok(self.upsert(candidate).await?.outcome)
    }

    /// Like [`put_prompt`](Self::put_prompt) but returns the persisted row
    pub async fn upsert(&self, candidate: PromptCandidate) -> Result<UpsertReport> {
        let report = self.dedup.upsert(candidate, Utc::now()).await?;

        let mut stats = self.stats.write().await;
        stats.write_conflicts += u64::from(report.conflicts);
        match report.outcome {
            UpsertOutcome::Inserted => stats.inserts += 1,
            UpsertOutcome::FoldedIntoExisting => stats.folds += 1,
        }

        Ok(report)
    }

    /// Serve from cache or generate, write back, and serve.
    ///
    /// Store outages degrade to uncached generation; generator and directory
    /// errors propagate.
    pub async fn get_or_generate(
        &self,
        user_id: &str,
        character_id: &str,
        affinity_level: u8,
        language_code: LanguageCode,
        generator: &dyn PromptGenerator,
        directory: &dyn CharacterDirectory,
    ) -> Result<ServedPrompt> {
        match self
            .get_prompt(user_id, character_id, affinity_level, language_code)
            .await
        {
            Ok(Some(system_prompt)) => {
                return Ok(ServedPrompt {
                    system_prompt,
                    source: PromptSource::Cache,
                })
            }
            Ok(None) => {}
            Err(e) if e.is_store_unavailable() => {
                warn!("Prompt cache unavailable on read, generating without cache: {}", e);
            }
            Err(e) => return Err(e),
        }

        let profile = directory.current_profile(character_id).await?;
        let config = profile.prompt_config(affinity_level, language_code);
        let generated = generator
            .generate(&profile.generation_request(user_id, &config))
            .await?;
        let system_prompt = generated.system_prompt.clone();

        let source = match self.put_prompt(profile.candidate(user_id, config, generated)).await {
            Ok(outcome) => PromptSource::Generated(outcome),
            Err(e) if e.is_store_unavailable() => {
                warn!("Prompt cache unavailable on write, serving uncached prompt: {}", e);
                PromptSource::Uncached
            }
            Err(e) => return Err(e),
        };

        Ok(ServedPrompt {
            system_prompt,
            source,
        })
    }

    /// Delete every entry of `character_id` generated against `old_version`
    pub async fn invalidate(&self, character_id: &str, old_version: u32) -> Result<usize> {
        let event = self
            .eviction
            .invalidate_character_version(character_id, old_version, Utc::now())
            .await?;
        self.stats.write().await.invalidations += event.deleted as u64;
        Ok(event.deleted)
    }

    /// Low-value pruning with a horizon of `days_old` days (configured default when `None`)
    pub async fn cleanup(&self, days_old: Option<u32>) -> Result<usize> {
        let horizon = days_old
            .map(|d| Duration::days(i64::from(d)))
            .unwrap_or(self.config.prune_horizon);
        let event = self.eviction.prune(horizon, Utc::now()).await?;
        self.stats.write().await.evictions_pruned += event.deleted as u64;
        Ok(event.deleted)
    }

    /// Physically delete expired rows
    pub async fn purge_expired(&self) -> Result<usize> {
        let event = self.eviction.purge_expired(Utc::now()).await?;
        self.stats.write().await.evictions_expired += event.deleted as u64;
        Ok(event.deleted)
    }

    /// One scheduled maintenance pass
    pub async fn run_maintenance(&self) -> Result<Vec<InvalidationEvent>> {
        let now = Utc::now();
        let expired = self.eviction.purge_expired(now).await?;
        let pruned = self.eviction.prune(self.config.prune_horizon, now).await?;

        let mut stats = self.stats.write().await;
        stats.evictions_expired += expired.deleted as u64;
        stats.evictions_pruned += pruned.deleted as u64;

        Ok(vec![expired, pruned])
    }

    /// Usage rollup over the last `days` days (configured window when `None`)
    pub async fn usage_stats(&self, days: Option<u32>) -> Result<UsageReport> {
        let window = days
            .map(|d| Duration::days(i64::from(d)))
            .unwrap_or(self.config.stats_window);
        self.analytics.report(window, Utc::now()).await
    }

    /// In-process counters
    pub async fn stats(&self) -> CacheStats {
        self.stats.read().await.clone()
    }
}

/// Background task running [`PromptCache::run_maintenance`] every
/// `cleanup_interval`. A failed pass is logged and retried on the next tick.
pub fn spawn_maintenance(cache: Arc<PromptCache>) -> JoinHandle<()> {
    let interval = cache.config.cleanup_interval;

    tokio::spawn(async move {
        info!("Starting prompt cache maintenance task (interval: {:?})", interval);

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match cache.run_maintenance().await {
                Ok(events) => {
                    let deleted: usize = events.iter().map(|e| e.deleted).sum();
                    if deleted > 0 {
                        debug!("Maintenance removed {} entries", deleted);
                    }
                }
                Err(e) => {
                    warn!("Prompt cache maintenance failed, retrying next pass: {}", e);
                }
            }
        }
    })
}
