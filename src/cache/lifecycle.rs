//! Usage counters, TTL extension and derived-field upkeep.
//!
//! Everything here is a pure transform over [`CacheEntry`]; persisting the
//! result is the caller's job.

use crate::cache::config::CacheConfig;
use crate::cache::entry::{CacheEntry, PromptCandidate, MAX_USE_COUNT};
use chrono::{DateTime, Duration, Utc};

/// Retention rules applied on every read and write
#[derive(Debug, Clone)]
pub struct Lifecycle {
    default_ttl: Duration,
    extended_ttl: Duration,
    extension_threshold: u32,
    max_use_count: u32,
}

impl Lifecycle {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            default_ttl: config.default_ttl,
            extended_ttl: config.extended_ttl,
            extension_threshold: config.extension_threshold,
            max_use_count: config.max_use_count.min(MAX_USE_COUNT),
        }
    }

    /// Entry for a cache miss, ready to insert
    pub fn new_entry(&self, candidate: PromptCandidate, now: DateTime<Utc>) -> CacheEntry {
        let mut entry = CacheEntry::from_candidate(candidate, now, self.default_ttl);
        self.prepare_for_write(&mut entry, now);
        entry
    }

    /// Account for one served request
    pub fn record_hit(&self, entry: &CacheEntry, now: DateTime<Utc>) -> CacheEntry {
        let mut next = entry.clone();
        next.use_count = next.use_count.saturating_add(1).min(self.max_use_count);
        next.last_used = now;
        self.prepare_for_write(&mut next, now);
        next
    }

    /// Overwrite an entry with a regenerated prompt for the same exact key.
    ///
    /// Identity, `created_at` and `ttl` survive; counters restart.
    pub fn record_generation(
        &self,
        entry: &CacheEntry,
        candidate: &PromptCandidate,
        now: DateTime<Utc>,
    ) -> CacheEntry {
        let mut next = entry.clone();
        next.prompt_config = candidate.prompt_config.clone();
        next.system_prompt = candidate.system_prompt.clone();
        next.generation_time_ms = candidate.generation_time_ms;
        next.character_version = candidate.character_version;
        next.prompt_version = candidate.prompt_version;
        next.last_used = now;
        next.use_count = 1;
        self.prepare_for_write(&mut next, now);
        next
    }

    /// Last step before any store write
    pub fn prepare_for_write(&self, entry: &mut CacheEntry, now: DateTime<Utc>) {
        self.apply_ttl_extension(entry, now);
        entry.refresh_derived();
    }

    /// Frequently hit entries live at least `extended_ttl` from now. Never shortens.
    pub fn apply_ttl_extension(&self, entry: &mut CacheEntry, now: DateTime<Utc>) {
        if entry.use_count > self.extension_threshold {
            let extended = now + self.extended_ttl;
            if extended > entry.ttl {
                entry.ttl = extended;
            }
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
