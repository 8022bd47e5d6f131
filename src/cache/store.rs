//! Entry store abstraction and the in-process implementation
//!
//! The engines never lock anything themselves. They rely on two guarantees
//! every store must provide:
//! - `insert` refuses a second live row for the same exact key
//! - `compare_and_swap` is an atomic single-row read-modify-write on `revision`

use crate::cache::entry::CacheEntry;
use crate::cache::types::{PromptKey, RangeQuery};
use crate::error::{PromptCacheError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Bulk deletion predicates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteFilter {
    /// `ttl < now`
    Expired { now: DateTime<Utc> },

    /// `last_used < unused_since OR ttl < now OR use_count < min_use_count`
    LowValue {
        now: DateTime<Utc>,
        unused_since: DateTime<Utc>,
        min_use_count: u32,
    },

    /// Every row of `character_id` generated against `version`
    CharacterVersion { character_id: String, version: u32 },
}

impl DeleteFilter {
    pub fn matches(&self, entry: &CacheEntry) -> bool {
        match self {
            DeleteFilter::Expired { now } => entry.ttl < *now,
            DeleteFilter::LowValue {
                now,
                unused_since,
                min_use_count,
            } => {
                entry.last_used < *unused_since
                    || entry.ttl < *now
                    || entry.use_count < *min_use_count
            }
            DeleteFilter::CharacterVersion {
                character_id,
                version,
            } => entry.character_id == *character_id && entry.character_version == *version,
        }
    }
}

/// Persistent, indexed storage of cache entries
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Point lookup by id
    async fn get(&self, id: Uuid) -> Result<Option<CacheEntry>>;

    /// Row holding the exact key, live or not
    async fn find_exact(&self, key: &PromptKey) -> Result<Option<CacheEntry>>;

    /// Live rows of one user/character/language inside an inclusive level range
    async fn find_in_range(&self, query: &RangeQuery) -> Result<Vec<CacheEntry>>;

    /// Insert a new row.
    ///
    /// Fails with [`PromptCacheError::DuplicateKey`] if a row live at `now`
    /// holds the same exact key. An expired holder is replaced.
    async fn insert(&self, entry: &CacheEntry, now: DateTime<Utc>) -> Result<()>;

    /// Replace the row with `entry.id` if its stored revision is still
    /// `expected_revision`. The stored row gets `expected_revision + 1`.
    ///
    /// Returns `false` when the row changed underneath or no longer exists.
    /// Key fields must not change.
    async fn compare_and_swap(&self, entry: &CacheEntry, expected_revision: u64) -> Result<bool>;

    /// Delete every row matching the filter in one operation
    async fn delete_matching(&self, filter: &DeleteFilter) -> Result<usize>;

    /// Rows with `last_used >= since`, for analytics
    async fn used_since(&self, since: DateTime<Utc>) -> Result<Vec<CacheEntry>>;

    /// Number of stored rows, expired ones included
    async fn len(&self) -> Result<usize>;
}

/// In-process store with a unique index on the exact key
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<Uuid, CacheEntry>,
    by_key: HashMap<PromptKey, Uuid>,
}

impl MemoryState {
    fn remove(&mut self, id: &Uuid) -> Option<CacheEntry> {
        let entry = self.entries.remove(id)?;
        if self.by_key.get(&entry.key()) == Some(id) {
            self.by_key.remove(&entry.key());
        }
        Some(entry)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntryStore for MemoryStore {
    async fn get(&self, id: Uuid) -> Result<Option<CacheEntry>> {
        let state = self.state.read().await;
        Ok(state.entries.get(&id).cloned())
    }

    async fn find_exact(&self, key: &PromptKey) -> Result<Option<CacheEntry>> {
        let state = self.state.read().await;
        Ok(state
            .by_key
            .get(key)
            .and_then(|id| state.entries.get(id))
            .cloned())
    }

    async fn find_in_range(&self, query: &RangeQuery) -> Result<Vec<CacheEntry>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .values()
            .filter(|e| {
                e.user_id == query.user_id
                    && e.character_id == query.character_id
                    && e.language_code() == query.language_code
                    && (query.min_level..=query.max_level).contains(&e.affinity_level())
                    && e.ttl > query.now
            })
            .cloned()
            .collect())
    }

    async fn insert(&self, entry: &CacheEntry, now: DateTime<Utc>) -> Result<()> {
        let key = entry.key();
        let mut state = self.state.write().await;

        if let Some(holder) = state.by_key.get(&key).copied() {
            let live = state
                .entries
                .get(&holder)
                .map(|existing| existing.is_live(now))
                .unwrap_or(false);
            if live {
                return Err(PromptCacheError::DuplicateKey {
                    key: key.to_string(),
                });
            }
            debug!("Replacing expired holder of {}", key);
            state.remove(&holder);
        }

        state.by_key.insert(key, entry.id);
        state.entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn compare_and_swap(&self, entry: &CacheEntry, expected_revision: u64) -> Result<bool> {
        let mut state = self.state.write().await;

        let Some(stored) = state.entries.get_mut(&entry.id) else {
            return Ok(false);
        };
        if stored.revision != expected_revision {
            return Ok(false);
        }
        if stored.key() != entry.key() {
            return Err(PromptCacheError::QueryError(format!(
                "compare_and_swap may not move {} to {}",
                stored.key(),
                entry.key()
            )));
        }

        *stored = entry.clone();
        stored.revision = expected_revision + 1;
        Ok(true)
    }

    async fn delete_matching(&self, filter: &DeleteFilter) -> Result<usize> {
        let mut state = self.state.write().await;

        let doomed: Vec<Uuid> = state
            .entries
            .values()
            .filter(|e| filter.matches(e))
            .map(|e| e.id)
            .collect();

        for id in &doomed {
            state.remove(id);
        }

        Ok(doomed.len())
    }

    async fn used_since(&self, since: DateTime<Utc>) -> Result<Vec<CacheEntry>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .values()
            .filter(|e| e.last_used >= since)
            .cloned()
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        let state = self.state.read().await;
        Ok(state.entries.len())
    }
}
