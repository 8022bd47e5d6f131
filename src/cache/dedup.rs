//! Write path: insert a generated prompt or fold it into the exact-key holder
//!
//! The find-then-insert sequence is only an optimisation. The store's unique
//! key rejects a losing concurrent insert, and that rejection is retried as a
//! fold. Folds are compare-and-swap writes, so a concurrent hit or fold on the
//! same row forces a re-read instead of a lost update.

use crate::cache::entry::{CacheEntry, PromptCandidate};
use crate::cache::lifecycle::Lifecycle;
use crate::cache::store::EntryStore;
use crate::cache::types::{PromptKey, UpsertOutcome};
use crate::error::{PromptCacheError, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// Write-side predicate. Exact on all four key fields; lookups use a range.
pub fn matches_exact(entry: &CacheEntry, key: &PromptKey) -> bool {
    entry.user_id == key.user_id
        && entry.character_id == key.character_id
        && entry.affinity_level() == key.affinity_level
        && entry.language_code() == key.language_code
}

/// What an upsert did
#[derive(Debug, Clone)]
pub struct UpsertReport {
    pub outcome: UpsertOutcome,

    /// The row as persisted
    pub entry: CacheEntry,

    /// Duplicate-key rejections and lost compare-and-swaps along the way
    pub conflicts: u32,
}

/// Enforces one live entry per exact key
pub struct DedupEngine {
    store: Arc<dyn EntryStore>,
    lifecycle: Lifecycle,
    max_retries: u32,
}

impl DedupEngine {
    pub fn new(store: Arc<dyn EntryStore>, lifecycle: Lifecycle, max_retries: u32) -> Self {
        Self {
            store,
            lifecycle,
            max_retries,
        }
    }

    /// Persist `candidate`, folding into a live exact-key holder when there is one
    pub async fn upsert(&self, candidate: PromptCandidate, now: DateTime<Utc>) -> Result<UpsertReport> {
        candidate.validate()?;

        let key = candidate.key();
        let mut conflicts = 0;

        for attempt in 0..=self.max_retries {
            let holder = self
                .store
                .find_exact(&key)
                .await?
                .filter(|e| matches_exact(e, &key) && e.is_live(now));

            match holder {
                Some(existing) => {
                    let folded = self.lifecycle.record_generation(&existing, &candidate, now);
                    folded.validate()?;

                    if self.store.compare_and_swap(&folded, existing.revision).await? {
                        debug!("Folded regenerated prompt into {} ({})", key, existing.id);
                        let mut entry = folded;
                        entry.revision = existing.revision + 1;
                        return Ok(UpsertReport {
                            outcome: UpsertOutcome::FoldedIntoExisting,
                            entry,
                            conflicts,
                        });
                    }

                    conflicts += 1;
                    debug!("Fold on {} lost a revision race (attempt {})", key, attempt + 1);
                }
                None => {
                    let entry = self.lifecycle.new_entry(candidate.clone(), now);
                    entry.validate()?;

                    match self.store.insert(&entry, now).await {
                        Ok(()) => {
                            debug!("Inserted prompt for {} ({})", key, entry.id);
                            return Ok(UpsertReport {
                                outcome: UpsertOutcome::Inserted,
                                entry,
                                conflicts,
                            });
                        }
                        Err(PromptCacheError::DuplicateKey { .. }) => {
                            // Lost the insert race; retry as a fold against the winner
                            conflicts += 1;
                            debug!("Concurrent insert won for {}, retrying as fold", key);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        warn!(
            "Giving up on {} after {} conflicting attempts",
            key,
            self.max_retries + 1
        );
        Err(PromptCacheError::WriteContention {
            attempts: self.max_retries + 1,
        })
    }
}
