//! Fuzzy affinity-range lookup
//!
//! Affinity drifts a few points per message, so lookups accept any live entry
//! within `tolerance` levels of the request. Among candidates the most recently
//! used wins, then the most used.

use crate::cache::entry::CacheEntry;
use crate::cache::types::{LanguageCode, RangeQuery, MAX_AFFINITY_LEVEL};
use crate::cache::store::EntryStore;
use crate::error::{PromptCacheError, Result};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

/// Inclusive level window around `level`, clamped to 0..=100
pub fn affinity_window(level: u8, tolerance: u8) -> (u8, u8) {
    let low = level.saturating_sub(tolerance);
    let high = level.saturating_add(tolerance).min(MAX_AFFINITY_LEVEL);
    (low, high)
}

/// Read-side predicate. Used only by lookups; writes match exactly.
pub fn matches_range(
    entry: &CacheEntry,
    user_id: &str,
    character_id: &str,
    affinity_level: u8,
    language_code: LanguageCode,
    tolerance: u8,
    now: DateTime<Utc>,
) -> bool {
    entry.user_id == user_id
        && entry.character_id == character_id
        && entry.language_code() == language_code
        && entry.affinity_level().abs_diff(affinity_level) <= tolerance
        && entry.ttl > now
}

/// Ordering where the preferred entry sorts first.
///
/// `last_used` desc, `use_count` desc, then closest level and id so the choice
/// never depends on store iteration order.
pub fn preference(a: &CacheEntry, b: &CacheEntry, requested_level: u8) -> Ordering {
    b.last_used
        .cmp(&a.last_used)
        .then_with(|| b.use_count.cmp(&a.use_count))
        .then_with(|| {
            a.affinity_level()
                .abs_diff(requested_level)
                .cmp(&b.affinity_level().abs_diff(requested_level))
        })
        .then_with(|| a.id.cmp(&b.id))
}

/// Pick the best candidate for `requested_level`
pub fn select_best(candidates: Vec<CacheEntry>, requested_level: u8) -> Option<CacheEntry> {
    candidates
        .into_iter()
        .min_by(|a, b| preference(a, b, requested_level))
}

/// Finds the entry to serve for a request tuple
pub struct LookupEngine {
    store: Arc<dyn EntryStore>,
    tolerance: u8,
}

impl LookupEngine {
    pub fn new(store: Arc<dyn EntryStore>, tolerance: u8) -> Self {
        Self { store, tolerance }
    }

    pub fn tolerance(&self) -> u8 {
        self.tolerance
    }

    /// Best live entry near `affinity_level`, or `None` when the caller must generate
    pub async fn find(
        &self,
        user_id: &str,
        character_id: &str,
        affinity_level: u8,
        language_code: LanguageCode,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>> {
        if affinity_level > MAX_AFFINITY_LEVEL {
            return Err(PromptCacheError::validation(
                "affinity_level",
                format!("must be at most {}, got {}", MAX_AFFINITY_LEVEL, affinity_level),
            ));
        }

        let (min_level, max_level) = affinity_window(affinity_level, self.tolerance);
        let query = RangeQuery {
            user_id: user_id.to_string(),
            character_id: character_id.to_string(),
            language_code,
            min_level,
            max_level,
            now,
        };

        let candidates: Vec<CacheEntry> = self
            .store
            .find_in_range(&query)
            .await?
            .into_iter()
            // Stores may over-fetch; the predicate is authoritative
            .filter(|e| {
                matches_range(
                    e,
                    user_id,
                    character_id,
                    affinity_level,
                    language_code,
                    self.tolerance,
                    now,
                )
            })
            .collect();

        debug!(
            "Lookup {}/{}/{}/{} window {}..={}: {} candidates",
            user_id,
            character_id,
            affinity_level,
            language_code,
            min_level,
            max_level,
            candidates.len()
        );

        Ok(select_best(candidates, affinity_level))
    }
}
