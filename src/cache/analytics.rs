//! Read-only usage rollups over a trailing window

use crate::cache::entry::CacheEntry;
use crate::cache::store::EntryStore;
use crate::cache::types::AffinityBand;
use crate::error::{PromptCacheError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Aggregates for one character
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterUsage {
    pub character_id: String,

    /// Sum of `use_count` across entries
    pub total_use_count: u64,

    pub avg_generation_time_ms: f64,

    /// Fraction of entries served more than once
    pub hit_rate_proxy: f64,

    pub distinct_users: usize,

    pub entry_count: usize,

    /// Entries per affinity band
    pub bands: BTreeMap<AffinityBand, usize>,
}

/// Distribution of generation times, in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationTimeSummary {
    pub min: u32,
    pub max: u32,
    pub mean: f64,
    pub p50: u32,
    pub p95: u32,
}

impl GenerationTimeSummary {
    /// Nearest-rank percentiles. Empty input yields all zeros.
    pub fn from_samples(mut samples: Vec<u32>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_unstable();

        let rank = |p: f64| -> u32 {
            let idx = ((p * samples.len() as f64).ceil() as usize).clamp(1, samples.len()) - 1;
            samples[idx]
        };

        let sum: u64 = samples.iter().map(|&s| u64::from(s)).sum();

        Self {
            min: samples[0],
            max: samples[samples.len() - 1],
            mean: sum as f64 / samples.len() as f64,
            p50: rank(0.50),
            p95: rank(0.95),
        }
    }
}

/// Snapshot report returned by `usage_stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageReport {
    pub generated_at: DateTime<Utc>,

    pub window_days: i64,

    pub total_entries: usize,

    /// Sorted by `total_use_count`, busiest first
    pub characters: Vec<CharacterUsage>,

    pub generation_time: GenerationTimeSummary,
}

impl UsageReport {
    pub fn character(&self, character_id: &str) -> Option<&CharacterUsage> {
        self.characters.iter().find(|c| c.character_id == character_id)
    }
}

#[derive(Default)]
struct Accumulator<'a> {
    total_use_count: u64,
    generation_time_sum: u64,
    reused: usize,
    entries: usize,
    users: HashSet<&'a str>,
    bands: BTreeMap<AffinityBand, usize>,
}

/// Pure aggregation over an entry snapshot
pub fn aggregate(entries: &[CacheEntry], window: Duration, now: DateTime<Utc>) -> UsageReport {
    let mut per_character: HashMap<&str, Accumulator<'_>> = HashMap::new();

    for entry in entries {
        let acc = per_character.entry(entry.character_id.as_str()).or_default();
        acc.total_use_count += u64::from(entry.use_count);
        acc.generation_time_sum += u64::from(entry.generation_time_ms);
        acc.entries += 1;
        if entry.use_count > 1 {
            acc.reused += 1;
        }
        acc.users.insert(entry.user_id.as_str());
        *acc.bands.entry(entry.affinity_band()).or_insert(0) += 1;
    }

    let mut characters: Vec<CharacterUsage> = per_character
        .into_iter()
        .map(|(character_id, acc)| CharacterUsage {
            character_id: character_id.to_string(),
            total_use_count: acc.total_use_count,
            avg_generation_time_ms: acc.generation_time_sum as f64 / acc.entries as f64,
            hit_rate_proxy: acc.reused as f64 / acc.entries as f64,
            distinct_users: acc.users.len(),
            entry_count: acc.entries,
            bands: acc.bands,
        })
        .collect();

    characters.sort_by(|a, b| {
        b.total_use_count
            .cmp(&a.total_use_count)
            .then_with(|| a.character_id.cmp(&b.character_id))
    });

    UsageReport {
        generated_at: now,
        window_days: window.num_days(),
        total_entries: entries.len(),
        characters,
        generation_time: GenerationTimeSummary::from_samples(
            entries.iter().map(|e| e.generation_time_ms).collect(),
        ),
    }
}

/// Builds usage reports from the store
pub struct UsageAnalytics {
    store: Arc<dyn EntryStore>,
}

impl UsageAnalytics {
    pub fn new(store: Arc<dyn EntryStore>) -> Self {
        Self { store }
    }

    /// Entries used within `window` of `now`. Never writes.
    pub async fn report(&self, window: Duration, now: DateTime<Utc>) -> Result<UsageReport> {
        let since = now.checked_sub_signed(window).ok_or_else(|| {
            PromptCacheError::validation("days", "analytics window reaches before the representable time range")
        })?;
        let snapshot = self.store.used_since(since).await?;
        Ok(aggregate(&snapshot, window, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::PromptCandidate;
    use crate::cache::store::MemoryStore;
    use crate::cache::types::{LanguageCode, PromptConfig, ToneStyle};

    fn entry(user: &str, character: &str, level: u8, uses: u32, gen_ms: u32, now: DateTime<Utc>) -> CacheEntry {
        let candidate = PromptCandidate {
            user_id: user.to_string(),
            character_id: character.to_string(),
            prompt_config: PromptConfig::new(level, vec![], ToneStyle::Cool, [], LanguageCode::Ko),
            system_prompt: "k".repeat(64),
            generation_time_ms: gen_ms,
            character_version: 1,
            prompt_version: 1,
        };
        let mut e = CacheEntry::from_candidate(candidate, now, Duration::days(30));
        e.use_count = uses;
        e
    }

    #[test]
    fn test_generation_time_summary() {
        let summary = GenerationTimeSummary::from_samples(vec![100, 400, 200, 300, 1000]);
        assert_eq!(summary.min, 100);
        assert_eq!(summary.max, 1000);
        assert_eq!(summary.p50, 300);
        assert_eq!(summary.p95, 1000);
        assert!((summary.mean - 400.0).abs() < f64::EPSILON);

        assert_eq!(GenerationTimeSummary::from_samples(vec![]), GenerationTimeSummary::default());
    }

    #[test]
    fn test_aggregate_per_character() {
        let now = Utc::now();
        let entries = vec![
            entry("u1", "alice", 10, 1, 1000, now),
            entry("u1", "alice", 50, 4, 3000, now),
            entry("u2", "alice", 90, 2, 2000, now),
            entry("u1", "bob", 30, 1, 500, now),
        ];

        let report = aggregate(&entries, Duration::days(30), now);

        assert_eq!(report.total_entries, 4);
        assert_eq!(report.window_days, 30);
        assert_eq!(report.characters[0].character_id, "alice");

        let alice = report.character("alice").unwrap();
        assert_eq!(alice.total_use_count, 7);
        assert_eq!(alice.entry_count, 3);
        assert_eq!(alice.distinct_users, 2);
        assert!((alice.avg_generation_time_ms - 2000.0).abs() < f64::EPSILON);
        assert!((alice.hit_rate_proxy - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(alice.bands.get(&AffinityBand::Stranger), Some(&1));
        assert_eq!(alice.bands.get(&AffinityBand::Lover), Some(&1));

        let bob = report.character("bob").unwrap();
        assert_eq!(bob.hit_rate_proxy, 0.0);
    }

    #[tokio::test]
    async fn test_report_respects_window_and_is_read_only() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let mut old = entry("u1", "alice", 10, 3, 100, now - Duration::days(45));
        old.last_used = now - Duration::days(40);
        store.insert(&old, now - Duration::days(45)).await.unwrap();
        store.insert(&entry("u2", "alice", 20, 2, 300, now), now).await.unwrap();

        let analytics = UsageAnalytics::new(store.clone());
        let report = analytics.report(Duration::days(30), now).await.unwrap();

        assert_eq!(report.total_entries, 1);
        assert_eq!(report.character("alice").unwrap().total_use_count, 2);
        assert_eq!(store.len().await.unwrap(), 2);
        assert_eq!(store.get(old.id).await.unwrap().unwrap().revision, 0);
    }

    #[tokio::test]
    async fn test_report_rejects_window_past_time_range() {
        let analytics = UsageAnalytics::new(Arc::new(MemoryStore::new()));
        let err = analytics
            .report(Duration::days(i64::from(u32::MAX)), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, PromptCacheError::Validation { field: "days", .. }));
    }
}
