//! Integration tests for the prompt cache
//!
//! These tests exercise the public `PromptCache` API over the in-memory store:
//! - Affinity-window lookup and tie-breaking
//! - Write-time dedup, including concurrent writers
//! - TTL extension
//! - Version invalidation and low-value cleanup
//! - The generate-on-miss path

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use persona_prompt_cache::cache::{
    CacheConfig, CacheEntry, CharacterDirectory, CharacterProfile, DeleteFilter, EntryStore,
    GeneratedPrompt, GenerationRequest, LanguageCode, MemoryStore, MoodModifier, PromptCache,
    PromptCandidate, PromptConfig, PromptGenerator, PromptKey, PromptSource, RangeQuery, ToneStyle,
    UpsertOutcome,
};
use persona_prompt_cache::{PromptCacheError, Result};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

fn candidate(user: &str, character: &str, level: u8, lang: LanguageCode, prompt: &str) -> PromptCandidate {
    PromptCandidate {
        user_id: user.to_string(),
        character_id: character.to_string(),
        prompt_config: PromptConfig::new(
            level,
            vec!["tsundere".to_string(), "bookish".to_string()],
            ToneStyle::Cool,
            [MoodModifier::Shy],
            lang,
        ),
        system_prompt: prompt.to_string(),
        generation_time_ms: 2400,
        character_version: 1,
        prompt_version: 1,
    }
}

fn prompt(marker: char) -> String {
    format!("You are Rin. {}", marker.to_string().repeat(60))
}

fn seeded(user: &str, level: u8, now: DateTime<Utc>) -> CacheEntry {
    CacheEntry::from_candidate(
        candidate(user, "rin", level, LanguageCode::Ja, &prompt('s')),
        now,
        Duration::days(30),
    )
}

fn cache_over(store: Arc<MemoryStore>) -> PromptCache {
    PromptCache::new(CacheConfig::default(), store).unwrap()
}

#[tokio::test]
async fn test_range_correctness() {
    let now = Utc::now();

    for stored in [0u8, 3, 22, 50, 97, 100] {
        for queried in [0u8, 2, 8, 16, 17, 22, 27, 28, 45, 55, 95, 100] {
            let store = Arc::new(MemoryStore::new());
            store.insert(&seeded("u1", stored, now), now).await.unwrap();
            let cache = cache_over(store);

            let hit = cache
                .get_prompt("u1", "rin", queried, LanguageCode::Ja)
                .await
                .unwrap()
                .is_some();

            assert_eq!(
                hit,
                stored.abs_diff(queried) <= 5,
                "stored level {} queried at {}",
                stored,
                queried
            );
        }
    }
}

#[tokio::test]
async fn test_lookup_requires_exact_identity_and_liveness() {
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();

    let mut expired = seeded("u1", 22, now - Duration::days(31));
    expired.ttl = now - Duration::seconds(1);
    store.insert(&expired, now - Duration::days(31)).await.unwrap();

    store
        .insert(
            &CacheEntry::from_candidate(
                candidate("u1", "rin", 23, LanguageCode::En, &prompt('e')),
                now,
                Duration::days(30),
            ),
            now,
        )
        .await
        .unwrap();
    store.insert(&seeded("u2", 22, now), now).await.unwrap();

    let cache = cache_over(store);

    assert!(cache.get_prompt("u1", "rin", 22, LanguageCode::Ja).await.unwrap().is_none());
    assert!(cache.get_prompt("u1", "kai", 22, LanguageCode::Ja).await.unwrap().is_none());
    assert_eq!(
        cache.get_prompt("u1", "rin", 22, LanguageCode::En).await.unwrap(),
        Some(prompt('e'))
    );
    assert!(cache.get_prompt("u2", "rin", 20, LanguageCode::Ja).await.unwrap().is_some());
}

#[tokio::test]
async fn test_tie_break_prefers_recent_then_frequent() {
    let now = Utc::now();

    // Different last_used: the more recent one wins even with fewer uses
    let store = Arc::new(MemoryStore::new());
    let mut recent = seeded("u1", 20, now);
    recent.last_used = now - Duration::hours(1);
    recent.use_count = 2;
    let mut older = seeded("u1", 24, now);
    older.last_used = now - Duration::hours(2);
    older.use_count = 9;
    store.insert(&recent, now).await.unwrap();
    store.insert(&older, now).await.unwrap();

    let served = cache_over(store).lookup("u1", "rin", 22, LanguageCode::Ja).await.unwrap().unwrap();
    assert_eq!(served.id, recent.id);

    // Equal last_used: the more used one wins
    let store = Arc::new(MemoryStore::new());
    let at = now - Duration::hours(1);
    let mut light = seeded("u1", 21, now);
    light.last_used = at;
    light.use_count = 3;
    let mut heavy = seeded("u1", 25, now);
    heavy.last_used = at;
    heavy.use_count = 7;
    store.insert(&light, now).await.unwrap();
    store.insert(&heavy, now).await.unwrap();

    let served = cache_over(store).lookup("u1", "rin", 22, LanguageCode::Ja).await.unwrap().unwrap();
    assert_eq!(served.id, heavy.id);
    assert_eq!(served.use_count, 8);
}

#[tokio::test]
async fn test_sequential_writes_keep_one_live_entry_per_key() {
    let store = Arc::new(MemoryStore::new());
    let cache = cache_over(store.clone());

    let mut outcomes = Vec::new();
    for marker in ['a', 'b', 'c'] {
        outcomes.push(
            cache
                .put_prompt(candidate("u1", "rin", 40, LanguageCode::Ja, &prompt(marker)))
                .await
                .unwrap(),
        );
    }
    // Near but not equal level is a separate row
    cache
        .put_prompt(candidate("u1", "rin", 42, LanguageCode::Ja, &prompt('d')))
        .await
        .unwrap();

    assert_eq!(
        outcomes,
        vec![
            UpsertOutcome::Inserted,
            UpsertOutcome::FoldedIntoExisting,
            UpsertOutcome::FoldedIntoExisting
        ]
    );
    assert_eq!(store.len().await.unwrap(), 2);

    let holder = store
        .find_exact(&PromptKey::new("u1", "rin", 40, LanguageCode::Ja))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(holder.system_prompt, prompt('c'));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_fold_into_one_entry() {
    let store = Arc::new(MemoryStore::new());
    let config = CacheConfig::builder().max_write_retries(16).build();
    let cache = Arc::new(PromptCache::new(config, store.clone()).unwrap());

    let markers = ['a', 'b', 'c', 'd', 'e', 'f', 'g', 'h'];
    let handles: Vec<_> = markers
        .iter()
        .map(|&marker| {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .put_prompt(candidate("u1", "rin", 60, LanguageCode::Ko, &prompt(marker)))
                    .await
            })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(handles).await;
    let outcomes: Vec<UpsertOutcome> = results
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let inserted = outcomes.iter().filter(|o| **o == UpsertOutcome::Inserted).count();
    assert_eq!(inserted, 1);
    assert_eq!(outcomes.len() - inserted, markers.len() - 1);
    assert_eq!(store.len().await.unwrap(), 1);

    let stats = cache.stats().await;
    assert_eq!(stats.inserts, 1);
    assert_eq!(stats.folds, markers.len() as u64 - 1);
}

#[tokio::test]
async fn test_ttl_extension_is_monotonic() {
    let store = Arc::new(MemoryStore::new());
    let cache = cache_over(store.clone());

    cache
        .put_prompt(candidate("u1", "rin", 70, LanguageCode::Zh, &prompt('a')))
        .await
        .unwrap();

    let mut served = None;
    for _ in 0..10 {
        served = cache.lookup("u1", "rin", 70, LanguageCode::Zh).await.unwrap();
    }
    let served = served.unwrap();
    assert_eq!(served.use_count, 11);
    assert!(served.ttl >= Utc::now() + Duration::days(60) - Duration::minutes(1));

    // A fold restarts the counter but keeps the extended lifetime
    cache
        .put_prompt(candidate("u1", "rin", 70, LanguageCode::Zh, &prompt('b')))
        .await
        .unwrap();
    let folded = store.get(served.id).await.unwrap().unwrap();
    assert_eq!(folded.use_count, 1);
    assert!(folded.ttl >= served.ttl);
}

#[tokio::test]
async fn test_invalidate_removes_only_that_version() {
    let store = Arc::new(MemoryStore::new());
    let cache = cache_over(store.clone());

    for (user, level, version) in [("u1", 10, 1), ("u2", 30, 1), ("u3", 50, 2), ("u4", 70, 1)] {
        let mut c = candidate(user, "rin", level, LanguageCode::Ja, &prompt('v'));
        c.character_version = version;
        cache.put_prompt(c).await.unwrap();
    }
    let mut other = candidate("u1", "kai", 10, LanguageCode::Ja, &prompt('k'));
    other.character_version = 1;
    cache.put_prompt(other).await.unwrap();

    let deleted = tokio_test::assert_ok!(cache.invalidate("rin", 1).await);
    assert_eq!(deleted, 3);

    let survivors = store.used_since(Utc::now() - Duration::days(1)).await.unwrap();
    assert_eq!(survivors.len(), 2);
    assert!(survivors
        .iter()
        .all(|e| !(e.character_id == "rin" && e.character_version == 1)));

    assert_eq!(cache.stats().await.invalidations, 3);
    tokio_test::assert_err!(cache.invalidate("  ", 1).await);
}

#[tokio::test]
async fn test_cleanup_removes_exactly_low_value_entries() {
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();

    let mut stale = seeded("stale", 10, now - Duration::days(50));
    stale.last_used = now - Duration::days(40);
    stale.ttl = now + Duration::days(20);
    stale.use_count = 6;

    let mut expired = seeded("expired", 10, now - Duration::days(31));
    expired.ttl = now - Duration::hours(1);
    expired.use_count = 6;

    let unused = seeded("unused", 10, now);

    let mut keep = seeded("keep", 10, now - Duration::days(10));
    keep.last_used = now - Duration::days(2);
    keep.use_count = 3;

    for entry in [&stale, &expired, &unused, &keep] {
        store.insert(entry, now).await.unwrap();
    }

    let filter = DeleteFilter::LowValue {
        now,
        unused_since: now - Duration::days(30),
        min_use_count: 2,
    };
    let expected: Vec<Uuid> = [&stale, &expired, &unused, &keep]
        .iter()
        .filter(|e| filter.matches(e))
        .map(|e| e.id)
        .collect();
    assert_eq!(expected.len(), 3);

    let cache = cache_over(store.clone());
    let deleted = cache.cleanup(Some(30)).await.unwrap();

    assert_eq!(deleted, 3);
    assert_eq!(store.len().await.unwrap(), 1);
    assert!(store.get(keep.id).await.unwrap().is_some());
    for id in expected {
        assert!(store.get(id).await.unwrap().is_none());
    }
    assert_eq!(cache.stats().await.evictions_pruned, 3);
}

#[tokio::test]
async fn test_out_of_range_arguments_are_rejected() {
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();
    store.insert(&seeded("u1", 40, now), now).await.unwrap();
    let cache = cache_over(store.clone());

    let err = cache.cleanup(Some(u32::MAX)).await.unwrap_err();
    assert!(matches!(err, PromptCacheError::Validation { field: "days_old", .. }));

    let err = cache.usage_stats(Some(u32::MAX)).await.unwrap_err();
    assert!(matches!(err, PromptCacheError::Validation { field: "days", .. }));

    let err = cache.get_prompt("u1", "rin", 200, LanguageCode::Ja).await.unwrap_err();
    assert!(matches!(err, PromptCacheError::Validation { field: "affinity_level", .. }));

    assert_eq!(store.len().await.unwrap(), 1);
    assert_eq!(cache.stats().await.evictions_pruned, 0);
    assert!(cache
        .get_prompt("u1", "rin", 40, LanguageCode::Ja)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_example_scenario() {
    let store = Arc::new(MemoryStore::new());
    let cache = cache_over(store.clone());

    // Entry A at level 22
    let a = cache
        .upsert(candidate("U", "C", 22, LanguageCode::Ja, &prompt('a')))
        .await
        .unwrap();
    assert_eq!(a.outcome, UpsertOutcome::Inserted);
    assert_eq!(a.entry.use_count, 1);

    // Same exact key, new text: folded
    let refreshed = cache
        .upsert(candidate("U", "C", 22, LanguageCode::Ja, &prompt('b')))
        .await
        .unwrap();
    assert_eq!(refreshed.outcome, UpsertOutcome::FoldedIntoExisting);
    assert_eq!(refreshed.entry.id, a.entry.id);
    assert_eq!(refreshed.entry.use_count, 1);
    assert_eq!(refreshed.entry.system_prompt, prompt('b'));

    // Level 25 is inside the window
    let hit = cache.lookup("U", "C", 25, LanguageCode::Ja).await.unwrap().unwrap();
    assert_eq!(hit.id, a.entry.id);

    // Drive use_count to 11
    let mut latest = hit;
    while latest.use_count < 11 {
        latest = cache.lookup("U", "C", 22, LanguageCode::Ja).await.unwrap().unwrap();
    }
    assert!(latest.ttl >= Utc::now() + Duration::days(60) - Duration::minutes(1));

    // Unexpired, heavily used, and still removed by invalidation
    assert_eq!(cache.invalidate("C", latest.character_version).await.unwrap(), 1);
    assert!(store.get(a.entry.id).await.unwrap().is_none());
    assert!(cache.get_prompt("U", "C", 22, LanguageCode::Ja).await.unwrap().is_none());
}

#[tokio::test]
async fn test_usage_stats_window() {
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();

    let mut old = seeded("u1", 10, now - Duration::days(60));
    old.last_used = now - Duration::days(45);
    old.ttl = now + Duration::days(10);
    store.insert(&old, now).await.unwrap();

    let cache = cache_over(store);
    cache
        .put_prompt(candidate("u2", "rin", 80, LanguageCode::Ja, &prompt('n')))
        .await
        .unwrap();
    cache.lookup("u2", "rin", 80, LanguageCode::Ja).await.unwrap();

    let report = cache.usage_stats(None).await.unwrap();
    assert_eq!(report.window_days, 30);
    assert_eq!(report.total_entries, 1);
    let rin = report.character("rin").unwrap();
    assert_eq!(rin.total_use_count, 2);
    assert_eq!(rin.hit_rate_proxy, 1.0);

    let wide = cache.usage_stats(Some(90)).await.unwrap();
    assert_eq!(wide.total_entries, 2);
    assert_eq!(wide.character("rin").unwrap().distinct_users, 2);
}

struct CountingGenerator {
    calls: AtomicU32,
}

#[async_trait]
impl PromptGenerator for CountingGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedPrompt> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(GeneratedPrompt {
            system_prompt: format!(
                "You are {} speaking {} at affinity {}. Stay in character at all times.",
                request.character_id, request.language_code, request.affinity_level
            ),
            generation_time_ms: 3100,
        })
    }
}

struct StaticDirectory;

#[async_trait]
impl CharacterDirectory for StaticDirectory {
    async fn current_profile(&self, character_id: &str) -> Result<CharacterProfile> {
        Ok(CharacterProfile {
            character_id: character_id.to_string(),
            character_version: 5,
            prompt_version: 2,
            personality_tags: vec!["gentle".to_string()],
            tone_style: ToneStyle::Gentle,
            mood_modifiers: [MoodModifier::Calm].into_iter().collect(),
        })
    }
}

#[tokio::test]
async fn test_get_or_generate_writes_back() {
    let store = Arc::new(MemoryStore::new());
    let cache = cache_over(store.clone());
    let generator = CountingGenerator {
        calls: AtomicU32::new(0),
    };

    let first = cache
        .get_or_generate("u1", "mio", 33, LanguageCode::En, &generator, &StaticDirectory)
        .await
        .unwrap();
    assert_eq!(first.source, PromptSource::Generated(UpsertOutcome::Inserted));

    let second = cache
        .get_or_generate("u1", "mio", 36, LanguageCode::En, &generator, &StaticDirectory)
        .await
        .unwrap();
    assert_eq!(second.source, PromptSource::Cache);
    assert_eq!(second.system_prompt, first.system_prompt);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);

    let stored = store
        .find_exact(&PromptKey::new("u1", "mio", 33, LanguageCode::En))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.character_version, 5);
    assert_eq!(stored.generation_time_ms, 3100);
}

/// Store whose backend is down
struct DownStore;

#[async_trait]
impl EntryStore for DownStore {
    async fn get(&self, _id: Uuid) -> Result<Option<CacheEntry>> {
        Err(PromptCacheError::StoreUnavailable("connection refused".to_string()))
    }

    async fn find_exact(&self, _key: &PromptKey) -> Result<Option<CacheEntry>> {
        Err(PromptCacheError::StoreUnavailable("connection refused".to_string()))
    }

    async fn find_in_range(&self, _query: &RangeQuery) -> Result<Vec<CacheEntry>> {
        Err(PromptCacheError::StoreUnavailable("connection refused".to_string()))
    }

    async fn insert(&self, _entry: &CacheEntry, _now: DateTime<Utc>) -> Result<()> {
        Err(PromptCacheError::StoreUnavailable("connection refused".to_string()))
    }

    async fn compare_and_swap(&self, _entry: &CacheEntry, _expected_revision: u64) -> Result<bool> {
        Err(PromptCacheError::StoreUnavailable("connection refused".to_string()))
    }

    async fn delete_matching(&self, _filter: &DeleteFilter) -> Result<usize> {
        Err(PromptCacheError::StoreUnavailable("connection refused".to_string()))
    }

    async fn used_since(&self, _since: DateTime<Utc>) -> Result<Vec<CacheEntry>> {
        Err(PromptCacheError::StoreUnavailable("connection refused".to_string()))
    }

    async fn len(&self) -> Result<usize> {
        Err(PromptCacheError::StoreUnavailable("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_store_outage_degrades_to_uncached_generation() {
    let cache = PromptCache::new(CacheConfig::default(), Arc::new(DownStore)).unwrap();
    let generator = CountingGenerator {
        calls: AtomicU32::new(0),
    };

    let served = cache
        .get_or_generate("u1", "mio", 33, LanguageCode::Ja, &generator, &StaticDirectory)
        .await
        .unwrap();
    assert_eq!(served.source, PromptSource::Uncached);
    assert!(served.system_prompt.contains("mio"));

    // Direct calls surface the outage unchanged
    let err = cache.get_prompt("u1", "mio", 33, LanguageCode::Ja).await.unwrap_err();
    assert!(err.is_store_unavailable());
    assert!(cache.cleanup(None).await.unwrap_err().is_store_unavailable());
}
