//! Neo4j-backed entry store
//!
//! Each entry is a `:PromptCacheEntry` node. Instants are stored as epoch
//! milliseconds so range predicates compare integers. Exact-key uniqueness is
//! enforced by a composite constraint, which is what turns a lost insert race
//! into [`PromptCacheError::DuplicateKey`].

use crate::cache::entry::CacheEntry;
use crate::cache::store::{DeleteFilter, EntryStore};
use crate::cache::types::{LanguageCode, MoodModifier, PromptConfig, PromptKey, RangeQuery, ToneStyle};
use crate::connection::Neo4jClient;
use crate::error::{PromptCacheError, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use neo4rs::{query, Graph, Node, Query};
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use uuid::Uuid;

const LABEL: &str = "PromptCacheEntry";

const SCHEMA_STATEMENTS: [&str; 6] = [
    "CREATE CONSTRAINT prompt_cache_entry_id IF NOT EXISTS \
     FOR (e:PromptCacheEntry) REQUIRE e.id IS UNIQUE",
    "CREATE CONSTRAINT prompt_cache_entry_key IF NOT EXISTS \
     FOR (e:PromptCacheEntry) REQUIRE (e.user_id, e.character_id, e.affinity_level, e.language_code) IS UNIQUE",
    "CREATE INDEX prompt_cache_entry_lookup IF NOT EXISTS \
     FOR (e:PromptCacheEntry) ON (e.user_id, e.character_id, e.language_code, e.affinity_level)",
    "CREATE INDEX prompt_cache_entry_version IF NOT EXISTS \
     FOR (e:PromptCacheEntry) ON (e.character_id, e.character_version)",
    "CREATE INDEX prompt_cache_entry_last_used IF NOT EXISTS \
     FOR (e:PromptCacheEntry) ON (e.last_used)",
    "CREATE INDEX prompt_cache_entry_ttl IF NOT EXISTS \
     FOR (e:PromptCacheEntry) ON (e.ttl)",
];

/// Entry store over a shared Neo4j connection pool
#[derive(Clone)]
pub struct Neo4jEntryStore {
    graph: Graph,
}

impl Neo4jEntryStore {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub fn from_client(client: &Neo4jClient) -> Self {
        Self::new(client.graph().clone())
    }

    /// Create the uniqueness constraints and indexes. Idempotent.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA_STATEMENTS {
            self.graph.run(query(statement)).await.map_err(classify)?;
        }
        info!("Prompt cache schema ensured on :{}", LABEL);
        Ok(())
    }

    async fn fetch_entries(&self, q: Query) -> Result<Vec<CacheEntry>> {
        let mut result = self.graph.execute(q).await.map_err(classify)?;

        let mut entries = Vec::new();
        while let Some(row) = result.next().await.map_err(classify)? {
            let node: Node = row
                .get("e")
                .map_err(|e| PromptCacheError::SerializationError(format!("Failed to get entry node: {}", e)))?;
            entries.push(node_to_entry(&node)?);
        }
        Ok(entries)
    }

    async fn fetch_count(&self, q: Query, column: &str) -> Result<usize> {
        let mut result = self.graph.execute(q).await.map_err(classify)?;

        match result.next().await.map_err(classify)? {
            Some(row) => {
                let count: i64 = row.get(column).map_err(|e| {
                    PromptCacheError::SerializationError(format!("Failed to get {}: {}", column, e))
                })?;
                Ok(count.max(0) as usize)
            }
            None => Ok(0),
        }
    }
}

#[async_trait]
impl EntryStore for Neo4jEntryStore {
    async fn get(&self, id: Uuid) -> Result<Option<CacheEntry>> {
        let q = query("MATCH (e:PromptCacheEntry {id: $id}) RETURN e").param("id", id.to_string());
        Ok(self.fetch_entries(q).await?.into_iter().next())
    }

    async fn find_exact(&self, key: &PromptKey) -> Result<Option<CacheEntry>> {
        let q = query(
            "MATCH (e:PromptCacheEntry {user_id: $user_id, character_id: $character_id, \
             affinity_level: $affinity_level, language_code: $language_code}) \
             RETURN e ORDER BY e.ttl DESC LIMIT 1",
        )
        .param("user_id", key.user_id.clone())
        .param("character_id", key.character_id.clone())
        .param("affinity_level", i64::from(key.affinity_level))
        .param("language_code", key.language_code.as_str());

        Ok(self.fetch_entries(q).await?.into_iter().next())
    }

    async fn find_in_range(&self, range: &RangeQuery) -> Result<Vec<CacheEntry>> {
        let q = query(
            "MATCH (e:PromptCacheEntry) \
             WHERE e.user_id = $user_id AND e.character_id = $character_id \
               AND e.language_code = $language_code \
               AND e.affinity_level >= $min_level AND e.affinity_level <= $max_level \
               AND e.ttl > $now \
             RETURN e",
        )
        .param("user_id", range.user_id.clone())
        .param("character_id", range.character_id.clone())
        .param("language_code", range.language_code.as_str())
        .param("min_level", i64::from(range.min_level))
        .param("max_level", i64::from(range.max_level))
        .param("now", range.now.timestamp_millis());

        self.fetch_entries(q).await
    }

    async fn insert(&self, entry: &CacheEntry, now: DateTime<Utc>) -> Result<()> {
        // Clearing an expired holder and creating the new node is one statement,
        // so the uniqueness constraint only ever sees live competitors.
        let q = entry_params(
            query(
                "OPTIONAL MATCH (old:PromptCacheEntry {user_id: $user_id, character_id: $character_id, \
                 affinity_level: $affinity_level, language_code: $language_code}) \
                 WHERE old.ttl <= $now \
                 DETACH DELETE old \
                 WITH count(*) AS cleared \
                 CREATE (e:PromptCacheEntry {id: $id, user_id: $user_id, character_id: $character_id, \
                   affinity_level: $affinity_level, language_code: $language_code, \
                   personality_tags: $personality_tags, tone_style: $tone_style, \
                   mood_modifiers: $mood_modifiers, system_prompt: $system_prompt, \
                   created_at: $created_at, last_used: $last_used, use_count: $use_count, ttl: $ttl, \
                   character_version: $character_version, prompt_version: $prompt_version, \
                   generation_time_ms: $generation_time_ms, revision: $revision, \
                   prompt_length: $prompt_length, compression_ratio: $compression_ratio}) \
                 RETURN e.id AS id",
            ),
            entry,
        )
        .param("id", entry.id.to_string())
        .param("created_at", entry.created_at.timestamp_millis())
        .param("revision", entry.revision as i64)
        .param("now", now.timestamp_millis());

        match self.graph.run(q).await {
            Ok(()) => {
                debug!("Created :{} {} for {}", LABEL, entry.id, entry.key());
                Ok(())
            }
            Err(e) if is_constraint_violation(&e.to_string()) => Err(PromptCacheError::DuplicateKey {
                key: entry.key().to_string(),
            }),
            Err(e) => Err(classify(e)),
        }
    }

    async fn compare_and_swap(&self, entry: &CacheEntry, expected_revision: u64) -> Result<bool> {
        // Key properties are never written here, so a swap cannot move a row
        let q = entry_params(
            query(
                "MATCH (e:PromptCacheEntry {id: $id}) \
                 WHERE e.revision = $expected_revision \
                 SET e.personality_tags = $personality_tags, e.tone_style = $tone_style, \
                     e.mood_modifiers = $mood_modifiers, e.system_prompt = $system_prompt, \
                     e.last_used = $last_used, e.use_count = $use_count, e.ttl = $ttl, \
                     e.character_version = $character_version, e.prompt_version = $prompt_version, \
                     e.generation_time_ms = $generation_time_ms, \
                     e.prompt_length = $prompt_length, e.compression_ratio = $compression_ratio, \
                     e.revision = $expected_revision + 1 \
                 RETURN count(e) AS swapped",
            ),
            entry,
        )
        .param("id", entry.id.to_string())
        .param("expected_revision", expected_revision as i64);

        Ok(self.fetch_count(q, "swapped").await? == 1)
    }

    async fn delete_matching(&self, filter: &DeleteFilter) -> Result<usize> {
        let q = match filter {
            DeleteFilter::Expired { now } => query(
                "MATCH (e:PromptCacheEntry) WHERE e.ttl < $now \
                 DETACH DELETE e RETURN count(e) AS deleted",
            )
            .param("now", now.timestamp_millis()),
            DeleteFilter::LowValue {
                now,
                unused_since,
                min_use_count,
            } => query(
                "MATCH (e:PromptCacheEntry) \
                 WHERE e.last_used < $unused_since OR e.ttl < $now OR e.use_count < $min_use_count \
                 DETACH DELETE e RETURN count(e) AS deleted",
            )
            .param("now", now.timestamp_millis())
            .param("unused_since", unused_since.timestamp_millis())
            .param("min_use_count", i64::from(*min_use_count)),
            DeleteFilter::CharacterVersion {
                character_id,
                version,
            } => query(
                "MATCH (e:PromptCacheEntry {character_id: $character_id, character_version: $version}) \
                 DETACH DELETE e RETURN count(e) AS deleted",
            )
            .param("character_id", character_id.clone())
            .param("version", i64::from(*version)),
        };

        self.fetch_count(q, "deleted").await
    }

    async fn used_since(&self, since: DateTime<Utc>) -> Result<Vec<CacheEntry>> {
        let q = query("MATCH (e:PromptCacheEntry) WHERE e.last_used >= $since RETURN e")
            .param("since", since.timestamp_millis());
        self.fetch_entries(q).await
    }

    async fn len(&self) -> Result<usize> {
        self.fetch_count(query("MATCH (e:PromptCacheEntry) RETURN count(e) AS total"), "total")
            .await
    }
}

/// Bind the key and payload properties shared by insert and swap
fn entry_params(q: Query, entry: &CacheEntry) -> Query {
    let config = &entry.prompt_config;
    let moods: Vec<String> = config
        .mood_modifiers
        .iter()
        .map(|m| m.as_str().to_string())
        .collect();

    q.param("user_id", entry.user_id.clone())
        .param("character_id", entry.character_id.clone())
        .param("affinity_level", i64::from(config.affinity_level))
        .param("language_code", config.language_code.as_str())
        .param("personality_tags", config.personality_tags.clone())
        .param("tone_style", config.tone_style.as_str())
        .param("mood_modifiers", moods)
        .param("system_prompt", entry.system_prompt.clone())
        .param("last_used", entry.last_used.timestamp_millis())
        .param("use_count", i64::from(entry.use_count))
        .param("ttl", entry.ttl.timestamp_millis())
        .param("character_version", i64::from(entry.character_version))
        .param("prompt_version", i64::from(entry.prompt_version))
        .param("generation_time_ms", i64::from(entry.generation_time_ms))
        .param("prompt_length", i64::from(entry.prompt_length()))
        .param("compression_ratio", entry.compression_ratio())
}

fn prop<T: DeserializeOwned>(node: &Node, key: &str) -> Result<T> {
    node.get(key)
        .map_err(|e| PromptCacheError::SerializationError(format!("Failed to get {}: {}", key, e)))
}

fn int_prop<T: TryFrom<i64>>(node: &Node, key: &str) -> Result<T> {
    let raw: i64 = prop(node, key)?;
    T::try_from(raw)
        .map_err(|_| PromptCacheError::SerializationError(format!("{} out of range: {}", key, raw)))
}

fn instant_prop(node: &Node, key: &str) -> Result<DateTime<Utc>> {
    let millis: i64 = prop(node, key)?;
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| PromptCacheError::SerializationError(format!("Invalid {} timestamp: {}", key, millis)))
}

fn node_to_entry(node: &Node) -> Result<CacheEntry> {
    let id: String = prop(node, "id")?;
    let id = Uuid::parse_str(&id)
        .map_err(|e| PromptCacheError::SerializationError(format!("Invalid entry id {}: {}", id, e)))?;

    let tone: String = prop(node, "tone_style")?;
    let language: String = prop(node, "language_code")?;
    let moods: Vec<String> = prop(node, "mood_modifiers")?;

    let prompt_config = PromptConfig {
        affinity_level: int_prop(node, "affinity_level")?,
        personality_tags: prop(node, "personality_tags")?,
        tone_style: tone.parse::<ToneStyle>()?,
        mood_modifiers: moods
            .iter()
            .map(|m| m.parse::<MoodModifier>())
            .collect::<Result<_>>()?,
        language_code: language.parse::<LanguageCode>()?,
    };

    Ok(CacheEntry {
        id,
        user_id: prop(node, "user_id")?,
        character_id: prop(node, "character_id")?,
        prompt_config,
        system_prompt: prop(node, "system_prompt")?,
        created_at: instant_prop(node, "created_at")?,
        last_used: instant_prop(node, "last_used")?,
        use_count: int_prop(node, "use_count")?,
        ttl: instant_prop(node, "ttl")?,
        character_version: int_prop(node, "character_version")?,
        prompt_version: int_prop(node, "prompt_version")?,
        generation_time_ms: int_prop(node, "generation_time_ms")?,
        revision: int_prop(node, "revision")?,
        prompt_length: int_prop(node, "prompt_length")?,
        compression_ratio: prop(node, "compression_ratio")?,
    })
}

/// Server failure code raised by the composite key constraint
fn is_constraint_violation(message: &str) -> bool {
    message.contains("Neo.ClientError.Schema.ConstraintValidationFailed")
}

/// Transport-level failures; everything else reached the server
fn is_connection_failure(err: &neo4rs::Error) -> bool {
    matches!(err, neo4rs::Error::IOError { .. } | neo4rs::Error::ConnectionError)
}

/// Map a driver error onto the cache's error surface
fn classify(err: neo4rs::Error) -> PromptCacheError {
    if is_connection_failure(&err) {
        PromptCacheError::StoreUnavailable(err.to_string())
    } else {
        PromptCacheError::QueryError(err.to_string())
    }
}
