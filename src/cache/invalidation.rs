//! Eviction and invalidation
//!
//! Three independent removal triggers, each a single bulk delete:
//! - Expiry: rows whose TTL has passed
//! - Low-value pruning: long unused, expired, or never reused
//! - Version invalidation: every row generated against a superseded
//!   character version, regardless of usage or TTL
//!
//! All of them are idempotent and safe to run next to live traffic.

use crate::cache::config::CacheConfig;
use crate::cache::store::{DeleteFilter, EntryStore};
use crate::error::{PromptCacheError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Reason for cache invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Entry expired based on TTL
    Expired,

    /// Pruned as stale, expired or never reused
    LowValue { horizon_days: i64 },

    /// The character was edited
    VersionSuperseded { character_id: String, version: u32 },
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::Expired => write!(f, "TTL expired"),
            InvalidationReason::LowValue { horizon_days } => {
                write!(f, "low value (unused for {} days, expired or never reused)", horizon_days)
            }
            InvalidationReason::VersionSuperseded {
                character_id,
                version,
            } => write!(f, "character {} version {} superseded", character_id, version),
        }
    }
}

/// Outcome of one removal pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Reason for invalidation
    pub reason: InvalidationReason,

    /// When the invalidation occurred
    pub timestamp: DateTime<Utc>,

    /// Rows removed
    pub deleted: usize,
}

impl InvalidationEvent {
    pub fn new(reason: InvalidationReason, deleted: usize, timestamp: DateTime<Utc>) -> Self {
        Self {
            reason,
            timestamp,
            deleted,
        }
    }
}

/// Runs removal passes against the store
pub struct EvictionEngine {
    store: Arc<dyn EntryStore>,
    prune_min_use_count: u32,
}

impl EvictionEngine {
    pub fn new(store: Arc<dyn EntryStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            prune_min_use_count: config.prune_min_use_count,
        }
    }

    /// Physically delete rows with `ttl < now`
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<InvalidationEvent> {
        let deleted = self
            .store
            .delete_matching(&DeleteFilter::Expired { now })
            .await?;

        if deleted > 0 {
            info!("Purged {} expired prompt cache entries", deleted);
        }

        Ok(InvalidationEvent::new(InvalidationReason::Expired, deleted, now))
    }

    /// Delete rows unused for `horizon`, expired, or used fewer than the
    /// configured minimum. One bulk operation.
    pub async fn prune(&self, horizon: Duration, now: DateTime<Utc>) -> Result<InvalidationEvent> {
        if horizon < Duration::zero() {
            return Err(PromptCacheError::validation(
                "days_old",
                "pruning horizon must not be negative",
            ));
        }

        let unused_since = now.checked_sub_signed(horizon).ok_or_else(|| {
            PromptCacheError::validation("days_old", "pruning horizon reaches before the representable time range")
        })?;

        let filter = DeleteFilter::LowValue {
            now,
            unused_since,
            min_use_count: self.prune_min_use_count,
        };
        let deleted = self.store.delete_matching(&filter).await?;

        info!(
            "Pruned {} prompt cache entries (horizon {} days)",
            deleted,
            horizon.num_days()
        );

        Ok(InvalidationEvent::new(
            InvalidationReason::LowValue {
                horizon_days: horizon.num_days(),
            },
            deleted,
            now,
        ))
    }

    /// Hard-delete every row of `character_id` generated against `version`
    pub async fn invalidate_character_version(
        &self,
        character_id: &str,
        version: u32,
        now: DateTime<Utc>,
    ) -> Result<InvalidationEvent> {
        if character_id.trim().is_empty() {
            return Err(PromptCacheError::validation("character_id", "must not be empty"));
        }

        let deleted = self
            .store
            .delete_matching(&DeleteFilter::CharacterVersion {
                character_id: character_id.to_string(),
                version,
            })
            .await?;

        info!(
            "Invalidated {} prompt cache entries for character {} version {}",
            deleted, character_id, version
        );

        Ok(InvalidationEvent::new(
            InvalidationReason::VersionSuperseded {
                character_id: character_id.to_string(),
                version,
            },
            deleted,
            now,
        ))
    }
}
