//! In-process cache layer using DashMap.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use agent_hub_core::{ContextCache, ContextEntry, Result};

/// Non-authoritative mirror of hot entries, keyed by full key.
///
/// Each cached entry's TTL equals its `expires_at`; entries without an
/// expiry live until invalidated. Lookups treat a past-deadline entry as
/// a miss and purge it, so correctness holds even if the background
/// sweep never runs.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: DashMap<String, ContextEntry>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Number of mirrored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ContextCache for InMemoryCache {
    async fn get(&self, full_key: &str) -> Result<Option<ContextEntry>> {
        let expired = match self.entries.get(full_key) {
            Some(entry) if entry.is_expired() => true,
            Some(entry) => return Ok(Some(entry.clone())),
            None => return Ok(None),
        };
        if expired {
            self.entries.remove(full_key);
        }
        Ok(None)
    }

    async fn put(&self, entry: &ContextEntry) -> Result<()> {
        self.entries.insert(entry.full_key(), entry.clone());
        Ok(())
    }

    async fn invalidate(&self, full_key: &str) -> Result<()> {
        self.entries.remove(full_key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            tracing::debug!(purged, "Expired cache entries swept");
        }
        Ok(purged)
    }
}
