//! Backend traits for the coordination layer.
//!
//! The durable store is authoritative; the cache is a non-authoritative
//! mirror; the change publisher is fire-and-forget. Implementations live
//! in `agent_hub_context` and can be swapped (in-memory, SQLite, Redis)
//! without touching the facade.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ChangeEvent, ContextEntry, ContextFilter};

/// Authoritative persistence for context entries, keyed by full key.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Insert or replace the entry under its full key.
    async fn upsert(&self, entry: &ContextEntry) -> Result<()>;

    /// Fetch by full key. Returns whatever is physically present,
    /// expired or not; callers judge expiry.
    async fn find_one(&self, full_key: &str) -> Result<Option<ContextEntry>>;

    /// Delete by full key. Returns whether anything was removed.
    async fn delete_one(&self, full_key: &str) -> Result<bool>;

    /// Filtered scan. Expired entries are excluded unless the filter
    /// asks for them.
    async fn query(&self, filter: &ContextFilter) -> Result<Vec<ContextEntry>>;
}

/// Low-latency mirror of hot entries. Never authoritative: a miss or a
/// cache backend failure always falls through to the durable store.
#[async_trait]
pub trait ContextCache: Send + Sync {
    /// Look up by full key. Entries past their TTL are treated as
    /// misses and purged.
    async fn get(&self, full_key: &str) -> Result<Option<ContextEntry>>;

    /// Mirror an entry. The cache TTL equals the entry's `expires_at`.
    async fn put(&self, entry: &ContextEntry) -> Result<()>;

    /// Drop a mirrored entry.
    async fn invalidate(&self, full_key: &str) -> Result<()>;

    /// Purge expired entries; returns how many were removed. Called by
    /// the background sweep. Correctness never depends on this running.
    async fn purge_expired(&self) -> Result<usize>;
}

/// Cross-instance fan-out of change events (e.g. Redis pub/sub).
/// Failures are logged by the notifier and never fail the write.
#[async_trait]
pub trait ChangePublisher: Send + Sync {
    async fn publish(&self, event: &ChangeEvent) -> Result<()>;
}
