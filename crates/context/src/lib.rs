#![deny(unused)]
//! Shared context store for multi-agent coordination.
//!
//! This crate is the coordination layer through which independent agents
//! (planners, risk analysts, security validators, strategists) read and
//! write a common pool of facts. The [`SharedContextStore`] facade is the
//! sole public entry point: it authorizes every operation, adjudicates
//! concurrent writes, keeps a non-authoritative cache in front of the
//! durable store, and publishes change events to subscribers.
//!
//! Writes to the same full key are linearized through a per-key async
//! lock; unrelated keys never serialize against each other. Every backend
//! round-trip is bounded by a timeout, and an unreachable backend is
//! surfaced as an error, never as an absent key.

pub mod access;
pub mod cache;
pub mod conflict;
pub mod memory;
pub mod notify;
pub mod redis_store;
pub mod sqlite;
pub mod transaction;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::task::JoinHandle;

use agent_hub_core::config::{AgentDirectory, HubConfig};
use agent_hub_core::{
    full_key, AccessIntent, AccessLevel, ChangeOperation, ChangePublisher, ConflictStrategy,
    ContextCache, ContextEntry, ContextFilter, ContextScope, DataType, DurableStore, Error,
    Result,
};

pub use access::AccessController;
pub use cache::InMemoryCache;
pub use conflict::ConflictResolver;
pub use memory::InMemoryBackend;
pub use notify::{ChangeCallback, ChangeNotifier, SubscriptionHandle};
pub use redis_store::{RedisCache, RedisChangePublisher};
pub use sqlite::SqliteBackend;
pub use transaction::{CommitReport, ContextTransaction};

/// The sole public entry point to the shared context store.
pub struct SharedContextStore {
    durable: Arc<dyn DurableStore>,
    cache: Arc<dyn ContextCache>,
    access: AccessController,
    resolver: ConflictResolver,
    notifier: ChangeNotifier,
    /// Per-full-key write locks: writers to the same key serialize,
    /// unrelated keys run in parallel.
    write_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    op_timeout: Duration,
    sweep_interval: Duration,
    sweep_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SharedContextStore {
    /// Create a store over the given backends and agent directory.
    pub fn new(
        durable: Arc<dyn DurableStore>,
        cache: Arc<dyn ContextCache>,
        directory: AgentDirectory,
    ) -> Self {
        let directory = Arc::new(directory);
        Self {
            durable,
            cache,
            access: AccessController::new(directory.clone()),
            resolver: ConflictResolver::new(directory),
            notifier: ChangeNotifier::new(),
            write_locks: DashMap::new(),
            op_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(60),
            sweep_task: std::sync::Mutex::new(None),
        }
    }

    /// Wire backends from configuration: SQLite + Redis when configured,
    /// in-process implementations otherwise.
    pub fn from_config(config: &HubConfig) -> Result<Self> {
        let durable: Arc<dyn DurableStore> = match &config.store.sqlite_path {
            Some(path) => Arc::new(SqliteBackend::new(path)?),
            None => Arc::new(InMemoryBackend::new()),
        };

        let mut store = match &config.store.redis_url {
            Some(url) => {
                let cache: Arc<dyn ContextCache> = Arc::new(RedisCache::new(url, "ctx")?);
                Self::new(durable, cache, config.agents.clone())
                    .with_remote_publisher(Arc::new(RedisChangePublisher::new(url)?))
            }
            None => {
                let cache: Arc<dyn ContextCache> = Arc::new(InMemoryCache::new());
                Self::new(durable, cache, config.agents.clone())
            }
        };
        store.op_timeout = config.store.operation_timeout();
        store.sweep_interval = config.store.cache_sweep_interval();
        Ok(store)
    }

    /// Attach a cross-instance change publisher.
    pub fn with_remote_publisher(mut self, remote: Arc<dyn ChangePublisher>) -> Self {
        self.notifier = std::mem::take(&mut self.notifier).with_remote(remote);
        self
    }

    /// Bound every backend round-trip by this timeout.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    /// Interval of the background cache sweep.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Start the background cache sweep. Idempotent. The sweep is a
    /// performance optimization only; every read checks expiry itself.
    pub fn initialize(&self) {
        let mut guard = self.sweep_task.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let cache = self.cache.clone();
        let interval = self.sweep_interval;
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = cache.purge_expired().await {
                    tracing::warn!(error = %e, "Cache sweep failed");
                }
            }
        }));
        tracing::info!("Shared context store initialized");
    }

    /// Stop the background sweep. No background task outlives this call.
    pub async fn shutdown(&self) {
        let handle = self.sweep_task.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        tracing::info!("Shared context store shut down");
    }

    /// Write a value, creating the entry on first write and reconciling
    /// against the existing entry otherwise.
    ///
    /// Returns `false` when access control denies the write or the
    /// conflict strategy rejects it; the existing entry is untouched.
    #[allow(clippy::too_many_arguments)]
    pub async fn set(
        &self,
        key: &str,
        value: Value,
        scope: ContextScope,
        data_type: DataType,
        access_level: AccessLevel,
        owner_agent: &str,
        ttl: Option<Duration>,
        strategy: ConflictStrategy,
    ) -> Result<bool> {
        let fk = full_key(scope, key);
        let lock = self.write_lock(&fk);
        let _guard = lock.lock().await;

        // Snapshot read immediately before the write attempt. An expired
        // entry is logically absent: the write starts a fresh lifecycle.
        let existing = self
            .timed_read("durable store read", self.durable.find_one(&fk))
            .await?
            .filter(|e| !e.is_expired());

        let now = Utc::now();
        let expires_at = ttl.and_then(|d| chrono::Duration::from_std(d).ok().map(|d| now + d));

        let (operation, mut entry) = match existing {
            Some(existing) => {
                if !self.access.allows(owner_agent, &existing, AccessIntent::Write) {
                    self.audit_denial(owner_agent, &existing, AccessIntent::Write);
                    return Ok(false);
                }
                let Some(accepted) =
                    self.resolver.resolve(&existing, value, owner_agent, strategy)
                else {
                    tracing::info!(key = %fk, agent = owner_agent, "Conflict resolution rejected update");
                    return Ok(false);
                };
                let entry = ContextEntry {
                    key: existing.key,
                    value: accepted,
                    scope,
                    data_type,
                    access_level,
                    // Ownership never transfers.
                    owner_agent: existing.owner_agent,
                    created_at: existing.created_at,
                    updated_at: now,
                    expires_at,
                    version: existing.version + 1,
                    metadata: existing.metadata,
                    access_log: existing.access_log,
                };
                (ChangeOperation::Updated, entry)
            }
            None => {
                let mut entry = agent_hub_core::new_entry(
                    key,
                    value,
                    scope,
                    data_type,
                    access_level,
                    owner_agent,
                    None,
                );
                entry.expires_at = expires_at;
                (ChangeOperation::Created, entry)
            }
        };
        entry.record_access(owner_agent, AccessIntent::Write);

        self.timed_write("durable store write", self.durable.upsert(&entry))
            .await?;

        // Cache is non-authoritative: a failed mirror must not fail the
        // write, but the stale slot has to go.
        if let Err(e) = self.cache.put(&entry).await {
            tracing::warn!(key = %fk, error = %e, "Cache update failed; invalidating");
            let _ = self.cache.invalidate(&fk).await;
        }

        self.notifier.publish(&entry, operation).await;

        tracing::info!(
            key = %fk,
            agent = owner_agent,
            version = entry.version,
            "Context entry set"
        );
        Ok(true)
    }

    /// Read a value. Probes the cache first, falls back to the durable
    /// store on a miss, and re-applies access control regardless of the
    /// source. Does not touch the access log.
    pub async fn get(
        &self,
        key: &str,
        scope: ContextScope,
        requesting_agent: &str,
    ) -> Result<Option<Value>> {
        let fk = full_key(scope, key);
        match self.lookup(&fk).await? {
            Some(entry) => {
                if !self.access.allows(requesting_agent, &entry, AccessIntent::Read) {
                    self.audit_denial(requesting_agent, &entry, AccessIntent::Read);
                    return Ok(None);
                }
                Ok(Some(entry.value))
            }
            None => Ok(None),
        }
    }

    /// Read a complete entry with metadata, appending a read record to
    /// its access log.
    pub async fn get_entry(
        &self,
        key: &str,
        scope: ContextScope,
        requesting_agent: &str,
    ) -> Result<Option<ContextEntry>> {
        let fk = full_key(scope, key);
        // Serialize with writers so the appended log line cannot be lost
        // to a concurrent write of the same key.
        let lock = self.write_lock(&fk);
        let _guard = lock.lock().await;

        let Some(mut entry) = self
            .timed_read("durable store read", self.durable.find_one(&fk))
            .await?
            .filter(|e| !e.is_expired())
        else {
            return Ok(None);
        };

        if !self.access.allows(requesting_agent, &entry, AccessIntent::Read) {
            self.audit_denial(requesting_agent, &entry, AccessIntent::Read);
            return Ok(None);
        }

        entry.record_access(requesting_agent, AccessIntent::Read);
        // Reads are not writes: the version does not change. The log
        // write-back is best-effort.
        if let Err(e) = self
            .timed_write("access log write-back", self.durable.upsert(&entry))
            .await
        {
            tracing::warn!(key = %fk, error = %e, "Access log write-back failed");
        }
        if let Err(e) = self.cache.put(&entry).await {
            tracing::debug!(key = %fk, error = %e, "Cache update failed on read");
        }

        Ok(Some(entry))
    }

    /// Delete an entry. Returns `false` when it does not exist, is
    /// expired, or the requester is not allowed to remove it.
    pub async fn delete(
        &self,
        key: &str,
        scope: ContextScope,
        requesting_agent: &str,
    ) -> Result<bool> {
        let fk = full_key(scope, key);
        let lock = self.write_lock(&fk);
        let _guard = lock.lock().await;

        let Some(existing) = self
            .timed_read("durable store read", self.durable.find_one(&fk))
            .await?
            .filter(|e| !e.is_expired())
        else {
            return Ok(false);
        };

        if !self.access.allows(requesting_agent, &existing, AccessIntent::Write) {
            self.audit_denial(requesting_agent, &existing, AccessIntent::Write);
            return Ok(false);
        }

        let removed = self
            .timed_write("durable store delete", self.durable.delete_one(&fk))
            .await?;
        if let Err(e) = self.cache.invalidate(&fk).await {
            tracing::warn!(key = %fk, error = %e, "Cache invalidation failed");
        }
        if removed {
            self.notifier.publish(&existing, ChangeOperation::Deleted).await;
            tracing::info!(key = %fk, agent = requesting_agent, "Context entry deleted");
        }
        Ok(removed)
    }

    /// Query entries by filter. Each result is independently
    /// access-checked; entries the requester may not read are dropped.
    pub async fn query(
        &self,
        filter: &ContextFilter,
        requesting_agent: &str,
    ) -> Result<Vec<ContextEntry>> {
        let entries = self
            .timed_read("durable store query", self.durable.query(filter))
            .await?;

        let total = entries.len();
        let results: Vec<ContextEntry> = entries
            .into_iter()
            .filter(|e| self.access.allows(requesting_agent, e, AccessIntent::Read))
            .collect();

        tracing::debug!(
            agent = requesting_agent,
            matched = total,
            visible = results.len(),
            "Context query executed"
        );
        Ok(results)
    }

    /// Begin a transaction whose staged operations apply through this
    /// store on commit.
    pub fn begin_transaction(self: &Arc<Self>) -> ContextTransaction {
        ContextTransaction::new(self.clone())
    }

    /// Subscribe to change events for `scope` whose bare key matches
    /// `key_pattern`.
    pub fn subscribe(
        &self,
        key_pattern: &str,
        scope: ContextScope,
        agent: &str,
        callback: ChangeCallback,
    ) -> SubscriptionHandle {
        self.notifier.subscribe(key_pattern, scope, agent, callback)
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.notifier.unsubscribe(handle)
    }

    fn write_lock(&self, fk: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.write_locks.entry(fk.to_string()).or_default().clone()
    }

    /// Cache-first lookup by full key; expired entries are absent.
    async fn lookup(&self, fk: &str) -> Result<Option<ContextEntry>> {
        match self.cache.get(fk).await {
            Ok(Some(entry)) => return Ok(Some(entry)),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(key = %fk, error = %e, "Cache read failed; falling back to durable store");
            }
        }

        let found = self
            .timed_read("durable store read", self.durable.find_one(fk))
            .await?;
        match found.filter(|e| !e.is_expired()) {
            Some(entry) => {
                if let Err(e) = self.cache.put(&entry).await {
                    tracing::debug!(key = %fk, error = %e, "Cache fill failed");
                }
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    fn audit_denial(&self, agent: &str, entry: &ContextEntry, intent: AccessIntent) {
        tracing::warn!(
            key = %entry.full_key(),
            agent = agent,
            intent = %intent,
            access_level = %entry.access_level,
            data_type = %entry.data_type,
            "Access denied"
        );
    }

    /// A read that times out means the store is unavailable, never that
    /// the key is absent.
    async fn timed_read<T>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(Error::unavailable(format!(
                "{what} timed out after {:?}",
                self.op_timeout
            ))),
        }
    }

    /// A write that times out leaves the outcome unknown; the caller
    /// must re-read. It is never silently treated as success.
    async fn timed_write<T>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(Error::timeout(format!(
                "{what} timed out after {:?}; outcome unknown, re-read required",
                self.op_timeout
            ))),
        }
    }
}
