//! Redis implementations of the cache and the change publisher.

use async_trait::async_trait;
use chrono::Utc;
use redis::{AsyncCommands, Client};

use agent_hub_core::{
    ChangeEvent, ChangePublisher, ContextCache, ContextEntry, Error, Result,
};

/// Redis-backed cache layer. Entries are mirrored as JSON under
/// `{prefix}:{full_key}` with a server-side TTL derived from
/// `expires_at`, so Redis evicts expired entries on its own.
pub struct RedisCache {
    client: Client,
    prefix: String,
}

impl RedisCache {
    pub fn new(url: &str, prefix: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| Error::unavailable(format!("Failed to connect to Redis: {e}")))?;

        Ok(Self {
            client,
            prefix: prefix.to_string(),
        })
    }

    fn cache_key(&self, full_key: &str) -> String {
        format!("{}:{}", self.prefix, full_key)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::unavailable(format!("Redis connection error: {e}")))
    }
}

#[async_trait]
impl ContextCache for RedisCache {
    async fn get(&self, full_key: &str) -> Result<Option<ContextEntry>> {
        let mut conn = self.connection().await?;
        let data: Option<String> = conn
            .get(self.cache_key(full_key))
            .await
            .map_err(|e| Error::storage(format!("Redis get error: {e}")))?;

        match data {
            Some(json) => {
                let entry: ContextEntry = serde_json::from_str(&json)
                    .map_err(|e| Error::storage(format!("Failed to deserialize entry: {e}")))?;
                // The server-side TTL is coarse (whole seconds); re-check.
                if entry.is_expired() {
                    let _ = self.invalidate(full_key).await;
                    return Ok(None);
                }
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, entry: &ContextEntry) -> Result<()> {
        let mut conn = self.connection().await?;
        let key = self.cache_key(&entry.full_key());
        let json = serde_json::to_string(entry)
            .map_err(|e| Error::storage(format!("Failed to serialize entry: {e}")))?;

        match entry.expires_at {
            Some(expires_at) => {
                let ttl = (expires_at - Utc::now()).num_seconds();
                if ttl <= 0 {
                    // Already expired; never mirror it.
                    return self.invalidate(&entry.full_key()).await;
                }
                let _: () = conn
                    .set_ex(&key, json, ttl as u64)
                    .await
                    .map_err(|e| Error::storage(format!("Redis set error: {e}")))?;
            }
            None => {
                let _: () = conn
                    .set(&key, json)
                    .await
                    .map_err(|e| Error::storage(format!("Redis set error: {e}")))?;
            }
        }
        Ok(())
    }

    async fn invalidate(&self, full_key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .del(self.cache_key(full_key))
            .await
            .map_err(|e| Error::storage(format!("Redis delete error: {e}")))?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize> {
        // Redis evicts keys server-side via the TTL set in `put`.
        Ok(0)
    }
}

/// Publishes change events on `context_changes:{scope}` channels so
/// other hub instances can invalidate their caches.
pub struct RedisChangePublisher {
    client: Client,
}

impl RedisChangePublisher {
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| Error::unavailable(format!("Failed to connect to Redis: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ChangePublisher for RedisChangePublisher {
    async fn publish(&self, event: &ChangeEvent) -> Result<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::unavailable(format!("Redis connection error: {e}")))?;

        let channel = format!("context_changes:{}", event.scope.as_str());
        let payload = serde_json::to_string(event)?;
        let _: () = conn
            .publish(channel, payload)
            .await
            .map_err(|e| Error::storage(format!("Redis publish error: {e}")))?;
        Ok(())
    }
}
