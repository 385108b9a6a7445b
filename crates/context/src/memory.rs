//! In-memory durable store over DashMap.
//!
//! Suitable for tests and single-process development; production
//! deployments use the SQLite backend.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use agent_hub_core::{ContextEntry, ContextFilter, DurableStore, Result};

/// DashMap-backed authoritative store, keyed by full key.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: DashMap<String, ContextEntry>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DurableStore for InMemoryBackend {
    async fn upsert(&self, entry: &ContextEntry) -> Result<()> {
        self.entries.insert(entry.full_key(), entry.clone());
        Ok(())
    }

    async fn find_one(&self, full_key: &str) -> Result<Option<ContextEntry>> {
        Ok(self.entries.get(full_key).map(|r| r.clone()))
    }

    async fn delete_one(&self, full_key: &str) -> Result<bool> {
        Ok(self.entries.remove(full_key).is_some())
    }

    async fn query(&self, filter: &ContextFilter) -> Result<Vec<ContextEntry>> {
        let now = Utc::now();
        Ok(self
            .entries
            .iter()
            .filter(|r| filter.matches(r.value(), now))
            .map(|r| r.value().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_hub_core::{new_entry, AccessLevel, ContextScope, DataType};
    use serde_json::json;

    fn entry(key: &str, scope: ContextScope, owner: &str) -> ContextEntry {
        new_entry(
            key,
            json!({"k": key}),
            scope,
            DataType::State,
            AccessLevel::Public,
            owner,
            None,
        )
    }

    #[tokio::test]
    async fn test_upsert_find_delete() {
        let store = InMemoryBackend::new();
        let e = entry("task", ContextScope::Workflow, "planner");

        store.upsert(&e).await.unwrap();
        let found = store.find_one("workflow:task").await.unwrap().unwrap();
        assert_eq!(found.key, "task");

        assert!(store.delete_one("workflow:task").await.unwrap());
        assert!(!store.delete_one("workflow:task").await.unwrap());
        assert!(store.find_one("workflow:task").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let store = InMemoryBackend::new();
        let mut e = entry("task", ContextScope::Workflow, "planner");
        store.upsert(&e).await.unwrap();

        e.value = json!("v2");
        e.version = 2;
        store.upsert(&e).await.unwrap();

        assert_eq!(store.len(), 1);
        let found = store.find_one("workflow:task").await.unwrap().unwrap();
        assert_eq!(found.version, 2);
    }

    #[tokio::test]
    async fn test_query_filters() {
        let store = InMemoryBackend::new();
        store.upsert(&entry("a1", ContextScope::User, "x")).await.unwrap();
        store.upsert(&entry("a2", ContextScope::User, "y")).await.unwrap();
        store.upsert(&entry("b1", ContextScope::Global, "x")).await.unwrap();

        let filter = ContextFilter {
            scope: Some(ContextScope::User),
            owner_agent: Some("x".into()),
            ..Default::default()
        };
        let results = store.query(&filter).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, "a1");

        let filter = ContextFilter {
            key_pattern: Some("a*".into()),
            ..Default::default()
        };
        assert_eq!(store.query(&filter).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_query_excludes_expired() {
        let store = InMemoryBackend::new();
        let mut e = entry("gone", ContextScope::Session, "x");
        e.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        store.upsert(&e).await.unwrap();

        assert!(store.query(&ContextFilter::default()).await.unwrap().is_empty());

        let filter = ContextFilter {
            include_expired: true,
            ..Default::default()
        };
        assert_eq!(store.query(&filter).await.unwrap().len(), 1);
    }
}
