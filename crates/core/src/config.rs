//! Configuration for the coordination layer.
//!
//! The priority table and access rules are read-mostly, process-wide
//! configuration: they are loaded once and injected as an immutable
//! object at construction, so tests can supply alternate tables without
//! process-wide side effects.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Top-level configuration for the context hub.
#[derive(Debug, Deserialize, Clone)]
pub struct HubConfig {
    pub store: StoreConfig,
    pub agents: AgentDirectory,
}

/// Backend and tuning knobs for the store.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// SQLite database path for the durable store. In-memory backend
    /// when unset.
    pub sqlite_path: Option<String>,
    /// Redis URL for the cache / pub-sub backend. In-process cache
    /// when unset.
    pub redis_url: Option<String>,
    /// Upper bound on any single backend round-trip, in milliseconds.
    pub operation_timeout_ms: u64,
    /// Interval of the background cache sweep, in seconds. The sweep is
    /// a performance optimization only; reads check expiry themselves.
    pub cache_sweep_interval_secs: u64,
}

impl StoreConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval_secs)
    }
}

/// Fixed, process-wide agent directory: priority ranks (lower wins) and
/// the designated validator identity for restricted security data.
#[derive(Debug, Deserialize, Clone)]
pub struct AgentDirectory {
    /// Agent id -> priority rank.
    pub priorities: HashMap<String, u32>,
    /// Sole agent allowed to touch restricted security entries.
    pub security_validator: String,
    /// Rank assumed for agents missing from the table.
    pub default_rank: u32,
}

impl AgentDirectory {
    /// Priority rank for an agent; unlisted agents get the default rank.
    pub fn rank(&self, agent: &str) -> u32 {
        self.priorities.get(agent).copied().unwrap_or(self.default_rank)
    }

    /// Whether this agent is the designated security validator.
    pub fn is_security_validator(&self, agent: &str) -> bool {
        agent == self.security_validator
    }
}

impl Default for AgentDirectory {
    fn default() -> Self {
        let priorities = [
            ("security_validator", 1),
            ("intent_router", 2),
            ("audit_agent", 3),
            ("test_agent", 4),
            ("product_architect", 5),
            ("code_engineer", 6),
            ("research_agent", 7),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            priorities,
            security_validator: "security_validator".into(),
            default_rank: 999,
        }
    }
}

impl HubConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("AGENTHUB_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map APP__STORE__REDIS_URL=... to app.store.redis_url
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                sqlite_path: None,
                redis_url: None,
                operation_timeout_ms: 5000,
                cache_sweep_interval_secs: 60,
            },
            agents: AgentDirectory::default(),
        }
    }
}
