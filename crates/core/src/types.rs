//! Shared data model for the context store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Namespace partition for keys. An entry's identity is `(scope, key)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextScope {
    /// System-wide configuration.
    Global,
    /// User-specific data.
    User,
    /// Session-specific data.
    Session,
    /// Workflow-specific data.
    Workflow,
    /// Agent-specific data.
    Agent,
}

impl ContextScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::User => "user",
            Self::Session => "session",
            Self::Workflow => "workflow",
            Self::Agent => "agent",
        }
    }
}

impl fmt::Display for ContextScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextScope {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Self::Global),
            "user" => Ok(Self::User),
            "session" => Ok(Self::Session),
            "workflow" => Ok(Self::Workflow),
            "agent" => Ok(Self::Agent),
            other => Err(crate::Error::internal(format!("unknown scope: {other}"))),
        }
    }
}

/// Category of data stored in an entry. Drives the restricted-access
/// rules independently of the entry's access level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Configuration,
    Preferences,
    State,
    History,
    Metrics,
    Security,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Preferences => "preferences",
            Self::State => "state",
            Self::History => "history",
            Self::Metrics => "metrics",
            Self::Security => "security",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "configuration" => Ok(Self::Configuration),
            "preferences" => Ok(Self::Preferences),
            "state" => Ok(Self::State),
            "history" => Ok(Self::History),
            "metrics" => Ok(Self::Metrics),
            "security" => Ok(Self::Security),
            other => Err(crate::Error::internal(format!("unknown data type: {other}"))),
        }
    }
}

/// Visibility and mutability policy on an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    /// Any agent can read and write.
    Public,
    /// Any agent can read; only the owner or a high-priority agent can write.
    Protected,
    /// Only the owner can read or write.
    Private,
    /// Access delegated to a data-type-specific rule.
    Restricted,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Protected => "protected",
            Self::Private => "private",
            Self::Restricted => "restricted",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "protected" => Ok(Self::Protected),
            "private" => Ok(Self::Private),
            "restricted" => Ok(Self::Restricted),
            other => Err(crate::Error::internal(format!("unknown access level: {other}"))),
        }
    }
}

/// Algorithm selecting the accepted value when writing over an existing
/// entry. Only consulted when a prior entry exists for the full key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictStrategy {
    /// Always accept the incoming value.
    #[default]
    LastWriterWins,
    /// Accept only if the caller's expected version matches the stored one.
    VersionBased { expected: u64 },
    /// Accept only if the writer's rank is at most the existing owner's rank.
    AgentPriority,
    /// Shallow-merge incoming over existing when both are JSON objects.
    Merge,
}

/// Intent of an access check, also recorded in the access log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessIntent {
    Read,
    Write,
}

impl fmt::Display for AccessIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// One line of an entry's append-only access log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRecord {
    pub agent: String,
    pub operation: AccessIntent,
    pub timestamp: DateTime<Utc>,
}

/// A single entry in the shared context store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Key, unique within its scope.
    pub key: String,
    /// Opaque payload.
    pub value: Value,
    pub scope: ContextScope,
    pub data_type: DataType,
    pub access_level: AccessLevel,
    /// Identity of the creating/controlling agent. Never transfers.
    pub owner_agent: String,
    /// Immutable across updates to the same full key.
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Past this instant the entry is logically absent everywhere.
    pub expires_at: Option<DateTime<Utc>>,
    /// Strictly increases by 1 per accepted write.
    pub version: u64,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    /// Append-only.
    #[serde(default)]
    pub access_log: Vec<AccessRecord>,
}

impl ContextEntry {
    /// Composite identity used for lookups, cache keys, and pub/sub routing.
    pub fn full_key(&self) -> String {
        full_key(self.scope, &self.key)
    }

    /// Whether the entry is logically absent as of `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |exp| now >= exp)
    }

    /// Whether the entry is logically absent right now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Append an access record. The log only ever grows.
    pub fn record_access(&mut self, agent: &str, operation: AccessIntent) {
        self.access_log.push(AccessRecord {
            agent: agent.to_string(),
            operation,
            timestamp: Utc::now(),
        });
    }
}

/// Render the composite `(scope, key)` identity as a storage key.
pub fn full_key(scope: ContextScope, key: &str) -> String {
    format!("{}:{}", scope.as_str(), key)
}

/// Match a subscription or query pattern against a bare key.
///
/// A trailing `*` is a prefix wildcard, a bare `*` matches everything,
/// anything else is an exact match.
pub fn key_matches(pattern: &str, key: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => pattern == key,
    }
}

/// Filter for querying the durable store.
#[derive(Debug, Clone, Default)]
pub struct ContextFilter {
    pub scope: Option<ContextScope>,
    pub data_type: Option<DataType>,
    pub owner_agent: Option<String>,
    /// Bare-key pattern, `*` suffix for prefix match.
    pub key_pattern: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    /// Expired entries are excluded unless set.
    pub include_expired: bool,
}

impl ContextFilter {
    /// Evaluate the filter against an entry, with expiry judged at `now`.
    pub fn matches(&self, entry: &ContextEntry, now: DateTime<Utc>) -> bool {
        if let Some(scope) = self.scope {
            if entry.scope != scope {
                return false;
            }
        }
        if let Some(data_type) = self.data_type {
            if entry.data_type != data_type {
                return false;
            }
        }
        if let Some(ref owner) = self.owner_agent {
            if &entry.owner_agent != owner {
                return false;
            }
        }
        if let Some(ref pattern) = self.key_pattern {
            if !key_matches(pattern, &entry.key) {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if entry.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if entry.created_at > before {
                return false;
            }
        }
        if !self.include_expired && entry.is_expired_at(now) {
            return false;
        }
        true
    }
}

/// Entry lifecycle transitions published to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Updated => f.write_str("updated"),
            Self::Deleted => f.write_str("deleted"),
        }
    }
}

/// Change notification payload. Best-effort, at-most-once; never used
/// for correctness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub operation: ChangeOperation,
    pub key: String,
    pub scope: ContextScope,
    pub data_type: DataType,
    pub owner_agent: String,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn for_entry(entry: &ContextEntry, operation: ChangeOperation) -> Self {
        Self {
            operation,
            key: entry.key.clone(),
            scope: entry.scope,
            data_type: entry.data_type,
            owner_agent: entry.owner_agent.clone(),
            version: entry.version,
            timestamp: Utc::now(),
        }
    }
}

/// Build a new first-version entry. `created_at` and `updated_at` are
/// both set to now; updates go through `ContextEntry` mutation in the
/// facade, which preserves `created_at`.
pub fn new_entry(
    key: &str,
    value: Value,
    scope: ContextScope,
    data_type: DataType,
    access_level: AccessLevel,
    owner_agent: &str,
    ttl: Option<Duration>,
) -> ContextEntry {
    let now = Utc::now();
    ContextEntry {
        key: key.to_string(),
        value,
        scope,
        data_type,
        access_level,
        owner_agent: owner_agent.to_string(),
        created_at: now,
        updated_at: now,
        expires_at: ttl.and_then(|d| chrono::Duration::from_std(d).ok().map(|d| now + d)),
        version: 1,
        metadata: serde_json::Map::new(),
        access_log: Vec::new(),
    }
}
