//! Conflict resolution for concurrent writes.
//!
//! Only invoked when a prior entry exists for the full key; the first
//! write to a key always succeeds. `None` rejects the write and leaves
//! the existing entry untouched.

use std::sync::Arc;

use agent_hub_core::config::AgentDirectory;
use agent_hub_core::{ConflictStrategy, ContextEntry};
use serde_json::Value;

/// Adjudicates an incoming value against the existing entry.
#[derive(Clone)]
pub struct ConflictResolver {
    directory: Arc<AgentDirectory>,
}

impl ConflictResolver {
    pub fn new(directory: Arc<AgentDirectory>) -> Self {
        Self { directory }
    }

    /// Returns the accepted value, or `None` to reject the write.
    pub fn resolve(
        &self,
        existing: &ContextEntry,
        incoming: Value,
        writer: &str,
        strategy: ConflictStrategy,
    ) -> Option<Value> {
        match strategy {
            ConflictStrategy::LastWriterWins => Some(incoming),
            ConflictStrategy::VersionBased { expected } => {
                // Optimistic concurrency: the write is valid only if the
                // caller saw the current version.
                if expected == existing.version {
                    Some(incoming)
                } else {
                    tracing::debug!(
                        key = %existing.full_key(),
                        expected,
                        actual = existing.version,
                        "Stale version, write rejected"
                    );
                    None
                }
            }
            ConflictStrategy::AgentPriority => {
                let writer_rank = self.directory.rank(writer);
                let owner_rank = self.directory.rank(&existing.owner_agent);
                if writer_rank <= owner_rank {
                    Some(incoming)
                } else {
                    tracing::debug!(
                        key = %existing.full_key(),
                        writer = writer,
                        writer_rank,
                        owner_rank,
                        "Lower-priority writer, write rejected"
                    );
                    None
                }
            }
            ConflictStrategy::Merge => Some(shallow_merge(&existing.value, incoming)),
        }
    }
}

/// Shallow-merge incoming over existing when both are JSON objects;
/// otherwise last-writer-wins.
fn shallow_merge(existing: &Value, incoming: Value) -> Value {
    match (existing, incoming) {
        (Value::Object(base), Value::Object(overlay)) => {
            let mut merged = base.clone();
            for (k, v) in overlay {
                merged.insert(k, v);
            }
            Value::Object(merged)
        }
        (_, incoming) => incoming,
    }
}
