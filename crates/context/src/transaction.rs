//! Best-effort transactions.
//!
//! Operations are buffered until `commit`, then applied in submission
//! order through the facade, where each one passes access control and
//! conflict resolution again. If a staged operation is denied or errors,
//! application stops; prior operations are NOT undone. The report names
//! how far the commit got so callers can reconcile.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use agent_hub_core::{AccessLevel, ConflictStrategy, ContextScope, DataType};

use crate::SharedContextStore;

/// A buffered operation.
enum StagedOp {
    Set {
        key: String,
        value: Value,
        scope: ContextScope,
        data_type: DataType,
        access_level: AccessLevel,
        owner_agent: String,
        ttl: Option<Duration>,
        strategy: ConflictStrategy,
    },
    Delete {
        key: String,
        scope: ContextScope,
        requesting_agent: String,
    },
}

/// Outcome of a commit attempt.
#[derive(Debug, Clone)]
pub struct CommitReport {
    pub transaction_id: String,
    /// Whether every staged operation was applied.
    pub committed: bool,
    /// Number of operations that were applied before stopping.
    pub applied: usize,
    /// Index of the operation that was denied or errored, if any.
    pub failed_at: Option<usize>,
    /// Backend error message when the failure was not a denial.
    pub error: Option<String>,
}

/// A transaction commits or rolls back at most once; later calls are
/// no-ops reporting failure.
pub struct ContextTransaction {
    id: String,
    store: Arc<SharedContextStore>,
    ops: Vec<StagedOp>,
    finished: bool,
}

impl ContextTransaction {
    pub(crate) fn new(store: Arc<SharedContextStore>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            store,
            ops: Vec::new(),
            finished: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn staged(&self) -> usize {
        self.ops.len()
    }

    /// Buffer a set operation.
    #[allow(clippy::too_many_arguments)]
    pub fn stage_set(
        &mut self,
        key: &str,
        value: Value,
        scope: ContextScope,
        data_type: DataType,
        access_level: AccessLevel,
        owner_agent: &str,
        ttl: Option<Duration>,
        strategy: ConflictStrategy,
    ) {
        self.ops.push(StagedOp::Set {
            key: key.to_string(),
            value,
            scope,
            data_type,
            access_level,
            owner_agent: owner_agent.to_string(),
            ttl,
            strategy,
        });
    }

    /// Buffer a delete operation.
    pub fn stage_delete(&mut self, key: &str, scope: ContextScope, requesting_agent: &str) {
        self.ops.push(StagedOp::Delete {
            key: key.to_string(),
            scope,
            requesting_agent: requesting_agent.to_string(),
        });
    }

    /// Apply staged operations in order. Stops at the first denial or
    /// error; already-applied operations stay applied.
    pub async fn commit(&mut self) -> CommitReport {
        if self.finished {
            return self.noop_report();
        }
        self.finished = true;

        let mut applied = 0;
        for (index, op) in self.ops.iter().enumerate() {
            let outcome = match op {
                StagedOp::Set {
                    key,
                    value,
                    scope,
                    data_type,
                    access_level,
                    owner_agent,
                    ttl,
                    strategy,
                } => {
                    self.store
                        .set(
                            key,
                            value.clone(),
                            *scope,
                            *data_type,
                            *access_level,
                            owner_agent,
                            *ttl,
                            *strategy,
                        )
                        .await
                }
                StagedOp::Delete {
                    key,
                    scope,
                    requesting_agent,
                } => self.store.delete(key, *scope, requesting_agent).await,
            };

            match outcome {
                Ok(true) => applied += 1,
                Ok(false) => {
                    tracing::info!(
                        transaction_id = %self.id,
                        failed_at = index,
                        applied,
                        "Transaction stopped: operation denied or rejected"
                    );
                    return CommitReport {
                        transaction_id: self.id.clone(),
                        committed: false,
                        applied,
                        failed_at: Some(index),
                        error: None,
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        transaction_id = %self.id,
                        failed_at = index,
                        applied,
                        error = %e,
                        "Transaction stopped: operation errored"
                    );
                    return CommitReport {
                        transaction_id: self.id.clone(),
                        committed: false,
                        applied,
                        failed_at: Some(index),
                        error: Some(e.to_string()),
                    };
                }
            }
        }

        tracing::info!(transaction_id = %self.id, applied, "Transaction committed");
        CommitReport {
            transaction_id: self.id.clone(),
            committed: true,
            applied,
            failed_at: None,
            error: None,
        }
    }

    /// Discard all staged operations with no effect. Returns whether
    /// the rollback took place.
    pub fn rollback(&mut self) -> bool {
        if self.finished {
            return false;
        }
        self.finished = true;
        self.ops.clear();
        tracing::info!(transaction_id = %self.id, "Transaction rolled back");
        true
    }

    fn noop_report(&self) -> CommitReport {
        CommitReport {
            transaction_id: self.id.clone(),
            committed: false,
            applied: 0,
            failed_at: None,
            error: Some("transaction already finished".into()),
        }
    }
}
