//! Change notification fan-out.
//!
//! Delivery is at-most-once and best-effort: a missed notification must
//! not break any invariant, and publish failures never fail the write
//! that produced them. The facade publishes while holding the per-key
//! write lock, so events for one full key arrive in write order; there
//! is no cross-key ordering.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use agent_hub_core::{
    key_matches, ChangeEvent, ChangeOperation, ChangePublisher, ContextEntry, ContextScope,
};

/// Callback invoked for each matching change event.
pub type ChangeCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Handle returned by `subscribe`, usable to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(Uuid);

struct Subscription {
    scope: ContextScope,
    key_pattern: String,
    agent: String,
    callback: ChangeCallback,
}

/// Local subscription registry plus an optional cross-instance
/// publisher (Redis pub/sub).
#[derive(Default)]
pub struct ChangeNotifier {
    subscriptions: DashMap<Uuid, Subscription>,
    remote: Option<Arc<dyn ChangePublisher>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a cross-instance publisher. Remote delivery failures are
    /// logged, never propagated.
    pub fn with_remote(mut self, remote: Arc<dyn ChangePublisher>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Register a callback for entries in `scope` whose bare key matches
    /// `key_pattern` (`*` suffix for prefix match).
    pub fn subscribe(
        &self,
        key_pattern: &str,
        scope: ContextScope,
        agent: &str,
        callback: ChangeCallback,
    ) -> SubscriptionHandle {
        let id = Uuid::new_v4();
        self.subscriptions.insert(
            id,
            Subscription {
                scope,
                key_pattern: key_pattern.to_string(),
                agent: agent.to_string(),
                callback,
            },
        );
        tracing::debug!(
            agent = agent,
            scope = %scope,
            pattern = key_pattern,
            "Change subscription created"
        );
        SubscriptionHandle(id)
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.subscriptions.remove(&handle.0).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Publish an entry lifecycle event to matching subscribers and, if
    /// configured, to the remote channel. Never returns an error.
    pub async fn publish(&self, entry: &ContextEntry, operation: ChangeOperation) {
        let event = ChangeEvent::for_entry(entry, operation);

        for sub in self.subscriptions.iter() {
            if sub.scope == event.scope && key_matches(&sub.key_pattern, &event.key) {
                (sub.callback)(&event);
                tracing::trace!(
                    agent = %sub.agent,
                    key = %event.key,
                    operation = %operation,
                    "Change event delivered"
                );
            }
        }

        if let Some(ref remote) = self.remote {
            if let Err(e) = remote.publish(&event).await {
                tracing::warn!(
                    key = %entry.full_key(),
                    operation = %operation,
                    error = %e,
                    "Failed to publish change notification"
                );
            }
        }
    }
}
