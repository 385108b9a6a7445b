//! Access control rules.
//!
//! A pure predicate over `(agent, entry, intent)`. Denial is a normal
//! outcome: the facade logs it and surfaces a negative result, never an
//! error. The four access levels are fixed by the data model, so the
//! dispatch is a closed match rather than a rule registry.

use std::sync::Arc;

use agent_hub_core::config::AgentDirectory;
use agent_hub_core::{AccessIntent, AccessLevel, ContextEntry, DataType};

/// Rank at or below which an agent counts as high-priority for
/// protected writes.
const PROTECTED_WRITE_RANK: u32 = 3;

/// Rank at or below which an agent may touch restricted configuration.
const RESTRICTED_CONFIG_RANK: u32 = 2;

/// Evaluates access rules against the injected agent directory.
#[derive(Clone)]
pub struct AccessController {
    directory: Arc<AgentDirectory>,
}

impl AccessController {
    pub fn new(directory: Arc<AgentDirectory>) -> Self {
        Self { directory }
    }

    /// Whether `agent` may perform `intent` on `entry`. Pure, no I/O.
    pub fn allows(&self, agent: &str, entry: &ContextEntry, intent: AccessIntent) -> bool {
        match entry.access_level {
            AccessLevel::Public => true,
            AccessLevel::Protected => match intent {
                AccessIntent::Read => true,
                AccessIntent::Write => {
                    agent == entry.owner_agent
                        || self.directory.rank(agent) <= PROTECTED_WRITE_RANK
                }
            },
            AccessLevel::Private => agent == entry.owner_agent,
            AccessLevel::Restricted => self.allows_restricted(agent, entry),
        }
    }

    /// Restricted entries delegate to a data-type-specific rule.
    /// Unhandled data types deny by default.
    fn allows_restricted(&self, agent: &str, entry: &ContextEntry) -> bool {
        match entry.data_type {
            DataType::Security => self.directory.is_security_validator(agent),
            DataType::Configuration => self.directory.rank(agent) <= RESTRICTED_CONFIG_RANK,
            _ => false,
        }
    }
}
