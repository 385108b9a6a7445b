#![deny(unused)]
//! Core types, traits, and error definitions for AgentHub.
//!
//! This crate provides the foundational building blocks shared across the
//! coordination layer: the context entry data model, the configuration
//! objects injected at construction, and the backend traits implemented
//! by the `agent_hub_context` crate.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::*;
pub use types::*;
