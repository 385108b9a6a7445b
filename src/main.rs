#![deny(unused)]
//! AgentHub - shared context store for multi-agent coordination.
//!
//! Wires the configured backends (SQLite + Redis when available,
//! in-process otherwise) behind the shared context store facade and
//! serves until interrupted.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_hub_context::SharedContextStore;
use agent_hub_core::config::HubConfig;
use agent_hub_core::{AccessLevel, ConflictStrategy, ContextScope, DataType};

fn configure_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,agent_hub=debug".into()),
    );
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    configure_tracing();

    tracing::info!("Starting AgentHub v{}", env!("CARGO_PKG_VERSION"));

    let config = match HubConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load configuration; using defaults");
            HubConfig::default()
        }
    };
    tracing::info!(
        sqlite = ?config.store.sqlite_path,
        redis = ?config.store.redis_url,
        "Configuration loaded"
    );

    let store = Arc::new(SharedContextStore::from_config(&config)?);
    store.initialize();

    // Publish the hub's own startup marker so peers can observe it.
    store
        .set(
            "hub_started_at",
            serde_json::json!(chrono::Utc::now().to_rfc3339()),
            ContextScope::Global,
            DataType::State,
            AccessLevel::Public,
            "agent_hub",
            None,
            ConflictStrategy::LastWriterWins,
        )
        .await?;

    tracing::info!("AgentHub ready; press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    store.shutdown().await;
    Ok(())
}
