//! SQLite-backed durable store.
//!
//! The connection is guarded by an async mutex and every statement runs
//! on the blocking pool. Timestamps are stored as unix milliseconds so
//! range filters and the expiry index stay plain integer comparisons.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, Row};

use agent_hub_core::{
    AccessLevel, ContextEntry, ContextFilter, ContextScope, DataType, DurableStore, Error, Result,
};

/// SQLite persistence for context entries, keyed by full key.
pub struct SqliteBackend {
    conn: Arc<tokio::sync::Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open (or create) the database at `path` and ensure the schema.
    pub fn new(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::unavailable(format!("Failed to open SQLite database: {e}")))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS context_entries (
                full_key TEXT PRIMARY KEY,
                key TEXT NOT NULL,
                scope TEXT NOT NULL,
                data_type TEXT NOT NULL,
                access_level TEXT NOT NULL,
                owner_agent TEXT NOT NULL,
                value TEXT NOT NULL,       -- JSON
                metadata TEXT NOT NULL,    -- JSON object
                access_log TEXT NOT NULL,  -- JSON array
                version INTEGER NOT NULL,
                created_at INTEGER NOT NULL, -- unix millis
                updated_at INTEGER NOT NULL,
                expires_at INTEGER           -- unix millis, NULL = never
            )",
            [],
        )
        .map_err(|e| Error::storage(format!("Schema error: {e}")))?;

        for stmt in [
            "CREATE INDEX IF NOT EXISTS idx_context_scope_type_key
                 ON context_entries (scope, data_type, key)",
            "CREATE INDEX IF NOT EXISTS idx_context_owner_created
                 ON context_entries (owner_agent, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_context_expires
                 ON context_entries (expires_at)",
        ] {
            conn.execute(stmt, [])
                .map_err(|e| Error::storage(format!("Index error: {e}")))?;
        }

        Ok(Self {
            conn: Arc::new(tokio::sync::Mutex::new(conn)),
        })
    }
}

fn parse_col<T: FromStr<Err = Error>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    text.parse().map_err(|e: Error| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<ContextEntry> {
    let value_json: String = row.get(6)?;
    let metadata_json: String = row.get(7)?;
    let access_log_json: String = row.get(8)?;
    let expires_ms: Option<i64> = row.get(12)?;

    Ok(ContextEntry {
        key: row.get(1)?,
        scope: parse_col::<ContextScope>(row, 2)?,
        data_type: parse_col::<DataType>(row, 3)?,
        access_level: parse_col::<AccessLevel>(row, 4)?,
        owner_agent: row.get(5)?,
        value: serde_json::from_str(&value_json).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
        access_log: serde_json::from_str(&access_log_json).unwrap_or_default(),
        version: row.get::<_, i64>(9)? as u64,
        created_at: millis_to_utc(row.get(10)?),
        updated_at: millis_to_utc(row.get(11)?),
        expires_at: expires_ms.map(millis_to_utc),
    })
}

const SELECT_COLUMNS: &str = "full_key, key, scope, data_type, access_level, owner_agent, \
     value, metadata, access_log, version, created_at, updated_at, expires_at";

#[async_trait]
impl DurableStore for SqliteBackend {
    async fn upsert(&self, entry: &ContextEntry) -> Result<()> {
        let conn = self.conn.clone();
        let full_key = entry.full_key();
        let entry = entry.clone();

        let value_json = serde_json::to_string(&entry.value)?;
        let metadata_json = serde_json::to_string(&entry.metadata)?;
        let access_log_json = serde_json::to_string(&entry.access_log)?;

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT OR REPLACE INTO context_entries
                     (full_key, key, scope, data_type, access_level, owner_agent,
                      value, metadata, access_log, version, created_at, updated_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    full_key,
                    entry.key,
                    entry.scope.as_str(),
                    entry.data_type.as_str(),
                    entry.access_level.as_str(),
                    entry.owner_agent,
                    value_json,
                    metadata_json,
                    access_log_json,
                    entry.version as i64,
                    entry.created_at.timestamp_millis(),
                    entry.updated_at.timestamp_millis(),
                    entry.expires_at.map(|t| t.timestamp_millis()),
                ],
            )
            .map_err(|e| Error::storage(format!("Insert error: {e}")))?;
            Ok(())
        })
        .await
        .map_err(|e| Error::internal(e.to_string()))?
    }

    async fn find_one(&self, full_key: &str) -> Result<Option<ContextEntry>> {
        let conn = self.conn.clone();
        let full_key = full_key.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM context_entries WHERE full_key = ?1"
                ))
                .map_err(|e| Error::storage(format!("Prepare error: {e}")))?;

            let mut rows = stmt
                .query_map(params![full_key], row_to_entry)
                .map_err(|e| Error::storage(format!("Query error: {e}")))?;

            match rows.next() {
                Some(row) => Ok(Some(
                    row.map_err(|e| Error::storage(format!("Row error: {e}")))?,
                )),
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| Error::internal(e.to_string()))?
    }

    async fn delete_one(&self, full_key: &str) -> Result<bool> {
        let conn = self.conn.clone();
        let full_key = full_key.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let deleted = conn
                .execute(
                    "DELETE FROM context_entries WHERE full_key = ?1",
                    params![full_key],
                )
                .map_err(|e| Error::storage(format!("Delete error: {e}")))?;
            Ok(deleted > 0)
        })
        .await
        .map_err(|e| Error::internal(e.to_string()))?
    }

    async fn query(&self, filter: &ContextFilter) -> Result<Vec<ContextEntry>> {
        let conn = self.conn.clone();
        let filter = filter.clone();

        tokio::task::spawn_blocking(move || {
            let mut sql = format!("SELECT {SELECT_COLUMNS} FROM context_entries WHERE 1=1");
            let mut args: Vec<SqlValue> = Vec::new();

            if let Some(scope) = filter.scope {
                sql.push_str(&format!(" AND scope = ?{}", args.len() + 1));
                args.push(SqlValue::Text(scope.as_str().to_string()));
            }
            if let Some(data_type) = filter.data_type {
                sql.push_str(&format!(" AND data_type = ?{}", args.len() + 1));
                args.push(SqlValue::Text(data_type.as_str().to_string()));
            }
            if let Some(ref owner) = filter.owner_agent {
                sql.push_str(&format!(" AND owner_agent = ?{}", args.len() + 1));
                args.push(SqlValue::Text(owner.clone()));
            }
            match filter.key_pattern.as_deref() {
                None | Some("*") => {}
                Some(pattern) => match pattern.strip_suffix('*') {
                    Some(prefix) => {
                        sql.push_str(&format!(" AND key LIKE ?{}", args.len() + 1));
                        args.push(SqlValue::Text(format!("{prefix}%")));
                    }
                    None => {
                        sql.push_str(&format!(" AND key = ?{}", args.len() + 1));
                        args.push(SqlValue::Text(pattern.to_string()));
                    }
                },
            }
            if let Some(after) = filter.created_after {
                sql.push_str(&format!(" AND created_at >= ?{}", args.len() + 1));
                args.push(SqlValue::Integer(after.timestamp_millis()));
            }
            if let Some(before) = filter.created_before {
                sql.push_str(&format!(" AND created_at <= ?{}", args.len() + 1));
                args.push(SqlValue::Integer(before.timestamp_millis()));
            }
            if !filter.include_expired {
                sql.push_str(&format!(
                    " AND (expires_at IS NULL OR expires_at > ?{})",
                    args.len() + 1
                ));
                args.push(SqlValue::Integer(Utc::now().timestamp_millis()));
            }

            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| Error::storage(format!("Prepare error: {e}")))?;

            let entries = stmt
                .query_map(rusqlite::params_from_iter(args), row_to_entry)
                .map_err(|e| Error::storage(format!("Query error: {e}")))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::storage(format!("Row error: {e}")))?;

            Ok(entries)
        })
        .await
        .map_err(|e| Error::internal(e.to_string()))?
    }
}
