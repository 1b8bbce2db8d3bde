// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Raw-row sink.
//!
//! Topic `db/table[/.../key]` stores the JSON object payload as one row.
//! Row key: the last topic level when there are more than two levels, else
//! the payload's `key` or `id`, else a random UUID.

use crate::backend::{Backend, BackendError, Columns};
use crate::normalize::{decode_object, NormalizeError};
use parking_lot::Mutex;
use std::collections::HashSet;
use thiserror::Error;

/// Raw message rejected before reaching the backend.
#[derive(Debug, Error)]
pub enum RawError {
    #[error(transparent)]
    Payload(#[from] NormalizeError),

    #[error("topic '{0}' does not name a db/table")]
    Topic(String),
}

/// One row ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub db: String,
    pub table: String,
    pub key: String,
    pub columns: Columns,
}

fn key_column(columns: &Columns, name: &str) -> Option<String> {
    match columns.get(name)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Build a row from a message.
pub fn parse_row(topic: &str, payload: &[u8]) -> Result<RawRow, RawError> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() < 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(RawError::Topic(topic.to_string()));
    }
    let columns = decode_object(topic, payload)?;

    let key = match parts.last() {
        Some(last) if parts.len() > 2 && !last.is_empty() => last.to_string(),
        _ => key_column(&columns, "key")
            .or_else(|| key_column(&columns, "id"))
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
    };

    Ok(RawRow {
        db: parts[0].to_string(),
        table: parts[1].to_string(),
        key,
        columns,
    })
}

/// Databases and tables known to exist.
///
/// Monotonic: entries are only added, never invalidated.
#[derive(Debug, Default)]
pub struct ExistenceCache {
    databases: Mutex<HashSet<String>>,
    tables: Mutex<HashSet<(String, String)>>,
}

impl ExistenceCache {
    pub fn has_database(&self, db: &str) -> bool {
        self.databases.lock().contains(db)
    }

    pub fn has_table(&self, db: &str, table: &str) -> bool {
        self.tables
            .lock()
            .contains(&(db.to_string(), table.to_string()))
    }

    pub fn mark_database(&self, db: &str) {
        self.databases.lock().insert(db.to_string());
    }

    pub fn mark_table(&self, db: &str, table: &str) {
        self.tables
            .lock()
            .insert((db.to_string(), table.to_string()));
    }
}

/// Writes raw rows, creating databases and tables on first use.
#[derive(Debug, Default)]
pub struct RawSink {
    cache: ExistenceCache,
}

impl RawSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(&self) -> &ExistenceCache {
        &self.cache
    }

    pub async fn write<B: Backend>(&self, backend: &B, row: &RawRow) -> Result<(), BackendError> {
        if !self.cache.has_table(&row.db, &row.table) {
            if !self.cache.has_database(&row.db) {
                backend.ensure_database(&row.db).await?;
                self.cache.mark_database(&row.db);
                tracing::info!("raw database ready: {}", row.db);
            }
            backend.ensure_table(&row.db, &row.table).await?;
            self.cache.mark_table(&row.db, &row.table);
            tracing::info!("raw table ready: {}/{}", row.db, row.table);
        }

        backend
            .insert_row(&row.db, &row.table, &row.key, &row.columns)
            .await?;
        tracing::debug!("raw row {}/{}/{}", row.db, row.table, row.key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[test]
    fn test_key_from_topic() {
        let row = parse_row("plant/sensors/pump1", br#"{"v":1}"#).expect("row");
        assert_eq!(row.db, "plant");
        assert_eq!(row.table, "sensors");
        assert_eq!(row.key, "pump1");
    }

    #[test]
    fn test_key_from_payload() {
        let row = parse_row("plant/sensors", br#"{"key":"k1","id":"i1"}"#).expect("row");
        assert_eq!(row.key, "k1");
        let row = parse_row("plant/sensors", br#"{"id":7}"#).expect("row");
        assert_eq!(row.key, "7");
        let row = parse_row("plant/sensors", br#"{"v":1}"#).expect("row");
        assert_eq!(row.key.len(), 36);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(parse_row("plant", b"{}"), Err(RawError::Topic(_))));
        assert!(matches!(parse_row("/t", b"{}"), Err(RawError::Topic(_))));
        assert!(matches!(
            parse_row("a/b", b"[1]"),
            Err(RawError::Payload(NormalizeError::Parse { .. }))
        ));
    }

    #[tokio::test]
    async fn test_write_creates_once() {
        let backend = MemoryBackend::new();
        let sink = RawSink::new();

        let row = parse_row("plant/sensors/p1", br#"{"v":1}"#).expect("row");
        sink.write(&backend, &row).await.expect("write");
        assert!(sink.cache().has_table("plant", "sensors"));

        // Table is cached, so the injected failure hits the insert.
        backend.fail_next(BackendError::Transport("reset".into()));
        let row = parse_row("plant/sensors/p2", br#"{"v":2}"#).expect("row");
        assert!(sink.write(&backend, &row).await.is_err());
        sink.write(&backend, &row).await.expect("retry");
        assert_eq!(backend.row_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_setup_is_not_cached() {
        let backend = MemoryBackend::new();
        let sink = RawSink::new();
        backend.set_offline(true);
        let row = parse_row("db/t/k", b"{}").expect("row");
        assert!(sink.write(&backend, &row).await.is_err());
        assert!(!sink.cache().has_database("db"));
        backend.set_offline(false);
        sink.write(&backend, &row).await.expect("write");
        assert!(backend.has_table("db", "t"));
    }
}
