// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Backend client contract.
//!
//! The pipeline talks to the data store only through [`Backend`]: data-model
//! records, raw rows, time series and workflow runs. Two
//! implementations ship with the crate:
//!
//! - [`HttpBackend`]: JSON REST client (reqwest)
//! - [`MemoryBackend`]: in-process store with fault injection, used by tests
//!   and `--dry-run`

mod http;
mod memory;

pub use http::HttpBackend;
pub use memory::MemoryBackend;

use crate::record::Fields;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Errors returned by a backend client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The backend reported that a referenced record does not exist.
    #[error("referenced record missing: {0}")]
    DependencyMissing(String),

    /// The request reached the backend and was refused.
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Network failure or timeout.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication failed: {0}")]
    Auth(String),
}

impl BackendError {
    /// Whether repeating the same request later can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::DependencyMissing(_)
            | BackendError::Transport(_)
            | BackendError::Auth(_) => true,
            BackendError::Rejected { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
        }
    }
}

/// Target collection of a write or lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CollectionRef {
    /// Space holding the collection definition.
    pub schema_space: String,
    /// Collection external id.
    pub name: String,
    pub version: Option<String>,
    /// Space records are stored in.
    pub instance_space: String,
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.schema_space, self.name)?;
        if let Some(version) = &self.version {
            write!(f, "/{}", version)?;
        }
        write!(f, "@{}", self.instance_space)
    }
}

/// Row columns of a raw table.
pub type Columns = serde_json::Map<String, serde_json::Value>;

/// A time series as registered on first sight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesDefinition {
    /// Collection registering the series; its instance space holds it.
    pub collection: CollectionRef,
    pub external_id: String,
    pub name: String,
    pub description: String,
    /// Topic the first datapoint arrived on.
    pub topic: String,
}

/// One timestamped numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Datapoint {
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub value: f64,
}

/// Data store operations used by the pipeline.
///
/// `upsert` must be idempotent per `(collection, id)`. `exists` returns
/// `Ok(false)` for a clean "not found".
pub trait Backend: Send + Sync + 'static {
    /// Create or replace one record.
    fn upsert(
        &self,
        collection: &CollectionRef,
        id: &str,
        fields: &Fields,
    ) -> impl std::future::Future<Output = Result<(), BackendError>> + Send;

    /// Point lookup by identity.
    fn exists(
        &self,
        collection: &CollectionRef,
        id: &str,
    ) -> impl std::future::Future<Output = Result<bool, BackendError>> + Send;

    /// Create a raw database if missing.
    fn ensure_database(
        &self,
        db: &str,
    ) -> impl std::future::Future<Output = Result<(), BackendError>> + Send;

    /// Create a raw table if missing.
    fn ensure_table(
        &self,
        db: &str,
        table: &str,
    ) -> impl std::future::Future<Output = Result<(), BackendError>> + Send;

    /// Insert or replace one raw row.
    fn insert_row(
        &self,
        db: &str,
        table: &str,
        key: &str,
        columns: &Columns,
    ) -> impl std::future::Future<Output = Result<(), BackendError>> + Send;

    /// Create a time series and its data-model instance if missing.
    fn ensure_timeseries(
        &self,
        series: &SeriesDefinition,
    ) -> impl std::future::Future<Output = Result<(), BackendError>> + Send;

    /// Append datapoints to a series created by `ensure_timeseries`.
    fn insert_datapoints(
        &self,
        instance_space: &str,
        external_id: &str,
        datapoints: &[Datapoint],
    ) -> impl std::future::Future<Output = Result<(), BackendError>> + Send;

    /// Report a successful run of the named extraction pipeline.
    fn report_status(
        &self,
        pipeline: &str,
    ) -> impl std::future::Future<Output = Result<(), BackendError>> + Send {
        let _ = pipeline;
        async { Ok(()) }
    }

    /// Start a downstream workflow run.
    fn trigger_workflow(
        &self,
        external_id: &str,
        version: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), BackendError>> + Send {
        let _ = (external_id, version);
        async { Ok(()) }
    }
}
