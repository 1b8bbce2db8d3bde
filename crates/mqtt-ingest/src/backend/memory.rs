// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process backend.

use super::{Backend, BackendError, CollectionRef, Columns, Datapoint, SeriesDefinition};
use crate::record::Fields;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};

type RecordKey = (String, String, String);
type RowKey = (String, String, String);
type SeriesKey = (String, String);

#[derive(Debug, Default)]
struct MemoryState {
    records: HashMap<RecordKey, Fields>,
    databases: HashSet<String>,
    tables: HashSet<(String, String)>,
    rows: HashMap<RowKey, Columns>,
    workflow_runs: Vec<(String, Option<String>)>,
    series: HashMap<SeriesKey, SeriesDefinition>,
    datapoints: HashMap<SeriesKey, Vec<Datapoint>>,
    status_runs: Vec<String>,
    failures: VecDeque<BackendError>,
    offline: bool,
    upserts: u64,
}

/// Backend keeping everything in memory.
///
/// With reference checking enabled, an upsert whose fields reference a
/// record that is not stored fails with [`BackendError::DependencyMissing`],
/// like a store enforcing direct relations.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    check_references: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject upserts that reference missing records.
    pub fn with_reference_check() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            check_references: true,
        }
    }

    /// Fail the next call with `error`. Queued failures are consumed in order.
    pub fn fail_next(&self, error: BackendError) {
        self.state.lock().failures.push_back(error);
    }

    /// Make every call fail with a transport error until cleared.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Stored fields of a record.
    pub fn record(&self, collection: &str, space: &str, id: &str) -> Option<Fields> {
        let key = (collection.to_string(), space.to_string(), id.to_string());
        self.state.lock().records.get(&key).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Successful upsert calls, including repeats of the same record.
    pub fn upsert_count(&self) -> u64 {
        self.state.lock().upserts
    }

    pub fn row(&self, db: &str, table: &str, key: &str) -> Option<Columns> {
        let key = (db.to_string(), table.to_string(), key.to_string());
        self.state.lock().rows.get(&key).cloned()
    }

    pub fn row_count(&self) -> usize {
        self.state.lock().rows.len()
    }

    pub fn has_table(&self, db: &str, table: &str) -> bool {
        self.state
            .lock()
            .tables
            .contains(&(db.to_string(), table.to_string()))
    }

    pub fn workflow_runs(&self) -> Vec<(String, Option<String>)> {
        self.state.lock().workflow_runs.clone()
    }

    pub fn series(&self, space: &str, external_id: &str) -> Option<SeriesDefinition> {
        let key = (space.to_string(), external_id.to_string());
        self.state.lock().series.get(&key).cloned()
    }

    pub fn series_count(&self) -> usize {
        self.state.lock().series.len()
    }

    /// Datapoints of one series in insertion order.
    pub fn datapoints(&self, space: &str, external_id: &str) -> Vec<Datapoint> {
        let key = (space.to_string(), external_id.to_string());
        self.state
            .lock()
            .datapoints
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }

    /// Pipelines reported by `report_status`, one entry per call.
    pub fn status_runs(&self) -> Vec<String> {
        self.state.lock().status_runs.clone()
    }

    fn check(state: &mut MemoryState) -> Result<(), BackendError> {
        if state.offline {
            return Err(BackendError::Transport("backend offline".into()));
        }
        match state.failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Backend for MemoryBackend {
    async fn upsert(
        &self,
        collection: &CollectionRef,
        id: &str,
        fields: &Fields,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        Self::check(&mut state)?;

        if self.check_references {
            for (name, value) in fields.iter() {
                for reference in value.references() {
                    let found = state.records.keys().any(|(_, space, rid)| {
                        *space == reference.space_key && *rid == reference.target_id
                    });
                    if !found {
                        return Err(BackendError::DependencyMissing(format!(
                            "{} -> {}:{}",
                            name, reference.space_key, reference.target_id
                        )));
                    }
                }
            }
        }

        tracing::debug!("memory upsert {} {}", collection, id);
        state.records.insert(
            (
                collection.name.clone(),
                collection.instance_space.clone(),
                id.to_string(),
            ),
            fields.clone(),
        );
        state.upserts += 1;
        Ok(())
    }

    async fn exists(&self, collection: &CollectionRef, id: &str) -> Result<bool, BackendError> {
        let mut state = self.state.lock();
        Self::check(&mut state)?;
        let key = (
            collection.name.clone(),
            collection.instance_space.clone(),
            id.to_string(),
        );
        Ok(state.records.contains_key(&key))
    }

    async fn ensure_database(&self, db: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        Self::check(&mut state)?;
        state.databases.insert(db.to_string());
        Ok(())
    }

    async fn ensure_table(&self, db: &str, table: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        Self::check(&mut state)?;
        if !state.databases.contains(db) {
            return Err(BackendError::Rejected {
                status: 404,
                message: format!("database {} does not exist", db),
            });
        }
        state.tables.insert((db.to_string(), table.to_string()));
        Ok(())
    }

    async fn insert_row(
        &self,
        db: &str,
        table: &str,
        key: &str,
        columns: &Columns,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        Self::check(&mut state)?;
        if !state.tables.contains(&(db.to_string(), table.to_string())) {
            return Err(BackendError::Rejected {
                status: 404,
                message: format!("table {}/{} does not exist", db, table),
            });
        }
        tracing::debug!("memory row {}/{}/{}", db, table, key);
        state.rows.insert(
            (db.to_string(), table.to_string(), key.to_string()),
            columns.clone(),
        );
        Ok(())
    }

    async fn ensure_timeseries(&self, series: &SeriesDefinition) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        Self::check(&mut state)?;
        let key = (
            series.collection.instance_space.clone(),
            series.external_id.clone(),
        );
        state.series.entry(key).or_insert_with(|| series.clone());
        Ok(())
    }

    async fn insert_datapoints(
        &self,
        instance_space: &str,
        external_id: &str,
        datapoints: &[Datapoint],
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        Self::check(&mut state)?;
        let key = (instance_space.to_string(), external_id.to_string());
        if !state.series.contains_key(&key) {
            return Err(BackendError::Rejected {
                status: 404,
                message: format!("time series {}:{} does not exist", instance_space, external_id),
            });
        }
        state
            .datapoints
            .entry(key)
            .or_default()
            .extend_from_slice(datapoints);
        Ok(())
    }

    async fn report_status(&self, pipeline: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        Self::check(&mut state)?;
        state.status_runs.push(pipeline.to_string());
        Ok(())
    }

    async fn trigger_workflow(
        &self,
        external_id: &str,
        version: Option<&str>,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        Self::check(&mut state)?;
        state
            .workflow_runs
            .push((external_id.to_string(), version.map(str::to_string)));
        Ok(())
    }
}
