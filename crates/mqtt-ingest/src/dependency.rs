// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dependency resolution for event records.

use crate::backend::{Backend, BackendError, CollectionRef};
use crate::config::IngestConfig;
use crate::record::{NormalizedRecord, Reference};

/// Finds the frame an event depends on and checks that it exists.
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    field: String,
    schema_space: String,
    collection: String,
    version: Option<String>,
}

impl DependencyResolver {
    pub fn from_config(config: &IngestConfig) -> Self {
        let dep = &config.dependency;
        Self {
            field: dep.field.clone(),
            schema_space: dep
                .schema_space
                .clone()
                .unwrap_or_else(|| config.defaults.schema_space.clone()),
            collection: dep.collection.clone(),
            version: Some(
                dep.version
                    .clone()
                    .unwrap_or_else(|| config.defaults.version.clone()),
            ),
        }
    }

    /// Reference an event record waits on. `None` for other kinds.
    pub fn extract_dependency<'a>(&self, record: &'a NormalizedRecord) -> Option<&'a Reference> {
        if !record.kind.has_dependency() {
            return None;
        }
        record.fields.get(&self.field)?.as_reference()
    }

    /// Collection lookups for `reference` go to.
    pub fn collection_for(&self, reference: &Reference) -> CollectionRef {
        CollectionRef {
            schema_space: self.schema_space.clone(),
            name: self.collection.clone(),
            version: self.version.clone(),
            instance_space: reference.space_key.clone(),
        }
    }

    /// Whether the referenced record is stored. "Not found" is `Ok(false)`.
    pub async fn dependency_exists<B: Backend>(
        &self,
        backend: &B,
        reference: &Reference,
    ) -> Result<bool, BackendError> {
        backend
            .exists(&self.collection_for(reference), &reference.target_id)
            .await
    }
}
